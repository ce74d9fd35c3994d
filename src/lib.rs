//! Correctness-preserving cache of per-file analysis results.
//!
//! The crate decides when a cached result must be thrown away and what else
//! goes with it: [`hasher`] produces normalized content hashes, [`tracker`]
//! maintains the project dependency graph, [`batch`] deduplicates and
//! batches changes into impact-closure invalidations, [`watcher`] turns
//! filesystem and git activity into change batches, [`manager`] wires it all
//! into one lifecycle and [`cleaner`] bounds the persisted cache by age and
//! size.

pub mod batch;
pub mod cleaner;
pub mod config;
pub mod deps;
pub mod error;
pub mod graph;
pub mod hasher;
pub mod language;
pub mod manager;
pub mod resolver;
pub mod store;
pub mod tracker;
pub mod walker;
pub mod watcher;

pub use error::{AstCacheError, Result};
