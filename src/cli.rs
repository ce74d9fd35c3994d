use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Dependency-aware cache of per-file analysis results.
///
/// ast-cache keeps cached analysis valid across edits and branch switches:
/// it hashes normalized file content, tracks the project dependency graph and
/// invalidates the impact closure of every change.
#[derive(Parser, Debug)]
#[command(
    name = "ast-cache",
    version,
    about,
    long_about = None,
    propagate_version = true,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch a project and invalidate cached results as files change (until Ctrl-C).
    Watch {
        /// Path to the project root.
        path: PathBuf,

        /// Cache strategy: conservative, balanced, aggressive or immediate.
        /// Overrides the config file.
        #[arg(long)]
        strategy: Option<String>,
    },

    /// Run one cleanup pass over the cache directory and print the report as JSON.
    Cleanup {
        /// Path to the project root.
        path: PathBuf,
    },

    /// Show which files are invalidated when the given files change.
    Impact {
        /// Path to the project root.
        path: PathBuf,

        /// Changed files, relative to the project root.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output as JSON instead of one `score<TAB>path` line per file.
        #[arg(long)]
        json: bool,
    },

    /// Print the normalized content hash of a file.
    Hash {
        /// File to hash.
        file: PathBuf,
    },

    /// Build the dependency graph and print aggregated statistics as JSON.
    Stats {
        /// Path to the project root.
        path: PathBuf,
    },

    /// Install or remove the git hook integration.
    Hooks {
        #[command(subcommand)]
        action: HooksAction,
    },

    /// Entry point invoked by the installed git hooks.
    #[command(hide = true)]
    Hook {
        /// Hook name (pre-commit or post-commit).
        name: String,

        /// Path to the project root.
        path: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum HooksAction {
    /// Append the ast-cache block to pre-commit and post-commit.
    Install {
        /// Path to the project root.
        path: PathBuf,
    },
    /// Remove the ast-cache block, leaving other hook content untouched.
    Uninstall {
        /// Path to the project root.
        path: PathBuf,
    },
}
