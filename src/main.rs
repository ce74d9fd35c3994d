mod cli;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Serialize;

use ast_cache::cleaner::AstCacheCleaner;
use ast_cache::config::AstCacheConfig;
use ast_cache::hasher::ContentHasher;
use ast_cache::manager::{CacheStrategy, WatchManager, hooks};
use ast_cache::store::DiskStore;
use ast_cache::tracker::DependencyTracker;
use ast_cache::walker::walk_project;
use ast_cache::watcher::PathFilter;

use cli::{Cli, Commands, HooksAction};

#[derive(Serialize)]
struct ImpactedFile {
    path: PathBuf,
    score: u8,
}

#[derive(Serialize)]
struct ImpactReport {
    changed: Vec<PathBuf>,
    impacted: Vec<ImpactedFile>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("AST_CACHE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch { path, strategy } => {
            let mut config = load_config(&path)?;
            if let Some(name) = strategy {
                config.strategy = CacheStrategy::parse(&name)?;
            }
            let manager = WatchManager::new(&path, config)?;
            let stats = manager.initialize().await?;
            eprintln!(
                "Watching {} ({} files, {} edges). Press Ctrl-C to stop.",
                manager.root().display(),
                stats.files,
                stats.edges
            );
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            manager.stop_watching().await?;
            println!("{}", serde_json::to_string_pretty(&manager.get_stats())?);
        }
        Commands::Cleanup { path } => {
            let report = run_cleanup(&path)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Impact { path, files, json } => {
            let report = impact(&path, &files)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for file in &report.impacted {
                    println!("{}\t{}", file.score, file.path.display());
                }
            }
        }
        Commands::Hash { file } => {
            let hasher = ContentHasher::new();
            match hasher.hash_file(&file) {
                Some(hash) => println!("{hash}"),
                None => bail!("cannot hash {}", file.display()),
            }
        }
        Commands::Stats { path } => {
            let manager = WatchManager::new(&path, load_config(&path)?)?;
            manager.refresh_git_state();
            manager.rebuild();
            println!("{}", serde_json::to_string_pretty(&manager.get_stats())?);
        }
        Commands::Hooks { action } => {
            let reports = match action {
                HooksAction::Install { path } => {
                    let program = std::env::current_exe()
                        .context("cannot locate the ast-cache executable")?;
                    hooks::install_hooks(&path, &program.to_string_lossy())?
                }
                HooksAction::Uninstall { path } => hooks::uninstall_hooks(&path)?,
            };
            for report in reports {
                println!("{:?}\t{}", report.action, report.path.display());
            }
        }
        Commands::Hook { name, path } => run_hook(&name, &path),
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<AstCacheConfig> {
    AstCacheConfig::load(path).with_context(|| format!("invalid configuration in {}", path.display()))
}

fn run_cleanup(path: &Path) -> Result<ast_cache::cleaner::CleanupReport> {
    let config = load_config(path)?;
    let store = DiskStore::open(&config.cache_root(path))?;
    let cleaner = AstCacheCleaner::from_config(std::sync::Arc::new(store), &config)?;
    Ok(cleaner.cleanup())
}

fn impact(path: &Path, files: &[PathBuf]) -> Result<ImpactReport> {
    let config = load_config(path)?;
    let root = std::fs::canonicalize(path)
        .with_context(|| format!("cannot open project {}", path.display()))?;
    let filter = PathFilter::new(
        &root,
        &config.supported_languages()?,
        &config.exclude,
        Some(&config.cache_root(&root)),
    );

    let mut tracker = DependencyTracker::new(&root);
    tracker.build_dependency_graph(&walk_project(&filter));

    let impacted = tracker
        .get_impacted_files(files)
        .into_iter()
        .map(|path| {
            let score = tracker.calculate_impact_score(&path);
            ImpactedFile { path, score }
        })
        .collect();
    Ok(ImpactReport {
        changed: files.to_vec(),
        impacted,
    })
}

/// Hooks never fail the git operation that runs them.
fn run_hook(name: &str, path: &Path) {
    let result = match name {
        "post-commit" => run_cleanup(path).map(|report| {
            tracing::info!(removed = report.removed(), "post-commit cleanup");
        }),
        "pre-commit" => cycle_check(path),
        other => {
            tracing::debug!(hook = other, "unknown hook ignored");
            Ok(())
        }
    };
    if let Err(err) = result {
        tracing::warn!(hook = name, "{err:#}");
    }
}

/// Warn about dependency cycles before they are committed.
fn cycle_check(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let root = std::fs::canonicalize(path)?;
    let filter = PathFilter::new(&root, &config.supported_languages()?, &config.exclude, None);
    let mut tracker = DependencyTracker::new(&root);
    tracker.build_dependency_graph(&walk_project(&filter));
    for cycle in tracker.detect_cycles() {
        let chain: Vec<String> = cycle.iter().map(|p| p.display().to_string()).collect();
        tracing::warn!("dependency cycle: {}", chain.join(" -> "));
    }
    Ok(())
}
