//! hakobu command-line tool.
//!
//! Paths may be local (`/var/cache/x`, `./data`, `file:/tmp`) or in-process
//! memory paths (`mem:/scratch`), which only live for one invocation.
//!
//! ## Usage
//!
//! ```bash
//! hakobu cp ./model.bin /srv/models/model.bin --no-overwrite
//! hakobu cp-tree ./site /srv/www/current --staged
//! hakobu cache /var/cache/hakobu ./a.tar ./b.tar
//! hakobu prune /var/cache/hakobu --capacity 1073741824 --once
//! hakobu prune /var/cache/hakobu --config prune.toml
//! hakobu ls /var/cache/hakobu --recursive
//! hakobu df /var/cache
//! ```
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use hakobu_vfs::{
    BackendRegistry, CopyMode, FileCache, FolderPruner, Matcher, Percent, PrunerConfig,
    VfsPath, copy_folder, safe_copy, safe_copy_folder,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Safe copies, a filename-keyed cache and folder pruning over a virtual filesystem.
#[derive(Parser, Debug)]
#[command(name = "hakobu", version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy one file without ever exposing a partial destination
    Cp {
        source: String,
        dest: String,
        /// Fail if the destination already holds data
        #[arg(long)]
        no_overwrite: bool,
    },

    /// Copy a folder tree
    CpTree {
        source: String,
        dest: String,
        /// Build the tree next to the destination and publish it with one rename
        #[arg(long)]
        staged: bool,
        /// Only copy files with this extension
        #[arg(long)]
        ext: Option<String>,
        #[arg(long)]
        no_overwrite: bool,
    },

    /// Add files to a cache folder (existing names are left alone)
    Cache {
        folder: String,
        #[arg(required = true)]
        files: Vec<String>,
        /// Cache a single file under this name
        #[arg(long)]
        name: Option<String>,
    },

    /// Evict old files from a folder
    Prune {
        folder: String,
        /// TOML policy file; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,
        /// Byte ceiling for matched files
        #[arg(long)]
        capacity: Option<u64>,
        /// Never prune files younger than this many seconds
        #[arg(long)]
        min_age_secs: Option<u64>,
        /// Prune while the volume has less than this percent usable
        #[arg(long)]
        min_usable_percent: Option<f64>,
        /// Seconds between cycles
        #[arg(long)]
        frequency_secs: Option<u64>,
        /// Run a single cycle and print the report
        #[arg(long)]
        once: bool,
    },

    /// List a folder
    Ls {
        folder: String,
        #[arg(short, long)]
        recursive: bool,
    },

    /// Show space on the volume holding a folder
    Df { folder: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let cwd = std::env::current_dir().context("reading the current directory")?;
    let registry = Arc::new(
        BackendRegistry::with_defaults().with_working_folder(VfsPath::from_local(&cwd)),
    );

    match args.command {
        Command::Cp {
            source,
            dest,
            no_overwrite,
        } => cmd_cp(&registry, &source, &dest, mode(no_overwrite)).await,
        Command::CpTree {
            source,
            dest,
            staged,
            ext,
            no_overwrite,
        } => cmd_cp_tree(&registry, &source, &dest, staged, ext, mode(no_overwrite)).await,
        Command::Cache {
            folder,
            files,
            name,
        } => cmd_cache(&registry, &folder, &files, name).await,
        Command::Prune {
            folder,
            config,
            capacity,
            min_age_secs,
            min_usable_percent,
            frequency_secs,
            once,
        } => {
            let mut policy = match config {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    PrunerConfig::from_toml(&text)
                        .with_context(|| format!("parsing {}", path.display()))?
                }
                None => PrunerConfig::default(),
            };
            if capacity.is_some() {
                policy.capacity_bytes = capacity;
            }
            if let Some(secs) = min_age_secs {
                policy.minimum_age_secs = secs;
            }
            if let Some(percent) = min_usable_percent {
                policy.minimum_usable_percent = percent;
            }
            if let Some(secs) = frequency_secs {
                policy.frequency_secs = secs;
            }
            cmd_prune(&registry, &folder, &policy, once).await
        }
        Command::Ls { folder, recursive } => cmd_ls(&registry, &folder, recursive).await,
        Command::Df { folder } => cmd_df(&registry, &folder).await,
    }
}

fn mode(no_overwrite: bool) -> CopyMode {
    if no_overwrite {
        CopyMode::DoNotOverwrite
    } else {
        CopyMode::Overwrite
    }
}

async fn cmd_cp(
    registry: &Arc<BackendRegistry>,
    source: &str,
    dest: &str,
    mode: CopyMode,
) -> Result<()> {
    let source = registry.file(source);
    let dest = registry.file(dest);
    if !source.is_file().await? {
        bail!("{source} is not a file");
    }

    let progress = |copied: u64, total: u64| {
        tracing::trace!(copied, total, "copy progress");
    };
    safe_copy(&source, &dest, mode, &progress)
        .await
        .with_context(|| format!("copying {source} to {dest}"))?;
    tracing::info!(%source, %dest, "copied");
    Ok(())
}

async fn cmd_cp_tree(
    registry: &Arc<BackendRegistry>,
    source: &str,
    dest: &str,
    staged: bool,
    ext: Option<String>,
    mode: CopyMode,
) -> Result<()> {
    let source = registry.folder(source);
    let dest = registry.folder(dest);
    if !source.is_folder().await? {
        bail!("{source} is not a folder");
    }
    let matcher = ext.as_deref().map(Matcher::extension).unwrap_or_default();

    let copied = if staged {
        safe_copy_folder(&source, &dest, &matcher, mode, &hakobu_vfs::NoProgress).await
    } else {
        copy_folder(&source, &dest, &matcher, mode, &hakobu_vfs::NoProgress).await
    }
    .with_context(|| format!("copying {source} to {dest}"))?;

    tracing::info!(%source, %dest, files = copied.len(), staged, "copied tree");
    Ok(())
}

async fn cmd_cache(
    registry: &Arc<BackendRegistry>,
    folder: &str,
    files: &[String],
    name: Option<String>,
) -> Result<()> {
    if name.is_some() && files.len() != 1 {
        bail!("--name needs exactly one file");
    }
    let cache = FileCache::new(registry.folder(folder));

    for file in files {
        let source = registry.file(file.as_str());
        let cached = match &name {
            Some(name) => cache.add_as(&source, name, CopyMode::Overwrite).await,
            None => cache.add(&source, CopyMode::Overwrite).await,
        }
        .with_context(|| format!("caching {source}"))?;
        println!("{cached}");
    }
    Ok(())
}

async fn cmd_prune(
    registry: &Arc<BackendRegistry>,
    folder: &str,
    policy: &PrunerConfig,
    once: bool,
) -> Result<()> {
    let folder = registry.folder(folder);
    let pruner = FolderPruner::from_config(folder.clone(), policy)?;

    if once {
        let report = pruner.run_once().await?;
        let summary = serde_json::json!({
            "folder": folder.to_string(),
            "scanned": report.scanned,
            "removed": report.removed.iter().map(|f| f.to_string()).collect::<Vec<_>>(),
            "bytes_freed": report.bytes_freed,
            "remaining_bytes": report.remaining_bytes,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    pruner.start();
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutting down");
    if !pruner.stop(Duration::from_secs(30)).await {
        tracing::warn!("pruner cycle still running at exit");
    }
    Ok(())
}

async fn cmd_ls(registry: &Arc<BackendRegistry>, folder: &str, recursive: bool) -> Result<()> {
    let folder = registry.folder(folder);
    let files = if recursive {
        folder.nested_files(&Matcher::all()).await?
    } else {
        folder.files(&Matcher::all()).await?
    };
    for file in files {
        let attr = file.attr().await?;
        println!("{:>12}  {}", attr.size, file);
    }
    if !recursive {
        for sub in folder.folders().await? {
            println!("{:>12}  {}", "-", sub);
        }
    }
    Ok(())
}

async fn cmd_df(registry: &Arc<BackendRegistry>, folder: &str) -> Result<()> {
    let folder = registry.folder(folder);
    let stat = folder.statfs().await?;
    let summary = serde_json::json!({
        "folder": folder.to_string(),
        "total_bytes": stat.total_space(),
        "free_bytes": stat.free_space(),
        "usable_bytes": stat.usable_space(),
        "usable_percent": stat.usable_fraction(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    if stat.usable_fraction() < Percent::new(hakobu_vfs::DEFAULT_MINIMUM_USABLE_PERCENT) {
        tracing::warn!(%folder, usable = %stat.usable_fraction(), "volume is below the default pruning threshold");
    }
    Ok(())
}
