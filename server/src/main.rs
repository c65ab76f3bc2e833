use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use asset_server::{config::Config, start_server};
use clap::{Parser, Subcommand};
use serde::Serialize;
use thumbnail_cache::{CacheStats, ThumbnailStore, WarmupProgress, WarmupSweeper};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "asset-server")]
#[command(about = "Asset upload and thumbnail server for the community site")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the upload, listing and static asset endpoints
    Serve {
        /// Port to listen on (overrides SERVER_PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Directory holding `profile/upload` (overrides STORAGE_ROOT)
        #[arg(long)]
        storage_root: Option<PathBuf>,

        /// Skip the boot-time thumbnail sweep
        #[arg(long)]
        no_warmup: bool,
    },

    /// Generate every missing or stale thumbnail, then exit
    Warm {
        /// Directory holding `profile/upload` (overrides STORAGE_ROOT)
        #[arg(long)]
        storage_root: Option<PathBuf>,

        /// Print the sweep report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;

    match cli.command {
        Commands::Serve {
            port,
            storage_root,
            no_warmup,
        } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(root) = storage_root {
                config.storage_root = root;
            }
            if no_warmup {
                config.warmup_on_start = false;
            }
            start_server(config).await
        }
        Commands::Warm { storage_root, json } => {
            warm(storage_root.unwrap_or(config.storage_root), json).await
        }
    }
}

#[derive(Serialize)]
struct WarmReport {
    progress: WarmupProgress,
    cache: CacheStats,
}

async fn warm(storage_root: PathBuf, json: bool) -> Result<()> {
    let store = ThumbnailStore::open(&storage_root).with_context(|| {
        format!("Failed to resolve storage root {}", storage_root.display())
    })?;
    let store = Arc::new(store);
    println!("Warming thumbnails under {}", store.layout().upload_dir().display());

    let sweep_store = Arc::clone(&store);
    let progress = tokio::task::spawn_blocking(move || WarmupSweeper::new(sweep_store).run_blocking())
        .await
        .context("Thumbnail warm-up task failed")?;
    let stats = store.stats();

    if json {
        let report = WarmReport {
            progress,
            cache: stats,
        };
        let output =
            serde_json::to_string_pretty(&report).context("Failed to serialize warm-up report")?;
        println!("{output}");
        return Ok(());
    }

    println!("Sources found:    {}", progress.discovered);
    println!("Already fresh:    {}", stats.hits);
    println!("Generated:        {}", stats.generated);
    println!("Failed:           {}", progress.failed);
    if progress.walk_errors > 0 {
        println!("Unreadable paths: {}", progress.walk_errors);
    }
    if stats.fallbacks > 0 {
        println!("Fallback rate:    {:.1}%", stats.fallback_percent());
    }

    Ok(())
}
