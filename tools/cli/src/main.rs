//! mirrorsync CLI - incremental one-way mirroring between remote trees.
//!
//! Each `run` picks up files modified since the stored watermark, copies
//! them to the target and verifies every copy.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mirrorsync_common::Timestamp;
use mirrorsync_storage::{create_default_registry, Connect};
use mirrorsync_sync::{
    CancellationToken, JsonFileWatermarkStore, SyncEngine, SyncReport, TransferStatus,
    WatermarkStore,
};

use crate::config::{EndpointConfig, FileConfig, Overrides, Settings};

#[derive(Parser)]
#[command(name = "mirrorsync")]
#[command(about = "mirrorsync - Incremental remote tree mirroring")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON config file describing endpoints and sync settings.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use a local directory as the source.
    #[arg(long, global = true)]
    source_dir: Option<PathBuf>,

    /// Use a local directory as the target.
    #[arg(long, global = true)]
    target_dir: Option<PathBuf>,

    /// Watermark state file.
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,

    /// Watermark key.
    #[arg(long, global = true)]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync cycle.
    Run {
        /// Source directory to mirror (default: "/").
        #[arg(short, long)]
        root: Option<String>,

        /// Transfer chunk size in bytes.
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Maximum number of concurrent file transfers.
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Digest algorithm: "sha256" or "blake2b-256".
        #[arg(long)]
        digest: Option<String>,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List files that the next run would transfer.
    Detect {
        /// Source directory to scan (default: "/").
        #[arg(short, long)]
        root: Option<String>,

        /// Scan from this watermark instead of the stored one.
        #[arg(short, long)]
        since: Option<Timestamp>,
    },

    /// Inspect or change stored watermarks.
    Watermark {
        #[command(subcommand)]
        action: WatermarkAction,
    },
}

#[derive(Subcommand)]
enum WatermarkAction {
    /// Show all stored watermarks.
    Show,

    /// Store a watermark.
    Set {
        /// Unix timestamp in seconds.
        value: Timestamp,

        /// Allow moving the watermark backwards.
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let mut overrides = Overrides {
        source_dir: cli.source_dir,
        target_dir: cli.target_dir,
        state_file: cli.state_file,
        watermark_key: cli.key,
        ..Default::default()
    };

    match cli.command {
        Commands::Run {
            root,
            chunk_size,
            concurrency,
            digest,
            json,
        } => {
            overrides.root = root;
            overrides.chunk_size = chunk_size;
            overrides.max_concurrency = concurrency;
            overrides.digest = digest;
            cmd_run(Settings::resolve(file, overrides)?, json).await
        }

        Commands::Detect { root, since } => {
            overrides.root = root;
            cmd_detect(Settings::resolve(file, overrides)?, since).await
        }

        Commands::Watermark { action } => {
            let state_file = overrides
                .state_file
                .or(file.state_file)
                .unwrap_or_else(|| PathBuf::from(config::DEFAULT_STATE_FILE));
            let key = overrides
                .watermark_key
                .unwrap_or(file.sync.watermark_key);
            cmd_watermark(&state_file, &key, action).await
        }
    }
}

fn connector(endpoint: &EndpointConfig, side: &str) -> Result<Arc<dyn Connect>> {
    create_default_registry()
        .resolve(&endpoint.provider, endpoint.config.clone())
        .with_context(|| format!("Failed to set up {} provider '{}'", side, endpoint.provider))
}

fn build_engine(settings: Settings) -> Result<SyncEngine> {
    let target = settings
        .target
        .as_ref()
        .context("No target configured (use --target-dir or a config file)")?;
    let store = Arc::new(JsonFileWatermarkStore::new(&settings.state_file));

    let engine = SyncEngine::new(
        connector(&settings.source, "source")?,
        connector(target, "target")?,
        store,
        settings.sync,
    )?;
    Ok(engine)
}

/// Run one sync cycle.
async fn cmd_run(settings: Settings, json: bool) -> Result<()> {
    info!(
        "Mirroring {} from {} to {}",
        settings.sync.root,
        settings.source.provider,
        settings.target.as_ref().map_or("?", |t| t.provider.as_str())
    );
    let engine = build_engine(settings)?;

    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping transfers");
            on_signal.cancel();
        }
    });

    let report = engine
        .run_until_cancelled(&token)
        .await
        .context("Sync run failed")?;

    if json {
        println!("{}", report.to_json()?);
    } else {
        print_report(&report);
    }

    let failed = report.failed_paths().len();
    if failed > 0 {
        anyhow::bail!("{} of {} files were not synced", failed, report.results.len());
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    if report.results.is_empty() {
        println!("No new files.");
    } else {
        println!("Results:");
        for result in &report.results {
            match &result.detail {
                Some(detail) => {
                    println!("  [{}] {} ({})", result.status.as_str(), result.path, detail)
                }
                None => println!(
                    "  [{}] {} ({} bytes)",
                    result.status.as_str(),
                    result.path,
                    result.bytes
                ),
            }
        }
    }

    println!("Summary:");
    println!("  Verified:          {}", report.count(TransferStatus::Verified));
    println!("  Size matched only: {}", report.count(TransferStatus::SizeMatchedOnly));
    println!("  Mismatch:          {}", report.count(TransferStatus::Mismatch));
    println!("  Transfer failed:   {}", report.count(TransferStatus::TransferFailed));
    println!("  Bytes:             {}", report.bytes_transferred());
    println!(
        "  Watermark:         {} -> {}",
        report.previous_watermark, report.watermark
    );
    if report.cancelled {
        println!("  Run was cancelled.");
    }
}

/// Dry run: print the change set without touching the watermark.
async fn cmd_detect(settings: Settings, since: Option<Timestamp>) -> Result<()> {
    let store = JsonFileWatermarkStore::new(&settings.state_file);
    let watermark = match since {
        Some(value) => value,
        None => store
            .get(&settings.sync.watermark_key)
            .await
            .context("Failed to read watermark")?,
    };

    let source = connector(&settings.source, "source")?;
    let client = source.connect().await.context("Failed to connect to source")?;
    let detection = mirrorsync_sync::detect(client.as_ref(), &settings.sync.root, watermark)
        .await
        .context("Change detection failed")?;

    if detection.changes.is_empty() {
        println!("No files modified after {}.", watermark);
    } else {
        println!("Files modified after {}:", watermark);
        for path in &detection.changes {
            println!("  {}", path);
        }
    }
    println!(
        "{} files, {} directories scanned, next watermark {}",
        detection.changes.len(),
        detection.directories_scanned,
        detection.watermark
    );
    Ok(())
}

async fn cmd_watermark(state_file: &Path, key: &str, action: WatermarkAction) -> Result<()> {
    let store = JsonFileWatermarkStore::new(state_file);

    match action {
        WatermarkAction::Show => {
            let entries = store.entries().await.context("Failed to read watermarks")?;
            if entries.is_empty() {
                println!("No watermarks stored in {}.", state_file.display());
            }
            for (name, value) in entries {
                let when = chrono::DateTime::from_timestamp(value, 0)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "invalid".to_string());
                println!("  {} = {} ({})", name, value, when);
            }
        }
        WatermarkAction::Set { value, force } => {
            if force {
                store.force_set(key, value).await?;
            } else {
                store
                    .set(key, value)
                    .await
                    .context("Refused to update watermark (use --force to move it back)")?;
            }
            println!("Watermark '{}' set to {}.", key, value);
        }
    }
    Ok(())
}
