//! memoctl - inspect and maintain a memocache storage root

mod handler;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use memocache::{CacheConfig, MemoCache};
use tracing::info;

use crate::handler::CommandHandler;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cache storage root (defaults to the platform cache directory)
    #[arg(short, long, env = "MEMOCACHE_ROOT")]
    root: Option<PathBuf>,

    /// TOML configuration file; --root and --max-bytes override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Durable tier cap in bytes; a cap below current usage evicts on open
    #[arg(long)]
    max_bytes: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

/// Operator actions
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show entry counts, byte usage and configuration
    Stats {
        /// Print JSON instead of key:value lines
        #[arg(long)]
        json: bool,
    },
    /// Remove every entry
    Clear,
    /// Remove entries whose key contains PATTERN
    Invalidate {
        /// Key pattern
        pattern: String,
        /// Match PATTERN at the start of the key only
        #[arg(long)]
        prefix: bool,
    },
    /// Remove expired entries and entries whose dependencies changed
    Sweep,
}

fn load_config(args: &Args) -> Result<CacheConfig> {
    let mut config = match &args.config {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CacheConfig::default(),
    };

    if let Some(root) = &args.root {
        config = config.with_storage_root(root);
    }
    if let Some(max) = args.max_bytes {
        config = config.with_durable_max_bytes(max);
    }

    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    info!("memoctl v{}", env!("CARGO_PKG_VERSION"));
    let root = config.storage_root.clone();
    let cache = MemoCache::open(config)
        .with_context(|| format!("opening cache at {}", root.display()))?;

    let output = CommandHandler::new(cache).handle(&args.command)?;
    println!("{output}");
    Ok(())
}
