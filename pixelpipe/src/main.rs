use std::path::PathBuf;
use clap::{Parser, Subcommand};
use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pixelpipe::inspect::{self, format_bytes};
use pixelpipe_core::DiskCache;

#[derive(Parser)]
#[command(name = "pixelpipe")]
#[command(about = "Inspect and maintain pixelpipe image caches", long_about = None)]
struct Cli {
    /// Cache directory (defaults to the platform cache dir)
    #[arg(short, long)]
    cache_dir: Option<PathBuf>,

    /// Byte budget used when opening the cache
    #[arg(short, long, default_value_t = 250 * 1024 * 1024)]
    max_size: u64,

    /// Print machine-readable JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show entry count and sizes
    Stats,

    /// List entries, least recently used first
    List,

    /// Show the metadata of one entry
    Show {
        /// Cache key (usually the image URL)
        key: String,
    },

    /// Store a local file as a cache entry
    Import {
        /// Cache key (usually the image URL)
        key: String,

        /// File to store
        file: PathBuf,

        /// Mark the entry fresh for this many seconds
        #[arg(long)]
        max_age: Option<u64>,
    },

    /// Remove one entry
    Remove {
        /// Cache key (usually the image URL)
        key: String,
    },

    /// Evict least recently used entries down to a size
    Trim {
        /// Target size in bytes
        #[arg(long)]
        to: u64,
    },

    /// Remove every entry
    Clear,
}

fn cache_dir(cli: &Cli) -> Result<PathBuf> {
    match &cli.cache_dir {
        Some(dir) => Ok(dir.clone()),
        None => dirs::cache_dir()
            .map(|dir| dir.join("pixelpipe"))
            .context("no platform cache directory; pass --cache-dir"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "pixelpipe=info".into())
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let directory = cache_dir(&cli)?;
    let max_size = cli.max_size;
    let cache = tokio::task::spawn_blocking(move || DiskCache::open(directory, max_size))
        .await?
        .context("failed to open cache")?;

    match cli.command {
        Commands::Stats => {
            let summary = inspect::summarize(&cache);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("Cache: {}", summary.directory.display());
                println!("  Entries:  {}", summary.entries);
                println!(
                    "  Data:     {} / {}",
                    format_bytes(summary.size_bytes),
                    format_bytes(summary.max_size_bytes)
                );
                println!("  Metadata: {}", format_bytes(summary.metadata_bytes));
            }
        }

        Commands::List => {
            let entries = inspect::list(&cache);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("Cache is empty.");
            } else {
                println!("{:<64}  {:>10}", "HASH", "SIZE");
                for entry in entries {
                    println!("{:<64}  {:>10}", entry.hash, format_bytes(entry.data_len));
                }
            }
        }

        Commands::Show { ref key } => match inspect::show(&cache, key)? {
            Some(details) if cli.json => {
                println!("{}", serde_json::to_string_pretty(&details)?);
            }
            Some(details) => {
                println!("Key:      {}", details.key);
                println!("Hash:     {}", details.hash);
                println!("Size:     {}", format_bytes(details.data_len));
                if let Some(mime_type) = &details.mime_type {
                    println!("Type:     {}", mime_type);
                }
                if let Some(received) = details.received_at {
                    println!("Received: {}", received.format("%Y-%m-%d %H:%M:%S UTC"));
                }
                if !details.headers.is_empty() {
                    println!("Headers:");
                    for (name, value) in &details.headers {
                        println!("  {}: {}", name, value);
                    }
                }
            }
            None => {
                println!("No entry for {} (hash {})", key, inspect::hash(key));
            }
        },

        Commands::Import { ref key, ref file, max_age } => {
            let written = inspect::import(&cache, key, file, max_age, chrono::Utc::now())?;
            println!("Stored {} as {}", format_bytes(written), key);
        }

        Commands::Remove { ref key } => {
            if cache.remove(key)? {
                println!("Removed {}", key);
            } else {
                println!("No entry for {}", key);
            }
        }

        Commands::Trim { to } => {
            let before = cache.size();
            cache.trim_to(to)?;
            println!(
                "Trimmed {} -> {}",
                format_bytes(before),
                format_bytes(cache.size())
            );
        }

        Commands::Clear => {
            let entries = cache.len();
            cache.clear()?;
            println!("Removed {} entries", entries);
        }
    }

    cache.flush()?;
    Ok(())
}
