use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use reelcache::config::Config;
use reelcache::download::HttpTransport;
use reelcache::pool::NullDecoderFactory;
use reelcache::retry::RetryPolicy;
use reelcache::CacheManager;

/// Reelcache - disk-backed video cache for vertical video feeds
#[derive(Parser, Debug)]
#[command(name = "reelcache")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print cache statistics as JSON
    Stats,
    /// Download a URL into the cache and print its local path
    Fetch {
        url: String,
        /// Extra attempts after a transient failure
        #[arg(long, default_value_t = 0)]
        retries: u32,
    },
    /// Download several URLs concurrently and report each result
    Preload {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Remove a URL from the cache
    Invalidate { url: String },
    /// Remove expired entries
    Purge,
    /// Validate the configuration file and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;

    reelcache::logging::init_subscriber(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging subsystem: {}", e))?;

    tracing::info!(
        config_file = %args.config.display(),
        cache_dir = %config.cache.cache_dir,
        max_cache_bytes = config.cache.max_cache_bytes,
        caching_enabled = config.cache.enabled,
        "Configuration loaded successfully"
    );

    if let Command::CheckConfig = args.command {
        config.validate().map_err(anyhow::Error::msg)?;
        println!("Configuration OK: {}", args.config.display());
        return Ok(());
    }

    let transport = Arc::new(HttpTransport::new(&config.download)?);
    let manager = CacheManager::init(config, transport, Arc::new(NullDecoderFactory)).await?;

    let result = run(&manager, args.command).await;
    manager.shutdown().await?;
    result
}

async fn run(manager: &CacheManager, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Stats => {
            let stats = manager.stats();
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Fetch { url, retries } => {
            let policy = RetryPolicy::with_retries(retries);
            let target = url.as_str();
            let path = policy
                .run(move || manager.fetch(target))
                .await
                .with_context(|| format!("Failed to fetch {}", url))?;
            println!("{}", path.display());
        }
        Command::Preload { urls } => {
            let outcomes =
                futures::future::join_all(urls.iter().map(|url| manager.fetch(url))).await;
            let mut failed = 0;
            for (url, outcome) in urls.iter().zip(outcomes) {
                match outcome {
                    Ok(path) => println!("ok     {} -> {}", url, path.display()),
                    Err(e) => {
                        failed += 1;
                        println!("failed {}: {}", url, e);
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{} of {} preloads failed", failed, urls.len());
            }
        }
        Command::Invalidate { url } => {
            let removed = manager.invalidate(&url).await?;
            println!("{}", if removed { "invalidated" } else { "not cached" });
        }
        Command::Purge => {
            let report = manager.purge_expired().await?;
            println!(
                "purged {} entries, freed {} bytes",
                report.removed, report.freed_bytes
            );
        }
        Command::CheckConfig => {}
    }
    Ok(())
}
