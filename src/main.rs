use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;

use atom_combiner::aggregator::Aggregator;
use atom_combiner::config::Config;
use atom_combiner::feed::HttpFetcher;
use atom_combiner::server::{self, AppState};
use atom_combiner::storage::{DiskStore, FetchCache};

#[derive(Parser, Debug)]
#[command(name = "atom-combiner", about = "Combine several Atom feeds into one")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, value_name = "FILE", default_value = "atom-combiner.toml")]
    config: PathBuf,

    /// Port to listen on (overrides PORT and the config file)
    #[arg(long)]
    port: Option<u16>,

    /// Directory for cached feed bodies (overrides the config file)
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,
}

/// SEC-007: Restrict the cache directory to the service user on Unix.
fn restrict_permissions(dir: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(dir, perms) {
                    tracing::warn!(
                        path = %dir.display(),
                        error = %e,
                        "Failed to set cache directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %dir.display(),
                    error = %e,
                    "Failed to read cache directory metadata"
                );
            }
        }
    }
    #[cfg(not(unix))]
    let _ = dir;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Precedence: CLI flags, then PORT, then the config file
    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    config.apply_env();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(cache_dir) = args.cache_dir {
        config.cache_dir = cache_dir;
    }

    let store = DiskStore::open(&config.cache_dir).await.with_context(|| {
        format!(
            "Failed to open cache directory '{}': check directory permissions",
            config.cache_dir.display()
        )
    })?;
    restrict_permissions(store.dir());

    match store.purge_expired(Utc::now()).await {
        Ok(0) => {}
        Ok(removed) => tracing::info!(removed, "Purged expired cache records"),
        Err(e) => tracing::warn!(error = %e, "Failed to purge expired cache records"),
    }

    let fetcher =
        HttpFetcher::new(&config.fetch_settings()).context("Failed to build HTTP client")?;
    let cache = Arc::new(FetchCache::new(store, fetcher, config.cache_ttl_secs));
    let aggregator = Arc::new(Aggregator::new(cache, config.favicon_template.clone()));

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    let local_addr = listener.local_addr().context("Failed to read bound address")?;

    tracing::info!(
        address = %local_addr,
        cache_dir = %config.cache_dir.display(),
        ttl_secs = config.cache_ttl_secs,
        "Atom combiner listening"
    );

    let state = AppState {
        aggregator,
        fallback_host: local_addr.to_string(),
    };
    server::serve(listener, state)
        .await
        .context("HTTP server failed")?;

    Ok(())
}
