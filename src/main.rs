mod cli;
mod crawl;
mod pipeline;
mod seeds;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::warn;

// Use mimalloc to prevent memory bloat (glibc malloc doesn't release memory
// with high concurrency)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use noctipede_core::config::AppConfig;
use noctipede_core::{ProxyHealthBoard, ReadinessSource};
use noctipede_health::{OracleSettings, Prober, ReadinessOracle};

use crate::cli::{Cli, Commands};
use crate::crawl::run_crawl;

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        warn!(path = %cli.config, "config file not found, using defaults");
        include_str!("../config/default.toml").to_string()
    });
    let mut config: AppConfig = toml::from_str(&config_str)?;
    config.apply_env_overrides();
    config.validate()?;

    match cli.command {
        Commands::Crawl { seeds, seed } => {
            run_crawl(config, seeds, seed).await?;
        }
        Commands::Readiness => {
            run_readiness_check(config).await?;
        }
    }

    Ok(())
}

/// One probe fan-out, snapshot printed as JSON. Useful from a shell inside
/// the cluster when the HTTP surface is not up.
async fn run_readiness_check(config: AppConfig) -> Result<()> {
    let prober = Arc::new(Prober::new(
        &config.tor.socks_addr(),
        &config.i2p.http_proxy_addr(),
        &config.i2p.internal_proxies,
    )?);
    let oracle = ReadinessOracle::new(
        prober,
        &config.i2p.internal_proxies,
        Arc::new(ProxyHealthBoard::new()),
        OracleSettings {
            bootstrap_duration: Duration::from_secs(config.readiness.bootstrap_duration_seconds),
            min_active_i2p: config.readiness.min_active_i2p,
            require_i2p_quorum: config.readiness.require_i2p_quorum,
            refresh_deadline: Duration::from_secs(config.readiness.refresh_deadline_seconds),
        },
    );
    oracle.refresh_if_stale().await;
    let snap = oracle.snapshot();
    println!("{}", serde_json::to_string_pretty(&*snap)?);
    Ok(())
}
