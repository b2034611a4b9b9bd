use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use tollgate::config::Config;
use tollgate::server::{build_state, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Token bucket admission control in front of an HTTP API
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Args {
    /// Overrides BIND_ADDR
    #[arg(long)]
    bind_addr: Option<SocketAddr>,

    /// Overrides REDIS_URL; pass an empty string for the in-memory store
    #[arg(long)]
    redis_url: Option<String>,

    /// Overrides RATE_LIMIT_POLICY
    #[arg(long)]
    policy: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();
    let args = Args::parse();

    let mut config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    if let Some(bind_addr) = args.bind_addr {
        config.bind_addr = bind_addr;
    }
    if let Some(redis_url) = args.redis_url {
        config.redis_url = redis_url;
    }
    if let Some(policy) = args.policy {
        config.policy = policy;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tollgate={},tower_http=debug", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if args.check_config {
        build_state(&config).map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
        println!("configuration OK");
        return Ok(());
    }

    tracing::info!("Starting tollgate");
    tracing::info!(
        "Configuration: bind_addr={}, store={}, policy={}, capacity={}, refill_rate={}, refill_interval_ms={}",
        config.bind_addr,
        if config.uses_redis() { "redis" } else { "memory" },
        config.policy,
        config.capacity,
        config.refill_rate,
        config.refill_interval_ms
    );

    let server = Server::new(&config)
        .map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
