//! Faucet service binary

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use token_faucet::logging::init_logging;
use token_faucet::redact::Redacted;
use token_faucet::{
    build_router, store, EvmChain, FaucetConfig, FaucetService, Metrics, Notifier,
    TelegramNotifier,
};
use tokio::signal;
use tracing::{info, warn};

/// Faucet service CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long, env = "FAUCET_CONFIG")]
    config: Option<PathBuf>,

    /// Server address
    #[arg(long)]
    server_addr: Option<String>,

    /// RPC URL
    #[arg(long)]
    rpc_url: Option<String>,

    /// Store URL (redis://... or memory://)
    #[arg(long)]
    store_url: Option<String>,

    /// Tokens per claim
    #[arg(long)]
    claim_amount: Option<String>,

    /// Cooldown window (seconds)
    #[arg(long)]
    cooldown_secs: Option<u64>,

    /// Expose /debug routes
    #[arg(long)]
    debug_endpoints: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = FaucetConfig::load(args.config.as_deref())?;

    // Override with CLI arguments
    if let Some(addr) = args.server_addr {
        config.server_addr = addr;
    }
    if let Some(rpc_url) = args.rpc_url {
        config.rpc_url = rpc_url;
    }
    if let Some(url) = args.store_url {
        config.store_url = Redacted(url);
    }
    if let Some(amount) = args.claim_amount {
        config.claim_amount = amount;
    }
    if let Some(secs) = args.cooldown_secs {
        config.cooldown_secs = secs;
    }
    if args.debug_endpoints {
        config.debug_endpoints = true;
    }
    if args.debug {
        config.logging.level = "debug".to_string();
    }

    init_logging(&config.logging)?;
    config.validate()?;

    info!("Starting token faucet v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Server address: {}", config.server_addr);
    info!("  RPC URL: {} (chain {})", config.rpc_url, config.chain_id);
    info!("  Token: {} at {}", config.token_symbol, config.token_address);
    info!("  Claim amount: {} {}", config.claim_amount, config.token_symbol);
    info!("  Cooldown: {}s", config.cooldown_secs);

    // Store
    let kv = store::connect(config.store_url.expose())
        .await
        .context("failed to open key-value store")?;
    kv.ping().await.context("key-value store is not reachable")?;
    info!("Key-value store ready ({})", kv.backend());

    // Chain
    let chain = EvmChain::connect(
        &config.rpc_url,
        config.chain_id,
        &config.token_address,
        &config.private_key,
    )
    .await
    .context("failed to initialize chain client")?;

    // Notifications
    let notifier: Option<Arc<dyn Notifier>> = match config.telegram_credentials() {
        Some((token, chat_id)) => {
            info!("Telegram notifications enabled");
            Some(Arc::new(TelegramNotifier::new(
                &config.telegram_api_base,
                token,
                chat_id,
            )))
        }
        None => {
            warn!("Telegram notifications disabled: bot token or chat id missing");
            None
        }
    };

    let addr: SocketAddr = config.server_addr.parse()?;
    let service = Arc::new(FaucetService::new(
        config,
        kv,
        Arc::new(chain),
        notifier,
        Metrics::new(),
    )?);

    let app = build_router(service);

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Shutting down gracefully");
    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
