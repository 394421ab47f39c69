//! termshared binary entry point.
//!
//! Serves the control-plane API and the binary terminal streams.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use termshare::pty::registry::{self, SessionRegistry, DEFAULT_SCROLLBACK_CAPACITY};
use termshare::ws::UserStreams;

/// Shared browser terminal server.
#[derive(Parser, Debug)]
#[command(name = "termshared")]
#[command(about = "Shared terminal sessions over a binary WebSocket protocol")]
struct Args {
    /// Address to bind
    #[arg(long, env = "TERMSHARE_BIND", default_value = "127.0.0.1")]
    bind: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "TERMSHARE_PORT", default_value = "8022")]
    port: u16,

    /// Secret for bearer-token verification
    #[arg(long, env = "TERMSHARE_JWT_SECRET")]
    jwt_secret: String,

    /// Scrollback capacity per session, in bytes
    #[arg(long, env = "TERMSHARE_SCROLLBACK", default_value_t = DEFAULT_SCROLLBACK_CAPACITY)]
    scrollback: usize,

    /// Seconds without input before a session is reaped
    #[arg(long, env = "TERMSHARE_IDLE_TIMEOUT", default_value_t = 1800)]
    idle_timeout_secs: u64,

    /// Seconds between idle-reaper runs
    #[arg(long, env = "TERMSHARE_REAP_INTERVAL", default_value_t = 300)]
    reap_interval_secs: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "termshare=debug,tower_http=debug"
    } else {
        "termshare=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let registry = Arc::new(SessionRegistry::new(args.scrollback));
    let streams = UserStreams::default();
    let app = termshare::api::build_router(registry.clone(), streams, args.jwt_secret.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(registry::run_reaper(
        registry.clone(),
        Duration::from_secs(args.reap_interval_secs),
        Duration::from_secs(args.idle_timeout_secs),
        shutdown_rx,
    ));

    let addr = SocketAddr::from((args.bind, args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}
