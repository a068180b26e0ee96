//! Signaling server binary entry point
//!
//! Starts the Peerlink WebSocket signaling server: client/admin registration,
//! presence bookkeeping, and offer/answer relay.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (0.0.0.0:8080)
//! cargo run -p peerlink-signal-server
//!
//! # Bind elsewhere
//! cargo run -p peerlink-signal-server -- --bind-address 127.0.0.1:9090
//!
//! # Environment variables work too
//! PEERLINK_BIND_ADDRESS=0.0.0.0:8080 cargo run -p peerlink-signal-server
//! ```
//!
//! Logging is controlled through `RUST_LOG` (default: `info`).

use clap::Parser;
use peerlink_core::signaling::{SharedState, WebSocketSignalingServer};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Peerlink signaling server
///
/// Relays WebRTC session offers/answers between member clients and their
/// organization's admin endpoint, and tracks which clients are reachable.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the WebSocket listener to
    #[arg(long, default_value = "0.0.0.0:8080", env = "PEERLINK_BIND_ADDRESS")]
    bind_address: SocketAddr,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();

    // Set up Ctrl+C handler at the very start
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        eprintln!("\nCtrl+C received, initiating shutdown...");

        let was_already_set = shutdown_flag_handler.swap(true, Ordering::SeqCst);
        if was_already_set {
            eprintln!("Shutdown already in progress, forcing immediate exit");
            std::process::exit(0);
        }

        // Give it a moment for graceful shutdown
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_secs(3));
            eprintln!("Graceful shutdown timeout (3s), forcing exit");
            std::process::exit(0);
        });
    })
    .expect("Failed to set Ctrl+C handler");

    // Create multi-threaded tokio runtime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("signal-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(
    args: Args,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %args.bind_address,
        "Peerlink signaling server starting"
    );

    let state = Arc::new(SharedState::new());
    let server = WebSocketSignalingServer::new(args.bind_address, Arc::clone(&state));
    let handle = server.start().await?;

    info!(
        local_addr = %handle.local_addr(),
        "Server running. Press Ctrl+C to shutdown."
    );

    while !shutdown_flag.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }

    info!("Shutdown signal received, cleaning up...");

    let clients = state.registry.len().await;
    let admins = state.directory.len().await;
    info!(clients, admins, "Final registry state");

    handle.shutdown().await;
    info!("Signaling server shut down gracefully");

    Ok(())
}

fn init_tracing() {
    // Initialize tracing with EnvFilter for RUST_LOG support
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
