//! Room Relay Server - Entry Point
//!
//! Parses configuration, starts the TCP listener and serves connections.

use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use room_relay::config::{DEFAULT_HUB_CAPACITY, DEFAULT_OUTBOUND_CAPACITY};
use room_relay::{serve, RelayConfig};

#[derive(Parser, Debug)]
#[command(name = "room_relay")]
#[command(about = "Room-scoped WebSocket text relay", long_about = None)]
struct Args {
    /// Address to bind the server to
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    addr: String,

    /// Outbound queue capacity per client; a client that falls this far behind is dropped
    #[arg(long, default_value_t = DEFAULT_OUTBOUND_CAPACITY)]
    queue_capacity: usize,

    /// Hub command channel capacity
    #[arg(long, default_value_t = DEFAULT_HUB_CAPACITY)]
    hub_capacity: usize,

    /// Seconds without any frame from a client before it is dropped
    #[arg(long, default_value_t = 60)]
    pong_wait_secs: u64,

    /// Seconds allowed for writing a ping
    #[arg(long, default_value_t = 10)]
    ping_wait_secs: u64,

    /// Seconds allowed for writing a message
    #[arg(long, default_value_t = 30)]
    write_wait_secs: u64,
}

impl Args {
    fn config(&self) -> RelayConfig {
        RelayConfig {
            outbound_capacity: self.queue_capacity,
            hub_capacity: self.hub_capacity,
            ping_wait: Duration::from_secs(self.ping_wait_secs),
            write_wait: Duration::from_secs(self.write_wait_secs),
            ..RelayConfig::with_pong_wait(Duration::from_secs(self.pong_wait_secs))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=room_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("room_relay=info")),
        )
        .init();

    let args = Args::parse();
    let config = args.config();

    let listener = TcpListener::bind(&args.addr).await?;
    info!("Room relay listening on ws://{}/ws", args.addr);
    info!(
        "Queue capacity {}, ping every {:?}",
        config.outbound_capacity, config.ping_period
    );

    serve(listener, config).await;
    Ok(())
}
