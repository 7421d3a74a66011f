//! serial-linkd: serial connection manager daemon
//!
//! Opens serial links on behalf of control clients and relays their data,
//! disconnect and adapter state events back over the control socket.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use serial_link::control::{self, EventHub};
use serial_link::transport::{Adapter, SerialAdapter, SerialConfig, TcpAdapter, TcpAdapterConfig};
use serial_link::{ConnectionRegistry, LinkConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AdapterKind {
    /// Simulated radio over TCP
    Tcp,
    /// Local serial device paths
    Serial,
    /// Bluetooth RFCOMM through BlueZ
    Rfcomm,
}

#[derive(Parser, Debug)]
#[command(name = "serial-linkd")]
#[command(about = "Serial connection manager daemon", long_about = None)]
struct Args {
    /// Control socket address
    #[arg(long, default_value = "127.0.0.1:7700")]
    listen: SocketAddr,

    /// Transport used to reach remote devices
    #[arg(long, value_enum, default_value_t = AdapterKind::Tcp)]
    adapter: AdapterKind,

    /// Simulated peer for the tcp adapter, as ADDRESS=HOST:PORT (repeatable)
    #[arg(long = "peer", value_parser = parse_peer)]
    peers: Vec<(String, SocketAddr)>,

    /// Baud rate for the serial adapter
    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    /// RFCOMM channel for the rfcomm adapter
    #[arg(long, default_value_t = 1)]
    channel: u8,

    /// Connect handshake timeout in milliseconds, 0 disables it
    #[arg(long, default_value_t = 10_000)]
    connect_timeout_ms: u64,

    /// How long a disconnect waits for the transport to close, in milliseconds
    #[arg(long, default_value_t = 2_000)]
    close_timeout_ms: u64,
}

fn parse_peer(value: &str) -> Result<(String, SocketAddr)> {
    let (address, socket) = value
        .split_once('=')
        .ok_or_else(|| anyhow!("expected ADDRESS=HOST:PORT, got {:?}", value))?;
    let socket = socket
        .parse()
        .with_context(|| format!("invalid socket address {:?}", socket))?;
    Ok((address.to_string(), socket))
}

async fn build_adapter(args: &Args) -> Result<Arc<dyn Adapter>> {
    let adapter: Arc<dyn Adapter> = match args.adapter {
        AdapterKind::Tcp => {
            let config = args
                .peers
                .iter()
                .fold(TcpAdapterConfig::default(), |config, (address, socket)| {
                    config.with_peer(address.as_str(), *socket)
                });
            for (address, socket) in &args.peers {
                info!("  Peer {} -> {}", address, socket);
            }
            Arc::new(TcpAdapter::new(config))
        }
        AdapterKind::Serial => Arc::new(SerialAdapter::new(SerialConfig {
            baud_rate: args.baud,
            ..Default::default()
        })),
        AdapterKind::Rfcomm => rfcomm_adapter(args.channel).await?,
    };
    Ok(adapter)
}

#[cfg(feature = "bluetooth")]
async fn rfcomm_adapter(channel: u8) -> Result<Arc<dyn Adapter>> {
    use serial_link::transport::{RfcommAdapter, RfcommConfig};

    let adapter = RfcommAdapter::open(RfcommConfig {
        channel,
        ..Default::default()
    })
    .await?;
    Ok(Arc::new(adapter))
}

#[cfg(not(feature = "bluetooth"))]
async fn rfcomm_adapter(_channel: u8) -> Result<Arc<dyn Adapter>> {
    Err(anyhow!("rfcomm adapter requires building with --features bluetooth"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    let link_config = LinkConfig {
        connect_timeout: match args.connect_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        },
        close_timeout: Duration::from_millis(args.close_timeout_ms),
        ..Default::default()
    };

    info!("serial-linkd starting");
    info!("  Adapter: {:?}", args.adapter);
    let adapter = build_adapter(&args).await?;

    let hub = Arc::new(EventHub::new());
    let registry = Arc::new(ConnectionRegistry::with_config(adapter, link_config, hub.clone()));
    let _adapter_watch = registry.watch_adapter();
    let _state_relay = hub.forward_adapter_states(&registry);

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("binding control socket {}", args.listen))?;

    tokio::select! {
        result = control::serve(listener, registry.clone(), hub) => {
            if let Err(e) = &result {
                error!("Control server stopped: {}", e);
            }
            registry.shutdown().await;
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            registry.shutdown().await;
            Ok(())
        }
    }
}
