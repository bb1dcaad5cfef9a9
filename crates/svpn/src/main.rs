//! svpn: tunnel smoke-test harness
//!
//! Relays stdin/stdout through the tunnel data-plane to a UDP endpoint,
//! logging throughput every second until Ctrl-C or a link failure.
//!
//! ```text
//! svpn [CONFIG] [--server <ID>] [--list-servers]
//! ```

mod stdio;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use svpn_tunnel::{ServerCatalog, TunnelConfig, TunnelController, TunnelState, UdpRelayOpener};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::stdio::StdioProvider;

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const STDIN_GRACE: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(name = "svpn", about = "Relay stdin/stdout through the tunnel data-plane to a UDP endpoint.")]
struct Args {
    /// Tunnel config file (.toml or .json); built-in defaults when omitted
    config: Option<PathBuf>,

    /// Connect to this server from the built-in catalog
    #[arg(long, value_name = "ID")]
    server: Option<String>,

    /// Print the server catalog and exit
    #[arg(long, action = clap::ArgAction::SetTrue)]
    list_servers: bool,
}

fn main() -> Result<()> {
    // Logs go to stderr; stdout carries tunnel traffic
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let args = Args::parse();

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run(args));

    // A pending stdin read would otherwise hold the runtime open
    runtime.shutdown_timeout(STDIN_GRACE);

    info!("svpn shutting down");
    result
}

async fn run(args: Args) -> Result<()> {
    let catalog = ServerCatalog::default_catalog();

    if args.list_servers {
        for server in catalog.enabled_servers() {
            eprintln!("{:>3}  {:<16} {}  {} ms", server.id, server.name, server.endpoint(), server.ping_ms);
        }
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => TunnelConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => TunnelConfig::default(),
    };
    if let Some(id) = &args.server {
        config = catalog.tunnel_config(id, &config)?;
    }

    info!("svpn starting ({} -> {})", config.session_name, config.remote);

    let controller = TunnelController::new(StdioProvider, UdpRelayOpener);
    let mut states = controller.subscribe_state();
    let mut samples = controller.subscribe_sample();

    controller.request_connect(config).await?;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Listening for Ctrl-C failed: {}", e);
                }
                info!("Interrupted, disconnecting");
                controller.request_disconnect().await;
                break;
            }

            changed = states.changed() => {
                if changed.is_err() || *states.borrow_and_update() == TunnelState::Idle {
                    break;
                }
            }

            changed = samples.changed() => {
                if changed.is_ok() {
                    info!("{}", controller.status());
                }
            }
        }
    }

    match controller.last_disconnect() {
        Some(reason) => info!("Tunnel closed: {}", reason),
        None => error!("Tunnel closed without a recorded reason"),
    }

    Ok(())
}
