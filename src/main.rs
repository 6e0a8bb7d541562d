//! Emberlink daemon entry point.
//!
//! One binary, two roles: `--server` binds the configured listeners,
//! `--client` dials the configured targets. Both ends bring up a TUN
//! interface and multiplex packets over every established connection.

use std::net::Ipv4Addr;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

use emberlink::core::config::EXAMPLE_CONFIG;
use emberlink::core::{ClientEndpoints, Config, IpConfig, ServerEndpoints};
use emberlink::crypto::SharedSecret;
use emberlink::device::create_tun;
use emberlink::mux::Multiplexer;
use emberlink::transport::{Endpoint, TransportManager};

/// Encrypted point-to-point IP tunnel over WebSocket or plain TCP.
#[derive(Parser, Debug)]
#[command(name = "emberlink")]
#[command(about = "Encrypted point-to-point IP tunnel over WebSocket or plain TCP")]
#[command(version)]
struct Args {
    /// Run as server with the given configuration file
    #[arg(short, long, value_name = "CONFIG", conflicts_with = "client")]
    server: Option<String>,

    /// Run as client with the given configuration file
    #[arg(short, long, value_name = "CONFIG")]
    client: Option<String>,

    /// Print an example configuration file and exit
    #[arg(long)]
    example: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.example {
        print!("{EXAMPLE_CONFIG}");
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    match (&args.server, &args.client) {
        (Some(path), None) => run(path, Role::Server).await,
        (None, Some(path)) => run(path, Role::Client).await,
        _ => bail!("pass exactly one of --server <CONFIG> or --client <CONFIG>"),
    }
}

#[derive(Clone, Copy)]
enum Role {
    Server,
    Client,
}

async fn run(config_path: &str, role: Role) -> Result<()> {
    let config = Config::load(config_path)?;
    let settings = config.settings();
    let secret = SharedSecret::new(&config.secret);

    let (local, peer) = tunnel_addresses(&config.ip, role)?;
    let netmask: Ipv4Addr = config
        .ip
        .netmask
        .parse()
        .with_context(|| format!("invalid netmask {:?}", config.ip.netmask))?;

    let device = create_tun(local, peer, netmask, config.ip.mtu)?;
    info!(%local, %peer, mtu = config.ip.mtu, "tun device up");

    let mut mux = Multiplexer::new(device);
    match role {
        Role::Server => {
            let endpoints = config
                .server
                .as_ref()
                .context("config has no [server] section")?;
            for endpoint in server_endpoints(endpoints) {
                mux.attach(TransportManager::new(endpoint, secret.clone(), settings));
            }
        }
        Role::Client => {
            let endpoints = config
                .client
                .as_ref()
                .context("config has no [client] section")?;
            for endpoint in client_endpoints(endpoints) {
                mux.attach(TransportManager::new(endpoint, secret.clone(), settings));
            }
        }
    }

    mux.run().await?;
    Ok(())
}

/// Local and remote tunnel addresses for the given role.
fn tunnel_addresses(ip: &IpConfig, role: Role) -> Result<(Ipv4Addr, Ipv4Addr)> {
    let server: Ipv4Addr = ip
        .server
        .parse()
        .with_context(|| format!("invalid server address {:?}", ip.server))?;
    let client: Ipv4Addr = ip
        .client
        .parse()
        .with_context(|| format!("invalid client address {:?}", ip.client))?;
    Ok(match role {
        Role::Server => (server, client),
        Role::Client => (client, server),
    })
}

fn server_endpoints(endpoints: &ServerEndpoints) -> Vec<Endpoint> {
    let mut out = Vec::new();
    if let Some(ws) = &endpoints.ws {
        out.push(Endpoint::WsServer {
            addr: format!("{}:{}", ws.host, ws.port),
        });
    }
    if let Some(tcp) = &endpoints.tcp {
        out.push(Endpoint::TcpServer {
            addr: format!("{}:{}", tcp.host, tcp.port),
        });
    }
    out
}

fn client_endpoints(endpoints: &ClientEndpoints) -> Vec<Endpoint> {
    let mut out = Vec::new();
    for url in &endpoints.ws {
        out.push(Endpoint::WsClient { url: url.clone() });
    }
    for addr in &endpoints.tcp {
        out.push(Endpoint::TcpClient { addr: addr.clone() });
    }
    out
}
