use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use zonemux::config::{Network, ServerConfig};
use zonemux::handlers::VERSION;
use zonemux::mux::ServeMux;
use zonemux::server::Server;

#[derive(Parser, Debug)]
#[command(author, version, about = "Zone multiplexing DNS server", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short, long)]
    addr: Option<String>,

    /// Transports to serve [default: the configured network, else udp,tcp]
    #[arg(short, long, value_delimiter = ',')]
    net: Option<Vec<Network>>,

    /// TOML configuration file (environment variables are used otherwise)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Text returned for version.bind. CH TXT queries
    #[arg(long)]
    version_text: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::from_env()?,
    };
    if let Some(addr) = args.addr {
        config.addr = addr;
    }

    let version = args
        .version_text
        .unwrap_or_else(|| format!("zonemux {}", VERSION));
    let mux = Arc::new(ServeMux::with_builtin(version, ["zonemux contributors"]));

    let networks = args.net.unwrap_or_else(|| config.networks());

    let mut servers = Vec::new();
    let mut tasks = JoinSet::new();
    for network in networks {
        let server = Arc::new(Server::new(
            ServerConfig {
                network: Some(network),
                ..config.clone()
            },
            mux.clone(),
        ));
        servers.push(server.clone());
        tasks.spawn(async move { (network, server.listen_and_serve().await) });
    }

    info!("Serving {} on {}", mux.patterns().join(", "), config.listen_addr());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down");
        }
        Some(joined) = tasks.join_next() => {
            if let Ok((network, Err(e))) = joined {
                error!("{} server failed: {}", network, e);
            }
        }
    }

    for server in &servers {
        server.shutdown();
    }
    while tasks.join_next().await.is_some() {}

    Ok(())
}
