//! Fleet Coordinator - the binary.
//!
//! Usage:
//!   fleet-coordinator [OPTIONS]
//!
//! Options:
//!   -c, --config <PATH>   Path to the TOML configuration file
//!   -p, --port <PORT>     Uplink port (downlink and liveness use the next two)
//!   -b, --bind <ADDR>     Address to bind the listeners on
//!   --no-discovery        Do not broadcast the coordinator address over UDP
//!   --no-console          Do not read operator commands from stdin

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fleet_connector::{Coordinator, CoordinatorConfig};

#[derive(Parser, Debug)]
#[command(name = "fleet-coordinator")]
#[command(about = "Coordinates a fleet of mobile robots over TCP")]
#[command(version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long, value_name = "ADDR")]
    bind: Option<String>,

    #[arg(long)]
    no_discovery: bool,

    #[arg(long)]
    no_console: bool,
}

impl Cli {
    fn into_config(self) -> Result<CoordinatorConfig, anyhow::Error> {
        let mut config = match &self.config {
            Some(path) => CoordinatorConfig::load(path)?,
            None => CoordinatorConfig::default(),
        };

        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(bind) = self.bind {
            config.network.bind_addr = bind;
        }
        if self.no_discovery {
            config.network.discovery = false;
        }
        if self.no_console {
            config.operator.enabled = false;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

fn main() -> Result<(), anyhow::Error> {
    let config = Cli::parse().into_config()?;
    init_tracing(&config.logging.level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let coordinator = Coordinator::new(config)?;
    let result = runtime.block_on(coordinator.run());

    // The console's stdin reader may still be parked on a blocking read.
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}
