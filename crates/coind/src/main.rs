//! COIN controller daemon entry point.

use anyhow::Context;
use clap::Parser;
use coin_common::{MemoryStore, RedisStore, StateStore};
use coin_coind::config::{CoindConfig, OperatingMode, StoreBackend, DEFAULT_CONFIG_PATH};
use coin_coind::control::ControlServer;
use coin_coind::fabric::{FabricManager, OvsFabric};
use coin_coind::intf::ShellInterfaceManager;
use coin_coind::ofserver::{self, OpenFlowServer};
use coin_coind::scheduler::TokioScheduler;
use coin_coind::{event, CoinEvent, CoinServer, Services};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// COIN: Client OpenFlow Interface for Networking
#[derive(Parser, Debug)]
#[command(name = "coind")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Control socket path
    #[arg(short = 's', long = "sock")]
    sock: Option<PathBuf>,

    /// Remove a leftover control socket before binding
    #[arg(short = 'f', long)]
    force_bind: bool,

    /// Operating mode (bonding or nat)
    #[arg(short = 'm', long)]
    mode: Option<OperatingMode>,

    /// Debug output
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Trace output
    #[arg(long)]
    very_verbose: bool,
}

fn init_logging(args: &Args) {
    let default_level = if args.very_verbose {
        "trace"
    } else if args.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .init();
}

fn load_config(args: &Args) -> anyhow::Result<CoindConfig> {
    let mut config = CoindConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(sock) = &args.sock {
        config.control.socket_path = sock.clone();
    }
    if args.force_bind {
        config.control.force_bind = true;
    }
    if let Some(mode) = args.mode {
        config.mode.name = mode;
    }
    config.validate()?;
    Ok(config)
}

async fn open_store(config: &CoindConfig) -> anyhow::Result<Arc<dyn StateStore>> {
    Ok(match config.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Redis => Arc::new(
            RedisStore::connect(&config.store.redis_url)
                .await
                .with_context(|| format!("connecting to {}", config.store.redis_url))?,
        ),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let config = load_config(&args)?;
    info!(mode = %config.mode.name, "Starting coind");

    let (events, rx) = event::channel();
    let store = open_store(&config).await?;
    let services = Services::new(
        FabricManager::new(Arc::new(OvsFabric::new())),
        Arc::new(ShellInterfaceManager::new()),
        store,
        Arc::new(TokioScheduler::new(events.clone())),
    );

    let mut server = CoinServer::new(config.clone(), services)?;
    if let Err(e) = server.start().await {
        error!(error = %e, "Startup failed");
        server.shutdown().await;
        return Err(e.into());
    }

    let openflow = OpenFlowServer::bind(config.openflow.listen, events.clone()).await?;
    let control = ControlServer::bind(
        &config.control.socket_path,
        config.control.force_bind,
        events.clone(),
    )?;
    tokio::spawn(openflow.run());
    tokio::spawn(control.run());
    ofserver::spawn_echo_ticker(config.echo_interval(), events.clone());

    let shutdown = events.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt");
        }
        let _ = shutdown.send(CoinEvent::Shutdown);
    });

    server.run(rx).await;
    info!("coind exiting");
    Ok(())
}
