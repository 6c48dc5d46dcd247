use std::path::PathBuf;

use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use joyworks_link::ble::SimulatedRobot;
use joyworks_link::config::RuntimeConfig;

/// Bridge a Joyworks J1 robot's BLE link onto the Zenoh bus
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// JSON file overriding the built-in runtime settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Drive an in-process simulated robot instead of real BLE
    #[arg(long)]
    simulate: bool,

    /// Only connect to a device advertising this name
    #[arg(long)]
    device_name: Option<String>,
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = start(Args::parse()).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

async fn start(args: Args) -> Result<(), BoxError> {
    let mut config = match &args.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };
    if args.device_name.is_some() {
        config.device_name = args.device_name.clone();
    }

    let (tx, rx) = mpsc::unbounded_channel();

    if args.simulate {
        tracing::info!("Using simulated J1 robot");
        return joyworks_link::runtime::run(config, SimulatedRobot::new(tx), rx).await;
    }

    run_ble(config, tx, rx).await
}

#[cfg(feature = "ble")]
async fn run_ble(
    config: RuntimeConfig,
    tx: mpsc::UnboundedSender<joyworks_link::link::LinkEvent>,
    rx: mpsc::UnboundedReceiver<joyworks_link::link::LinkEvent>,
) -> Result<(), BoxError> {
    let transport = joyworks_link::ble::BtleplugTransport::open(tx).await?;
    joyworks_link::runtime::run(config, transport, rx).await
}

#[cfg(not(feature = "ble"))]
async fn run_ble(
    _config: RuntimeConfig,
    _tx: mpsc::UnboundedSender<joyworks_link::link::LinkEvent>,
    _rx: mpsc::UnboundedReceiver<joyworks_link::link::LinkEvent>,
) -> Result<(), BoxError> {
    Err("built without the `ble` feature; rebuild with --features ble or pass --simulate".into())
}
