//! wisun-meterd: keeps a B-route session to a smart meter alive

mod config;
mod daemon;
mod sink;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use wisun_core::demo::{DemoMeter, DemoOptions};
use wisun_core::echonet::PropertySink;
use wisun_core::protocol::{
    create_driver, create_driver_on_line, list_ports, ConnectionState, LinkController, MemoryLine,
};

use crate::config::DaemonConfig;
use crate::daemon::Daemon;
use crate::sink::LoggingSink;

/// Foreground loop period
const TICK: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(
    name = "wisun-meterd",
    version,
    about = "Wi-SUN B-route link to a low-voltage smart meter"
)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, value_name = "FILE", default_value = "/etc/wisun-meterd.json")]
    config: PathBuf,

    /// Serial device, overriding the configuration
    #[arg(short, long, value_name = "PATH")]
    device: Option<String>,

    /// Run against a simulated module and meter
    #[arg(long)]
    demo: bool,

    /// List candidate serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Log filter, e.g. "info" or "wisun_core=debug"; overrides RUST_LOG
    #[arg(long, value_name = "FILTER")]
    log_level: Option<String>,
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_target(true)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    if cli.list_ports {
        for port in list_ports() {
            match (port.vid, port.pid) {
                (Some(vid), Some(pid)) => println!(
                    "{}\t{:04X}:{:04X}\t{}",
                    port.name,
                    vid,
                    pid,
                    port.product.as_deref().unwrap_or("")
                ),
                _ => println!("{}", port.name),
            }
        }
        return Ok(());
    }

    let mut config = if cli.demo && !cli.config.exists() {
        DaemonConfig::demo()
    } else {
        DaemonConfig::load(&cli.config)?
    };
    if let Some(device) = cli.device {
        config.link.device = device;
    }

    info!(version = wisun_core::VERSION, "wisun-meterd starting");
    let sink = Arc::new(LoggingSink::new());
    let sink_handle: Arc<dyn PropertySink> = sink.clone();

    let mut demo = None;
    let driver = if cli.demo {
        let (host, device) = MemoryLine::pair();
        demo = Some(
            DemoMeter::spawn(device, DemoOptions::default())
                .context("failed to start demo meter")?,
        );
        create_driver_on_line(&config.link, Box::new(host), Some(sink_handle))
    } else {
        create_driver(&config.link, Some(sink_handle))
    };

    let controller = LinkController::new(driver);
    if controller.state() == ConnectionState::DeviceError {
        bail!("no usable Wi-SUN module on {}", config.link.device);
    }

    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .context("failed to install signal handler")?;

    let mut daemon = Daemon::new(controller, &config)?;
    daemon.run(&shutdown_rx, TICK);
    daemon.shutdown();
    drop(demo);

    info!(
        properties = sink.store().len(),
        frames = sink.store().frames_received(),
        "wisun-meterd stopped"
    );
    Ok(())
}
