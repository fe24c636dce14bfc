//! Intesis WMP monitor - command line entry point
//!
//! Connects to one gateway and either streams state changes, prints the
//! device identity, or performs a single write.

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use intesis_wmp::client::TransportRegistry;
use intesis_wmp::logging::{init_logging, LogConfig};
use intesis_wmp::services::StateChangeEvent;
use intesis_wmp::{DriverConfig, IntesisDevice};
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn, Level};

/// Intesis WMP monitor
#[derive(Parser, Debug)]
#[command(name = "intesis-wmp-monitor")]
#[command(about = "Monitor and control HVAC units behind an Intesis WMP gateway")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Gateway host name or IP address
    #[arg(long, global = true, env = "WMP_HOST")]
    host: Option<String>,

    /// Gateway control port
    #[arg(long, global = true, env = "WMP_PORT")]
    port: Option<u16>,

    /// Configuration file (TOML, JSON or YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Print output and logs as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the gateway and print every state change until Ctrl+C
    Watch,
    /// Print the gateway identity
    Info,
    /// Write one attribute, e.g. `set setpoint 21.5` or `set mode cool`
    Set {
        /// Attribute name (active, mode, fanSpeed, swingMode, setpoint, ...)
        attribute: String,
        /// New value
        value: String,
    },
}

impl Cli {
    fn initialize_logging(&self) -> anyhow::Result<()> {
        let mut config = LogConfig::from_env();
        if self.debug {
            config = config.with_level(Level::DEBUG);
        }
        config.json |= self.json;
        init_logging(config).map_err(|e| anyhow!("failed to initialize logging: {e}"))
    }

    fn driver_config(&self) -> anyhow::Result<DriverConfig> {
        let mut config =
            DriverConfig::load(self.config.as_deref()).context("failed to load configuration")?;
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.initialize_logging()?;
    let config = cli.driver_config()?;

    info!("Using gateway at {}", config.address());
    let registry = TransportRegistry::new();
    let transport = registry.get_or_start(&config);
    let device = IntesisDevice::new(transport.clone(), config.clone());

    let outcome = match &cli.command {
        Command::Watch => watch(&device, cli.json).await,
        Command::Info => {
            transport.wait_connected(config.connect_timeout).await?;
            let identity = device.get_info().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&identity)?);
            } else {
                println!("model:      {}", identity.model);
                println!("name:       {}", identity.name);
                println!("serial:     {}", identity.serial_number);
                println!("mac:        {}", identity.mac_address);
                println!("ip:         {}", identity.ip_address);
                println!("firmware:   {}", identity.firmware_version);
                println!("protocol:   {}", identity.protocol_version);
                println!("signal:     {}", identity.signal_strength);
            }
            Ok(())
        }
        Command::Set { attribute, value } => {
            transport.wait_connected(config.connect_timeout).await?;
            let result = device.set_from_str(attribute, value).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            if !result.success {
                bail!(
                    "{} was not acknowledged: {}",
                    result.command,
                    result.error.unwrap_or_default()
                );
            }
            info!("{} acknowledged in {:?}", result.command, result.duration);
            Ok(())
        }
    };

    device.stop_synchronization();
    registry.shutdown_all().await;
    outcome
}

async fn watch(device: &IntesisDevice, json: bool) -> anyhow::Result<()> {
    let mut changes = device.subscribe();
    device.start_synchronization();
    info!("Watching for state changes. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl+C")?;
                info!("Shutting down...");
                return Ok(());
            }
            event = changes.recv() => match event {
                Ok(event) => print_change(&event, json)?,
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} state events", skipped),
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

fn print_change(event: &StateChangeEvent, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    match event {
        StateChangeEvent::Changed {
            attribute,
            old: Some(old),
            new,
        } => println!("{attribute}: {old} -> {new}"),
        StateChangeEvent::Changed {
            attribute,
            old: None,
            new,
        } => println!("{attribute}: {new}"),
        StateChangeEvent::Updated => {}
    }
    Ok(())
}
