//! Vigil unified launcher.
//!
//! One binary for every role on the network: the hub (bus broker,
//! discovery round, event ingestion), a sensor node, and the operator
//! commands that publish mode changes and read the registry.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use vigil_bus::{Broker, BrokerConfig, BusClient};
use vigil_hub::{assemble_ingest, Hub, HubArgs, HubConfig};
use vigil_logging::{data_dir, init_logging, LogConfig};
use vigil_protocol::defaults::{COMMAND_CHANNEL, DEFAULT_BUS_BIND_ADDR, SENSORS_KEY};
use vigil_protocol::{CommandMessage, Mode};
use vigil_sensor::{Sensor, SensorArgs, SensorConfig};

#[derive(Parser, Debug)]
#[command(name = "vigil", about = "Hub and sensor nodes for the Vigil network", version)]
struct Cli {
    /// Verbose console logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the hub: bus broker, sensor discovery, event ingestion
    Hub {
        #[command(flatten)]
        args: HubArgs,
    },

    /// Run a sensor node
    Sensor {
        #[command(flatten)]
        args: SensorArgs,
    },

    /// Publish a mode command to the shared command channel
    Send {
        /// Sensor id, or "all"
        target: String,

        /// STANDBY, SENSING or STREAMING
        directive: Mode,

        /// Bus address to publish through
        #[arg(long, default_value = DEFAULT_BUS_BIND_ADDR)]
        bus: String,
    },

    /// Show discovered sensors and their current modes
    Status {
        /// Bus address to query
        #[arg(long, default_value = DEFAULT_BUS_BIND_ADDR)]
        bus: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(LogConfig {
        app_name: "vigil",
        verbose: cli.verbose,
    }) {
        eprintln!("Warning: failed to initialize logging: {}", e);
    }

    match run_command(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{:?}", err);
            ExitCode::from(1)
        }
    }
}

fn run_command(command: Commands) -> Result<()> {
    match command {
        Commands::Hub { args } => run_hub(args),
        Commands::Sensor { args } => run_sensor(args),
        Commands::Send {
            target,
            directive,
            bus,
        } => run_send(&target, directive, &bus),
        Commands::Status { bus } => run_status(&bus),
    }
}

/// Raise a flag on SIGINT/SIGTERM; both long-running loops poll it.
fn install_shutdown_flag() -> Result<Arc<AtomicBool>> {
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = shutdown_flag.clone();

    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        std::thread::spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!("Received signal {}, initiating shutdown...", sig);
                shutdown_flag_handler.store(true, Ordering::SeqCst);
            }
        });
    }

    #[cfg(windows)]
    {
        let flag = shutdown_flag_handler.clone();
        ctrlc::set_handler(move || {
            info!("Received Ctrl+C, initiating shutdown...");
            flag.store(true, Ordering::SeqCst);
        })?;
    }

    Ok(shutdown_flag)
}

/// Dead-broker bind addresses are dialable once the wildcard host is
/// swapped for loopback.
fn client_addr(bus: &str) -> String {
    bus.replace("0.0.0.0", "127.0.0.1")
}

fn run_hub(args: HubArgs) -> Result<()> {
    let config = HubConfig::from_args(&args)?;
    let shutdown = install_shutdown_flag()?;
    let store_path = args
        .store
        .clone()
        .unwrap_or_else(|| data_dir().join("events.jsonl"));

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    rt.block_on(async {
        // The broker comes up before discovery so sensors that answer the
        // first broadcast can connect immediately.
        let (broker, broker_shutdown) = Broker::bind(BrokerConfig {
            bind_addr: config.bus_bind_addr.clone(),
        })
        .await
        .with_context(|| format!("Failed to bind bus broker on {}", config.bus_bind_addr))?;
        let broker_task = tokio::spawn(async move {
            if let Err(e) = broker.run().await {
                error!("Broker terminated: {}", e);
            }
        });

        let ingest = assemble_ingest(&args, store_path).await?;
        let outcome = match Hub::start(&config, ingest, shutdown.clone()).await? {
            Some(hub) => hub.run().await.map_err(anyhow::Error::from),
            None => {
                info!("Nothing to supervise, exiting");
                Ok(())
            }
        };

        let _ = broker_shutdown.send(()).await;
        let _ = tokio::time::timeout(Duration::from_secs(2), broker_task).await;
        outcome
    })
}

fn run_sensor(args: SensorArgs) -> Result<()> {
    let config = SensorConfig::from_args(&args)?;
    let shutdown = install_shutdown_flag()?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    rt.block_on(async {
        match Sensor::start(config, shutdown)
            .await
            .context("Sensor startup failed")?
        {
            Some(sensor) => sensor.run().await.map_err(anyhow::Error::from),
            None => {
                info!("Shutdown requested before discovery completed");
                Ok(())
            }
        }
    })
}

fn run_send(target: &str, directive: Mode, bus: &str) -> Result<()> {
    // Shares the wire-format validation with the sensor side.
    let command = CommandMessage::from_wire(&format!("{}:{}", target.trim(), directive))
        .context("Invalid command")?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    rt.block_on(async {
        let mut client = BusClient::connect(&client_addr(bus))
            .await
            .context("Could not reach the bus; is the hub running?")?;
        client
            .publish(COMMAND_CHANNEL, command.to_wire().as_bytes())
            .await?;
        // A read on the same connection proves the broker consumed the
        // publish before we drop the socket.
        let _ = client.kv_get(SENSORS_KEY).await;
        println!("Sent {}", command);
        Ok(())
    })
}

fn run_status(bus: &str) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    rt.block_on(async {
        let mut client = BusClient::connect(&client_addr(bus))
            .await
            .context("Could not reach the bus; is the hub running?")?;
        let sensors = client
            .kv_get(SENSORS_KEY)
            .await
            .context("Bus did not answer; is the hub running?")?;

        let Some(serde_json::Value::Object(map)) = sensors else {
            println!("No sensors registered");
            return Ok(());
        };
        if map.is_empty() {
            println!("No sensors registered");
            return Ok(());
        }

        println!("{:<20} {:<16} {}", "SENSOR", "ADDRESS", "MODE");
        for (id, address) in &map {
            let mode = match client.kv_get(id).await {
                Ok(Some(serde_json::Value::String(token))) => token,
                _ => "-".to_string(),
            };
            println!(
                "{:<20} {:<16} {}",
                id,
                address.as_str().unwrap_or("-"),
                mode
            );
        }
        Ok(())
    })
}
