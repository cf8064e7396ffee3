//! The sensor's lifecycle: discovery handshake, then the polling loop.
//!
//! Ordering matters during the handshake. The sensor must be connected to
//! the bus and subscribed to the command channel BEFORE it answers the
//! search, so a hub that issues a command right after discovery cannot race
//! ahead of the subscription.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use vigil_bus::{BusClient, BusEvent};
use vigil_protocol::defaults::COMMAND_CHANNEL;
use vigil_protocol::{CommandMessage, Mode, SecurityEvent};

use crate::capture::{Camera, CapturePipeline, CommandCamera, FileTriggerSensor, StaticCamera};
use crate::discovery::{DiscoveryResponder, ResponderConfig};
use crate::state_machine::{ModeStateMachine, Transition};
use crate::stream::{StreamCommand, StreamProcess};
use crate::{SensorArgs, SensorError};

/// How long each discovery listen window lasts before the shutdown flag is
/// rechecked.
const SEARCH_WINDOW_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct SensorConfig {
    pub sensor_id: String,
    pub group: Ipv4Addr,
    pub port: u16,
    pub bus_port: u16,
    pub initial_mode: Mode,
    pub stream_command: String,
    pub capture_command: Option<String>,
    pub capture_output: PathBuf,
    pub trigger_path: PathBuf,
    pub settle: Duration,
}

impl SensorConfig {
    pub fn from_args(args: &SensorArgs) -> Result<Self, SensorError> {
        let group: Ipv4Addr = args
            .group
            .parse()
            .map_err(|_| SensorError::Config(format!("invalid discovery group '{}'", args.group)))?;
        let sensor_id = match &args.id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => format!("sensor-{}", uuid::Uuid::new_v4().simple()),
        };
        Ok(Self {
            sensor_id,
            group,
            port: args.port,
            bus_port: args.bus_port,
            initial_mode: args.initial_mode,
            stream_command: args.stream_cmd.clone(),
            capture_command: args.capture_cmd.clone(),
            capture_output: args.capture_output.clone(),
            trigger_path: args.trigger.clone(),
            settle: Duration::from_millis(args.settle_ms),
        })
    }
}

/// A sensor that has completed the discovery handshake and is ready to run.
pub struct Sensor {
    config: SensorConfig,
    bus: BusClient,
    machine: ModeStateMachine,
    pipeline: CapturePipeline,
    shutdown: Arc<AtomicBool>,
}

impl Sensor {
    /// Bind the discovery socket, wait for a hub search, connect to the
    /// hub's bus and only then reveal our identifier.
    ///
    /// Returns `Ok(None)` when the shutdown flag is raised before any hub
    /// searches. A discovery bind failure is fatal and propagates.
    pub async fn start(
        config: SensorConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Option<Self>, SensorError> {
        let responder = DiscoveryResponder::bind(&ResponderConfig {
            group: config.group,
            port: config.port,
        })
        .await?;
        info!(
            sensor_id = %config.sensor_id,
            port = config.port,
            "Waiting to be discovered"
        );

        let requester = loop {
            if shutdown.load(Ordering::SeqCst) {
                info!("Shutdown before discovery completed");
                return Ok(None);
            }
            if let Some(addr) = responder
                .await_search(Duration::from_millis(SEARCH_WINDOW_MS))
                .await?
            {
                break addr;
            }
        };

        let bus_addr = format!("tcp://{}:{}", requester.ip(), config.bus_port);
        info!(hub = %requester, bus = %bus_addr, "Hub found, connecting to bus");
        let mut bus = BusClient::connect(&bus_addr).await?;
        bus.subscribe(COMMAND_CHANNEL).await?;
        responder.send_reply(requester, &config.sensor_id).await?;

        let stream_command = StreamCommand::parse(&config.stream_command)
            .ok_or_else(|| SensorError::Config("empty stream command".to_string()))?;
        let machine = ModeStateMachine::new(
            &config.sensor_id,
            config.initial_mode,
            StreamProcess::new(stream_command),
        );

        let camera: Box<dyn Camera> = match &config.capture_command {
            Some(cmd) => Box::new(
                CommandCamera::new(cmd, &config.capture_output)
                    .ok_or_else(|| SensorError::Config("empty capture command".to_string()))?,
            ),
            None => Box::new(StaticCamera),
        };
        let pipeline = CapturePipeline::new(
            &config.sensor_id,
            Box::new(FileTriggerSensor::new(&config.trigger_path)),
            camera,
            config.settle,
        );

        Ok(Some(Self {
            config,
            bus,
            machine,
            pipeline,
            shutdown,
        }))
    }

    pub fn sensor_id(&self) -> &str {
        &self.config.sensor_id
    }

    /// Drive the sensor until the shutdown flag is raised.
    ///
    /// Each cycle handles at most one bus message, takes one motion
    /// reading when sensing, and mirrors the current mode into the
    /// registry.
    pub async fn run(mut self) -> Result<(), SensorError> {
        info!(
            sensor_id = %self.config.sensor_id,
            mode = %self.machine.mode(),
            "Sensor running"
        );
        self.mirror_mode().await;

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.bus.poll().await {
                Ok(Some(BusEvent::Payload { channel, data })) if channel == COMMAND_CHANNEL => {
                    self.handle_command(&data);
                }
                Ok(Some(BusEvent::Payload { channel, .. })) => {
                    debug!(channel = %channel, "Ignoring payload on unexpected channel");
                }
                Ok(Some(BusEvent::Ack { channel })) => {
                    debug!(channel = %channel, "Discarding subscription ack");
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Bus poll failed: {}", e);
                    return Err(e.into());
                }
            }

            if self.machine.mode() == Mode::Sensing {
                match self.pipeline.observe() {
                    Ok(Some(event)) => self.publish_event(&event).await,
                    Ok(None) => {}
                    Err(e) => warn!("Capture failed, staying armed: {}", e),
                }
            }

            self.mirror_mode().await;
        }

        self.machine.shutdown();
        info!(sensor_id = %self.config.sensor_id, "Sensor stopped");
        Ok(())
    }

    fn handle_command(&mut self, data: &[u8]) {
        let text = match std::str::from_utf8(data) {
            Ok(t) => t,
            Err(_) => {
                warn!("Discarding non-text command payload");
                return;
            }
        };
        let command = match CommandMessage::from_wire(text) {
            Ok(c) => c,
            Err(e) => {
                warn!(raw = %text, "Discarding malformed command: {}", e);
                return;
            }
        };
        match self.machine.apply(&command) {
            Ok(Transition::Changed { .. }) | Ok(Transition::Unchanged) => {}
            Err(e) => {
                // The machine already kept its previous mode; the registry
                // mirror this cycle reflects that, not STREAMING.
                error!("Mode change rejected: {}", e);
            }
        }
    }

    async fn publish_event(&mut self, event: &SecurityEvent) {
        let wire = match event.to_wire() {
            Ok(w) => w,
            Err(e) => {
                warn!(event_id = %event.id, "Could not encode event: {}", e);
                return;
            }
        };
        match self.bus.publish(&self.config.sensor_id, &wire).await {
            Ok(()) => info!(
                event_id = %event.id,
                channel = %self.config.sensor_id,
                "Published security event"
            ),
            Err(e) => warn!(event_id = %event.id, "Could not publish event: {}", e),
        }
    }

    /// Push the current mode under our own id so the hub can read it back.
    async fn mirror_mode(&mut self) {
        let mode = self.machine.mode();
        if let Err(e) = self
            .bus
            .kv_put(
                &self.config.sensor_id,
                serde_json::Value::String(mode.as_str().to_string()),
            )
            .await
        {
            warn!(mode = %mode, "Could not mirror mode to registry: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_config_from_default_args() {
        let args = SensorArgs::parse_from(["vigil-sensor"]);
        let config = SensorConfig::from_args(&args).unwrap();
        assert!(config.sensor_id.starts_with("sensor-"));
        assert_eq!(config.group, Ipv4Addr::new(239, 255, 255, 250));
        assert_eq!(config.port, vigil_protocol::defaults::DEFAULT_DISCOVERY_PORT);
        assert_eq!(config.initial_mode, Mode::Sensing);
        assert_eq!(config.settle, Duration::from_millis(5_000));
        assert!(config.capture_command.is_none());
    }

    #[test]
    fn test_config_rejects_bad_group() {
        let args = SensorArgs::parse_from(["vigil-sensor", "--group", "not-an-ip"]);
        assert!(matches!(
            SensorConfig::from_args(&args),
            Err(SensorError::Config(_))
        ));
    }

    #[test]
    fn test_explicit_id_is_kept_verbatim() {
        let args = SensorArgs::parse_from(["vigil-sensor", "--id", "  porch  "]);
        let config = SensorConfig::from_args(&args).unwrap();
        assert_eq!(config.sensor_id, "porch");
    }
}
