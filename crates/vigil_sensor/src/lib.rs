//! Sensor node: answers discovery, then runs a single cooperative loop
//! that applies mode commands, mirrors its mode into the registry, and
//! publishes capture events while sensing.

pub mod capture;
pub mod discovery;
pub mod run;
pub mod state_machine;
pub mod stream;

pub use capture::{Camera, CapturePipeline, CommandCamera, FileTriggerSensor, MotionSensor, StaticCamera};
pub use discovery::{DiscoveryResponder, ResponderConfig};
pub use run::{Sensor, SensorConfig};
pub use state_machine::{ModeStateMachine, Transition};
pub use stream::{StreamCommand, StreamProcess};

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SensorError {
    /// Startup-fatal: without the discovery socket no hub can find us.
    #[error("Failed to bind discovery socket {addr}: {source}")]
    DiscoveryBind { addr: String, source: io::Error },

    #[error("Failed to spawn stream process '{command}': {source}")]
    StreamSpawn { command: String, source: io::Error },

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Bus error: {0}")]
    Bus(#[from] vigil_bus::BusError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] vigil_protocol::error::ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(clap::Parser, Debug)]
#[command(name = "vigil-sensor", about = "Vigil sensor node")]
pub struct SensorArgs {
    /// Sensor identifier (auto-generated if not provided)
    #[arg(long, env = "VIGIL_SENSOR_ID")]
    pub id: Option<String>,

    /// Discovery multicast group
    #[arg(
        long,
        env = "VIGIL_DISCOVERY_GROUP",
        default_value = vigil_protocol::defaults::DEFAULT_DISCOVERY_GROUP
    )]
    pub group: String,

    /// Discovery UDP port
    #[arg(
        long,
        env = "VIGIL_DISCOVERY_PORT",
        default_value_t = vigil_protocol::defaults::DEFAULT_DISCOVERY_PORT
    )]
    pub port: u16,

    /// TCP port the hub's bus broker listens on
    #[arg(
        long,
        env = "VIGIL_BUS_PORT",
        default_value_t = vigil_protocol::defaults::DEFAULT_BUS_PORT
    )]
    pub bus_port: u16,

    /// Mode to boot into
    #[arg(long, default_value_t = vigil_protocol::Mode::Sensing)]
    pub initial_mode: vigil_protocol::Mode,

    /// Command launched for the STREAMING mode (whitespace-split, no shell)
    #[arg(long, default_value = "mjpg_streamer -i input_raspicam.so")]
    pub stream_cmd: String,

    /// Still-capture command; the output path is appended as final argument.
    /// Unset means a built-in placeholder frame.
    #[arg(long)]
    pub capture_cmd: Option<String>,

    /// Where the capture command writes its frame
    #[arg(long, default_value = "/tmp/vigil_capture.jpg")]
    pub capture_output: std::path::PathBuf,

    /// Trigger file standing in for the motion GPIO line
    #[arg(long, default_value = "/tmp/vigil_motion")]
    pub trigger: std::path::PathBuf,

    /// Quiet period after an event before the next one may fire, in ms
    #[arg(long, default_value_t = vigil_protocol::defaults::DEFAULT_SETTLE_DELAY_MS)]
    pub settle_ms: u64,
}
