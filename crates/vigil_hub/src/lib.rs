//! Hub node: searches the network for sensors, subscribes to each one's
//! event channel, and drives ingestion through the enrichment, storage and
//! alerting collaborators.

pub mod collaborators;
pub mod discovery;
pub mod ingest;
pub mod registry;
pub mod run;

pub use collaborators::{
    Enricher, Enrichment, EventStore, HttpEnricher, JsonlEventStore, NoopEnricher, NoopNotifier,
    Notifier, WebhookNotifier,
};
pub use discovery::{discover, SearchConfig};
pub use ingest::EventIngest;
pub use registry::SensorRegistry;
pub use run::{assemble_ingest, Hub, HubConfig};

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    /// Startup-fatal: no coordination is possible without the search socket.
    #[error("Failed to bind discovery socket {addr}: {source}")]
    DiscoveryBind { addr: String, source: io::Error },

    #[error("Event store failure: {0}")]
    Store(anyhow::Error),

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
#[command(name = "vigil-hub", about = "Vigil hub node")]
pub struct HubArgs {
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

    /// How many search broadcasts to send before giving up
    #[arg(long, default_value_t = vigil_protocol::defaults::DEFAULT_DISCOVERY_ATTEMPTS)]
    pub attempts: u32,

    /// How long to collect replies after each broadcast, in ms
    #[arg(long, default_value_t = vigil_protocol::defaults::DEFAULT_DISCOVERY_TIMEOUT_MS)]
    pub attempt_timeout_ms: u64,

    /// Address the bus broker binds to
    #[arg(
        long,
        env = "VIGIL_BUS_BIND",
        default_value = vigil_protocol::defaults::DEFAULT_BUS_BIND_ADDR
    )]
    pub bus_bind: String,

    /// Image enrichment service endpoint; unset disables enrichment
    #[arg(long, env = "VIGIL_ENRICH_ENDPOINT")]
    pub enrich_endpoint: Option<String>,

    /// API key forwarded to the enrichment service
    #[arg(long, env = "VIGIL_ENRICH_KEY")]
    pub enrich_key: Option<String>,

    /// Alert webhook URL; unset disables alert delivery
    #[arg(long, env = "VIGIL_WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Recipient field passed to the alert webhook
    #[arg(long, env = "VIGIL_ALERT_TO", default_value = "security@localhost")]
    pub alert_to: String,

    /// Event log path; defaults to events.jsonl under the vigil data dir
    #[arg(long)]
    pub store: Option<std::path::PathBuf>,
}
