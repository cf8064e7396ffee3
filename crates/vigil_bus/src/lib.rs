//! Coordination bus: a small pub/sub broker plus the client adapter both
//! hub and sensors use.
//!
//! The hub process hosts the [`broker::Broker`] on a TCP endpoint; every
//! participant (hub included) talks to it through a [`client::BusClient`].
//! Three concerns share the one connection:
//!
//! - channel pub/sub (sensor events, the shared command channel)
//! - the key-value registry (sensor modes, the discovered-sensor map)
//! - control-plane acknowledgements, surfaced as [`BusEvent::Ack`] so
//!   callers can discard them by pattern match instead of shape-sniffing
//!
//! Wire format is `vigil_protocol`'s framed JSON. Delivery is best-effort
//! fan-out to currently connected subscribers; nothing is retained for
//! absent peers.

pub mod broker;
pub mod client;

pub use broker::{Broker, BrokerConfig};
pub use client::{BusClient, BusEvent};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BusError>;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Socket error: {0}")]
    Socket(#[from] zeromq::ZmqError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] vigil_protocol::error::ProtocolError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),
}
