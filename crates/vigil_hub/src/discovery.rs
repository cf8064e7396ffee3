//! Hub side of the discovery handshake: broadcast a search, collect the
//! identifier replies, and hand back an id -> address mapping.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use vigil_protocol::defaults::{
    DEFAULT_DISCOVERY_ATTEMPTS, DEFAULT_DISCOVERY_GROUP, DEFAULT_DISCOVERY_PORT,
    DEFAULT_DISCOVERY_TIMEOUT_MS,
};
use vigil_protocol::discovery::{build_search_request, parse_search_reply};

use crate::HubError;

/// Replies bigger than this are not discovery replies.
const REPLY_BUF_SIZE: usize = 512;

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub group: Ipv4Addr,
    pub port: u16,
    pub max_attempts: u32,
    pub per_attempt_timeout: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_DISCOVERY_GROUP
                .parse()
                .unwrap_or(Ipv4Addr::new(239, 255, 255, 250)),
            port: DEFAULT_DISCOVERY_PORT,
            max_attempts: DEFAULT_DISCOVERY_ATTEMPTS,
            per_attempt_timeout: Duration::from_millis(DEFAULT_DISCOVERY_TIMEOUT_MS),
        }
    }
}

/// Run one discovery round: exactly `max_attempts` broadcasts, each
/// followed by a listening window, replies merged last-write-wins by
/// sensor id.
///
/// An empty mapping is a normal outcome, not an error. Only failure to
/// bind the search socket is fatal.
pub async fn discover(config: &SearchConfig) -> Result<HashMap<String, String>, HubError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .map_err(|source| HubError::DiscoveryBind {
            addr: "0.0.0.0:0".to_string(),
            source,
        })?;

    let request = build_search_request(&config.group.to_string(), config.port);
    let target = (config.group, config.port);
    let mut found: HashMap<String, String> = HashMap::new();
    let mut buf = [0u8; REPLY_BUF_SIZE];

    for attempt in 1..=config.max_attempts {
        if let Err(e) = socket.send_to(request.as_bytes(), target).await {
            // A broadcast that cannot leave counts as a silent attempt.
            warn!(attempt, "Search broadcast failed: {}", e);
            continue;
        }
        debug!(attempt, max = config.max_attempts, "Search broadcast sent");

        let deadline = Instant::now() + config.per_attempt_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, socket.recv_from(&mut buf)).await {
                Ok(Ok((len, from))) => {
                    let Some(id) = parse_search_reply(&buf[..len]) else {
                        debug!(from = %from, "Ignoring malformed discovery reply");
                        continue;
                    };
                    let address = from.ip().to_string();
                    if let Some(previous) = found.insert(id.clone(), address.clone()) {
                        if previous != address {
                            debug!(sensor_id = %id, old = %previous, new = %address, "Sensor address updated");
                        }
                    } else {
                        info!(sensor_id = %id, address = %address, "Found a sensor");
                    }
                }
                Ok(Err(e)) => {
                    warn!(attempt, "Discovery receive failed: {}", e);
                    break;
                }
                Err(_) => {
                    debug!(attempt, "No reply within window");
                    break;
                }
            }
        }
    }

    if found.is_empty() {
        info!("No sensors discovered");
    } else {
        info!(count = found.len(), "Discovery round complete");
    }
    Ok(found)
}
