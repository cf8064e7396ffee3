//! Discovery responder: the sensor half of the handshake.
//!
//! Binds the shared discovery port, waits for a search datagram with the
//! right service token, and replies unicast with this sensor's id. The run
//! loop drives the phases itself so the bus subscription can be opened
//! between seeing the search and sending the reply - by the time the
//! searcher learns our id, we are already listening for commands.

use crate::SensorError;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info};
use vigil_protocol::discovery::DiscoveryRequest;

/// Discovery listener configuration (plain data)
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    /// Multicast group to join; a non-multicast address (loopback in
    /// tests) skips the join and listens plain unicast.
    pub group: Ipv4Addr,
    pub port: u16,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            group: vigil_protocol::defaults::DEFAULT_DISCOVERY_GROUP
                .parse()
                .unwrap_or(Ipv4Addr::new(239, 255, 255, 250)),
            port: vigil_protocol::defaults::DEFAULT_DISCOVERY_PORT,
        }
    }
}

pub struct DiscoveryResponder {
    socket: UdpSocket,
}

impl DiscoveryResponder {
    /// Bind the discovery socket and join the multicast group.
    ///
    /// Failure here is fatal to the sensor: without the discovery socket
    /// no hub can ever find us.
    pub async fn bind(config: &ResponderConfig) -> Result<Self, SensorError> {
        let bind_addr = format!("0.0.0.0:{}", config.port);
        let socket =
            UdpSocket::bind(&bind_addr)
                .await
                .map_err(|source| SensorError::DiscoveryBind {
                    addr: bind_addr.clone(),
                    source,
                })?;

        if config.group.is_multicast() {
            socket
                .join_multicast_v4(config.group, Ipv4Addr::UNSPECIFIED)
                .map_err(|source| SensorError::DiscoveryBind {
                    addr: format!("{} (multicast join {})", bind_addr, config.group),
                    source,
                })?;
        }

        info!("Discovery responder listening on {}", bind_addr);
        Ok(Self { socket })
    }

    /// Wait up to `window` for one matching search request.
    ///
    /// Returns the requester's address, or `None` if the window closed
    /// quietly. Malformed or foreign datagrams are ignored and the wait
    /// continues.
    pub async fn await_search(&self, window: Duration) -> Result<Option<SocketAddr>, SensorError> {
        let mut buf = [0u8; 4096];
        let deadline = tokio::time::Instant::now() + window;

        loop {
            let Some(remaining) = deadline.checked_duration_since(tokio::time::Instant::now())
            else {
                return Ok(None);
            };

            match timeout(remaining, self.socket.recv_from(&mut buf)).await {
                Ok(Ok((len, addr))) => match DiscoveryRequest::parse(&buf[..len]) {
                    Some(request) if request.service_matches() => {
                        info!("Discovery request from {}", addr);
                        return Ok(Some(addr));
                    }
                    Some(_) => {
                        debug!("Search for another service from {}, ignored", addr);
                    }
                    None => {
                        debug!("Undecodable datagram from {}, ignored", addr);
                    }
                },
                Ok(Err(e)) => return Err(SensorError::Io(e)),
                Err(_) => return Ok(None),
            }
        }
    }

    /// Answer a search: unicast our bare id back to the requester.
    pub async fn send_reply(&self, to: SocketAddr, sensor_id: &str) -> Result<(), SensorError> {
        self.socket
            .send_to(sensor_id.as_bytes(), to)
            .await
            .map_err(SensorError::Io)?;
        info!("Answered discovery from {} as '{}'", to, sensor_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_protocol::discovery::build_search_request;

    fn loopback_config(port: u16) -> ResponderConfig {
        ResponderConfig {
            group: Ipv4Addr::LOCALHOST,
            port,
        }
    }

    fn test_port() -> u16 {
        use std::time::{SystemTime, UNIX_EPOCH};
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64;
        let pid = std::process::id() as u64;
        ((seed ^ pid) % 10000 + 40000) as u16
    }

    #[tokio::test]
    async fn test_matching_search_is_answered() {
        let port = test_port();
        let responder = DiscoveryResponder::bind(&loopback_config(port)).await.unwrap();

        let searcher = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let request = build_search_request("127.0.0.1", port);
        searcher
            .send_to(request.as_bytes(), ("127.0.0.1", port))
            .await
            .unwrap();

        let from = responder
            .await_search(Duration::from_secs(2))
            .await
            .unwrap()
            .expect("search should arrive");
        assert_eq!(from.ip(), searcher.local_addr().unwrap().ip());

        responder.send_reply(from, "s1").await.unwrap();

        let mut buf = [0u8; 64];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), searcher.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"s1");
    }

    #[tokio::test]
    async fn test_foreign_datagrams_do_not_end_the_wait() {
        let port = test_port().wrapping_add(17);
        let responder = DiscoveryResponder::bind(&loopback_config(port)).await.unwrap();

        let noise = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        noise
            .send_to(b"NOTIFY * HTTP/1.1\r\n", ("127.0.0.1", port))
            .await
            .unwrap();
        noise
            .send_to(
                b"M-SEARCH * HTTP/1.1\r\nST:urn:someone_else\r\n\r\n",
                ("127.0.0.1", port),
            )
            .await
            .unwrap();

        let outcome = responder
            .await_search(Duration::from_millis(400))
            .await
            .unwrap();
        assert_eq!(outcome, None);
    }

    #[tokio::test]
    async fn test_quiet_window_returns_none() {
        let port = test_port().wrapping_add(34);
        let responder = DiscoveryResponder::bind(&loopback_config(port)).await.unwrap();
        let outcome = responder
            .await_search(Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(outcome, None);
    }
}
