//! Pub/sub broker hosted by the hub process.
//!
//! Design principles:
//! - Socket owned directly (not Option) - created during bind
//! - run() consumes self - can only be called once (enforced at compile time)
//! - Peers tracked by their ROUTER identity frame; a failed delivery drops
//!   the peer from every channel
//! - Graceful shutdown via shutdown channel

use crate::{BusError, Result};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vigil_protocol::{
    channel_hash, ErrPayload, KvGetPayload, KvPutPayload, KvValuePayload, Message, OpCode,
    PublishPayload, SubscribePayload,
};
use zeromq::{RouterSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

/// How long one poll of the ROUTER socket may block.
const RECV_POLL_MS: u64 = 100;

/// ROUTER identity frame bytes for one connected peer.
type PeerId = Vec<u8>;

/// Broker configuration (plain data)
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// TCP endpoint to bind, e.g. `tcp://127.0.0.1:5008`.
    pub bind_addr: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_addr: vigil_protocol::defaults::DEFAULT_BUS_BIND_ADDR.to_string(),
        }
    }
}

/// The broker: channel subscriptions, the registry, and one ROUTER socket.
pub struct Broker {
    socket: RouterSocket,
    /// channel -> subscriber identities, in subscription order.
    subscriptions: HashMap<String, Vec<PeerId>>,
    /// The shared key-value registry. Lives only as long as the broker.
    kv: HashMap<String, serde_json::Value>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl Broker {
    /// Bind the ROUTER socket and create the broker.
    /// Returns (Broker, shutdown sender) - call run() on the broker.
    pub async fn bind(config: BrokerConfig) -> Result<(Self, mpsc::Sender<()>)> {
        let mut socket = RouterSocket::new();
        socket.bind(&config.bind_addr).await?;
        info!("Broker listening on {}", config.bind_addr);

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Ok((
            Self {
                socket,
                subscriptions: HashMap::new(),
                kv: HashMap::new(),
                shutdown_rx,
            },
            shutdown_tx,
        ))
    }

    /// Main event loop - consumes self (can only be called once)
    pub async fn run(mut self) -> Result<()> {
        info!("Broker entering event loop...");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.recv() => {
                    info!("Broker shutdown signal received");
                    break;
                }

                recv_result = tokio::time::timeout(
                    Duration::from_millis(RECV_POLL_MS),
                    self.socket.recv(),
                ) => {
                    match recv_result {
                        Ok(Ok(multipart)) => {
                            if let Err(e) = self.handle_multipart(multipart).await {
                                warn!("Error handling bus frame: {}", e);
                            }
                        }
                        Ok(Err(e)) => {
                            warn!("Broker recv error: {}", e);
                        }
                        Err(_) => {} // Timeout - continue loop
                    }
                }
            }
        }

        info!("Broker stopped");
        Ok(())
    }

    /// Split a ROUTER multipart into (identity, protocol message) and
    /// dispatch it.
    ///
    /// DEALER peers produce `[identity, header, payload]`; REQ-style peers
    /// insert an empty delimiter frame, so 4 frames are tolerated too.
    async fn handle_multipart(&mut self, multipart: ZmqMessage) -> Result<()> {
        let parts: Vec<Vec<u8>> = multipart.into_vec().into_iter().map(|b| b.to_vec()).collect();

        if parts.len() < 3 {
            warn!("Expected at least 3 frames [identity, header, payload], got {}", parts.len());
            return Ok(());
        }

        let identity = parts[0].clone();
        let frames: Vec<Vec<u8>> = if parts.len() >= 4 && parts[1].is_empty() {
            parts[2..].to_vec()
        } else {
            parts[1..].to_vec()
        };

        let msg = match Message::unpack(&frames) {
            Ok(msg) => msg,
            Err(e) => {
                // A peer speaking the wrong protocol gets one Err frame and
                // is otherwise ignored.
                warn!("Failed to unpack bus frame: {}", e);
                let body = ErrPayload { message: e.to_string() };
                let _ = self.send_to(&identity, OpCode::Err, 0, &body).await;
                return Ok(());
            }
        };

        self.handle_message(identity, msg).await
    }

    async fn handle_message(&mut self, identity: PeerId, msg: Message) -> Result<()> {
        match msg.header.opcode {
            OpCode::Subscribe => {
                let body: SubscribePayload = serde_json::from_slice(&msg.payload)?;
                let newly_added = self.note_subscription(&body.channel, identity.clone());
                debug!(
                    channel = %body.channel,
                    newly_added,
                    "Subscription recorded"
                );
                let hash = channel_hash(&body.channel);
                self.send_to(&identity, OpCode::SubAck, hash, &body).await?;
            }

            OpCode::Publish => {
                let body: PublishPayload = serde_json::from_slice(&msg.payload)?;
                self.fan_out(&body).await;
            }

            OpCode::KvPut => {
                let body: KvPutPayload = serde_json::from_slice(&msg.payload)?;
                debug!(key = %body.key, "Registry put");
                self.kv.insert(body.key, body.value);
            }

            OpCode::KvGet => {
                let body: KvGetPayload = serde_json::from_slice(&msg.payload)?;
                let value = self.kv.get(&body.key).cloned();
                let reply = KvValuePayload { key: body.key, value };
                self.send_to(&identity, OpCode::KvValue, 0, &reply).await?;
            }

            other => {
                warn!("Unexpected opcode {:?} at broker", other);
                let body = ErrPayload {
                    message: format!("Unexpected opcode {:?}", other),
                };
                let _ = self.send_to(&identity, OpCode::Err, 0, &body).await;
            }
        }

        Ok(())
    }

    /// Record a subscription. Returns false when the peer already held one
    /// for this channel (duplicate subscribes are idempotent).
    fn note_subscription(&mut self, channel: &str, identity: PeerId) -> bool {
        let subscribers = self.subscriptions.entry(channel.to_string()).or_default();
        if subscribers.contains(&identity) {
            return false;
        }
        subscribers.push(identity);
        true
    }

    /// Deliver a published payload to every subscriber of its channel, in
    /// subscription order. Peers that can no longer be reached are dropped
    /// from every channel.
    async fn fan_out(&mut self, body: &PublishPayload) {
        let subscribers = match self.subscriptions.get(&body.channel) {
            Some(subs) if !subs.is_empty() => subs.clone(),
            _ => {
                debug!(channel = %body.channel, "Publish with no subscribers, dropped");
                return;
            }
        };

        let hash = channel_hash(&body.channel);
        let mut dead: Vec<PeerId> = Vec::new();

        for identity in &subscribers {
            if let Err(e) = self.send_to(identity, OpCode::Deliver, hash, body).await {
                warn!(channel = %body.channel, "Delivery failed, dropping peer: {}", e);
                dead.push(identity.clone());
            }
        }

        for identity in dead {
            self.drop_peer(&identity);
        }
    }

    /// Forget a peer across all channels.
    fn drop_peer(&mut self, identity: &PeerId) {
        for subscribers in self.subscriptions.values_mut() {
            subscribers.retain(|id| id != identity);
        }
    }

    async fn send_to<T: serde::Serialize>(
        &mut self,
        identity: &PeerId,
        opcode: OpCode,
        chan_hash: u64,
        payload: &T,
    ) -> Result<()> {
        let payload_bytes = serde_json::to_vec(payload)?;
        let msg = Message::new(opcode, chan_hash, payload_bytes)?;
        let (header, body) = msg.pack()?;

        let mut multipart = ZmqMessage::from(identity.clone());
        multipart.push_back(header.into());
        multipart.push_back(body.into());
        self.socket.send(multipart).await.map_err(BusError::Socket)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_broker() -> Broker {
        let (_tx, shutdown_rx) = mpsc::channel(1);
        Broker {
            socket: RouterSocket::new(),
            subscriptions: HashMap::new(),
            kv: HashMap::new(),
            shutdown_rx,
        }
    }

    #[test]
    fn test_duplicate_subscription_is_idempotent() {
        let mut broker = bare_broker();
        let peer = b"peer-1".to_vec();

        assert!(broker.note_subscription("s1", peer.clone()));
        assert!(!broker.note_subscription("s1", peer.clone()));
        assert_eq!(broker.subscriptions["s1"].len(), 1);
    }

    #[test]
    fn test_subscription_order_preserved() {
        let mut broker = bare_broker();
        broker.note_subscription("s1", b"a".to_vec());
        broker.note_subscription("s1", b"b".to_vec());
        broker.note_subscription("s1", b"c".to_vec());

        let subs = &broker.subscriptions["s1"];
        assert_eq!(subs, &vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_drop_peer_clears_every_channel() {
        let mut broker = bare_broker();
        broker.note_subscription("s1", b"a".to_vec());
        broker.note_subscription("s2", b"a".to_vec());
        broker.note_subscription("s2", b"b".to_vec());

        broker.drop_peer(&b"a".to_vec());

        assert!(broker.subscriptions["s1"].is_empty());
        assert_eq!(broker.subscriptions["s2"], vec![b"b".to_vec()]);
    }
}
