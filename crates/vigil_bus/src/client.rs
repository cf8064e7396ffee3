//! Client adapter for the coordination bus.
//!
//! One `BusClient` per process: the sensor holds one, the hub holds one,
//! the command-line interface opens a short-lived one. The adapter owns a
//! DEALER socket to the broker and presents the narrow contract the loops
//! are written against: `subscribe`, `publish`, non-blocking `poll`, and
//! the registry `kv_put`/`kv_get` pair.

use crate::{BusError, Result};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};
use vigil_protocol::{
    channel_hash, ErrPayload, KvGetPayload, KvPutPayload, KvValuePayload, Message, OpCode,
    PublishPayload, SubscribePayload,
};
use zeromq::{DealerSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

/// Window one `poll` call may wait for traffic. Keeps the contract
/// effectively non-blocking while avoiding a spin.
const POLL_WINDOW_MS: u64 = 50;

/// How long `subscribe` waits for the broker's acknowledgement before
/// treating it as pending. A late ack then surfaces through `poll` as
/// [`BusEvent::Ack`] and is discarded by the caller.
const SUBSCRIBE_ACK_TIMEOUT_MS: u64 = 1_000;

/// Deadline for a registry read.
const KV_GET_TIMEOUT_MS: u64 = 2_000;

/// One message off the bus, already classified.
///
/// Control-plane acknowledgements are first-class here so the polling
/// loops discard them with a match arm instead of inspecting payload
/// shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// Subscription acknowledged. Safe to ignore, at any time.
    Ack { channel: String },
    /// A payload published on a channel this client subscribes to.
    Payload { channel: String, data: Vec<u8> },
}

/// Connected bus client.
pub struct BusClient {
    socket: DealerSocket,
    /// Messages received while waiting for a specific reply; drained by
    /// `poll` before the socket is touched again.
    pending: VecDeque<BusEvent>,
}

impl BusClient {
    /// Connect to the broker.
    pub async fn connect(addr: &str) -> Result<Self> {
        let mut socket = DealerSocket::new();
        socket.connect(addr).await?;
        debug!("Bus client connected to {}", addr);
        Ok(Self {
            socket,
            pending: VecDeque::new(),
        })
    }

    /// Subscribe to a channel.
    ///
    /// Waits briefly for the broker's acknowledgement; if it does not
    /// arrive in time the subscription is still considered made and the
    /// ack surfaces later through `poll`.
    pub async fn subscribe(&mut self, channel: &str) -> Result<()> {
        let body = SubscribePayload {
            channel: channel.to_string(),
        };
        self.send_message(OpCode::Subscribe, channel_hash(channel), &body)
            .await?;

        let deadline = Instant::now() + Duration::from_millis(SUBSCRIBE_ACK_TIMEOUT_MS);
        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                debug!(channel, "Subscribe ack pending, will surface via poll");
                return Ok(());
            };
            match timeout(remaining, self.socket.recv()).await {
                Ok(Ok(multipart)) => match self.classify(multipart) {
                    Some(BusEvent::Ack { channel: acked }) if acked == channel => {
                        debug!(channel, "Subscribed");
                        return Ok(());
                    }
                    Some(other) => self.pending.push_back(other),
                    None => {}
                },
                Ok(Err(e)) => return Err(BusError::Socket(e)),
                Err(_) => {
                    debug!(channel, "Subscribe ack pending, will surface via poll");
                    return Ok(());
                }
            }
        }
    }

    /// Publish raw bytes on a channel.
    pub async fn publish(&mut self, channel: &str, data: &[u8]) -> Result<()> {
        let body = PublishPayload::new(channel, data);
        self.send_message(OpCode::Publish, channel_hash(channel), &body)
            .await
    }

    /// Non-blocking poll: at most one pending message per call.
    ///
    /// Returns `None` when nothing is waiting. Wire-level noise (a frame
    /// that fails validation) is logged and reported as `None`, never as
    /// an error - a bad peer must not wedge the loop.
    pub async fn poll(&mut self) -> Result<Option<BusEvent>> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }

        match timeout(Duration::from_millis(POLL_WINDOW_MS), self.socket.recv()).await {
            Ok(Ok(multipart)) => Ok(self.classify(multipart)),
            Ok(Err(e)) => Err(BusError::Socket(e)),
            Err(_) => Ok(None),
        }
    }

    /// Write a registry key. Fire-and-forget.
    pub async fn kv_put(&mut self, key: &str, value: serde_json::Value) -> Result<()> {
        let body = KvPutPayload {
            key: key.to_string(),
            value,
        };
        self.send_message(OpCode::KvPut, 0, &body).await
    }

    /// Read a registry key. `None` means the key is unset.
    pub async fn kv_get(&mut self, key: &str) -> Result<Option<serde_json::Value>> {
        let body = KvGetPayload {
            key: key.to_string(),
        };
        self.send_message(OpCode::KvGet, 0, &body).await?;

        let deadline = Instant::now() + Duration::from_millis(KV_GET_TIMEOUT_MS);
        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Err(BusError::Timeout("registry value"));
            };
            match timeout(remaining, self.socket.recv()).await {
                Ok(Ok(multipart)) => {
                    // A KvValue for our key ends the wait; everything else
                    // queues for poll.
                    match self.split_frames(multipart) {
                        Some(msg) if msg.header.opcode == OpCode::KvValue => {
                            let reply: KvValuePayload = serde_json::from_slice(&msg.payload)?;
                            if reply.key == key {
                                return Ok(reply.value);
                            }
                            debug!(key = %reply.key, "Stale registry reply, dropped");
                        }
                        Some(msg) => {
                            if let Some(event) = self.classify_message(msg) {
                                self.pending.push_back(event);
                            }
                        }
                        None => {}
                    }
                }
                Ok(Err(e)) => return Err(BusError::Socket(e)),
                Err(_) => return Err(BusError::Timeout("registry value")),
            }
        }
    }

    /// Extract `[header, payload]` frames into a protocol message.
    fn split_frames(&self, multipart: ZmqMessage) -> Option<Message> {
        let parts: Vec<Vec<u8>> = multipart.into_vec().into_iter().map(|b| b.to_vec()).collect();

        if parts.len() < 2 {
            warn!("Expected 2 frames [header, payload], got {}", parts.len());
            return None;
        }

        match Message::unpack(&parts) {
            Ok(msg) => Some(msg),
            Err(e) => {
                warn!("Failed to unpack bus frame: {}", e);
                None
            }
        }
    }

    /// Classify a raw multipart into a `BusEvent`, if it is one.
    fn classify(&self, multipart: ZmqMessage) -> Option<BusEvent> {
        let msg = self.split_frames(multipart)?;
        self.classify_message(msg)
    }

    fn classify_message(&self, msg: Message) -> Option<BusEvent> {
        match msg.header.opcode {
            OpCode::SubAck => {
                let body: SubscribePayload = match serde_json::from_slice(&msg.payload) {
                    Ok(body) => body,
                    Err(e) => {
                        warn!("Malformed SubAck body: {}", e);
                        return None;
                    }
                };
                Some(BusEvent::Ack {
                    channel: body.channel,
                })
            }
            OpCode::Deliver => {
                let body: PublishPayload = match serde_json::from_slice(&msg.payload) {
                    Ok(body) => body,
                    Err(e) => {
                        warn!("Malformed Deliver body: {}", e);
                        return None;
                    }
                };
                let data = match body.data_bytes() {
                    Ok(data) => data,
                    Err(e) => {
                        warn!(channel = %body.channel, "Undecodable payload, dropped: {}", e);
                        return None;
                    }
                };
                Some(BusEvent::Payload {
                    channel: body.channel,
                    data,
                })
            }
            OpCode::KvValue => {
                // A registry reply nobody is waiting for; stale, drop it.
                debug!("Unsolicited registry reply, dropped");
                None
            }
            OpCode::Err => {
                if let Ok(body) = serde_json::from_slice::<ErrPayload>(&msg.payload) {
                    warn!("Broker error: {}", body.message);
                } else {
                    warn!("Broker error with unreadable body");
                }
                None
            }
            other => {
                warn!("Unexpected opcode {:?} at client", other);
                None
            }
        }
    }

    async fn send_message<T: serde::Serialize>(
        &mut self,
        opcode: OpCode,
        chan_hash: u64,
        payload: &T,
    ) -> Result<()> {
        let payload_bytes = serde_json::to_vec(payload)?;
        let msg = Message::new(opcode, chan_hash, payload_bytes)?;
        let (header, body) = msg.pack()?;

        let mut multipart = ZmqMessage::from(header);
        multipart.push_back(body.into());
        self.socket.send(multipart).await.map_err(BusError::Socket)?;
        Ok(())
    }
}
