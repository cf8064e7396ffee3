//! Core domain and wire types.
//!
//! Everything crossing the bus is serde JSON over the framed protocol in the
//! crate root. Payloads coming off the wire are untrusted: they are parsed
//! with strict schemas and typed errors, never evaluated or trusted on shape
//! alone.

use crate::defaults;
use crate::error::{ProtocolError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Canonical Enums
// ============================================================================

/// Sensor operating mode.
/// This is the CANONICAL definition - use this everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    /// Powered up, ignoring motion, no child process
    #[default]
    Standby,
    /// Watching for motion, publishing capture events
    Sensing,
    /// Live video stream served by the external child process
    Streaming,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Standby => "STANDBY",
            Mode::Sensing => "SENSING",
            Mode::Streaming => "STREAMING",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "STANDBY" => Ok(Mode::Standby),
            "SENSING" => Ok(Mode::Sensing),
            "STREAMING" => Ok(Mode::Streaming),
            _ => Err(format!("Invalid mode: '{}'", s)),
        }
    }
}

// ============================================================================
// Registry Types
// ============================================================================

/// One discovered sensor as the hub tracks it.
///
/// Lives only in hub memory and the broker registry; a hub restart forgets
/// all records and discovery runs again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorRecord {
    pub id: String,
    /// IP address the discovery reply came from.
    pub address: String,
    /// Last mode observed for this sensor. The sensor's state machine is
    /// the single writer; this is a cached mirror.
    #[serde(default)]
    pub mode: Mode,
}

impl SensorRecord {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            mode: Mode::default(),
        }
    }
}

// ============================================================================
// Command Channel
// ============================================================================

/// Who a control command is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandTarget {
    /// Every sensor on the command channel
    All,
    /// One sensor by id
    Sensor(String),
}

impl CommandTarget {
    pub fn as_str(&self) -> &str {
        match self {
            CommandTarget::All => defaults::COMMAND_TARGET_ALL,
            CommandTarget::Sensor(id) => id,
        }
    }
}

/// A control command as carried on the shared command channel.
///
/// Wire form is the ASCII string `<target>:<directive>`, e.g. `all:SENSING`
/// or `s1:STREAMING`. Commands are ephemeral; nothing stores them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMessage {
    pub target: CommandTarget,
    pub directive: Mode,
}

impl CommandMessage {
    pub fn new(target: CommandTarget, directive: Mode) -> Self {
        Self { target, directive }
    }

    /// Whether a sensor with the given id should act on this command.
    pub fn applies_to(&self, sensor_id: &str) -> bool {
        match &self.target {
            CommandTarget::All => true,
            CommandTarget::Sensor(id) => id == sensor_id,
        }
    }

    /// Render the `<target>:<directive>` wire string.
    pub fn to_wire(&self) -> String {
        format!("{}:{}", self.target.as_str(), self.directive)
    }

    /// Parse the `<target>:<directive>` wire string.
    ///
    /// The directive token is matched case-insensitively; the target is
    /// taken verbatim except for the literal `all`. Missing separator,
    /// empty target, and unknown directives are malformed.
    pub fn from_wire(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let (target, directive) = trimmed
            .split_once(':')
            .ok_or_else(|| ProtocolError::MalformedCommand(trimmed.to_string()))?;

        if target.is_empty() {
            return Err(ProtocolError::MalformedCommand(trimmed.to_string()));
        }

        let directive = Mode::from_str(directive)
            .map_err(|_| ProtocolError::InvalidMode(directive.to_string()))?;

        let target = if target == defaults::COMMAND_TARGET_ALL {
            CommandTarget::All
        } else {
            CommandTarget::Sensor(target.to_string())
        };

        Ok(Self { target, directive })
    }
}

impl fmt::Display for CommandMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_wire())
    }
}

// ============================================================================
// Event Channel
// ============================================================================

/// A captured motion event as published on the sensor's own channel.
///
/// Immutable after capture except `notes`, which hub-side enrichment may
/// fill in. The image travels base64-encoded inside the JSON body;
/// [`SecurityEvent::image_bytes`] recovers the raw capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    #[serde(rename = "_id")]
    pub id: String,
    pub sensor: String,
    pub timestamp: DateTime<Utc>,
    pub captured_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl SecurityEvent {
    /// Assemble a fresh event: new v4 id, current UTC timestamp, image
    /// encoded for transport.
    pub fn new(sensor: impl Into<String>, image: &[u8]) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sensor: sensor.into(),
            timestamp: Utc::now(),
            captured_image: BASE64.encode(image),
            notes: None,
        }
    }

    /// Decode the transported image back to raw bytes.
    pub fn image_bytes(&self) -> Result<Vec<u8>> {
        Ok(BASE64.decode(&self.captured_image)?)
    }

    /// Replace the image with an enriched rendition, preserving identity
    /// fields.
    pub fn with_enrichment(mut self, image: &[u8], notes: Option<String>) -> Self {
        self.captured_image = BASE64.encode(image);
        self.notes = notes;
        self
    }

    /// Serialize for the bus.
    pub fn to_wire(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and validate an event off the bus.
    ///
    /// Schema and image encoding are both checked here so ingestion sees
    /// either a fully valid event or a typed error.
    pub fn from_wire(raw: &[u8]) -> Result<Self> {
        let event: SecurityEvent = serde_json::from_slice(raw)?;
        BASE64.decode(&event.captured_image)?;
        Ok(event)
    }
}

// ============================================================================
// Bus Frame Bodies
// ============================================================================

/// Body of `Subscribe` and `SubAck` frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribePayload {
    pub channel: String,
}

/// Body of `Publish` frames. `data` is base64 over the raw payload bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishPayload {
    pub channel: String,
    pub data: String,
}

impl PublishPayload {
    pub fn new(channel: impl Into<String>, data: &[u8]) -> Self {
        Self {
            channel: channel.into(),
            data: BASE64.encode(data),
        }
    }

    pub fn data_bytes(&self) -> Result<Vec<u8>> {
        Ok(BASE64.decode(&self.data)?)
    }
}

/// Body of `Deliver` frames. Same shape as a publish; kept distinct so each
/// direction documents itself.
pub type DeliverPayload = PublishPayload;

/// Body of `KvPut` frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvPutPayload {
    pub key: String,
    pub value: serde_json::Value,
}

/// Body of `KvGet` frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvGetPayload {
    pub key: String,
}

/// Body of `KvValue` frames. `value` is `None` when the key is unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvValuePayload {
    pub key: String,
    pub value: Option<serde_json::Value>,
}

/// Body of `Err` frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrPayload {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_tokens() {
        assert_eq!(Mode::Standby.as_str(), "STANDBY");
        assert_eq!(Mode::Sensing.as_str(), "SENSING");
        assert_eq!(Mode::Streaming.as_str(), "STREAMING");
        assert_eq!("streaming".parse::<Mode>().unwrap(), Mode::Streaming);
        assert_eq!("SENSING".parse::<Mode>().unwrap(), Mode::Sensing);
        assert!("PATROL".parse::<Mode>().is_err());
    }

    #[test]
    fn test_mode_serde_uses_screaming_snake() {
        let json = serde_json::to_string(&Mode::Streaming).unwrap();
        assert_eq!(json, "\"STREAMING\"");
        let back: Mode = serde_json::from_str("\"STANDBY\"").unwrap();
        assert_eq!(back, Mode::Standby);
    }

    #[test]
    fn test_command_wire_roundtrip() {
        let cmd = CommandMessage::new(CommandTarget::All, Mode::Sensing);
        assert_eq!(cmd.to_wire(), "all:SENSING");
        assert_eq!(CommandMessage::from_wire("all:SENSING").unwrap(), cmd);

        let cmd = CommandMessage::new(CommandTarget::Sensor("s1".into()), Mode::Streaming);
        assert_eq!(cmd.to_wire(), "s1:STREAMING");
        assert_eq!(CommandMessage::from_wire("s1:STREAMING").unwrap(), cmd);
    }

    #[test]
    fn test_command_directive_case_insensitive() {
        let cmd = CommandMessage::from_wire("s1:streaming").unwrap();
        assert_eq!(cmd.directive, Mode::Streaming);
    }

    #[test]
    fn test_command_malformed() {
        assert!(matches!(
            CommandMessage::from_wire("no separator"),
            Err(ProtocolError::MalformedCommand(_))
        ));
        assert!(matches!(
            CommandMessage::from_wire(":SENSING"),
            Err(ProtocolError::MalformedCommand(_))
        ));
        assert!(matches!(
            CommandMessage::from_wire("s1:FLY"),
            Err(ProtocolError::InvalidMode(_))
        ));
    }

    #[test]
    fn test_command_applies_to() {
        let all = CommandMessage::new(CommandTarget::All, Mode::Standby);
        assert!(all.applies_to("s1"));
        assert!(all.applies_to("s2"));

        let one = CommandMessage::new(CommandTarget::Sensor("s1".into()), Mode::Standby);
        assert!(one.applies_to("s1"));
        assert!(!one.applies_to("s2"));
    }

    #[test]
    fn test_event_roundtrip_preserves_identity_and_image() {
        let image = vec![0xFFu8, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46];
        let event = SecurityEvent::new("s1", &image);

        let wire = event.to_wire().unwrap();
        let back = SecurityEvent::from_wire(&wire).unwrap();

        assert_eq!(back.id, event.id);
        assert_eq!(back.sensor, "s1");
        assert_eq!(back.timestamp, event.timestamp);
        assert_eq!(back.image_bytes().unwrap(), image);
        assert_eq!(back.notes, None);
    }

    #[test]
    fn test_event_wire_field_names() {
        let event = SecurityEvent::new("s1", b"img");
        let value: serde_json::Value =
            serde_json::from_slice(&event.to_wire().unwrap()).unwrap();
        assert!(value.get("_id").is_some());
        assert!(value.get("sensor").is_some());
        assert!(value.get("timestamp").is_some());
        assert!(value.get("captured_image").is_some());
        // notes is skipped while unset
        assert!(value.get("notes").is_none());
    }

    #[test]
    fn test_event_rejects_literal_style_payloads() {
        // The wire format is JSON with a fixed schema; a language-native
        // dict literal must parse as garbage, not as an event.
        let result = SecurityEvent::from_wire(b"{'_id': '1', 'sensor': 's1'}");
        assert!(result.is_err());
    }

    #[test]
    fn test_event_rejects_corrupt_image_encoding() {
        let mut event = SecurityEvent::new("s1", b"img");
        event.captured_image = "!!not base64!!".to_string();
        let wire = serde_json::to_vec(&event).unwrap();
        assert!(matches!(
            SecurityEvent::from_wire(&wire),
            Err(ProtocolError::Base64Error(_))
        ));
    }

    #[test]
    fn test_event_enrichment_replaces_image_and_notes() {
        let event = SecurityEvent::new("s1", b"raw");
        let id = event.id.clone();
        let enriched = event.with_enrichment(b"annotated", Some("1 subject".into()));
        assert_eq!(enriched.id, id);
        assert_eq!(enriched.image_bytes().unwrap(), b"annotated");
        assert_eq!(enriched.notes.as_deref(), Some("1 subject"));
    }

    #[test]
    fn test_publish_payload_data_roundtrip() {
        let body = PublishPayload::new("s1", b"\x00\x01\x02binary");
        assert_eq!(body.data_bytes().unwrap(), b"\x00\x01\x02binary");
        let json = serde_json::to_string(&body).unwrap();
        let back: PublishPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, body);
    }
}
