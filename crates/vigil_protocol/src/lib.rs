//! Binary Bus Protocol v1
//!
//! Wire format for broker <-> client communication on the coordination bus.
//! Discovery runs over plain UDP datagrams (see [`discovery`]); everything
//! after the handshake is framed in this protocol.
//!
//! # Protocol Specification
//!
//! Header Format: !BBHQI (16 bytes, Network Byte Order / Big Endian)
//! ```text
//! [VER:1][OP:1][RES:2][CHAN_HASH:8][LEN:4]
//! ```
//!
//! - VER (u8): Protocol version (0x01)
//! - OP (u8): OpCode
//! - RES (u16): Reserved for future use
//! - CHAN_HASH (u64): FNV-1a hash of the channel name, diagnostic only
//! - LEN (u32): Payload length in bytes
//!
//! Payloads are JSON bodies (see [`types`]); a frame pair on the wire is
//! `[header][payload]`.

pub mod defaults;
pub mod discovery;
pub mod error;
pub mod types;

// Re-export types for convenience
pub use types::{
    CommandMessage,
    CommandTarget,
    DeliverPayload,
    ErrPayload,
    KvGetPayload,
    KvPutPayload,
    KvValuePayload,
    // Canonical enums (use these everywhere)
    Mode,
    PublishPayload,
    SecurityEvent,
    SensorRecord,
    SubscribePayload,
};

pub use discovery::{DiscoveryRequest, build_search_request, parse_search_reply};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use error::{ProtocolError, Result};
use std::io::Cursor;

/// Protocol version
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Header size in bytes
pub const HEADER_SIZE: usize = 16;

/// Bus Protocol OpCodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Unknown = 0,

    // Client -> Broker (Subscription)
    Subscribe = 1, // "Deliver everything published on this channel to me."

    // Broker -> Client (Control plane)
    SubAck = 2, // "Subscription recorded." Callers discard these.

    // Client -> Broker (Fan-out)
    Publish = 3, // "Hand this payload to every subscriber of the channel."

    // Broker -> Client (Fan-out)
    Deliver = 4, // "A peer published this on a channel you subscribe to."

    // Client -> Broker (Registry)
    KvPut = 5, // "Store this value under this key."
    KvGet = 6, // "What is stored under this key?"

    // Broker -> Client (Registry)
    KvValue = 7, // "Stored value (or null) for the requested key."

    // Broker -> Client (Error)
    Err = 8, // "Your last frame could not be handled."
}

impl OpCode {
    /// Convert u8 to OpCode
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(OpCode::Unknown),
            1 => Ok(OpCode::Subscribe),
            2 => Ok(OpCode::SubAck),
            3 => Ok(OpCode::Publish),
            4 => Ok(OpCode::Deliver),
            5 => Ok(OpCode::KvPut),
            6 => Ok(OpCode::KvGet),
            7 => Ok(OpCode::KvValue),
            8 => Ok(OpCode::Err),
            _ => Err(ProtocolError::InvalidOpCode(value)),
        }
    }

    /// Convert OpCode to u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// FNV-1a hash of a channel name.
///
/// Carried in the header for log correlation; receivers never trust it for
/// routing, the channel name in the JSON payload is authoritative.
pub fn channel_hash(channel: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in channel.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Protocol header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub opcode: OpCode,
    pub reserved: u16,
    pub channel_hash: u64,
    pub payload_len: u32,
}

impl Header {
    /// Create a new header
    pub fn new(opcode: OpCode, channel_hash: u64, payload_len: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            opcode,
            reserved: 0,
            channel_hash,
            payload_len,
        }
    }

    /// Pack header into 16-byte buffer
    ///
    /// # Format
    /// Network Byte Order (Big Endian):
    /// - Version (u8): 1 byte
    /// - OpCode (u8): 1 byte
    /// - Reserved (u16): 2 bytes
    /// - Channel hash (u64): 8 bytes
    /// - Payload Length (u32): 4 bytes
    ///
    /// Total: 16 bytes
    pub fn pack(&self) -> Result<[u8; HEADER_SIZE]> {
        let mut buf = [0u8; HEADER_SIZE];
        let mut cursor = Cursor::new(&mut buf[..]);

        cursor.write_u8(self.version)?;
        cursor.write_u8(self.opcode.as_u8())?;
        cursor.write_u16::<BigEndian>(self.reserved)?;
        cursor.write_u64::<BigEndian>(self.channel_hash)?;
        cursor.write_u32::<BigEndian>(self.payload_len)?;

        Ok(buf)
    }

    /// Unpack header from 16-byte buffer
    pub fn unpack(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(ProtocolError::HeaderTooShort {
                expected: HEADER_SIZE,
                got: data.len(),
            });
        }

        let mut cursor = Cursor::new(&data[..HEADER_SIZE]);

        let version = cursor.read_u8()?;
        let op_raw = cursor.read_u8()?;
        let reserved = cursor.read_u16::<BigEndian>()?;
        let channel_hash = cursor.read_u64::<BigEndian>()?;
        let payload_len = cursor.read_u32::<BigEndian>()?;

        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }

        let opcode = OpCode::from_u8(op_raw)?;

        Ok(Self {
            version,
            opcode,
            reserved,
            channel_hash,
            payload_len,
        })
    }
}

/// Protocol message (header + payload)
#[derive(Debug, Clone)]
pub struct Message {
    pub header: Header,
    pub payload: Vec<u8>,
}

/// Maximum payload size. Even a full-resolution still fits in a fraction of
/// this; anything larger is a protocol violation, not a big image.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

impl Message {
    /// Create a new message
    ///
    /// Returns an error if payload exceeds MAX_PAYLOAD_SIZE.
    pub fn new(opcode: OpCode, channel_hash: u64, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let header = Header::new(opcode, channel_hash, payload.len() as u32);
        Ok(Self { header, payload })
    }

    /// Pack message into ZMQ frames (header, payload)
    pub fn pack(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let header_bytes = self.header.pack()?.to_vec();
        Ok((header_bytes, self.payload.clone()))
    }

    /// Unpack message from ZMQ frames
    pub fn unpack(frames: &[Vec<u8>]) -> Result<Self> {
        if frames.len() < 2 {
            return Err(ProtocolError::InvalidFrameCount {
                expected: 2,
                got: frames.len(),
            });
        }

        let header = Header::unpack(&frames[0])?;
        let payload = frames[1].clone();

        // Validate payload length
        if payload.len() != header.payload_len as usize {
            return Err(ProtocolError::PayloadLengthMismatch {
                expected: header.payload_len as usize,
                got: payload.len(),
            });
        }

        Ok(Self { header, payload })
    }
}
