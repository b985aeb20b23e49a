//! Heartbeat payload format and parsing.
//!
//! Every heartbeat is a fixed 24-byte datagram:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |       Protocol Version        |   Priority    |   Priority    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                  Watched IPv4 Address                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                                                               |
//! +                                                               +
//! |                 Sender NIC ID (128-bit UUID)                  |
//! +                                                               +
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The priority is repeated as an integrity check.

use crate::types::{NicId, PAYLOAD_LENGTH, PROTOCOL_VERSION};
use bytes::{Buf, BufMut, BytesMut};
use std::net::Ipv4Addr;

/// Offset of the first priority byte
const PRIORITY_OFFSET: usize = 2;

/// Datagram prefix asking the engine to log its state
const INFO_PROBE: &[u8] = b"info";

/// Reasons a datagram is rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("bad payload length {0}, need {PAYLOAD_LENGTH}")]
    BadLength(usize),

    #[error("bad protocol version {0:04x}")]
    BadVersion(u16),

    #[error("bad payload (priority should repeat, got {0} and {1})")]
    BadPriorityIntegrity(u8, u8),
}

/// Decoded heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payload {
    /// Sender priority (lower is more eligible)
    pub priority: u8,

    /// Elastic IP the sender watches
    pub address: Ipv4Addr,

    /// Sender NIC
    pub nic_id: NicId,
}

impl Payload {
    /// Create a new heartbeat payload
    pub fn new(priority: u8, address: Ipv4Addr, nic_id: NicId) -> Self {
        Self {
            priority,
            address,
            nic_id,
        }
    }

    /// Serialize the payload into a buffer that can later be patched in place
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(PAYLOAD_LENGTH);

        buf.put_slice(&PROTOCOL_VERSION);
        buf.put_u8(self.priority);
        buf.put_u8(self.priority);
        buf.put_slice(&self.address.octets());
        buf.put_slice(self.nic_id.as_bytes());

        buf
    }

    /// Parse a heartbeat from raw bytes
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() != PAYLOAD_LENGTH {
            return Err(DecodeError::BadLength(data.len()));
        }

        let mut buf = data;

        let version = buf.get_u16();
        if version != u16::from_be_bytes(PROTOCOL_VERSION) {
            return Err(DecodeError::BadVersion(version));
        }

        let priority = buf.get_u8();
        let repeated = buf.get_u8();
        if priority != repeated {
            return Err(DecodeError::BadPriorityIntegrity(priority, repeated));
        }

        let address = Ipv4Addr::from(buf.get_u32());

        let mut nic = [0u8; 16];
        buf.copy_to_slice(&mut nic);

        Ok(Self {
            priority,
            address,
            nic_id: NicId::from_bytes(nic),
        })
    }
}

/// Overwrite both priority bytes of an encoded payload
pub fn set_priority(buf: &mut [u8], priority: u8) {
    buf[PRIORITY_OFFSET] = priority;
    buf[PRIORITY_OFFSET + 1] = priority;
}

/// Priority carried by an encoded payload
pub fn priority_of(buf: &[u8]) -> u8 {
    buf[PRIORITY_OFFSET]
}

/// Whether a datagram is a state dump request rather than a heartbeat
pub fn is_info_probe(data: &[u8]) -> bool {
    data.starts_with(INFO_PROBE)
}
