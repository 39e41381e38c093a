use crate::address::{MacAddress, ADDRESS_LEN};

/// Largest payload carried by a single frame, same as the ESP-NOW limit.
pub const MAX_PAYLOAD_LENGTH: usize = 250;

/// Size of the link headers (kind, destination, source, payload length).
pub const HEADER_LENGTH: usize = 1 + 2 * ADDRESS_LEN + 2;

pub const MAX_FRAME_LENGTH: usize = HEADER_LENGTH + MAX_PAYLOAD_LENGTH;

/// Trait to calculate size on frame for every component on frame.
pub trait FrameSize {
    /// Calculate component size on frame (meaning encoded) in bytes.
    fn size(&self) -> usize;
}

/// Kind of link frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum FrameType {
    /// Frame carrying application data.
    Data = 0x01,
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0x01 => Ok(FrameType::Data),
            n => Err(FrameError::UnknownFrameType(n)),
        }
    }
}

/// Full representation of a link frame with headers and payload.
///
/// Encoded as `[kind][destination: 6B][source: 6B][payload length: u16 BE][payload]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkFrame {
    pub kind: FrameType,
    pub destination: MacAddress,
    pub source: MacAddress,
    pub payload: Vec<u8>,
}

impl LinkFrame {
    pub fn data(destination: MacAddress, source: MacAddress, payload: &[u8]) -> Self {
        LinkFrame {
            kind: FrameType::Data,
            destination,
            source,
            payload: payload.to_owned(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.size());
        bytes.push(self.kind as u8);
        bytes.extend_from_slice(self.destination.as_bytes());
        bytes.extend_from_slice(self.source.as_bytes());
        bytes.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Decodes a frame, returning it with the number of bytes read.
    pub fn try_from_bytes(bytes: &[u8]) -> Result<(Self, usize), FrameError> {
        if bytes.len() < HEADER_LENGTH {
            return Err(FrameError::InvalidHeader {
                context: Some(format!(
                    "Link header too small! ({} bytes, need {})",
                    bytes.len(),
                    HEADER_LENGTH
                )),
            });
        }
        let kind = FrameType::try_from(bytes[0])?;
        let destination = MacAddress::try_from(&bytes[1..1 + ADDRESS_LEN]).map_err(|err| {
            FrameError::InvalidHeader {
                context: Some(err.to_string()),
            }
        })?;
        let source = MacAddress::try_from(&bytes[1 + ADDRESS_LEN..1 + 2 * ADDRESS_LEN])
            .map_err(|err| FrameError::InvalidHeader {
                context: Some(err.to_string()),
            })?;
        let mut len_raw = [0u8; 2];
        len_raw.copy_from_slice(&bytes[HEADER_LENGTH - 2..HEADER_LENGTH]);
        let len = u16::from_be_bytes(len_raw) as usize;
        if len > MAX_PAYLOAD_LENGTH {
            return Err(FrameError::InvalidHeader {
                context: Some(format!("Payload length {} exceeds {}B.", len, MAX_PAYLOAD_LENGTH)),
            });
        }
        if bytes.len() < HEADER_LENGTH + len {
            return Err(FrameError::Truncated {
                expected: HEADER_LENGTH + len,
                actual: bytes.len(),
            });
        }
        let payload = bytes[HEADER_LENGTH..HEADER_LENGTH + len].to_vec();
        Ok((
            LinkFrame {
                kind,
                destination,
                source,
                payload,
            },
            HEADER_LENGTH + len,
        ))
    }

    /// Does this frame concern the node with the given address?
    pub fn is_for(&self, address: &MacAddress) -> bool {
        self.destination == *address || self.destination.is_broadcast()
    }
}

impl FrameSize for MacAddress {
    fn size(&self) -> usize {
        ADDRESS_LEN
    }
}

impl FrameSize for Vec<u8> {
    fn size(&self) -> usize {
        2 + self.len()
    }
}

impl FrameSize for LinkFrame {
    fn size(&self) -> usize {
        1 + self.destination.size() + self.source.size() + self.payload.size()
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Invalid header. Context: {}", .context.as_ref().unwrap_or(&"<none>".to_owned()))]
    InvalidHeader { context: Option<String> },

    #[error("Unknown frame type {0:#04x}.")]
    UnknownFrameType(u8),

    #[error("Truncated frame (expected {expected}B, got {actual}B).")]
    Truncated { expected: usize, actual: usize },
}
