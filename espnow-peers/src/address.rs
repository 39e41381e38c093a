//! Hardware address representation and its textual codec.
//!
//! A node is identified by a 6 bytes hardware (MAC) address. The canonical textual
//! form is six colon-separated, uppercase, two digits hexadecimal groups, e.g.
//! `AA:BB:CC:DD:EE:FF`. [encode] and [decode] convert between both forms and are exact
//! inverses of each other.
use std::fmt;
use std::str::FromStr;

/// Length in bytes of a hardware address.
pub const ADDRESS_LEN: usize = 6;

/// The reserved all-ones address, used to reach every node in range.
pub const BROADCAST_ADDRESS: MacAddress = MacAddress([0xFF; ADDRESS_LEN]);

/// A 6 bytes hardware address.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacAddress([u8; ADDRESS_LEN]);

impl MacAddress {
    pub const fn new(octets: [u8; ADDRESS_LEN]) -> Self {
        MacAddress(octets)
    }

    /// Parses the textual form of an address (case-insensitive).
    pub fn encode(text: &str) -> Result<Self, AddressError> {
        encode(text).map(MacAddress)
    }

    /// Renders the canonical textual form of this address.
    pub fn decode(&self) -> String {
        decode(&self.0)
    }

    pub fn octets(&self) -> [u8; ADDRESS_LEN] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == BROADCAST_ADDRESS
    }
}

/// Converts a textual address into its byte encoding.
///
/// The input must be made of exactly 6 segments separated by `:`, each segment being
/// exactly two hexadecimal digits. Lowercase digits are accepted.
pub fn encode(text: &str) -> Result<[u8; ADDRESS_LEN], AddressError> {
    let mut octets = [0u8; ADDRESS_LEN];
    let mut segments = 0;
    for (i, segment) in text.split(':').enumerate() {
        if i >= ADDRESS_LEN {
            segments = i + 1;
            break;
        }
        if segment.len() != 2 || !segment.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(AddressError::InvalidSegment {
                input: text.to_owned(),
                segment: segment.to_owned(),
            });
        }
        octets[i] = u8::from_str_radix(segment, 16).map_err(|_| AddressError::InvalidSegment {
            input: text.to_owned(),
            segment: segment.to_owned(),
        })?;
        segments = i + 1;
    }
    if segments != ADDRESS_LEN {
        return Err(AddressError::SegmentCount {
            input: text.to_owned(),
            count: text.split(':').count(),
        });
    }
    Ok(octets)
}

/// Converts a byte encoded address into its canonical textual form.
pub fn decode(octets: &[u8; ADDRESS_LEN]) -> String {
    octets
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

impl FromStr for MacAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MacAddress::encode(s)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.decode())
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddress({})", self)
    }
}

impl From<[u8; ADDRESS_LEN]> for MacAddress {
    fn from(octets: [u8; ADDRESS_LEN]) -> Self {
        MacAddress(octets)
    }
}

impl From<MacAddress> for [u8; ADDRESS_LEN] {
    fn from(address: MacAddress) -> Self {
        address.0
    }
}

impl TryFrom<&[u8]> for MacAddress {
    type Error = AddressError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let octets: [u8; ADDRESS_LEN] = bytes
            .try_into()
            .map_err(|_| AddressError::InvalidLength { length: bytes.len() })?;
        Ok(MacAddress(octets))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Address {input:?} has {count} segments, expected {}.", ADDRESS_LEN)]
    SegmentCount { input: String, count: usize },

    #[error("Address {input:?} contains an invalid segment {segment:?} (expected two hexadecimal digits).")]
    InvalidSegment { input: String, segment: String },

    #[error("Raw address is {length} bytes long, expected {}.", ADDRESS_LEN)]
    InvalidLength { length: usize },
}
