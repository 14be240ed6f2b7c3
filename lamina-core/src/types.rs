//! Common types used throughout Lamina

use std::fmt;

/// Numeric protocol identifier carried inside a header to name the protocol
/// of the bytes that follow (IP "next header" codes, EtherTypes and the
/// like). Wide enough for any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolId(pub u32);

impl ProtocolId {
    /// Create a new protocol identifier
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw numeric value
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for ProtocolId {
    fn from(id: u8) -> Self {
        Self(id as u32)
    }
}

impl From<u16> for ProtocolId {
    fn from(id: u16) -> Self {
        Self(id as u32)
    }
}

impl From<u32> for ProtocolId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Relation of one layer instance to a peer instance of the same protocol,
/// based on ordered comparison of its address-like identity fields.
///
/// Used by flow-correlation logic to pair requests with replies: a swapped
/// source/destination match means the peer travels the opposite way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Identity fields match in the same order
    Same,
    /// Identity fields match with source and destination swapped
    Reverse,
    /// No identity match
    Unrelated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_id_conversions() {
        assert_eq!(ProtocolId::from(6u8), ProtocolId::new(6));
        assert_eq!(ProtocolId::from(0x86dd_u16).value(), 0x86dd);
        assert_eq!(ProtocolId::new(17).to_string(), "17");
    }
}
