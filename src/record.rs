/// Packet record definitions
///
/// One parsed line of a tab-separated packet trace. Field positions follow the
/// capture tool's column layout; only the columns the loss analysis reads are
/// named here.

use crate::connection::ConnectionKey;

pub const FIELD_RECORD_INDEX: usize = 0;
pub const FIELD_TIMESTAMP: usize = 1;
pub const FIELD_SRC_ADDR: usize = 2;
pub const FIELD_SRC_PORT: usize = 3;
pub const FIELD_DST_ADDR: usize = 4;
pub const FIELD_DST_PORT: usize = 5;
pub const FIELD_PAYLOAD_LEN: usize = 8;
pub const FIELD_HEADER_LEN: usize = 11;
pub const FIELD_SEQUENCE: usize = 13;
pub const FIELD_CLOSE_FLAG: usize = 14;

/// Minimum number of columns a complete record must carry
pub const MIN_FIELDS: usize = FIELD_CLOSE_FLAG + 1;

/// Connection state column of the trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum CloseFlag {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl CloseFlag {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(CloseFlag::Open),
            1 => Some(CloseFlag::Closing),
            2 => Some(CloseFlag::Closed),
            _ => None,
        }
    }

    /// True for the flag that terminates a connection
    pub fn terminates(self) -> bool {
        self == CloseFlag::Closed
    }
}

/// A single packet as seen by the gap engine
#[derive(Debug, Clone, PartialEq)]
pub struct PacketRecord<K = ConnectionKey> {
    pub key: K,
    pub timestamp: f64,
    pub sequence: u64,
    pub payload_len: u64,
    pub header_len: u64,
    pub close: CloseFlag,
}

impl<K> PacketRecord<K> {
    /// Bytes this record contributes to the stream (payload + header)
    pub fn size(&self) -> u64 {
        self.payload_len.saturating_add(self.header_len)
    }

    /// Offset the connection expects after this record
    pub fn next_offset(&self) -> u64 {
        self.sequence.saturating_add(self.size())
    }

    /// Sequence number zero marks a connection start
    pub fn is_start(&self) -> bool {
        self.sequence == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_flag_from_u8() {
        assert_eq!(CloseFlag::from_u8(0), Some(CloseFlag::Open));
        assert_eq!(CloseFlag::from_u8(2), Some(CloseFlag::Closed));
        assert_eq!(CloseFlag::from_u8(3), None);
        assert!(CloseFlag::Closed.terminates());
        assert!(!CloseFlag::Closing.terminates());
    }

    #[test]
    fn test_next_offset() {
        let record = PacketRecord {
            key: 7u64,
            timestamp: 1.5,
            sequence: 100,
            payload_len: 40,
            header_len: 20,
            close: CloseFlag::Open,
        };
        assert_eq!(record.size(), 60);
        assert_eq!(record.next_offset(), 160);
        assert!(!record.is_start());
    }
}
