/// Connection identification
///
/// A connection is one direction of traffic named by its 4-tuple. The engine
/// only needs keys that are ordered and cloneable, so two representations are
/// offered: the full tuple, and a packed 64-bit id for captures taken on the
/// lab network where every source lives in 192.168.0.0/16 and every
/// destination in 10.0.0.0/16.

use byteorder::{BigEndian, ByteOrder};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// Fixed leading octets assumed for packed source addresses
pub const PACKED_SRC_PREFIX: [u8; 2] = [192, 168];
/// Fixed leading octets assumed for packed destination addresses
pub const PACKED_DST_PREFIX: [u8; 2] = [10, 0];

/// Full 4-tuple connection key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionKey {
    pub src_addr: IpAddr,
    pub src_port: u16,
    pub dst_addr: IpAddr,
    pub dst_port: u16,
}

impl ConnectionKey {
    pub fn new(src_addr: IpAddr, src_port: u16, dst_addr: IpAddr, dst_port: u16) -> Self {
        ConnectionKey {
            src_addr,
            src_port,
            dst_addr,
            dst_port,
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} to {}/{}",
            self.src_addr, self.src_port, self.dst_addr, self.dst_port
        )
    }
}

/// Packed 64-bit connection id
///
/// Layout, most significant first: low 16 bits of the source address, source
/// port, low 16 bits of the destination address, destination port. Distinct
/// tuples collide whenever they differ only in the assumed prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackedConnectionId(u64);

impl PackedConnectionId {
    /// Pack a tuple; `None` for addresses that are not IPv4
    pub fn from_key(key: &ConnectionKey) -> Option<Self> {
        let (src, dst) = match (key.src_addr, key.dst_addr) {
            (IpAddr::V4(src), IpAddr::V4(dst)) => (src, dst),
            _ => return None,
        };

        let mut buf = [0u8; 8];
        buf[0..2].copy_from_slice(&src.octets()[2..4]);
        BigEndian::write_u16(&mut buf[2..4], key.src_port);
        buf[4..6].copy_from_slice(&dst.octets()[2..4]);
        BigEndian::write_u16(&mut buf[6..8], key.dst_port);

        Some(PackedConnectionId(BigEndian::read_u64(&buf)))
    }

    pub fn from_raw(raw: u64) -> Self {
        PackedConnectionId(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Rebuild the tuple using the lab-network prefixes
    pub fn to_key(&self) -> ConnectionKey {
        let mut buf = [0u8; 8];
        BigEndian::write_u64(&mut buf, self.0);

        let src = Ipv4Addr::new(PACKED_SRC_PREFIX[0], PACKED_SRC_PREFIX[1], buf[0], buf[1]);
        let dst = Ipv4Addr::new(PACKED_DST_PREFIX[0], PACKED_DST_PREFIX[1], buf[4], buf[5]);

        ConnectionKey {
            src_addr: IpAddr::V4(src),
            src_port: BigEndian::read_u16(&buf[2..4]),
            dst_addr: IpAddr::V4(dst),
            dst_port: BigEndian::read_u16(&buf[6..8]),
        }
    }
}

impl fmt::Display for PackedConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_key(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lab_key(src_port: u16, dst_port: u16) -> ConnectionKey {
        ConnectionKey::new(
            "192.168.0.18".parse().unwrap(),
            src_port,
            "10.0.1.44".parse().unwrap(),
            dst_port,
        )
    }

    #[test]
    fn test_packed_layout() {
        let id = PackedConnectionId::from_key(&lab_key(8000, 57089)).unwrap();
        assert_eq!(id.raw(), 0x0012_1f40_012c_df01);
    }

    #[test]
    fn test_packed_to_key() {
        let key = lab_key(8000, 57089);
        let id = PackedConnectionId::from_key(&key).unwrap();
        assert_eq!(id.to_key(), key);
        assert_eq!(id.to_string(), "192.168.0.18/8000 to 10.0.1.44/57089");
    }

    #[test]
    fn test_packed_rejects_ipv6() {
        let key = ConnectionKey::new("::1".parse().unwrap(), 1, "10.0.0.1".parse().unwrap(), 2);
        assert!(PackedConnectionId::from_key(&key).is_none());
    }

    #[test]
    fn test_packed_prefix_collision() {
        let a = lab_key(80, 443);
        let mut b = a;
        b.src_addr = "172.16.0.18".parse().unwrap();
        assert_ne!(a, b);
        assert_eq!(PackedConnectionId::from_key(&a), PackedConnectionId::from_key(&b));
    }

    #[test]
    fn test_direction_matters() {
        let a = lab_key(80, 443);
        let b = ConnectionKey::new(a.dst_addr, a.dst_port, a.src_addr, a.src_port);
        assert_ne!(a, b);
    }
}
