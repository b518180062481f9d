use byteorder::{BigEndian, ByteOrder};
use std::fmt;

pub const MAC_SIZE: usize = 6;
pub const MTU: usize = 1500;
pub const HEADER_SIZE: usize = MAC_SIZE * 2 + 2;

pub type EtherType = u16;

/// 6-byte physical address. The broadcast value is all-ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; MAC_SIZE]);

impl Address {
    pub const NULL: Address = Address([0; MAC_SIZE]);
    pub const BROADCAST: Address = Address([0xff; MAC_SIZE]);

    pub fn new(bytes: [u8; MAC_SIZE]) -> Address {
        Address(bytes)
    }

    /// Builds a locally-administered address whose last byte is `id`, matching the
    /// convention the source uses to derive a node's PTP leader id from its own MAC.
    pub fn from_id(id: u8) -> Address {
        Address([0x02, 0x00, 0x00, 0x00, 0x00, id])
    }

    /// Last byte of the address; used throughout the stack as a compact leader id.
    pub fn leader_id(&self) -> u8 {
        self.0[MAC_SIZE - 1]
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Address::BROADCAST
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i != 0 {
                write!(f, ":")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

/// Ethernet frame header, wire-exact: dst, src, ether-type.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub dst: Address,
    pub src: Address,
    pub ether_type: EtherType,
}

impl FrameHeader {
    pub fn write_to(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= HEADER_SIZE);
        out[0..MAC_SIZE].copy_from_slice(&self.dst.0);
        out[MAC_SIZE..MAC_SIZE * 2].copy_from_slice(&self.src.0);
        BigEndian::write_u16(&mut out[MAC_SIZE * 2..HEADER_SIZE], self.ether_type);
    }

    pub fn read_from(data: &[u8]) -> Option<FrameHeader> {
        if data.len() < HEADER_SIZE {
            return None;
        }
        let mut dst = [0u8; MAC_SIZE];
        let mut src = [0u8; MAC_SIZE];
        dst.copy_from_slice(&data[0..MAC_SIZE]);
        src.copy_from_slice(&data[MAC_SIZE..MAC_SIZE * 2]);
        let ether_type = BigEndian::read_u16(&data[MAC_SIZE * 2..HEADER_SIZE]);
        Some(FrameHeader {
            dst: Address(dst),
            src: Address(src),
            ether_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_frame_header() {
        let header = FrameHeader {
            dst: Address::BROADCAST,
            src: Address::from_id(42),
            ether_type: 0x0378,
        };
        let mut buf = [0u8; HEADER_SIZE];
        header.write_to(&mut buf);
        let decoded = FrameHeader::read_from(&buf).unwrap();
        assert_eq!(decoded.dst, Address::BROADCAST);
        assert_eq!(decoded.src.leader_id(), 42);
        assert_eq!(decoded.ether_type, 0x0378);
    }

    #[test]
    fn formats_address_as_colon_hex() {
        assert_eq!(Address::BROADCAST.to_string(), "FF:FF:FF:FF:FF:FF");
    }
}
