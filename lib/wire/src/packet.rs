//! Bit-exact layout of the packet carried as the payload of every stack frame:
//!
//! ```text
//! offset 0:  Header        { from_port: u16, to_port: u16, size: u32 }   8 bytes
//! offset 8:  TimestampFields { is_clock_synchronized: bool, tx_timestamp: i64 }  16 bytes
//! offset 24: Coordinates   { x: f64, y: f64, radius: f64 }               24 bytes
//! offset 48: AuthFields    { mac: [u8; 16], has_mac: bool }              24 bytes
//! offset 72: message payload (size bytes)
//! ```

use byteorder::{BigEndian, ByteOrder};

pub type Port = u16;
pub type MacKey = [u8; 16];

pub const HEADER_SIZE: usize = 8;
pub const TIMESTAMP_FIELDS_SIZE: usize = 16;
pub const COORDINATES_SIZE: usize = 24;
pub const AUTH_FIELDS_SIZE: usize = 24;
pub const PACKET_PREFIX_SIZE: usize =
    HEADER_SIZE + TIMESTAMP_FIELDS_SIZE + COORDINATES_SIZE + AUTH_FIELDS_SIZE;

/// Offset of `tx_timestamp` within the packet prefix. The NIC fills this in-place
/// after the MAC has already been computed, so the offset must stay stable.
pub const TX_TIMESTAMP_OFFSET: usize = HEADER_SIZE + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub from_port: Port,
    pub to_port: Port,
    pub size: u32,
}

impl Header {
    pub fn write_to(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= HEADER_SIZE);
        BigEndian::write_u16(&mut out[0..2], self.from_port);
        BigEndian::write_u16(&mut out[2..4], self.to_port);
        BigEndian::write_u32(&mut out[4..8], self.size);
    }

    pub fn read_from(data: &[u8]) -> Header {
        Header {
            from_port: BigEndian::read_u16(&data[0..2]),
            to_port: BigEndian::read_u16(&data[2..4]),
            size: BigEndian::read_u32(&data[4..8]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimestampFields {
    pub is_clock_synchronized: bool,
    /// Microseconds since epoch, filled by the NIC on send.
    pub tx_timestamp_us: i64,
}

impl TimestampFields {
    pub fn write_to(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= TIMESTAMP_FIELDS_SIZE);
        out[0] = self.is_clock_synchronized as u8;
        for b in &mut out[1..8] {
            *b = 0;
        }
        BigEndian::write_i64(&mut out[8..16], self.tx_timestamp_us);
    }

    pub fn read_from(data: &[u8]) -> TimestampFields {
        TimestampFields {
            is_clock_synchronized: data[0] != 0,
            tx_timestamp_us: BigEndian::read_i64(&data[8..16]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

impl Coordinates {
    pub fn write_to(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= COORDINATES_SIZE);
        BigEndian::write_f64(&mut out[0..8], self.x);
        BigEndian::write_f64(&mut out[8..16], self.y);
        BigEndian::write_f64(&mut out[16..24], self.radius);
    }

    pub fn read_from(data: &[u8]) -> Coordinates {
        Coordinates {
            x: BigEndian::read_f64(&data[0..8]),
            y: BigEndian::read_f64(&data[8..16]),
            radius: BigEndian::read_f64(&data[16..24]),
        }
    }

    /// 2-D Euclidean distance used by the radius filter (P6).
    pub fn distance(&self, other_x: f64, other_y: f64) -> f64 {
        ((self.x - other_x).powi(2) + (self.y - other_y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuthFields {
    pub mac: MacKey,
    pub has_mac: bool,
}

impl AuthFields {
    pub const ZERO: AuthFields = AuthFields {
        mac: [0u8; 16],
        has_mac: false,
    };

    pub fn write_to(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= AUTH_FIELDS_SIZE);
        out[0..16].copy_from_slice(&self.mac);
        out[16] = self.has_mac as u8;
        for b in &mut out[17..24] {
            *b = 0;
        }
    }

    pub fn read_from(data: &[u8]) -> AuthFields {
        let mut mac = [0u8; 16];
        mac.copy_from_slice(&data[0..16]);
        AuthFields {
            mac,
            has_mac: data[16] != 0,
        }
    }
}

/// The full fixed-size prefix that precedes the message payload in every packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacketPrefix {
    pub header: Header,
    pub timestamps: TimestampFields,
    pub coordinates: Coordinates,
    pub auth: AuthFields,
}

impl PacketPrefix {
    pub fn write_to(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= PACKET_PREFIX_SIZE);
        self.header.write_to(&mut out[0..HEADER_SIZE]);
        self.timestamps
            .write_to(&mut out[HEADER_SIZE..HEADER_SIZE + TIMESTAMP_FIELDS_SIZE]);
        self.coordinates.write_to(
            &mut out[HEADER_SIZE + TIMESTAMP_FIELDS_SIZE
                ..HEADER_SIZE + TIMESTAMP_FIELDS_SIZE + COORDINATES_SIZE],
        );
        self.auth.write_to(&mut out[PACKET_PREFIX_SIZE - AUTH_FIELDS_SIZE..PACKET_PREFIX_SIZE]);
    }

    pub fn read_from(data: &[u8]) -> Option<PacketPrefix> {
        if data.len() < PACKET_PREFIX_SIZE {
            return None;
        }
        Some(PacketPrefix {
            header: Header::read_from(&data[0..HEADER_SIZE]),
            timestamps: TimestampFields::read_from(
                &data[HEADER_SIZE..HEADER_SIZE + TIMESTAMP_FIELDS_SIZE],
            ),
            coordinates: Coordinates::read_from(
                &data[HEADER_SIZE + TIMESTAMP_FIELDS_SIZE
                    ..HEADER_SIZE + TIMESTAMP_FIELDS_SIZE + COORDINATES_SIZE],
            ),
            auth: AuthFields::read_from(&data[PACKET_PREFIX_SIZE - AUTH_FIELDS_SIZE..PACKET_PREFIX_SIZE]),
        })
    }

    /// Overwrites `tx_timestamp` in place at its fixed wire offset, without touching
    /// any other field (in particular, without invalidating an already-computed MAC).
    pub fn stamp_tx_timestamp(out: &mut [u8], tx_timestamp_us: i64) {
        BigEndian::write_i64(
            &mut out[TX_TIMESTAMP_OFFSET..TX_TIMESTAMP_OFFSET + 8],
            tx_timestamp_us,
        );
    }

    pub fn read_tx_timestamp(data: &[u8]) -> i64 {
        BigEndian::read_i64(&data[TX_TIMESTAMP_OFFSET..TX_TIMESTAMP_OFFSET + 8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PacketPrefix {
        PacketPrefix {
            header: Header {
                from_port: 7000,
                to_port: 60000,
                size: 128,
            },
            timestamps: TimestampFields {
                is_clock_synchronized: true,
                tx_timestamp_us: 123_456_789,
            },
            coordinates: Coordinates {
                x: 10.5,
                y: -3.25,
                radius: 400.0,
            },
            auth: AuthFields {
                mac: [7u8; 16],
                has_mac: true,
            },
        }
    }

    #[test]
    fn roundtrips_packet_prefix() {
        let prefix = sample();
        let mut buf = [0u8; PACKET_PREFIX_SIZE];
        prefix.write_to(&mut buf);
        let decoded = PacketPrefix::read_from(&buf).unwrap();
        assert_eq!(decoded, prefix);
    }

    #[test]
    fn stamps_tx_timestamp_without_disturbing_other_fields() {
        let prefix = sample();
        let mut buf = [0u8; PACKET_PREFIX_SIZE];
        prefix.write_to(&mut buf);

        PacketPrefix::stamp_tx_timestamp(&mut buf, 999);

        assert_eq!(PacketPrefix::read_tx_timestamp(&buf), 999);
        let decoded = PacketPrefix::read_from(&buf).unwrap();
        assert_eq!(decoded.auth, prefix.auth);
        assert_eq!(decoded.coordinates, prefix.coordinates);
        assert_eq!(decoded.header, prefix.header);
        assert!(decoded.timestamps.is_clock_synchronized);
    }

    #[test]
    fn euclidean_distance_matches_pythagoras() {
        let c = Coordinates {
            x: 0.0,
            y: 0.0,
            radius: 100.0,
        };
        assert!((c.distance(3.0, 4.0) - 5.0).abs() < 1e-9);
    }
}
