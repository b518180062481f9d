//! The application-level message carried inside a packet's payload.
//!
//! Every message starts with a one-byte type tag, followed by a common header
//! (origin address/port, a microsecond timestamp, and a 32-bit unit tag), and then
//! type-specific fields. `Req` is the one exception worth calling out: it still
//! carries the common header, but its own authenticated subset (the *failed*
//! header/timestamps/coordinates/payload/mac) is what a leader RSU re-verifies
//! against its neighbor keys, not anything about the REQ frame itself.

use crate::ethernet::{Address, MAC_SIZE};
use crate::packet::{Coordinates, Header, MacKey, Port, TimestampFields, COORDINATES_SIZE, HEADER_SIZE, TIMESTAMP_FIELDS_SIZE};
use byteorder::{BigEndian, ByteOrder};

pub const TAG_UNKNOWN: u8 = 0;
pub const TAG_INVALID: u8 = 1;
pub const TAG_INTEREST: u8 = 2;
pub const TAG_RESPONSE: u8 = 3;
pub const TAG_STATUS: u8 = 4;
pub const TAG_REQ: u8 = 5;
pub const TAG_KEY_RESPONSE: u8 = 6;
pub const TAG_PTP: u8 = 7;
pub const TAG_JOIN: u8 = 8;

pub const ORIGIN_SIZE: usize = MAC_SIZE + 2;
pub const COMMON_HEADER_SIZE: usize = ORIGIN_SIZE + 8 + 4;

/// The physical origin of a message: the sending node's MAC plus source port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Origin {
    pub address: Address,
    pub port: Port,
}

impl Origin {
    fn write_to(&self, out: &mut [u8]) {
        out[0..MAC_SIZE].copy_from_slice(&self.address.0);
        BigEndian::write_u16(&mut out[MAC_SIZE..ORIGIN_SIZE], self.port);
    }

    fn read_from(data: &[u8]) -> Origin {
        let mut bytes = [0u8; MAC_SIZE];
        bytes.copy_from_slice(&data[0..MAC_SIZE]);
        Origin {
            address: Address::new(bytes),
            port: BigEndian::read_u16(&data[MAC_SIZE..ORIGIN_SIZE]),
        }
    }
}

/// Fields common to every message type: who sent it, when, and which logical unit
/// it concerns (a sensor id for INTEREST/RESPONSE, unused by the rest).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonHeader {
    pub origin: Origin,
    pub timestamp_us: i64,
    pub unit: u32,
}

impl CommonHeader {
    fn write_to(&self, out: &mut [u8]) {
        self.origin.write_to(&mut out[0..ORIGIN_SIZE]);
        BigEndian::write_i64(&mut out[ORIGIN_SIZE..ORIGIN_SIZE + 8], self.timestamp_us);
        BigEndian::write_u32(&mut out[ORIGIN_SIZE + 8..COMMON_HEADER_SIZE], self.unit);
    }

    fn read_from(data: &[u8]) -> CommonHeader {
        CommonHeader {
            origin: Origin::read_from(&data[0..ORIGIN_SIZE]),
            timestamp_us: BigEndian::read_i64(&data[ORIGIN_SIZE..ORIGIN_SIZE + 8]),
            unit: BigEndian::read_u32(&data[ORIGIN_SIZE + 8..COMMON_HEADER_SIZE]),
        }
    }
}

/// The failed authenticated subset a REQ carries back to the leader RSU so it can
/// be re-verified against each neighbor's key.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedAuth {
    pub header: Header,
    pub timestamps: TimestampFields,
    pub coordinates: Coordinates,
    pub payload: Vec<u8>,
    pub mac: MacKey,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Unknown,
    Invalid,
    Interest {
        common: CommonHeader,
        period_us: i64,
    },
    Response {
        common: CommonHeader,
        value: f64,
    },
    Status {
        common: CommonHeader,
        x: f64,
        y: f64,
        radius: f64,
        key: MacKey,
        data: Vec<u8>,
    },
    Req {
        common: CommonHeader,
        failed: FailedAuth,
    },
    KeyResponse {
        common: CommonHeader,
        key: MacKey,
    },
    Ptp {
        common: CommonHeader,
    },
    /// Peer-discovery advertisement used by the `StatusManager` leader model
    /// (an alternative to RSU-anchored leader election): `common.unit` carries
    /// the sender's age/seniority rank, `key` its candidate group key.
    Join {
        common: CommonHeader,
        key: MacKey,
    },
}

impl Message {
    pub fn tag(&self) -> u8 {
        match self {
            Message::Unknown => TAG_UNKNOWN,
            Message::Invalid => TAG_INVALID,
            Message::Interest { .. } => TAG_INTEREST,
            Message::Response { .. } => TAG_RESPONSE,
            Message::Status { .. } => TAG_STATUS,
            Message::Req { .. } => TAG_REQ,
            Message::KeyResponse { .. } => TAG_KEY_RESPONSE,
            Message::Ptp { .. } => TAG_PTP,
            Message::Join { .. } => TAG_JOIN,
        }
    }

    /// Whether the first payload byte identifies this as an authenticated message
    /// type. Only RESPONSE requires a valid MAC in the current policy; this is
    /// exposed as a free function so callers can flip the policy without touching
    /// the wire format.
    pub fn tag_requires_auth(tag: u8) -> bool {
        tag == TAG_RESPONSE
    }

    pub fn common(&self) -> Option<&CommonHeader> {
        match self {
            Message::Unknown | Message::Invalid => None,
            Message::Interest { common, .. }
            | Message::Response { common, .. }
            | Message::Status { common, .. }
            | Message::Req { common, .. }
            | Message::KeyResponse { common, .. }
            | Message::Ptp { common }
            | Message::Join { common, .. } => Some(common),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.tag()];
        match self {
            Message::Unknown | Message::Invalid => {}
            Message::Interest { common, period_us } => {
                let mut header = [0u8; COMMON_HEADER_SIZE];
                common.write_to(&mut header);
                out.extend_from_slice(&header);
                let mut buf = [0u8; 8];
                BigEndian::write_i64(&mut buf, *period_us);
                out.extend_from_slice(&buf);
            }
            Message::Response { common, value } => {
                let mut header = [0u8; COMMON_HEADER_SIZE];
                common.write_to(&mut header);
                out.extend_from_slice(&header);
                let mut buf = [0u8; 8];
                BigEndian::write_f64(&mut buf, *value);
                out.extend_from_slice(&buf);
            }
            Message::Status { common, x, y, radius, key, data } => {
                let mut header = [0u8; COMMON_HEADER_SIZE];
                common.write_to(&mut header);
                out.extend_from_slice(&header);
                let mut coords = [0u8; COORDINATES_SIZE];
                Coordinates { x: *x, y: *y, radius: *radius }.write_to(&mut coords);
                out.extend_from_slice(&coords);
                out.extend_from_slice(key);
                let mut len_buf = [0u8; 2];
                BigEndian::write_u16(&mut len_buf, data.len() as u16);
                out.extend_from_slice(&len_buf);
                out.extend_from_slice(data);
            }
            Message::Req { common, failed } => {
                let mut header = [0u8; COMMON_HEADER_SIZE];
                common.write_to(&mut header);
                out.extend_from_slice(&header);
                let mut fh = [0u8; HEADER_SIZE];
                failed.header.write_to(&mut fh);
                out.extend_from_slice(&fh);
                let mut ft = [0u8; TIMESTAMP_FIELDS_SIZE];
                failed.timestamps.write_to(&mut ft);
                out.extend_from_slice(&ft);
                let mut fc = [0u8; COORDINATES_SIZE];
                failed.coordinates.write_to(&mut fc);
                out.extend_from_slice(&fc);
                out.extend_from_slice(&failed.payload);
                out.extend_from_slice(&failed.mac);
            }
            Message::KeyResponse { common, key } => {
                let mut header = [0u8; COMMON_HEADER_SIZE];
                common.write_to(&mut header);
                out.extend_from_slice(&header);
                out.extend_from_slice(key);
            }
            Message::Ptp { common } => {
                let mut header = [0u8; COMMON_HEADER_SIZE];
                common.write_to(&mut header);
                out.extend_from_slice(&header);
            }
            Message::Join { common, key } => {
                let mut header = [0u8; COMMON_HEADER_SIZE];
                common.write_to(&mut header);
                out.extend_from_slice(&header);
                out.extend_from_slice(key);
            }
        }
        out
    }

    pub fn decode(data: &[u8]) -> Message {
        if data.is_empty() {
            return Message::Invalid;
        }
        let tag = data[0];
        let rest = &data[1..];
        match tag {
            TAG_UNKNOWN => Message::Unknown,
            TAG_INTEREST => {
                if rest.len() < COMMON_HEADER_SIZE + 8 {
                    return Message::Invalid;
                }
                let common = CommonHeader::read_from(&rest[0..COMMON_HEADER_SIZE]);
                let period_us = BigEndian::read_i64(&rest[COMMON_HEADER_SIZE..COMMON_HEADER_SIZE + 8]);
                Message::Interest { common, period_us }
            }
            TAG_RESPONSE => {
                if rest.len() < COMMON_HEADER_SIZE + 8 {
                    return Message::Invalid;
                }
                let common = CommonHeader::read_from(&rest[0..COMMON_HEADER_SIZE]);
                let value = BigEndian::read_f64(&rest[COMMON_HEADER_SIZE..COMMON_HEADER_SIZE + 8]);
                Message::Response { common, value }
            }
            TAG_STATUS => {
                let fixed = COMMON_HEADER_SIZE + COORDINATES_SIZE + 16 + 2;
                if rest.len() < fixed {
                    return Message::Invalid;
                }
                let common = CommonHeader::read_from(&rest[0..COMMON_HEADER_SIZE]);
                let coords = Coordinates::read_from(
                    &rest[COMMON_HEADER_SIZE..COMMON_HEADER_SIZE + COORDINATES_SIZE],
                );
                let key_start = COMMON_HEADER_SIZE + COORDINATES_SIZE;
                let mut key = [0u8; 16];
                key.copy_from_slice(&rest[key_start..key_start + 16]);
                let len_start = key_start + 16;
                let data_len = BigEndian::read_u16(&rest[len_start..len_start + 2]) as usize;
                let data_start = len_start + 2;
                if rest.len() < data_start + data_len {
                    return Message::Invalid;
                }
                Message::Status {
                    common,
                    x: coords.x,
                    y: coords.y,
                    radius: coords.radius,
                    key,
                    data: rest[data_start..data_start + data_len].to_vec(),
                }
            }
            TAG_REQ => {
                let fixed = COMMON_HEADER_SIZE + HEADER_SIZE + TIMESTAMP_FIELDS_SIZE + COORDINATES_SIZE;
                if rest.len() < fixed + 16 {
                    return Message::Invalid;
                }
                let common = CommonHeader::read_from(&rest[0..COMMON_HEADER_SIZE]);
                let mut offset = COMMON_HEADER_SIZE;
                let failed_header = Header::read_from(&rest[offset..offset + HEADER_SIZE]);
                offset += HEADER_SIZE;
                let failed_timestamps =
                    TimestampFields::read_from(&rest[offset..offset + TIMESTAMP_FIELDS_SIZE]);
                offset += TIMESTAMP_FIELDS_SIZE;
                let failed_coordinates = Coordinates::read_from(&rest[offset..offset + COORDINATES_SIZE]);
                offset += COORDINATES_SIZE;
                let payload_len = failed_header.size as usize;
                if rest.len() < offset + payload_len + 16 {
                    return Message::Invalid;
                }
                let payload = rest[offset..offset + payload_len].to_vec();
                offset += payload_len;
                let mut mac = [0u8; 16];
                mac.copy_from_slice(&rest[offset..offset + 16]);
                Message::Req {
                    common,
                    failed: FailedAuth {
                        header: failed_header,
                        timestamps: failed_timestamps,
                        coordinates: failed_coordinates,
                        payload,
                        mac,
                    },
                }
            }
            TAG_KEY_RESPONSE => {
                if rest.len() < COMMON_HEADER_SIZE + 16 {
                    return Message::Invalid;
                }
                let common = CommonHeader::read_from(&rest[0..COMMON_HEADER_SIZE]);
                let mut key = [0u8; 16];
                key.copy_from_slice(&rest[COMMON_HEADER_SIZE..COMMON_HEADER_SIZE + 16]);
                Message::KeyResponse { common, key }
            }
            TAG_PTP => {
                if rest.len() < COMMON_HEADER_SIZE {
                    return Message::Invalid;
                }
                Message::Ptp { common: CommonHeader::read_from(&rest[0..COMMON_HEADER_SIZE]) }
            }
            TAG_JOIN => {
                if rest.len() < COMMON_HEADER_SIZE + 16 {
                    return Message::Invalid;
                }
                let common = CommonHeader::read_from(&rest[0..COMMON_HEADER_SIZE]);
                let mut key = [0u8; 16];
                key.copy_from_slice(&rest[COMMON_HEADER_SIZE..COMMON_HEADER_SIZE + 16]);
                Message::Join { common, key }
            }
            _ => Message::Invalid,
        }
    }
}
