//! Keyed message authentication over the packet's authenticated field subset.
//!
//! The source computes an XOR-folded, XOR-keyed digest over the same field subset;
//! this rewrite substitutes a real keyed primitive (BLAKE2s in keyed mode, truncated
//! to the 16-byte wire width the packet format reserves) per the design notes. The
//! field ordering and exclusions (tx_timestamp, Header.size, AuthFields) are unchanged.

use crate::packet::{Coordinates, Header, MacKey, TimestampFields};
use blake2::digest::consts::U16;
use blake2::digest::{FixedOutput, KeyInit, Mac, Update};
use blake2::Blake2sMac;

type Blake2sMac128 = Blake2sMac<U16>;

/// Computes the 16-byte MAC over `from_port`, `to_port`, `is_clock_synchronized`,
/// the full `Coordinates`, and the message payload, keyed with `key`.
pub fn compute(
    header: &Header,
    timestamps: &TimestampFields,
    coordinates: &Coordinates,
    payload: &[u8],
    key: &MacKey,
) -> MacKey {
    let mut mac =
        Blake2sMac128::new_from_slice(key).expect("16-byte key is always a valid blake2s key");

    mac.update(&header.from_port.to_be_bytes());
    mac.update(&header.to_port.to_be_bytes());
    mac.update(&[timestamps.is_clock_synchronized as u8]);

    let mut coords_buf = [0u8; 24];
    coordinates.write_to(&mut coords_buf);
    mac.update(&coords_buf);

    mac.update(payload);

    let digest = mac.finalize_fixed();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

/// Recomputes the MAC with `key` and compares in constant time against `received`.
pub fn verify(
    header: &Header,
    timestamps: &TimestampFields,
    coordinates: &Coordinates,
    payload: &[u8],
    received: &MacKey,
    key: &MacKey,
) -> bool {
    let mut mac =
        Blake2sMac128::new_from_slice(key).expect("16-byte key is always a valid blake2s key");

    mac.update(&header.from_port.to_be_bytes());
    mac.update(&header.to_port.to_be_bytes());
    mac.update(&[timestamps.is_clock_synchronized as u8]);

    let mut coords_buf = [0u8; 24];
    coordinates.write_to(&mut coords_buf);
    mac.update(&coords_buf);

    mac.update(payload);

    mac.verify_slice(received).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (Header, TimestampFields, Coordinates, Vec<u8>, MacKey) {
        let header = Header {
            from_port: 1,
            to_port: 2,
            size: 4,
        };
        let timestamps = TimestampFields {
            is_clock_synchronized: true,
            tx_timestamp_us: 555,
        };
        let coordinates = Coordinates {
            x: 1.0,
            y: 2.0,
            radius: 300.0,
        };
        let payload = vec![1, 2, 3, 4];
        let key = [9u8; 16];
        (header, timestamps, coordinates, payload, key)
    }

    #[test]
    fn verifies_its_own_computed_mac() {
        let (header, timestamps, coordinates, payload, key) = fixture();
        let mac = compute(&header, &timestamps, &coordinates, &payload, &key);
        assert!(verify(&header, &timestamps, &coordinates, &payload, &mac, &key));
    }

    #[test]
    fn rejects_payload_bit_flip() {
        let (header, timestamps, coordinates, mut payload, key) = fixture();
        let mac = compute(&header, &timestamps, &coordinates, &payload, &key);
        payload[0] ^= 0x01;
        assert!(!verify(&header, &timestamps, &coordinates, &payload, &mac, &key));
    }

    #[test]
    fn rejects_coordinate_bit_flip() {
        let (header, timestamps, mut coordinates, payload, key) = fixture();
        let mac = compute(&header, &timestamps, &coordinates, &payload, &key);
        coordinates.x += 0.5;
        assert!(!verify(&header, &timestamps, &coordinates, &payload, &mac, &key));
    }

    #[test]
    fn ignores_header_size_field() {
        // `size` is deliberately excluded from the authenticated subset.
        let (mut header, timestamps, coordinates, payload, key) = fixture();
        let mac = compute(&header, &timestamps, &coordinates, &payload, &key);
        header.size = 9999;
        assert!(verify(&header, &timestamps, &coordinates, &payload, &mac, &key));
    }

    #[test]
    fn ignores_tx_timestamp() {
        // tx_timestamp is filled in by the NIC after the MAC is computed.
        let (header, mut timestamps, coordinates, payload, key) = fixture();
        let mac = compute(&header, &timestamps, &coordinates, &payload, &key);
        timestamps.tx_timestamp_us = 987654;
        assert!(verify(&header, &timestamps, &coordinates, &payload, &mac, &key));
    }

    #[test]
    fn rejects_wrong_key() {
        let (header, timestamps, coordinates, payload, key) = fixture();
        let mac = compute(&header, &timestamps, &coordinates, &payload, &key);
        let wrong_key = [8u8; 16];
        assert!(!verify(&header, &timestamps, &coordinates, &payload, &mac, &wrong_key));
    }
}
