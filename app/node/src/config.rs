//! One serde-derived configuration tree per node role, loaded from TOML with
//! `serdeconv::from_toml_file`. Every field defaults to sensible values, so a
//! node runs with zero configuration for local testing.

use std::path::Path;

use serde_derive::{Deserialize, Serialize};

use v2x_core::net::nic::{DEFAULT_MTU, DEFAULT_RECEIVE_BUFFERS, DEFAULT_SEND_BUFFERS};

pub const DEFAULT_ETHER_TYPE: u16 = 888;
pub const DEFAULT_PORT: u16 = 7000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkDefaults {
    pub send_buffers: usize,
    pub receive_buffers: usize,
    pub mtu: usize,
    pub ether_type: u16,
}

impl Default for NetworkDefaults {
    fn default() -> Self {
        NetworkDefaults {
            send_buffers: DEFAULT_SEND_BUFFERS,
            receive_buffers: DEFAULT_RECEIVE_BUFFERS,
            mtu: DEFAULT_MTU,
            ether_type: DEFAULT_ETHER_TYPE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleConfig {
    pub id: u8,
    pub radius: f64,
    pub port: u16,
    pub trajectory_file: Option<String>,
    #[serde(default)]
    pub network: NetworkDefaults,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        VehicleConfig { id: 1, radius: 500.0, port: DEFAULT_PORT, trajectory_file: None, network: NetworkDefaults::default() }
    }
}

impl VehicleConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> VehicleConfig {
        serdeconv::from_toml_file(path).expect("error loading vehicle configuration file")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborRsuEntry {
    pub rsu_id: u8,
    pub key: [u8; 16],
    pub address: [u8; 6],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsuConfig {
    pub id: u8,
    pub unit: u32,
    pub period_ms: u64,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub key: [u8; 16],
    #[serde(default)]
    pub data: Vec<u8>,
    #[serde(default)]
    pub neighbor_rsus: Vec<NeighborRsuEntry>,
    #[serde(default)]
    pub network: NetworkDefaults,
}

impl Default for RsuConfig {
    fn default() -> Self {
        RsuConfig {
            id: 10,
            unit: 0,
            period_ms: 1000,
            x: 0.0,
            y: 0.0,
            radius: 1000.0,
            key: [0u8; 16],
            data: Vec::new(),
            neighbor_rsus: Vec::new(),
            network: NetworkDefaults::default(),
        }
    }
}

impl RsuConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> RsuConfig {
        serdeconv::from_toml_file(path).expect("error loading RSU configuration file")
    }
}
