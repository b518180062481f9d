//! Wires one RSU node end-to-end: NIC over a simulated engine, Clock,
//! LocationService, and the periodic STATUS broadcaster.

use std::sync::Arc;

use slog::{info, Logger};

use v2x_core::clock::{Clock, ClockConfig};
use v2x_core::framework::rsu_broadcaster::{NeighborRsuConfig, RsuBroadcaster, RsuBroadcasterConfig};
use v2x_core::leader_key_storage::LeaderKeyStorage;
use v2x_core::location_service::LocationService;
use v2x_core::net::engine::{Bus, SimulatedEngine};
use v2x_core::net::nic::{Nic, NicConfig};
use v2x_core::net::protocol::{EntityType, Protocol, CONTROL_PORT};
use v2x_core::ProtocolAddress;
use v2x_wire::ethernet::Address;

use crate::config::RsuConfig;

pub struct RsuNode {
    pub protocol: Arc<Protocol<SimulatedEngine>>,
    pub clock: Arc<Clock>,
    broadcaster: Arc<RsuBroadcaster<SimulatedEngine>>,
}

impl RsuNode {
    pub fn start(bus: Arc<Bus>, config: &RsuConfig, log: Logger) -> RsuNode {
        let engine = SimulatedEngine::new(bus, Address::from_id(config.id));
        let nic_config = NicConfig {
            send_buffers: config.network.send_buffers,
            receive_buffers: config.network.receive_buffers,
            mtu: config.network.mtu,
            ether_type: config.network.ether_type,
            radius: config.radius,
        };
        let nic = Nic::new(engine, nic_config, log.clone());
        nic.start();

        let leader_key_storage = Arc::new(LeaderKeyStorage::new());
        let clock = Arc::new(Clock::new(Arc::clone(&leader_key_storage), ClockConfig::default()));

        let location_service = Arc::new(LocationService::new());
        location_service.set_current_coordinates(config.x, config.y);

        let protocol = Protocol::new(
            Arc::clone(&nic),
            EntityType::Rsu,
            Arc::clone(&leader_key_storage),
            Arc::clone(&clock),
            location_service,
            None,
            log.clone(),
        );

        let neighbor_rsus = config
            .neighbor_rsus
            .iter()
            .map(|n| NeighborRsuConfig { rsu_id: n.rsu_id, key: n.key, address: ProtocolAddress::new(Address::new(n.address), CONTROL_PORT) })
            .collect();

        let broadcaster_config = RsuBroadcasterConfig {
            rsu_id: config.id,
            unit: config.unit,
            period_us: config.period_ms * 1000,
            x: config.x,
            y: config.y,
            radius: config.radius,
            key: config.key,
            data: config.data.clone(),
            neighbor_rsus,
        };

        let broadcaster = RsuBroadcaster::new(nic, Arc::clone(&protocol), leader_key_storage, Arc::clone(&clock), broadcaster_config, log.clone());
        broadcaster.start();

        info!(log, "rsu node started"; "id" => config.id, "period_ms" => config.period_ms);

        RsuNode { protocol, clock, broadcaster }
    }

    pub fn stop(&self) {
        self.broadcaster.stop();
    }
}
