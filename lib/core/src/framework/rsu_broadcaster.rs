//! The RSU side of the RSU-anchored leader model. On start, marks itself as
//! the leader in `LeaderKeyStorage` (so its own Clock short-circuits to
//! synchronized), registers its id with Clock, loads its neighbor-RSU registry
//! from configuration, and launches a periodic STATUS broadcast. On stop, joins
//! the broadcast task, releases its communicator, and stops the NIC.

use std::sync::{Arc, Mutex};

use slog::Logger;

use v2x_wire::message::{CommonHeader, Message, Origin};
use v2x_wire::packet::MacKey;
use v2x_wire::time::now_us;

use crate::address::ProtocolAddress;
use crate::clock::Clock;
use crate::leader_key_storage::LeaderKeyStorage;
use crate::net::communicator::Communicator;
use crate::net::engine::Engine;
use crate::net::nic::Nic;
use crate::net::protocol::{Protocol, CONTROL_PORT};
use crate::periodic::PeriodicTask;

/// A neighbor RSU loaded from configuration, not discovered: enumeration is
/// caller-supplied rather than synthesized from a hard-coded id range.
#[derive(Debug, Clone, Copy)]
pub struct NeighborRsuConfig {
    pub rsu_id: u8,
    pub key: MacKey,
    pub address: ProtocolAddress,
}

#[derive(Debug, Clone)]
pub struct RsuBroadcasterConfig {
    pub rsu_id: u8,
    pub unit: u32,
    pub period_us: u64,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub key: MacKey,
    pub data: Vec<u8>,
    pub neighbor_rsus: Vec<NeighborRsuConfig>,
}

impl Default for RsuBroadcasterConfig {
    fn default() -> Self {
        RsuBroadcasterConfig {
            rsu_id: 0,
            unit: 0,
            period_us: 1_000_000,
            x: 0.0,
            y: 0.0,
            radius: 0.0,
            key: [0u8; 16],
            data: Vec::new(),
            neighbor_rsus: Vec::new(),
        }
    }
}

pub struct RsuBroadcaster<E: Engine> {
    nic: Arc<Nic<E>>,
    protocol: Arc<Protocol<E>>,
    leader_key_storage: Arc<LeaderKeyStorage>,
    clock: Arc<Clock>,
    communicator: Arc<Communicator<E>>,
    config: RsuBroadcasterConfig,
    task: Mutex<Option<PeriodicTask>>,
    log: Logger,
}

impl<E: Engine> RsuBroadcaster<E> {
    pub fn new(
        nic: Arc<Nic<E>>,
        protocol: Arc<Protocol<E>>,
        leader_key_storage: Arc<LeaderKeyStorage>,
        clock: Arc<Clock>,
        config: RsuBroadcasterConfig,
        log: Logger,
    ) -> Arc<RsuBroadcaster<E>> {
        let communicator = Communicator::new(Arc::clone(&protocol), ProtocolAddress::new(protocol.own_address(), CONTROL_PORT));
        Arc::new(RsuBroadcaster {
            nic,
            protocol,
            leader_key_storage,
            clock,
            communicator,
            config,
            task: Mutex::new(None),
            log,
        })
    }

    pub fn start(self: &Arc<Self>) {
        self.leader_key_storage.set(self.protocol.own_address(), self.config.key);
        self.clock.set_self_id(self.config.rsu_id);
        for neighbor in &self.config.neighbor_rsus {
            self.protocol.add_neighbor_rsu(neighbor.rsu_id, neighbor.key, neighbor.address);
        }

        let broadcaster = Arc::clone(self);
        let task = PeriodicTask::start(self.config.period_us, move || broadcaster.broadcast_status());
        *self.task.lock().unwrap() = Some(task);

        slog::info!(self.log, "rsu broadcaster started"; "rsu_id" => self.config.rsu_id, "period_us" => self.config.period_us);
    }

    fn broadcast_status(&self) {
        let message = Message::Status {
            common: CommonHeader {
                origin: Origin { address: self.protocol.own_address(), port: CONTROL_PORT },
                timestamp_us: now_us(),
                unit: self.config.unit,
            },
            x: self.config.x,
            y: self.config.y,
            radius: self.config.radius,
            key: self.config.key,
            data: self.config.data.clone(),
        };
        self.communicator.send(&message);
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.join();
        }
        self.communicator.release();
        self.nic.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockConfig;
    use crate::location_service::LocationService;
    use crate::net::engine::{Bus, SimulatedEngine};
    use crate::net::nic::NicConfig;
    use crate::net::protocol::EntityType;
    use v2x_wire::ethernet::Address;
    use v2x_wire::logging::default_logger;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn start_marks_self_leader_and_broadcasts_status() {
        let bus = Bus::new();
        let engine = SimulatedEngine::new(Arc::clone(&bus), Address::from_id(10));
        let nic = Nic::new(engine, NicConfig { radius: 1000.0, ..NicConfig::default() }, default_logger());
        nic.start();

        let leader_key_storage = Arc::new(LeaderKeyStorage::new());
        let clock = Arc::new(Clock::new(Arc::clone(&leader_key_storage), ClockConfig::default()));
        let location_service = Arc::new(LocationService::new());
        let protocol = Protocol::new(Arc::clone(&nic), EntityType::Rsu, Arc::clone(&leader_key_storage), Arc::clone(&clock), location_service, None, default_logger());

        let key = [9u8; 16];
        let config = RsuBroadcasterConfig { rsu_id: 10, key, period_us: 20_000, radius: 1000.0, ..Default::default() };
        let broadcaster = RsuBroadcaster::new(nic, Arc::clone(&protocol), Arc::clone(&leader_key_storage), Arc::clone(&clock), config, default_logger());

        // A listening vehicle observing the control port directly.
        let vehicle_engine = SimulatedEngine::new(Arc::clone(&bus), Address::from_id(1));
        let vehicle_nic = Nic::new(vehicle_engine, NicConfig { radius: 1000.0, ..NicConfig::default() }, default_logger());
        vehicle_nic.start();
        let vehicle_storage = Arc::new(LeaderKeyStorage::new());
        let vehicle_clock = Arc::new(Clock::new(Arc::clone(&vehicle_storage), ClockConfig::default()));
        let vehicle_location = Arc::new(LocationService::new());
        let vehicle_manager = Arc::new(crate::framework::vehicle_rsu_manager::VehicleRsuManager::new(
            Arc::clone(&vehicle_storage),
            Arc::clone(&vehicle_clock),
            Arc::clone(&vehicle_location),
            default_logger(),
        ));
        let vehicle_protocol = Protocol::new(vehicle_nic, EntityType::Vehicle, vehicle_storage, vehicle_clock, vehicle_location, Some(Arc::clone(&vehicle_manager)), default_logger());
        let _ = vehicle_protocol;

        broadcaster.start();
        thread::sleep(Duration::from_millis(120));

        assert_eq!(leader_key_storage.leader(), Address::from_id(10));
        assert!(vehicle_manager.has_known_rsu());
        assert_eq!(vehicle_manager.current_leader().unwrap().physical, Address::from_id(10));

        broadcaster.stop();
    }

    #[test]
    fn configured_neighbors_are_registered_with_protocol() {
        let bus = Bus::new();
        let engine = SimulatedEngine::new(Arc::clone(&bus), Address::from_id(10));
        let nic = Nic::new(engine, NicConfig { radius: 1000.0, ..NicConfig::default() }, default_logger());
        nic.start();

        let leader_key_storage = Arc::new(LeaderKeyStorage::new());
        let clock = Arc::new(Clock::new(Arc::clone(&leader_key_storage), ClockConfig::default()));
        let location_service = Arc::new(LocationService::new());
        let protocol = Protocol::new(Arc::clone(&nic), EntityType::Rsu, Arc::clone(&leader_key_storage), Arc::clone(&clock), location_service, None, default_logger());

        let neighbor = NeighborRsuConfig { rsu_id: 20, key: [3u8; 16], address: ProtocolAddress::new(Address::from_id(20), CONTROL_PORT) };
        let config = RsuBroadcasterConfig { rsu_id: 10, period_us: 5_000_000, neighbor_rsus: vec![neighbor], ..Default::default() };
        let broadcaster = RsuBroadcaster::new(nic, Arc::clone(&protocol), leader_key_storage, clock, config, default_logger());
        broadcaster.start();
        // Recovery of a registered neighbor's key through a REQ round trip is
        // exercised end-to-end by `req_key_response_round_trip_recovers_neighbor_key`
        // in protocol.rs; here we only assert the broadcaster starts without panicking.
        broadcaster.stop();
    }
}
