//! Wires one vehicle node end-to-end: NIC over a simulated engine, Clock,
//! LocationService, VehicleRsuManager, and Protocol, plus the periodic
//! known-RSU cleanup task the concurrency model calls for.

use std::sync::Arc;

use slog::{info, Logger};

use v2x_core::clock::{Clock, ClockConfig};
use v2x_core::framework::vehicle_rsu_manager::VehicleRsuManager;
use v2x_core::leader_key_storage::LeaderKeyStorage;
use v2x_core::location_service::LocationService;
use v2x_core::net::engine::{Bus, SimulatedEngine};
use v2x_core::net::nic::{Nic, NicConfig};
use v2x_core::net::protocol::{EntityType, Protocol};
use v2x_core::periodic::PeriodicTask;
use v2x_wire::ethernet::Address;

use crate::config::VehicleConfig;

pub const CLEANUP_PERIOD_US: u64 = 2_000_000;

pub struct VehicleNode {
    pub protocol: Arc<Protocol<SimulatedEngine>>,
    pub vehicle_rsu_manager: Arc<VehicleRsuManager>,
    pub clock: Arc<Clock>,
    cleanup_task: PeriodicTask,
}

impl VehicleNode {
    pub fn start(bus: Arc<Bus>, config: &VehicleConfig, log: Logger) -> VehicleNode {
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
        clock.set_self_id(config.id);

        let location_service = Arc::new(LocationService::new());
        if let Some(path) = &config.trajectory_file {
            if let Err(err) = location_service.load_trajectory(path) {
                info!(log, "trajectory file could not be loaded, using manual coordinates"; "error" => format!("{:?}", err));
            }
        }

        let vehicle_rsu_manager = Arc::new(VehicleRsuManager::new(
            Arc::clone(&leader_key_storage),
            Arc::clone(&clock),
            Arc::clone(&location_service),
            log.clone(),
        ));

        let protocol = Protocol::new(
            nic,
            EntityType::Vehicle,
            leader_key_storage,
            Arc::clone(&clock),
            location_service,
            Some(Arc::clone(&vehicle_rsu_manager)),
            log.clone(),
        );

        let cleanup_manager = Arc::clone(&vehicle_rsu_manager);
        let cleanup_task = PeriodicTask::start(CLEANUP_PERIOD_US, move || cleanup_manager.prune_stale_rsus());

        info!(log, "vehicle node started"; "id" => config.id, "radius" => config.radius);

        VehicleNode { protocol, vehicle_rsu_manager, clock, cleanup_task }
    }

    pub fn stop(&self) {
        self.cleanup_task.join();
    }
}
