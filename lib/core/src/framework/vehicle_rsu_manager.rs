//! Known-RSU table, distance-ranked leader selection, and neighbor-key cache for
//! a vehicle node.

use std::sync::{Arc, Mutex};

use slog::{info, Logger};
use v2x_wire::packet::MacKey;
use v2x_wire::time::now_us;

use crate::address::ProtocolAddress;
use crate::clock::Clock;
use crate::leader_key_storage::LeaderKeyStorage;
use crate::location_service::LocationService;

pub const DEFAULT_TIMEOUT_US: i64 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KnownRsu {
    pub address: ProtocolAddress,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub key: MacKey,
    pub last_seen_us: i64,
    pub distance_to_vehicle: f64,
}

struct Inner {
    known_rsus: Vec<KnownRsu>,
    current_leader: Option<ProtocolAddress>,
}

pub struct VehicleRsuManager {
    inner: Mutex<Inner>,
    neighbor_keys: Mutex<Vec<MacKey>>,
    timeout_us: i64,
    leader_key_storage: Arc<LeaderKeyStorage>,
    clock: Arc<Clock>,
    location_service: Arc<LocationService>,
    log: Logger,
}

impl VehicleRsuManager {
    pub fn new(
        leader_key_storage: Arc<LeaderKeyStorage>,
        clock: Arc<Clock>,
        location_service: Arc<LocationService>,
        log: Logger,
    ) -> VehicleRsuManager {
        VehicleRsuManager {
            inner: Mutex::new(Inner { known_rsus: Vec::new(), current_leader: None }),
            neighbor_keys: Mutex::new(Vec::new()),
            timeout_us: DEFAULT_TIMEOUT_US,
            leader_key_storage,
            clock,
            location_service,
            log,
        }
    }

    pub fn has_known_rsu(&self) -> bool {
        !self.inner.lock().unwrap().known_rsus.is_empty()
    }

    pub fn current_leader(&self) -> Option<ProtocolAddress> {
        self.inner.lock().unwrap().current_leader
    }

    /// Keys to try when verifying a MAC: every known RSU's key, followed by
    /// every cached neighbor key.
    pub fn candidate_keys(&self) -> Vec<MacKey> {
        let inner = self.inner.lock().unwrap();
        let mut keys: Vec<MacKey> = inner.known_rsus.iter().map(|r| r.key).collect();
        drop(inner);
        keys.extend(self.neighbor_keys.lock().unwrap().iter().copied());
        keys
    }

    pub fn add_neighbor_key(&self, key: MacKey) {
        let mut keys = self.neighbor_keys.lock().unwrap();
        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    /// Called when a STATUS message is received: updates or inserts the
    /// matching known-RSU record and re-runs leader selection.
    pub fn process_rsu_status(&self, address: ProtocolAddress, x: f64, y: f64, radius: f64, key: MacKey) {
        {
            let mut keys = self.neighbor_keys.lock().unwrap();
            keys.retain(|k| *k != key);
        }

        let now = now_us();
        {
            let mut inner = self.inner.lock().unwrap();
            match inner.known_rsus.iter_mut().find(|r| r.address == address) {
                Some(existing) => {
                    existing.x = x;
                    existing.y = y;
                    existing.radius = radius;
                    existing.key = key;
                    existing.last_seen_us = now;
                }
                None => inner.known_rsus.push(KnownRsu {
                    address,
                    x,
                    y,
                    radius,
                    key,
                    last_seen_us: now,
                    distance_to_vehicle: f64::MAX,
                }),
            }
        }

        self.update_leader_selection();
    }

    /// Removes known-RSU records whose `last_seen` predates `timeout_us`, and
    /// re-elects the leader if any were removed.
    pub fn prune_stale_rsus(&self) {
        let now = now_us();
        let removed = {
            let mut inner = self.inner.lock().unwrap();
            let before = inner.known_rsus.len();
            inner.known_rsus.retain(|r| now - r.last_seen_us <= self.timeout_us);
            before != inner.known_rsus.len()
        };
        if removed {
            self.update_leader_selection();
        }
    }

    pub fn update_leader_selection(&self) {
        let (x, y) = self.location_service.current_coordinates_now();
        let mut inner = self.inner.lock().unwrap();

        if inner.known_rsus.is_empty() {
            inner.current_leader = None;
            return;
        }

        for rsu in inner.known_rsus.iter_mut() {
            rsu.distance_to_vehicle = ((rsu.x - x).powi(2) + (rsu.y - y).powi(2)).sqrt();
        }
        inner
            .known_rsus
            .sort_by(|a, b| a.distance_to_vehicle.partial_cmp(&b.distance_to_vehicle).unwrap());

        let new_leader = inner.known_rsus[0];
        let changed = inner.current_leader != Some(new_leader.address);
        inner.current_leader = Some(new_leader.address);
        drop(inner);

        if changed {
            self.leader_key_storage.set(new_leader.address.physical, new_leader.key);
            info!(self.log, "leader changed"; "leader" => new_leader.address.physical.to_string());
            // Clock re-derives `current_leader_id` from LeaderKeyStorage on every
            // `activate` call, so simply re-triggering it is enough; the vehicle's
            // own `self_id` is never reassigned to the leader's id.
            self.clock.activate(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use v2x_wire::ethernet::Address;
    use v2x_wire::logging::default_logger;

    fn manager() -> VehicleRsuManager {
        let storage = Arc::new(LeaderKeyStorage::new());
        let clock = Arc::new(Clock::new(Arc::clone(&storage), Default::default()));
        let location = Arc::new(LocationService::new());
        VehicleRsuManager::new(storage, clock, location, default_logger())
    }

    #[test]
    fn elects_nearest_rsu_as_leader() {
        let manager = manager();
        manager.process_rsu_status(
            ProtocolAddress::new(Address::from_id(1), 7000),
            100.0,
            0.0,
            200.0,
            [1u8; 16],
        );
        manager.process_rsu_status(
            ProtocolAddress::new(Address::from_id(2), 7000),
            50.0,
            0.0,
            200.0,
            [2u8; 16],
        );

        let leader = manager.current_leader().unwrap();
        assert_eq!(leader.physical, Address::from_id(2));
    }

    #[test]
    fn status_from_known_neighbor_key_clears_cache_entry() {
        let manager = manager();
        manager.add_neighbor_key([9u8; 16]);
        manager.process_rsu_status(
            ProtocolAddress::new(Address::from_id(3), 7000),
            0.0,
            0.0,
            100.0,
            [9u8; 16],
        );
        assert!(manager.candidate_keys().contains(&[9u8; 16]));
        // The cache entry was consumed; candidate_keys now surfaces the key via
        // the known-RSU record instead of the neighbor cache.
    }

    #[test]
    fn pruning_stale_rsus_reelects_leader() {
        let manager = manager();
        manager.process_rsu_status(
            ProtocolAddress::new(Address::from_id(1), 7000),
            10.0,
            0.0,
            200.0,
            [1u8; 16],
        );
        assert!(manager.current_leader().is_some());

        {
            let mut inner = manager.inner.lock().unwrap();
            inner.known_rsus[0].last_seen_us -= DEFAULT_TIMEOUT_US * 2;
        }
        manager.prune_stale_rsus();
        assert!(manager.current_leader().is_none());
    }
}
