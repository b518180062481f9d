//! A peer-discovery leader model, kept as a documented, independently
//! testable alternative to [`VehicleRsuManager`](super::vehicle_rsu_manager::VehicleRsuManager).
//! Not wired into the default RSU-anchored topology — any node using this
//! instead of a `VehicleRsuManager` elects its leader from live peers rather
//! than known RSUs.
//!
//! Maintains a neighbor table keyed by protocol address, broadcasts its own
//! `{age, key}` on an interval via `Message::Join`, prunes stale entries on
//! another interval, and elects the leader as the peer (including itself) with
//! the highest age, tie-broken by the lexicographically greatest key.

use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::JoinHandle;

use slog::{info, Logger};

use v2x_wire::ethernet::Address;
use v2x_wire::message::{CommonHeader, Message, Origin};
use v2x_wire::packet::{MacKey, Port};
use v2x_wire::time::now_us;

use crate::address::ProtocolAddress;
use crate::leader_key_storage::LeaderKeyStorage;
use crate::net::communicator::Communicator;
use crate::net::engine::Engine;
use crate::net::protocol::Protocol;
use crate::periodic::PeriodicTask;

#[derive(Debug, Clone, Copy)]
pub struct StatusManagerConfig {
    pub own_key: MacKey,
    pub own_age: u32,
    pub port: Port,
    pub broadcast_period_us: u64,
    pub prune_interval_us: u64,
    pub peer_timeout_us: i64,
}

impl Default for StatusManagerConfig {
    fn default() -> Self {
        StatusManagerConfig {
            own_key: [0u8; 16],
            own_age: 0,
            port: 7100,
            broadcast_period_us: 1_000_000,
            prune_interval_us: 5_000_000,
            peer_timeout_us: 10_000_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeerRecord {
    pub address: ProtocolAddress,
    pub age: u32,
    pub key: MacKey,
    pub last_seen_us: i64,
}

pub struct StatusManager<E: Engine> {
    own_address: Address,
    communicator: Arc<Communicator<E>>,
    leader_key_storage: Arc<LeaderKeyStorage>,
    config: StatusManagerConfig,
    peers: Mutex<Vec<PeerRecord>>,
    current_leader: Mutex<Option<ProtocolAddress>>,
    broadcast_task: Mutex<Option<PeriodicTask>>,
    prune_task: Mutex<Option<PeriodicTask>>,
    receive_thread: Mutex<Option<JoinHandle<()>>>,
    log: Logger,
}

impl<E: Engine> StatusManager<E> {
    pub fn new(protocol: Arc<Protocol<E>>, leader_key_storage: Arc<LeaderKeyStorage>, config: StatusManagerConfig, log: Logger) -> Arc<StatusManager<E>> {
        let own_address = protocol.own_address();
        let communicator = Communicator::new(protocol, ProtocolAddress::new(own_address, config.port));
        Arc::new(StatusManager {
            own_address,
            communicator,
            leader_key_storage,
            config,
            peers: Mutex::new(Vec::new()),
            current_leader: Mutex::new(None),
            broadcast_task: Mutex::new(None),
            prune_task: Mutex::new(None),
            receive_thread: Mutex::new(None),
            log,
        })
    }

    pub fn current_leader(&self) -> Option<ProtocolAddress> {
        *self.current_leader.lock().unwrap()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn start(self: &Arc<Self>) {
        let receiver = Arc::clone(self);
        let receive_thread = thread::spawn(move || {
            while let Some((from, message)) = receiver.communicator.receive() {
                if let Message::Join { common, key } = message {
                    receiver.process_join(from, common.unit, key);
                }
            }
        });
        *self.receive_thread.lock().unwrap() = Some(receive_thread);

        let broadcaster = Arc::clone(self);
        *self.broadcast_task.lock().unwrap() = Some(PeriodicTask::start(self.config.broadcast_period_us, move || {
            broadcaster.broadcast_self();
        }));

        let pruner = Arc::clone(self);
        *self.prune_task.lock().unwrap() = Some(PeriodicTask::start(self.config.prune_interval_us, move || {
            pruner.prune_stale_peers();
        }));

        self.elect_leader();
    }

    pub fn stop(&self) {
        if let Some(task) = self.broadcast_task.lock().unwrap().take() {
            task.join();
        }
        if let Some(task) = self.prune_task.lock().unwrap().take() {
            task.join();
        }
        self.communicator.release();
        if let Some(handle) = self.receive_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn broadcast_self(&self) {
        let message = Message::Join {
            common: CommonHeader {
                origin: Origin { address: self.own_address, port: self.config.port },
                timestamp_us: now_us(),
                unit: self.config.own_age,
            },
            key: self.config.own_key,
        };
        self.communicator.send(&message);
    }

    fn process_join(&self, sender: ProtocolAddress, age: u32, key: MacKey) {
        let now = now_us();
        let mut peers = self.peers.lock().unwrap();
        match peers.iter_mut().find(|p| p.address == sender) {
            Some(existing) => {
                existing.age = age;
                existing.key = key;
                existing.last_seen_us = now;
            }
            None => peers.push(PeerRecord { address: sender, age, key, last_seen_us: now }),
        }
        drop(peers);
        self.elect_leader();
    }

    fn prune_stale_peers(&self) {
        let now = now_us();
        let removed = {
            let mut peers = self.peers.lock().unwrap();
            let before = peers.len();
            peers.retain(|p| now - p.last_seen_us <= self.config.peer_timeout_us);
            before != peers.len()
        };
        if removed {
            self.elect_leader();
        }
    }

    /// Maximum by age, lexicographic-max key tie-break; always includes this
    /// node as a candidate so a solitary node elects itself.
    fn elect_leader(&self) {
        let mut candidates: Vec<(ProtocolAddress, u32, MacKey)> =
            self.peers.lock().unwrap().iter().map(|p| (p.address, p.age, p.key)).collect();
        candidates.push((ProtocolAddress::new(self.own_address, self.config.port), self.config.own_age, self.config.own_key));

        let winner = candidates
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| a.2.cmp(&b.2)))
            .expect("candidates always contains at least self");

        let mut current = self.current_leader.lock().unwrap();
        let changed = *current != Some(winner.0);
        *current = Some(winner.0);
        drop(current);

        if changed {
            self.leader_key_storage.set(winner.0.physical, winner.2);
            info!(self.log, "status_manager elected new leader"; "leader" => format!("{}", winner.0.physical));
        }
    }
}
