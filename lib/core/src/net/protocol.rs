//! Packet layout glue, MAC verification, the geographic radius filter, the PTP
//! hook, and the REQ/KEY_RESPONSE escalation flow. Registers itself as the NIC's
//! sole [`FrameObserver`] and demultiplexes inbound traffic to per-port
//! [`Communicator`](super::communicator::Communicator) endpoints through the
//! observer fabric.

use std::sync::{Arc, Mutex};

use slog::{debug, info, warn, Logger};

use v2x_wire::ethernet::{Address, HEADER_SIZE as ETH_HEADER_SIZE};
use v2x_wire::mac;
use v2x_wire::message::{CommonHeader, FailedAuth, Message, Origin, TAG_INVALID};
use v2x_wire::packet::{AuthFields, Coordinates, Header, MacKey, PacketPrefix, Port, TimestampFields, PACKET_PREFIX_SIZE};
use v2x_wire::time::now_us;

use crate::address::ProtocolAddress;
use crate::clock::{Clock, PtpRelevantData};
use crate::framework::vehicle_rsu_manager::VehicleRsuManager;
use crate::leader_key_storage::LeaderKeyStorage;
use crate::location_service::LocationService;
use crate::net::engine::Engine;
use crate::net::nic::{Buffer, FrameObserver, Nic};
use crate::observer::{ConcurrentObserver, Subject};

/// Reserved port used for protocol-internal unicast control traffic (REQ,
/// KEY_RESPONSE) that never passes through the per-port observer fabric. Shares
/// the broadcast/gateway port reservation since it is never addressed by a
/// `Communicator` endpoint.
pub const CONTROL_PORT: Port = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    Vehicle,
    Rsu,
    Unknown,
}

/// A neighbor RSU's key, kept by an RSU solely to match failed MACs in REQ
/// handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighborRsu {
    pub rsu_id: u8,
    pub key: MacKey,
    pub address: ProtocolAddress,
}

/// A message delivered to a port subscriber: the sender's protocol address and
/// the raw message bytes (still `Message`-encoded; the subscriber decodes).
#[derive(Debug, Clone)]
pub struct Delivery {
    pub from: ProtocolAddress,
    pub data: Arc<Vec<u8>>,
}

pub struct Protocol<E: Engine> {
    nic: Arc<Nic<E>>,
    entity_type: EntityType,
    vehicle_rsu_manager: Option<Arc<VehicleRsuManager>>,
    leader_key_storage: Arc<LeaderKeyStorage>,
    clock: Arc<Clock>,
    location_service: Arc<LocationService>,
    neighbor_rsus: Mutex<Vec<NeighborRsu>>,
    ports: Subject<Option<Delivery>>,
    log: Logger,
}

impl<E: Engine> Protocol<E> {
    pub fn new(
        nic: Arc<Nic<E>>,
        entity_type: EntityType,
        leader_key_storage: Arc<LeaderKeyStorage>,
        clock: Arc<Clock>,
        location_service: Arc<LocationService>,
        vehicle_rsu_manager: Option<Arc<VehicleRsuManager>>,
        log: Logger,
    ) -> Arc<Protocol<E>> {
        let protocol = Arc::new(Protocol {
            nic: Arc::clone(&nic),
            entity_type,
            vehicle_rsu_manager,
            leader_key_storage,
            clock,
            location_service,
            neighbor_rsus: Mutex::new(Vec::new()),
            ports: Subject::new(),
            log,
        });
        nic.attach_observer(Arc::clone(&protocol) as Arc<dyn FrameObserver>);
        protocol
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn own_address(&self) -> Address {
        self.nic.mac_address()
    }

    /// Largest message payload that fits a packet within the NIC's configured MTU.
    pub fn max_payload_size(&self) -> usize {
        self.nic.mtu().saturating_sub(ETH_HEADER_SIZE).saturating_sub(PACKET_PREFIX_SIZE)
    }

    pub fn attach_port(&self, port: Port, observer: Arc<ConcurrentObserver<Option<Delivery>>>) {
        self.ports.attach(port, observer);
    }

    pub fn detach_port(&self, port: Port, observer: &Arc<ConcurrentObserver<Option<Delivery>>>) {
        self.ports.detach(port, observer);
    }

    pub fn add_neighbor_rsu(&self, rsu_id: u8, key: MacKey, address: ProtocolAddress) {
        let mut neighbors = self.neighbor_rsus.lock().unwrap();
        if !neighbors.iter().any(|n| n.rsu_id == rsu_id) {
            neighbors.push(NeighborRsu { rsu_id, key, address });
        }
    }

    pub fn clear_neighbor_rsus(&self) {
        self.neighbor_rsus.lock().unwrap().clear();
    }

    /// Returns the number of bytes handed to the NIC, or 0 if the send
    /// was gated (auth unavailable) or the NIC refused to allocate.
    pub fn send(&self, from_port: Port, to: ProtocolAddress, message: &Message) -> usize {
        let payload = message.encode();
        let tag = message.tag();

        if Message::tag_requires_auth(tag) {
            let keys_available = match self.entity_type {
                EntityType::Vehicle => self.vehicle_rsu_manager.as_ref().map_or(false, |m| m.has_known_rsu()),
                EntityType::Rsu => self.leader_key_storage.has_key(),
                EntityType::Unknown => false,
            };
            if !keys_available {
                debug!(self.log, "send dropped: no key available for authenticated message");
                return 0;
            }
        }

        let packet_size = PACKET_PREFIX_SIZE + payload.len();
        let mut buf = match self.nic.alloc(to.physical, self.nic.ether_type(), packet_size) {
            Some(buf) => buf,
            None => return 0,
        };

        let header = Header { from_port, to_port: to.port, size: payload.len() as u32 };
        let (_, is_synced) = self.clock.synchronized_time();
        let timestamps = TimestampFields { is_clock_synchronized: is_synced, tx_timestamp_us: i64::MIN };
        let (x, y) = self.location_service.current_coordinates_now();
        let coordinates = Coordinates { x, y, radius: self.nic.radius() };

        let auth = if Message::tag_requires_auth(tag) {
            let key = self.leader_key_storage.key();
            let computed = mac::compute(&header, &timestamps, &coordinates, &payload, &key);
            AuthFields { mac: computed, has_mac: true }
        } else {
            AuthFields::ZERO
        };

        let prefix = PacketPrefix { header, timestamps, coordinates, auth };
        prefix.write_to(&mut buf.data[0..PACKET_PREFIX_SIZE]);
        buf.data[PACKET_PREFIX_SIZE..packet_size].copy_from_slice(&payload);

        self.nic.send(buf, packet_size)
    }

    /// Called synchronously on the NIC's receive thread via
    /// [`FrameObserver::on_frame`]. Reads `buf` but never frees it; the caller
    /// (`on_frame`) owns that single free-per-frame call.
    fn handle_buffer(&self, buf: &Buffer) {
        let Some(prefix) = PacketPrefix::read_from(&buf.data) else {
            self.nic_rx_drop("undersized packet prefix");
            return;
        };
        let payload_len = prefix.header.size as usize;
        if buf.data.len() < PACKET_PREFIX_SIZE + payload_len {
            self.nic_rx_drop("payload shorter than header.size");
            return;
        }
        let payload = &buf.data[PACKET_PREFIX_SIZE..PACKET_PREFIX_SIZE + payload_len];

        let (own_x, own_y) = self.location_service.current_coordinates_now();
        if prefix.coordinates.distance(own_x, own_y) > prefix.coordinates.radius {
            debug!(self.log, "dropped: outside sender radius");
            return;
        }

        let tag = payload.first().copied().unwrap_or(TAG_INVALID);

        if self.entity_type == EntityType::Rsu
            && matches!(
                tag,
                v2x_wire::message::TAG_INTEREST
                    | v2x_wire::message::TAG_RESPONSE
                    | v2x_wire::message::TAG_STATUS
                    | v2x_wire::message::TAG_KEY_RESPONSE
            )
        {
            debug!(self.log, "dropped: RSU-role filter"; "tag" => tag);
            return;
        }

        self.clock.activate(Some(PtpRelevantData {
            sender_id: buf.header.src.leader_id(),
            ts_tx_at_sender: prefix.timestamps.tx_timestamp_us,
            ts_local_rx: buf.rx_timestamp_us,
        }));

        if Message::tag_requires_auth(tag) {
            let verified = self.verify(&prefix, payload);
            if !verified {
                if self.entity_type == EntityType::Vehicle {
                    self.escalate_req(&prefix, payload);
                }
                warn!(self.log, "dropped: MAC verification failed"; "tag" => tag);
                return;
            }
        }

        let message = Message::decode(payload);
        let sender = ProtocolAddress::new(buf.header.src, prefix.header.from_port);

        match &message {
            Message::Status { x, y, radius, key, .. } => {
                if let Some(manager) = &self.vehicle_rsu_manager {
                    manager.process_rsu_status(sender, *x, *y, *radius, *key);
                }
            }
            Message::Req { common, failed } => {
                if self.entity_type == EntityType::Rsu {
                    self.handle_req(common, failed);
                }
            }
            Message::KeyResponse { key, .. } => {
                if let Some(manager) = &self.vehicle_rsu_manager {
                    manager.add_neighbor_key(*key);
                }
            }
            Message::Invalid => {
                self.nic_rx_drop("undecodable message");
            }
            _ => {
                let delivery = Delivery { from: sender, data: Arc::new(payload.to_vec()) };
                if !self.ports.notify(prefix.header.from_port, Some(delivery)) {
                    debug!(self.log, "dropped: no subscriber on port"; "port" => prefix.header.from_port);
                }
            }
        }
    }

    fn verify(&self, prefix: &PacketPrefix, payload: &[u8]) -> bool {
        match self.entity_type {
            EntityType::Vehicle => match &self.vehicle_rsu_manager {
                Some(manager) => manager
                    .candidate_keys()
                    .iter()
                    .any(|key| mac::verify(&prefix.header, &prefix.timestamps, &prefix.coordinates, payload, &prefix.auth.mac, key)),
                None => false,
            },
            EntityType::Rsu => {
                let key = self.leader_key_storage.key();
                mac::verify(&prefix.header, &prefix.timestamps, &prefix.coordinates, payload, &prefix.auth.mac, &key)
            }
            EntityType::Unknown => false,
        }
    }

    /// Emits a unicast REQ to the current leader RSU carrying the failed
    /// authenticated subset, so the leader can match it against a neighbor's key.
    fn escalate_req(&self, prefix: &PacketPrefix, payload: &[u8]) {
        let Some(manager) = &self.vehicle_rsu_manager else { return };
        let Some(leader) = manager.current_leader() else { return };

        let req = Message::Req {
            common: CommonHeader {
                origin: Origin { address: self.own_address(), port: prefix.header.to_port },
                timestamp_us: now_us(),
                unit: 0,
            },
            failed: FailedAuth {
                header: prefix.header,
                timestamps: prefix.timestamps,
                coordinates: prefix.coordinates,
                payload: payload.to_vec(),
                mac: prefix.auth.mac,
            },
        };
        self.send(CONTROL_PORT, leader, &req);
    }

    /// Tries every neighbor RSU's key against the failed MAC; replies
    /// with whichever one matches.
    fn handle_req(&self, req_common: &CommonHeader, failed: &FailedAuth) {
        let neighbors = self.neighbor_rsus.lock().unwrap().clone();
        for neighbor in neighbors.iter() {
            let recomputed = mac::compute(&failed.header, &failed.timestamps, &failed.coordinates, &failed.payload, &neighbor.key);
            if recomputed == failed.mac {
                let to = ProtocolAddress::new(req_common.origin.address, req_common.origin.port);
                let reply = Message::KeyResponse {
                    common: CommonHeader {
                        origin: Origin { address: self.own_address(), port: CONTROL_PORT },
                        timestamp_us: now_us(),
                        unit: 0,
                    },
                    key: neighbor.key,
                };
                self.send(CONTROL_PORT, to, &reply);
                info!(self.log, "REQ resolved"; "neighbor_rsu" => neighbor.rsu_id);
                return;
            }
        }
        debug!(self.log, "REQ unresolved: no neighbor key matched");
    }

    fn nic_rx_drop(&self, reason: &str) {
        debug!(self.log, "dropped"; "reason" => reason);
    }
}

impl<E: Engine> FrameObserver for Protocol<E> {
    fn on_frame(&self, buf: Box<Buffer>) {
        self.handle_buffer(&buf);
        self.nic.free(buf);
    }
}
