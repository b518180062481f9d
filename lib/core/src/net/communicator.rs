//! Per-address send/receive endpoint. Attaches a [`ConcurrentObserver`] to the
//! Protocol keyed by its own port on construction, and detaches on drop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use v2x_wire::ethernet::Address;
use v2x_wire::message::Message;

use crate::address::ProtocolAddress;
use crate::net::engine::Engine;
use crate::net::protocol::{Delivery, Protocol};
use crate::observer::ConcurrentObserver;

pub struct Communicator<E: Engine> {
    address: ProtocolAddress,
    protocol: Arc<Protocol<E>>,
    observer: Arc<ConcurrentObserver<Option<Delivery>>>,
    running: AtomicBool,
}

impl<E: Engine> Communicator<E> {
    pub fn new(protocol: Arc<Protocol<E>>, address: ProtocolAddress) -> Arc<Communicator<E>> {
        let observer = ConcurrentObserver::new();
        protocol.attach_port(address.port, Arc::clone(&observer));
        Arc::new(Communicator { address, protocol, observer, running: AtomicBool::new(true) })
    }

    pub fn address(&self) -> ProtocolAddress {
        self.address
    }

    /// Always broadcasts, from this endpoint's own port.
    pub fn send(&self, message: &Message) -> usize {
        if !self.running.load(Ordering::Acquire) {
            return 0;
        }
        let to = ProtocolAddress::new(Address::BROADCAST, 0);
        self.protocol.send(self.address.port, to, message)
    }

    /// Blocks until a message arrives on this endpoint's port or `release()` is
    /// called from another thread, in which case `None` is returned.
    pub fn receive(&self) -> Option<(ProtocolAddress, Message)> {
        self.observer.updated().map(|delivery| (delivery.from, Message::decode(&delivery.data)))
    }

    /// Unblocks a pending `receive()` with the release sentinel; subsequent
    /// `send()` calls become no-ops.
    pub fn release(&self) {
        self.running.store(false, Ordering::Release);
        self.observer.release_with(None);
    }
}

impl<E: Engine> Drop for Communicator<E> {
    fn drop(&mut self) {
        self.protocol.detach_port(self.address.port, &self.observer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::leader_key_storage::LeaderKeyStorage;
    use crate::location_service::LocationService;
    use crate::net::engine::{Bus, SimulatedEngine};
    use crate::net::nic::{Nic, NicConfig};
    use crate::net::protocol::EntityType;
    use v2x_wire::logging::default_logger;
    use v2x_wire::message::{CommonHeader, Origin};
    use std::thread;
    use std::time::Duration;

    fn node(bus: &Arc<Bus>, id: u8) -> Arc<Protocol<SimulatedEngine>> {
        let engine = SimulatedEngine::new(Arc::clone(bus), Address::from_id(id));
        let nic = Nic::new(engine, NicConfig { radius: 1000.0, ..NicConfig::default() }, default_logger());
        nic.start();
        let storage = Arc::new(LeaderKeyStorage::new());
        let clock = Arc::new(Clock::new(Arc::clone(&storage), Default::default()));
        let location = Arc::new(LocationService::new());
        Protocol::new(nic, EntityType::Vehicle, storage, clock, location, None, default_logger())
    }

    #[test]
    fn send_and_receive_round_trip() {
        let bus = Bus::new();
        let a = node(&bus, 1);
        let b = node(&bus, 2);

        let comm_a = Communicator::new(a, ProtocolAddress::new(Address::from_id(1), 7000));
        let comm_b = Communicator::new(b, ProtocolAddress::new(Address::from_id(2), 7000));

        let msg = Message::Interest {
            common: CommonHeader { origin: Origin { address: Address::from_id(1), port: 7000 }, timestamp_us: 1, unit: 42 },
            period_us: 50_000,
        };
        assert!(comm_a.send(&msg) > 0);

        let (from, received) = comm_b.receive().expect("message delivered");
        assert_eq!(from.physical, Address::from_id(1));
        match received {
            Message::Interest { period_us, .. } => assert_eq!(period_us, 50_000),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn release_unblocks_pending_receive() {
        let bus = Bus::new();
        let a = node(&bus, 1);
        let comm = Communicator::new(a, ProtocolAddress::new(Address::from_id(1), 7000));
        let comm_clone = Arc::clone(&comm);

        let handle = thread::spawn(move || comm_clone.receive());
        thread::sleep(Duration::from_millis(20));
        comm.release();

        assert!(handle.join().unwrap().is_none());
    }
}
