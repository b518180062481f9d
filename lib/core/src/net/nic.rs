//! Buffer pool, frame TX/RX, hardware timestamp stamping, and per-protocol
//! demultiplexing to a single registered observer (the Protocol layer).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use slog::{debug, info, Logger};
use v2x_wire::ethernet::{Address, EtherType, FrameHeader, HEADER_SIZE as ETH_HEADER_SIZE};
use v2x_wire::packet::{PacketPrefix, PACKET_PREFIX_SIZE};
use v2x_wire::time::now_us;

use crate::net::engine::Engine;

/// Protocol registers itself as the sole consumer of a NIC's inbound frames.
/// Unlike the port-keyed `Subject`/`ConcurrentObserver` fabric used downstream
/// for `Communicator`, this link is a direct synchronous callback invoked on the
/// engine's own receive thread — there is no queueing, no second thread, and the
/// callback takes ownership of (and is responsible for eventually freeing) the
/// buffer it receives.
pub trait FrameObserver: Send + Sync {
    fn on_frame(&self, buf: Box<Buffer>);
}

pub const DEFAULT_SEND_BUFFERS: usize = 512;
pub const DEFAULT_RECEIVE_BUFFERS: usize = 512;
pub const DEFAULT_MTU: usize = 1500;

/// One fixed-size frame slot, reused across its whole lifetime in the pool.
pub struct Buffer {
    pub header: FrameHeader,
    pub data: Vec<u8>,
    pub rx_timestamp_us: i64,
}

impl Buffer {
    fn new() -> Buffer {
        Buffer {
            header: FrameHeader { dst: Address::NULL, src: Address::NULL, ether_type: 0 },
            data: Vec::new(),
            rx_timestamp_us: 0,
        }
    }
}

struct Semaphore {
    count: Mutex<usize>,
    condvar: Condvar,
}

impl Semaphore {
    fn new(n: usize) -> Semaphore {
        Semaphore { count: Mutex::new(n), condvar: Condvar::new() }
    }

    fn acquire(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.condvar.wait(count).unwrap();
        }
        *count -= 1;
    }

    fn release(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.condvar.notify_one();
    }

    fn available(&self) -> usize {
        *self.count.lock().unwrap()
    }
}

#[derive(Debug, Default)]
pub struct Statistics {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub tx_drops: u64,
    pub rx_drops: u64,
}

struct AtomicStatistics {
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    tx_drops: AtomicU64,
    rx_drops: AtomicU64,
}

impl AtomicStatistics {
    fn new() -> AtomicStatistics {
        AtomicStatistics {
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            tx_drops: AtomicU64::new(0),
            rx_drops: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> Statistics {
        Statistics {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            tx_drops: self.tx_drops.load(Ordering::Relaxed),
            rx_drops: self.rx_drops.load(Ordering::Relaxed),
        }
    }
}

pub struct NicConfig {
    pub send_buffers: usize,
    pub receive_buffers: usize,
    pub mtu: usize,
    pub ether_type: EtherType,
    pub radius: f64,
}

impl Default for NicConfig {
    fn default() -> Self {
        NicConfig {
            send_buffers: DEFAULT_SEND_BUFFERS,
            receive_buffers: DEFAULT_RECEIVE_BUFFERS,
            mtu: DEFAULT_MTU,
            ether_type: 888,
            radius: 0.0,
        }
    }
}

pub struct Nic<E: Engine> {
    engine: Arc<E>,
    own_mac: Address,
    ether_type: EtherType,
    mtu: usize,
    running: AtomicBool,
    total_buffers: usize,
    buffer_sem: Semaphore,
    free_list: Mutex<Vec<Box<Buffer>>>,
    protocol_observer: Mutex<Option<Arc<dyn FrameObserver>>>,
    radius: Mutex<f64>,
    stats: AtomicStatistics,
    log: Logger,
}

impl<E: Engine> Nic<E> {
    pub fn new(engine: Arc<E>, config: NicConfig, log: Logger) -> Arc<Nic<E>> {
        let own_mac = engine.mac_address();
        let total_buffers = config.send_buffers + config.receive_buffers;
        let free_list = (0..total_buffers).map(|_| Box::new(Buffer::new())).collect();

        Arc::new(Nic {
            engine,
            own_mac,
            ether_type: config.ether_type,
            mtu: config.mtu,
            running: AtomicBool::new(false),
            total_buffers,
            buffer_sem: Semaphore::new(total_buffers),
            free_list: Mutex::new(free_list),
            protocol_observer: Mutex::new(None),
            radius: Mutex::new(config.radius),
            stats: AtomicStatistics::new(),
            log,
        })
    }

    pub fn mac_address(&self) -> Address {
        self.own_mac
    }

    pub fn ether_type(&self) -> EtherType {
        self.ether_type
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn radius(&self) -> f64 {
        *self.radius.lock().unwrap()
    }

    pub fn set_radius(&self, radius: f64) {
        *self.radius.lock().unwrap() = radius;
    }

    pub fn statistics(&self) -> Statistics {
        self.stats.snapshot()
    }

    pub fn free_buffer_count(&self) -> usize {
        self.buffer_sem.available()
    }

    pub fn attach_observer(&self, observer: Arc<dyn FrameObserver>) {
        *self.protocol_observer.lock().unwrap() = Some(observer);
    }

    pub fn detach_observer(&self) {
        *self.protocol_observer.lock().unwrap() = None;
    }

    pub fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::Release);
        let nic = Arc::clone(self);
        Arc::clone(&self.engine).start(Box::new(move |frame| nic.handle(frame)));
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        for _ in 0..self.total_buffers {
            self.buffer_sem.release();
        }
        self.engine.stop();
    }

    /// Allocates a buffer sized for `payload_size` bytes, pre-filling the frame
    /// header. Blocks on the pool semaphore; returns `None` once stopped.
    pub fn alloc(&self, dst: Address, ether_type: EtherType, payload_size: usize) -> Option<Box<Buffer>> {
        if !self.running.load(Ordering::Acquire) {
            return None;
        }
        self.buffer_sem.acquire();
        if !self.running.load(Ordering::Acquire) {
            return None;
        }
        let mut buf = self.free_list.lock().unwrap().pop()?;
        buf.header = FrameHeader { dst, src: self.own_mac, ether_type };
        buf.data.clear();
        buf.data.resize(payload_size, 0);
        buf.rx_timestamp_us = 0;
        Some(buf)
    }

    pub fn free(&self, mut buf: Box<Buffer>) {
        buf.data.clear();
        buf.header = FrameHeader { dst: Address::NULL, src: Address::NULL, ether_type: 0 };
        self.free_list.lock().unwrap().push(buf);
        self.buffer_sem.release();
    }

    /// Stamps the TX hardware timestamp, hands the frame to the engine, and frees
    /// the buffer. Returns the number of bytes sent, or 0 on failure.
    pub fn send(&self, mut buf: Box<Buffer>, packet_size: usize) -> usize {
        if !self.running.load(Ordering::Acquire) {
            self.stats.tx_drops.fetch_add(1, Ordering::Relaxed);
            return 0;
        }
        if packet_size >= PACKET_PREFIX_SIZE && buf.data.len() >= packet_size {
            PacketPrefix::stamp_tx_timestamp(&mut buf.data[0..packet_size], now_us());
        }

        let mut frame = vec![0u8; ETH_HEADER_SIZE + packet_size];
        buf.header.write_to(&mut frame[0..ETH_HEADER_SIZE]);
        frame[ETH_HEADER_SIZE..].copy_from_slice(&buf.data[0..packet_size]);

        let sent = self.engine.send(&frame);
        if sent > 0 {
            self.stats.packets_sent.fetch_add(1, Ordering::Relaxed);
            self.stats.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
            debug!(self.log, "nic send"; "bytes" => sent);
        } else {
            self.stats.tx_drops.fetch_add(1, Ordering::Relaxed);
        }

        self.free(buf);
        sent
    }

    /// Invoked by the engine thread for every inbound frame.
    fn handle(&self, frame: &[u8]) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        let header = match FrameHeader::read_from(frame) {
            Some(header) => header,
            None => return,
        };
        if header.src == self.own_mac || header.ether_type != self.ether_type {
            return;
        }
        let payload = &frame[ETH_HEADER_SIZE..];
        if payload.is_empty() {
            self.stats.rx_drops.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let rx_time = now_us();
        let buf = match self.alloc(header.src, header.ether_type, payload.len()) {
            Some(mut buf) => {
                buf.header = header;
                buf.rx_timestamp_us = rx_time;
                buf.data.copy_from_slice(payload);
                buf
            }
            None => return,
        };

        self.stats.packets_received.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_received.fetch_add(frame.len() as u64, Ordering::Relaxed);

        if payload.len() >= PACKET_PREFIX_SIZE {
            let tx_time = PacketPrefix::read_tx_timestamp(payload);
            let latency_us = rx_time - tx_time;
            info!(self.log, "latency"; "latency_us" => latency_us);
        }

        let observer = self.protocol_observer.lock().unwrap().clone();
        match observer {
            Some(observer) => observer.on_frame(buf),
            None => self.free(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::engine::{Bus, SimulatedEngine};
    use v2x_wire::logging::default_logger;
    use std::time::Duration;

    fn test_nic(bus: &Arc<Bus>, id: u8) -> Arc<Nic<SimulatedEngine>> {
        let engine = SimulatedEngine::new(Arc::clone(bus), Address::from_id(id));
        let nic = Nic::new(engine, NicConfig::default(), default_logger());
        nic.start();
        nic
    }

    #[test]
    fn alloc_and_free_round_trip_preserves_pool_size() {
        let bus = Bus::new();
        let nic = test_nic(&bus, 1);
        let total = nic.free_buffer_count();

        let buf = nic.alloc(Address::BROADCAST, 888, 16).unwrap();
        assert_eq!(nic.free_buffer_count(), total - 1);
        nic.free(buf);
        assert_eq!(nic.free_buffer_count(), total);

        nic.stop();
    }

    struct CollectingObserver {
        received: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl FrameObserver for CollectingObserver {
        fn on_frame(&self, buf: Box<Buffer>) {
            self.received.lock().unwrap().push(buf.data.clone());
        }
    }

    #[test]
    fn send_delivers_to_peer_and_updates_statistics() {
        let bus = Bus::new();
        let nic_a = test_nic(&bus, 1);
        let nic_b = test_nic(&bus, 2);

        let received = Arc::new(Mutex::new(Vec::new()));
        nic_b.attach_observer(Arc::new(CollectingObserver { received: Arc::clone(&received) }));

        let mut buf = nic_a.alloc(Address::BROADCAST, 888, 8).unwrap();
        buf.data.copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let sent = nic_a.send(buf, 8);
        assert_eq!(sent, v2x_wire::ethernet::HEADER_SIZE + 8);

        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(received.lock().unwrap().as_slice(), &[vec![1, 2, 3, 4, 5, 6, 7, 8]]);
        assert_eq!(nic_a.statistics().packets_sent, 1);
        assert_eq!(nic_b.statistics().packets_received, 1);

        nic_a.stop();
        nic_b.stop();
    }
}
