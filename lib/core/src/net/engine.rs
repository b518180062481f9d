//! The transport contract a NIC depends on, plus the in-process simulated bus
//! this rewrite ships and tests against. A real deployment would implement
//! `Engine` over `AF_PACKET`/raw sockets; nothing in the NIC layer depends on
//! that choice.

use std::collections::HashMap;
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use v2x_wire::ethernet::{Address, FrameHeader};

/// Frame transport a NIC drives. `start` hands the engine a callback to invoke
/// for every inbound frame; the engine owns the thread that calls it.
pub trait Engine: Send + Sync + 'static {
    fn mac_address(&self) -> Address;
    fn send(&self, frame: &[u8]) -> usize;
    fn start(self: Arc<Self>, on_frame: Box<dyn Fn(&[u8]) + Send + Sync>);
    fn stop(&self);
}

/// A shared in-process broadcast/unicast bus. Every `SimulatedEngine` registers
/// its MAC with a `Bus`; frames addressed to the broadcast address fan out to
/// every other registered tap, unicast frames go to the matching one only.
pub struct Bus {
    taps: Mutex<HashMap<Address, SyncSender<Vec<u8>>>>,
}

impl Bus {
    pub fn new() -> Arc<Bus> {
        Arc::new(Bus { taps: Mutex::new(HashMap::new()) })
    }

    fn register(&self, mac: Address) -> Receiver<Vec<u8>> {
        let (tx, rx) = sync_channel(256);
        self.taps.lock().unwrap().insert(mac, tx);
        rx
    }

    fn unregister(&self, mac: &Address) {
        self.taps.lock().unwrap().remove(mac);
    }

    fn deliver(&self, frame: &[u8]) {
        let header = match FrameHeader::read_from(frame) {
            Some(header) => header,
            None => return,
        };
        let taps = self.taps.lock().unwrap();
        if header.dst.is_broadcast() {
            for (mac, tap) in taps.iter() {
                if *mac != header.src {
                    let _ = tap.send(frame.to_vec());
                }
            }
        } else if let Some(tap) = taps.get(&header.dst) {
            let _ = tap.send(frame.to_vec());
        }
    }
}

pub struct SimulatedEngine {
    bus: Arc<Bus>,
    mac: Address,
    running: AtomicBool,
    receiver: Mutex<Option<Receiver<Vec<u8>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedEngine {
    pub fn new(bus: Arc<Bus>, mac: Address) -> Arc<SimulatedEngine> {
        let receiver = bus.register(mac);
        Arc::new(SimulatedEngine {
            bus,
            mac,
            running: AtomicBool::new(false),
            receiver: Mutex::new(Some(receiver)),
            worker: Mutex::new(None),
        })
    }
}

impl Engine for SimulatedEngine {
    fn mac_address(&self) -> Address {
        self.mac
    }

    fn send(&self, frame: &[u8]) -> usize {
        if !self.running.load(Ordering::Acquire) {
            return 0;
        }
        self.bus.deliver(frame);
        frame.len()
    }

    fn start(self: Arc<Self>, on_frame: Box<dyn Fn(&[u8]) + Send + Sync>) {
        self.running.store(true, Ordering::Release);
        let receiver = self.receiver.lock().unwrap().take().expect("engine started twice");
        let running = Arc::clone(&self);
        let handle = thread::spawn(move || {
            while running.running.load(Ordering::Acquire) {
                match receiver.recv_timeout(Duration::from_millis(100)) {
                    Ok(frame) => on_frame(&frame),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });
        *self.worker.lock().unwrap() = Some(handle);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.bus.unregister(&self.mac);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration as StdDuration;

    #[test]
    fn broadcast_frame_reaches_other_tap_not_sender() {
        let bus = Bus::new();
        let mac_a = Address::from_id(1);
        let mac_b = Address::from_id(2);
        let engine_a = SimulatedEngine::new(Arc::clone(&bus), mac_a);
        let engine_b = SimulatedEngine::new(Arc::clone(&bus), mac_b);

        let received_b: Arc<StdMutex<Vec<Vec<u8>>>> = Arc::new(StdMutex::new(Vec::new()));
        let received_b_clone = Arc::clone(&received_b);
        Arc::clone(&engine_b).start(Box::new(move |frame| {
            received_b_clone.lock().unwrap().push(frame.to_vec());
        }));
        Arc::clone(&engine_a).start(Box::new(|_frame| {}));

        let mut frame = vec![0u8; 20];
        let header = FrameHeader { dst: Address::BROADCAST, src: mac_a, ether_type: 0x0378 };
        header.write_to(&mut frame[0..v2x_wire::ethernet::HEADER_SIZE]);
        engine_a.send(&frame);

        thread::sleep(StdDuration::from_millis(150));
        assert_eq!(received_b.lock().unwrap().len(), 1);

        engine_a.stop();
        engine_b.stop();
    }
}
