//! Conditional and concurrent observer primitives used to fan incoming NIC
//! buffers out to per-port consumers without the NIC thread blocking.
//!
//! The source implements `Concurrent_Observer` with a POSIX counting semaphore;
//! this rewrite uses a `Mutex` + `Condvar` queue, which gives the same
//! block-until-available `updated()` semantics without an OS primitive.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

pub type Condition = u16;

struct Entry<D> {
    condition: Condition,
    observer: Arc<ConcurrentObserver<D>>,
}

/// An observed object's attachment list. `notify` delivers a datum to every
/// observer whose condition equals `cond`.
pub struct Subject<D> {
    observers: Mutex<Vec<Entry<D>>>,
}

impl<D: Clone> Subject<D> {
    pub fn new() -> Subject<D> {
        Subject { observers: Mutex::new(Vec::new()) }
    }

    pub fn attach(&self, condition: Condition, observer: Arc<ConcurrentObserver<D>>) {
        self.observers.lock().unwrap().push(Entry { condition, observer });
    }

    pub fn detach(&self, condition: Condition, observer: &Arc<ConcurrentObserver<D>>) {
        let mut observers = self.observers.lock().unwrap();
        observers.retain(|entry| !(entry.condition == condition && Arc::ptr_eq(&entry.observer, observer)));
    }

    /// Delivers `data` to every observer whose condition matches `cond`. Returns
    /// true iff at least one observer matched.
    pub fn notify(&self, cond: Condition, data: D) -> bool {
        let observers = self.observers.lock().unwrap();
        let mut matched = false;
        for entry in observers.iter() {
            if entry.condition == cond {
                entry.observer.push(data.clone());
                matched = true;
            }
        }
        matched
    }
}

impl<D: Clone> Default for Subject<D> {
    fn default() -> Self {
        Subject::new()
    }
}

/// A single subscriber. Pushed data accumulates in a FIFO queue; `updated()`
/// blocks until at least one datum is available and pops the oldest.
pub struct ConcurrentObserver<D> {
    queue: Mutex<VecDeque<D>>,
    condvar: Condvar,
}

impl<D> ConcurrentObserver<D> {
    pub fn new() -> Arc<ConcurrentObserver<D>> {
        Arc::new(ConcurrentObserver { queue: Mutex::new(VecDeque::new()), condvar: Condvar::new() })
    }

    fn push(&self, data: D) {
        let mut queue = self.queue.lock().unwrap();
        queue.push_back(data);
        self.condvar.notify_one();
    }

    /// Blocks until a datum is available, then pops and returns it. `None` is
    /// used as the release sentinel by `Communicator::release`.
    pub fn updated(&self) -> D {
        let mut queue = self.queue.lock().unwrap();
        while queue.is_empty() {
            queue = self.condvar.wait(queue).unwrap();
        }
        queue.pop_front().expect("queue was non-empty under the lock")
    }

    /// Pushes a sentinel datum directly, bypassing the subject's condition match —
    /// used to unblock a pending `updated()` on teardown.
    pub fn release_with(&self, sentinel: D) {
        self.push(sentinel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn notify_delivers_only_to_matching_condition() {
        let subject: Subject<u32> = Subject::new();
        let obs_a = ConcurrentObserver::new();
        let obs_b = ConcurrentObserver::new();
        subject.attach(10, Arc::clone(&obs_a));
        subject.attach(20, Arc::clone(&obs_b));

        assert!(subject.notify(10, 42));
        assert_eq!(obs_a.updated(), 42);

        assert!(!subject.notify(99, 7));
    }

    #[test]
    fn detach_stops_future_delivery() {
        let subject: Subject<u32> = Subject::new();
        let obs = ConcurrentObserver::new();
        subject.attach(10, Arc::clone(&obs));
        subject.detach(10, &obs);
        assert!(!subject.notify(10, 1));
    }

    #[test]
    fn updated_blocks_until_data_arrives() {
        let obs = ConcurrentObserver::new();
        let obs_clone = Arc::clone(&obs);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            obs_clone.release_with(99);
        });
        assert_eq!(obs.updated(), 99);
        handle.join().unwrap();
    }
}
