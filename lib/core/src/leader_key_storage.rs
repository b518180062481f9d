//! Process-wide `{leader address, group key}` pair with atomic swap, shared by
//! Clock, Protocol, and VehicleRSUManager.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use v2x_wire::ethernet::Address;
use v2x_wire::packet::MacKey;
use v2x_wire::time::now_us;

struct Inner {
    leader: Address,
    key: MacKey,
}

pub struct LeaderKeyStorage {
    inner: Mutex<Inner>,
    last_update_us: AtomicI64,
}

impl LeaderKeyStorage {
    pub fn new() -> LeaderKeyStorage {
        LeaderKeyStorage {
            inner: Mutex::new(Inner { leader: Address::NULL, key: [0u8; 16] }),
            last_update_us: AtomicI64::new(0),
        }
    }

    pub fn leader(&self) -> Address {
        self.inner.lock().unwrap().leader
    }

    pub fn key(&self) -> MacKey {
        self.inner.lock().unwrap().key
    }

    pub fn leader_and_key(&self) -> (Address, MacKey) {
        let inner = self.inner.lock().unwrap();
        (inner.leader, inner.key)
    }

    pub fn has_key(&self) -> bool {
        self.inner.lock().unwrap().key != [0u8; 16]
    }

    pub fn last_update_us(&self) -> i64 {
        self.last_update_us.load(Ordering::Acquire)
    }

    /// Overwrites leader and key unconditionally; bumps `last_update_us` only when
    /// either value actually changed.
    pub fn set(&self, leader: Address, key: MacKey) {
        let mut inner = self.inner.lock().unwrap();
        let changed = inner.leader != leader || inner.key != key;
        inner.leader = leader;
        inner.key = key;
        drop(inner);
        if changed {
            self.last_update_us.store(now_us(), Ordering::Release);
        }
    }
}

impl Default for LeaderKeyStorage {
    fn default() -> Self {
        LeaderKeyStorage::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_no_key() {
        let storage = LeaderKeyStorage::new();
        assert!(!storage.has_key());
        assert_eq!(storage.leader(), Address::NULL);
    }

    #[test]
    fn set_updates_leader_and_key() {
        let storage = LeaderKeyStorage::new();
        let leader = Address::from_id(7);
        storage.set(leader, [1u8; 16]);
        assert_eq!(storage.leader(), leader);
        assert!(storage.has_key());
    }

    #[test]
    fn identical_set_does_not_bump_last_update() {
        let storage = LeaderKeyStorage::new();
        let leader = Address::from_id(7);
        storage.set(leader, [1u8; 16]);
        let first_update = storage.last_update_us();
        storage.set(leader, [1u8; 16]);
        assert_eq!(storage.last_update_us(), first_update);
    }
}
