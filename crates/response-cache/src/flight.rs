//! Per-key single-flight
//!
//! Concurrent misses for one key queue behind a shared async mutex so that at
//! most one origin call per key is in progress. Slots are created on demand and
//! dropped again once nobody holds or waits on them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

#[derive(Debug, Default)]
pub struct FlightGroup {
    slots: Slots,
}

/// Exclusive right to fill one key. Released on drop.
#[derive(Debug)]
pub struct FlightGuard {
    slots: Slots,
    key: String,
    guard: OwnedMutexGuard<()>,
}

impl FlightGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other task holds `key`, then hold it
    pub async fn acquire(&self, key: &str) -> FlightGuard {
        let mut pending = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            let slot = slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone();
            PendingSlot {
                slots: Arc::clone(&self.slots),
                key: key.to_string(),
                slot: Some(slot),
            }
        };

        // If this future is dropped while waiting, `pending` releases the slot.
        let guard = match pending.slot.as_ref() {
            Some(slot) => Arc::clone(slot).lock_owned().await,
            None => unreachable!("pending slot is set until the lock is taken"),
        };
        pending.slot = None;

        FlightGuard {
            slots: Arc::clone(&self.slots),
            key: key.to_string(),
            guard,
        }
    }

    /// Number of keys with a holder or waiters
    pub fn in_flight(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// A registered waiter that does not hold the lock yet
struct PendingSlot {
    slots: Slots,
    key: String,
    slot: Option<Arc<AsyncMutex<()>>>,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            release_slot(&self.slots, &self.key, &slot);
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        release_slot(&self.slots, &self.key, OwnedMutexGuard::mutex(&self.guard));
    }
}

/// Remove the slot for `key` when `ours` is the only reference besides the map's
fn release_slot(slots: &Slots, key: &str, ours: &Arc<AsyncMutex<()>>) {
    let mut slots = slots.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(slot) = slots.get(key) {
        if Arc::ptr_eq(slot, ours) && Arc::strong_count(slot) == 2 {
            slots.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_slot_removed_after_release() {
        let group = FlightGroup::new();
        let guard = group.acquire("a").await;
        assert_eq!(group.in_flight(), 1);
        drop(guard);
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let group = FlightGroup::new();
        let _a = group.acquire("a").await;
        let b = tokio::time::timeout(Duration::from_secs(1), group.acquire("b")).await;
        assert!(b.is_ok());
        assert_eq!(group.in_flight(), 2);
    }

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let group = Arc::new(FlightGroup::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let group = Arc::clone(&group);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _guard = group.acquire("same").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_slot_kept_while_waiters_remain() {
        let group = Arc::new(FlightGroup::new());
        let first = group.acquire("k").await;

        let waiter = {
            let group = Arc::clone(&group);
            tokio::spawn(async move {
                let _guard = group.acquire("k").await;
            })
        };
        // Let the waiter register on the slot
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(first);
        assert_eq!(group.in_flight(), 1);

        waiter.await.unwrap();
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_after_release_frees_slot() {
        let group = Arc::new(FlightGroup::new());
        let first = group.acquire("k").await;

        let waiter = {
            let group = Arc::clone(&group);
            tokio::spawn(async move {
                let _guard = group.acquire("k").await;
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Holder leaves while the waiter is still queued, then the waiter goes away
        drop(first);
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());

        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_before_release_frees_slot() {
        let group = Arc::new(FlightGroup::new());
        let first = group.acquire("k").await;

        let waiter = {
            let group = Arc::clone(&group);
            tokio::spawn(async move {
                let _guard = group.acquire("k").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        assert_eq!(group.in_flight(), 1);

        drop(first);
        assert_eq!(group.in_flight(), 0);
    }
}
