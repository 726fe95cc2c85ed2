//! Single-slot, overwrite-on-write handoff between the decoder and the tick
//! loop.
//!
//! A writer publishes a complete value by swapping an `Arc` under a mutex
//! that guards nothing but the swap. Readers keep the last `Arc` they saw and
//! only touch the mutex when the version counter moved, so a tick that finds
//! nothing new costs one atomic load.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub struct SnapshotCell<T> {
    slot: Mutex<Arc<T>>,
    version: AtomicU64,
}

impl<T> SnapshotCell<T> {
    pub fn new(initial: T) -> Self {
        Self {
            slot: Mutex::new(Arc::new(initial)),
            version: AtomicU64::new(0),
        }
    }

    /// Replace the current value. Any value published earlier and not yet
    /// observed is lost.
    pub fn publish(&self, value: T) {
        drop(self.swap(Arc::new(value)));
    }

    /// Publish `next` and hand back the value it replaced, so the writer can
    /// reuse it once no reader holds it.
    pub fn swap(&self, next: Arc<T>) -> Arc<T> {
        let mut slot = self.lock();
        let previous = std::mem::replace(&mut *slot, next);
        self.version.fetch_add(1, Ordering::Release);
        previous
    }

    pub fn load(&self) -> Arc<T> {
        Arc::clone(&self.lock())
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, Arc<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cached read side of a [`SnapshotCell`].
pub struct SnapshotReader<T> {
    cell: Arc<SnapshotCell<T>>,
    seen: u64,
    current: Arc<T>,
}

impl<T> SnapshotReader<T> {
    pub fn new(cell: Arc<SnapshotCell<T>>) -> Self {
        let (current, seen) = {
            let slot = cell.lock();
            (Arc::clone(&slot), cell.version())
        };
        Self {
            cell,
            seen,
            current,
        }
    }

    /// Pick up the latest published value. Returns `true` if it changed.
    pub fn refresh(&mut self) -> bool {
        if self.cell.version() == self.seen {
            return false;
        }
        let slot = self.cell.lock();
        self.current = Arc::clone(&slot);
        // version only moves while the slot is held
        self.seen = self.cell.version();
        true
    }

    pub fn get(&self) -> &T {
        &self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn latest_publish_wins() {
        let cell = Arc::new(SnapshotCell::new(0u32));
        let mut reader = SnapshotReader::new(Arc::clone(&cell));
        assert!(!reader.refresh());
        cell.publish(1);
        cell.publish(2);
        assert!(reader.refresh());
        assert_eq!(*reader.get(), 2);
        assert!(!reader.refresh());
    }

    #[test]
    fn swap_returns_replaced_value() {
        let cell = SnapshotCell::new(1u32);
        let old = cell.swap(Arc::new(2));
        assert_eq!(*old, 1);
        assert_eq!(*cell.load(), 2);
        assert_eq!(cell.version(), 1);
    }

    #[test]
    fn reader_never_sees_torn_values() {
        let cell = Arc::new(SnapshotCell::new([0u64; 4]));
        let writer = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                for i in 1..=10_000u64 {
                    cell.publish([i; 4]);
                }
            })
        };
        let mut reader = SnapshotReader::new(Arc::clone(&cell));
        for _ in 0..10_000 {
            reader.refresh();
            let v = reader.get();
            assert!(v.iter().all(|&x| x == v[0]));
        }
        writer.join().unwrap();
        reader.refresh();
        assert_eq!(*reader.get(), [10_000; 4]);
    }
}
