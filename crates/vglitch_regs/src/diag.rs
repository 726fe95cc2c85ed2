//! Decode diagnostics. Purely observational: nothing in the decode path
//! branches on these counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct LinkDiagnostics {
    bytes_received: AtomicU64,
    frames_committed: AtomicU64,
    frames_dropped: AtomicU64,
    resyncs: AtomicU64,
    bytes_discarded: AtomicU64,
    read_requests: AtomicU64,
}

/// Point-in-time copy of [`LinkDiagnostics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiagSnapshot {
    pub bytes_received: u64,
    pub frames_committed: u64,
    pub frames_dropped: u64,
    pub resyncs: u64,
    pub bytes_discarded: u64,
    pub read_requests: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl LinkDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn byte_received(&self) {
        bump(&self.bytes_received);
    }

    pub(crate) fn frame_committed(&self) {
        bump(&self.frames_committed);
    }

    pub(crate) fn frame_dropped(&self) {
        bump(&self.frames_dropped);
    }

    pub(crate) fn resync(&self) {
        bump(&self.resyncs);
    }

    pub(crate) fn byte_discarded(&self) {
        bump(&self.bytes_discarded);
    }

    pub(crate) fn read_request(&self) {
        bump(&self.read_requests);
    }

    pub fn snapshot(&self) -> DiagSnapshot {
        DiagSnapshot {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames_committed: self.frames_committed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            bytes_discarded: self.bytes_discarded.load(Ordering::Relaxed),
            read_requests: self.read_requests.load(Ordering::Relaxed),
        }
    }
}
