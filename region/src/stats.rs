//! Transport counters.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct TransportStats {
    received: AtomicU64,
    malformed: AtomicU64,
    unknown_circuit: AtomicU64,
    unauthorized: AtomicU64,
    duplicates: AtomicU64,
    resent_received: AtomicU64,
    sent: AtomicU64,
    bytes_sent: AtomicU64,
    resends: AtomicU64,
    unstable: AtomicU64,
    throttle_queued: AtomicU64,
    throttle_dropped: AtomicU64,
    send_errors: AtomicU64,
    dispatch_dropped: AtomicU64,
    received_by_type: Mutex<HashMap<&'static str, u64>>,
}

/// Point-in-time copy of [`TransportStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub malformed: u64,
    pub unknown_circuit: u64,
    pub unauthorized: u64,
    pub duplicates: u64,
    pub resent_received: u64,
    pub sent: u64,
    pub bytes_sent: u64,
    pub resends: u64,
    pub unstable: u64,
    pub throttle_queued: u64,
    pub throttle_dropped: u64,
    pub send_errors: u64,
    pub dispatch_dropped: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl TransportStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self, message: &'static str) {
        bump(&self.received);
        *self.received_by_type.lock().entry(message).or_insert(0) += 1;
    }

    pub fn record_malformed(&self) {
        bump(&self.malformed);
    }

    pub fn record_unknown_circuit(&self) {
        bump(&self.unknown_circuit);
    }

    pub fn record_unauthorized(&self) {
        bump(&self.unauthorized);
    }

    pub fn record_duplicate(&self) {
        bump(&self.duplicates);
    }

    pub fn record_resent_received(&self) {
        bump(&self.resent_received);
    }

    pub fn record_sent(&self, bytes: usize) {
        bump(&self.sent);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_resend(&self, bytes: usize) {
        bump(&self.resends);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_unstable(&self) {
        bump(&self.unstable);
    }

    pub fn record_throttle_queued(&self) {
        bump(&self.throttle_queued);
    }

    pub fn record_throttle_dropped(&self) {
        bump(&self.throttle_dropped);
    }

    pub fn record_send_error(&self) {
        bump(&self.send_errors);
    }

    pub fn record_dispatch_dropped(&self) {
        bump(&self.dispatch_dropped);
    }

    /// Messages delivered to the simulation side.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Delivered messages of one type.
    pub fn received_for(&self, message: &str) -> u64 {
        self.received_by_type
            .lock()
            .get(message)
            .copied()
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            received: load(&self.received),
            malformed: load(&self.malformed),
            unknown_circuit: load(&self.unknown_circuit),
            unauthorized: load(&self.unauthorized),
            duplicates: load(&self.duplicates),
            resent_received: load(&self.resent_received),
            sent: load(&self.sent),
            bytes_sent: load(&self.bytes_sent),
            resends: load(&self.resends),
            unstable: load(&self.unstable),
            throttle_queued: load(&self.throttle_queued),
            throttle_dropped: load(&self.throttle_dropped),
            send_errors: load(&self.send_errors),
            dispatch_dropped: load(&self.dispatch_dropped),
        }
    }
}
