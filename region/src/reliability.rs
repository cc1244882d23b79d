//! Reliable delivery bookkeeping for one circuit.
//!
//! Outbound reliable packets stay in the pending set until the client acks
//! them. A periodic sweep resends whatever has waited longer than its backoff
//! and gives up on packets that have used every retry. Inbound sequence
//! numbers go through a bounded window so resent packets are delivered once.

use crate::config::RegionConfig;
use crate::throttle::ThrottleCategory;
use protocol::SequenceWindow;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// A sent reliable packet awaiting its ack.
#[derive(Debug, Clone)]
pub struct PendingPacket {
    pub sequence: u32,
    pub bytes: Vec<u8>,
    pub first_sent: Instant,
    pub last_sent: Instant,
    pub retries: u32,
    pub category: ThrottleCategory,
}

/// Resend timing shared by every circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitPolicy {
    pub interval: Duration,
    pub max_interval: Duration,
    pub max_retries: u32,
}

impl RetransmitPolicy {
    pub fn from_config(config: &RegionConfig) -> Self {
        Self {
            interval: config.retry_interval(),
            max_interval: config.max_retry_interval(),
            max_retries: config.max_retries,
        }
    }

    /// Wait before the next resend of a packet already resent `retries` times.
    pub fn timeout(&self, retries: u32) -> Duration {
        let factor = 1u32 << retries.min(16);
        self.interval.saturating_mul(factor).min(self.max_interval)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    Deliver,
    Duplicate,
}

/// Outcome of one retransmit sweep over a circuit.
#[derive(Debug, Default)]
pub struct Sweep {
    /// Sequence and datagram (resent flag set) to write again.
    pub resend: Vec<(u32, Vec<u8>)>,
    /// Packets dropped after their last retry.
    pub expired: Vec<u32>,
    /// Due resends held back by the resend throttle.
    pub deferred: usize,
}

#[derive(Debug)]
pub struct ReliabilityState {
    pending: BTreeMap<u32, PendingPacket>,
    window: SequenceWindow,
    highest_inbound: Option<u32>,
}

impl ReliabilityState {
    pub fn new(dedup_window: usize) -> Self {
        Self {
            pending: BTreeMap::new(),
            window: SequenceWindow::new(dedup_window),
            highest_inbound: None,
        }
    }

    pub fn register(&mut self, sequence: u32, bytes: Vec<u8>, category: ThrottleCategory, now: Instant) {
        self.pending.insert(
            sequence,
            PendingPacket {
                sequence,
                bytes,
                first_sent: now,
                last_sent: now,
                retries: 0,
                category,
            },
        );
    }

    /// Returns false for sequences that are not pending.
    pub fn ack(&mut self, sequence: u32) -> bool {
        self.pending.remove(&sequence).is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, sequence: u32) -> bool {
        self.pending.contains_key(&sequence)
    }

    pub fn pending(&self, sequence: u32) -> Option<&PendingPacket> {
        self.pending.get(&sequence)
    }

    /// Sequence of the packet that has waited longest for its ack.
    pub fn oldest_unacked(&self) -> Option<u32> {
        self.pending
            .values()
            .min_by_key(|p| p.first_sent)
            .map(|p| p.sequence)
    }

    pub fn on_inbound(&mut self, sequence: u32) -> Inbound {
        if !self.window.insert(sequence) {
            return Inbound::Duplicate;
        }
        if self.highest_inbound.map_or(true, |h| sequence > h) {
            self.highest_inbound = Some(sequence);
        }
        Inbound::Deliver
    }

    pub fn highest_inbound(&self) -> Option<u32> {
        self.highest_inbound
    }

    /// Collects due resends and expired packets.
    ///
    /// `admit` is asked for each due resend with its size and returns whether
    /// it may go out now; a refused resend stays pending with its retry count
    /// unchanged.
    pub fn sweep(
        &mut self,
        now: Instant,
        policy: &RetransmitPolicy,
        mut admit: impl FnMut(usize) -> bool,
    ) -> Sweep {
        let mut sweep = Sweep::default();

        for packet in self.pending.values_mut() {
            if now.saturating_duration_since(packet.last_sent) < policy.timeout(packet.retries) {
                continue;
            }
            if packet.retries >= policy.max_retries {
                sweep.expired.push(packet.sequence);
                continue;
            }
            if !admit(packet.bytes.len()) {
                sweep.deferred += 1;
                continue;
            }

            packet.retries += 1;
            packet.last_sent = now;
            protocol::mark_resent(&mut packet.bytes);
            sweep.resend.push((packet.sequence, packet.bytes.clone()));
        }

        for sequence in &sweep.expired {
            self.pending.remove(sequence);
        }
        sweep
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::PacketFlags;

    fn policy() -> RetransmitPolicy {
        RetransmitPolicy {
            interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(350),
            max_retries: 3,
        }
    }

    fn datagram() -> Vec<u8> {
        vec![PacketFlags::RELIABLE.bits(), 0, 0, 0, 1, 0, 1, 0]
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.timeout(0), Duration::from_millis(100));
        assert_eq!(p.timeout(1), Duration::from_millis(200));
        assert_eq!(p.timeout(2), Duration::from_millis(350));
        assert_eq!(p.timeout(40), Duration::from_millis(350));
    }

    #[test]
    fn test_ack_removes_pending() {
        let now = Instant::now();
        let mut state = ReliabilityState::new(16);
        for seq in 1..=5 {
            state.register(seq, datagram(), ThrottleCategory::Task, now);
        }
        assert!(state.ack(2));
        assert!(state.ack(4));
        assert!(!state.ack(4));
        assert!(!state.ack(99));
        assert_eq!(state.pending_len(), 3);
        assert_eq!(state.oldest_unacked(), Some(1));
    }

    #[test]
    fn test_resend_sets_flag_and_counts_retry() {
        let start = Instant::now();
        let mut state = ReliabilityState::new(16);
        state.register(7, datagram(), ThrottleCategory::Task, start);

        let early = state.sweep(start + Duration::from_millis(50), &policy(), |_| true);
        assert!(early.resend.is_empty());

        let due = state.sweep(start + Duration::from_millis(100), &policy(), |_| true);
        assert_eq!(due.resend.len(), 1);
        let (seq, bytes) = &due.resend[0];
        assert_eq!(*seq, 7);
        assert_ne!(bytes[0] & PacketFlags::RESENT.bits(), 0);
        assert_eq!(state.pending(7).unwrap().retries, 1);
    }

    #[test]
    fn test_expires_after_max_retries() {
        let start = Instant::now();
        let p = policy();
        let mut state = ReliabilityState::new(16);
        state.register(1, datagram(), ThrottleCategory::Task, start);

        let mut now = start;
        let mut resends = 0;
        let mut expired = Vec::new();
        for _ in 0..20 {
            now += Duration::from_millis(400);
            let sweep = state.sweep(now, &p, |_| true);
            resends += sweep.resend.len();
            expired.extend(sweep.expired);
        }

        assert_eq!(resends, 3);
        assert_eq!(expired, vec![1]);
        assert_eq!(state.pending_len(), 0);
    }

    #[test]
    fn test_deferred_resend_keeps_retry_budget() {
        let start = Instant::now();
        let mut state = ReliabilityState::new(16);
        state.register(1, datagram(), ThrottleCategory::Task, start);

        let later = start + Duration::from_millis(150);
        let sweep = state.sweep(later, &policy(), |_| false);
        assert_eq!(sweep.deferred, 1);
        assert!(sweep.resend.is_empty());
        assert_eq!(state.pending(1).unwrap().retries, 0);

        let sweep = state.sweep(later, &policy(), |_| true);
        assert_eq!(sweep.resend.len(), 1);
    }

    #[test]
    fn test_inbound_duplicates() {
        let mut state = ReliabilityState::new(4);
        assert_eq!(state.on_inbound(3), Inbound::Deliver);
        assert_eq!(state.on_inbound(1), Inbound::Deliver);
        assert_eq!(state.on_inbound(3), Inbound::Duplicate);
        assert_eq!(state.highest_inbound(), Some(3));
    }
}
