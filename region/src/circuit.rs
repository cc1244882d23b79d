//! A single client circuit.
//!
//! Mutable state is split into three sections with their own locks so that
//! receive, send and timer work on one circuit contend only where they must.
//! When more than one is needed they are taken in the order
//! throttle, send, reliability.

use crate::auth::AgentCircuitData;
use crate::config::ThrottleConfig;
use crate::reliability::ReliabilityState;
use crate::throttle::CircuitThrottle;
use parking_lot::{Mutex, MutexGuard, RwLock};
use protocol::{EncodedBody, MessageTemplate};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Identity of a circuit as seen by message handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitInfo {
    pub code: u32,
    pub agent_id: Uuid,
    pub session_id: Uuid,
    pub endpoint: SocketAddr,
}

/// A message body waiting for a sequence number.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub template: &'static MessageTemplate,
    pub body: EncodedBody,
    pub reliable: bool,
}

impl Outbound {
    /// Size used for throttling: header plus body, without appended acks.
    pub fn wire_len(&self) -> usize {
        protocol::header::HEADER_LEN + self.body.bytes.len()
    }

    /// PacketAck already carries acks, and LogoutRequest must not hold any
    /// back from the reply path.
    pub fn may_append_acks(&self) -> bool {
        !matches!(self.template.name, "PacketAck" | "LogoutRequest")
    }
}

/// Outbound sequencing and acks owed to the client.
#[derive(Debug, Default)]
pub struct SendState {
    sequence: u32,
    pending_acks: VecDeque<u32>,
}

impl SendState {
    /// Next outbound sequence number, starting at 1.
    pub fn next_sequence(&mut self) -> u32 {
        self.sequence = protocol::next_sequence(self.sequence);
        self.sequence
    }

    pub fn current_sequence(&self) -> u32 {
        self.sequence
    }

    #[cfg(test)]
    pub(crate) fn set_sequence(&mut self, sequence: u32) {
        self.sequence = sequence;
    }

    pub fn queue_ack(&mut self, sequence: u32) {
        self.pending_acks.push_back(sequence);
    }

    /// Removes up to `max` queued acks, oldest first.
    pub fn take_acks(&mut self, max: usize) -> Vec<u32> {
        let n = max.min(self.pending_acks.len());
        self.pending_acks.drain(..n).collect()
    }

    pub fn pending_acks(&self) -> usize {
        self.pending_acks.len()
    }
}

#[derive(Debug)]
pub struct Circuit {
    code: u32,
    agent: AgentCircuitData,
    endpoint: RwLock<SocketAddr>,
    last_activity: Mutex<Instant>,
    closed: AtomicBool,
    throttle: Mutex<CircuitThrottle<Outbound>>,
    send: Mutex<SendState>,
    reliability: Mutex<ReliabilityState>,
}

impl Circuit {
    pub fn new(
        code: u32,
        endpoint: SocketAddr,
        agent: AgentCircuitData,
        throttle: &ThrottleConfig,
        dedup_window: usize,
        now: Instant,
    ) -> Self {
        Self {
            code,
            agent,
            endpoint: RwLock::new(endpoint),
            last_activity: Mutex::new(now),
            closed: AtomicBool::new(false),
            throttle: Mutex::new(CircuitThrottle::new(throttle, now)),
            send: Mutex::new(SendState::default()),
            reliability: Mutex::new(ReliabilityState::new(dedup_window)),
        }
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn agent_id(&self) -> Uuid {
        self.agent.agent_id
    }

    pub fn session_id(&self) -> Uuid {
        self.agent.session_id
    }

    pub fn agent(&self) -> &AgentCircuitData {
        &self.agent
    }

    pub fn endpoint(&self) -> SocketAddr {
        *self.endpoint.read()
    }

    pub(crate) fn set_endpoint(&self, endpoint: SocketAddr) {
        *self.endpoint.write() = endpoint;
    }

    pub fn info(&self) -> CircuitInfo {
        CircuitInfo {
            code: self.code,
            agent_id: self.agent.agent_id,
            session_id: self.agent.session_id,
            endpoint: self.endpoint(),
        }
    }

    pub fn touch(&self, now: Instant) {
        *self.last_activity.lock() = now;
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity()) > timeout
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the circuit closed. Returns false if it already was.
    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub fn queue_ack(&self, sequence: u32) {
        self.send.lock().queue_ack(sequence);
    }

    pub fn pending_acks(&self) -> usize {
        self.send.lock().pending_acks()
    }

    pub fn unacked(&self) -> usize {
        self.reliability.lock().pending_len()
    }

    pub fn queued(&self) -> usize {
        self.throttle.lock().total_queued()
    }

    pub fn throttle(&self) -> MutexGuard<'_, CircuitThrottle<Outbound>> {
        self.throttle.lock()
    }

    pub fn send_state(&self) -> MutexGuard<'_, SendState> {
        self.send.lock()
    }

    pub fn reliability(&self) -> MutexGuard<'_, ReliabilityState> {
        self.reliability.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::MAX_SEQUENCE;

    fn circuit() -> Circuit {
        Circuit::new(
            42,
            "127.0.0.1:5000".parse().unwrap(),
            AgentCircuitData::new(42, Uuid::new_v4(), Uuid::new_v4()),
            &ThrottleConfig::default(),
            64,
            Instant::now(),
        )
    }

    #[test]
    fn test_sequence_starts_at_one_and_wraps() {
        let mut send = SendState::default();
        assert_eq!(send.next_sequence(), 1);
        assert_eq!(send.next_sequence(), 2);

        send.sequence = MAX_SEQUENCE - 1;
        assert_eq!(send.next_sequence(), MAX_SEQUENCE);
        assert_eq!(send.next_sequence(), 1);
    }

    #[test]
    fn test_take_acks_bounded() {
        let mut send = SendState::default();
        for seq in 1..=15 {
            send.queue_ack(seq);
        }
        assert_eq!(send.take_acks(10), (1..=10).collect::<Vec<_>>());
        assert_eq!(send.pending_acks(), 5);
        assert_eq!(send.take_acks(10), (11..=15).collect::<Vec<_>>());
        assert!(send.take_acks(10).is_empty());
    }

    #[test]
    fn test_idle_and_close() {
        let c = circuit();
        let start = c.last_activity();
        assert!(!c.is_idle(start + Duration::from_secs(5), Duration::from_secs(10)));
        assert!(c.is_idle(start + Duration::from_secs(11), Duration::from_secs(10)));

        c.touch(start + Duration::from_secs(11));
        assert!(!c.is_idle(start + Duration::from_secs(12), Duration::from_secs(10)));

        assert!(!c.is_closed());
        assert!(c.close());
        assert!(!c.close());
        assert!(c.is_closed());
    }

    #[test]
    fn test_state_allocated_eagerly() {
        let c = circuit();
        assert_eq!(c.unacked(), 0);
        assert_eq!(c.queued(), 0);
        assert!(c.throttle().bucket(crate::throttle::ThrottleCategory::Task).is_some());
        assert_eq!(c.info().code, 42);
    }
}
