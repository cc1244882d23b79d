//! Outbound path and the periodic transport work.
//!
//! Every outbound packet is offered to the circuit throttle first. Packets
//! that pass are sequenced and written while the circuit's send section is
//! held, so sequence order always matches socket write order.

use crate::circuit::{Circuit, Outbound};
use crate::error::TransportError;
use crate::events::{RegionEvent, RemoveReason};
use crate::server::PacketServer;
use crate::throttle::{Admission, ThrottleCategory};
use log::{debug, error, info, warn};
use protocol::messages::{self, MAX_ACKS_PER_PACKET};
use protocol::{Message, PacketFlags};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the sink with this sequence number.
    Sent { sequence: u32 },
    /// Held by the throttle; goes out on a later tick.
    Queued,
}

/// Totals from one retransmit sweep across all circuits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetransmitSweep {
    pub resent: usize,
    pub expired: usize,
    pub deferred: usize,
}

impl PacketServer {
    pub fn send_reliable(
        &self,
        code: u32,
        message: &Message,
        category: ThrottleCategory,
    ) -> Result<SendOutcome, TransportError> {
        self.send_message(code, message, category, true)
    }

    pub fn send_unreliable(
        &self,
        code: u32,
        message: &Message,
        category: ThrottleCategory,
    ) -> Result<SendOutcome, TransportError> {
        self.send_message(code, message, category, false)
    }

    pub fn send_message(
        &self,
        code: u32,
        message: &Message,
        category: ThrottleCategory,
        reliable: bool,
    ) -> Result<SendOutcome, TransportError> {
        let circuit = self
            .registry
            .lookup(code)
            .ok_or(TransportError::CircuitNotFound(code))?;
        self.send_on(&circuit, message, category, reliable, Instant::now())
    }

    /// Sends to every live circuit and returns how many accepted the packet
    /// (sent or queued).
    pub fn broadcast(&self, message: &Message, category: ThrottleCategory, reliable: bool) -> usize {
        let body = match protocol::encode_body(message) {
            Ok(body) => body,
            Err(e) => {
                error!("Cannot broadcast {}: {}", message.name(), e);
                return 0;
            }
        };
        let now = Instant::now();
        let mut accepted = 0;
        for circuit in self.registry.circuits() {
            let outbound = Outbound {
                template: message.template(),
                body: body.clone(),
                reliable,
            };
            match self.send_encoded(&circuit, outbound, category, now) {
                Ok(_) => accepted += 1,
                Err(e) => debug!("Broadcast to circuit {} failed: {}", circuit.code(), e),
            }
        }
        accepted
    }

    pub(crate) fn send_on(
        &self,
        circuit: &Arc<Circuit>,
        message: &Message,
        category: ThrottleCategory,
        reliable: bool,
        now: Instant,
    ) -> Result<SendOutcome, TransportError> {
        let outbound = Outbound {
            template: message.template(),
            body: protocol::encode_body(message)?,
            reliable,
        };
        self.send_encoded(circuit, outbound, category, now)
    }

    fn send_encoded(
        &self,
        circuit: &Arc<Circuit>,
        outbound: Outbound,
        category: ThrottleCategory,
        now: Instant,
    ) -> Result<SendOutcome, TransportError> {
        let code = circuit.code();
        if circuit.is_closed() {
            return Err(TransportError::CircuitClosed(code));
        }

        let result = {
            // Held across the write so a queued packet is never overtaken.
            let mut throttle = circuit.throttle();
            match throttle.admit(category, outbound.wire_len(), outbound, now) {
                Admission::Send(outbound) => self
                    .transmit(circuit, &outbound, category, now)
                    .map(|sequence| SendOutcome::Sent { sequence }),
                Admission::Queued => {
                    self.stats.record_throttle_queued();
                    Ok(SendOutcome::Queued)
                }
                Admission::Rejected(outbound) => {
                    self.stats.record_throttle_dropped();
                    debug!(
                        "Dropping {} for circuit {}: {:?} throttle full",
                        outbound.template.name, code, category
                    );
                    Err(TransportError::ThrottleExceeded { code, category })
                }
            }
        };

        if let Err(TransportError::CircuitOverloaded(_)) = result {
            self.remove_circuit(code, RemoveReason::Overloaded);
        }
        result
    }

    /// Sequences, frames and writes one packet. The caller holds the
    /// circuit's throttle lock.
    fn transmit(
        &self,
        circuit: &Circuit,
        outbound: &Outbound,
        category: ThrottleCategory,
        now: Instant,
    ) -> Result<u32, TransportError> {
        let mut send = circuit.send_state();
        let sequence = send.next_sequence();
        let acks = if outbound.may_append_acks() {
            send.take_acks(self.config.max_appended_acks)
        } else {
            Vec::new()
        };
        let flags = if outbound.reliable {
            PacketFlags::RELIABLE
        } else {
            PacketFlags::empty()
        };
        let datagram = protocol::frame(flags, sequence, &[], &outbound.body, &acks)?;

        if outbound.reliable {
            let mut reliability = circuit.reliability();
            if reliability.pending_len() >= self.config.max_pending_reliable {
                warn!(
                    "Circuit {} has {} unacked packets, dropping it",
                    circuit.code(),
                    reliability.pending_len()
                );
                return Err(TransportError::CircuitOverloaded(circuit.code()));
            }
            reliability.register(sequence, datagram.clone(), category, now);
        }

        match self.sink.send_to(&datagram, circuit.endpoint()) {
            Ok(_) => {
                self.stats.record_sent(datagram.len());
                debug!(
                    "Sent {} seq {} to circuit {} ({} bytes, {} acks)",
                    outbound.template.name,
                    sequence,
                    circuit.code(),
                    datagram.len(),
                    acks.len()
                );
                Ok(sequence)
            }
            Err(e) => {
                // A reliable packet stays pending and goes out again on the
                // next sweep.
                self.stats.record_send_error();
                error!("Write to {} failed: {}", circuit.endpoint(), e);
                Err(e.into())
            }
        }
    }

    /// Records an already-sent reliable packet for ack tracking.
    pub fn register_outbound(&self, code: u32, sequence: u32, bytes: Vec<u8>, category: ThrottleCategory) -> bool {
        match self.registry.lookup(code) {
            Some(circuit) => {
                circuit.reliability().register(sequence, bytes, category, Instant::now());
                true
            }
            None => false,
        }
    }

    /// Returns false if the circuit or the sequence is unknown.
    pub fn on_ack_received(&self, code: u32, sequence: u32) -> bool {
        self.registry
            .lookup(code)
            .map_or(false, |circuit| circuit.reliability().ack(sequence))
    }

    pub fn can_send(&self, code: u32, category: ThrottleCategory, bytes: usize) -> bool {
        self.registry
            .lookup(code)
            .map_or(false, |circuit| circuit.throttle().can_send(category, bytes))
    }

    pub fn consume(&self, code: u32, category: ThrottleCategory, bytes: usize) {
        if let Some(circuit) = self.registry.lookup(code) {
            circuit.throttle().consume(category, bytes);
        }
    }

    pub fn reset(&self, code: u32, category: ThrottleCategory, now: Instant) {
        if let Some(circuit) = self.registry.lookup(code) {
            circuit.throttle().reset(category, now);
        }
    }

    /// Sends every queued ack as standalone PacketAck messages. Returns the
    /// number of PacketAck packets written.
    pub fn flush_acks(&self) -> usize {
        self.registry
            .circuits()
            .iter()
            .map(|circuit| self.flush_circuit_acks(circuit))
            .sum()
    }

    pub(crate) fn flush_circuit_acks(&self, circuit: &Arc<Circuit>) -> usize {
        let mut packets = 0;
        loop {
            let acks = circuit.send_state().take_acks(MAX_ACKS_PER_PACKET);
            if acks.is_empty() {
                return packets;
            }
            let message = messages::packet_ack(&acks);
            match self.send_on(circuit, &message, ThrottleCategory::Unknown, false, Instant::now()) {
                Ok(_) => packets += 1,
                Err(e) => {
                    debug!("Ack flush for circuit {} failed: {}", circuit.code(), e);
                    return packets;
                }
            }
        }
    }

    /// Resends reliable packets whose ack is overdue and gives up on those
    /// out of retries.
    pub fn check_retransmits(&self, now: Instant) -> RetransmitSweep {
        let mut totals = RetransmitSweep::default();

        for circuit in self.registry.circuits() {
            let sweep = {
                let mut throttle = circuit.throttle();
                throttle.reset(ThrottleCategory::Resend, now);
                let mut reliability = circuit.reliability();
                reliability.sweep(now, &self.policy, |bytes| {
                    if throttle.can_send(ThrottleCategory::Resend, bytes) {
                        throttle.consume(ThrottleCategory::Resend, bytes);
                        true
                    } else {
                        false
                    }
                })
            };

            let endpoint = circuit.endpoint();
            for (sequence, datagram) in &sweep.resend {
                match self.sink.send_to(datagram, endpoint) {
                    Ok(_) => {
                        self.stats.record_resend(datagram.len());
                        debug!("Resent seq {} to circuit {}", sequence, circuit.code());
                    }
                    Err(e) => {
                        self.stats.record_send_error();
                        error!("Resend to {} failed: {}", endpoint, e);
                    }
                }
            }
            for sequence in &sweep.expired {
                self.stats.record_unstable();
                warn!(
                    "Circuit {} gave up on seq {} after {} resends",
                    circuit.code(),
                    sequence,
                    self.policy.max_retries
                );
                self.events.publish(RegionEvent::CircuitUnstable {
                    code: circuit.code(),
                    sequence: *sequence,
                });
            }

            totals.resent += sweep.resend.len();
            totals.expired += sweep.expired.len();
            totals.deferred += sweep.deferred;
        }
        totals
    }

    /// Refills throttles and sends whatever queued packets now fit. Returns
    /// the number sent.
    pub fn tick(&self, now: Instant) -> usize {
        let mut sent = 0;
        for circuit in self.registry.circuits() {
            let mut overloaded = false;
            {
                let mut throttle = circuit.throttle();
                for (category, outbound) in throttle.drain_ready(now) {
                    match self.transmit(&circuit, &outbound, category, now) {
                        Ok(_) => sent += 1,
                        Err(TransportError::CircuitOverloaded(_)) => {
                            overloaded = true;
                            break;
                        }
                        Err(e) => debug!("Queued send on circuit {} failed: {}", circuit.code(), e),
                    }
                }
            }
            if overloaded {
                self.remove_circuit(circuit.code(), RemoveReason::Overloaded);
            }
        }
        sent
    }

    /// Removes circuits that have been silent past the idle timeout.
    pub fn sweep_idle(&self, now: Instant) -> Vec<u32> {
        let idle = self.registry.idle_circuits(now, self.config.idle_timeout());
        for code in &idle {
            info!("Circuit {} timed out", code);
            self.remove_circuit(*code, RemoveReason::IdleTimeout);
        }
        idle
    }

    /// Returns false if no such circuit was live.
    pub fn remove_circuit(&self, code: u32, reason: RemoveReason) -> bool {
        match self.registry.remove_circuit(code) {
            Some(circuit) => {
                info!(
                    "Circuit {} ({}) removed: {:?}",
                    code,
                    circuit.endpoint(),
                    reason
                );
                self.events.publish(RegionEvent::CircuitRemoved { code, reason });
                true
            }
            None => false,
        }
    }

    /// Tells the client the circuit is going away, then removes it.
    pub fn close_circuit(&self, code: u32) -> Result<(), TransportError> {
        let circuit = self
            .registry
            .lookup(code)
            .ok_or(TransportError::CircuitNotFound(code))?;
        if let Err(e) = self.send_on(
            &circuit,
            &messages::close_circuit(),
            ThrottleCategory::Unknown,
            false,
            Instant::now(),
        ) {
            debug!("CloseCircuit to {} failed: {}", code, e);
        }
        self.remove_circuit(code, RemoveReason::Admin);
        Ok(())
    }
}
