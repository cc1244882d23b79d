//! Inbound datagram handling.

use crate::circuit::Circuit;
use crate::error::TransportError;
use crate::events::{RegionEvent, RemoveReason};
use crate::reliability::Inbound;
use crate::server::PacketServer;
use crate::throttle::ThrottleCategory;
use log::{debug, info, trace, warn};
use protocol::{messages, Message, Packet, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// What became of one inbound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// Counted and handed to the handlers.
    Delivered { code: u32, message: &'static str },
    /// Already seen; re-acked but not delivered.
    Duplicate { code: u32, sequence: u32 },
    CircuitOpened { code: u32 },
    /// A live circuit was picked up from a new endpoint.
    Rebound { code: u32 },
    /// Delivered, after which the circuit was removed.
    CircuitClosed { code: u32, reason: RemoveReason },
}

/// Code, session and agent carried by a UseCircuitCode.
fn circuit_code_fields(message: &Message) -> Option<(u32, Uuid, Uuid)> {
    let code = message.field("CircuitCode", "Code")?.as_u32()?;
    let session = message.field("CircuitCode", "SessionID")?.as_uuid()?;
    let agent = message.field("CircuitCode", "ID")?.as_uuid()?;
    Some((code, session, agent))
}

impl PacketServer {
    /// Processes one datagram received from `from`.
    ///
    /// Errors are per datagram: they are counted and logged, and never
    /// affect other circuits.
    pub fn process_datagram(&self, data: &[u8], from: SocketAddr, now: Instant) -> Result<Received, TransportError> {
        let circuit = self.registry.lookup_by_endpoint(from);

        let packet = match protocol::decode(data, &self.templates) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.record_malformed();
                debug!("Dropping {} byte datagram from {}: {}", data.len(), from, e);
                return Err(e.into());
            }
        };
        trace!(
            "{} seq {} from {} ({} acks)",
            packet.name(),
            packet.sequence,
            from,
            packet.acks.len()
        );

        match circuit {
            Some(circuit) => self.receive_on_circuit(&circuit, packet, now),
            None => self.receive_unbound(packet, from, now),
        }
    }

    /// Traffic from an endpoint with no circuit. Only UseCircuitCode is
    /// accepted.
    fn receive_unbound(&self, packet: Packet, from: SocketAddr, now: Instant) -> Result<Received, TransportError> {
        if packet.name() != "UseCircuitCode" {
            self.stats.record_unknown_circuit();
            debug!("{} from {} has no circuit", packet.name(), from);
            return Err(TransportError::UnknownCircuit(from));
        }
        let Some((code, session, agent)) = circuit_code_fields(&packet.message) else {
            self.stats.record_unauthorized();
            return Err(TransportError::Unauthorized(0));
        };

        if let Some(existing) = self.registry.lookup(code) {
            if existing.agent_id() != agent || existing.session_id() != session {
                self.stats.record_unauthorized();
                warn!("UseCircuitCode {} from {} does not match the live circuit", code, from);
                return Err(TransportError::Unauthorized(code));
            }
            self.registry.rebind(code, from)?;
            existing.touch(now);
            self.record_handshake(&existing, &packet);
            return Ok(Received::Rebound { code });
        }

        let Some(data) = self.authorizer.authenticate(code, agent, session) else {
            self.stats.record_unauthorized();
            warn!("Rejected circuit code {} from {}", code, from);
            return Err(TransportError::Unauthorized(code));
        };

        let circuit = self.registry.add_circuit(code, from, data, now)?;
        self.record_handshake(&circuit, &packet);
        self.flush_circuit_acks(&circuit);
        self.events.publish(RegionEvent::CircuitAdded {
            code,
            agent_id: agent,
            endpoint: from,
        });
        info!("Circuit {} opened for agent {} at {}", code, agent, from);
        Ok(Received::CircuitOpened { code })
    }

    /// The establishing UseCircuitCode is acked and remembered but never
    /// delivered to handlers.
    fn record_handshake(&self, circuit: &Circuit, packet: &Packet) {
        if packet.is_reliable() {
            circuit.queue_ack(packet.sequence);
        }
        circuit.reliability().on_inbound(packet.sequence);
    }

    fn receive_on_circuit(
        &self,
        circuit: &Arc<Circuit>,
        packet: Packet,
        now: Instant,
    ) -> Result<Received, TransportError> {
        let code = circuit.code();
        circuit.touch(now);

        if !packet.acks.is_empty() {
            self.apply_acks(circuit, &packet.acks);
        }
        if packet.is_reliable() {
            circuit.queue_ack(packet.sequence);
        }
        if self.note_inbound(circuit, packet.sequence, packet.is_resent()) == Inbound::Duplicate {
            return Ok(Received::Duplicate {
                code,
                sequence: packet.sequence,
            });
        }

        let mut removal = None;
        match packet.name() {
            "PacketAck" => {
                self.apply_acks(circuit, &messages::acked_sequences(&packet.message));
            }
            "StartPingCheck" => {
                let ping_id = packet
                    .message
                    .field("PingID", "PingID")
                    .and_then(Value::as_u8)
                    .unwrap_or(0);
                let reply = messages::complete_ping_check(ping_id);
                if let Err(e) = self.send_on(circuit, &reply, ThrottleCategory::Unknown, false, now) {
                    debug!("Ping reply to circuit {} failed: {}", code, e);
                }
            }
            "AgentThrottle" => match messages::throttle_rates(&packet.message) {
                Some(bits) => {
                    let bytes: Vec<f64> = bits.iter().map(|b| f64::from(*b) / 8.0).collect();
                    circuit.throttle().set_rates(&bytes);
                    debug!("Circuit {} throttles set to {:?} bytes/s", code, bytes);
                }
                None => debug!("Short AgentThrottle on circuit {}", code),
            },
            "LogoutRequest" => {
                let reply = messages::logout_reply(circuit.agent_id(), circuit.session_id());
                if let Err(e) = self.send_on(circuit, &reply, ThrottleCategory::Task, true, now) {
                    debug!("Logout reply to circuit {} failed: {}", code, e);
                }
                self.flush_circuit_acks(circuit);
                removal = Some(RemoveReason::Logout);
            }
            "CloseCircuit" => removal = Some(RemoveReason::Closed),
            "UseCircuitCode" => {
                match circuit_code_fields(&packet.message) {
                    Some((new_code, session, agent)) if new_code != code => {
                        return self.switch_circuit(circuit, packet, (new_code, session, agent), now);
                    }
                    _ => return Ok(Received::Rebound { code }),
                }
            }
            _ => {}
        }

        let name = packet.name();
        self.stats.record_received(name);
        if !self.dispatcher.dispatch(circuit.info(), packet.message) {
            self.stats.record_dispatch_dropped();
        }

        if let Some(reason) = removal {
            self.remove_circuit(code, reason);
            return Ok(Received::CircuitClosed { code, reason });
        }
        Ok(Received::Delivered { code, message: name })
    }

    /// An endpoint bound to one circuit presents a different code. The old
    /// circuit stays until the new code checks out.
    fn switch_circuit(
        &self,
        circuit: &Arc<Circuit>,
        packet: Packet,
        (new_code, session, agent): (u32, Uuid, Uuid),
        now: Instant,
    ) -> Result<Received, TransportError> {
        let code = circuit.code();
        let from = circuit.endpoint();
        let accepted = match self.registry.lookup(new_code) {
            Some(live) => live.agent_id() == agent && live.session_id() == session,
            None => self.authorizer.authenticate(new_code, agent, session).is_some(),
        };
        if !accepted {
            self.stats.record_unauthorized();
            warn!("Circuit {} at {} asked for unauthorized code {}", code, from, new_code);
            return Err(TransportError::Unauthorized(new_code));
        }

        info!("Endpoint {} switched from circuit {} to {}", from, code, new_code);
        self.remove_circuit(code, RemoveReason::Replaced);
        self.receive_unbound(packet, from, now)
    }

    /// Runs an inbound sequence number through the circuit's duplicate
    /// window.
    pub fn on_inbound_received(&self, code: u32, sequence: u32, is_resend: bool) -> Result<Inbound, TransportError> {
        let circuit = self
            .registry
            .lookup(code)
            .ok_or(TransportError::CircuitNotFound(code))?;
        Ok(self.note_inbound(&circuit, sequence, is_resend))
    }

    fn note_inbound(&self, circuit: &Circuit, sequence: u32, is_resend: bool) -> Inbound {
        let verdict = circuit.reliability().on_inbound(sequence);
        match verdict {
            Inbound::Duplicate => {
                self.stats.record_duplicate();
                debug!("Duplicate seq {} on circuit {}", sequence, circuit.code());
            }
            Inbound::Deliver if is_resend => self.stats.record_resent_received(),
            Inbound::Deliver => {}
        }
        verdict
    }

    fn apply_acks(&self, circuit: &Circuit, sequences: &[u32]) {
        let mut reliability = circuit.reliability();
        for sequence in sequences {
            if !reliability.ack(*sequence) {
                trace!("Ack for unknown seq {} on circuit {}", sequence, circuit.code());
            }
        }
    }
}
