//! Client side of one circuit.
//!
//! Keeps just enough state to be a well-behaved peer: outbound sequencing,
//! acks owed to the region (appended or flushed as PacketAck), a duplicate
//! window for inbound packets and a record of unacked reliable sends.

use log::{debug, info, trace, warn};
use protocol::messages::{self, MAX_ACKS_PER_PACKET};
use protocol::{
    DecodeError, EncodeError, Message, Packet, PacketFlags, SequenceWindow, TemplateRegistry, Value,
    MAX_APPENDED_ACKS,
};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::UdpSocket;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad packet from region: {0}")]
    Decode(#[from] DecodeError),

    #[error("failed to encode packet: {0}")]
    Encode(#[from] EncodeError),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

#[derive(Debug)]
struct Unacked {
    datagram: Vec<u8>,
    sent_at: Instant,
}

pub struct ViewerConnection {
    socket: UdpSocket,
    region: SocketAddr,
    templates: TemplateRegistry,
    circuit_code: u32,
    agent_id: Uuid,
    session_id: Uuid,

    sequence: u32,
    window: SequenceWindow,
    pending_acks: Vec<u32>,
    unacked: BTreeMap<u32, Unacked>,
    next_ping: u8,
}

impl ViewerConnection {
    /// Binds a local socket for talking to `region`. Nothing is sent until
    /// [`use_circuit_code`](Self::use_circuit_code).
    pub async fn connect(
        region: SocketAddr,
        circuit_code: u32,
        agent_id: Uuid,
        session_id: Uuid,
    ) -> Result<Self, ViewerError> {
        let local = if region.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(local).await?;

        Ok(Self {
            socket,
            region,
            templates: TemplateRegistry::standard(),
            circuit_code,
            agent_id,
            session_id,
            sequence: 0,
            window: SequenceWindow::default(),
            pending_acks: Vec::new(),
            unacked: BTreeMap::new(),
            next_ping: 0,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ViewerError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn circuit_code(&self) -> u32 {
        self.circuit_code
    }

    pub fn agent_id(&self) -> Uuid {
        self.agent_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Reliable packets sent and not yet acked by the region.
    pub fn unacked_count(&self) -> usize {
        self.unacked.len()
    }

    /// Acks owed to the region.
    pub fn pending_acks(&self) -> usize {
        self.pending_acks.len()
    }

    /// Opens the circuit and waits for the region to ack it, then announces
    /// the agent with CompleteAgentMovement.
    pub async fn use_circuit_code(&mut self, timeout: Duration) -> Result<(), ViewerError> {
        info!("Opening circuit {} to {}", self.circuit_code, self.region);
        let message = messages::use_circuit_code(self.circuit_code, self.session_id, self.agent_id);
        let sequence = self.send(&message, true).await?;

        let deadline = Instant::now() + timeout;
        while self.unacked.contains_key(&sequence) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ViewerError::Timeout("UseCircuitCode ack"));
            }
            self.recv(remaining).await?;
        }

        let movement = messages::complete_agent_movement(self.agent_id, self.session_id, self.circuit_code);
        self.send(&movement, true).await?;
        info!("Circuit {} is open", self.circuit_code);
        Ok(())
    }

    /// Sends one message and returns its sequence number.
    pub async fn send(&mut self, message: &Message, reliable: bool) -> Result<u32, ViewerError> {
        self.sequence = protocol::next_sequence(self.sequence);
        let mut packet = Packet::new(self.sequence, message.clone());
        if reliable {
            packet.flags |= PacketFlags::RELIABLE;
        }
        if !matches!(message.name(), "PacketAck" | "LogoutRequest") {
            let n = self.pending_acks.len().min(MAX_APPENDED_ACKS);
            packet.acks = self.pending_acks.drain(..n).collect();
        }

        let datagram = protocol::encode(&packet)?;
        self.socket.send_to(&datagram, self.region).await?;
        trace!("Sent {} seq {}", message.name(), self.sequence);

        if reliable {
            self.unacked.insert(
                self.sequence,
                Unacked {
                    datagram,
                    sent_at: Instant::now(),
                },
            );
        }
        Ok(self.sequence)
    }

    /// Sends every owed ack in PacketAck messages.
    pub async fn flush_acks(&mut self) -> Result<usize, ViewerError> {
        let mut sent = 0;
        while !self.pending_acks.is_empty() {
            let n = self.pending_acks.len().min(MAX_ACKS_PER_PACKET);
            let acks: Vec<u32> = self.pending_acks.drain(..n).collect();
            self.send(&messages::packet_ack(&acks), false).await?;
            sent += 1;
        }
        Ok(sent)
    }

    /// Resends reliable packets unacked for longer than `after`, with the
    /// resent flag set.
    pub async fn resend_overdue(&mut self, after: Duration) -> Result<usize, ViewerError> {
        let now = Instant::now();
        let mut resent = 0;
        for (sequence, entry) in self.unacked.iter_mut() {
            if now.saturating_duration_since(entry.sent_at) < after {
                continue;
            }
            protocol::mark_resent(&mut entry.datagram);
            entry.sent_at = now;
            self.socket.send_to(&entry.datagram, self.region).await?;
            debug!("Resent seq {}", sequence);
            resent += 1;
        }
        Ok(resent)
    }

    /// Waits up to `timeout` for the next new packet from the region.
    ///
    /// Acks are applied, reliable packets are queued for acking, duplicates
    /// are swallowed and pings are answered before the packet is returned.
    /// Returns `None` on timeout.
    pub async fn recv(&mut self, timeout: Duration) -> Result<Option<Packet>, ViewerError> {
        let deadline = Instant::now() + timeout;
        let mut buffer = vec![0u8; 8192];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let (len, from) = match tokio::time::timeout(remaining, self.socket.recv_from(&mut buffer)).await {
                Ok(received) => received?,
                Err(_) => return Ok(None),
            };
            if from != self.region {
                debug!("Ignoring datagram from {}", from);
                continue;
            }

            let packet = match protocol::decode(&buffer[..len], &self.templates) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!("Dropping bad packet from region: {}", e);
                    continue;
                }
            };

            for ack in &packet.acks {
                self.unacked.remove(ack);
            }
            if packet.is_reliable() {
                self.pending_acks.push(packet.sequence);
            }
            if !self.window.insert(packet.sequence) {
                debug!("Duplicate seq {} from region", packet.sequence);
                continue;
            }

            match packet.name() {
                "PacketAck" => {
                    for ack in messages::acked_sequences(&packet.message) {
                        self.unacked.remove(&ack);
                    }
                }
                "StartPingCheck" => {
                    let id = packet
                        .message
                        .field("PingID", "PingID")
                        .and_then(Value::as_u8)
                        .unwrap_or(0);
                    self.send(&messages::complete_ping_check(id), false).await?;
                }
                _ => {}
            }
            return Ok(Some(packet));
        }
    }

    /// Waits for a packet carrying `name`, dropping anything else.
    pub async fn wait_for(&mut self, name: &'static str, timeout: Duration) -> Result<Packet, ViewerError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.recv(remaining).await? {
                Some(packet) if packet.name() == name => return Ok(packet),
                Some(_) => continue,
                None => return Err(ViewerError::Timeout(name)),
            }
        }
    }

    /// Round trip of one StartPingCheck.
    pub async fn ping(&mut self, timeout: Duration) -> Result<Duration, ViewerError> {
        let id = self.next_ping;
        self.next_ping = self.next_ping.wrapping_add(1);
        let oldest = self.unacked.keys().next().copied().unwrap_or(0);

        let started = Instant::now();
        self.send(&messages::start_ping_check(id, oldest), false).await?;
        let deadline = started + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let reply = self.wait_for("CompletePingCheck", remaining).await?;
            if reply.message.field("PingID", "PingID") == Some(&Value::U8(id)) {
                return Ok(started.elapsed());
            }
        }
    }

    pub async fn chat(&mut self, text: &str) -> Result<u32, ViewerError> {
        let message = messages::chat_from_viewer(self.agent_id, self.session_id, text, 1, 0);
        self.send(&message, true).await
    }

    /// Sends LogoutRequest and waits for the reply, which is acked before
    /// returning.
    pub async fn logout(&mut self, timeout: Duration) -> Result<(), ViewerError> {
        let message = messages::logout_request(self.agent_id, self.session_id);
        self.send(&message, true).await?;
        self.wait_for("LogoutReply", timeout).await?;
        self.flush_acks().await?;
        info!("Logged out of circuit {}", self.circuit_code);
        Ok(())
    }
}
