//! Live circuit table
//!
//! The registry owns every circuit and indexes it two ways:
//! - by circuit code, for the simulation side and timers
//! - by remote endpoint, for demultiplexing inbound datagrams
//!
//! Both indexes sit under one lock so they never disagree. Lookups hand out
//! `Arc<Circuit>` clones; a circuit removed while someone still holds a clone
//! is marked closed and refuses further sends.

use crate::auth::AgentCircuitData;
use crate::circuit::Circuit;
use crate::config::ThrottleConfig;
use crate::error::TransportError;
use log::{debug, info};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Tables {
    by_code: HashMap<u32, Arc<Circuit>>,
    by_endpoint: HashMap<SocketAddr, u32>,
}

/// Thread-safe map of circuit code and endpoint to circuit.
#[derive(Debug)]
pub struct CircuitRegistry {
    tables: RwLock<Tables>,
    throttle: ThrottleConfig,
    dedup_window: usize,
}

impl CircuitRegistry {
    /// Creates an empty registry
    ///
    /// `throttle` and `dedup_window` size the per-circuit state allocated
    /// by [`add_circuit`](Self::add_circuit).
    pub fn new(throttle: ThrottleConfig, dedup_window: usize) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            throttle,
            dedup_window,
        }
    }

    /// Registers a new circuit
    ///
    /// Fails without touching existing state if the code is already live or
    /// the endpoint already belongs to another circuit. The new circuit's
    /// reliability and throttle state exist before this returns.
    pub fn add_circuit(
        &self,
        code: u32,
        endpoint: SocketAddr,
        agent: AgentCircuitData,
        now: Instant,
    ) -> Result<Arc<Circuit>, TransportError> {
        let mut tables = self.tables.write();
        if tables.by_code.contains_key(&code) {
            return Err(TransportError::AlreadyExists(code));
        }
        if tables.by_endpoint.contains_key(&endpoint) {
            return Err(TransportError::EndpointInUse(endpoint));
        }

        let circuit = Arc::new(Circuit::new(
            code,
            endpoint,
            agent,
            &self.throttle,
            self.dedup_window,
            now,
        ));
        tables.by_code.insert(code, Arc::clone(&circuit));
        tables.by_endpoint.insert(endpoint, code);
        info!("Circuit {} added for {}", code, endpoint);
        Ok(circuit)
    }

    /// Removes a circuit and marks it closed
    ///
    /// Returns the circuit if it was present. Holders of other clones see
    /// `is_closed()` from now on.
    pub fn remove_circuit(&self, code: u32) -> Option<Arc<Circuit>> {
        let mut tables = self.tables.write();
        let circuit = tables.by_code.remove(&code)?;
        let endpoint = circuit.endpoint();
        if tables.by_endpoint.get(&endpoint) == Some(&code) {
            tables.by_endpoint.remove(&endpoint);
        }
        circuit.close();
        debug!("Circuit {} removed from registry", code);
        Some(circuit)
    }

    pub fn lookup(&self, code: u32) -> Option<Arc<Circuit>> {
        self.tables.read().by_code.get(&code).cloned()
    }

    pub fn lookup_by_endpoint(&self, endpoint: SocketAddr) -> Option<Arc<Circuit>> {
        let tables = self.tables.read();
        let code = tables.by_endpoint.get(&endpoint)?;
        tables.by_code.get(code).cloned()
    }

    pub fn has_circuit(&self, code: u32) -> bool {
        self.tables.read().by_code.contains_key(&code)
    }

    /// Moves a live circuit to a new endpoint, e.g. after a NAT rebinding.
    pub fn rebind(&self, code: u32, endpoint: SocketAddr) -> Result<(), TransportError> {
        let mut tables = self.tables.write();
        match tables.by_endpoint.get(&endpoint) {
            Some(&owner) if owner == code => return Ok(()),
            Some(_) => return Err(TransportError::EndpointInUse(endpoint)),
            None => {}
        }
        let circuit = tables
            .by_code
            .get(&code)
            .cloned()
            .ok_or(TransportError::CircuitNotFound(code))?;

        let old = circuit.endpoint();
        tables.by_endpoint.remove(&old);
        tables.by_endpoint.insert(endpoint, code);
        circuit.set_endpoint(endpoint);
        info!("Circuit {} moved from {} to {}", code, old, endpoint);
        Ok(())
    }

    /// Snapshot of every live circuit.
    pub fn circuits(&self) -> Vec<Arc<Circuit>> {
        self.tables.read().by_code.values().cloned().collect()
    }

    /// Codes of circuits with no inbound traffic for longer than `timeout`.
    pub fn idle_circuits(&self, now: Instant, timeout: Duration) -> Vec<u32> {
        self.tables
            .read()
            .by_code
            .values()
            .filter(|c| c.is_idle(now, timeout))
            .map(|c| c.code())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tables.read().by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().by_code.is_empty()
    }
}
