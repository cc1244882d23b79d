//! The packet server: every piece of per-region transport state in one
//! place, with no I/O of its own.
//!
//! Inbound datagrams are fed to [`PacketServer::process_datagram`] and
//! outbound datagrams leave through a [`DatagramSink`]. Timers call the
//! periodic entry points (`flush_acks`, `check_retransmits`, `tick`,
//! `sweep_idle`). The runtime in [`crate::network`] wires these to a socket
//! and tokio intervals; tests drive them directly with explicit instants.

use crate::auth::Authorizer;
use crate::circuit::Circuit;
use crate::config::RegionConfig;
use crate::dispatch::{Dispatcher, HandlerTable};
use crate::events::{EventBus, RegionEvent};
use crate::registry::CircuitRegistry;
use crate::reliability::RetransmitPolicy;
use crate::stats::TransportStats;
use crate::transport::DatagramSink;
use protocol::TemplateRegistry;
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct PacketServer {
    pub(crate) config: RegionConfig,
    pub(crate) policy: RetransmitPolicy,
    pub(crate) templates: TemplateRegistry,
    pub(crate) registry: CircuitRegistry,
    pub(crate) authorizer: Arc<dyn Authorizer>,
    pub(crate) sink: Arc<dyn DatagramSink>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) events: EventBus,
    pub(crate) stats: TransportStats,
}

impl PacketServer {
    pub fn new(
        config: RegionConfig,
        authorizer: Arc<dyn Authorizer>,
        sink: Arc<dyn DatagramSink>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            policy: RetransmitPolicy::from_config(&config),
            templates: TemplateRegistry::standard(),
            registry: CircuitRegistry::new(config.throttle.clone(), config.dedup_window),
            events: EventBus::new(config.event_capacity),
            stats: TransportStats::new(),
            config,
            authorizer,
            sink,
            dispatcher,
        }
    }

    /// Server that runs handlers on the calling task.
    pub fn inline(config: RegionConfig, authorizer: Arc<dyn Authorizer>, sink: Arc<dyn DatagramSink>) -> Self {
        let dispatcher = Dispatcher::inline(Arc::new(HandlerTable::new()));
        Self::new(config, authorizer, sink, dispatcher)
    }

    /// Replaces the message templates used to decode inbound datagrams.
    pub fn with_templates(mut self, templates: TemplateRegistry) -> Self {
        self.templates = templates;
        self
    }

    pub fn config(&self) -> &RegionConfig {
        &self.config
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn handlers(&self) -> &Arc<HandlerTable> {
        self.dispatcher.table()
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegionEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn circuit(&self, code: u32) -> Option<Arc<Circuit>> {
        self.registry.lookup(code)
    }

    pub fn has_circuit(&self, code: u32) -> bool {
        self.registry.has_circuit(code)
    }

    pub fn circuit_count(&self) -> usize {
        self.registry.len()
    }

    pub fn circuit_codes(&self) -> Vec<u32> {
        let mut codes: Vec<u32> = self.registry.circuits().iter().map(|c| c.code()).collect();
        codes.sort_unstable();
        codes
    }
}
