use std::net::SocketAddr;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Why a circuit went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveReason {
    Logout,
    /// Client sent CloseCircuit.
    Closed,
    IdleTimeout,
    /// Too many unacknowledged reliable packets.
    Overloaded,
    /// A new circuit took over the endpoint.
    Replaced,
    /// Removed by the simulation.
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionEvent {
    CircuitAdded {
        code: u32,
        agent_id: Uuid,
        endpoint: SocketAddr,
    },
    CircuitRemoved {
        code: u32,
        reason: RemoveReason,
    },
    /// A reliable packet used every retry without being acked.
    CircuitUnstable { code: u32, sequence: u32 },
}

/// Fan-out of circuit lifecycle events. Dropping a receiver unsubscribes it;
/// a receiver that falls behind skips the oldest events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RegionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegionEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: RegionEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_subscriber_sees_events() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(RegionEvent::CircuitUnstable { code: 1, sequence: 9 });

        assert_eq!(a.try_recv().unwrap(), RegionEvent::CircuitUnstable { code: 1, sequence: 9 });
        assert_eq!(b.try_recv().unwrap(), RegionEvent::CircuitUnstable { code: 1, sequence: 9 });
    }

    #[test]
    fn test_dropped_receiver_unsubscribes() {
        let bus = EventBus::new(8);
        let rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(rx);
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(RegionEvent::CircuitRemoved {
            code: 1,
            reason: RemoveReason::Admin,
        });
    }
}
