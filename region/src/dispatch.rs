//! Message handlers and how they are run.
//!
//! Handlers are registered per message name. Decoded messages are either run
//! inline on the caller's task or handed to a pool of worker tasks, one
//! bounded queue per worker. Messages from the same circuit always land on
//! the same worker, which keeps their order.

use crate::circuit::CircuitInfo;
use log::{error, warn};
use parking_lot::RwLock;
use protocol::Message;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub type Handler = Arc<dyn Fn(&CircuitInfo, &Message) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
pub struct HandlerTable {
    handlers: RwLock<HashMap<String, Vec<(HandlerId, Handler)>>>,
    next_id: AtomicU64,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler for `message`. Several handlers may share a message;
    /// they run in registration order.
    pub fn register<F>(&self, message: &str, handler: F) -> HandlerId
    where
        F: Fn(&CircuitInfo, &Message) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(message.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        for list in handlers.values_mut() {
            if let Some(pos) = list.iter().position(|(h, _)| *h == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn handler_count(&self, message: &str) -> usize {
        self.handlers.read().get(message).map_or(0, Vec::len)
    }

    /// Runs every handler for the message and returns how many completed.
    ///
    /// Handlers are called without the table lock held, so they may register
    /// or unregister handlers themselves. A handler that panics is logged and
    /// skipped; the rest still run.
    pub fn dispatch(&self, info: &CircuitInfo, message: &Message) -> usize {
        let handlers: Vec<Handler> = match self.handlers.read().get(message.name()) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return 0,
        };
        let mut completed = 0;
        for handler in &handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(info, message))) {
                Ok(()) => completed += 1,
                Err(_) => error!(
                    "Handler for {} panicked on circuit {}",
                    message.name(),
                    info.code
                ),
            }
        }
        completed
    }
}

struct Job {
    info: CircuitInfo,
    message: Message,
}

pub struct Dispatcher {
    table: Arc<HandlerTable>,
    // Empty when dispatching inline.
    queues: Vec<mpsc::Sender<Job>>,
}

impl Dispatcher {
    pub fn inline(table: Arc<HandlerTable>) -> Self {
        Self {
            table,
            queues: Vec::new(),
        }
    }

    /// Starts `count` worker tasks on the current tokio runtime.
    ///
    /// Workers stop once the dispatcher is dropped and their queues drain.
    pub fn spawn_workers(table: Arc<HandlerTable>, count: usize, depth: usize) -> (Self, Vec<JoinHandle<()>>) {
        let count = count.max(1);
        let mut queues = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);

        for _ in 0..count {
            let (tx, mut rx) = mpsc::channel::<Job>(depth.max(1));
            let table = Arc::clone(&table);
            handles.push(tokio::spawn(async move {
                while let Some(job) = rx.recv().await {
                    table.dispatch(&job.info, &job.message);
                }
            }));
            queues.push(tx);
        }

        (Self { table, queues }, handles)
    }

    pub fn table(&self) -> &Arc<HandlerTable> {
        &self.table
    }

    pub fn is_inline(&self) -> bool {
        self.queues.is_empty()
    }

    /// Hands a message to its handlers. Returns false if the worker queue
    /// for this circuit was full and the message was dropped.
    pub fn dispatch(&self, info: CircuitInfo, message: Message) -> bool {
        if self.queues.is_empty() {
            self.table.dispatch(&info, &message);
            return true;
        }

        let shard = info.code as usize % self.queues.len();
        match self.queues[shard].try_send(Job { info, message }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(
                    "Worker queue {} full, dropping {} from circuit {}",
                    shard,
                    job.message.name(),
                    job.info.code
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::messages;
    use std::sync::atomic::AtomicUsize;
    use uuid::Uuid;

    fn info(code: u32) -> CircuitInfo {
        CircuitInfo {
            code,
            agent_id: Uuid::nil(),
            session_id: Uuid::nil(),
            endpoint: "127.0.0.1:4000".parse().unwrap(),
        }
    }

    #[test]
    fn test_register_and_dispatch() {
        let table = HandlerTable::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        table.register("CompletePingCheck", move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let c = Arc::clone(&count);
        table.register("CompletePingCheck", move |_, _| {
            c.fetch_add(10, Ordering::SeqCst);
        });

        let ran = table.dispatch(&info(1), &messages::complete_ping_check(3));
        assert_eq!(ran, 2);
        assert_eq!(count.load(Ordering::SeqCst), 11);
        assert_eq!(table.dispatch(&info(1), &messages::close_circuit()), 0);
    }

    #[test]
    fn test_unregister() {
        let table = HandlerTable::new();
        let id = table.register("CloseCircuit", |_, _| {});
        table.register("CloseCircuit", |_, _| {});
        assert_eq!(table.handler_count("CloseCircuit"), 2);

        assert!(table.unregister(id));
        assert!(!table.unregister(id));
        assert_eq!(table.handler_count("CloseCircuit"), 1);
    }

    #[test]
    fn test_handler_may_register_during_dispatch() {
        let table = Arc::new(HandlerTable::new());
        let inner = Arc::clone(&table);
        table.register("CloseCircuit", move |_, _| {
            inner.register("CloseCircuit", |_, _| {});
        });
        table.dispatch(&info(1), &messages::close_circuit());
        assert_eq!(table.handler_count("CloseCircuit"), 2);
    }

    #[tokio::test]
    async fn test_workers_preserve_per_circuit_order() {
        let table = Arc::new(HandlerTable::new());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        table.register("CompletePingCheck", move |info, msg| {
            let id = msg.field("PingID", "PingID").and_then(|v| v.as_u8()).unwrap();
            s.lock().push((info.code, id));
        });

        let (dispatcher, handles) = Dispatcher::spawn_workers(Arc::clone(&table), 3, 64);
        for id in 0..20u8 {
            assert!(dispatcher.dispatch(info(7), messages::complete_ping_check(id)));
        }
        drop(dispatcher);
        for handle in handles {
            handle.await.unwrap();
        }

        let order: Vec<u8> = seen.lock().iter().map(|(_, id)| *id).collect();
        assert_eq!(order, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_panicking_handler_isolated() {
        let table = HandlerTable::new();
        let count = Arc::new(AtomicUsize::new(0));
        table.register("CloseCircuit", |_, _| panic!("handler failure"));
        let c = Arc::clone(&count);
        table.register("CloseCircuit", move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(table.dispatch(&info(1), &messages::close_circuit()), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_worker_survives_handler_panic() {
        let table = Arc::new(HandlerTable::new());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        table.register("CompletePingCheck", move |_, msg| {
            let id = msg.field("PingID", "PingID").and_then(|v| v.as_u8()).unwrap();
            if id == 0 {
                panic!("bad ping");
            }
            s.lock().push(id);
        });

        let (dispatcher, handles) = Dispatcher::spawn_workers(Arc::clone(&table), 1, 16);
        for id in 0..4u8 {
            assert!(dispatcher.dispatch(info(3), messages::complete_ping_check(id)));
        }
        drop(dispatcher);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let table = Arc::new(HandlerTable::new());
        let (dispatcher, _handles) = Dispatcher::spawn_workers(table, 1, 1);

        // The worker has not run yet on this single-threaded runtime, so the
        // second message finds the queue full.
        assert!(dispatcher.dispatch(info(1), messages::close_circuit()));
        assert!(!dispatcher.dispatch(info(1), messages::close_circuit()));
    }
}
