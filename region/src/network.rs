//! Socket runtime around the packet server.
//!
//! One task reads the UDP socket and feeds every datagram to the packet
//! server. Three interval tasks drive the timers: ack flush plus retransmit
//! sweep, throttle tick, and idle sweep. All of them stop when the shutdown
//! flag flips.

use crate::auth::Authorizer;
use crate::config::RegionConfig;
use crate::dispatch::{Dispatcher, HandlerTable};
use crate::error::TransportError;
use crate::events::RegionEvent;
use crate::server::PacketServer;
use log::{debug, error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Largest datagram the receive loop accepts.
const RECV_BUFFER: usize = 8192;

const WORKER_DRAIN: Duration = Duration::from_secs(1);

/// Flips the runtime's shutdown flag. Cloneable and usable from any task.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        // Fails only once every task has already exited.
        let _ = self.tx.send(true);
    }
}

/// A region transport bound to a UDP socket.
pub struct RegionServer {
    socket: Arc<UdpSocket>,
    core: Arc<PacketServer>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl RegionServer {
    /// Binds `config.bind` and builds the packet server. Handlers run on
    /// `config.worker_count` worker tasks, or inline when that is zero.
    pub async fn bind(config: RegionConfig, authorizer: Arc<dyn Authorizer>) -> Result<Self, TransportError> {
        let socket = Arc::new(UdpSocket::bind(config.bind).await?);
        info!("Region listening on {}", socket.local_addr()?);

        let table = Arc::new(HandlerTable::new());
        let (dispatcher, workers) = if config.worker_count == 0 {
            (Dispatcher::inline(table), Vec::new())
        } else {
            Dispatcher::spawn_workers(table, config.worker_count, config.worker_queue_depth)
        };

        let core = Arc::new(PacketServer::new(config, authorizer, socket.clone(), dispatcher));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            socket,
            core,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            workers,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn core(&self) -> &Arc<PacketServer> {
        &self.core
    }

    pub fn handlers(&self) -> &Arc<HandlerTable> {
        self.core.handlers()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegionEvent> {
        self.core.subscribe()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Runs until shutdown is requested, then waits for the tasks to stop.
    pub async fn run(self) -> Result<(), TransportError> {
        let config = self.core.config().clone();
        let tasks = vec![
            self.spawn_network_receiver(),
            self.spawn_ack_timer(config.ack_interval()),
            self.spawn_throttle_timer(config.throttle.tick()),
            self.spawn_idle_checker(config.idle_check_interval()),
        ];

        for task in tasks {
            if let Err(e) = task.await {
                error!("Region task panicked: {}", e);
            }
        }

        // Workers drain once the last handle to the packet server is gone.
        // Callers may still hold one, so the wait is bounded.
        let Self { core, workers, .. } = self;
        drop(core);
        for mut worker in workers {
            match tokio::time::timeout(WORKER_DRAIN, &mut worker).await {
                Ok(Err(e)) => error!("Handler worker panicked: {}", e),
                Ok(Ok(())) => {}
                Err(_) => worker.abort(),
            }
        }
        info!("Region stopped");
        Ok(())
    }

    /// Spawns the task that reads datagrams and hands them to the core
    fn spawn_network_receiver(&self) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let core = Arc::clone(&self.core);
        let mut shutdown = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; RECV_BUFFER];
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    received = socket.recv_from(&mut buffer) => match received {
                        Ok((len, from)) => {
                            if let Err(e) = core.process_datagram(&buffer[..len], from, Instant::now()) {
                                debug!("Datagram from {} rejected: {}", from, e);
                            }
                        }
                        Err(e) => {
                            error!("Error receiving packet: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    },
                }
            }
            debug!("Receive loop stopped");
        })
    }

    /// Spawns the task that flushes acks and resends overdue packets
    fn spawn_ack_timer(&self, period: Duration) -> JoinHandle<()> {
        let core = Arc::clone(&self.core);
        self.spawn_timer(period, move || {
            core.flush_acks();
            let sweep = core.check_retransmits(Instant::now());
            if sweep.resent > 0 || sweep.expired > 0 {
                debug!(
                    "Retransmit sweep: {} resent, {} expired, {} deferred",
                    sweep.resent, sweep.expired, sweep.deferred
                );
            }
        })
    }

    /// Spawns the task that refills throttles and sends queued packets
    fn spawn_throttle_timer(&self, period: Duration) -> JoinHandle<()> {
        let core = Arc::clone(&self.core);
        self.spawn_timer(period, move || {
            core.tick(Instant::now());
        })
    }

    /// Spawns the task that removes silent circuits
    fn spawn_idle_checker(&self, period: Duration) -> JoinHandle<()> {
        let core = Arc::clone(&self.core);
        self.spawn_timer(period, move || {
            core.sweep_idle(Instant::now());
        })
    }

    fn spawn_timer<F>(&self, period: Duration, mut work: F) -> JoinHandle<()>
    where
        F: FnMut() + Send + 'static,
    {
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => work(),
                }
            }
        })
    }
}
