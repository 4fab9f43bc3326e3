//! The coordinating event loop.
//!
//! One task owns the [`Registry`] and the set of running connection tasks and
//! reacts to three kinds of readiness: the listener has a pending handshake,
//! a connection task reported something, or shutdown was requested. All
//! registry mutation happens here, so nothing needs a lock.
//!
//! After every dispatch pass the subscription set mirrors the registry
//! exactly: a client is either registered and has running tasks, or neither.

use std::{collections::HashMap, future::Future, io, net::SocketAddr, time::Duration};

use tokio::{net::TcpStream, select, sync::mpsc};
use tracing::{debug, error, info, warn};

use crate::{
    acceptor::{Acceptor, Admitted},
    config::RelayConfig,
    connection::{ConnectionEvent, Subscription},
    error::{AcceptError, RelayError},
    registry::{ClientId, Registry, RegistryError},
    relay::{self, RelayOutcome},
};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

pub struct Multiplexer {
    acceptor: Acceptor,
    registry: Registry,
    subscriptions: Subscriptions,
    events_tx: mpsc::Sender<ConnectionEvent>,
    events_rx: mpsc::Receiver<ConnectionEvent>,
    max_events: usize,
    max_accept_failures: u32,
    accept_failures: u32,
}

impl Multiplexer {
    /// Validates `config` and binds the listening socket.
    pub fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        config.validate()?;
        let acceptor = Acceptor::bind(&config).map_err(|source| RelayError::Bind {
            addr: config.listen,
            source,
        })?;
        Ok(Self::new(acceptor, &config))
    }

    pub fn new(acceptor: Acceptor, config: &RelayConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_queue);
        Self {
            acceptor,
            registry: Registry::new(config.max_clients),
            subscriptions: Subscriptions::default(),
            events_tx,
            events_rx,
            max_events: config.max_events,
            max_accept_failures: config.max_accept_failures,
            accept_failures: 0,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.acceptor.local_addr()
    }

    pub async fn run_until<F>(mut self, shutdown: F) -> Result<(), RelayError>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        let mut pass = Vec::with_capacity(self.max_events.min(64));

        let result = loop {
            select! {
                biased;
                _ = &mut shutdown => break Ok(()),
                accepted = self.acceptor.accept() => {
                    if let Err(err) = self.handle_accept(accepted).await {
                        break Err(err);
                    }
                }
                Some(event) = self.events_rx.recv() => {
                    pass.push(event);
                    while pass.len() < self.max_events {
                        match self.events_rx.try_recv() {
                            Ok(event) => pass.push(event),
                            Err(_) => break,
                        }
                    }
                    for event in pass.drain(..) {
                        self.dispatch(event);
                    }
                }
            }
            debug_assert!(self.subscriptions.mirrors(&self.registry));
        };

        self.shutdown();
        result
    }

    pub async fn run_until_ctrl_c(self) -> Result<(), RelayError> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    async fn handle_accept(
        &mut self,
        accepted: Result<(TcpStream, SocketAddr), AcceptError>,
    ) -> Result<(), RelayError> {
        let (stream, addr) = match accepted {
            Ok(accepted) => {
                self.accept_failures = 0;
                accepted
            }
            Err(AcceptError::Handshake(source)) => {
                self.accept_failures += 1;
                warn!(error = %source, failures = self.accept_failures, "failed to accept connection");
                if self.accept_failures >= self.max_accept_failures {
                    return Err(RelayError::Multiplex {
                        failures: self.accept_failures,
                        source,
                    });
                }
                // Typically fd exhaustion; give in-flight disconnects a chance to free some.
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                return Ok(());
            }
            Err(other) => {
                warn!(error = %other, "failed to accept connection");
                return Ok(());
            }
        };

        match self
            .acceptor
            .admit(stream, addr, &mut self.registry, &self.events_tx)
            .await
        {
            Ok(Admitted {
                id,
                addr,
                subscription,
            }) => {
                self.subscriptions.subscribe(id, subscription);
                info!(client = %id, peer = %addr.ip(), port = addr.port(), clients = self.registry.len(), "client connected");
            }
            Err(AcceptError::Rejected {
                addr,
                reason: reason @ RegistryError::CapacityExceeded { .. },
            }) => {
                warn!(peer = %addr, %reason, "connection rejected, max clients exceeded");
            }
            Err(AcceptError::Rejected { addr, reason }) => {
                warn!(peer = %addr, %reason, "connection rejected");
            }
            Err(err) => warn!(error = %err, "failed to admit connection"),
        }
        Ok(())
    }

    fn dispatch(&mut self, event: ConnectionEvent) {
        let id = event.client();
        if !self.registry.contains(id) {
            // Queued before the client was dropped earlier in this pass or a previous one.
            debug!(client = %id, "ignoring event from removed client");
            return;
        }

        match event {
            ConnectionEvent::Readable { id, outcome } => {
                match relay::on_readable(&mut self.registry, id, outcome) {
                    RelayOutcome::Delivered(delivery) => {
                        debug!(client = %id, bytes = delivery.bytes, receivers = delivery.receivers, "relayed");
                        for evicted in delivery.evicted {
                            self.disconnect(evicted);
                            info!(client = %evicted, "client disconnected (not draining)");
                        }
                    }
                    RelayOutcome::Disconnected => {
                        self.disconnect(id);
                        info!(client = %id, clients = self.registry.len(), "client disconnected");
                    }
                    RelayOutcome::ReadError(err) => {
                        self.disconnect(id);
                        error!(client = %id, error = %err, "read from client failed, disconnected");
                    }
                }
            }
            ConnectionEvent::WriteFailed { id, error } => {
                self.disconnect(id);
                warn!(client = %id, error = %error, "write to client failed, disconnected");
            }
        }
    }

    /// Removes `id` from the registry and stops its tasks. Both steps are idempotent.
    fn disconnect(&mut self, id: ClientId) {
        self.registry.remove(id);
        self.subscriptions.unsubscribe(id);
    }

    fn shutdown(&mut self) {
        info!(clients = self.registry.len(), "relay shutting down");
        for client in self.registry.drain() {
            self.subscriptions.unsubscribe(client.id());
        }
        self.subscriptions.clear();
    }
}

/// Connection tasks the loop is currently driving, keyed like the registry.
#[derive(Debug, Default)]
struct Subscriptions {
    tasks: HashMap<ClientId, Subscription>,
}

impl Subscriptions {
    fn subscribe(&mut self, id: ClientId, subscription: Subscription) {
        if let Some(stale) = self.tasks.insert(id, subscription) {
            stale.cancel();
        }
    }

    fn unsubscribe(&mut self, id: ClientId) {
        if let Some(subscription) = self.tasks.remove(&id) {
            subscription.cancel();
        }
    }

    fn clear(&mut self) {
        for (_, subscription) in self.tasks.drain() {
            subscription.cancel();
        }
    }

    fn mirrors(&self, registry: &Registry) -> bool {
        self.tasks.len() == registry.len() && registry.ids().all(|id| self.tasks.contains_key(&id))
    }
}
