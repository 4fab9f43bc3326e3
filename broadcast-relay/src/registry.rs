use std::{collections::HashMap, fmt, net::SocketAddr, time::Instant};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// Identity of one accepted connection. Never reused within a relay instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One connected peer. Cloning is cheap; the outbound queue is shared.
#[derive(Debug, Clone)]
pub struct Client {
    id: ClientId,
    address: SocketAddr,
    connected_at: Instant,
    outbound: mpsc::Sender<Bytes>,
}

impl Client {
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Queue for the writer task that owns this peer's outbound stream.
    pub fn outbound(&self) -> &mpsc::Sender<Bytes> {
        &self.outbound
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("registry is full ({capacity} clients)")]
    CapacityExceeded { capacity: usize },
    #[error("client {0} is already registered")]
    DuplicateHandle(ClientId),
}

/// Bounded live-membership table. Owned by the multiplexer; performs no I/O.
#[derive(Debug)]
pub struct Registry {
    clients: HashMap<ClientId, Client>,
    capacity: usize,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        Self {
            clients: HashMap::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn add(
        &mut self,
        id: ClientId,
        address: SocketAddr,
        outbound: mpsc::Sender<Bytes>,
    ) -> Result<&Client, RegistryError> {
        if self.clients.contains_key(&id) {
            return Err(RegistryError::DuplicateHandle(id));
        }
        if self.clients.len() >= self.capacity {
            return Err(RegistryError::CapacityExceeded {
                capacity: self.capacity,
            });
        }

        let client = Client {
            id,
            address,
            connected_at: Instant::now(),
            outbound,
        };
        Ok(&*self.clients.entry(id).or_insert(client))
    }

    /// Removing an absent id is a no-op.
    pub fn remove(&mut self, id: ClientId) -> Option<Client> {
        self.clients.remove(&id)
    }

    /// Snapshot of the live clients, ordered by connection id.
    pub fn all(&self) -> Vec<Client> {
        let mut snapshot: Vec<Client> = self.clients.values().cloned().collect();
        snapshot.sort_unstable_by_key(Client::id);
        snapshot
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.clients.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Removes every client, handing them back for cleanup.
    pub fn drain(&mut self) -> Vec<Client> {
        self.clients.drain().map(|(_, client)| client).collect()
    }
}
