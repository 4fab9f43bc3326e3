//! Relay tuning knobs.
//!
//! Every capacity constant lives here instead of being baked into the loop, so
//! tests can run several small relays side by side in one process.

use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use thiserror::Error;

pub const DEFAULT_PORT: u16 = 10007;
pub const DEFAULT_MAX_CLIENTS: usize = 1000;
pub const DEFAULT_MAX_EVENTS: usize = 1000;
pub const DEFAULT_BACKLOG: u32 = 1000;
pub const DEFAULT_BUFFER_SIZE: usize = 1024;
pub const DEFAULT_OUTBOUND_QUEUE: usize = 64;
pub const DEFAULT_EVENT_QUEUE: usize = 1024;
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_ACCEPT_FAILURES: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Address the listening socket binds to.
    pub listen: SocketAddr,
    /// Clients beyond this count are rejected and their socket closed.
    pub max_clients: usize,
    /// Upper bound on connection events handled in one dispatch pass.
    pub max_events: usize,
    /// Pending-connection queue length passed to `listen(2)`.
    pub backlog: u32,
    /// Largest chunk read from a peer in one go.
    pub buffer_size: usize,
    /// Chunks queued for a receiver before it counts as wedged and is dropped.
    pub outbound_queue: usize,
    /// Capacity of the channel connection tasks use to report to the loop.
    pub event_queue: usize,
    /// How long a single write to a receiver may block.
    pub write_timeout: Duration,
    /// Consecutive accept failures tolerated before the loop gives up.
    pub max_accept_failures: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_clients: DEFAULT_MAX_CLIENTS,
            max_events: DEFAULT_MAX_EVENTS,
            backlog: DEFAULT_BACKLOG,
            buffer_size: DEFAULT_BUFFER_SIZE,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            event_queue: DEFAULT_EVENT_QUEUE,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_accept_failures: DEFAULT_MAX_ACCEPT_FAILURES,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than 0")]
    Zero(&'static str),
}

impl RelayConfig {
    /// Default configuration bound to an explicit address.
    pub fn with_listen(listen: SocketAddr) -> Self {
        Self {
            listen,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("max_clients", self.max_clients),
            ("max_events", self.max_events),
            ("backlog", self.backlog as usize),
            ("buffer_size", self.buffer_size),
            ("outbound_queue", self.outbound_queue),
            ("event_queue", self.event_queue),
            ("max_accept_failures", self.max_accept_failures as usize),
        ];
        if let Some((name, _)) = positive.into_iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero(name));
        }
        if self.write_timeout.is_zero() {
            return Err(ConfigError::Zero("write_timeout"));
        }
        Ok(())
    }
}
