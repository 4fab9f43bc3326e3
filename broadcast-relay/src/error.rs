use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::{config::ConfigError, registry::RegistryError};

/// Errors that stop the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid relay configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to listen on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("accept failed {failures} times in a row")]
    Multiplex {
        failures: u32,
        #[source]
        source: io::Error,
    },
}

/// Errors for a single connection attempt. Never fatal to the relay.
#[derive(Debug, Error)]
pub enum AcceptError {
    #[error("accept failed")]
    Handshake(#[source] io::Error),
    #[error("rejected {addr}")]
    Rejected {
        addr: SocketAddr,
        #[source]
        reason: RegistryError,
    },
}
