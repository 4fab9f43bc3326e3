//! Byte-stream broadcast relay.
//!
//! A relay accepts TCP clients and forwards every chunk one client sends to
//! all the others, verbatim and without framing. A companion `peer` binary
//! bridges one connection to a terminal. Each module owns one responsibility:
//!
//! - [`registry`] is the bounded table of connected clients.
//! - [`acceptor`] binds the listener and admits (or rejects) new connections.
//! - [`connection`] runs the reader and writer task behind each client.
//! - [`relay`] turns one read outcome into a fan-out or a disconnect.
//! - [`multiplexer`] is the single coordinating loop that owns all the state.
//! - [`peer`] bridges a relay connection with stdin/stdout.
//! - [`config`] and [`cli`] hold tunables and their command-line surface.
//!
//! Only per-sender ordering is guaranteed: one client's bytes reach every
//! other client in the order they were read, while chunks from different
//! senders may interleave arbitrarily.

pub mod acceptor;
pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod multiplexer;
pub mod peer;
pub mod registry;
pub mod relay;

pub use config::RelayConfig;
pub use error::RelayError;
pub use multiplexer::Multiplexer;
