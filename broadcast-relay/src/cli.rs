use std::{net::IpAddr, time::Duration};

use clap::{Args, Parser};

use crate::config::{
    ConfigError, DEFAULT_BACKLOG, DEFAULT_BUFFER_SIZE, DEFAULT_EVENT_QUEUE,
    DEFAULT_MAX_ACCEPT_FAILURES, DEFAULT_MAX_CLIENTS, DEFAULT_MAX_EVENTS, DEFAULT_OUTBOUND_QUEUE,
    DEFAULT_PORT, DEFAULT_WRITE_TIMEOUT, RelayConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Relay every byte a client sends to all other clients")]
pub struct RelayCli {
    #[command(flatten)]
    pub relay: RelayArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RelayArgs {
    /// Interface to bind. Defaults to all interfaces.
    #[arg(long, env = "RELAY_BIND", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// TCP port to listen on. Use 0 for an ephemeral port.
    #[arg(long, short, env = "RELAY_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Maximum simultaneous clients; extra connections are closed immediately.
    #[arg(long, env = "RELAY_MAX_CLIENTS", default_value_t = DEFAULT_MAX_CLIENTS)]
    pub max_clients: usize,

    /// Maximum connection events handled per dispatch pass.
    #[arg(long, env = "RELAY_MAX_EVENTS", default_value_t = DEFAULT_MAX_EVENTS)]
    pub max_events: usize,

    /// Listen backlog.
    #[arg(long, env = "RELAY_BACKLOG", default_value_t = DEFAULT_BACKLOG)]
    pub backlog: u32,

    /// Largest chunk read from a client at once, in bytes.
    #[arg(long, env = "RELAY_BUFFER_SIZE", default_value_t = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,

    /// Chunks buffered per receiver before it is disconnected as too slow.
    #[arg(long, env = "RELAY_OUTBOUND_QUEUE", default_value_t = DEFAULT_OUTBOUND_QUEUE)]
    pub outbound_queue: usize,

    #[arg(long, env = "RELAY_EVENT_QUEUE", default_value_t = DEFAULT_EVENT_QUEUE)]
    pub event_queue: usize,

    /// Milliseconds a single write to a receiver may take.
    #[arg(long, env = "RELAY_WRITE_TIMEOUT_MS", default_value_t = DEFAULT_WRITE_TIMEOUT.as_millis() as u64)]
    pub write_timeout_ms: u64,

    #[arg(long, env = "RELAY_MAX_ACCEPT_FAILURES", default_value_t = DEFAULT_MAX_ACCEPT_FAILURES)]
    pub max_accept_failures: u32,
}

impl TryFrom<RelayArgs> for RelayConfig {
    type Error = ConfigError;

    fn try_from(args: RelayArgs) -> Result<Self, Self::Error> {
        let config = RelayConfig {
            listen: (args.bind, args.port).into(),
            max_clients: args.max_clients,
            max_events: args.max_events,
            backlog: args.backlog,
            buffer_size: args.buffer_size,
            outbound_queue: args.outbound_queue,
            event_queue: args.event_queue,
            write_timeout: Duration::from_millis(args.write_timeout_ms),
            max_accept_failures: args.max_accept_failures,
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Talk to a relay from the terminal")]
pub struct PeerArgs {
    /// Relay host name or IP address.
    pub address: String,

    /// Relay TCP port.
    pub port: u16,
}
