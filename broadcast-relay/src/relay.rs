//! Broadcast fan-out.
//!
//! Bytes read from one client are queued, untouched, for every other client
//! in the registry. Nothing here blocks: a receiver whose outbound queue is
//! full is treated as wedged and dropped so the rest keep receiving.

use std::io;

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::{
    connection::ReadOutcome,
    registry::{ClientId, Registry},
};

#[derive(Debug)]
pub enum RelayOutcome {
    Delivered(Delivery),
    /// The sender closed its stream and has been removed.
    Disconnected,
    /// Reading from the sender failed; it has been removed.
    ReadError(io::Error),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    pub bytes: usize,
    /// Receivers the chunk was queued for.
    pub receivers: usize,
    /// Receivers removed during this broadcast because their queue was full or closed.
    pub evicted: Vec<ClientId>,
}

/// Handles one read outcome from `from`.
///
/// The caller still has to unsubscribe `from` on `Disconnected`/`ReadError`,
/// and every id in [`Delivery::evicted`].
pub fn on_readable(
    registry: &mut Registry,
    from: ClientId,
    outcome: ReadOutcome,
) -> RelayOutcome {
    match outcome {
        ReadOutcome::Data(bytes) => {
            let mut delivery = Delivery {
                bytes: bytes.len(),
                ..Delivery::default()
            };

            for client in registry.all() {
                if client.id() == from {
                    continue;
                }
                match client.outbound().try_send(bytes.clone()) {
                    Ok(()) => delivery.receivers += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(
                            client = %client.id(),
                            peer = %client.address(),
                            "receiver is not draining, disconnecting"
                        );
                        delivery.evicted.push(client.id());
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(client = %client.id(), "receiver writer already stopped");
                        delivery.evicted.push(client.id());
                    }
                }
            }

            for id in &delivery.evicted {
                registry.remove(*id);
            }
            delivery.into()
        }
        ReadOutcome::Eof => {
            forget(registry, from);
            RelayOutcome::Disconnected
        }
        ReadOutcome::Failed(err) => {
            forget(registry, from);
            RelayOutcome::ReadError(err)
        }
    }
}

fn forget(registry: &mut Registry, id: ClientId) {
    if let Some(client) = registry.remove(id) {
        debug!(
            client = %id,
            peer = %client.address(),
            connected_for = ?client.connected_at().elapsed(),
            "removed sender"
        );
    }
}

impl From<Delivery> for RelayOutcome {
    fn from(delivery: Delivery) -> Self {
        RelayOutcome::Delivered(delivery)
    }
}
