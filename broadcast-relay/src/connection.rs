//! Per-connection I/O tasks.
//!
//! Each accepted socket is split in two. The reader half is drained by a
//! reader task that reports every read outcome to the multiplexer in order;
//! the writer half is owned by a writer task that is the only thing allowed to
//! write to that peer. Neither task touches the registry.

use std::{io, time::Duration};

use bytes::Bytes;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::tcp::{OwnedReadHalf, OwnedWriteHalf},
    sync::mpsc,
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, trace};

use crate::registry::ClientId;

/// Result of one read from a peer.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A non-empty chunk, exactly as the socket delivered it.
    Data(Bytes),
    /// The peer closed its side of the stream.
    Eof,
    Failed(io::Error),
}

/// What connection tasks report back to the multiplexer.
#[derive(Debug)]
pub enum ConnectionEvent {
    Readable { id: ClientId, outcome: ReadOutcome },
    WriteFailed { id: ClientId, error: io::Error },
}

impl ConnectionEvent {
    pub fn client(&self) -> ClientId {
        match self {
            ConnectionEvent::Readable { id, .. } | ConnectionEvent::WriteFailed { id, .. } => *id,
        }
    }
}

/// The running tasks behind one registered client.
///
/// Dropping a subscription does not stop the tasks; call [`Subscription::cancel`].
#[derive(Debug)]
pub struct Subscription {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Subscription {
    pub fn spawn(
        id: ClientId,
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        outbound: mpsc::Receiver<Bytes>,
        events: mpsc::Sender<ConnectionEvent>,
        buffer_size: usize,
        write_timeout: Duration,
    ) -> Self {
        let reader = tokio::spawn(read_loop(id, reader, events.clone(), buffer_size));
        let writer = tokio::spawn(write_loop(id, writer, outbound, events, write_timeout));
        Self { reader, writer }
    }

    /// Stops both tasks; the socket closes once both halves are dropped.
    pub fn cancel(self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn read_loop(
    id: ClientId,
    mut reader: OwnedReadHalf,
    events: mpsc::Sender<ConnectionEvent>,
    buffer_size: usize,
) {
    let mut buffer = vec![0u8; buffer_size];
    loop {
        let outcome = match reader.read(&mut buffer).await {
            Ok(0) => ReadOutcome::Eof,
            Ok(n) => ReadOutcome::Data(Bytes::copy_from_slice(&buffer[..n])),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => ReadOutcome::Failed(err),
        };
        let last = !matches!(outcome, ReadOutcome::Data(_));

        trace!(client = %id, ?outcome, "read");
        if events
            .send(ConnectionEvent::Readable { id, outcome })
            .await
            .is_err()
        {
            debug!(client = %id, "multiplexer gone, stopping reader");
            return;
        }
        if last {
            return;
        }
    }
}

async fn write_loop(
    id: ClientId,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Bytes>,
    events: mpsc::Sender<ConnectionEvent>,
    write_timeout: Duration,
) {
    while let Some(chunk) = outbound.recv().await {
        if let Err(error) = write_chunk(&mut writer, &chunk, write_timeout).await {
            let _ = events.send(ConnectionEvent::WriteFailed { id, error }).await;
            return;
        }
    }

    // Queue closed: the client was removed from the registry.
    if let Err(err) = writer.shutdown().await {
        debug!(client = %id, error = ?err, "failed to shut down writer cleanly");
    }
}

async fn write_chunk(
    writer: &mut OwnedWriteHalf,
    chunk: &[u8],
    limit: Duration,
) -> io::Result<()> {
    match timeout(limit, writer.write_all(chunk)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("write of {} bytes did not complete within {limit:?}", chunk.len()),
        )),
    }
}
