//! Listening socket and connection admission.

use std::{io, net::SocketAddr, time::Duration};

use bytes::Bytes;
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpSocket, TcpStream},
    sync::mpsc,
};
use tracing::{debug, warn};

use crate::{
    config::RelayConfig,
    connection::{ConnectionEvent, Subscription},
    error::AcceptError,
    registry::{ClientId, Registry},
};

/// A connection that made it into the registry.
#[derive(Debug)]
pub struct Admitted {
    pub id: ClientId,
    pub addr: SocketAddr,
    pub subscription: Subscription,
}

#[derive(Debug)]
pub struct Acceptor {
    listener: TcpListener,
    next_id: u64,
    buffer_size: usize,
    outbound_queue: usize,
    write_timeout: Duration,
}

impl Acceptor {
    /// Binds the listening socket with the configured backlog.
    pub fn bind(config: &RelayConfig) -> io::Result<Self> {
        let socket = if config.listen.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(config.listen)?;
        let listener = socket.listen(config.backlog)?;
        Ok(Self {
            listener,
            next_id: 1,
            buffer_size: config.buffer_size,
            outbound_queue: config.outbound_queue,
            write_timeout: config.write_timeout,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Waits for the next TCP handshake. Cancel safe.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), AcceptError> {
        self.listener.accept().await.map_err(AcceptError::Handshake)
    }

    /// Registers a freshly accepted stream and starts its connection tasks.
    ///
    /// A stream that does not fit in the registry is closed before returning.
    pub async fn admit(
        &mut self,
        mut stream: TcpStream,
        addr: SocketAddr,
        registry: &mut Registry,
        events: &mpsc::Sender<ConnectionEvent>,
    ) -> Result<Admitted, AcceptError> {
        let id = self.allocate_id();
        let (outbound_tx, outbound_rx) = mpsc::channel::<Bytes>(self.outbound_queue);

        if let Err(reason) = registry.add(id, addr, outbound_tx) {
            if let Err(err) = stream.shutdown().await {
                debug!(peer = %addr, error = ?err, "shutdown of rejected stream failed");
            }
            drop(stream);
            return Err(AcceptError::Rejected { addr, reason });
        }

        if let Err(err) = stream.set_nodelay(true) {
            warn!(peer = %addr, error = ?err, "failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        let subscription = Subscription::spawn(
            id,
            reader,
            writer,
            outbound_rx,
            events.clone(),
            self.buffer_size,
            self.write_timeout,
        );

        Ok(Admitted {
            id,
            addr,
            subscription,
        })
    }

    fn allocate_id(&mut self) -> ClientId {
        let id = ClientId::new(self.next_id);
        self.next_id += 1;
        id
    }
}
