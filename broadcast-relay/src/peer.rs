//! Interactive companion: one relay connection bridged to stdin/stdout.
//!
//! Bytes flow through raw in both directions. Local input is echoed back with
//! a `> ` prompt so a terminal user can tell their own lines from relayed ones.
//!
//! Stdin is read on its own OS thread and handed over through a channel. A
//! blocking read of stdin cannot be cancelled, and on tokio's blocking pool it
//! would keep the runtime alive after the relay has gone away.

use std::{
    io::{self, Read},
    thread,
};

use anyhow::{Context, Result};
use bytes::Bytes;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    select,
    sync::mpsc,
};
use tracing::info;

use crate::{cli::PeerArgs, config::DEFAULT_BUFFER_SIZE};

const PROMPT: &[u8] = b"> ";

/// Why the bridge stopped without an I/O error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerExit {
    RemoteClosed,
    InputClosed,
}

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("failed to read from the relay")]
    RemoteRead(#[source] io::Error),
    #[error("failed to write to the relay")]
    RemoteWrite(#[source] io::Error),
    #[error("failed to read local input")]
    InputRead(#[source] io::Error),
    #[error("failed to write local output")]
    OutputWrite(#[source] io::Error),
}

pub async fn run(args: PeerArgs) -> Result<PeerExit> {
    let target = (args.address.as_str(), args.port);
    let stream = TcpStream::connect(target)
        .await
        .with_context(|| format!("connection set-up failed for {}:{}", args.address, args.port))?;
    info!(relay = %stream.peer_addr()?, "connected");

    let mut input = read_stdin(DEFAULT_BUFFER_SIZE).context("failed to start the stdin reader")?;
    let (mut remote_reader, mut remote_writer) = stream.into_split();
    let exit = bridge(
        &mut remote_reader,
        &mut remote_writer,
        &mut input,
        &mut tokio::io::stdout(),
        DEFAULT_BUFFER_SIZE,
    )
    .await?;
    Ok(exit)
}

/// Local input as a stream of chunks. The channel closes at end of input.
pub type Input = mpsc::Receiver<io::Result<Bytes>>;

/// Spawns a detached thread that forwards stdin in chunks of at most
/// `buffer_size` bytes. The thread is never joined; it dies with the process.
pub fn read_stdin(buffer_size: usize) -> io::Result<Input> {
    let (tx, rx) = mpsc::channel(1);
    thread::Builder::new()
        .name("peer-stdin".into())
        .spawn(move || {
            let mut stdin = io::stdin().lock();
            let mut buffer = vec![0u8; buffer_size];
            loop {
                let chunk = match stdin.read(&mut buffer) {
                    Ok(0) => return,
                    Ok(n) => Ok(Bytes::copy_from_slice(&buffer[..n])),
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => Err(err),
                };
                let failed = chunk.is_err();
                if tx.blocking_send(chunk).is_err() || failed {
                    return;
                }
            }
        })?;
    Ok(rx)
}

/// Shuttles bytes between a relay connection and local input/output until
/// either side reaches end-of-stream or fails.
pub async fn bridge<RR, RW, O>(
    remote_reader: &mut RR,
    remote_writer: &mut RW,
    input: &mut Input,
    output: &mut O,
    buffer_size: usize,
) -> Result<PeerExit, PeerError>
where
    RR: AsyncRead + Unpin,
    RW: AsyncWrite + Unpin,
    O: AsyncWrite + Unpin,
{
    let mut remote_buf = vec![0u8; buffer_size];

    loop {
        select! {
            read = remote_reader.read(&mut remote_buf) => {
                let n = read.map_err(PeerError::RemoteRead)?;
                if n == 0 {
                    return Ok(PeerExit::RemoteClosed);
                }
                write_flushed(output, &[&remote_buf[..n]])
                    .await
                    .map_err(PeerError::OutputWrite)?;
            }
            chunk = input.recv() => {
                let Some(chunk) = chunk else {
                    return Ok(PeerExit::InputClosed);
                };
                let line = chunk.map_err(PeerError::InputRead)?;
                write_flushed(output, &[PROMPT, &line[..]])
                    .await
                    .map_err(PeerError::OutputWrite)?;
                write_flushed(remote_writer, &[&line[..]])
                    .await
                    .map_err(PeerError::RemoteWrite)?;
            }
        }
    }
}

async fn write_flushed<W>(writer: &mut W, parts: &[&[u8]]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for part in parts {
        writer.write_all(part).await?;
    }
    writer.flush().await
}
