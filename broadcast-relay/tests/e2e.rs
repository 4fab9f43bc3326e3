use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn peers_talk_through_the_relay_binary() -> Result<()> {
    let relay_bin = assert_cmd::cargo::cargo_bin!("relay");
    let peer_bin = assert_cmd::cargo::cargo_bin!("peer");

    let (mut relay_child, mut relay_stdout) = spawn_relay(&relay_bin, &[]).await?;
    let addr = read_relay_addr(&mut relay_stdout).await?;
    let (host, port) = addr
        .rsplit_once(':')
        .context("relay address missing port")?;

    // Wait for each connection to be logged so both are registered before anyone speaks.
    let mut alice = spawn_peer(&peer_bin, host, port).await?;
    wait_for_log(&mut relay_stdout, "client connected").await?;
    let mut bob = spawn_peer(&peer_bin, host, port).await?;
    wait_for_log(&mut relay_stdout, "client connected").await?;

    let relay_log_task = tokio::spawn(async move {
        drain_stdout(relay_stdout).await;
    });

    alice.send(b"ping\n").await.context("alice send")?;
    bob.expect_output(b"ping\n", "bob hears alice").await?;
    alice.expect_output(b"> ping\n", "alice sees her prompt echo").await?;

    bob.send(b"pong\n").await.context("bob send")?;
    bob.expect_output(b"> pong\n", "bob sees his prompt echo").await?;
    alice.expect_output(b"pong\n", "alice hears bob").await?;

    // Closing local input ends the session with a failure status.
    drop(alice.stdin);
    let status = timeout(READ_TIMEOUT, alice.child.wait()).await??;
    assert!(!status.success(), "peer should exit non-zero, got {status}");

    let _ = bob.child.kill().await;
    let _ = relay_child.kill().await;
    let _ = relay_child.wait().await;
    let _ = relay_log_task.await;

    Ok(())
}

#[tokio::test]
async fn relay_logs_capacity_rejections_and_closes_the_peer() -> Result<()> {
    let relay_bin = assert_cmd::cargo::cargo_bin!("relay");
    let peer_bin = assert_cmd::cargo::cargo_bin!("peer");

    let (mut relay_child, mut relay_stdout) = spawn_relay(&relay_bin, &["--max-clients", "1"]).await?;
    let addr = read_relay_addr(&mut relay_stdout).await?;
    let (host, port) = addr
        .rsplit_once(':')
        .context("relay address missing port")?;

    let mut admitted = spawn_peer(&peer_bin, host, port).await?;
    wait_for_log(&mut relay_stdout, "client connected").await?;

    let mut rejected = spawn_peer(&peer_bin, host, port).await?;
    let line = wait_for_log(&mut relay_stdout, "connection rejected").await?;
    assert!(
        line.contains("max clients exceeded") && line.contains("registry is full"),
        "unexpected rejection log: {line}"
    );

    let status = timeout(READ_TIMEOUT, rejected.child.wait()).await??;
    assert!(!status.success(), "rejected peer should exit non-zero, got {status}");

    let _ = admitted.child.kill().await;
    let _ = relay_child.kill().await;
    let _ = relay_child.wait().await;
    Ok(())
}

#[tokio::test]
async fn peer_exits_when_the_relay_hangs_up_while_stdin_is_open() -> Result<()> {
    let peer_bin = assert_cmd::cargo::cargo_bin!("peer");

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port().to_string();
    let mut peer = spawn_peer(&peer_bin, "127.0.0.1", &port).await?;

    let (socket, _) = timeout(READ_TIMEOUT, listener.accept()).await??;
    drop(socket);

    // peer.stdin stays open: only the remote side has gone away.
    let status = timeout(READ_TIMEOUT, peer.child.wait())
        .await
        .map_err(|_| anyhow!("peer kept running after the relay closed"))??;
    assert!(!status.success(), "peer should exit non-zero, got {status}");

    drop(peer.stdin);
    Ok(())
}

#[tokio::test]
async fn peer_rejects_wrong_argument_count() -> Result<()> {
    let peer_bin = assert_cmd::cargo::cargo_bin!("peer");

    let output = Command::new(peer_bin)
        .arg("127.0.0.1")
        .stdin(Stdio::null())
        .output()
        .await?;

    assert!(!output.status.success());
    assert!(!output.stderr.is_empty(), "expected a usage diagnostic");
    Ok(())
}

#[tokio::test]
async fn peer_fails_when_relay_is_unreachable() -> Result<()> {
    let peer_bin = assert_cmd::cargo::cargo_bin!("peer");

    // Bind and drop to find a port nobody is listening on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.local_addr()?.port()
    };

    let output = timeout(
        READ_TIMEOUT,
        Command::new(peer_bin)
            .arg("127.0.0.1")
            .arg(port.to_string())
            .stdin(Stdio::null())
            .output(),
    )
    .await??;

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("connection set-up failed"),
        "unexpected diagnostic: {stderr}"
    );
    Ok(())
}

struct PeerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl PeerProcess {
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.stdin.write_all(bytes).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn expect_output(&mut self, expected: &[u8], description: &str) -> Result<()> {
        let mut received = vec![0u8; expected.len()];
        timeout(READ_TIMEOUT, self.stdout.read_exact(&mut received))
            .await
            .map_err(|_| anyhow!("{description}: timed out"))?
            .with_context(|| format!("{description}: failed to read"))?;
        if received != expected {
            return Err(anyhow!(
                "{description}: expected {:?}, got {:?}",
                String::from_utf8_lossy(expected),
                String::from_utf8_lossy(&received)
            ));
        }
        Ok(())
    }
}

async fn spawn_relay(binary: &Path, extra_args: &[&str]) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("--bind")
        .arg("127.0.0.1")
        .arg("--port")
        .arg("0")
        .args(extra_args)
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn relay")?;
    let stdout = child
        .stdout
        .take()
        .context("relay stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

async fn read_relay_addr(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    let line = wait_for_log(reader, "relay listening on").await?;
    let addr = line
        .split_whitespace()
        .last()
        .context("unexpected relay banner format")?;
    if !addr.contains(':') {
        return Err(anyhow!("relay banner missing socket: {line}"));
    }
    Ok(addr.to_string())
}

async fn spawn_peer(binary: &Path, host: &str, port: &str) -> Result<PeerProcess> {
    let mut cmd = Command::new(binary);
    cmd.arg(host)
        .arg(port)
        .env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn peer")?;
    let stdin = child.stdin.take().context("peer stdin missing after spawn")?;
    let stdout = child
        .stdout
        .take()
        .context("peer stdout missing after spawn")?;

    Ok(PeerProcess {
        child,
        stdin,
        stdout,
    })
}

async fn wait_for_log(reader: &mut BufReader<ChildStdout>, needle: &str) -> Result<String> {
    loop {
        let mut line = String::new();
        let read = timeout(READ_TIMEOUT, reader.read_line(&mut line))
            .await
            .map_err(|_| anyhow!("timed out waiting for log line containing '{needle}'"))??;
        if read == 0 {
            return Err(anyhow!("relay exited before logging '{needle}'"));
        }
        if line.contains(needle) {
            return Ok(line.trim_end_matches(['\r', '\n']).to_string());
        }
    }
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while reader
        .read_line(&mut buffer)
        .await
        .map(|bytes| {
            let has_data = bytes > 0;
            if has_data {
                buffer.clear();
            }
            has_data
        })
        .unwrap_or(false)
    {}
}
