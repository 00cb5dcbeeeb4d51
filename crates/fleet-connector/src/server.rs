//! TCP listeners for the three robot channels.
//!
//! Each robot opens one connection per channel:
//! - uplink: newline-delimited status reports (`/info`, `/power_low`)
//! - downlink: commands from the coordinator, one per line
//! - liveness: a short fixed token sent periodically
//!
//! Every accepted connection gets its own task. A read error or EOF ends
//! that task only; the robot's record survives for the next connection.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};

use fleet_protocol::{FleetError, RobotIdentity};
use fleet_state::{DownlinkHandle, FleetRegistry, HandoffCoordinator, UplinkHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Uplink,
    Downlink,
    Liveness,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uplink => "uplink",
            Self::Downlink => "downlink",
            Self::Liveness => "liveness",
        };
        write!(f, "{s}")
    }
}

/// Accept loop for one channel.
pub struct ChannelServer {
    channel: Channel,
    listener: TcpListener,
    registry: Arc<FleetRegistry>,
    handoff: Arc<HandoffCoordinator>,
    max_connections: usize,
    token_len: usize,
}

impl ChannelServer {
    pub fn new(
        channel: Channel,
        listener: TcpListener,
        registry: Arc<FleetRegistry>,
        handoff: Arc<HandoffCoordinator>,
        max_connections: usize,
        token_len: usize,
    ) -> Self {
        Self {
            channel,
            listener,
            registry,
            handoff,
            max_connections,
            token_len,
        }
    }

    /// Accept connections until shutdown is signalled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), anyhow::Error> {
        let addr = self.listener.local_addr()?;
        tracing::info!(channel = %self.channel, addr = %addr, "Listening");

        let semaphore = Arc::new(Semaphore::new(self.max_connections));

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = shutdown.changed() => break,
            };

            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!(channel = %self.channel, error = %e, "Accept failed");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    continue;
                }
            };

            let permit = match Arc::clone(&semaphore).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::warn!(channel = %self.channel, peer = %peer, "Connection limit reached, rejecting");
                    continue;
                }
            };

            tracing::info!(channel = %self.channel, peer = %peer, "Robot connected");
            let channel = self.channel;
            let registry = Arc::clone(&self.registry);
            let handoff = Arc::clone(&self.handoff);
            let token_len = self.token_len;

            tokio::spawn(async move {
                let result = match channel {
                    Channel::Uplink => {
                        handle_uplink(stream, peer, UplinkHandler::new(registry, handoff)).await
                    }
                    Channel::Downlink => handle_downlink(stream, peer, &registry).await,
                    Channel::Liveness => handle_liveness(stream, peer, &registry, token_len).await,
                };
                match result {
                    Ok(()) => tracing::info!(channel = %channel, peer = %peer, "Robot disconnected"),
                    Err(e) => tracing::warn!(channel = %channel, peer = %peer, error = %e, "Connection ended"),
                }
                drop(permit);
            });
        }

        tracing::info!(channel = %self.channel, "Listener stopped");
        Ok(())
    }
}

fn lost(robot: RobotIdentity, e: std::io::Error) -> FleetError {
    FleetError::ConnectionLost {
        robot,
        reason: e.to_string(),
    }
}

/// Read status lines until the robot hangs up.
///
/// Lines are split on raw bytes so a line that is not valid UTF-8 is
/// dropped on its own and the connection keeps going.
async fn handle_uplink(
    stream: TcpStream,
    peer: SocketAddr,
    uplink: UplinkHandler,
) -> Result<(), FleetError> {
    let robot = RobotIdentity::from(peer.ip());
    uplink
        .registry()
        .update(robot, |rec| {
            rec.uplink_peer = Some(peer);
            rec.touch(Instant::now());
        })
        .await;

    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| lost(robot, e))?;
        if n == 0 {
            return Ok(());
        }

        let now = Instant::now();
        match std::str::from_utf8(&buf) {
            Ok(line) => {
                let line = line.trim();
                if !line.is_empty() {
                    uplink.handle_line(robot, line, now).await;
                }
            }
            Err(e) => {
                uplink.heartbeat(robot, now).await;
                let err = FleetError::MalformedPayload(format!("line is not UTF-8: {e}"));
                tracing::warn!(target: "uplink", robot = %robot, error = %err, "Ignoring malformed uplink message");
            }
        }
    }
}

/// Refresh liveness on every non-empty read.
async fn handle_liveness(
    mut stream: TcpStream,
    peer: SocketAddr,
    registry: &FleetRegistry,
    token_len: usize,
) -> Result<(), FleetError> {
    let robot = RobotIdentity::from(peer.ip());
    registry
        .update(robot, |rec| rec.liveness_peer = Some(peer))
        .await;

    let mut buf = vec![0u8; token_len];
    loop {
        let n = stream.read(&mut buf).await.map_err(|e| lost(robot, e))?;
        if n == 0 {
            return Ok(());
        }
        registry.update(robot, |rec| rec.touch(Instant::now())).await;
    }
}

/// Own the robot's downlink socket: attach a fresh handle to its record and
/// write every queued frame until the socket fails, the robot hangs up, or
/// a newer downlink connection replaces this one.
async fn handle_downlink(
    stream: TcpStream,
    peer: SocketAddr,
    registry: &FleetRegistry,
) -> Result<(), FleetError> {
    let robot = RobotIdentity::from(peer.ip());
    let (handle, mut rx) = DownlinkHandle::channel(Some(peer));
    registry
        .update(robot, |rec| rec.attach_downlink(handle))
        .await;

    let (mut reader, mut writer) = stream.into_split();
    let mut scratch = [0u8; 64];

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else {
                    tracing::debug!(target: "downlink", robot = %robot, "Downlink superseded by a newer connection");
                    return Ok(());
                };
                writer.write_all(frame.as_bytes()).await.map_err(|e| lost(robot, e))?;
                writer.flush().await.map_err(|e| lost(robot, e))?;
                tracing::debug!(target: "downlink", robot = %robot, frame = %frame.trim_end(), "Sent");
            }
            // Robots do not talk on the downlink; anything read is discarded.
            read = reader.read(&mut scratch) => {
                if read.map_err(|e| lost(robot, e))? == 0 {
                    return Ok(());
                }
            }
        }
    }
}
