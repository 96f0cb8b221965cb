//! Tunnel collaborator interface and the socket-level implementation.
//!
//! The prober only needs two things from a tunnel: open a session to a
//! gateway within a deadline, and report packet loss over a bounded number
//! of echo attempts through that session.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use gatewatch_core::Credentials;
use thiserror::Error;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time;
use tracing::trace;

use crate::error::{HealthError, HealthResult};

/// Transport modes understood by the tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Udp,
    Tcp,
}

impl Protocol {
    /// Map an endpoint transport tag to a protocol.
    pub fn from_tag(tag: &str) -> HealthResult<Self> {
        match tag {
            "udp" => Ok(Protocol::Udp),
            "tcp" => Ok(Protocol::Tcp),
            other => Err(HealthError::UnknownProtocol(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        }
    }
}

/// Everything needed to open a tunnel to one gateway.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub remote: SocketAddr,
    pub protocol: Protocol,
    pub cipher: String,
    pub auth: String,
    pub credentials: Credentials,
}

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("tunnel establishment failed: {0}")]
    Establish(String),

    #[error("reachability probe failed: {0}")]
    Measure(String),

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A way of opening sessions to gateways and measuring loss through them.
#[async_trait]
pub trait TunnelProbe: Send + Sync + 'static {
    type Session: Send;

    /// Open a session. Implementations should give up after `timeout`.
    async fn establish(
        &self,
        params: &ConnectParams,
        timeout: Duration,
    ) -> Result<Self::Session, TunnelError>;

    /// Run `count` echo attempts and return the loss ratio in `[0, 1]`.
    async fn measure(
        &self,
        session: &mut Self::Session,
        count: u32,
        timeout: Duration,
    ) -> Result<f64, TunnelError>;

    /// Close the session.
    async fn teardown(&self, session: Self::Session) {
        drop(session);
    }
}

const P_CONTROL_HARD_RESET_CLIENT_V2: u8 = 7;
const P_CONTROL_HARD_RESET_SERVER_V2: u8 = 8;

/// Tunnel probe working at the socket level.
///
/// TCP gateways count as established once the connection is accepted and
/// each echo is a fresh connect. UDP gateways must answer an OpenVPN client
/// hard-reset with a server hard-reset, both to establish and for each echo.
#[derive(Debug, Clone, Default)]
pub struct SocketProbe;

#[derive(Debug)]
pub enum SocketSession {
    Tcp { remote: SocketAddr, stream: TcpStream },
    Udp { socket: UdpSocket },
}

#[async_trait]
impl TunnelProbe for SocketProbe {
    type Session = SocketSession;

    async fn establish(
        &self,
        params: &ConnectParams,
        timeout: Duration,
    ) -> Result<SocketSession, TunnelError> {
        let remote = params.remote;
        match params.protocol {
            Protocol::Tcp => {
                let stream = time::timeout(timeout, TcpStream::connect(remote))
                    .await
                    .map_err(|_| TunnelError::Timeout { stage: "dial", after: timeout })?
                    .map_err(|e| TunnelError::Establish(e.to_string()))?;
                Ok(SocketSession::Tcp { remote, stream })
            }
            Protocol::Udp => {
                let local = if remote.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
                let socket = UdpSocket::bind(local).await?;
                socket.connect(remote).await?;
                time::timeout(timeout, hard_reset(&socket, session_id(0)))
                    .await
                    .map_err(|_| TunnelError::Timeout { stage: "dial", after: timeout })??;
                Ok(SocketSession::Udp { socket })
            }
        }
    }

    async fn measure(
        &self,
        session: &mut SocketSession,
        count: u32,
        timeout: Duration,
    ) -> Result<f64, TunnelError> {
        if count == 0 {
            return Err(TunnelError::Measure("probe count is zero".to_string()));
        }
        // Leave headroom so the attempts finish inside the caller's deadline.
        let per_attempt = timeout / (count + 1);
        let mut lost = 0u32;

        for attempt in 1..=count {
            let answered = match session {
                SocketSession::Tcp { remote, .. } => {
                    matches!(time::timeout(per_attempt, TcpStream::connect(*remote)).await, Ok(Ok(_)))
                }
                SocketSession::Udp { socket } => {
                    let sid = session_id(attempt);
                    matches!(time::timeout(per_attempt, hard_reset(socket, sid)).await, Ok(Ok(())))
                }
            };
            if !answered {
                trace!(attempt, "echo lost");
                lost += 1;
            }
        }

        Ok(f64::from(lost) / f64::from(count))
    }

    async fn teardown(&self, session: SocketSession) {
        if let SocketSession::Tcp { mut stream, .. } = session {
            use tokio::io::AsyncWriteExt;
            let _ = stream.shutdown().await;
        }
    }
}

/// Send a client hard-reset and wait for the server reset acking it.
///
/// Replies acking another session id belong to an earlier attempt and are
/// dropped; the caller's timeout bounds the wait.
async fn hard_reset(socket: &UdpSocket, session_id: u64) -> Result<(), TunnelError> {
    socket.send(&hard_reset_packet(session_id)).await?;

    let mut buf = [0u8; 1500];
    loop {
        let n = socket.recv(&mut buf).await?;
        match acked_session(&buf[..n]) {
            Some(acked) if acked == session_id => return Ok(()),
            acked => trace!(?acked, expected = session_id, "ignoring stale reply"),
        }
    }
}

/// Remote session id acked by a server hard-reset, if `packet` is one.
///
/// Layout: opcode|key id (1), session id (8), ack count (1), acked packet
/// ids (4 each), remote session id (8, only with acks), packet id (4).
fn acked_session(packet: &[u8]) -> Option<u64> {
    if packet.len() < 10 || packet[0] >> 3 != P_CONTROL_HARD_RESET_SERVER_V2 {
        return None;
    }
    let acks = usize::from(packet[9]);
    if acks == 0 {
        return None;
    }
    let at = 10 + 4 * acks;
    let remote = packet.get(at..at + 8)?;
    let mut id = [0u8; 8];
    id.copy_from_slice(remote);
    Some(u64::from_be_bytes(id))
}

fn hard_reset_packet(session_id: u64) -> [u8; 14] {
    let mut packet = [0u8; 14];
    // opcode (5 bits) | key id (3 bits)
    packet[0] = P_CONTROL_HARD_RESET_CLIENT_V2 << 3;
    packet[1..9].copy_from_slice(&session_id.to_be_bytes());
    // packet[9]: empty ack array, packet[10..14]: message packet id 0
    packet
}

fn session_id(attempt: u32) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    nanos ^ u64::from(attempt)
}
