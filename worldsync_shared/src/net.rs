//! Wire protocol.
//!
//! One persistent TCP connection per session carries every message in both
//! directions as length-prefixed JSON frames. Serialization stays explicit
//! and versionable; delivery is fire-and-forget above the framing layer.

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
};

use crate::math::{Pose, Quat, Vec3};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a connected session. Assigned by the server at accept time and
/// stable for the connection's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Allocates a fresh id plus the numeric seed it was minted from.
    /// A monotonic counter is sufficient for the trusted-LAN threat model.
    pub fn new_unique() -> (Self, u64) {
        let n = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        (SessionId(format!("s{n}")), n)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Partial pose carried on the wire; either half may be absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PoseUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec3>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<Quat>,
}

impl PoseUpdate {
    pub fn full(pose: Pose) -> Self {
        Self {
            position: Some(pose.position),
            orientation: Some(pose.orientation),
        }
    }

    /// Overwrites only the fields this update provides.
    pub fn apply_to(&self, pose: &mut Pose) {
        if let Some(position) = self.position {
            pose.position = position;
        }
        if let Some(orientation) = self.orientation {
            pose.orientation = orientation;
        }
    }

    /// Resolves against a base pose, yielding a complete pose.
    pub fn resolve(&self, mut base: Pose) -> Pose {
        self.apply_to(&mut base);
        base
    }
}

/// One snapshot entry: a world entity, a session-owned entity, or a
/// session's own roster record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub display_name: String,
    pub pose: PoseUpdate,
    /// Server wall-clock milliseconds for entity records; the client's own
    /// reported timestamp for roster records.
    pub timestamp: i64,
    /// Round-trip latency in milliseconds; -1 where not applicable.
    pub ping: i64,
}

/// Full periodic state dump. Always the entire world; no deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tick: u64,
    pub entries: std::collections::BTreeMap<String, EntityRecord>,
}

/// Per-tick client report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pose: Option<PoseUpdate>,
    pub ping: i64,
    pub timestamp: i64,
}

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum WorldMsg {
    // ─── Handshake ───
    /// Server assigns identity on connect; the client must answer with
    /// `SetName` before its periodic tick is armed.
    Identity {
        id: SessionId,
        name_seed: u64,
        scenario: i32,
    },
    SetName {
        name: String,
    },

    // ─── Scenario control ───
    ScenarioChanged {
        index: i32,
    },
    ChangeScenario {
        index: i32,
    },

    // ─── Replication ───
    Snapshot(Snapshot),
    Update(UpstreamUpdate),

    // ─── Session lifecycle ───
    SessionRemoved {
        id: SessionId,
    },
}

async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, msg: &WorldMsg) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(msg).context("serialize msg")?;
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    w.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

/// Reads one raw frame. I/O failure here means the connection is gone;
/// decoding is left to the caller so a malformed payload can be dropped
/// without tearing the stream down.
async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> anyhow::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await.context("tcp read len")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).await.context("tcp read payload")?;
    Ok(payload)
}

/// A framed connection over TCP.
#[derive(Debug)]
pub struct FramedConn {
    stream: TcpStream,
}

impl FramedConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        Ok(Self::new(stream))
    }

    pub async fn send(&mut self, msg: &WorldMsg) -> anyhow::Result<()> {
        write_frame(&mut self.stream, msg).await
    }

    pub async fn recv(&mut self) -> anyhow::Result<WorldMsg> {
        let payload = read_frame(&mut self.stream).await?;
        serde_json::from_slice(&payload).context("deserialize msg")
    }

    /// Receives one raw frame; decode with [`decode_from_bytes`].
    pub async fn recv_frame(&mut self) -> anyhow::Result<Vec<u8>> {
        read_frame(&mut self.stream).await
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Splits into independently owned read/write halves so reading and
    /// broadcasting can run on separate tasks.
    pub fn into_split(self) -> (FramedReader, FramedWriter) {
        let (read, write) = self.stream.into_split();
        (FramedReader { half: read }, FramedWriter { half: write })
    }
}

/// Read half of a framed connection.
#[derive(Debug)]
pub struct FramedReader {
    half: OwnedReadHalf,
}

impl FramedReader {
    /// Receives one raw frame; decode with [`decode_from_bytes`].
    pub async fn recv_frame(&mut self) -> anyhow::Result<Vec<u8>> {
        read_frame(&mut self.half).await
    }

    pub async fn recv(&mut self) -> anyhow::Result<WorldMsg> {
        let payload = self.recv_frame().await?;
        serde_json::from_slice(&payload).context("deserialize msg")
    }
}

/// Write half of a framed connection.
#[derive(Debug)]
pub struct FramedWriter {
    half: OwnedWriteHalf,
}

impl FramedWriter {
    pub async fn send(&mut self, msg: &WorldMsg) -> anyhow::Result<()> {
        write_frame(&mut self.half, msg).await
    }
}

/// TCP server listener.
pub struct FrameListener {
    listener: TcpListener,
}

impl FrameListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(FramedConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        Ok((FramedConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes(msg: &WorldMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<WorldMsg> {
    serde_json::from_slice(b).context("deserialize")
}
