//! Wire frames for the room protocol.
//!
//! Every frame is a msgpack-encoded enum prefixed with its length as a
//! little-endian `u32`. A client opens one bidirectional stream, sends
//! `Join`, and from then on both sides stream frames until either closes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// ALPN for the gridcanvas room protocol
pub const ALPN: &[u8] = b"gridcanvas/room/1";

/// Upper bound on a single frame; a full document sync is the largest
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Identifies one shared document and the room that serves it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Server-assigned id for one joined connection; presence is keyed by it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Allocate a process-unique id
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientFrame {
    /// Must be the first frame on a connection
    Join { room: RoomId },
    /// An incremental or full automerge change buffer
    Update(Vec<u8>),
    /// Opaque presence payload, relayed verbatim
    Awareness(Vec<u8>),
}

/// Server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerFrame {
    /// Full room state, sent once right after a join
    Sync(Vec<u8>),
    /// Change buffer relayed from another member
    Update(Vec<u8>),
    Awareness { from: ConnectionId, payload: Vec<u8> },
    /// The member left; drop its cursor
    AwarenessRemoved { from: ConnectionId },
    Error { code: String, message: String },
}

impl ServerFrame {
    pub fn error(err: &Error) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Write one length-prefixed frame and flush
pub async fn send_frame<W, T>(send: &mut W, frame: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let data = rmp_serde::to_vec(frame)?;
    if data.len() > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge {
            len: data.len(),
            max: MAX_FRAME_LEN,
        });
    }
    let len = data.len() as u32;
    send.write_all(&len.to_le_bytes()).await?;
    send.write_all(&data).await?;
    send.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` means the peer closed cleanly between frames.
pub async fn recv_frame<R, T>(recv: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match recv.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut buf = vec![0u8; len];
    recv.read_exact(&mut buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::ConnectionLost("stream closed mid-frame".into())
        } else {
            e.into()
        }
    })?;
    Ok(Some(rmp_serde::from_slice(&buf)?))
}
