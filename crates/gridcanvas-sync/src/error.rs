//! Error types for gridcanvas-sync

use thiserror::Error;

/// Transport, relay and persistence errors
#[derive(Debug, Error)]
pub enum Error {
    /// The peer went away or the stream closed mid-session
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// An update buffer the room document rejected
    #[error("malformed update: {0}")]
    MalformedUpdate(String),

    /// A frame that is valid but not allowed in the current state
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    /// Snapshot load or save failed
    #[error("snapshot storage: {0}")]
    Storage(String),

    #[error("invalid ticket: {0}")]
    InvalidTicket(String),

    /// The local endpoint could not be set up
    #[error("transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error(transparent)]
    Core(#[from] gridcanvas_core::Error),
}

impl Error {
    /// Errors a client can get past by reconnecting, or a server by
    /// dropping the offending message
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ConnectionLost(_) | Self::MalformedUpdate(_) | Self::Io(_) => true,
            Self::Core(e) => e.is_recoverable(),
            _ => false,
        }
    }

    /// Stable code sent in `Error` frames
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConnectionLost(_) => "connection_lost",
            Self::MalformedUpdate(_) => MALFORMED_UPDATE,
            Self::Protocol(_) => "protocol",
            Self::FrameTooLarge { .. } => "frame_too_large",
            Self::Storage(_) => "storage",
            Self::InvalidTicket(_) => "invalid_ticket",
            Self::Transport(_) => "transport",
            Self::Io(_) => "io",
            Self::Encode(_) => "encode",
            Self::Decode(_) => "decode",
            Self::Core(e) => e.code(),
        }
    }
}

/// Error frame code for a dropped update; the connection stays open
pub(crate) const MALFORMED_UPDATE: &str = "malformed_update";

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classes() {
        assert!(Error::ConnectionLost("eof".into()).is_recoverable());
        assert!(Error::MalformedUpdate("bad".into()).is_recoverable());
        assert!(!Error::Protocol("join twice".into()).is_recoverable());
        assert!(!Error::FrameTooLarge { len: 10, max: 5 }.is_recoverable());
    }

    #[test]
    fn test_core_errors_keep_their_code() {
        let err: Error = gridcanvas_core::Error::MalformedUpdate("x".into()).into();
        assert_eq!(err.code(), "malformed_update");
        assert!(err.is_recoverable());
    }
}
