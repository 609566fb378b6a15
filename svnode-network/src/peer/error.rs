//! Peer-related errors.

use std::{io, sync::Arc, time::Duration};

use thiserror::Error;

use crate::{protocol::external::codec::CodecError, BoxError};

/// Why a connection closed.
///
/// Close reasons are shared between the reactor and every test thread that
/// observes the connection, so the error sources are reference-counted.
#[derive(Error, Debug, Clone)]
pub enum CloseReason {
    /// This side asked to disconnect, and the send buffer was flushed.
    #[error("closed locally")]
    Requested,

    /// The remote peer closed the connection.
    #[error("remote peer closed the connection")]
    PeerClosed,

    /// The reactor stopped while the connection was open.
    #[error("reactor stopped")]
    Stopped,

    /// The TCP connection could not be established.
    #[error("connect failed: {0}")]
    ConnectFailed(Arc<io::Error>),

    /// A socket read or write failed.
    #[error("socket error: {0}")]
    Io(Arc<io::Error>),

    /// The peer broke the framing or payload rules, or a message could not
    /// be encoded.
    #[error("protocol error: {0}")]
    Codec(Arc<CodecError>),
}

impl CloseReason {
    /// Returns `true` if the connection closed without an error on either side.
    pub fn is_clean(&self) -> bool {
        matches!(
            self,
            CloseReason::Requested | CloseReason::PeerClosed | CloseReason::Stopped
        )
    }
}

impl From<CodecError> for CloseReason {
    fn from(error: CodecError) -> Self {
        CloseReason::Codec(Arc::new(error))
    }
}

/// An error returned to a test thread waiting on or sending to a peer.
#[derive(Error, Debug)]
pub enum PeerError {
    /// The connection closed before the operation could complete.
    #[error("connection closed: {0}")]
    ConnectionClosed(CloseReason),

    /// The awaited condition didn't hold before the timeout.
    #[error("timed out after {0:?} waiting for peer state")]
    Timeout(Duration),

    /// The node activity probe failed.
    #[error("activity probe failed: {0}")]
    Probe(#[source] BoxError),

    /// The reactor thread is no longer running.
    #[error("reactor stopped")]
    ReactorStopped,
}
