//! Association errors.

use thiserror::Error;

use crate::{
    peer::PeerError,
    protocol::external::StreamType,
    reactor::ReactorError,
};

/// An error setting up or using an association from the initiator side.
#[derive(Error, Debug)]
pub enum AssociationError {
    /// A stream connection failed.
    #[error(transparent)]
    Peer(#[from] PeerError),

    /// The reactor couldn't open a stream connection.
    #[error(transparent)]
    Reactor(#[from] ReactorError),

    /// The peer's `version` didn't carry an association id, so it doesn't
    /// support associations.
    #[error("peer did not return an association id")]
    NoAssociationId,

    /// The peer rejected a `createstrm`.
    #[error("peer rejected stream {stream_type}: {reason}")]
    StreamRejected {
        /// The requested stream type.
        stream_type: StreamType,
        /// The reason string from the peer's `reject`.
        reason: String,
    },

    /// The stream connection closed before the peer answered its
    /// `createstrm`.
    #[error("stream {stream_type} closed before it was acknowledged")]
    StreamClosed {
        /// The requested stream type.
        stream_type: StreamType,
    },
}

/// Why a node refuses a `createstrm` request.
///
/// The `Display` strings are the reject reasons a node sends on the wire.
#[derive(Error, Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StreamSetupError {
    /// The request carried an empty association id.
    #[error("Badly formatted message")]
    BadlyFormatted,

    /// No association has the requested id.
    #[error("No node found with association ID")]
    UnknownAssociation,

    /// The stream type isn't one a stream can be created for.
    #[error("StreamType out of range")]
    StreamTypeOutOfRange,

    /// The association already has a stream of the requested type.
    #[error("Attempt to overwrite existing stream")]
    DuplicateStream,

    /// The requested stream policy isn't known.
    #[error("Unknown stream policy name")]
    UnknownPolicy,
}
