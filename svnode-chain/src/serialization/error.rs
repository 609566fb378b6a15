use std::{io, num::TryFromIntError};

use thiserror::Error;

/// A serialization error.
#[derive(Error, Debug)]
pub enum SerializationError {
    /// An io error that prevented deserialization
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The data to be deserialized was malformed.
    ///
    /// The message names the field or tag that failed to parse.
    #[error("parse error: {0}")]
    Parse(&'static str),

    /// The length of a vec is too large to convert to a usize (and thus, too large to allocate on this platform)
    #[error("compactsize too large: {0}")]
    TryFromIntError(#[from] TryFromIntError),
}

impl SerializationError {
    /// Returns `true` if this error was caused by running out of input.
    pub fn is_truncated(&self) -> bool {
        matches!(self, SerializationError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}
