use std::{
    convert::{TryFrom, TryInto},
    io::{self, Read},
    sync::Arc,
};

use super::{ReadSvExt, SerializationError, MAX_PROTOCOL_MESSAGE_LEN};

/// Bit-exact Bitcoin wire deserialization.
///
/// This trait provides a generic deserialization for the formats that appear
/// on the P2P wire, such as network messages, transactions, blocks, etc.
pub trait SvDeserialize: Sized {
    /// Try to read `self` from the given `reader`.
    ///
    /// This function has a `sv_` prefix to alert the reader that the
    /// serialization in use is the wire format, rather than some other kind of
    /// serialization.
    fn sv_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError>;
}

/// Deserialize a `Vec`, where the number of items is set by a compactsize
/// prefix in the data. This is the most common format on the wire.
impl<T: SvDeserialize + TrustedPreallocate> SvDeserialize for Vec<T> {
    fn sv_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let len = reader.read_compactsize()?.try_into()?;
        sv_deserialize_external_count(len, reader)
    }
}

/// Implement SvDeserialize for Vec<u8> directly instead of using the blanket Vec implementation
///
/// Note that we don't implement TrustedPreallocate for u8.
/// This allows the byte-string optimization without relying on specialization.
impl SvDeserialize for Vec<u8> {
    fn sv_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let len = reader.read_compactsize()?.try_into()?;
        sv_deserialize_bytes_external_count(len, reader)
    }
}

impl<T: SvDeserialize> SvDeserialize for Arc<T> {
    fn sv_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(Arc::new(T::sv_deserialize(reader)?))
    }
}

/// Deserialize a `Vec` containing `external_count` items.
///
/// Use this when the item count is implied by other data rather than by a
/// compactsize directly in front of the items.
pub fn sv_deserialize_external_count<R: io::Read, T: SvDeserialize + TrustedPreallocate>(
    external_count: usize,
    mut reader: R,
) -> Result<Vec<T>, SerializationError> {
    match u64::try_from(external_count) {
        Ok(external_count) if external_count > T::max_allocation() => {
            return Err(SerializationError::Parse(
                "Vector longer than max_allocation",
            ))
        }
        Ok(_) => {}
        Err(_) => return Err(SerializationError::Parse("Vector longer than u64::MAX")),
    }
    let mut vec = Vec::with_capacity(external_count);
    for _ in 0..external_count {
        vec.push(T::sv_deserialize(&mut reader)?);
    }
    Ok(vec)
}

/// `sv_deserialize_external_count`, specialised for raw bytes.
///
/// The buffer grows as bytes arrive, so a hostile length prefix can't force a
/// large allocation before the data is actually present.
pub fn sv_deserialize_bytes_external_count<R: io::Read>(
    external_count: usize,
    reader: R,
) -> Result<Vec<u8>, SerializationError> {
    if external_count > MAX_U8_ALLOCATION {
        return Err(SerializationError::Parse(
            "Byte vector longer than MAX_U8_ALLOCATION",
        ));
    }

    let mut vec = Vec::with_capacity(external_count.min(INITIAL_BYTES_CAPACITY));
    reader.take(external_count as u64).read_to_end(&mut vec)?;

    if vec.len() != external_count {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated byte vector").into());
    }

    Ok(vec)
}

/// Read a Bitcoin-encoded UTF-8 string.
impl SvDeserialize for String {
    fn sv_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        let bytes: Vec<_> = Vec::sv_deserialize(reader)?;
        String::from_utf8(bytes).map_err(|_| SerializationError::Parse("invalid utf-8"))
    }
}

/// Helper for deserializing more succinctly via type inference
pub trait SvDeserializeInto {
    /// Deserialize based on type inference
    fn sv_deserialize_into<T>(self) -> Result<T, SerializationError>
    where
        T: SvDeserialize;
}

impl<R: io::Read> SvDeserializeInto for R {
    fn sv_deserialize_into<T>(self) -> Result<T, SerializationError>
    where
        T: SvDeserialize,
    {
        T::sv_deserialize(self)
    }
}

/// Blind preallocation of a Vec<T: TrustedPreallocate> is based on a bounded length. This is in contrast
/// to blind preallocation of a generic Vec<T>, which is a DOS vector.
///
/// The max_allocation() function provides a loose upper bound on the size of the Vec<T: TrustedPreallocate>
/// which can possibly be received from an honest peer.
pub trait TrustedPreallocate {
    /// Provides a ***loose upper bound*** on the size of the Vec<T: TrustedPreallocate>
    /// which can possibly be received from an honest peer.
    fn max_allocation() -> u64;
}

impl<T: TrustedPreallocate> TrustedPreallocate for Arc<T> {
    fn max_allocation() -> u64 {
        T::max_allocation()
    }
}

/// The length of the longest valid `Vec<u8>` that can be received over the network.
///
/// The byte count itself takes at least one byte of the message.
pub(crate) const MAX_U8_ALLOCATION: usize = MAX_PROTOCOL_MESSAGE_LEN - 1;

/// Byte vectors start with at most this much capacity, then grow as data arrives.
const INITIAL_BYTES_CAPACITY: usize = 64 * 1024;
