use std::{io, sync::Arc};

use super::WriteSvExt;

/// The maximum length of a protocol message payload, in bytes.
///
/// Bitcoin SV lifted the legacy 32 MB cap, and `extmsg` framing allows
/// payloads wider than 32 bits. The harness never needs more than this, and it
/// bounds every length read from the wire.
pub const MAX_PROTOCOL_MESSAGE_LEN: usize = 1024 * 1024 * 1024;

/// Bit-exact Bitcoin wire serialization.
///
/// This trait provides a generic serialization for the formats that appear on
/// the P2P wire, such as network messages, transactions, blocks, etc.
pub trait SvSerialize: Sized {
    /// Write `self` to the given `writer` using the canonical format.
    ///
    /// This function has a `sv_` prefix to alert the reader that the
    /// serialization in use is the wire format, rather than some other kind of
    /// serialization.
    ///
    /// Notice that the error type is [`std::io::Error`]; this indicates that
    /// serialization MUST be infallible up to errors in the underlying writer.
    /// In other words, any type implementing `SvSerialize` must make illegal
    /// states unrepresentable.
    fn sv_serialize<W: io::Write>(&self, writer: W) -> Result<(), io::Error>;

    /// Helper function to construct a vec to serialize the current struct into
    fn sv_serialize_to_vec(&self) -> Result<Vec<u8>, io::Error> {
        let mut data = Vec::new();
        self.sv_serialize(&mut data)?;
        Ok(data)
    }

    /// Get the size of `self` by using a fake writer.
    fn sv_serialized_size(&self) -> usize {
        let mut writer = FakeWriter(0);
        self.sv_serialize(&mut writer)
            .expect("writing to a FakeWriter should never fail");
        writer.0
    }
}

/// A fake writer helper used to get object lengths without allocating RAM.
pub struct FakeWriter(pub usize);

impl io::Write for FakeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Serialize a `Vec` as a compactsize number of items, then the items. This is
/// the most common format on the wire.
impl<T: SvSerialize> SvSerialize for Vec<T> {
    fn sv_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_compactsize(self.len() as u64)?;
        sv_serialize_external_count(self, writer)
    }
}

impl<T: SvSerialize> SvSerialize for Arc<T> {
    fn sv_serialize<W: io::Write>(&self, writer: W) -> Result<(), io::Error> {
        T::sv_serialize(self, writer)
    }
}

/// Serialize a byte slice as a compactsize number of bytes, then the bytes.
pub fn sv_serialize_bytes<W: io::Write>(bytes: &[u8], mut writer: W) -> Result<(), io::Error> {
    writer.write_compactsize(bytes.len() as u64)?;
    writer.write_all(bytes)
}

/// Serialize a typed slice **without** writing the number of items as a
/// compactsize.
///
/// Use this when the item count is implied by other data, such as the
/// transaction count that precedes a block's transactions after the header.
pub fn sv_serialize_external_count<W: io::Write, T: SvSerialize>(
    items: &[T],
    mut writer: W,
) -> Result<(), io::Error> {
    for item in items {
        item.sv_serialize(&mut writer)?;
    }
    Ok(())
}

/// Write a Bitcoin-encoded UTF-8 `&str`.
impl SvSerialize for &str {
    fn sv_serialize<W: io::Write>(&self, writer: W) -> Result<(), io::Error> {
        sv_serialize_bytes(self.as_bytes(), writer)
    }
}

/// Write a Bitcoin-encoded UTF-8 `String`.
impl SvSerialize for String {
    fn sv_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.as_str().sv_serialize(&mut writer)
    }
}
