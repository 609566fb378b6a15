//! Opaque Bitcoin scripts.

use std::{fmt, io};

use crate::serialization::{sv_serialize_bytes, SerializationError, SvDeserialize, SvSerialize};

/// `OP_TRUE`, the simplest anyone-can-spend lock script.
pub const OP_TRUE: u8 = 0x51;

/// An encoding of a Bitcoin script.
///
/// The harness never evaluates scripts, it only carries their bytes.
#[derive(Clone, Default, Eq, PartialEq, Hash)]
#[cfg_attr(
    any(test, feature = "proptest-impl"),
    derive(proptest_derive::Arbitrary)
)]
pub struct Script(Vec<u8>);

impl Script {
    /// Create a new Bitcoin script from its raw bytes.
    /// The raw bytes must not contain the length prefix.
    pub fn new(raw_bytes: &[u8]) -> Self {
        Script(raw_bytes.to_vec())
    }

    /// A script consisting of a single `OP_TRUE`.
    pub fn op_true() -> Self {
        Script(vec![OP_TRUE])
    }

    /// A script that pushes `height` as a minimally-encoded script number,
    /// the way BIP 34 requires at the start of a coinbase script.
    pub fn height_push(height: u32) -> Self {
        let num = script_num(height.into());
        let mut bytes = Vec::with_capacity(num.len() + 1);
        bytes.push(num.len() as u8);
        bytes.extend_from_slice(&num);
        Script(bytes)
    }

    /// Return the raw bytes of the script without the length prefix.
    pub fn as_raw_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the number of bytes in the script.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the script has no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Encodes a non-negative `value` as a little-endian script number.
fn script_num(value: u64) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut magnitude = value;
    while magnitude > 0 {
        bytes.push((magnitude & 0xff) as u8);
        magnitude >>= 8;
    }

    // The top bit is the sign bit, so a set top bit needs a padding byte.
    if bytes.last().map_or(false, |last| last & 0x80 != 0) {
        bytes.push(0);
    }

    bytes
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Script")
            .field(&hex::encode(&self.0))
            .finish()
    }
}

impl SvSerialize for Script {
    fn sv_serialize<W: io::Write>(&self, writer: W) -> Result<(), io::Error> {
        sv_serialize_bytes(&self.0, writer)
    }
}

impl SvDeserialize for Script {
    fn sv_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(Script(Vec::sv_deserialize(reader)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_push_is_minimal() {
        svnode_test::init();

        assert_eq!(Script::height_push(0).as_raw_bytes(), &[0x00]);
        assert_eq!(Script::height_push(1).as_raw_bytes(), &[0x01, 0x01]);
        assert_eq!(Script::height_push(127).as_raw_bytes(), &[0x01, 0x7f]);
        // 128 needs a padding byte so it doesn't read as negative
        assert_eq!(Script::height_push(128).as_raw_bytes(), &[0x02, 0x80, 0x00]);
        assert_eq!(
            Script::height_push(500_000).as_raw_bytes(),
            &[0x03, 0x20, 0xa1, 0x07]
        );
    }
}
