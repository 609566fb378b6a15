//! SHA256d, a.k.a., double SHA2: the identity hash of every Bitcoin object.

use std::{fmt, io::prelude::*};

use sha2::{Digest, Sha256};

/// An `io::Write` instance that produces a SHA256d output.
#[derive(Default)]
pub struct Writer {
    hash: Sha256,
}

impl Writer {
    /// Consume the Writer and produce the hash result.
    pub fn finish(self) -> [u8; 32] {
        let result1 = self.hash.finalize();
        let result2 = Sha256::digest(result1);
        let mut buffer = [0u8; 32];
        buffer[0..32].copy_from_slice(&result2[0..32]);
        buffer
    }
}

impl Write for Writer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.hash.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Hashes `bytes` with two rounds of SHA256.
pub fn hash(bytes: &[u8]) -> [u8; 32] {
    let mut writer = Writer::default();
    writer
        .write_all(bytes)
        .expect("sha256d::Writer is infallible");
    writer.finish()
}

/// A 4-byte checksum using truncated double-SHA256 (two rounds of SHA256).
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Checksum(pub [u8; 4]);

impl<'a> From<&'a [u8]> for Checksum {
    fn from(bytes: &'a [u8]) -> Self {
        let hash = hash(bytes);
        let mut checksum = [0u8; 4];
        checksum[0..4].copy_from_slice(&hash[0..4]);
        Self(checksum)
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Sha256dChecksum")
            .field(&hex::encode(self.0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_checksum() {
        svnode_test::init();

        // The legacy header of every empty message (verack, getaddr, ...) carries this.
        assert_eq!(Checksum::from(&[][..]).0, [0x5d, 0xf6, 0xe0, 0xe2]);
    }
}
