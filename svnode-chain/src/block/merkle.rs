//! The Bitcoin transaction Merkle tree.

use std::{fmt, io, io::Write};

#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;

use crate::{
    serialization::{sha256d, ReadSvExt, SerializationError, SvDeserialize, SvSerialize},
    transaction,
};

/// The root of the Bitcoin transaction Merkle tree, binding the block header
/// to the transactions in the block.
///
/// Because of a flaw in Bitcoin's design, the `merkle_root` does not always
/// precisely bind the contents of the block (CVE-2012-2459): when a level has
/// an odd number of hashes, the last one is paired with itself.
#[derive(Clone, Copy, Default, Eq, PartialEq, Hash)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Root(pub [u8; 32]);

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut reversed_bytes = self.0;
        reversed_bytes.reverse();
        f.debug_tuple("Root").field(&hex::encode(reversed_bytes)).finish()
    }
}

impl fmt::Display for Root {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut reversed_bytes = self.0;
        reversed_bytes.reverse();
        f.write_str(&hex::encode(reversed_bytes))
    }
}

impl From<[u8; 32]> for Root {
    fn from(hash: [u8; 32]) -> Self {
        Root(hash)
    }
}

impl From<Root> for [u8; 32] {
    fn from(hash: Root) -> Self {
        hash.0
    }
}

impl SvSerialize for Root {
    fn sv_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_all(&self.0)
    }
}

impl SvDeserialize for Root {
    fn sv_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Root(reader.read_32_bytes()?))
    }
}

/// Hashes a pair of tree nodes into their parent.
pub(crate) fn hash(h1: &[u8; 32], h2: &[u8; 32]) -> [u8; 32] {
    let mut w = sha256d::Writer::default();
    w.write_all(h1).expect("sha256d::Writer is infallible");
    w.write_all(h2).expect("sha256d::Writer is infallible");
    w.finish()
}

/// Hashes one level of the tree into the next, pairing an odd last node with itself.
pub(crate) fn next_level(level: &[[u8; 32]]) -> Vec<[u8; 32]> {
    level
        .chunks(2)
        .map(|chunk| match chunk {
            [h1, h2] => hash(h1, h2),
            [h1] => hash(h1, h1),
            _ => unreachable!("chunks(2)"),
        })
        .collect()
}

impl std::iter::FromIterator<transaction::Hash> for Root {
    /// Computes the merkle root of a list of transaction ids.
    ///
    /// An empty list has an all-zero root.
    fn from_iter<I>(hashes: I) -> Self
    where
        I: IntoIterator<Item = transaction::Hash>,
    {
        let mut hashes = hashes.into_iter().map(|hash| hash.0).collect::<Vec<_>>();
        while hashes.len() > 1 {
            hashes = next_level(&hashes);
        }

        hashes.first().copied().map(Root).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{block::Block, serialization::SvDeserializeInto};

    #[test]
    fn genesis_merkle_root() {
        svnode_test::init();

        let block: Block = svnode_test::vectors::GENESIS_BLOCK_BYTES
            .as_slice()
            .sv_deserialize_into()
            .expect("genesis block should deserialize");

        let root: Root = block.transaction_hashes().collect();
        assert_eq!(root, block.header.merkle_root());
        assert_eq!(root.to_string(), svnode_test::vectors::GENESIS_MERKLE_ROOT);
    }

    #[test]
    fn odd_levels_duplicate_the_last_hash() {
        svnode_test::init();

        let leaves: Vec<transaction::Hash> =
            (1..=3u8).map(|i| transaction::Hash([i; 32])).collect();
        let root: Root = leaves.iter().copied().collect();

        let left = hash(&[1; 32], &[2; 32]);
        let right = hash(&[3; 32], &[3; 32]);
        assert_eq!(root, Root(hash(&left, &right)));

        let single: Root = std::iter::once(leaves[0]).collect();
        assert_eq!(single.0, [1; 32]);

        let empty: Root = std::iter::empty().collect();
        assert_eq!(empty, Root::default());
    }
}
