//! Blocks and block-related structures (headers, hashes, merkle roots).

mod hash;
mod header;
mod serialize;

pub mod merkle;

#[cfg(any(test, feature = "proptest-impl"))]
mod arbitrary;

use std::{fmt, sync::Arc};

pub use hash::Hash;
pub use header::{expand_compact_target, CountedHeader, Header, REGTEST_DIFFICULTY_BITS};
pub use serialize::BLOCK_HEADER_LENGTH;

use crate::transaction::{self, Transaction};

/// A block, containing a header and a list of transactions.
///
/// The block hash is the header hash, which the header caches itself.
/// Changing `transactions` does not change the hash until the merkle root in
/// the header is updated with [`Block::update_merkle_root`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Block {
    /// The block header, containing block metadata.
    pub header: Header,
    /// The block transactions.
    pub transactions: Vec<Arc<Transaction>>,
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("hash", &format_args!("{}", self.hash()))
            .field("transactions", &self.transactions.len())
            .finish()
    }
}

impl Block {
    /// Returns a block on top of `previous_block_hash` containing
    /// `transactions`, with a matching merkle root and regtest difficulty.
    ///
    /// The header is not solved, call [`Header::solve`] if the node under test
    /// checks proof of work.
    pub fn new(
        previous_block_hash: Hash,
        time: u32,
        transactions: Vec<Arc<Transaction>>,
    ) -> Block {
        let merkle_root = transactions.iter().map(|tx| tx.hash()).collect();
        let header = Header::new(
            1,
            previous_block_hash,
            merkle_root,
            time,
            REGTEST_DIFFICULTY_BITS,
            0,
        );

        Block {
            header,
            transactions,
        }
    }

    /// Compute the hash of this block.
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Compute the merkle root of this block's transactions.
    pub fn compute_merkle_root(&self) -> merkle::Root {
        self.transaction_hashes().collect()
    }

    /// Sets the header's merkle root to match the current transactions.
    pub fn update_merkle_root(&mut self) {
        let root = self.compute_merkle_root();
        self.header.set_merkle_root(root);
    }

    /// Returns `true` if the header's merkle root commits to the transactions.
    pub fn has_valid_merkle_root(&self) -> bool {
        self.header.merkle_root() == self.compute_merkle_root()
    }

    /// Access the transaction hashes in this block, in block order.
    pub fn transaction_hashes(&self) -> impl Iterator<Item = transaction::Hash> + '_ {
        self.transactions.iter().map(|tx| tx.hash())
    }
}

impl<'a> From<&'a Block> for Hash {
    fn from(block: &'a Block) -> Hash {
        block.header.hash()
    }
}
