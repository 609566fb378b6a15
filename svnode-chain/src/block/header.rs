use std::fmt;

use once_cell::sync::OnceCell;

use super::{merkle, Hash};

/// The difficulty bits used by regtest blocks: half of all hashes meet the target.
pub const REGTEST_DIFFICULTY_BITS: u32 = 0x207f_ffff;

/// A block header, containing metadata about a block.
///
/// How are blocks chained together? They are chained together via the
/// backwards reference (previous header hash) present in the block
/// header. Each block points backwards to its parent, all the way
/// back to the genesis block (the first block in the blockchain).
///
/// The header hash is cached on first use. Every setter clears the cache.
#[derive(Clone)]
pub struct Header {
    version: i32,
    previous_block_hash: Hash,
    merkle_root: merkle::Root,
    time: u32,
    difficulty_threshold: u32,
    nonce: u32,
    hash: OnceCell<Hash>,
}

impl Header {
    /// Returns a header with the supplied fields.
    pub fn new(
        version: i32,
        previous_block_hash: Hash,
        merkle_root: merkle::Root,
        time: u32,
        difficulty_threshold: u32,
        nonce: u32,
    ) -> Header {
        Header {
            version,
            previous_block_hash,
            merkle_root,
            time,
            difficulty_threshold,
            nonce,
            hash: OnceCell::new(),
        }
    }

    /// Returns the header hash, computing and caching it if needed.
    pub fn hash(&self) -> Hash {
        *self.hash.get_or_init(|| Hash::from(self))
    }

    /// Recomputes the header hash, discarding any cached value.
    pub fn rehash(&mut self) -> Hash {
        self.hash = OnceCell::new();
        self.hash()
    }

    /// Returns `true` if the hash is currently cached.
    pub fn is_hash_cached(&self) -> bool {
        self.hash.get().is_some()
    }

    /// The block's version field.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Sets the version field.
    pub fn set_version(&mut self, version: i32) {
        self.hash.take();
        self.version = version;
    }

    /// The hash of the previous block.
    pub fn previous_block_hash(&self) -> Hash {
        self.previous_block_hash
    }

    /// Sets the previous block hash.
    pub fn set_previous_block_hash(&mut self, previous_block_hash: Hash) {
        self.hash.take();
        self.previous_block_hash = previous_block_hash;
    }

    /// The root of the transaction merkle tree.
    pub fn merkle_root(&self) -> merkle::Root {
        self.merkle_root
    }

    /// Sets the merkle root.
    pub fn set_merkle_root(&mut self, merkle_root: merkle::Root) {
        self.hash.take();
        self.merkle_root = merkle_root;
    }

    /// The block timestamp, in seconds since the Unix epoch.
    pub fn time(&self) -> u32 {
        self.time
    }

    /// Sets the block timestamp.
    pub fn set_time(&mut self, time: u32) {
        self.hash.take();
        self.time = time;
    }

    /// The target threshold in compact `nBits` format.
    pub fn difficulty_threshold(&self) -> u32 {
        self.difficulty_threshold
    }

    /// Sets the compact target threshold.
    pub fn set_difficulty_threshold(&mut self, difficulty_threshold: u32) {
        self.hash.take();
        self.difficulty_threshold = difficulty_threshold;
    }

    /// The proof of work nonce.
    pub fn nonce(&self) -> u32 {
        self.nonce
    }

    /// Sets the proof of work nonce.
    pub fn set_nonce(&mut self, nonce: u32) {
        self.hash.take();
        self.nonce = nonce;
    }

    /// Returns `true` if the header hash is at or below the target encoded in
    /// `difficulty_threshold`.
    pub fn meets_target(&self) -> bool {
        match expand_compact_target(self.difficulty_threshold) {
            Some(target) => self.hash().bytes_in_display_order() <= target,
            None => false,
        }
    }

    /// Searches nonces from the current one upwards until the header meets
    /// its own target.
    ///
    /// Returns `false` if every nonce was tried. With regtest difficulty a
    /// solution is normally found within a handful of attempts.
    pub fn solve(&mut self) -> bool {
        let start = self.nonce;
        loop {
            if self.meets_target() {
                return true;
            }

            let next = self.nonce.wrapping_add(1);
            if next == start {
                return false;
            }
            self.set_nonce(next);
        }
    }
}

/// Expands a compact `nBits` target into a 256-bit big-endian number.
///
/// Returns `None` for negative or zero targets, and for targets that overflow
/// 256 bits.
pub fn expand_compact_target(bits: u32) -> Option<[u8; 32]> {
    let exponent = (bits >> 24) as i32;
    let mantissa = bits & 0x007f_ffff;
    if bits & 0x0080_0000 != 0 || mantissa == 0 {
        return None;
    }

    let mut target = [0u8; 32];
    // The three mantissa bytes, most significant first, have weights
    // 256^(exponent - 1), 256^(exponent - 2) and 256^(exponent - 3).
    for (i, byte) in mantissa.to_be_bytes()[1..].iter().enumerate() {
        let power = exponent - 1 - i as i32;
        if power < 0 {
            continue;
        }
        if power >= 32 {
            if *byte != 0 {
                return None;
            }
            continue;
        }
        target[31 - power as usize] = *byte;
    }

    Some(target)
}

impl PartialEq for Header {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.previous_block_hash == other.previous_block_hash
            && self.merkle_root == other.merkle_root
            && self.time == other.time
            && self.difficulty_threshold == other.difficulty_threshold
            && self.nonce == other.nonce
    }
}

impl Eq for Header {}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("version", &self.version)
            .field("previous_block_hash", &self.previous_block_hash)
            .field("merkle_root", &self.merkle_root)
            .field("time", &self.time)
            .field("difficulty_threshold", &format_args!("{:#010x}", self.difficulty_threshold))
            .field("nonce", &self.nonce)
            .finish()
    }
}

/// A header with a count of the number of transactions in its block.
///
/// This structure is used in the `headers` message, where the count is
/// always zero.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CountedHeader {
    /// The header for a block
    pub header: Header,

    /// The number of transactions that come after the header
    pub transaction_count: u64,
}

impl From<Header> for CountedHeader {
    fn from(header: Header) -> Self {
        CountedHeader {
            header,
            transaction_count: 0,
        }
    }
}
