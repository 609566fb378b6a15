//! Transactions and transaction-related structures.

use std::fmt;

use once_cell::sync::OnceCell;

use crate::transparent::{self, Script};

mod hash;
mod serialize;

#[cfg(any(test, feature = "proptest-impl"))]
mod arbitrary;


pub use hash::Hash;

/// A Bitcoin SV transaction in the legacy (pre-segwit) format.
///
/// The transaction id is cached after the first call to [`Transaction::hash`].
/// Every method that hands out mutable access clears the cache first, so a
/// stale id can never be observed.
#[derive(Clone)]
pub struct Transaction {
    version: i32,
    inputs: Vec<transparent::Input>,
    outputs: Vec<transparent::Output>,
    lock_time: u32,
    hash: OnceCell<Hash>,
}

impl Transaction {
    /// Returns a new transaction with the supplied fields.
    pub fn new(
        version: i32,
        inputs: Vec<transparent::Input>,
        outputs: Vec<transparent::Output>,
        lock_time: u32,
    ) -> Transaction {
        Transaction {
            version,
            inputs,
            outputs,
            lock_time,
            hash: OnceCell::new(),
        }
    }

    /// Returns a coinbase transaction for a block at `height`, paying `value`
    /// satoshis to `lock_script`.
    ///
    /// The coinbase script starts with the BIP 34 height push, so coinbases at
    /// different heights always have different ids.
    pub fn coinbase(height: u32, value: i64, lock_script: Script) -> Transaction {
        Transaction::new(
            1,
            vec![transparent::Input::coinbase(Script::height_push(height))],
            vec![transparent::Output { value, lock_script }],
            0,
        )
    }

    /// Returns the transaction id, computing and caching it if needed.
    pub fn hash(&self) -> Hash {
        *self.hash.get_or_init(|| Hash::from(self))
    }

    /// Recomputes the transaction id, discarding any cached value.
    pub fn rehash(&mut self) -> Hash {
        self.hash = OnceCell::new();
        self.hash()
    }

    /// Returns `true` if the id is currently cached.
    pub fn is_hash_cached(&self) -> bool {
        self.hash.get().is_some()
    }

    /// The transaction version.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Sets the transaction version.
    pub fn set_version(&mut self, version: i32) {
        self.invalidate();
        self.version = version;
    }

    /// The transaction inputs.
    pub fn inputs(&self) -> &[transparent::Input] {
        &self.inputs
    }

    /// Mutable access to the transaction inputs.
    pub fn inputs_mut(&mut self) -> &mut Vec<transparent::Input> {
        self.invalidate();
        &mut self.inputs
    }

    /// The transaction outputs.
    pub fn outputs(&self) -> &[transparent::Output] {
        &self.outputs
    }

    /// Mutable access to the transaction outputs.
    pub fn outputs_mut(&mut self) -> &mut Vec<transparent::Output> {
        self.invalidate();
        &mut self.outputs
    }

    /// The transaction lock time.
    pub fn lock_time(&self) -> u32 {
        self.lock_time
    }

    /// Sets the transaction lock time.
    pub fn set_lock_time(&mut self, lock_time: u32) {
        self.invalidate();
        self.lock_time = lock_time;
    }

    /// Returns `true` if this transaction is a coinbase.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    fn invalidate(&mut self) {
        if self.hash.take().is_some() {
            trace!("cleared cached transaction id");
        }
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.inputs == other.inputs
            && self.outputs == other.outputs
            && self.lock_time == other.lock_time
    }
}

impl Eq for Transaction {}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("version", &self.version)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("lock_time", &self.lock_time)
            .finish()
    }
}
