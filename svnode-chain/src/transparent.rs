//! Transparent transaction inputs and outputs.

mod script;
pub(crate) mod serialize;

pub use script::Script;

use crate::transaction;

#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;

/// The sequence number that disables relative lock-time and replacement.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// The output index used by coinbase inputs.
pub const COINBASE_OUTPUT_INDEX: u32 = 0xffff_ffff;

/// A particular transaction output reference.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct OutPoint {
    /// References the transaction that contains the UTXO being spent.
    pub hash: transaction::Hash,

    /// Identifies which UTXO from that transaction is referenced; the
    /// first output is 0, etc.
    pub index: u32,
}

impl OutPoint {
    /// The null outpoint spent by coinbase inputs.
    pub fn null() -> OutPoint {
        OutPoint {
            hash: transaction::Hash([0; 32]),
            index: COINBASE_OUTPUT_INDEX,
        }
    }

    /// Returns `true` if this is the null outpoint.
    pub fn is_null(&self) -> bool {
        *self == OutPoint::null()
    }
}

/// A transparent input to a transaction.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Input {
    /// The previous output transaction reference.
    pub outpoint: OutPoint,
    /// The script that authorizes spending `outpoint`.
    pub unlock_script: Script,
    /// The sequence number for the output.
    pub sequence: u32,
}

impl Input {
    /// Returns a coinbase input with `data` as its script.
    pub fn coinbase(data: Script) -> Input {
        Input {
            outpoint: OutPoint::null(),
            unlock_script: data,
            sequence: SEQUENCE_FINAL,
        }
    }

    /// Returns `true` if this input spends the null outpoint.
    pub fn is_coinbase(&self) -> bool {
        self.outpoint.is_null()
    }
}

/// A transparent output from a transaction.
///
/// The most fundamental building block of a transaction is a transaction
/// output: an indivisible chunk of value locked by a script.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Output {
    /// Transaction value, in satoshis.
    pub value: i64,

    /// The lock script defines the conditions under which this output can be spent.
    pub lock_script: Script,
}
