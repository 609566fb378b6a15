/// Node address wire formats.
mod addr;
/// Association ids and stream types.
mod association;
/// A Tokio codec that transforms an `AsyncRead` into a `Stream` of `Message`s.
pub mod codec;
/// The 12-byte command names that identify messages.
mod command;
/// BIP 152 compact block payloads.
mod compact;
/// Inventory items.
mod inv;
/// An enum of all supported Bitcoin SV message types.
mod message;
/// Newtype wrappers for primitive types.
pub mod types;

#[cfg(any(test, feature = "proptest-impl"))]
pub mod arbitrary;

pub use addr::{AddrInVersion, TimestampedAddr};
pub use association::{AssociationId, AssociationIdField, StreamType};
pub use command::Command;
pub use compact::{
    BlockTransactions, BlockTransactionsRequest, HeaderAndShortIds, PrefilledTransaction, ShortId,
};
pub use inv::InventoryHash;
pub use message::{
    BlockDetails, BlockLocator, CreateStream, DataRefTx, DsDetected, FilterLoad, MerkleBlock,
    Message, Protoconf, Reject, RejectReason, SendCmpct, StreamAck, VersionMessage,
};
