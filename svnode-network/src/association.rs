//! Associations: one logical peer spread over several TCP streams.
//!
//! An initiator opens the `GENERAL` stream with a `version` carrying an empty
//! association id. The node mints an id and returns it in its own `version`.
//! The initiator then opens one more connection per additional stream, each
//! starting with a `createstrm` that names the id, the stream type and a
//! stream policy. The node answers each with `streamack`, or with a `reject`
//! followed by closing that connection.
//!
//! [`Association`] is the initiator side. [`StreamResponder`] plays the
//! node's side, sharing an [`AssociationRegistry`] between the connections it
//! accepts.

mod error;
mod initiator;
mod policy;
mod responder;

#[cfg(test)]
mod tests;

pub use error::{AssociationError, StreamSetupError};
pub use initiator::{Association, StreamState};
pub use policy::{policy_by_name, BlockPriorityPolicy, DefaultPolicy, StreamPolicy};
pub use responder::{AssociationRegistry, StreamResponder};
