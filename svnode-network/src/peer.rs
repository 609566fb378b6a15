//! Peer connection handling.
//!
//! Each TCP connection is owned by a task on the reactor thread. The task
//! frames and unframes messages, dispatches them to a [`PeerHandler`], and
//! records what it saw in a [`PeerObserver`] that test threads wait on.

mod connection;
mod error;
mod handler;
mod observer;

#[cfg(test)]
mod tests;

pub use connection::{ConnectionId, Direction, PeerConnection, PeerInfo};
pub use error::{CloseReason, PeerError};
pub use handler::{DefaultHandler, PeerContext, PeerHandler, SilentHandler};
pub use observer::{ActivityProbe, Arrival, PeerObserver, PeerState};

pub(crate) use connection::{Connection, Endpoint};
