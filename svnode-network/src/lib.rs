//! Bitcoin SV peer-to-peer protocol engine for scripted node tests.
//!
//! This crate speaks the node's native wire protocol as a "fake peer". It
//! frames and parses every message the node understands, drives any number
//! of TCP connections from one reactor thread, and lets test threads wait
//! synchronously on what each connection has received.
//!
//! ## Network model
//!
//! [`Reactor::start`] spawns a dedicated thread that owns every socket. Test
//! code never touches sockets: it gets a [`PeerConnection`] handle for each
//! connection, sends messages through it, and blocks on
//! [`PeerConnection::wait_until`] for the reactor to record matching state.
//!
//! Each connection dispatches decoded messages to a [`PeerHandler`]. The
//! default handler methods implement the protocol mechanics a node expects
//! from a peer: the `version` / `verack` / `protoconf` handshake, `pong`
//! replies and `getdata` requests for announced inventory.
//!
//! ## Associations
//!
//! Bitcoin SV lets one logical peer spread its traffic over up to five TCP
//! connections, grouped by an association id. [`Association`] performs the
//! initiator side of that setup and routes outgoing messages by a
//! [`StreamPolicy`]. [`StreamResponder`] plays the node's side, so the whole
//! exchange can run over loopback.
//!
//! ## Rate limiting
//!
//! Both directions of a connection can be throttled by a [`RateLimiter`],
//! configured through [`Config`].
#![doc(html_root_url = "https://docs.rs/svnode-network")]
// Standard lints
#![warn(missing_docs)]
#![allow(clippy::try_err)]
#![deny(clippy::await_holding_lock)]
#![forbid(unsafe_code)]

#[macro_use]
extern crate serde;
#[macro_use]
extern crate tracing;
#[macro_use]
extern crate bitflags;

/// A boxed error from a collaborator outside this crate, such as the RPC
/// client behind an [`ActivityProbe`].
///
/// Note: the 'static lifetime bound means that the *type* cannot have any
/// non-'static lifetimes, (e.g., when a type contains a borrow and is
/// parameterized by 'a), *not* that the object itself has 'static lifetime.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

mod association;
mod config;
pub mod constants;
mod parameters;
mod peer;
mod protocol;
mod rate_limit;
mod reactor;

pub use crate::{
    association::{
        policy_by_name, Association, AssociationError, AssociationRegistry, BlockPriorityPolicy,
        DefaultPolicy, StreamPolicy, StreamResponder, StreamSetupError, StreamState,
    },
    config::{Config, RateLimitConfig},
    parameters::Network,
    peer::{
        ActivityProbe, Arrival, CloseReason, ConnectionId, DefaultHandler, Direction,
        PeerConnection, PeerContext, PeerError, PeerHandler, PeerInfo, PeerObserver, PeerState,
        SilentHandler,
    },
    protocol::external::{
        codec::{Codec, CodecError},
        types::*,
        AddrInVersion, AssociationId, AssociationIdField, BlockDetails, BlockLocator,
        BlockTransactions, BlockTransactionsRequest, Command, CreateStream, DataRefTx, DsDetected,
        FilterLoad, HeaderAndShortIds, InventoryHash, MerkleBlock, Message, PrefilledTransaction,
        Protoconf, Reject, RejectReason, SendCmpct, ShortId, StreamAck, StreamType,
        TimestampedAddr, VersionMessage,
    },
    rate_limit::RateLimiter,
    reactor::{ConnectOptions, HandlerFactory, Listener, Opening, Reactor, ReactorError},
};
