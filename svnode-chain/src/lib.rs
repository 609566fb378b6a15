//! Wire-level data types for the svnode P2P test harness.
//!
//! This crate holds everything that can be expressed without sockets: the
//! primitive codec shared by every protocol message, double-SHA-256 hashing,
//! transactions, block headers and blocks, and the merkle proof formats
//! carried by `datareftx` and `dsdetected` messages.
#![doc(html_root_url = "https://docs.rs/svnode-chain")]
// Standard lints
#![warn(missing_docs)]
#![allow(clippy::try_err)]
#![deny(clippy::await_holding_lock)]
#![forbid(unsafe_code)]

#[macro_use]
extern crate tracing;

pub mod block;
pub mod merkle_proof;
pub mod serialization;
pub mod transaction;
pub mod transparent;
