//! Network and block test vectors

mod block;

pub use block::*;
