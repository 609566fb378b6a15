//! Block test vectors

#![allow(missing_docs)]

use hex::FromHex;
use lazy_static::lazy_static;

lazy_static! {
    /// The 80-byte header of the Bitcoin genesis block.
    pub static ref GENESIS_HEADER_BYTES: Vec<u8> = <Vec<u8>>::from_hex(
        "01000000000000000000000000000000000000000000000000000000000000000000000\
         03ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f\
         49ffff001d1dac2b7c"
    )
    .expect("genesis header hex is valid");

    /// The coinbase transaction of the Bitcoin genesis block.
    pub static ref GENESIS_COINBASE_BYTES: Vec<u8> = <Vec<u8>>::from_hex(
        "01000000010000000000000000000000000000000000000000000000000000000000000000\
         ffffffff4d04ffff001d0104455468652054696d65732030332f4a616e2f32303039204368\
         616e63656c6c6f72206f6e206272696e6b206f66207365636f6e64206261696c6f757420\
         666f722062616e6b73ffffffff0100f2052a01000000434104678afdb0fe554827196\
         7f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec1\
         12de5c384df7ba0b8d578a4c702b6bf11d5fac00000000"
    )
    .expect("genesis coinbase hex is valid");

    /// The whole Bitcoin genesis block: header, transaction count, coinbase.
    pub static ref GENESIS_BLOCK_BYTES: Vec<u8> = {
        let mut bytes = GENESIS_HEADER_BYTES.clone();
        bytes.push(1);
        bytes.extend_from_slice(&GENESIS_COINBASE_BYTES);
        bytes
    };
}

/// The genesis block hash, in display order.
pub const GENESIS_BLOCK_HASH: &str =
    "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f";

/// The genesis merkle root, which is also the coinbase transaction id, in display order.
pub const GENESIS_MERKLE_ROOT: &str =
    "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";
