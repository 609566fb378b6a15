use std::sync::Arc;

use svnode_test::vectors::{
    GENESIS_BLOCK_BYTES, GENESIS_BLOCK_HASH, GENESIS_HEADER_BYTES, GENESIS_MERKLE_ROOT,
};

use crate::{
    block::{expand_compact_target, Block, Hash, Header, REGTEST_DIFFICULTY_BITS},
    serialization::{SvDeserializeInto, SvSerialize},
    transaction::Transaction,
    transparent::Script,
};

#[test]
fn genesis_header_hash() {
    svnode_test::init();

    let header: Header = GENESIS_HEADER_BYTES
        .as_slice()
        .sv_deserialize_into()
        .expect("genesis header should deserialize");

    assert_eq!(header.hash().to_string(), GENESIS_BLOCK_HASH);
    assert_eq!(header.merkle_root().to_string(), GENESIS_MERKLE_ROOT);
    assert_eq!(header.previous_block_hash(), Hash([0; 32]));
    assert_eq!(header.time(), 1_231_006_505);
    assert_eq!(header.difficulty_threshold(), 0x1d00_ffff);
    assert!(header.meets_target());
}

#[test]
fn genesis_block_round_trip() {
    svnode_test::init();

    let block: Block = GENESIS_BLOCK_BYTES
        .as_slice()
        .sv_deserialize_into()
        .expect("genesis block should deserialize");

    assert_eq!(block.transactions.len(), 1);
    assert!(block.has_valid_merkle_root());
    assert_eq!(block.hash().to_string(), GENESIS_BLOCK_HASH);
    assert_eq!(
        block.sv_serialize_to_vec().unwrap(),
        GENESIS_BLOCK_BYTES.as_slice()
    );
}

#[test]
fn compact_targets() {
    svnode_test::init();

    let regtest = expand_compact_target(REGTEST_DIFFICULTY_BITS).unwrap();
    assert_eq!(&regtest[..3], &[0x7f, 0xff, 0xff]);
    assert!(regtest[3..].iter().all(|byte| *byte == 0));

    let genesis = expand_compact_target(0x1d00_ffff).unwrap();
    assert_eq!(&genesis[..6], &[0, 0, 0, 0, 0xff, 0xff]);

    // small exponents shift mantissa bytes out
    let tiny = expand_compact_target(0x0112_3456).unwrap();
    assert_eq!(tiny[31], 0x12);
    assert!(tiny[..31].iter().all(|byte| *byte == 0));

    assert_eq!(expand_compact_target(0x0180_0000), None, "negative");
    assert_eq!(expand_compact_target(0x2100_0000), None, "zero mantissa");
    assert_eq!(expand_compact_target(0x2301_0000), None, "overflow");
}

#[test]
fn new_blocks_commit_to_their_transactions_and_solve() {
    svnode_test::init();

    let genesis_header: Header = GENESIS_HEADER_BYTES.as_slice().sv_deserialize_into().unwrap();
    let genesis = Hash::from(&genesis_header);
    let coinbase = Arc::new(Transaction::coinbase(1, 50, Script::op_true()));
    let mut block = Block::new(genesis, 1_600_000_000, vec![coinbase.clone()]);

    assert!(block.has_valid_merkle_root());
    assert_eq!(block.header.merkle_root().0, coinbase.hash().0);

    assert!(block.header.solve());
    assert!(block.header.meets_target());

    let solved_hash = block.hash();
    block
        .transactions
        .push(Arc::new(Transaction::coinbase(2, 50, Script::op_true())));
    assert!(!block.has_valid_merkle_root());
    assert_eq!(block.hash(), solved_hash, "the hash only covers the header");

    block.update_merkle_root();
    assert!(block.has_valid_merkle_root());
    assert_ne!(block.hash(), solved_hash);
}
