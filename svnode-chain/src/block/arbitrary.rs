//! Randomised property testing for [`Block`]s.

use std::sync::Arc;

use proptest::{arbitrary::any, collection::vec, prelude::*};

use crate::transaction::Transaction;

use super::{merkle, Block, CountedHeader, Hash, Header};

impl Arbitrary for Header {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        (
            any::<i32>(),
            any::<Hash>(),
            any::<merkle::Root>(),
            any::<u32>(),
            any::<u32>(),
            any::<u32>(),
        )
            .prop_map(
                |(version, previous_block_hash, merkle_root, time, bits, nonce)| {
                    Header::new(version, previous_block_hash, merkle_root, time, bits, nonce)
                },
            )
            .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

impl Arbitrary for CountedHeader {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        (any::<Header>(), any::<u64>())
            .prop_map(|(header, transaction_count)| CountedHeader {
                header,
                transaction_count,
            })
            .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

impl Arbitrary for Block {
    type Parameters = ();

    /// Generates blocks with a merkle root that matches their transactions.
    fn arbitrary_with(_args: ()) -> Self::Strategy {
        (any::<Header>(), vec(any::<Transaction>(), 1..8))
            .prop_map(|(header, transactions)| {
                let mut block = Block {
                    header,
                    transactions: transactions.into_iter().map(Arc::new).collect(),
                };
                block.update_merkle_root();
                block
            })
            .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}
