//! Arbitrary merkle proofs for codec round-trip tests.
//!
//! These proofs are structurally valid but generally do not verify.

use std::sync::Arc;

use proptest::{arbitrary::any, collection::vec, prelude::*};

use crate::{
    block::{self, merkle, Header},
    transaction::{self, Transaction},
};

use super::{DsMerkleProof, Node, TscMerkleProof, TscTarget, TxOrId};

impl Arbitrary for Node {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        prop_oneof![
            any::<[u8; 32]>().prop_map(Node::Hash),
            Just(Node::Duplicate),
        ]
        .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

impl Arbitrary for TxOrId {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        prop_oneof![
            any::<Transaction>().prop_map(|tx| TxOrId::Transaction(Arc::new(tx))),
            any::<transaction::Hash>().prop_map(TxOrId::Id),
        ]
        .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

impl Arbitrary for TscTarget {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        prop_oneof![
            any::<block::Hash>().prop_map(TscTarget::BlockHash),
            any::<Header>().prop_map(TscTarget::Header),
            any::<merkle::Root>().prop_map(TscTarget::MerkleRoot),
        ]
        .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

impl Arbitrary for TscMerkleProof {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        (
            any::<u64>(),
            any::<TxOrId>(),
            any::<TscTarget>(),
            vec(any::<Node>(), 0..12),
        )
            .prop_map(|(index, tx, target, nodes)| TscMerkleProof {
                index,
                tx,
                target,
                nodes,
            })
            .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

impl Arbitrary for DsMerkleProof {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        (
            any::<u64>(),
            any::<Transaction>(),
            any::<merkle::Root>(),
            vec(any::<Node>(), 0..12),
        )
            .prop_map(|(index, tx, merkle_root, nodes)| DsMerkleProof {
                index,
                tx: Arc::new(tx),
                merkle_root,
                nodes,
            })
            .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}
