use proptest::prelude::*;

use crate::{
    merkle_proof::{DsMerkleProof, MerkleProof, Node, TscMerkleProof},
    serialization::{SvDeserializeInto, SvSerialize},
};

use super::block_with_transactions;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every transaction in every block size has a proof that reproduces the root.
    #[test]
    fn proofs_verify_for_every_index(n in 1u32..40) {
        svnode_test::init();

        let block = block_with_transactions(n);
        let root = block.header.merkle_root();

        for i in 0..n as usize {
            let proof = MerkleProof::for_block(&block, i).expect("index is in range");
            prop_assert_eq!(proof.target, root);
            prop_assert!(proof.verify(block.transactions[i].hash()), "index {} of {}", i, n);

            let tsc = TscMerkleProof::for_block(&block, i).expect("index is in range");
            prop_assert!(tsc.verify());
            prop_assert!(tsc.verify_with_header(&block.header));

            let ds = DsMerkleProof::for_block(&block, i).expect("index is in range");
            prop_assert!(ds.verify());
        }

        prop_assert!(MerkleProof::for_block(&block, n as usize).is_none());
    }

    /// Changing any sibling hash, or any index bit, breaks the proof.
    #[test]
    fn tampered_proofs_do_not_verify(n in 2u32..24, pick in any::<prop::sample::Index>()) {
        svnode_test::init();

        let block = block_with_transactions(n);
        let i = pick.index(n as usize);
        let tx_hash = block.transactions[i].hash();
        let proof = MerkleProof::for_block(&block, i).expect("index is in range");

        for (level, node) in proof.nodes.iter().enumerate() {
            if let Node::Hash(hash) = node {
                let mut tampered = proof.clone();
                let mut changed = *hash;
                changed[level % 32] ^= 0x01;
                tampered.nodes[level] = Node::Hash(changed);
                prop_assert!(!tampered.verify(tx_hash), "sibling {} of index {}", level, i);
            }
        }

        // One extra bit catches leftover index bits past the last node.
        for bit in 0..=proof.nodes.len() {
            let mut tampered = proof.clone();
            tampered.index ^= 1 << bit;
            prop_assert!(!tampered.verify(tx_hash), "bit {} of index {}", bit, i);
        }

        let other_tx_hash = block.transactions[(i + 1) % n as usize].hash();
        prop_assert!(!proof.verify(other_tx_hash));
    }

    #[test]
    fn tsc_proof_roundtrip(proof in any::<TscMerkleProof>()) {
        svnode_test::init();

        let bytes = proof.sv_serialize_to_vec()?;
        prop_assert_eq!(bytes[0], proof.flags());

        let other: TscMerkleProof = bytes.as_slice().sv_deserialize_into()?;
        prop_assert_eq!(&proof, &other);
        prop_assert_eq!(bytes, other.sv_serialize_to_vec()?);
    }

    #[test]
    fn ds_proof_roundtrip(proof in any::<DsMerkleProof>()) {
        svnode_test::init();

        let bytes = proof.sv_serialize_to_vec()?;
        prop_assert_eq!(bytes[0], DsMerkleProof::FLAGS);

        let other: DsMerkleProof = bytes.as_slice().sv_deserialize_into()?;
        prop_assert_eq!(proof, other);
    }
}
