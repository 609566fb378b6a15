//! Arbitrary data generation for transaction proptests

use proptest::{arbitrary::any, collection::vec, prelude::*};

use crate::transparent;

use super::Transaction;

impl Arbitrary for Transaction {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        (
            any::<i32>(),
            vec(any::<transparent::Input>(), 0..5),
            vec(any::<transparent::Output>(), 0..5),
            any::<u32>(),
        )
            .prop_map(|(version, inputs, outputs, lock_time)| {
                Transaction::new(version, inputs, outputs, lock_time)
            })
            .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}
