#![allow(clippy::unit_arg)]

use std::fmt;

#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;

/// A magic number identifying the network.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Magic(pub [u8; 4]);

impl fmt::Debug for Magic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Magic").field(&hex::encode(self.0)).finish()
    }
}

/// A protocol version number.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
#[serde(transparent)]
pub struct Version(pub u32);

impl Version {
    /// Returns the version both sides of a connection speak: the lower of
    /// the two.
    pub fn negotiate(local: Version, remote: Version) -> Version {
        std::cmp::min(local, remote)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    /// A bitflag describing services advertised by a node in the network.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct PeerServices: u64 {
        /// NODE_NETWORK means that the node is a full node capable of serving
        /// blocks, as opposed to a light client that makes network requests but
        /// does not provide network services.
        const NODE_NETWORK = 1;
        /// The node answers `getutxos` requests.
        const NODE_GETUTXO = 1 << 1;
        /// The node handles bloom-filtered connections.
        const NODE_BLOOM = 1 << 2;
        /// The node follows the Bitcoin Cash / SV replay-protected chain.
        const NODE_BITCOIN_CASH = 1 << 5;
    }
}

/// A nonce used in the networking layer to identify messages.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Nonce(pub u64);

impl Default for Nonce {
    fn default() -> Self {
        use rand::{thread_rng, Rng};
        Self(thread_rng().gen())
    }
}

/// A random value to add to the seed value in a hash function.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Tweak(pub u32);

impl Default for Tweak {
    fn default() -> Self {
        use rand::{thread_rng, Rng};
        Self(thread_rng().gen())
    }
}

/// A Bloom filter consisting of a bit field of arbitrary byte-aligned
/// size, maximum size is 36,000 bytes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Filter(pub Vec<u8>);

#[cfg(test)]
mod proptest {

    use proptest::prelude::*;

    use super::{Magic, Version};

    use crate::constants::magics;

    #[test]
    fn magic_debug() {
        svnode_test::init();

        assert_eq!(format!("{:?}", magics::MAINNET), "Magic(\"e3e1f3e8\")");
        assert_eq!(format!("{:?}", magics::STN), "Magic(\"fbcec4f9\")");
    }

    proptest! {

        #[test]
        fn proptest_magic_from_array(data in any::<[u8; 4]>()) {
            assert_eq!(format!("{:?}", Magic(data)), format!("Magic({:x?})", hex::encode(data)));
        }

        #[test]
        fn negotiated_version_is_the_lower_one(local in any::<u32>(), remote in any::<u32>()) {
            let negotiated = Version::negotiate(Version(local), Version(remote));

            prop_assert_eq!(negotiated.0, local.min(remote));
            prop_assert_eq!(negotiated, Version::negotiate(Version(remote), Version(local)));
        }
    }
}
