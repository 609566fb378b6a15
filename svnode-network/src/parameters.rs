//! Network parameters.

use std::fmt;

use crate::{constants::magics, protocol::external::types::Magic};

/// An enum describing the possible network choices.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Network {
    /// The production mainnet.
    Mainnet,

    /// The public testnet.
    Testnet,

    /// A local regression test network, the usual target of node tests.
    #[default]
    Regtest,

    /// The scaling test network.
    Stn,
}

impl Network {
    /// Get the magic bytes that start every message on this network.
    pub fn magic(&self) -> Magic {
        match self {
            Network::Mainnet => magics::MAINNET,
            Network::Testnet => magics::TESTNET,
            Network::Regtest => magics::REGTEST,
            Network::Stn => magics::STN,
        }
    }

    /// Get the default P2P port for this network.
    pub fn default_port(&self) -> u16 {
        match self {
            Network::Mainnet => 8333,
            Network::Testnet => 18333,
            Network::Regtest => 18444,
            Network::Stn => 9333,
        }
    }
}

impl From<Network> for Magic {
    fn from(network: Network) -> Self {
        network.magic()
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => f.write_str("mainnet"),
            Network::Testnet => f.write_str("testnet"),
            Network::Regtest => f.write_str("regtest"),
            Network::Stn => f.write_str("stn"),
        }
    }
}
