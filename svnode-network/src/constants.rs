//! Definitions of constants.

use std::time::Duration;

use crate::protocol::external::types::*;

/// The User-Agent string sent in our `version` messages.
pub const USER_AGENT: &str = "/svnode-test:0.1.0/";

/// The protocol version spoken by this crate.
pub const CURRENT_NETWORK_PROTOCOL_VERSION: Version = Version(70_016);

/// The first protocol version that understands `extmsg` framing.
pub const EXTENDED_MESSAGE_VERSION: Version = Version(70_016);

/// The length of a legacy message header: magic, command, length, checksum.
pub const HEADER_LEN: usize = 4 + 12 + 4 + 4;

/// The length of an `extmsg` header: a legacy header followed by the real
/// command and a 64-bit payload length.
pub const EXTENDED_HEADER_LEN: usize = HEADER_LEN + 12 + 8;

/// The legacy length field value that marks an `extmsg` frame.
pub const EXTENDED_LENGTH_MARKER: u32 = 0xffff_ffff;

/// Payloads this long or longer don't fit in the legacy header.
pub const DEFAULT_EXTENDED_MESSAGE_THRESHOLD: u64 = EXTENDED_LENGTH_MARKER as u64;

/// The `max_recv_payload_length` advertised in `protoconf` by default.
pub const DEFAULT_MAX_RECV_PAYLOAD_LENGTH: u32 = 2 * 1024 * 1024;

/// The `max_recv_payload_length` assumed when a `protoconf` omits it.
pub const LEGACY_MAX_RECV_PAYLOAD_LENGTH: u32 = 1024 * 1024;

/// The stream policies advertised in `protoconf` by default, most preferred first.
pub const DEFAULT_STREAM_POLICIES: &str = "BlockPriority,Default";

/// The stream policy assumed when a `protoconf` omits its policy list.
pub const LEGACY_STREAM_POLICIES: &str = "Default";

/// The number of fields in the `protoconf` messages we send.
pub const PROTOCONF_FIELD_COUNT: u64 = 2;

/// The most addresses a peer may send in one `addr` message.
pub const MAX_ADDRS_IN_MESSAGE: usize = 1000;

/// The maximum length of a bloom filter in `filterload`.
pub const MAX_FILTERLOAD_LENGTH: usize = 36_000;

/// The maximum length of the data element in `filteradd`.
pub const MAX_FILTERADD_LENGTH: usize = 520;

/// The size of the scratch buffer each connection reads into.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

// A single read must be able to complete any header.
static_assertions::const_assert!(READ_CHUNK_SIZE >= EXTENDED_HEADER_LEN);

/// How long the reactor waits for a TCP connection by default.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a listener waits before accepting again after an accept error.
///
/// Errors like running out of file descriptors persist, and retrying at once
/// would spin the reactor thread.
pub const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

/// How long test threads wait for a condition by default.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// How often [`crate::PeerConnection::sync_with_ping`] re-checks the node's
/// activity counter by default.
pub const DEFAULT_SYNC_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Magic numbers used to identify different Bitcoin SV networks.
pub mod magics {
    use super::*;
    /// The production mainnet.
    pub const MAINNET: Magic = Magic([0xe3, 0xe1, 0xf3, 0xe8]);
    /// The public testnet.
    pub const TESTNET: Magic = Magic([0xf4, 0xe5, 0xf3, 0xf4]);
    /// Local regression test networks.
    pub const REGTEST: Magic = Magic([0xda, 0xb5, 0xbf, 0xfa]);
    /// The scaling test network.
    pub const STN: Magic = Magic([0xfb, 0xce, 0xc4, 0xf9]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_header_extends_legacy_header() {
        svnode_test::init();

        assert_eq!(HEADER_LEN, 24);
        assert_eq!(EXTENDED_HEADER_LEN, 44);
        assert!(EXTENDED_MESSAGE_VERSION <= CURRENT_NETWORK_PROTOCOL_VERSION);
    }
}
