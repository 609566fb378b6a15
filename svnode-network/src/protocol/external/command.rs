//! Message command names.

use std::fmt;

/// Declares [`Command`] with the wire name of each variant.
macro_rules! commands {
    ($($(#[$doc:meta])* $variant:ident => $name:literal,)+) => {
        /// The command name that identifies a message in its frame header.
        ///
        /// Every [`Message`](super::Message) variant has exactly one command.
        /// Command names are ASCII, zero-padded to 12 bytes on the wire.
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
        pub enum Command {
            $($(#[$doc])* $variant,)+
        }

        impl Command {
            /// Every command, in declaration order.
            pub const ALL: &'static [Command] = &[$(Command::$variant,)+];

            /// Returns the command name, without padding.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Command::$variant => $name,)+
                }
            }
        }
    };
}

commands! {
    /// `version`
    Version => "version",
    /// `verack`
    Verack => "verack",
    /// `ping`
    Ping => "ping",
    /// `pong`
    Pong => "pong",
    /// `reject`
    Reject => "reject",
    /// `getaddr`
    GetAddr => "getaddr",
    /// `addr`
    Addr => "addr",
    /// `alert`
    Alert => "alert",
    /// `inv`
    Inv => "inv",
    /// `getdata`
    GetData => "getdata",
    /// `notfound`
    NotFound => "notfound",
    /// `getblocks`
    GetBlocks => "getblocks",
    /// `getheaders`
    GetHeaders => "getheaders",
    /// `headers`
    Headers => "headers",
    /// `block`
    Block => "block",
    /// `tx`
    Tx => "tx",
    /// `mempool`
    Mempool => "mempool",
    /// `sendheaders`
    SendHeaders => "sendheaders",
    /// `feefilter`
    FeeFilter => "feefilter",
    /// `sendcmpct`
    SendCmpct => "sendcmpct",
    /// `cmpctblock`
    CmpctBlock => "cmpctblock",
    /// `getblocktxn`
    GetBlockTxn => "getblocktxn",
    /// `blocktxn`
    BlockTxn => "blocktxn",
    /// `merkleblock`
    MerkleBlock => "merkleblock",
    /// `filterload`
    FilterLoad => "filterload",
    /// `filteradd`
    FilterAdd => "filteradd",
    /// `filterclear`
    FilterClear => "filterclear",
    /// `protoconf`
    Protoconf => "protoconf",
    /// `createstrm`
    CreateStream => "createstrm",
    /// `streamack`
    StreamAck => "streamack",
    /// `dsdetected`
    DsDetected => "dsdetected",
    /// `datareftx`
    DataRefTx => "datareftx",
    /// `authch`
    AuthCh => "authch",
    /// `authresp`
    AuthResp => "authresp",
}

/// The command of the sentinel header in front of `extmsg` frames.
pub(crate) const EXTMSG_COMMAND: [u8; 12] = *b"extmsg\0\0\0\0\0\0";

impl Command {
    /// Returns the zero-padded 12-byte wire form of this command.
    pub fn to_bytes(&self) -> [u8; 12] {
        let mut bytes = [0; 12];
        let name = self.as_str().as_bytes();
        bytes[..name.len()].copy_from_slice(name);
        bytes
    }

    /// Looks up the command with the given wire form.
    ///
    /// Returns `None` for unknown names and for names with non-zero bytes
    /// after the padding starts.
    pub fn from_bytes(bytes: &[u8; 12]) -> Option<Command> {
        let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        if bytes[len..].iter().any(|&b| b != 0) {
            return None;
        }

        let name = std::str::from_utf8(&bytes[..len]).ok()?;
        Command::ALL
            .iter()
            .copied()
            .find(|command| command.as_str() == name)
    }

    /// Returns an escaped, printable form of an unrecognized wire command.
    pub(crate) fn escape_bytes(bytes: &[u8; 12]) -> String {
        let escaped: Vec<u8> = bytes
            .iter()
            .copied()
            .take_while(|&b| b != 0)
            .flat_map(std::ascii::escape_default)
            .collect();
        String::from_utf8_lossy(&escaped).into_owned()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_names_fit_the_header() {
        svnode_test::init();

        for command in Command::ALL {
            assert!(command.as_str().len() <= 12, "{command} is too long");
            assert!(command.as_str().is_ascii());
            assert_eq!(Command::from_bytes(&command.to_bytes()), Some(*command));
        }
    }

    #[test]
    fn unknown_and_garbled_commands_are_not_found() {
        svnode_test::init();

        assert_eq!(Command::from_bytes(b"bogus\0\0\0\0\0\0\0"), None);
        assert_eq!(Command::from_bytes(&EXTMSG_COMMAND), None);
        // "ping" followed by a non-zero byte inside the padding
        assert_eq!(Command::from_bytes(b"ping\0\0x\0\0\0\0\0"), None);
        assert_eq!(Command::escape_bytes(b"bo\x01us\0\0\0\0\0\0\0"), "bo\\x01us");
    }
}
