//! Definitions of network messages.

use std::{fmt, io, sync::Arc};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};

use svnode_chain::{
    block::{self, Block, CountedHeader, Header},
    merkle_proof::{DsMerkleProof, TscMerkleProof},
    serialization::{
        SerializationError, SvDeserialize, SvDeserializeInto, SvSerialize, TrustedPreallocate,
        MAX_PROTOCOL_MESSAGE_LEN,
    },
    transaction::{self, Transaction},
};

use crate::constants;

use super::{
    addr::{AddrInVersion, TimestampedAddr},
    association::{AssociationId, AssociationIdField},
    command::Command,
    compact::{BlockTransactions, BlockTransactionsRequest, HeaderAndShortIds},
    inv::InventoryHash,
    types::*,
};

/// A Bitcoin SV network message.
///
/// A list of Bitcoin network messages can be found [on the Bitcoin
/// wiki][btc_wiki_protocol]; the Bitcoin SV extensions (`protoconf`,
/// association streams, double-spend notifications, `datareftx`, `authch`)
/// are described in the node's release notes.
///
/// That page describes the wire format of the messages, while this enum stores
/// an internal representation. The internal representation is unlinked from the
/// wire format, and the translation between the two happens only during
/// serialization and deserialization. For instance, Bitcoin identifies messages
/// by a 12-byte ascii command string; we consider this a serialization detail
/// and use the enum discriminant instead (see [`Message::command`]).
///
/// [btc_wiki_protocol]: https://en.bitcoin.it/wiki/Protocol_documentation
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Message {
    /// A `version` message.
    ///
    /// Note that although this is called `version` in Bitcoin, its role is really
    /// analogous to a `ClientHello` message in TLS, used to begin a handshake, and
    /// is distinct from a simple version number.
    ///
    /// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#version)
    Version(VersionMessage),

    /// A `verack` message.
    ///
    /// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#verack)
    Verack,

    /// A `ping` message.
    ///
    /// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#ping)
    Ping(
        /// A nonce unique to this [`Ping`] message.
        Nonce,
    ),

    /// A `pong` message.
    ///
    /// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#pong)
    Pong(
        /// The nonce from the [`Ping`] message this was in response to.
        Nonce,
    ),

    /// A `reject` message.
    ///
    /// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#reject)
    Reject(Reject),

    /// A `getaddr` message.
    ///
    /// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#getaddr)
    GetAddr,

    /// An `addr` message.
    ///
    /// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#addr)
    Addr(Vec<TimestampedAddr>),

    /// An `alert` message. Both fields are opaque byte strings.
    ///
    /// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#alert)
    Alert {
        /// The serialized alert.
        payload: Vec<u8>,
        /// The signature over `payload`.
        signature: Vec<u8>,
    },

    /// An `inv` message.
    ///
    /// Allows a node to advertise its knowledge of one or more
    /// objects. It can be received unsolicited, or in reply to
    /// `getblocks`.
    ///
    /// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#inv)
    Inv(Vec<InventoryHash>),

    /// A `getdata` message.
    ///
    /// `getdata` is used in response to `inv`, to retrieve the content of
    /// a specific object, and is usually sent after receiving an `inv`
    /// packet, after filtering known elements.
    ///
    /// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#getdata)
    GetData(Vec<InventoryHash>),

    /// A `notfound` message.
    ///
    /// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#notfound)
    NotFound(Vec<InventoryHash>),

    /// A `getblocks` message.
    ///
    /// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#getblocks)
    GetBlocks(BlockLocator),

    /// A `getheaders` message.
    ///
    /// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#getheaders)
    GetHeaders(BlockLocator),

    /// A `headers` message.
    ///
    /// Returns block headers in response to a getheaders packet.
    ///
    /// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#headers)
    Headers(Vec<CountedHeader>),

    /// A `block` message.
    ///
    /// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#block)
    Block(Arc<Block>),

    /// A `tx` message.
    ///
    /// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#tx)
    Tx(Arc<Transaction>),

    /// A `mempool` message.
    ///
    /// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#mempool)
    Mempool,

    /// A `sendheaders` message, asking for new blocks to be announced by
    /// `headers` rather than `inv` ([BIP 130]).
    ///
    /// [BIP 130]: https://github.com/bitcoin/bips/blob/master/bip-0130.mediawiki
    SendHeaders,

    /// A `feefilter` message: the minimum fee rate, in satoshis per
    /// kilobyte, of transactions the sender wants announced ([BIP 133]).
    ///
    /// [BIP 133]: https://github.com/bitcoin/bips/blob/master/bip-0133.mediawiki
    FeeFilter(i64),

    /// A `sendcmpct` message ([BIP 152]).
    ///
    /// [BIP 152]: https://github.com/bitcoin/bips/blob/master/bip-0152.mediawiki
    SendCmpct(SendCmpct),

    /// A `cmpctblock` message ([BIP 152]).
    ///
    /// [BIP 152]: https://github.com/bitcoin/bips/blob/master/bip-0152.mediawiki
    CmpctBlock(HeaderAndShortIds),

    /// A `getblocktxn` message ([BIP 152]).
    ///
    /// [BIP 152]: https://github.com/bitcoin/bips/blob/master/bip-0152.mediawiki
    GetBlockTxn(BlockTransactionsRequest),

    /// A `blocktxn` message ([BIP 152]).
    ///
    /// [BIP 152]: https://github.com/bitcoin/bips/blob/master/bip-0152.mediawiki
    BlockTxn(BlockTransactions),

    /// A `merkleblock` message.
    ///
    /// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#merkleblock)
    MerkleBlock(MerkleBlock),

    /// A `filterload` message.
    ///
    /// This was defined in [BIP37], which is included in Bitcoin SV.
    ///
    /// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#filterload.2C_filteradd.2C_filterclear.2C_merkleblock)
    /// [BIP37]: https://github.com/bitcoin/bips/blob/master/bip-0037.mediawiki
    FilterLoad(FilterLoad),

    /// A `filteradd` message.
    ///
    /// This was defined in [BIP37], which is included in Bitcoin SV.
    ///
    /// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#filterload.2C_filteradd.2C_filterclear.2C_merkleblock)
    /// [BIP37]: https://github.com/bitcoin/bips/blob/master/bip-0037.mediawiki
    FilterAdd {
        /// The data element to add to the current filter.
        // The data field must be smaller than or equal to 520 bytes in size
        // (the maximum size of any potentially matched object).
        data: Vec<u8>,
    },

    /// A `filterclear` message.
    ///
    /// This was defined in [BIP37], which is included in Bitcoin SV.
    ///
    /// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#filterload.2C_filteradd.2C_filterclear.2C_merkleblock)
    /// [BIP37]: https://github.com/bitcoin/bips/blob/master/bip-0037.mediawiki
    FilterClear,

    /// A `protoconf` message, announcing limits and stream policies the
    /// sender supports.
    Protoconf(Protoconf),

    /// A `createstrm` message, asking to add a stream to an association.
    CreateStream(CreateStream),

    /// A `streamack` message, accepting a `createstrm`.
    StreamAck(StreamAck),

    /// A `dsdetected` message, reporting a double spend across blocks.
    DsDetected(DsDetected),

    /// A `datareftx` message: a transaction with a proof of its inclusion
    /// in a block.
    DataRefTx(DataRefTx),

    /// An `authch` message, a challenge to authenticate the receiver.
    AuthCh {
        /// The authentication scheme version.
        version: i32,
        /// The challenge to sign.
        message: Vec<u8>,
    },

    /// An `authresp` message, answering an `authch`.
    AuthResp {
        /// The responder's public key.
        public_key: Vec<u8>,
        /// A nonce chosen by the responder.
        client_nonce: u64,
        /// The signature over the challenge and nonce.
        signature: Vec<u8>,
    },
}

impl Message {
    /// Returns the command that identifies this message on the wire.
    pub fn command(&self) -> Command {
        match self {
            Message::Version(_) => Command::Version,
            Message::Verack => Command::Verack,
            Message::Ping(_) => Command::Ping,
            Message::Pong(_) => Command::Pong,
            Message::Reject(_) => Command::Reject,
            Message::GetAddr => Command::GetAddr,
            Message::Addr(_) => Command::Addr,
            Message::Alert { .. } => Command::Alert,
            Message::Inv(_) => Command::Inv,
            Message::GetData(_) => Command::GetData,
            Message::NotFound(_) => Command::NotFound,
            Message::GetBlocks(_) => Command::GetBlocks,
            Message::GetHeaders(_) => Command::GetHeaders,
            Message::Headers(_) => Command::Headers,
            Message::Block(_) => Command::Block,
            Message::Tx(_) => Command::Tx,
            Message::Mempool => Command::Mempool,
            Message::SendHeaders => Command::SendHeaders,
            Message::FeeFilter(_) => Command::FeeFilter,
            Message::SendCmpct(_) => Command::SendCmpct,
            Message::CmpctBlock(_) => Command::CmpctBlock,
            Message::GetBlockTxn(_) => Command::GetBlockTxn,
            Message::BlockTxn(_) => Command::BlockTxn,
            Message::MerkleBlock(_) => Command::MerkleBlock,
            Message::FilterLoad(_) => Command::FilterLoad,
            Message::FilterAdd { .. } => Command::FilterAdd,
            Message::FilterClear => Command::FilterClear,
            Message::Protoconf(_) => Command::Protoconf,
            Message::CreateStream(_) => Command::CreateStream,
            Message::StreamAck(_) => Command::StreamAck,
            Message::DsDetected(_) => Command::DsDetected,
            Message::DataRefTx(_) => Command::DataRefTx,
            Message::AuthCh { .. } => Command::AuthCh,
            Message::AuthResp { .. } => Command::AuthResp,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Version(version) => write!(
                f,
                "version {{ version: {}, user_agent: {:?}, association: {:?} }}",
                version.version, version.user_agent, version.association_id,
            ),
            Message::Reject(reject) => write!(
                f,
                "reject {{ message: {:?}, ccode: {:?}, reason: {:?} }}",
                reject.message, reject.ccode, reject.reason,
            ),
            Message::Inv(hashes) => write!(f, "inv {{ len: {} }}", hashes.len()),
            Message::GetData(hashes) => write!(f, "getdata {{ len: {} }}", hashes.len()),
            Message::Headers(headers) => write!(f, "headers {{ len: {} }}", headers.len()),
            Message::Block(block) => write!(f, "block {{ hash: {} }}", block.hash()),
            Message::Tx(tx) => write!(f, "tx {{ hash: {} }}", tx.hash()),
            Message::CreateStream(create) => write!(
                f,
                "createstrm {{ stream_type: {}, policy: {:?} }}",
                create.stream_type, create.policy,
            ),
            message => f.write_str(message.command().as_str()),
        }
    }
}

/// The payload of a `version` message.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct VersionMessage {
    /// The network version number supported by the sender.
    pub version: Version,

    /// The network services advertised by the sender.
    pub services: PeerServices,

    /// The time when the version message was sent.
    ///
    /// This is a 64-bit field. Out-of-range times are rejected as invalid.
    pub timestamp: DateTime<Utc>,

    /// The network address of the node receiving this message, and its
    /// advertised network services.
    pub address_recv: AddrInVersion,

    /// The network address of the node sending this message, and its
    /// advertised network services.
    pub address_from: AddrInVersion,

    /// Node random nonce, randomly generated every time a version
    /// packet is sent. This nonce is used to detect connections
    /// to self.
    pub nonce: Nonce,

    /// The user agent advertised by the sender.
    pub user_agent: String,

    /// The last block received by the emitting node.
    pub start_height: i32,

    /// Whether the remote peer should announce relayed
    /// transactions or not, see [BIP 0037](https://github.com/bitcoin/bips/blob/master/bip-0037.mediawiki)
    ///
    /// Old peers may omit this field, it is then read as `true`.
    pub relay: bool,

    /// The association id field that follows `relay`.
    pub association_id: AssociationIdField,
}

/// The payload of a `reject` message.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Reject {
    /// Type of message rejected.
    // It's unclear if this is strictly limited to message command
    // codes, so leaving it a String.
    pub message: String,

    /// RejectReason code relating to rejected message.
    pub ccode: RejectReason,

    /// Human-readable version of rejection reason.
    pub reason: String,

    /// Optional extra data provided for some errors.
    // Currently, all errors which provide this field fill it with
    // the TXID or block header hash of the object being rejected,
    // so the field is 32 bytes.
    pub data: Option<[u8; 32]>,
}

/// The `getblocks` and `getheaders` payload.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct BlockLocator {
    /// The protocol version of the sender.
    pub version: Version,

    /// Hashes of known blocks, ordered from highest height to lowest height.
    // XXX How are these hashes ordered? Is the [`Hash`] definition correct?
    pub known_blocks: Vec<block::Hash>,

    /// Optionally, the last block hash to request, or `None` for as many as
    /// the peer will send. It is all zeroes on the wire when `None`.
    pub stop: Option<block::Hash>,
}

/// The payload of a `sendcmpct` message.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct SendCmpct {
    /// Whether new blocks should be announced with `cmpctblock`.
    pub announce: bool,
    /// The compact block protocol version.
    pub version: u64,
}

/// The payload of a `merkleblock` message.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct MerkleBlock {
    /// The header of the filtered block.
    pub header: Header,
    /// The number of transactions in the block.
    pub total_transactions: u32,
    /// Hashes of the partial merkle tree, in depth-first order.
    pub hashes: Vec<transaction::Hash>,
    /// Flag bits of the partial merkle tree, packed eight per byte.
    pub flags: Vec<u8>,
}

/// The payload of a `filterload` message.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct FilterLoad {
    /// The filter itself is simply a bit field of arbitrary
    /// byte-aligned size. The maximum size is 36,000 bytes.
    pub filter: Filter,

    /// The number of hash functions to use in this filter. The
    /// maximum value allowed in this field is 50.
    pub hash_functions_count: u32,

    /// A random value to add to the seed value in the hash
    /// function used by the bloom filter.
    pub tweak: Tweak,

    /// A set of flags that control how matched items are added to the filter.
    pub flags: u8,
}

/// The payload of a `protoconf` message.
///
/// Fields beyond `number_of_fields` are absent on the wire, and read as
/// their legacy defaults. Fields this crate doesn't know are skipped.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Protoconf {
    /// The number of fields that follow.
    pub number_of_fields: u64,
    /// The largest payload the sender accepts.
    pub max_recv_payload_length: u32,
    /// The stream policies the sender supports, comma-separated, most
    /// preferred first.
    pub stream_policies: String,
}

impl Protoconf {
    /// Returns a `protoconf` carrying both known fields.
    pub fn new(max_recv_payload_length: u32, stream_policies: impl Into<String>) -> Protoconf {
        Protoconf {
            number_of_fields: constants::PROTOCONF_FIELD_COUNT,
            max_recv_payload_length,
            stream_policies: stream_policies.into(),
        }
    }

    /// Returns the advertised stream policy names, most preferred first.
    pub fn policy_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.stream_policies
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// The payload of a `createstrm` message.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct CreateStream {
    /// The association the new stream joins. An empty id is malformed, but
    /// representable so that the node's rejection of it can be tested.
    pub association_id: Option<AssociationId>,
    /// The wire value of the requested stream type. Kept raw so that
    /// out-of-range values can be sent.
    pub stream_type: u8,
    /// The name of the stream policy the initiator wants.
    pub policy: String,
}

/// The payload of a `streamack` message.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct StreamAck {
    /// The association the stream joined.
    pub association_id: Option<AssociationId>,
    /// The wire value of the accepted stream type.
    pub stream_type: u8,
}

/// The payload of a `dsdetected` message.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct DsDetected {
    /// The message format version.
    pub version: u16,
    /// One entry per block containing a conflicting transaction.
    pub blocks: Vec<BlockDetails>,
}

/// One conflicting block in a `dsdetected` message.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct BlockDetails {
    /// Headers from the fork point up to the block containing the
    /// conflicting transaction, newest last.
    pub headers: Vec<Header>,
    /// Proof that the conflicting transaction is in the last block.
    pub proof: DsMerkleProof,
}

/// The payload of a `datareftx` message.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct DataRefTx {
    /// The transaction.
    pub tx: Arc<Transaction>,
    /// Proof that `tx` is in a block.
    pub proof: TscMerkleProof,
}

/// Reject codes, mostly from [BIP 61].
///
/// Codes without a name are kept as [`RejectReason::Unknown`], so any reject
/// a node sends can be decoded and inspected.
///
/// [BIP 61]: https://github.com/bitcoin/bips/blob/master/bip-0061.mediawiki
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[allow(missing_docs)]
pub enum RejectReason {
    Malformed,
    Invalid,
    Obsolete,
    Duplicate,
    Nonstandard,
    Dust,
    InsufficientFee,
    Checkpoint,
    Other,
    /// A `createstrm` request was refused.
    StreamSetup,
    /// A code with no name. Never one of the named codes.
    Unknown(u8),
}

impl RejectReason {
    /// Returns the reason with the given wire code.
    pub fn from_code(code: u8) -> RejectReason {
        match code {
            0x01 => RejectReason::Malformed,
            0x10 => RejectReason::Invalid,
            0x11 => RejectReason::Obsolete,
            0x12 => RejectReason::Duplicate,
            0x40 => RejectReason::Nonstandard,
            0x41 => RejectReason::Dust,
            0x42 => RejectReason::InsufficientFee,
            0x43 => RejectReason::Checkpoint,
            0x50 => RejectReason::Other,
            0x60 => RejectReason::StreamSetup,
            code => RejectReason::Unknown(code),
        }
    }

    /// Returns the wire code of this reason.
    pub fn code(self) -> u8 {
        match self {
            RejectReason::Malformed => 0x01,
            RejectReason::Invalid => 0x10,
            RejectReason::Obsolete => 0x11,
            RejectReason::Duplicate => 0x12,
            RejectReason::Nonstandard => 0x40,
            RejectReason::Dust => 0x41,
            RejectReason::InsufficientFee => 0x42,
            RejectReason::Checkpoint => 0x43,
            RejectReason::Other => 0x50,
            RejectReason::StreamSetup => 0x60,
            RejectReason::Unknown(code) => code,
        }
    }
}

impl SvSerialize for BlockDetails {
    fn sv_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.headers.sv_serialize(&mut writer)?;
        self.proof.sv_serialize(&mut writer)
    }
}

impl SvDeserialize for BlockDetails {
    fn sv_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(BlockDetails {
            headers: (&mut reader).sv_deserialize_into()?,
            proof: (&mut reader).sv_deserialize_into()?,
        })
    }
}

/// The smallest serialized [`BlockDetails`]: an empty header list and a
/// proof with the smallest transaction and no nodes.
const MIN_BLOCK_DETAILS_SIZE: usize = 1 + 1 + 1 + 1 + 10 + 32 + 1;

impl TrustedPreallocate for BlockDetails {
    fn max_allocation() -> u64 {
        ((MAX_PROTOCOL_MESSAGE_LEN - 1) / MIN_BLOCK_DETAILS_SIZE) as u64
    }
}

impl SvSerialize for SendCmpct {
    fn sv_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_u8(self.announce as u8)?;
        writer.write_u64::<LittleEndian>(self.version)
    }
}

impl SvDeserialize for SendCmpct {
    fn sv_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        use svnode_chain::serialization::ReadSvExt;

        Ok(SendCmpct {
            announce: reader.read_bool()?,
            version: reader.read_u64::<LittleEndian>()?,
        })
    }
}
