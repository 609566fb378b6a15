//! Randomised test data generation for external protocol types.

use std::{
    collections::BTreeSet,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
};

use chrono::{TimeZone, Utc};
use proptest::{arbitrary::any, arbitrary::Arbitrary, collection::vec, option, prelude::*};

use svnode_chain::{
    block::{self, Block, CountedHeader, Header},
    merkle_proof::{DsMerkleProof, TscMerkleProof},
    transaction::{self, Transaction},
};

use crate::constants;

use super::{
    types::{Filter, Nonce, PeerServices, Tweak, Version},
    AddrInVersion, AssociationId, AssociationIdField, BlockDetails, BlockLocator,
    BlockTransactions, BlockTransactionsRequest, CreateStream, DataRefTx, DsDetected, FilterLoad,
    HeaderAndShortIds, InventoryHash, MerkleBlock, Message, PrefilledTransaction, Protoconf,
    Reject, RejectReason, SendCmpct, ShortId, StreamAck, StreamType, TimestampedAddr,
    VersionMessage,
};

/// The largest list generated for message payloads.
///
/// Lists of transactions and headers are much smaller, so generating a whole
/// message stays fast.
const MAX_TEST_LIST_LEN: usize = 16;

/// The largest number of transactions or headers generated in one message.
const MAX_TEST_CHAIN_ITEMS: usize = 3;

impl InventoryHash {
    /// Generate a proptest strategy for Inv Errors
    pub fn error_strategy() -> BoxedStrategy<Self> {
        Just(InventoryHash::Error).boxed()
    }

    /// Generate a proptest strategy for Inv Tx hashes
    pub fn tx_strategy() -> BoxedStrategy<Self> {
        any::<[u8; 32]>()
            .prop_map(transaction::Hash)
            .prop_map(InventoryHash::Tx)
            .boxed()
    }

    /// Generate a proptest strategy for Inv Block hashes
    pub fn block_strategy() -> BoxedStrategy<Self> {
        any::<[u8; 32]>()
            .prop_map(block::Hash)
            .prop_map(InventoryHash::Block)
            .boxed()
    }

    /// Generate a proptest strategy for the block hash variants that request
    /// a filtered or compact reply.
    pub fn block_reply_strategy() -> BoxedStrategy<Self> {
        any::<[u8; 32]>()
            .prop_map(block::Hash)
            .prop_flat_map(|hash| {
                prop_oneof![
                    Just(InventoryHash::FilteredBlock(hash)),
                    Just(InventoryHash::CompactBlock(hash)),
                ]
            })
            .boxed()
    }

    /// Generate a proptest strategy for Inv DataRefTx hashes
    pub fn data_ref_strategy() -> BoxedStrategy<Self> {
        any::<[u8; 32]>()
            .prop_map(transaction::Hash)
            .prop_map(InventoryHash::DataRefTx)
            .boxed()
    }
}

impl Arbitrary for InventoryHash {
    type Parameters = ();

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        prop_oneof![
            Self::error_strategy(),
            Self::tx_strategy(),
            Self::block_strategy(),
            Self::block_reply_strategy(),
            Self::data_ref_strategy(),
        ]
        .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

impl Arbitrary for PeerServices {
    type Parameters = ();

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        any::<u64>().prop_map(PeerServices::from_bits_retain).boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

/// Returns a strategy for socket addresses that keep their form on the wire.
///
/// IPv4-mapped IPv6 addresses are read back as IPv4, so IPv6 addresses are
/// generated from the global unicast range.
pub fn canonical_socket_addr_strategy() -> BoxedStrategy<SocketAddr> {
    let v4 = any::<([u8; 4], u16)>()
        .prop_map(|(octets, port)| SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port));
    let v6 = any::<([u16; 7], u16)>().prop_map(|(segments, port)| {
        let ip = Ipv6Addr::new(
            0x2001,
            segments[0],
            segments[1],
            segments[2],
            segments[3],
            segments[4],
            segments[5],
            segments[6],
        );
        SocketAddr::new(IpAddr::V6(ip), port)
    });

    prop_oneof![v4, v6].boxed()
}

impl Arbitrary for AddrInVersion {
    type Parameters = ();

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        (canonical_socket_addr_strategy(), any::<PeerServices>())
            .prop_map(|(addr, services)| AddrInVersion::new(addr, services))
            .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

impl Arbitrary for TimestampedAddr {
    type Parameters = ();

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        (any::<u32>(), any::<AddrInVersion>())
            .prop_map(|(untrusted_last_seen, addr)| TimestampedAddr {
                untrusted_last_seen,
                addr,
            })
            .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

impl Arbitrary for AssociationId {
    type Parameters = ();

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        any::<[u8; 16]>().prop_map(AssociationId::from_bytes).boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

impl Arbitrary for AssociationIdField {
    type Parameters = ();

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        prop_oneof![
            Just(AssociationIdField::Omitted),
            Just(AssociationIdField::Null),
            any::<AssociationId>().prop_map(AssociationIdField::Id),
        ]
        .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

impl Arbitrary for StreamType {
    type Parameters = ();

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        proptest::sample::select(StreamType::USABLE.to_vec()).boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

impl Arbitrary for RejectReason {
    type Parameters = ();

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        any::<u8>().prop_map(RejectReason::from_code).boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

impl Arbitrary for ShortId {
    type Parameters = ();

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        any::<[u8; 6]>().prop_map(ShortId).boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

fn transactions_strategy() -> impl Strategy<Value = Vec<Arc<Transaction>>> {
    vec(any::<Transaction>().prop_map(Arc::new), 0..=MAX_TEST_CHAIN_ITEMS)
}

/// Returns a strategy for strictly increasing transaction indexes.
fn indexes_strategy() -> impl Strategy<Value = Vec<u64>> {
    proptest::collection::btree_set(any::<u64>(), 0..MAX_TEST_LIST_LEN)
        .prop_map(|indexes: BTreeSet<u64>| indexes.into_iter().collect())
}

impl Arbitrary for HeaderAndShortIds {
    type Parameters = ();

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        (
            any::<Header>(),
            any::<u64>(),
            vec(any::<ShortId>(), 0..MAX_TEST_LIST_LEN),
            proptest::collection::btree_set(any::<u64>(), 0..=MAX_TEST_CHAIN_ITEMS),
            transactions_strategy(),
        )
            .prop_map(|(header, nonce, short_ids, indexes, txs)| {
                let prefilled_txs = indexes
                    .into_iter()
                    .zip(txs)
                    .map(|(index, tx)| PrefilledTransaction { index, tx })
                    .collect();

                HeaderAndShortIds {
                    header,
                    nonce,
                    short_ids,
                    prefilled_txs,
                }
            })
            .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

impl Arbitrary for VersionMessage {
    type Parameters = ();

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        (
            any::<Version>(),
            any::<PeerServices>(),
            // The range of 32-bit timestamps is enough to test the 64-bit field.
            any::<u32>(),
            any::<AddrInVersion>(),
            any::<AddrInVersion>(),
            any::<Nonce>(),
            ".{0,64}",
            any::<i32>(),
            any::<bool>(),
            any::<AssociationIdField>(),
        )
            .prop_map(
                |(
                    version,
                    services,
                    timestamp,
                    address_recv,
                    address_from,
                    nonce,
                    user_agent,
                    start_height,
                    relay,
                    association_id,
                )| VersionMessage {
                    version,
                    services,
                    timestamp: Utc
                        .timestamp_opt(timestamp.into(), 0)
                        .single()
                        .expect("u32 timestamps are in range"),
                    address_recv,
                    address_from,
                    nonce,
                    user_agent,
                    start_height,
                    relay,
                    association_id,
                },
            )
            .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

fn reject_strategy() -> impl Strategy<Value = Reject> {
    (
        "[a-z]{0,12}",
        any::<RejectReason>(),
        ".{0,64}",
        option::of(any::<[u8; 32]>()),
    )
        .prop_map(|(message, ccode, reason, data)| Reject {
            message,
            ccode,
            reason,
            data,
        })
}

fn locator_strategy() -> impl Strategy<Value = BlockLocator> {
    (
        any::<Version>(),
        vec(any::<block::Hash>(), 0..MAX_TEST_LIST_LEN),
        // An all-zero stop hash means "no stop hash".
        option::of(any::<block::Hash>().prop_filter("non-zero stop hash", |hash| {
            *hash != block::Hash([0; 32])
        })),
    )
        .prop_map(|(version, known_blocks, stop)| BlockLocator {
            version,
            known_blocks,
            stop,
        })
}

fn protoconf_strategy() -> impl Strategy<Value = Protoconf> {
    (
        0..=3u64,
        any::<u32>(),
        "[A-Za-z,]{0,32}",
    )
        .prop_map(|(number_of_fields, max_recv_payload_length, stream_policies)| {
            // Fields the message doesn't carry are read back as the legacy defaults.
            Protoconf {
                number_of_fields,
                max_recv_payload_length: if number_of_fields >= 1 {
                    max_recv_payload_length
                } else {
                    constants::LEGACY_MAX_RECV_PAYLOAD_LENGTH
                },
                stream_policies: if number_of_fields >= 2 {
                    stream_policies
                } else {
                    constants::LEGACY_STREAM_POLICIES.to_string()
                },
            }
        })
}

fn stream_setup_strategy() -> BoxedStrategy<Message> {
    prop_oneof![
        (
            option::of(any::<AssociationId>()),
            any::<u8>(),
            "[A-Za-z]{0,16}",
        )
            .prop_map(|(association_id, stream_type, policy)| {
                Message::CreateStream(CreateStream {
                    association_id,
                    stream_type,
                    policy,
                })
            }),
        (option::of(any::<AssociationId>()), any::<u8>()).prop_map(
            |(association_id, stream_type)| {
                Message::StreamAck(StreamAck {
                    association_id,
                    stream_type,
                })
            }
        ),
    ]
    .boxed()
}

fn chain_message_strategy() -> BoxedStrategy<Message> {
    prop_oneof![
        vec(any::<CountedHeader>(), 0..=MAX_TEST_CHAIN_ITEMS).prop_map(Message::Headers),
        any::<Block>().prop_map(|block| Message::Block(block.into())),
        any::<Transaction>().prop_map(|tx| Message::Tx(tx.into())),
        any::<HeaderAndShortIds>().prop_map(Message::CmpctBlock),
        (any::<block::Hash>(), indexes_strategy()).prop_map(|(block_hash, indexes)| {
            Message::GetBlockTxn(BlockTransactionsRequest {
                block_hash,
                indexes,
            })
        }),
        (any::<block::Hash>(), transactions_strategy()).prop_map(|(block_hash, transactions)| {
            Message::BlockTxn(BlockTransactions {
                block_hash,
                transactions,
            })
        }),
        (
            any::<Header>(),
            any::<u32>(),
            vec(any::<transaction::Hash>(), 0..MAX_TEST_LIST_LEN),
            vec(any::<u8>(), 0..MAX_TEST_LIST_LEN),
        )
            .prop_map(|(header, total_transactions, hashes, flags)| {
                Message::MerkleBlock(MerkleBlock {
                    header,
                    total_transactions,
                    hashes,
                    flags,
                })
            }),
        (
            any::<u16>(),
            vec(
                (
                    vec(any::<Header>(), 0..=MAX_TEST_CHAIN_ITEMS),
                    any::<DsMerkleProof>(),
                ),
                0..=2
            ),
        )
            .prop_map(|(version, blocks)| {
                let blocks = blocks
                    .into_iter()
                    .map(|(headers, proof)| BlockDetails { headers, proof })
                    .collect();
                Message::DsDetected(DsDetected { version, blocks })
            }),
        (any::<Transaction>(), any::<TscMerkleProof>()).prop_map(|(tx, proof)| {
            Message::DataRefTx(DataRefTx {
                tx: tx.into(),
                proof,
            })
        }),
    ]
    .boxed()
}

fn control_message_strategy() -> BoxedStrategy<Message> {
    prop_oneof![
        any::<VersionMessage>().prop_map(Message::Version),
        Just(Message::Verack),
        any::<Nonce>().prop_map(Message::Ping),
        any::<Nonce>().prop_map(Message::Pong),
        reject_strategy().prop_map(Message::Reject),
        protoconf_strategy().prop_map(Message::Protoconf),
        stream_setup_strategy(),
    ]
    .boxed()
}

fn gossip_message_strategy() -> BoxedStrategy<Message> {
    prop_oneof![
        Just(Message::GetAddr),
        vec(any::<TimestampedAddr>(), 0..MAX_TEST_LIST_LEN).prop_map(Message::Addr),
        (vec(any::<u8>(), 0..64), vec(any::<u8>(), 0..64))
            .prop_map(|(payload, signature)| Message::Alert { payload, signature }),
        Just(Message::Mempool),
        Just(Message::SendHeaders),
        any::<i64>().prop_map(Message::FeeFilter),
        (any::<bool>(), any::<u64>())
            .prop_map(|(announce, version)| Message::SendCmpct(SendCmpct { announce, version })),
    ]
    .boxed()
}

fn inventory_message_strategy() -> BoxedStrategy<Message> {
    let hashes = || vec(any::<InventoryHash>(), 0..MAX_TEST_LIST_LEN);

    prop_oneof![
        hashes().prop_map(Message::Inv),
        hashes().prop_map(Message::GetData),
        hashes().prop_map(Message::NotFound),
        locator_strategy().prop_map(Message::GetBlocks),
        locator_strategy().prop_map(Message::GetHeaders),
    ]
    .boxed()
}

fn filter_and_auth_message_strategy() -> BoxedStrategy<Message> {
    prop_oneof![
        (
            vec(any::<u8>(), 0..=constants::MAX_FILTERLOAD_LENGTH.min(256)),
            any::<u32>(),
            any::<Tweak>(),
            any::<u8>(),
        )
            .prop_map(|(filter, hash_functions_count, tweak, flags)| {
                Message::FilterLoad(FilterLoad {
                    filter: Filter(filter),
                    hash_functions_count,
                    tweak,
                    flags,
                })
            }),
        vec(any::<u8>(), 0..=constants::MAX_FILTERADD_LENGTH)
            .prop_map(|data| Message::FilterAdd { data }),
        Just(Message::FilterClear),
        (any::<i32>(), vec(any::<u8>(), 0..64))
            .prop_map(|(version, message)| Message::AuthCh { version, message }),
        (vec(any::<u8>(), 0..64), any::<u64>(), vec(any::<u8>(), 0..64)).prop_map(
            |(public_key, client_nonce, signature)| Message::AuthResp {
                public_key,
                client_nonce,
                signature,
            }
        ),
    ]
    .boxed()
}

impl Arbitrary for Message {
    type Parameters = ();

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        prop_oneof![
            control_message_strategy(),
            gossip_message_strategy(),
            inventory_message_strategy(),
            chain_message_strategy(),
            filter_and_auth_message_strategy(),
        ]
        .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}
