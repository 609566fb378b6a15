//! Framing tests for the message codec.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use bytes::BytesMut;
use chrono::{TimeZone, Utc};
use lazy_static::lazy_static;
use tokio_util::codec::{Decoder, Encoder};

use svnode_chain::{block::Block, serialization::SvDeserializeInto, transaction::Transaction};

use crate::{
    constants::{CURRENT_NETWORK_PROTOCOL_VERSION, EXTENDED_HEADER_LEN, HEADER_LEN},
    protocol::external::{AddrInVersion, AssociationId, BlockTransactionsRequest, Command},
};

use super::*;

lazy_static! {
    static ref VERSION_TEST_VECTOR: VersionMessage = {
        let services = PeerServices::NODE_NETWORK;
        let timestamp = Utc
            .timestamp_opt(1_568_000_000, 0)
            .single()
            .expect("in-range timestamp");
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 6)), 18444);

        VersionMessage {
            version: CURRENT_NETWORK_PROTOCOL_VERSION,
            services,
            timestamp,
            address_recv: AddrInVersion::new(addr, services),
            address_from: AddrInVersion::new(addr, services),
            nonce: Nonce(0x9082_4908_8927_9238),
            user_agent: "/svnode-test:0.1.0/".to_owned(),
            start_height: 540_000,
            relay: true,
            association_id: AssociationIdField::Omitted,
        }
    };
}

fn encode(codec: &mut Codec, msg: &Message) -> BytesMut {
    let mut bytes = BytesMut::new();
    codec
        .encode(msg, &mut bytes)
        .expect("message should serialize");
    bytes
}

fn round_trip(msg: Message) -> Message {
    let mut codec = Codec::builder().finish();
    let mut bytes = encode(&mut codec, &msg);
    let decoded = codec
        .decode(&mut bytes)
        .expect("message should deserialize")
        .expect("message should be complete");
    assert!(bytes.is_empty(), "decoding should consume the whole frame");
    decoded
}

#[test]
fn version_message_round_trip() {
    svnode_test::init();

    for association_id in [
        AssociationIdField::Omitted,
        AssociationIdField::Null,
        AssociationIdField::Id(AssociationId::new_random()),
    ] {
        let v = Message::Version(VersionMessage {
            association_id,
            ..VERSION_TEST_VECTOR.clone()
        });
        assert_eq!(round_trip(v.clone()), v);
    }
}

#[test]
fn version_message_trailing_fields_are_optional() {
    svnode_test::init();

    let mut codec = Codec::builder().finish();
    let full = encode(&mut codec, &Message::Version(VERSION_TEST_VECTOR.clone()));
    let body = &full[HEADER_LEN..];

    // Drop the relay byte, and rebuild the frame around the shorter body.
    let short_body = &body[..body.len() - 1];
    let mut frame = BytesMut::new();
    frame.extend_from_slice(&full[..16]);
    frame.extend_from_slice(&(short_body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&sha256d::Checksum::from(short_body).0);
    frame.extend_from_slice(short_body);

    let decoded = codec.decode(&mut frame).expect("valid frame");
    match decoded {
        Some(Message::Version(version)) => {
            assert!(version.relay, "a missing relay byte means relay");
            assert_eq!(version.association_id, AssociationIdField::Omitted);
        }
        other => panic!("expected a version message, got {other:?}"),
    }
}

#[test]
fn version_message_association_id_wire_format() {
    svnode_test::init();

    let id = AssociationId::from_bytes([0x11; 16]);
    let mut codec = Codec::builder().finish();

    let omitted = encode(&mut codec, &Message::Version(VERSION_TEST_VECTOR.clone()));
    let null = encode(
        &mut codec,
        &Message::Version(VersionMessage {
            association_id: AssociationIdField::Null,
            ..VERSION_TEST_VECTOR.clone()
        }),
    );
    let with_id = encode(
        &mut codec,
        &Message::Version(VersionMessage {
            association_id: AssociationIdField::Id(id),
            ..VERSION_TEST_VECTOR.clone()
        }),
    );

    // Null adds an empty byte string, an id adds its length, type byte and UUID.
    assert_eq!(null.len(), omitted.len() + 1);
    assert_eq!(null[null.len() - 1], 0);
    assert_eq!(with_id.len(), omitted.len() + 1 + 17);
    assert_eq!(&with_id[omitted.len()..omitted.len() + 2], &[17, 0]);
    assert_eq!(&with_id[omitted.len() + 2..], &[0x11; 16]);
}

#[test]
fn decode_waits_for_the_last_payload_byte() {
    svnode_test::init();

    let mut codec = Codec::builder().finish();
    let frame = encode(&mut codec, &Message::Ping(Nonce(0x0102_0304_0506_0708)));
    let trailing = encode(&mut codec, &Message::Verack);

    let mut src = BytesMut::new();
    src.extend_from_slice(&frame[..frame.len() - 1]);
    assert_eq!(codec.decode(&mut src).expect("partial frame"), None);
    assert_eq!(codec.decode(&mut src).expect("partial frame"), None);

    src.extend_from_slice(&frame[frame.len() - 1..]);
    src.extend_from_slice(&trailing[..10]);
    assert_eq!(
        codec.decode(&mut src).expect("complete frame"),
        Some(Message::Ping(Nonce(0x0102_0304_0506_0708)))
    );

    // The bytes of the next frame are left alone.
    assert_eq!(&src[..], &trailing[..10]);
    assert_eq!(codec.decode(&mut src).expect("partial header"), None);
    assert_eq!(&src[..], &trailing[..10]);
}

#[test]
fn decode_several_frames_from_one_buffer() {
    svnode_test::init();

    let mut codec = Codec::builder().finish();
    let messages = vec![
        Message::Verack,
        Message::Ping(Nonce(1)),
        Message::SendHeaders,
        Message::Protoconf(Protoconf::new(2_097_152, "BlockPriority,Default")),
    ];

    let mut src = BytesMut::new();
    for msg in &messages {
        src.extend_from_slice(&encode(&mut codec, msg));
    }

    let mut decoded = Vec::new();
    while let Some(msg) = codec.decode(&mut src).expect("valid frames") {
        decoded.push(msg);
    }
    assert_eq!(decoded, messages);
}

#[test]
fn bad_checksum_is_fatal() {
    svnode_test::init();

    let mut codec = Codec::builder().finish();
    let mut frame = encode(&mut codec, &Message::Ping(Nonce(7)));
    let last = frame.len() - 1;
    frame[last] ^= 0xff;

    match codec.decode(&mut frame) {
        Err(CodecError::BadChecksum { command }) => assert_eq!(command, Command::Ping),
        other => panic!("expected a checksum error, got {other:?}"),
    }
}

#[test]
fn unknown_command_is_fatal() {
    svnode_test::init();

    let mut codec = Codec::builder().finish();
    let mut frame = encode(&mut codec, &Message::Verack);
    frame[4..16].copy_from_slice(b"bogus\0\0\0\0\0\0\0");

    match codec.decode(&mut frame) {
        Err(CodecError::UnknownCommand(command)) => assert_eq!(command, "bogus"),
        other => panic!("expected an unknown command error, got {other:?}"),
    }
}

#[test]
fn wrong_network_magic_is_fatal() {
    svnode_test::init();

    let mut mainnet = Codec::builder().for_network(Network::Mainnet).finish();
    let mut regtest = Codec::builder().for_network(Network::Regtest).finish();
    let mut frame = encode(&mut mainnet, &Message::Verack);

    match regtest.decode(&mut frame) {
        Err(CodecError::BadMagic { expected, actual }) => {
            assert_eq!(expected, Network::Regtest.magic());
            assert_eq!(actual, Network::Mainnet.magic());
        }
        other => panic!("expected a magic error, got {other:?}"),
    }
}

#[test]
fn truncated_payload_names_the_command() {
    svnode_test::init();

    // A ping frame with a 4-byte body instead of an 8-byte nonce.
    let body = [1u8, 2, 3, 4];
    let mut frame = BytesMut::new();
    frame.extend_from_slice(&Network::Regtest.magic().0);
    frame.extend_from_slice(&Command::Ping.to_bytes());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&sha256d::Checksum::from(&body[..]).0);
    frame.extend_from_slice(&body);

    let mut codec = Codec::builder().finish();
    match codec.decode(&mut frame) {
        Err(CodecError::Payload { command, source }) => {
            assert_eq!(command, Command::Ping);
            assert!(source.is_truncated());
        }
        other => panic!("expected a payload error, got {other:?}"),
    }
}

#[test]
fn oversized_payloads_are_refused() {
    svnode_test::init();

    let mut codec = Codec::builder().with_max_body_len(8).finish();

    // A ping body is exactly 8 bytes.
    let mut frame = encode(&mut codec, &Message::Ping(Nonce(3)));
    assert!(codec.decode(&mut frame).expect("fits").is_some());

    let mut dst = BytesMut::new();
    let result = codec.encode(&Message::FeeFilter(1), &mut dst);
    assert!(result.is_ok(), "feefilter is 8 bytes too");

    let long = Message::Reject(Reject {
        message: "tx".to_string(),
        ccode: RejectReason::Invalid,
        reason: "too long for the limit".to_string(),
        data: None,
    });
    let before = dst.len();
    assert!(matches!(
        codec.encode(&long, &mut dst),
        Err(CodecError::PayloadTooLarge { .. })
    ));
    assert_eq!(dst.len(), before, "a failed encode appends nothing");

    let mut large = encode(&mut Codec::builder().finish(), &long);
    assert!(matches!(
        codec.decode(&mut large),
        Err(CodecError::PayloadTooLarge { .. })
    ));
}

#[test]
fn failed_body_serialization_appends_nothing() {
    svnode_test::init();

    let mut codec = Codec::builder().finish();
    let mut dst = BytesMut::new();
    let unordered = Message::GetBlockTxn(BlockTransactionsRequest {
        block_hash: block::Hash([1; 32]),
        indexes: vec![4, 2],
    });

    assert!(matches!(
        codec.encode(&unordered, &mut dst),
        Err(CodecError::Io(_))
    ));
    assert!(dst.is_empty());
}

#[test]
fn extended_framing_above_threshold() -> color_eyre::Result<()> {
    svnode_test::init();

    let block: Block = svnode_test::vectors::GENESIS_BLOCK_BYTES
        .as_slice()
        .sv_deserialize_into()?;
    let msg = Message::Block(block.into());

    let mut codec = Codec::builder().with_extended_threshold(100).finish();
    let mut frame = encode(&mut codec, &msg);
    let body_len = frame.len() - EXTENDED_HEADER_LEN;
    assert!(body_len >= 100);

    assert_eq!(&frame[4..16], b"extmsg\0\0\0\0\0\0");
    assert_eq!(&frame[16..20], &[0xff; 4]);
    assert_eq!(&frame[20..24], &[0; 4], "extended frames have no checksum");
    assert_eq!(&frame[24..36], &Command::Block.to_bytes());
    assert_eq!(&frame[36..44], &(body_len as u64).to_le_bytes());

    assert_eq!(codec.decode(&mut frame)?, Some(msg));
    assert!(frame.is_empty());

    // Small messages still use legacy framing.
    let small = encode(&mut codec, &Message::Ping(Nonce(9)));
    assert_eq!(&small[4..16], &Command::Ping.to_bytes());
    assert_eq!(small.len(), HEADER_LEN + 8);

    Ok(())
}

#[test]
fn extended_framing_needs_negotiation() -> color_eyre::Result<()> {
    svnode_test::init();

    let tx: Transaction = svnode_test::vectors::GENESIS_COINBASE_BYTES
        .as_slice()
        .sv_deserialize_into()?;
    let msg = Message::Tx(tx.into());

    let mut new_codec = Codec::builder().with_extended_threshold(10).finish();
    let mut old_codec = Codec::builder()
        .with_extended_threshold(10)
        .for_version(Version(70_015))
        .finish();

    let mut dst = BytesMut::new();
    assert!(matches!(
        old_codec.encode(&msg, &mut dst),
        Err(CodecError::ExtendedNotNegotiated {
            version: Version(70_015)
        })
    ));

    let mut frame = encode(&mut new_codec, &msg);
    assert!(matches!(
        old_codec.decode(&mut frame),
        Err(CodecError::ExtendedNotNegotiated { .. })
    ));

    // After negotiation, the old codec accepts the frame.
    let mut frame = encode(&mut new_codec, &msg);
    old_codec.reconfigure_version(CURRENT_NETWORK_PROTOCOL_VERSION);
    assert_eq!(old_codec.decode(&mut frame)?, Some(msg));

    Ok(())
}

#[test]
fn reject_data_is_optional() {
    svnode_test::init();

    for data in [None, Some([0xab; 32])] {
        let reject = Message::Reject(Reject {
            message: "createstrm".to_string(),
            ccode: RejectReason::StreamSetup,
            reason: "Unknown stream policy name".to_string(),
            data,
        });
        assert_eq!(round_trip(reject.clone()), reject);
    }
}

#[test]
fn protoconf_missing_fields_use_legacy_defaults() {
    svnode_test::init();

    for number_of_fields in [0, 1] {
        let mut body = vec![number_of_fields as u8];
        if number_of_fields == 1 {
            body.extend_from_slice(&4_000_000u32.to_le_bytes());
        }
        let mut frame = BytesMut::new();
        frame.extend_from_slice(&Network::Regtest.magic().0);
        frame.extend_from_slice(&Command::Protoconf.to_bytes());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&sha256d::Checksum::from(&body[..]).0);
        frame.extend_from_slice(&body);

        let mut codec = Codec::builder().finish();
        let decoded = codec.decode(&mut frame).expect("valid protoconf");
        let Some(Message::Protoconf(protoconf)) = decoded else {
            panic!("expected protoconf, got {decoded:?}");
        };

        assert_eq!(protoconf.number_of_fields, number_of_fields);
        assert_eq!(protoconf.stream_policies, constants::LEGACY_STREAM_POLICIES);
        if number_of_fields == 0 {
            assert_eq!(
                protoconf.max_recv_payload_length,
                constants::LEGACY_MAX_RECV_PAYLOAD_LENGTH
            );
        } else {
            assert_eq!(protoconf.max_recv_payload_length, 4_000_000);
        }
    }
}
