//! End-to-end tests: a reactor talking to itself over loopback TCP.

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use svnode_chain::{block::Block, serialization::SvDeserialize};
use svnode_network::{
    policy_by_name, Association, AssociationError, AssociationId, AssociationIdField,
    AssociationRegistry, BlockPriorityPolicy, CloseReason, Command, Config, ConnectOptions,
    CreateStream, DefaultHandler, Listener, Message, PeerConnection, PeerHandler, RateLimitConfig,
    Reactor, RejectReason, StreamResponder, StreamState, StreamType,
};
use svnode_test::{prelude::*, vectors::GENESIS_BLOCK_BYTES};

fn loopback() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

fn test_config() -> Config {
    Config {
        wait_timeout: LOOPBACK_TIMEOUT,
        ..Config::default()
    }
}

/// Listens with a [`StreamResponder`] for each accepted connection.
fn listen_as_node(reactor: &Reactor, registry: &AssociationRegistry) -> Result<Listener> {
    let registry = registry.clone();
    let listener = reactor.listen(loopback(), move |_addr: SocketAddr| -> Box<dyn PeerHandler> {
        Box::new(StreamResponder::new(registry.clone()))
    })?;

    Ok(listener)
}

fn genesis_block() -> Result<Arc<Block>> {
    Ok(Arc::new(Block::sv_deserialize(&GENESIS_BLOCK_BYTES[..])?))
}

/// Sends `create` on a fresh connection, and returns the connection with
/// the reject reason the node answered with.
fn expect_rejection(
    reactor: &Reactor,
    node: SocketAddr,
    create: CreateStream,
) -> Result<(PeerConnection, String)> {
    let connection =
        reactor.connect_with(node, DefaultHandler, ConnectOptions::create_stream(create))?;
    connection.wait_for_message(Command::Reject)?;

    let reject = match connection.state().last(Command::Reject) {
        Some(Message::Reject(reject)) => reject.clone(),
        other => panic!("expected a reject, got {other:?}"),
    };
    assert_eq!(reject.message, "createstrm");
    assert_eq!(reject.ccode, RejectReason::StreamSetup);
    assert_eq!(connection.state().count(Command::StreamAck), 0);

    Ok((connection, reject.reason))
}

#[test]
fn version_with_empty_association_id_gets_one_minted() -> Result<()> {
    svnode_test::init();

    let reactor = Reactor::start(test_config())?;
    let registry = AssociationRegistry::new();
    let listener = listen_as_node(&reactor, &registry)?;

    let connection = reactor.connect_with(
        listener.local_addr(),
        DefaultHandler,
        ConnectOptions::version(AssociationIdField::Null),
    )?;
    let inbound = listener.accept(LOOPBACK_TIMEOUT)?;
    connection.wait_for_verack()?;

    let minted = connection
        .state()
        .remote_version
        .and_then(|version| version.association_id.id())
        .expect("the node returns the minted id");

    assert!(registry.contains(minted));
    assert_eq!(registry.streams(minted), Some(vec![StreamType::General]));
    assert_eq!(connection.state().association_id, Some(minted));
    inbound.wait_for_verack()?;
    assert_eq!(inbound.state().association_id, Some(minted));

    Ok(())
}

#[test]
fn legacy_version_gets_no_association() -> Result<()> {
    svnode_test::init();

    let reactor = Reactor::start(test_config())?;
    let registry = AssociationRegistry::new();
    let listener = listen_as_node(&reactor, &registry)?;

    let connection = reactor.connect(listener.local_addr(), DefaultHandler)?;
    connection.wait_for_verack()?;

    let state = connection.state();
    assert_eq!(
        state.remote_version.map(|version| version.association_id),
        Some(AssociationIdField::Omitted)
    );
    assert_eq!(state.association_id, None);
    assert!(registry.is_empty());

    Ok(())
}

#[test]
fn association_without_node_support_fails() -> Result<()> {
    svnode_test::init();

    let reactor = Reactor::start(test_config())?;
    let listener = reactor.listen(loopback(), |_addr: SocketAddr| -> Box<dyn PeerHandler> {
        Box::new(DefaultHandler)
    })?;

    let error = Association::connect(
        &reactor,
        listener.local_addr(),
        Arc::new(BlockPriorityPolicy),
    )
    .expect_err("a default handler doesn't mint association ids");
    assert!(
        matches!(error, AssociationError::NoAssociationId),
        "{error:?}"
    );

    Ok(())
}

#[test]
fn block_priority_association_routes_blocks_to_data1() -> Result<()> {
    svnode_test::init();

    let reactor = Reactor::start(test_config())?;
    let registry = AssociationRegistry::new();
    let listener = listen_as_node(&reactor, &registry)?;

    let policy = policy_by_name("BlockPriority").expect("policy is known");
    let association = Association::connect(&reactor, listener.local_addr(), policy)?;

    let node_general = listener.accept(LOOPBACK_TIMEOUT)?;
    let node_data1 = listener.accept(LOOPBACK_TIMEOUT)?;

    assert_eq!(
        association.stream_state(StreamType::General),
        StreamState::Established
    );
    assert_eq!(
        association.stream_state(StreamType::Data1),
        StreamState::Established
    );
    assert_eq!(
        association.stream_state(StreamType::Data2),
        StreamState::NoStreams
    );
    assert_eq!(
        registry.streams(association.id()),
        Some(vec![StreamType::General, StreamType::Data1])
    );

    let block = genesis_block()?;
    assert_eq!(
        association.send_message(Message::Block(block.clone()))?,
        StreamType::Data1
    );
    assert_eq!(
        association.send_message(Message::FeeFilter(1000))?,
        StreamType::General
    );

    node_data1.wait_for_message(Command::Block)?;
    node_general.wait_for_message(Command::FeeFilter)?;

    assert_eq!(
        node_data1.state().last(Command::Block),
        Some(&Message::Block(block))
    );
    assert_eq!(node_data1.state().count(Command::FeeFilter), 0);
    assert_eq!(node_general.state().count(Command::Block), 0);
    assert_eq!(node_data1.state().association_id, Some(association.id()));

    // Pings follow the policy too, so a sync on DATA1 works.
    let data1 = association
        .connection(StreamType::Data1)
        .expect("DATA1 is established");
    data1.sync_with_ping(None)?;
    assert_eq!(node_general.state().count(Command::Ping), 0);

    Ok(())
}

#[test]
fn messages_fall_back_to_general_without_the_policy_stream() -> Result<()> {
    svnode_test::init();

    let reactor = Reactor::start(test_config())?;
    let registry = AssociationRegistry::new();
    let listener = listen_as_node(&reactor, &registry)?;

    let default_policy = policy_by_name("Default").expect("policy is known");
    let association = Association::connect(&reactor, listener.local_addr(), default_policy)?;
    let node_general = listener.accept(LOOPBACK_TIMEOUT)?;

    assert_eq!(
        association.send_message(Message::Block(genesis_block()?))?,
        StreamType::General
    );
    node_general.wait_for_message(Command::Block)?;
    assert!(association.connection(StreamType::Data1).is_none());

    Ok(())
}

#[test]
fn invalid_stream_requests_are_rejected_and_closed() -> Result<()> {
    svnode_test::init();

    let reactor = Reactor::start(test_config())?;
    let registry = AssociationRegistry::new();
    let listener = listen_as_node(&reactor, &registry)?;
    let node = listener.local_addr();

    let association = Association::connect(&reactor, node, Arc::new(BlockPriorityPolicy))?;
    let id = association.id();

    let request = |association_id: Option<AssociationId>, stream_type: u8, policy: &str| {
        CreateStream {
            association_id,
            stream_type,
            policy: policy.to_string(),
        }
    };

    let cases = [
        (
            request(Some(AssociationId::new_random()), 3, "Default"),
            "No node found with association ID",
        ),
        (request(Some(id), 9, "Default"), "StreamType out of range"),
        (
            request(Some(id), StreamType::Data1.as_u8(), "Default"),
            "Attempt to overwrite existing stream",
        ),
        (
            request(Some(id), StreamType::Data2.as_u8(), "NoSuchPolicy"),
            "Unknown stream policy name",
        ),
        (
            request(None, StreamType::Data2.as_u8(), "Default"),
            "Badly formatted message",
        ),
    ];

    for (create, expected) in cases {
        let (connection, reason) = expect_rejection(&reactor, node, create)?;
        assert_eq!(reason, expected);

        let closed = connection.wait_for_close()?;
        assert!(matches!(closed, CloseReason::PeerClosed), "{closed:?}");
    }

    // Rejected requests leave the association as it was.
    assert_eq!(
        registry.streams(id),
        Some(vec![StreamType::General, StreamType::Data1])
    );

    Ok(())
}

#[test]
fn rejected_duplicate_keeps_the_established_stream() -> Result<()> {
    svnode_test::init();

    let reactor = Reactor::start(test_config())?;
    let registry = AssociationRegistry::new();
    let listener = listen_as_node(&reactor, &registry)?;

    let mut association =
        Association::connect(&reactor, listener.local_addr(), Arc::new(BlockPriorityPolicy))?;

    let error = association
        .add_stream(&reactor, StreamType::Data1, Box::new(DefaultHandler))
        .expect_err("DATA1 is already bound");
    assert!(
        matches!(
            &error,
            AssociationError::StreamRejected { stream_type: StreamType::Data1, reason }
                if reason == "Attempt to overwrite existing stream"
        ),
        "{error:?}"
    );
    assert_eq!(
        association.stream_state(StreamType::Data1),
        StreamState::Established
    );

    // A new stream type is still accepted.
    association.add_stream(&reactor, StreamType::Data3, Box::new(DefaultHandler))?;
    assert_eq!(
        association.stream_state(StreamType::Data3),
        StreamState::Established
    );
    assert_eq!(
        registry.streams(association.id()),
        Some(vec![
            StreamType::General,
            StreamType::Data1,
            StreamType::Data3
        ])
    );

    Ok(())
}

#[test]
fn second_stream_on_one_connection_is_rejected() -> Result<()> {
    svnode_test::init();

    let reactor = Reactor::start(test_config())?;
    let registry = AssociationRegistry::new();
    let listener = listen_as_node(&reactor, &registry)?;
    let node = listener.local_addr();

    let default_policy = policy_by_name("Default").expect("policy is known");
    let association = Association::connect(&reactor, node, default_policy)?;
    let id = association.id();

    let request = |stream_type: StreamType| CreateStream {
        association_id: Some(id),
        stream_type: stream_type.as_u8(),
        policy: "Default".to_string(),
    };

    let connection = reactor.connect_with(
        node,
        DefaultHandler,
        ConnectOptions::create_stream(request(StreamType::Data1)),
    )?;
    connection.wait_for_message(Command::StreamAck)?;

    connection.send(Message::CreateStream(request(StreamType::Data2)))?;
    connection.wait_for_message(Command::Reject)?;
    match connection.state().last(Command::Reject) {
        Some(Message::Reject(reject)) => {
            assert_eq!(reject.message, "createstrm");
            assert_eq!(reject.reason, "Badly formatted message");
        }
        other => panic!("expected a reject, got {other:?}"),
    }
    assert_eq!(connection.state().count(Command::StreamAck), 1);

    let closed = connection.wait_for_close()?;
    assert!(matches!(closed, CloseReason::PeerClosed), "{closed:?}");

    // The node saw the close, so DATA1 was released and can be bound again.
    let deadline = Instant::now() + LOOPBACK_TIMEOUT;
    while registry.streams(id) != Some(vec![StreamType::General]) {
        assert!(Instant::now() < deadline, "DATA1 was never released");
        std::thread::sleep(Duration::from_millis(5));
    }

    let rebound = reactor.connect_with(
        node,
        DefaultHandler,
        ConnectOptions::create_stream(request(StreamType::Data1)),
    )?;
    rebound.wait_for_message(Command::StreamAck)?;
    assert_eq!(
        registry.streams(id),
        Some(vec![StreamType::General, StreamType::Data1])
    );

    Ok(())
}

#[test]
fn closing_a_stream_releases_it_on_the_node() -> Result<()> {
    svnode_test::init();

    let reactor = Reactor::start(test_config())?;
    let registry = AssociationRegistry::new();
    let listener = listen_as_node(&reactor, &registry)?;

    let association =
        Association::connect(&reactor, listener.local_addr(), Arc::new(BlockPriorityPolicy))?;
    let id = association.id();
    let _node_general = listener.accept(LOOPBACK_TIMEOUT)?;
    let node_data1 = listener.accept(LOOPBACK_TIMEOUT)?;

    let data1 = association
        .connection(StreamType::Data1)
        .expect("DATA1 is established");
    data1.disconnect()?;
    node_data1.wait_for_close()?;
    assert_eq!(registry.streams(id), Some(vec![StreamType::General]));

    association.disconnect();
    association.general().wait_for_close()?;

    // The node releases the association once it sees the close.
    let deadline = Instant::now() + LOOPBACK_TIMEOUT;
    while registry.contains(id) {
        assert!(Instant::now() < deadline, "association was never released");
        std::thread::sleep(Duration::from_millis(5));
    }

    Ok(())
}

#[test]
fn extended_frames_carry_large_payloads() -> Result<()> {
    svnode_test::init();

    let reactor = Reactor::start(Config {
        extended_message_threshold: 1024,
        ..test_config()
    })?;
    let listener = reactor.listen(loopback(), |_addr: SocketAddr| -> Box<dyn PeerHandler> {
        Box::new(DefaultHandler)
    })?;

    let connection = reactor.connect(listener.local_addr(), DefaultHandler)?;
    let inbound = listener.accept(LOOPBACK_TIMEOUT)?;
    connection.wait_for_verack()?;

    let payload: Vec<u8> = (0..4096u32).map(|i| i as u8).collect();
    connection.send(Message::Alert {
        payload: payload.clone(),
        signature: vec![0xab; 72],
    })?;
    inbound.wait_for_message(Command::Alert)?;

    assert_eq!(
        inbound.state().last(Command::Alert),
        Some(&Message::Alert {
            payload,
            signature: vec![0xab; 72],
        })
    );

    Ok(())
}

#[test]
fn rate_limited_sends_are_spread_over_windows() -> Result<()> {
    svnode_test::init();

    let window = Duration::from_millis(200);
    let reactor = Reactor::start(Config {
        send_rate_limit: Some(RateLimitConfig::new(20_000, window)),
        ..test_config()
    })?;
    let listener = reactor.listen(loopback(), |_addr: SocketAddr| -> Box<dyn PeerHandler> {
        Box::new(DefaultHandler)
    })?;

    let connection = reactor.connect(listener.local_addr(), DefaultHandler)?;
    let inbound = listener.accept(LOOPBACK_TIMEOUT)?;
    connection.wait_for_verack()?;
    inbound.wait_for_verack()?;

    // Six frames of just over 10 kB each: three windows' worth.
    let started = Instant::now();
    for _ in 0..6 {
        connection.send(Message::Alert {
            payload: vec![0; 10_000],
            signature: Vec::new(),
        })?;
    }
    inbound.wait_until(|state| state.count(Command::Alert) == 6)?;
    let elapsed = started.elapsed();

    assert!(
        elapsed >= window * 2 - Duration::from_millis(50),
        "sent 60 kB in {elapsed:?}, faster than 20 kB per {window:?}"
    );

    Ok(())
}
