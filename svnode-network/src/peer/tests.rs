//! Connection tests over loopback TCP.

use std::{
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use svnode_test::prelude::*;

use crate::{
    constants::{CURRENT_NETWORK_PROTOCOL_VERSION, USER_AGENT},
    protocol::external::{types::Nonce, Command, Message},
    BoxError, Config, Reactor,
};

use super::*;

fn loopback() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

fn test_config() -> Config {
    Config {
        wait_timeout: LOOPBACK_TIMEOUT,
        sync_poll_interval: Duration::from_millis(5),
        ..Config::default()
    }
}

/// Returns a connected pair: an outbound connection and the inbound
/// connection it made, each with its own handler.
fn connected_pair<O, I>(
    reactor: &Reactor,
    outbound: O,
    inbound: I,
) -> Result<(PeerConnection, PeerConnection)>
where
    O: PeerHandler,
    I: PeerHandler + Clone + Send,
{
    let listener = reactor.listen(loopback(), move |_addr: SocketAddr| -> Box<dyn PeerHandler> {
        Box::new(inbound.clone())
    })?;

    let outbound = reactor.connect(listener.local_addr(), outbound)?;
    let inbound = listener.accept(LOOPBACK_TIMEOUT)?;

    Ok((outbound, inbound))
}

#[test]
fn default_handlers_complete_the_handshake() -> Result<()> {
    svnode_test::init();

    let reactor = Reactor::start(test_config())?;
    let (outbound, inbound) = connected_pair(&reactor, DefaultHandler, DefaultHandler)?;

    for connection in [&outbound, &inbound] {
        connection.wait_for_verack()?;
        connection.wait_for_message(Command::Protoconf)?;

        let state = connection.state();
        assert!(state.connected);
        assert_eq!(state.negotiated_version, Some(CURRENT_NETWORK_PROTOCOL_VERSION));
        assert_eq!(
            state.remote_version.map(|version| version.user_agent),
            Some(USER_AGENT.to_string())
        );
        assert_eq!(state.protoconf, Some(reactor.config().protoconf()));
    }

    assert_eq!(outbound.info().direction, Direction::Outbound);
    assert_eq!(inbound.info().direction, Direction::Inbound);
    assert_ne!(outbound.info().id, inbound.info().id);

    // The outbound side only sends one version.
    assert_eq!(inbound.state().count(Command::Version), 1);
    assert_eq!(outbound.state().count(Command::Version), 1);

    Ok(())
}

#[test]
fn messages_arrive_in_send_order() -> Result<()> {
    svnode_test::init();

    let reactor = Reactor::start(test_config())?;
    let (outbound, inbound) = connected_pair(
        &reactor,
        SilentHandler,
        SilentHandler,
    )?;
    outbound.wait_for_connect()?;

    for fee_rate in 0..20 {
        outbound.send(Message::FeeFilter(fee_rate))?;
    }
    outbound.send(Message::SendHeaders)?;

    inbound.wait_for_message(Command::SendHeaders)?;
    let state = inbound.state();
    assert_eq!(state.count(Command::FeeFilter), 20);
    assert_eq!(state.last(Command::FeeFilter), Some(&Message::FeeFilter(19)));

    let fee_filter = state.arrival(Command::FeeFilter).expect("fee filters arrived");
    let send_headers = state.arrival(Command::SendHeaders).expect("sendheaders arrived");
    assert_eq!(fee_filter.seq + 1, send_headers.seq);
    assert!(fee_filter.at <= send_headers.at);

    Ok(())
}

#[test]
fn ping_sync_waits_for_the_matching_pong() -> Result<()> {
    svnode_test::init();

    let reactor = Reactor::start(test_config())?;
    let (outbound, inbound) = connected_pair(&reactor, DefaultHandler, DefaultHandler)?;
    outbound.wait_for_verack()?;

    outbound.sync_with_ping(None)?;

    assert_eq!(inbound.state().count(Command::Ping), 1);
    let pong = outbound.state().last(Command::Pong).cloned();
    let ping = inbound.state().last(Command::Ping).cloned();
    match (ping, pong) {
        (Some(Message::Ping(sent)), Some(Message::Pong(answered))) => {
            assert_eq!(sent, answered)
        }
        other => panic!("expected a ping and its pong, got {other:?}"),
    }

    Ok(())
}

#[test]
fn ping_sync_polls_the_activity_probe_until_idle() -> Result<()> {
    svnode_test::init();

    let reactor = Reactor::start(test_config())?;
    let (outbound, _inbound) = connected_pair(&reactor, DefaultHandler, DefaultHandler)?;
    outbound.wait_for_verack()?;

    let polls = AtomicU64::new(0);
    let probe = || -> Result<u64, BoxError> {
        let polled = polls.fetch_add(1, Ordering::SeqCst);
        Ok(3u64.saturating_sub(polled))
    };

    outbound.sync_with_ping(Some(&probe))?;
    assert_eq!(polls.load(Ordering::SeqCst), 4);

    let failing = || -> Result<u64, BoxError> { Err("rpc connection refused".into()) };
    let error = outbound
        .sync_with_ping(Some(&failing))
        .expect_err("a failing probe fails the sync");
    assert!(matches!(error, PeerError::Probe(_)), "{error:?}");

    Ok(())
}

#[test]
fn ping_sync_without_a_pong_times_out() -> Result<()> {
    svnode_test::init();

    let reactor = Reactor::start(Config {
        wait_timeout: Duration::from_millis(200),
        ..test_config()
    })?;
    let (outbound, inbound) = connected_pair(&reactor, SilentHandler, SilentHandler)?;

    let error = outbound
        .sync_with_ping(None)
        .expect_err("a silent peer never answers");
    assert!(matches!(error, PeerError::Timeout(_)), "{error:?}");
    assert_eq!(inbound.state().count(Command::Ping), 1);

    Ok(())
}

#[test]
fn disconnect_flushes_queued_messages() -> Result<()> {
    svnode_test::init();

    let reactor = Reactor::start(test_config())?;
    let (outbound, inbound) = connected_pair(&reactor, SilentHandler, SilentHandler)?;

    let nonce = Nonce::default();
    outbound.send(Message::Ping(nonce))?;
    outbound.disconnect()?;

    assert!(matches!(outbound.wait_for_close()?, CloseReason::Requested));
    assert!(matches!(inbound.wait_for_close()?, CloseReason::PeerClosed));
    assert_eq!(inbound.state().last(Command::Ping), Some(&Message::Ping(nonce)));

    let error = outbound
        .send(Message::Verack)
        .expect_err("closed connections don't accept messages");
    assert!(matches!(error, PeerError::ConnectionClosed(CloseReason::Requested)));

    Ok(())
}

#[test]
fn unencodable_message_closes_the_connection() -> Result<()> {
    svnode_test::init();

    let reactor = Reactor::start(Config {
        max_payload_len: 64,
        ..test_config()
    })?;
    let (outbound, inbound) = connected_pair(&reactor, SilentHandler, SilentHandler)?;
    outbound.wait_for_connect()?;

    outbound.send(Message::FilterAdd {
        data: vec![0; 128],
    })?;

    assert!(matches!(outbound.wait_for_close()?, CloseReason::Codec(_)));
    assert!(matches!(inbound.wait_for_close()?, CloseReason::PeerClosed));
    assert_eq!(inbound.state().count(Command::FilterAdd), 0);

    Ok(())
}

#[test]
fn waits_time_out_on_an_idle_connection() -> Result<()> {
    svnode_test::init();

    let reactor = Reactor::start(test_config())?;
    let (outbound, _inbound) = connected_pair(&reactor, SilentHandler, SilentHandler)?;
    outbound.wait_for_connect()?;

    let timeout = Duration::from_millis(50);
    let error = outbound
        .wait_until_timeout(timeout, |state| state.count(Command::Block) > 0)
        .expect_err("nothing sends blocks");
    assert!(matches!(error, PeerError::Timeout(t) if t == timeout));

    Ok(())
}

#[test]
fn refused_connection_reports_connect_failure() -> Result<()> {
    svnode_test::init();

    let addr = {
        let listener = StdTcpListener::bind(loopback())?;
        listener.local_addr()?
    };

    let reactor = Reactor::start(test_config())?;
    let connection = reactor.connect(addr, DefaultHandler)?;

    let reason = connection.wait_for_close()?;
    assert!(matches!(reason, CloseReason::ConnectFailed(_)), "{reason:?}");
    assert!(!reason.is_clean());

    let error = connection
        .wait_for_verack()
        .expect_err("the connection never opened");
    assert!(matches!(error, PeerError::ConnectionClosed(_)));

    Ok(())
}

#[test]
fn handler_sees_open_and_close() -> Result<()> {
    svnode_test::init();

    #[derive(Clone)]
    struct Lifecycle {
        events: std::sync::Arc<std::sync::Mutex<Vec<&'static str>>>,
    }

    impl PeerHandler for Lifecycle {
        fn on_open(&mut self, _ctx: &mut PeerContext<'_>) -> Result<(), crate::CodecError> {
            self.events.lock().expect("unpoisoned").push("open");
            Ok(())
        }

        fn on_close(&mut self, _ctx: &mut PeerContext<'_>, _reason: &CloseReason) {
            self.events.lock().expect("unpoisoned").push("close");
        }
    }

    let handler = Lifecycle {
        events: Default::default(),
    };
    let events = handler.events.clone();

    let reactor = Reactor::start(test_config())?;
    let (outbound, _inbound) = connected_pair(&reactor, handler, SilentHandler)?;
    outbound.wait_for_connect()?;
    outbound.disconnect()?;
    outbound.wait_for_close()?;

    assert_eq!(*events.lock().expect("unpoisoned"), vec!["open", "close"]);

    Ok(())
}
