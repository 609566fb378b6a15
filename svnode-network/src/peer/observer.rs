//! Connection state shared between the reactor and test threads.

use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::{
    protocol::external::{
        types::{Nonce, Version},
        AssociationId, Command, Message, Protoconf, VersionMessage,
    },
    BoxError,
};

use super::{CloseReason, PeerError};

/// How many recent `pong` nonces a connection remembers.
const RECENT_PONG_LIMIT: usize = 64;

/// When a message of some command last arrived on a connection.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Arrival {
    /// The position of the message among every message received on the
    /// connection, starting at zero.
    pub seq: u64,
    /// When the message was dispatched.
    pub at: Instant,
}

/// What a connection has seen so far.
///
/// The reactor updates this state after each dispatched message and each
/// lifecycle change. Test threads read it through a [`PeerObserver`].
#[derive(Clone, Debug, Default)]
pub struct PeerState {
    /// The TCP connection is established and hasn't closed yet.
    pub connected: bool,

    /// The local address of the established TCP connection.
    pub local_addr: Option<SocketAddr>,

    /// Set once the connection has closed, or failed to open.
    pub closed: Option<CloseReason>,

    /// The last `version` the peer sent.
    pub remote_version: Option<VersionMessage>,

    /// The peer sent a `verack`.
    pub verack_received: bool,

    /// The last `protoconf` the peer sent.
    pub protoconf: Option<Protoconf>,

    /// The protocol version both sides speak, once the handshake set it.
    pub negotiated_version: Option<Version>,

    /// The association this connection belongs to, once known.
    pub association_id: Option<AssociationId>,

    counts: HashMap<Command, u64>,
    last: HashMap<Command, Message>,
    arrivals: HashMap<Command, Arrival>,
    received: u64,
    recent_pongs: VecDeque<Nonce>,
}

impl PeerState {
    /// Returns the number of `command` messages received.
    pub fn count(&self, command: Command) -> u64 {
        self.counts.get(&command).copied().unwrap_or(0)
    }

    /// Returns the last `command` message received.
    pub fn last(&self, command: Command) -> Option<&Message> {
        self.last.get(&command)
    }

    /// Returns when the last `command` message arrived.
    pub fn arrival(&self, command: Command) -> Option<Arrival> {
        self.arrivals.get(&command).copied()
    }

    /// Returns the number of messages received, of every command.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Returns `true` if a `pong` carrying `nonce` arrived recently.
    pub fn has_pong(&self, nonce: Nonce) -> bool {
        self.recent_pongs.contains(&nonce)
    }

    /// Returns `true` if the `version` / `verack` exchange completed.
    pub fn handshake_complete(&self) -> bool {
        self.remote_version.is_some() && self.verack_received
    }

    /// Returns `true` if the connection has closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    fn record(&mut self, msg: Message) {
        let command = msg.command();
        match &msg {
            Message::Version(version) => self.remote_version = Some(version.clone()),
            Message::Verack => self.verack_received = true,
            Message::Protoconf(protoconf) => self.protoconf = Some(protoconf.clone()),
            Message::Pong(nonce) => {
                if self.recent_pongs.len() == RECENT_PONG_LIMIT {
                    self.recent_pongs.pop_front();
                }
                self.recent_pongs.push_back(*nonce);
            }
            _ => {}
        }

        *self.counts.entry(command).or_default() += 1;
        self.arrivals.insert(
            command,
            Arrival {
                seq: self.received,
                at: Instant::now(),
            },
        );
        self.last.insert(command, msg);
        self.received += 1;
    }
}

/// A handle to the state of one connection.
///
/// Cloning an observer shares the same state. Waits block on a condition
/// variable that the reactor signals after every dispatched message and every
/// lifecycle change.
#[derive(Clone, Debug, Default)]
pub struct PeerObserver {
    shared: Arc<(Mutex<PeerState>, Condvar)>,
}

impl PeerObserver {
    /// Returns an observer for a connection that hasn't opened yet.
    pub fn new() -> PeerObserver {
        PeerObserver::default()
    }

    /// Locks and returns the current state.
    ///
    /// The reactor can't dispatch messages for this connection while the
    /// guard is held, so keep it short.
    pub fn state(&self) -> MutexGuard<'_, PeerState> {
        self.shared
            .0
            .lock()
            .expect("peer state mutex should be unpoisoned")
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> PeerState {
        self.state().clone()
    }

    /// Blocks until `predicate` holds, the connection closes, or `timeout`
    /// elapses.
    ///
    /// The predicate is checked before the connection's closed status, so
    /// predicates on the closed state itself succeed.
    pub fn wait_until<F>(&self, timeout: Duration, mut predicate: F) -> Result<(), PeerError>
    where
        F: FnMut(&PeerState) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut state = self.state();

        loop {
            if predicate(&state) {
                return Ok(());
            }
            if let Some(reason) = &state.closed {
                return Err(PeerError::ConnectionClosed(reason.clone()));
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(PeerError::Timeout(timeout));
            }

            state = self
                .shared
                .1
                .wait_timeout(state, deadline - now)
                .expect("peer state mutex should be unpoisoned")
                .0;
        }
    }

    /// Applies `update` to the state without waking waiters.
    pub(crate) fn update<F>(&self, update: F)
    where
        F: FnOnce(&mut PeerState),
    {
        update(&mut self.state());
    }

    /// Records a dispatched message and wakes waiters.
    pub(crate) fn record(&self, msg: Message) {
        self.state().record(msg);
        self.shared.1.notify_all();
    }

    /// Marks the connection as established and wakes waiters.
    pub(crate) fn open(&self, local_addr: Option<SocketAddr>) {
        {
            let mut state = self.state();
            state.connected = true;
            state.local_addr = local_addr;
        }
        self.shared.1.notify_all();
    }

    /// Marks the connection as closed and wakes waiters.
    ///
    /// Only the first close reason is kept.
    pub(crate) fn close(&self, reason: CloseReason) {
        {
            let mut state = self.state();
            state.connected = false;
            state.closed.get_or_insert(reason);
        }
        self.shared.1.notify_all();
    }
}

/// Reports how much work the node under test still has queued.
///
/// This is usually backed by an RPC call, for example the node's count of
/// P2P messages that are received but not yet processed.
pub trait ActivityProbe {
    /// Returns the number of pending items, or the error from the RPC call.
    fn pending_activity(&self) -> Result<u64, BoxError>;
}

impl<F> ActivityProbe for F
where
    F: Fn() -> Result<u64, BoxError>,
{
    fn pending_activity(&self) -> Result<u64, BoxError> {
        self()
    }
}
