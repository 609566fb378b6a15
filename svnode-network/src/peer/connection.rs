//! The reactor task for one TCP connection, and the handle test threads use
//! to drive it.

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::{Buf, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{tcp::OwnedWriteHalf, TcpStream},
    sync::{mpsc, watch},
    time::Instant,
};
use tokio_util::codec::Decoder;

use crate::{
    constants,
    protocol::external::{
        codec::{Codec, CodecError},
        types::Nonce,
        Command, Message,
    },
    rate_limit::RateLimiter,
    reactor::Opening,
    Config,
};

use super::{
    handler::{dispatch, PeerContext, PeerHandler},
    observer::{ActivityProbe, PeerObserver, PeerState},
    CloseReason, PeerError,
};

/// The source of connection ids. Ids are unique within the process.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one connection in logs and test output.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> ConnectionId {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side opened a connection.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Direction {
    /// We connected to the peer.
    Outbound,
    /// The peer connected to one of our listeners.
    Inbound,
}

/// The fixed identity of a connection.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PeerInfo {
    /// The connection id.
    pub id: ConnectionId,
    /// The address of the remote peer.
    pub remote_addr: SocketAddr,
    /// Which side opened the connection.
    pub direction: Direction,
}

/// A request from a test thread to a connection task.
#[derive(Debug)]
pub(crate) enum Outbound {
    Message(Message),
    Close,
}

/// Where a connection task gets its socket.
pub(crate) enum Endpoint {
    Connect { timeout: Duration },
    Accepted(TcpStream),
}

/// The connection state that handlers can reach through a [`PeerContext`].
pub(crate) struct ConnectionCore {
    pub(super) info: PeerInfo,
    pub(super) local_addr: Option<SocketAddr>,
    pub(super) codec: Codec,
    pub(super) send_buf: BytesMut,
    pub(super) disconnect: bool,
    pub(super) observer: PeerObserver,
    pub(super) config: Arc<Config>,
}

/// What woke the connection loop.
enum Event {
    Shutdown,
    Outbound(Option<Outbound>),
    Read(std::io::Result<usize>),
    Written(std::io::Result<usize>),
    Throttled,
}

/// The reactor task that owns one TCP connection.
pub(crate) struct Connection {
    core: ConnectionCore,
    handler: Box<dyn PeerHandler>,
    opening: Opening,
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    recv_buf: BytesMut,
    send_limiter: Option<RateLimiter>,
    recv_limiter: Option<RateLimiter>,
}

impl Connection {
    /// Returns a connection task and the handle that drives it.
    pub(crate) fn new(
        info: PeerInfo,
        config: Arc<Config>,
        handler: Box<dyn PeerHandler>,
        opening: Opening,
    ) -> (Connection, PeerConnection) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let observer = PeerObserver::new();

        let handle = PeerConnection {
            info,
            outbound: outbound_tx,
            observer: observer.clone(),
            config: config.clone(),
        };

        let connection = Connection {
            core: ConnectionCore {
                info,
                local_addr: None,
                codec: Codec::for_config(&config),
                send_buf: BytesMut::new(),
                disconnect: false,
                observer,
                config: config.clone(),
            },
            handler,
            opening,
            outbound_rx,
            recv_buf: BytesMut::new(),
            send_limiter: config.send_rate_limit.as_ref().map(RateLimiter::new),
            recv_limiter: config.recv_rate_limit.as_ref().map(RateLimiter::new),
        };

        (connection, handle)
    }

    /// Returns the identity of this connection.
    pub(crate) fn info(&self) -> PeerInfo {
        self.core.info
    }

    /// Opens the connection, runs it until it closes or `shutdown` becomes
    /// `true`, then reports the close to the handler and observers.
    pub(crate) async fn run(mut self, endpoint: Endpoint, mut shutdown: watch::Receiver<bool>) {
        let stream = match endpoint {
            Endpoint::Accepted(stream) => stream,
            Endpoint::Connect { timeout } => {
                let addr = self.core.info.remote_addr;
                let connect = tokio::time::timeout(timeout, TcpStream::connect(addr));
                let connected = tokio::select! {
                    biased;

                    _ = shutdown.wait_for(|stopped| *stopped) => {
                        return self.close(CloseReason::Stopped);
                    }
                    connected = connect => connected,
                };
                match connected {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(error)) => {
                        return self.close(CloseReason::ConnectFailed(Arc::new(error)));
                    }
                    Err(_elapsed) => {
                        let error = std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            format!("no connection after {timeout:?}"),
                        );
                        return self.close(CloseReason::ConnectFailed(Arc::new(error)));
                    }
                }
            }
        };

        // Small protocol messages shouldn't wait for more data.
        let _ = stream.set_nodelay(true);
        self.core.local_addr = stream.local_addr().ok();
        self.core.observer.open(self.core.local_addr);
        debug!(local_addr = ?self.core.local_addr, "connection established");

        if let Err(error) = self.start() {
            warn!(%error, "could not start connection");
            return self.close(error.into());
        }

        let reason = self.drive(stream, &mut shutdown).await;
        self.close(reason);
    }

    /// Queues the opening message, then lets the handler start.
    fn start(&mut self) -> Result<(), CodecError> {
        let mut ctx = PeerContext::new(&mut self.core);

        match &self.opening {
            Opening::Version { association } => {
                let version = ctx.local_version(*association);
                ctx.send(Message::Version(version))?;
            }
            Opening::CreateStream(create) => {
                if let Some(id) = create.association_id {
                    ctx.set_association_id(id);
                }
                ctx.send(Message::CreateStream(create.clone()))?;
            }
            Opening::Silent => {}
        }

        self.handler.on_open(&mut ctx)
    }

    /// Moves bytes until the connection closes, and returns why it closed.
    async fn drive(
        &mut self,
        stream: TcpStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> CloseReason {
        let (mut reader, mut writer) = stream.into_split();
        let mut read_scratch = vec![0u8; constants::READ_CHUNK_SIZE];
        let mut outbound_open = true;

        loop {
            if self.core.disconnect && self.core.send_buf.is_empty() {
                shutdown_quietly(&mut writer).await;
                return CloseReason::Requested;
            }

            let now = Instant::now();
            let mut throttle_until: Option<Instant> = None;

            let read_allowance = if self.core.disconnect {
                0
            } else {
                allowance(
                    self.recv_limiter.as_mut(),
                    now,
                    read_scratch.len(),
                    &mut throttle_until,
                )
            };
            let write_allowance = if self.core.send_buf.is_empty() {
                0
            } else {
                allowance(
                    self.send_limiter.as_mut(),
                    now,
                    self.core.send_buf.len(),
                    &mut throttle_until,
                )
            };
            let deadline = throttle_until.unwrap_or(now + Duration::from_secs(3600));

            let event = {
                let send_buf = &self.core.send_buf;
                tokio::select! {
                    // Shutdown wins over pending I/O, so every connection
                    // reports the stop.
                    biased;

                    _ = shutdown.wait_for(|stopped| *stopped) => Event::Shutdown,
                    outbound = self.outbound_rx.recv(), if outbound_open && !self.core.disconnect => {
                        Event::Outbound(outbound)
                    }
                    read = reader.read(&mut read_scratch[..read_allowance]), if read_allowance > 0 => {
                        Event::Read(read)
                    }
                    written = writer.write(&send_buf[..write_allowance]), if write_allowance > 0 => {
                        Event::Written(written)
                    }
                    _ = tokio::time::sleep_until(deadline), if throttle_until.is_some() => {
                        Event::Throttled
                    }
                }
            };

            match event {
                Event::Shutdown => return CloseReason::Stopped,
                Event::Outbound(Some(Outbound::Message(msg))) => {
                    if let Err(error) = PeerContext::new(&mut self.core).send(msg) {
                        warn!(%error, "could not encode outbound message");
                        return error.into();
                    }
                }
                Event::Outbound(Some(Outbound::Close)) => {
                    debug!("test thread requested disconnect");
                    self.core.disconnect = true;
                }
                Event::Outbound(None) => outbound_open = false,
                Event::Read(Ok(0)) => return CloseReason::PeerClosed,
                Event::Read(Ok(len)) => {
                    if let Some(limiter) = self.recv_limiter.as_mut() {
                        limiter.record(Instant::now().into_std(), len as u64);
                    }
                    self.recv_buf.extend_from_slice(&read_scratch[..len]);
                    if let Err(error) = self.dispatch_received() {
                        warn!(%error, "closing connection after protocol error");
                        return error.into();
                    }
                }
                Event::Read(Err(error)) => return CloseReason::Io(Arc::new(error)),
                Event::Written(Ok(0)) => {
                    let error = std::io::Error::from(std::io::ErrorKind::WriteZero);
                    return CloseReason::Io(Arc::new(error));
                }
                Event::Written(Ok(len)) => {
                    if let Some(limiter) = self.send_limiter.as_mut() {
                        limiter.record(Instant::now().into_std(), len as u64);
                    }
                    self.core.send_buf.advance(len);
                }
                Event::Written(Err(error)) => return CloseReason::Io(Arc::new(error)),
                Event::Throttled => {}
            }
        }
    }

    /// Dispatches every complete message in the receive buffer.
    ///
    /// Stops early once a handler asks to disconnect.
    fn dispatch_received(&mut self) -> Result<(), CodecError> {
        while !self.core.disconnect {
            let Some(msg) = self.core.codec.decode(&mut self.recv_buf)? else {
                break;
            };
            trace!(%msg, "received message");

            let recorded = msg.clone();
            let mut ctx = PeerContext::new(&mut self.core);
            let result = dispatch(self.handler.as_mut(), &mut ctx, msg);
            self.core.observer.record(recorded);
            result?;
        }

        Ok(())
    }

    fn close(mut self, reason: CloseReason) {
        if reason.is_clean() {
            debug!(%reason, "connection closed");
        } else {
            info!(%reason, "connection closed");
        }

        let mut ctx = PeerContext::new(&mut self.core);
        self.handler.on_close(&mut ctx, &reason);
        self.core.observer.close(reason);
    }
}

/// Returns how many bytes the limiter allows now, capped at `wanted`.
///
/// If the limiter allows nothing, moves `throttle_until` to the earliest time
/// it will.
fn allowance(
    limiter: Option<&mut RateLimiter>,
    now: Instant,
    wanted: usize,
    throttle_until: &mut Option<Instant>,
) -> usize {
    let Some(limiter) = limiter else {
        return wanted;
    };

    let chunk = limiter.next_chunk(now.into_std());
    if chunk == 0 {
        let available = Instant::from_std(limiter.available_at(now.into_std()));
        *throttle_until = Some(match *throttle_until {
            Some(earlier) => earlier.min(available),
            None => available,
        });
        return 0;
    }

    usize::try_from(chunk).map_or(wanted, |chunk| chunk.min(wanted))
}

async fn shutdown_quietly(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        trace!(%error, "error shutting down the socket");
    }
}

/// A test thread's handle to one connection.
///
/// Handles are cheap to clone. Messages sent through any clone are queued in
/// order on the connection. Dropping every handle leaves the connection
/// open; the reactor keeps dispatching to its handler.
#[derive(Clone, Debug)]
pub struct PeerConnection {
    info: PeerInfo,
    outbound: mpsc::UnboundedSender<Outbound>,
    observer: PeerObserver,
    config: Arc<Config>,
}

impl PeerConnection {
    /// Returns the identity of this connection.
    pub fn info(&self) -> PeerInfo {
        self.info
    }

    /// Returns the address of the remote peer.
    pub fn remote_addr(&self) -> SocketAddr {
        self.info.remote_addr
    }

    /// Returns the observer for this connection's state.
    pub fn observer(&self) -> &PeerObserver {
        &self.observer
    }

    /// Returns a copy of the connection's current state.
    pub fn state(&self) -> PeerState {
        self.observer.snapshot()
    }

    /// Queues `msg` for sending, after every message queued before it.
    ///
    /// The reactor frames the message. A message the codec can't frame
    /// closes the connection with [`CloseReason::Codec`].
    pub fn send(&self, msg: Message) -> Result<(), PeerError> {
        if let Some(reason) = self.observer.state().closed.clone() {
            return Err(PeerError::ConnectionClosed(reason));
        }

        self.outbound
            .send(Outbound::Message(msg))
            .map_err(|_| self.closed_error())
    }

    /// Asks the reactor to close the connection after sending everything
    /// queued so far.
    pub fn disconnect(&self) -> Result<(), PeerError> {
        self.outbound
            .send(Outbound::Close)
            .map_err(|_| self.closed_error())
    }

    /// Blocks until `predicate` holds, using the configured wait timeout.
    pub fn wait_until<F>(&self, predicate: F) -> Result<(), PeerError>
    where
        F: FnMut(&PeerState) -> bool,
    {
        self.observer.wait_until(self.config.wait_timeout, predicate)
    }

    /// Blocks until `predicate` holds or `timeout` elapses.
    pub fn wait_until_timeout<F>(&self, timeout: Duration, predicate: F) -> Result<(), PeerError>
    where
        F: FnMut(&PeerState) -> bool,
    {
        self.observer.wait_until(timeout, predicate)
    }

    /// Blocks until the TCP connection is established.
    pub fn wait_for_connect(&self) -> Result<(), PeerError> {
        self.wait_until(|state| state.connected)
    }

    /// Blocks until the peer has sent both `version` and `verack`.
    pub fn wait_for_verack(&self) -> Result<(), PeerError> {
        self.wait_until(PeerState::handshake_complete)
    }

    /// Blocks until at least one `command` message has arrived.
    pub fn wait_for_message(&self, command: Command) -> Result<(), PeerError> {
        self.wait_until(|state| state.count(command) > 0)
    }

    /// Blocks until the connection has closed, and returns why.
    pub fn wait_for_close(&self) -> Result<CloseReason, PeerError> {
        self.wait_until(PeerState::is_closed)?;
        Ok(self.closed_reason())
    }

    /// Sends a `ping` with a fresh nonce and blocks until the matching
    /// `pong` arrives. Then, if a `probe` is given, polls it until the node
    /// reports no pending activity.
    ///
    /// When this returns, the node has received every message sent on this
    /// connection before the ping, and with a probe, finished processing them.
    pub fn sync_with_ping(&self, probe: Option<&dyn ActivityProbe>) -> Result<(), PeerError> {
        let timeout = self.config.wait_timeout;
        let started = std::time::Instant::now();

        let nonce = Nonce::default();
        self.send(Message::Ping(nonce))?;
        self.wait_until_timeout(timeout, |state| state.has_pong(nonce))?;

        let Some(probe) = probe else {
            return Ok(());
        };
        loop {
            let pending = probe.pending_activity().map_err(PeerError::Probe)?;
            if pending == 0 {
                return Ok(());
            }
            trace!(pending, "waiting for node activity to drain");

            if started.elapsed() >= timeout {
                return Err(PeerError::Timeout(timeout));
            }
            std::thread::sleep(self.config.sync_poll_interval);
        }
    }

    fn closed_reason(&self) -> CloseReason {
        self.observer
            .state()
            .closed
            .clone()
            .unwrap_or(CloseReason::Stopped)
    }

    fn closed_error(&self) -> PeerError {
        match self.observer.state().closed.clone() {
            Some(reason) => PeerError::ConnectionClosed(reason),
            None => PeerError::ReactorStopped,
        }
    }
}
