//! The reactor thread that owns every socket.
//!
//! Test threads talk to the reactor through a command channel. The reactor
//! runs a single-threaded tokio runtime, so handlers for every connection
//! run on the same thread, one message at a time.

use std::{
    fmt,
    future::Future,
    io,
    net::SocketAddr,
    sync::{mpsc as std_mpsc, Arc, Mutex},
    thread::JoinHandle,
    time::Duration,
};

use thiserror::Error;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{mpsc, oneshot, watch},
    task::JoinSet,
};
use tracing_futures::Instrument;

use crate::{
    constants::ACCEPT_ERROR_DELAY,
    peer::{
        Connection, ConnectionId, Direction, Endpoint, PeerConnection, PeerError, PeerHandler,
        PeerInfo,
    },
    protocol::external::{AssociationIdField, CreateStream},
    Config,
};


/// An error starting or commanding the reactor.
#[derive(Error, Debug)]
pub enum ReactorError {
    /// The reactor thread could not be spawned.
    #[error("could not spawn the reactor thread: {0}")]
    Spawn(#[source] io::Error),

    /// The reactor's async runtime could not be built.
    #[error("could not build the reactor runtime: {0}")]
    Runtime(#[source] io::Error),

    /// A listener could not be bound.
    #[error("could not listen on {addr}: {source}")]
    Listen {
        /// The requested listener address.
        addr: SocketAddr,
        /// The bind error.
        source: io::Error,
    },

    /// The reactor has stopped, and accepts no more commands.
    #[error("reactor stopped")]
    Stopped,
}

/// What a new connection sends before anything else.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Opening {
    /// A `version` carrying `association`. The default handler completes the
    /// handshake when the peer replies.
    Version {
        /// The association id field of the `version`.
        association: AssociationIdField,
    },

    /// A `createstrm`, to join an existing association.
    CreateStream(CreateStream),

    /// Nothing. The test sends the first message itself, or waits for the
    /// peer to send one.
    Silent,
}

impl Default for Opening {
    fn default() -> Self {
        Opening::Version {
            association: AssociationIdField::Omitted,
        }
    }
}

/// How to open an outbound connection.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConnectOptions {
    /// The first message on the connection.
    pub opening: Opening,

    /// Overrides [`Config::connect_timeout`] for this connection.
    pub connect_timeout: Option<Duration>,
}

impl ConnectOptions {
    /// Opens with a `version` carrying `association`.
    pub fn version(association: AssociationIdField) -> ConnectOptions {
        ConnectOptions {
            opening: Opening::Version { association },
            ..ConnectOptions::default()
        }
    }

    /// Opens without sending anything.
    pub fn silent() -> ConnectOptions {
        ConnectOptions {
            opening: Opening::Silent,
            ..ConnectOptions::default()
        }
    }

    /// Opens with a `createstrm` request.
    pub fn create_stream(create: CreateStream) -> ConnectOptions {
        ConnectOptions {
            opening: Opening::CreateStream(create),
            ..ConnectOptions::default()
        }
    }
}

/// Makes a handler for each connection a listener accepts.
pub trait HandlerFactory: Send + 'static {
    /// Returns the handler for a connection from `remote_addr`.
    fn make_handler(&mut self, remote_addr: SocketAddr) -> Box<dyn PeerHandler>;
}

impl<F> HandlerFactory for F
where
    F: FnMut(SocketAddr) -> Box<dyn PeerHandler> + Send + 'static,
{
    fn make_handler(&mut self, remote_addr: SocketAddr) -> Box<dyn PeerHandler> {
        self(remote_addr)
    }
}

/// Hands the connections accepted on one listening socket to a test thread.
#[derive(Debug)]
pub struct Listener {
    local_addr: SocketAddr,
    accepted: std_mpsc::Receiver<PeerConnection>,
}

impl Listener {
    /// Returns the bound address, with the actual port if port 0 was
    /// requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Blocks until a connection is accepted, or `timeout` elapses.
    pub fn accept(&self, timeout: Duration) -> Result<PeerConnection, PeerError> {
        self.accepted.recv_timeout(timeout).map_err(|error| match error {
            std_mpsc::RecvTimeoutError::Timeout => PeerError::Timeout(timeout),
            std_mpsc::RecvTimeoutError::Disconnected => PeerError::ReactorStopped,
        })
    }
}

enum ReactorCommand {
    Connect {
        connection: Connection,
        timeout: Duration,
    },
    Listen {
        addr: SocketAddr,
        factory: Box<dyn HandlerFactory>,
        accepted: std_mpsc::Sender<PeerConnection>,
        bound: oneshot::Sender<io::Result<SocketAddr>>,
    },
    Stop,
}

impl fmt::Debug for ReactorCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReactorCommand::Connect { timeout, .. } => f
                .debug_struct("Connect")
                .field("timeout", timeout)
                .finish_non_exhaustive(),
            ReactorCommand::Listen { addr, .. } => f
                .debug_struct("Listen")
                .field("addr", addr)
                .finish_non_exhaustive(),
            ReactorCommand::Stop => f.write_str("Stop"),
        }
    }
}

/// The protocol engine's event loop, running on its own thread.
///
/// Every socket belongs to the reactor. Test threads open connections with
/// [`Reactor::connect`] and [`Reactor::listen`], and drive them through the
/// returned [`PeerConnection`] handles.
///
/// Dropping the reactor stops it.
#[derive(Debug)]
pub struct Reactor {
    config: Arc<Config>,
    commands: mpsc::UnboundedSender<ReactorCommand>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Reactor {
    /// Starts a reactor thread with `config`.
    pub fn start(config: Config) -> Result<Reactor, ReactorError> {
        let config = Arc::new(config);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ReactorError::Runtime)?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let event_loop = EventLoop::new(config.clone(), command_rx);

        let thread = std::thread::Builder::new()
            .name("reactor".to_string())
            .spawn(move || runtime.block_on(event_loop.run().instrument(info_span!("reactor"))))
            .map_err(ReactorError::Spawn)?;

        info!(network = %config.network, "started reactor");

        Ok(Reactor {
            config,
            commands,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Returns the reactor configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Opens an outbound connection to `addr`, which sends a `version` once
    /// it's established.
    ///
    /// Returns immediately. Use [`PeerConnection::wait_for_connect`] or
    /// [`PeerConnection::wait_for_verack`] to wait for the connection.
    pub fn connect<H>(&self, addr: SocketAddr, handler: H) -> Result<PeerConnection, ReactorError>
    where
        H: PeerHandler,
    {
        self.connect_with(addr, handler, ConnectOptions::default())
    }

    /// Opens an outbound connection to `addr` with `options`.
    pub fn connect_with<H>(
        &self,
        addr: SocketAddr,
        handler: H,
        options: ConnectOptions,
    ) -> Result<PeerConnection, ReactorError>
    where
        H: PeerHandler,
    {
        self.connect_boxed(addr, Box::new(handler), options)
    }

    /// Opens an outbound connection to `addr` with an already boxed handler.
    pub fn connect_boxed(
        &self,
        addr: SocketAddr,
        handler: Box<dyn PeerHandler>,
        options: ConnectOptions,
    ) -> Result<PeerConnection, ReactorError> {
        let info = PeerInfo {
            id: ConnectionId::next(),
            remote_addr: addr,
            direction: Direction::Outbound,
        };
        let (connection, handle) = Connection::new(
            info,
            self.config.clone(),
            handler,
            options.opening,
        );

        let timeout = options
            .connect_timeout
            .unwrap_or(self.config.connect_timeout);
        self.commands
            .send(ReactorCommand::Connect {
                connection,
                timeout,
            })
            .map_err(|_| ReactorError::Stopped)?;

        debug!(id = %info.id, %addr, "requested outbound connection");
        Ok(handle)
    }

    /// Listens on `addr`, making a handler with `factory` for each accepted
    /// connection.
    ///
    /// Blocks until the socket is bound.
    pub fn listen<F>(&self, addr: SocketAddr, factory: F) -> Result<Listener, ReactorError>
    where
        F: HandlerFactory,
    {
        let (accepted, accepted_rx) = std_mpsc::channel();
        let (bound, bound_rx) = oneshot::channel();

        self.commands
            .send(ReactorCommand::Listen {
                addr,
                factory: Box::new(factory),
                accepted,
                bound,
            })
            .map_err(|_| ReactorError::Stopped)?;

        let local_addr = bound_rx
            .blocking_recv()
            .map_err(|_| ReactorError::Stopped)?
            .map_err(|source| ReactorError::Listen { addr, source })?;

        Ok(Listener {
            local_addr,
            accepted: accepted_rx,
        })
    }

    /// Closes every connection and listener, and waits for the reactor
    /// thread to exit.
    ///
    /// Handlers see [`crate::CloseReason::Stopped`]. Stopping twice does
    /// nothing.
    pub fn stop(&self) {
        let thread = self
            .thread
            .lock()
            .expect("reactor thread mutex should be unpoisoned")
            .take();
        let Some(thread) = thread else {
            return;
        };

        // The loop also stops if it already exited and dropped the receiver.
        let _ = self.commands.send(ReactorCommand::Stop);

        if thread.join().is_err() {
            error!("reactor thread panicked");
        } else {
            info!("stopped reactor");
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The reactor state that lives on the reactor thread.
struct EventLoop {
    config: Arc<Config>,
    commands: mpsc::UnboundedReceiver<ReactorCommand>,

    /// Carries accepted sockets from listener tasks, so that listeners don't
    /// hold the command channel open.
    accepted_tx: mpsc::UnboundedSender<(Connection, TcpStream)>,
    accepted_rx: mpsc::UnboundedReceiver<(Connection, TcpStream)>,

    shutdown_tx: watch::Sender<bool>,
    connections: JoinSet<()>,
    listeners: JoinSet<()>,
}

impl EventLoop {
    fn new(config: Arc<Config>, commands: mpsc::UnboundedReceiver<ReactorCommand>) -> EventLoop {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        EventLoop {
            config,
            commands,
            accepted_tx,
            accepted_rx,
            shutdown_tx,
            connections: JoinSet::new(),
            listeners: JoinSet::new(),
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ReactorCommand::Connect { connection, timeout }) => {
                        self.spawn_connection(connection, Endpoint::Connect { timeout });
                    }
                    Some(ReactorCommand::Listen { addr, factory, accepted, bound }) => {
                        self.listen(addr, factory, accepted, bound).await;
                    }
                    Some(ReactorCommand::Stop) => {
                        debug!("stop requested");
                        break;
                    }
                    None => {
                        debug!("reactor handle dropped");
                        break;
                    }
                },
                Some((connection, stream)) = self.accepted_rx.recv() => {
                    self.spawn_connection(connection, Endpoint::Accepted(stream));
                }
                Some(joined) = self.connections.join_next(), if !self.connections.is_empty() => {
                    if let Err(error) = joined {
                        error!(%error, "connection task failed");
                    }
                }
            }
        }

        self.shut_down().await;
    }

    /// Signals every connection to close, and waits for them.
    async fn shut_down(&mut self) {
        self.listeners.abort_all();
        let _ = self.shutdown_tx.send(true);

        // Connections accepted but not yet spawned still need their close
        // reported.
        self.accepted_rx.close();
        while let Ok((connection, stream)) = self.accepted_rx.try_recv() {
            self.spawn_connection(connection, Endpoint::Accepted(stream));
        }

        while let Some(joined) = self.connections.join_next().await {
            if let Err(error) = joined {
                error!(%error, "connection task failed");
            }
        }
        while self.listeners.join_next().await.is_some() {}

        debug!("all connections closed");
    }

    fn spawn_connection(&mut self, connection: Connection, endpoint: Endpoint) {
        let info = connection.info();
        let span = info_span!(
            "peer",
            id = %info.id,
            addr = %info.remote_addr,
            direction = ?info.direction,
        );

        self.connections
            .spawn(connection.run(endpoint, self.shutdown_tx.subscribe()).instrument(span));
    }

    async fn listen(
        &mut self,
        addr: SocketAddr,
        factory: Box<dyn HandlerFactory>,
        accepted: std_mpsc::Sender<PeerConnection>,
        bound: oneshot::Sender<io::Result<SocketAddr>>,
    ) {
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(error) => {
                warn!(%addr, %error, "could not bind listener");
                let _ = bound.send(Err(error));
                return;
            }
        };

        let local_addr = match listener.local_addr() {
            Ok(local_addr) => local_addr,
            Err(error) => {
                let _ = bound.send(Err(error));
                return;
            }
        };
        info!(%local_addr, "listening for connections");

        let task = accept_loop(
            listener,
            factory,
            self.config.clone(),
            accepted,
            self.accepted_tx.clone(),
        );
        self.listeners
            .spawn(task.instrument(info_span!("listener", addr = %local_addr)));

        let _ = bound.send(Ok(local_addr));
    }
}

/// Accepts connections until aborted, or until the test thread drops its
/// [`Listener`].
async fn accept_loop(
    listener: TcpListener,
    mut factory: Box<dyn HandlerFactory>,
    config: Arc<Config>,
    accepted: std_mpsc::Sender<PeerConnection>,
    spawn_tx: mpsc::UnboundedSender<(Connection, TcpStream)>,
) {
    loop {
        let (stream, remote_addr) = accept_with_delay(|| listener.accept()).await;

        let info = PeerInfo {
            id: ConnectionId::next(),
            remote_addr,
            direction: Direction::Inbound,
        };
        let (connection, handle) = Connection::new(
            info,
            config.clone(),
            factory.make_handler(remote_addr),
            Opening::Silent,
        );
        debug!(id = %info.id, %remote_addr, "accepted connection");

        if spawn_tx.send((connection, stream)).is_err() {
            return;
        }
        if accepted.send(handle).is_err() {
            debug!("listener dropped, no longer accepting connections");
            return;
        }
    }
}

/// Calls `accept` until it succeeds, sleeping [`ACCEPT_ERROR_DELAY`] after
/// each error.
async fn accept_with_delay<F, Fut, T>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(error) => {
                debug!(%error, "accept failed");
                tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
            }
        }
    }
}
