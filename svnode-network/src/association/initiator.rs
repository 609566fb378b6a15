//! The initiator side of an association.

use std::{collections::BTreeMap, net::SocketAddr, sync::Arc};

use crate::{
    peer::{DefaultHandler, PeerConnection, PeerError, PeerHandler},
    protocol::external::{
        AssociationId, AssociationIdField, Command, CreateStream, Message, StreamType,
    },
    reactor::{ConnectOptions, Reactor},
};

use super::{AssociationError, StreamPolicy};

/// The setup state of one stream type within an association.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StreamState {
    /// No stream of this type was requested.
    NoStreams,
    /// A `createstrm` was sent, and the peer hasn't answered yet.
    Negotiating,
    /// The peer acknowledged the stream, and it carries messages.
    Established,
    /// The peer rejected the stream, or closed it before answering.
    Rejected {
        /// The peer's reject reason, or the close reason.
        reason: String,
    },
}

#[derive(Debug)]
struct Stream {
    state: StreamState,
    connection: Option<PeerConnection>,
}

/// One logical connection to a node, spread over several TCP streams.
///
/// The `GENERAL` stream is opened with the association. Each further stream
/// the policy uses is opened with a `createstrm`, and carries messages once
/// the node acknowledges it. Messages are routed by the policy, falling back
/// to `GENERAL` when the policy's stream isn't established.
#[derive(Debug)]
pub struct Association {
    id: AssociationId,
    remote_addr: SocketAddr,
    policy: Arc<dyn StreamPolicy>,
    general: PeerConnection,
    streams: BTreeMap<StreamType, Stream>,
}

impl Association {
    /// Opens an association to `addr`, with every stream `policy` uses.
    ///
    /// Each stream gets a [`DefaultHandler`].
    pub fn connect(
        reactor: &Reactor,
        addr: SocketAddr,
        policy: Arc<dyn StreamPolicy>,
    ) -> Result<Association, AssociationError> {
        Association::connect_with(reactor, addr, policy, |_| Box::new(DefaultHandler))
    }

    /// Opens an association to `addr`, with every stream `policy` uses, and
    /// a handler from `make_handler` for each stream.
    ///
    /// Blocks until the handshake on `GENERAL` completes, then until the node
    /// answers each `createstrm`. Fails if the node rejects any stream.
    pub fn connect_with<F>(
        reactor: &Reactor,
        addr: SocketAddr,
        policy: Arc<dyn StreamPolicy>,
        mut make_handler: F,
    ) -> Result<Association, AssociationError>
    where
        F: FnMut(StreamType) -> Box<dyn PeerHandler>,
    {
        let general = reactor.connect_boxed(
            addr,
            make_handler(StreamType::General),
            ConnectOptions::version(AssociationIdField::Null),
        )?;
        general.wait_for_verack()?;

        let id = general
            .state()
            .remote_version
            .as_ref()
            .and_then(|version| version.association_id.id())
            .ok_or(AssociationError::NoAssociationId)?;
        general
            .observer()
            .update(|state| state.association_id = Some(id));

        let mut association = Association {
            id,
            remote_addr: addr,
            policy: policy.clone(),
            general,
            streams: BTreeMap::new(),
        };

        for &stream_type in policy.streams() {
            if stream_type != StreamType::General {
                association.add_stream(reactor, stream_type, make_handler(stream_type))?;
            }
        }

        info!(
            %id,
            %addr,
            policy = policy.name(),
            streams = policy.streams().len(),
            "association established",
        );

        Ok(association)
    }

    /// Opens a `stream_type` stream with a `createstrm`, and blocks until the
    /// node answers.
    ///
    /// A rejected request leaves an already established stream of the same
    /// type in place.
    pub fn add_stream(
        &mut self,
        reactor: &Reactor,
        stream_type: StreamType,
        handler: Box<dyn PeerHandler>,
    ) -> Result<&PeerConnection, AssociationError> {
        let replacing = self.stream_state(stream_type) == StreamState::Established;
        if !replacing {
            self.streams.insert(
                stream_type,
                Stream {
                    state: StreamState::Negotiating,
                    connection: None,
                },
            );
        }

        let create = CreateStream {
            association_id: Some(self.id),
            stream_type: stream_type.as_u8(),
            policy: self.policy.name().to_string(),
        };
        debug!(id = %self.id, %stream_type, "requesting stream");
        let connection = reactor.connect_boxed(
            self.remote_addr,
            handler,
            ConnectOptions::create_stream(create),
        )?;

        let answered = connection.wait_until(|state| {
            state.count(Command::StreamAck) > 0 || state.count(Command::Reject) > 0
        });

        let failure = match answered {
            Ok(()) => {
                let state = connection.state();
                match state.last(Command::Reject) {
                    Some(Message::Reject(reject)) if state.count(Command::StreamAck) == 0 => {
                        Some((
                            reject.reason.clone(),
                            AssociationError::StreamRejected {
                                stream_type,
                                reason: reject.reason.clone(),
                            },
                        ))
                    }
                    _ => None,
                }
            }
            Err(PeerError::ConnectionClosed(reason)) => Some((
                reason.to_string(),
                AssociationError::StreamClosed { stream_type },
            )),
            Err(error) => {
                let _ = connection.disconnect();
                if !replacing {
                    self.streams.remove(&stream_type);
                }
                return Err(error.into());
            }
        };

        if let Some((reason, error)) = failure {
            warn!(id = %self.id, %stream_type, %reason, "stream setup failed");
            // The node closes rejected streams itself, this only covers
            // peers that don't.
            let _ = connection.disconnect();
            if !replacing {
                self.streams.insert(
                    stream_type,
                    Stream {
                        state: StreamState::Rejected { reason },
                        connection: None,
                    },
                );
            }
            return Err(error);
        }

        debug!(id = %self.id, %stream_type, "stream established");
        let stream = self.streams.entry(stream_type).or_insert(Stream {
            state: StreamState::Established,
            connection: None,
        });
        stream.state = StreamState::Established;

        Ok(stream.connection.insert(connection))
    }

    /// Sends `msg` on the stream the policy picks for it, or on `GENERAL` if
    /// that stream isn't established. Returns the stream used.
    pub fn send_message(&self, msg: Message) -> Result<StreamType, AssociationError> {
        let wanted = self.policy.stream_for(msg.command());
        let (stream_type, connection) = match self.connection(wanted) {
            Some(connection) => (wanted, connection),
            None => (StreamType::General, &self.general),
        };

        trace!(%msg, %stream_type, "routing message");
        connection.send(msg)?;

        Ok(stream_type)
    }

    /// Returns the setup state of the `stream_type` stream.
    pub fn stream_state(&self, stream_type: StreamType) -> StreamState {
        if stream_type == StreamType::General {
            return StreamState::Established;
        }

        self.streams
            .get(&stream_type)
            .map_or(StreamState::NoStreams, |stream| stream.state.clone())
    }

    /// Returns the connection of the established `stream_type` stream.
    pub fn connection(&self, stream_type: StreamType) -> Option<&PeerConnection> {
        if stream_type == StreamType::General {
            return Some(&self.general);
        }

        self.streams
            .get(&stream_type)
            .filter(|stream| stream.state == StreamState::Established)
            .and_then(|stream| stream.connection.as_ref())
    }

    /// Returns the connection of the `GENERAL` stream.
    pub fn general(&self) -> &PeerConnection {
        &self.general
    }

    /// Returns the association id the node minted.
    pub fn id(&self) -> AssociationId {
        self.id
    }

    /// Returns the routing policy.
    pub fn policy(&self) -> &dyn StreamPolicy {
        self.policy.as_ref()
    }

    /// Closes every stream after its queued messages are sent.
    pub fn disconnect(&self) {
        let connections = std::iter::once(&self.general)
            .chain(self.streams.values().filter_map(|s| s.connection.as_ref()));

        for connection in connections {
            // Closed connections have nothing left to flush.
            let _ = connection.disconnect();
        }
    }
}
