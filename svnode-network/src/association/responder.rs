//! The node side of association setup.

use std::{
    collections::{BTreeSet, HashMap},
    convert::TryFrom,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    peer::{CloseReason, PeerContext, PeerHandler},
    protocol::external::{
        codec::CodecError, AssociationId, AssociationIdField, Command, CreateStream, Message,
        Reject, RejectReason, StreamAck, StreamType, VersionMessage,
    },
};

use super::{policy_by_name, StreamSetupError};

/// The associations a node knows, and the streams bound in each.
///
/// Clones share the same registry, so every connection a listener accepts
/// can see the associations made on the others.
#[derive(Clone, Debug, Default)]
pub struct AssociationRegistry {
    associations: Arc<Mutex<HashMap<AssociationId, BTreeSet<StreamType>>>>,
}

impl AssociationRegistry {
    /// Returns an empty registry.
    pub fn new() -> AssociationRegistry {
        AssociationRegistry::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AssociationId, BTreeSet<StreamType>>> {
        self.associations
            .lock()
            .expect("association registry mutex should be unpoisoned")
    }

    /// Creates an association with a fresh id, bound to a `GENERAL` stream.
    pub fn mint(&self) -> AssociationId {
        let id = AssociationId::new_random();
        self.register(id);
        id
    }

    /// Creates an association with `id`, bound to a `GENERAL` stream.
    ///
    /// Registering a known id does nothing.
    pub fn register(&self, id: AssociationId) {
        self.lock()
            .entry(id)
            .or_insert_with(|| BTreeSet::from([StreamType::General]));
    }

    /// Returns `true` if the association `id` exists.
    pub fn contains(&self, id: AssociationId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Returns the streams bound in the association `id`.
    pub fn streams(&self, id: AssociationId) -> Option<Vec<StreamType>> {
        self.lock()
            .get(&id)
            .map(|streams| streams.iter().copied().collect())
    }

    /// Returns the number of associations.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if there are no associations.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Validates `create`, and binds the requested stream if it is valid.
    ///
    /// Checks run in a fixed order, and the first failure is returned: a
    /// missing id, an unknown id, a stream type out of range, a stream type
    /// already bound, then an unknown policy name.
    pub fn create_stream(
        &self,
        create: &CreateStream,
    ) -> Result<(AssociationId, StreamType), StreamSetupError> {
        let id = create
            .association_id
            .ok_or(StreamSetupError::BadlyFormatted)?;

        let mut associations = self.lock();
        let streams = associations
            .get_mut(&id)
            .ok_or(StreamSetupError::UnknownAssociation)?;

        let stream_type = match StreamType::try_from(create.stream_type) {
            Ok(StreamType::Unknown) | Err(_) => {
                return Err(StreamSetupError::StreamTypeOutOfRange);
            }
            Ok(stream_type) => stream_type,
        };

        if streams.contains(&stream_type) {
            return Err(StreamSetupError::DuplicateStream);
        }
        if policy_by_name(&create.policy).is_none() {
            return Err(StreamSetupError::UnknownPolicy);
        }

        streams.insert(stream_type);
        Ok((id, stream_type))
    }

    /// Releases the `stream_type` stream of association `id`.
    ///
    /// Releasing `GENERAL` removes the whole association.
    pub fn release(&self, id: AssociationId, stream_type: StreamType) {
        let mut associations = self.lock();
        if stream_type == StreamType::General {
            associations.remove(&id);
        } else if let Some(streams) = associations.get_mut(&id) {
            streams.remove(&stream_type);
        }
    }
}

/// A handler that plays the node's part in association setup.
///
/// Give one to each connection a listener accepts, all sharing one
/// [`AssociationRegistry`]:
///
/// - a `version` with an empty association id creates an association with a
///   fresh id, which is returned in the reply `version`;
/// - a `version` with an id registers that id;
/// - a `createstrm` is validated by [`AssociationRegistry::create_stream`],
///   and answered with `streamack`, or with a `reject` after which the
///   connection is closed.
///
/// A connection binds at most one stream: a second `createstrm` on it, or a
/// `createstrm` on a `GENERAL` connection, is rejected as badly formatted.
/// Closing a connection releases its stream. Closing the `GENERAL`
/// connection removes the association.
#[derive(Debug)]
pub struct StreamResponder {
    registry: AssociationRegistry,
    bound: Option<(AssociationId, StreamType)>,
}

impl StreamResponder {
    /// Returns a responder that shares `registry`.
    pub fn new(registry: AssociationRegistry) -> StreamResponder {
        StreamResponder {
            registry,
            bound: None,
        }
    }
}

impl PeerHandler for StreamResponder {
    fn on_version(
        &mut self,
        ctx: &mut PeerContext<'_>,
        version: VersionMessage,
    ) -> Result<(), CodecError> {
        let id = match version.association_id {
            AssociationIdField::Omitted => None,
            AssociationIdField::Null => Some(self.registry.mint()),
            AssociationIdField::Id(id) => {
                self.registry.register(id);
                Some(id)
            }
        };

        let reply_association = match id {
            Some(id) => {
                debug!(%id, "peer joined association");
                self.bound = Some((id, StreamType::General));
                AssociationIdField::Id(id)
            }
            None => AssociationIdField::Omitted,
        };

        ctx.answer_version_with(&version, reply_association)?;
        if let Some(id) = id {
            ctx.set_association_id(id);
        }

        Ok(())
    }

    fn on_createstream(
        &mut self,
        ctx: &mut PeerContext<'_>,
        create: CreateStream,
    ) -> Result<(), CodecError> {
        // One stream per connection, and a `GENERAL` connection can't be rebound.
        let result = match self.bound {
            Some(_) => Err(StreamSetupError::BadlyFormatted),
            None => self.registry.create_stream(&create),
        };

        match result {
            Ok((id, stream_type)) => {
                debug!(%id, %stream_type, policy = %create.policy, "accepted stream");
                self.bound = Some((id, stream_type));
                ctx.set_association_id(id);
                ctx.send(Message::StreamAck(StreamAck {
                    association_id: Some(id),
                    stream_type: create.stream_type,
                }))
            }
            Err(error) => {
                debug!(%error, ?create, "rejected stream");
                ctx.send(Message::Reject(Reject {
                    message: Command::CreateStream.to_string(),
                    ccode: RejectReason::StreamSetup,
                    reason: error.to_string(),
                    data: None,
                }))?;
                ctx.disconnect();
                Ok(())
            }
        }
    }

    fn on_close(&mut self, _ctx: &mut PeerContext<'_>, _reason: &CloseReason) {
        if let Some((id, stream_type)) = self.bound.take() {
            self.registry.release(id, stream_type);
        }
    }
}
