//! Association ids and stream types.

use std::{convert::TryFrom, fmt, io};

use byteorder::{ReadBytesExt, WriteBytesExt};
use uuid::Uuid;

use svnode_chain::serialization::{
    sv_serialize_bytes, SerializationError, SvDeserialize, SvDeserializeInto, SvSerialize,
};

/// The only association id type the protocol defines: a 16-byte UUID.
const ASSOCIATION_ID_TYPE_UUID: u8 = 0;

/// The serialized length of a UUID association id, including its type byte.
const UUID_ASSOCIATION_ID_LEN: usize = 1 + 16;

/// Groups the TCP connections of one logical peer.
///
/// The node mints a fresh id when a peer's `version` carries an empty one,
/// and each additional stream names it in `createstream`.
///
/// On the wire, an id is a byte string holding a type byte (`0` for UUIDs)
/// and the UUID bytes.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct AssociationId(Uuid);

impl AssociationId {
    /// Returns a new random id.
    pub fn new_random() -> AssociationId {
        AssociationId(Uuid::new_v4())
    }

    /// Returns the id with the given UUID bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> AssociationId {
        AssociationId(Uuid::from_bytes(bytes))
    }

    /// Returns the UUID bytes of this id.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Returns the wire form: type byte followed by the UUID.
    fn to_wire_bytes(self) -> [u8; UUID_ASSOCIATION_ID_LEN] {
        let mut bytes = [0; UUID_ASSOCIATION_ID_LEN];
        bytes[0] = ASSOCIATION_ID_TYPE_UUID;
        bytes[1..].copy_from_slice(self.as_bytes());
        bytes
    }

    /// Parses the wire form, which must not be empty.
    fn from_wire_bytes(bytes: &[u8]) -> Result<AssociationId, SerializationError> {
        match bytes.split_first() {
            Some((&ASSOCIATION_ID_TYPE_UUID, uuid)) => {
                let uuid: [u8; 16] = uuid
                    .try_into()
                    .map_err(|_| SerializationError::Parse("association id has a bad length"))?;
                Ok(AssociationId::from_bytes(uuid))
            }
            Some(_) => Err(SerializationError::Parse("unknown association id type")),
            None => Err(SerializationError::Parse("association id is empty")),
        }
    }

    /// Writes an optional id as a byte string, empty for `None`.
    pub(crate) fn write_optional<W: io::Write>(
        id: Option<AssociationId>,
        writer: W,
    ) -> Result<(), io::Error> {
        match id {
            Some(id) => sv_serialize_bytes(&id.to_wire_bytes(), writer),
            None => sv_serialize_bytes(&[], writer),
        }
    }

    /// Reads an optional id from a byte string, `None` if it is empty.
    pub(crate) fn read_optional<R: io::Read>(
        reader: R,
    ) -> Result<Option<AssociationId>, SerializationError> {
        let bytes: Vec<u8> = reader.sv_deserialize_into()?;
        if bytes.is_empty() {
            Ok(None)
        } else {
            AssociationId::from_wire_bytes(&bytes).map(Some)
        }
    }
}

impl fmt::Display for AssociationId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "UUID-{}", self.0)
    }
}

impl fmt::Debug for AssociationId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("AssociationId")
            .field(&self.0.to_string())
            .finish()
    }
}

impl SvSerialize for AssociationId {
    fn sv_serialize<W: io::Write>(&self, writer: W) -> Result<(), io::Error> {
        AssociationId::write_optional(Some(*self), writer)
    }
}

impl SvDeserialize for AssociationId {
    fn sv_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        AssociationId::read_optional(reader)?
            .ok_or(SerializationError::Parse("association id is empty"))
    }
}

/// The association id field at the end of a `version` message.
///
/// Peers that predate associations don't send the field at all. A peer that
/// wants the node to mint an id sends an empty byte string.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum AssociationIdField {
    /// The field is absent.
    #[default]
    Omitted,
    /// The field is present and empty.
    Null,
    /// The field carries an id.
    Id(AssociationId),
}

impl AssociationIdField {
    /// Returns the carried id, if any.
    pub fn id(&self) -> Option<AssociationId> {
        match self {
            AssociationIdField::Id(id) => Some(*id),
            AssociationIdField::Omitted | AssociationIdField::Null => None,
        }
    }
}

impl From<Option<AssociationId>> for AssociationIdField {
    fn from(id: Option<AssociationId>) -> Self {
        match id {
            Some(id) => AssociationIdField::Id(id),
            None => AssociationIdField::Null,
        }
    }
}

/// The role of one stream within an association.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[repr(u8)]
pub enum StreamType {
    /// Not a usable stream.
    Unknown = 0,
    /// The stream every association starts with.
    General = 1,
    /// The first additional stream.
    Data1 = 2,
    /// The second additional stream.
    Data2 = 3,
    /// The third additional stream.
    Data3 = 4,
    /// The fourth additional stream.
    Data4 = 5,
}

impl StreamType {
    /// Every stream type a `createstream` may request, in order.
    pub const USABLE: [StreamType; 5] = [
        StreamType::General,
        StreamType::Data1,
        StreamType::Data2,
        StreamType::Data3,
        StreamType::Data4,
    ];

    /// Returns the wire value of this stream type.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for StreamType {
    type Error = SerializationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(StreamType::Unknown),
            1 => Ok(StreamType::General),
            2 => Ok(StreamType::Data1),
            3 => Ok(StreamType::Data2),
            4 => Ok(StreamType::Data3),
            5 => Ok(StreamType::Data4),
            _ => Err(SerializationError::Parse("stream type out of range")),
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            StreamType::Unknown => "UNKNOWN",
            StreamType::General => "GENERAL",
            StreamType::Data1 => "DATA1",
            StreamType::Data2 => "DATA2",
            StreamType::Data3 => "DATA3",
            StreamType::Data4 => "DATA4",
        };
        f.write_str(name)
    }
}

impl SvSerialize for StreamType {
    fn sv_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_u8(self.as_u8())
    }
}

impl SvDeserialize for StreamType {
    fn sv_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        StreamType::try_from(reader.read_u8()?)
    }
}
