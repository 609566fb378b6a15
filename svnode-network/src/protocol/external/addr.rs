//! Node address types and serialization for the Bitcoin wire format.
//!
//! [`AddrInVersion`] is the `addr` format without the timestamp field.

use std::{io, net::SocketAddr};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use svnode_chain::serialization::{
    ReadSvExt, SerializationError, SvDeserialize, SvSerialize, TrustedPreallocate, WriteSvExt,
    MAX_PROTOCOL_MESSAGE_LEN,
};

use super::types::PeerServices;

/// The format used for Bitcoin node addresses in `version` messages.
/// Contains a node address and services, without a last-seen time.
///
/// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#Network_address)
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct AddrInVersion {
    /// The services advertised for `addr`.
    pub services: PeerServices,

    /// The node's address. IPv4 addresses are serialized as IPv4-mapped
    /// IPv6 addresses, and read back as IPv4.
    pub addr: SocketAddr,
}

impl AddrInVersion {
    /// Returns a new `version` message address based on its fields.
    pub fn new(addr: impl Into<SocketAddr>, services: PeerServices) -> Self {
        Self {
            services,
            addr: addr.into(),
        }
    }
}

impl SvSerialize for AddrInVersion {
    fn sv_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_u64::<LittleEndian>(self.services.bits())?;
        writer.write_socket_addr(self.addr)
    }
}

impl SvDeserialize for AddrInVersion {
    fn sv_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        // Unknown service bits are kept, so the address round-trips.
        let services = PeerServices::from_bits_retain(reader.read_u64::<LittleEndian>()?);
        let addr = reader.read_socket_addr()?;

        Ok(AddrInVersion { services, addr })
    }
}

/// A gossiped node address from an `addr` message.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TimestampedAddr {
    /// When the sender last heard from this node, in seconds since the epoch.
    pub untrusted_last_seen: u32,

    /// The address and its advertised services.
    pub addr: AddrInVersion,
}

impl SvSerialize for TimestampedAddr {
    fn sv_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_u32::<LittleEndian>(self.untrusted_last_seen)?;
        self.addr.sv_serialize(writer)
    }
}

impl SvDeserialize for TimestampedAddr {
    fn sv_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(TimestampedAddr {
            untrusted_last_seen: reader.read_u32::<LittleEndian>()?,
            addr: AddrInVersion::sv_deserialize(reader)?,
        })
    }
}

/// A serialized timestamped address has a 4 byte time, 8 byte services, 16 byte IP addr, and 2 byte port
pub(super) const TIMESTAMPED_ADDR_SIZE: usize = 4 + 8 + 16 + 2;

impl TrustedPreallocate for TimestampedAddr {
    fn max_allocation() -> u64 {
        // A maximal Vec<TimestampedAddr> uses at least three bytes for its length.
        ((MAX_PROTOCOL_MESSAGE_LEN - 3) / TIMESTAMPED_ADDR_SIZE) as u64
    }
}
