//! Serialization and deserialization for blocks and headers.

use std::io;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{
    serialization::{
        ReadSvExt, SerializationError, SvDeserialize, SvDeserializeInto, SvSerialize,
        TrustedPreallocate, WriteSvExt, MAX_PROTOCOL_MESSAGE_LEN,
    },
    transaction::Transaction,
};

use super::{merkle, Block, CountedHeader, Hash, Header};

/// The number of bytes in a serialized block header.
pub const BLOCK_HEADER_LENGTH: usize = 4 + 32 + 32 + 4 + 4 + 4;

static_assertions::const_assert_eq!(BLOCK_HEADER_LENGTH, 80);

impl SvSerialize for Header {
    fn sv_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_i32::<LittleEndian>(self.version())?;
        self.previous_block_hash().sv_serialize(&mut writer)?;
        writer.write_all(&self.merkle_root().0[..])?;
        writer.write_u32::<LittleEndian>(self.time())?;
        writer.write_u32::<LittleEndian>(self.difficulty_threshold())?;
        writer.write_u32::<LittleEndian>(self.nonce())?;
        Ok(())
    }
}

impl SvDeserialize for Header {
    fn sv_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Header::new(
            reader.read_i32::<LittleEndian>()?,
            Hash::sv_deserialize(&mut reader)?,
            merkle::Root(reader.read_32_bytes()?),
            reader.read_u32::<LittleEndian>()?,
            reader.read_u32::<LittleEndian>()?,
            reader.read_u32::<LittleEndian>()?,
        ))
    }
}

impl SvSerialize for CountedHeader {
    fn sv_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.header.sv_serialize(&mut writer)?;
        writer.write_compactsize(self.transaction_count)?;
        Ok(())
    }
}

impl SvDeserialize for CountedHeader {
    fn sv_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(CountedHeader {
            header: (&mut reader).sv_deserialize_into()?,
            transaction_count: reader.read_compact_u64()?,
        })
    }
}

impl SvSerialize for Block {
    fn sv_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.header.sv_serialize(&mut writer)?;
        self.transactions.sv_serialize(&mut writer)?;
        Ok(())
    }
}

impl SvDeserialize for Block {
    fn sv_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Block {
            header: (&mut reader).sv_deserialize_into()?,
            transactions: Vec::<std::sync::Arc<Transaction>>::sv_deserialize(&mut reader)?,
        })
    }
}

impl TrustedPreallocate for Header {
    fn max_allocation() -> u64 {
        MAX_PROTOCOL_MESSAGE_LEN as u64 / BLOCK_HEADER_LENGTH as u64
    }
}

/// A counted header takes at least one extra byte for its transaction count.
impl TrustedPreallocate for CountedHeader {
    fn max_allocation() -> u64 {
        MAX_PROTOCOL_MESSAGE_LEN as u64 / (BLOCK_HEADER_LENGTH as u64 + 1)
    }
}
