//! Serializes and deserializes transparent data.

use std::io;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{
    serialization::{
        ReadSvExt, SerializationError, SvDeserialize, SvSerialize, TrustedPreallocate,
        MAX_PROTOCOL_MESSAGE_LEN,
    },
    transaction,
};

use super::{Input, OutPoint, Output, Script};

/// The size of a serialized outpoint: a transaction hash and an output index.
pub(crate) const OUTPOINT_SIZE: u64 = 32 + 4;

/// The smallest possible input: an outpoint, an empty script and a sequence number.
pub(crate) const MIN_INPUT_SIZE: u64 = OUTPOINT_SIZE + 1 + 4;

/// The smallest possible output: a value and an empty script.
pub(crate) const MIN_OUTPUT_SIZE: u64 = 8 + 1;

impl SvSerialize for OutPoint {
    fn sv_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_all(&self.hash.0[..])?;
        writer.write_u32::<LittleEndian>(self.index)?;
        Ok(())
    }
}

impl SvDeserialize for OutPoint {
    fn sv_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(OutPoint {
            hash: transaction::Hash(reader.read_32_bytes()?),
            index: reader.read_u32::<LittleEndian>()?,
        })
    }
}

impl SvSerialize for Input {
    fn sv_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.outpoint.sv_serialize(&mut writer)?;
        self.unlock_script.sv_serialize(&mut writer)?;
        writer.write_u32::<LittleEndian>(self.sequence)?;
        Ok(())
    }
}

impl SvDeserialize for Input {
    fn sv_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Input {
            outpoint: OutPoint::sv_deserialize(&mut reader)?,
            unlock_script: Script::sv_deserialize(&mut reader)?,
            sequence: reader.read_u32::<LittleEndian>()?,
        })
    }
}

impl SvSerialize for Output {
    fn sv_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_i64::<LittleEndian>(self.value)?;
        self.lock_script.sv_serialize(&mut writer)?;
        Ok(())
    }
}

impl SvDeserialize for Output {
    fn sv_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Output {
            value: reader.read_i64::<LittleEndian>()?,
            lock_script: Script::sv_deserialize(&mut reader)?,
        })
    }
}

impl TrustedPreallocate for Input {
    fn max_allocation() -> u64 {
        MAX_PROTOCOL_MESSAGE_LEN as u64 / MIN_INPUT_SIZE
    }
}

impl TrustedPreallocate for Output {
    fn max_allocation() -> u64 {
        MAX_PROTOCOL_MESSAGE_LEN as u64 / MIN_OUTPUT_SIZE
    }
}

impl TrustedPreallocate for OutPoint {
    fn max_allocation() -> u64 {
        MAX_PROTOCOL_MESSAGE_LEN as u64 / OUTPOINT_SIZE
    }
}
