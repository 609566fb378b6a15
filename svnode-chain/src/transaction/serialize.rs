//! Contains impls of `SvSerialize`, `SvDeserialize` for transactions.

use std::io;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{
    serialization::{
        SerializationError, SvDeserialize, SvSerialize, TrustedPreallocate,
        MAX_PROTOCOL_MESSAGE_LEN,
    },
    transparent,
};

use super::Transaction;

/// The smallest possible transaction: version, two empty lists and a lock time.
pub(crate) const MIN_TRANSACTION_SIZE: u64 = 4 + 1 + 1 + 4;

impl SvSerialize for Transaction {
    fn sv_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_i32::<LittleEndian>(self.version)?;
        self.inputs.sv_serialize(&mut writer)?;
        self.outputs.sv_serialize(&mut writer)?;
        writer.write_u32::<LittleEndian>(self.lock_time)?;
        Ok(())
    }
}

impl SvDeserialize for Transaction {
    fn sv_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let version = reader.read_i32::<LittleEndian>()?;
        let inputs = Vec::<transparent::Input>::sv_deserialize(&mut reader)?;
        let outputs = Vec::<transparent::Output>::sv_deserialize(&mut reader)?;
        let lock_time = reader.read_u32::<LittleEndian>()?;

        Ok(Transaction::new(version, inputs, outputs, lock_time))
    }
}

impl TrustedPreallocate for Transaction {
    fn max_allocation() -> u64 {
        MAX_PROTOCOL_MESSAGE_LEN as u64 / MIN_TRANSACTION_SIZE
    }
}
