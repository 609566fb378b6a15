//! Inventory items for the Bitcoin protocol.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use svnode_chain::{
    block,
    serialization::{
        ReadSvExt, SerializationError, SvDeserialize, SvDeserializeInto, SvSerialize,
        TrustedPreallocate, MAX_PROTOCOL_MESSAGE_LEN,
    },
    transaction,
};

/// An inventory hash which refers to some advertised or requested data.
///
/// Bitcoin calls this an "inventory vector" but it is just a typed hash, not a
/// container, so we do not use that term to avoid confusion with `Vec<T>`.
///
/// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#Inventory_Vectors)
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum InventoryHash {
    /// An error.
    ///
    /// The Bitcoin wiki just says "Any data of with this number may be ignored",
    /// so we don't include a typed hash.
    Error,
    /// A hash of a transaction.
    Tx(transaction::Hash),
    /// A hash of a block.
    Block(block::Hash),
    /// A hash of a filtered block.
    ///
    /// Only used in `getdata`, asking for a `merkleblock` reply. This only
    /// works if a bloom filter has been set.
    FilteredBlock(block::Hash),
    /// A hash of a block, requested as a `cmpctblock` (BIP 152).
    CompactBlock(block::Hash),
    /// A hash of a transaction, requested as a `datareftx` with its proof.
    DataRefTx(transaction::Hash),
}

impl InventoryHash {
    /// Returns the serialized network protocol code for the current variant.
    fn code(&self) -> u32 {
        match self {
            InventoryHash::Error => 0,
            InventoryHash::Tx(_tx_id) => 1,
            InventoryHash::Block(_hash) => 2,
            InventoryHash::FilteredBlock(_hash) => 3,
            InventoryHash::CompactBlock(_hash) => 4,
            InventoryHash::DataRefTx(_tx_id) => 5,
        }
    }
}

impl From<transaction::Hash> for InventoryHash {
    fn from(tx: transaction::Hash) -> InventoryHash {
        InventoryHash::Tx(tx)
    }
}

impl From<block::Hash> for InventoryHash {
    fn from(hash: block::Hash) -> InventoryHash {
        InventoryHash::Block(hash)
    }
}

impl SvSerialize for InventoryHash {
    fn sv_serialize<W: Write>(&self, mut writer: W) -> Result<(), std::io::Error> {
        writer.write_u32::<LittleEndian>(self.code())?;
        match self {
            InventoryHash::Error => writer.write_all(&[0; 32]),
            InventoryHash::Tx(tx_id) => tx_id.sv_serialize(writer),
            InventoryHash::Block(hash) => hash.sv_serialize(writer),
            InventoryHash::FilteredBlock(hash) => hash.sv_serialize(writer),
            InventoryHash::CompactBlock(hash) => hash.sv_serialize(writer),
            InventoryHash::DataRefTx(tx_id) => tx_id.sv_serialize(writer),
        }
    }
}

impl SvDeserialize for InventoryHash {
    fn sv_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        let code = reader.read_u32::<LittleEndian>()?;
        match code {
            0 => {
                // ignore the standard 32-byte error code
                let _bytes = reader.read_32_bytes()?;
                Ok(InventoryHash::Error)
            }

            1 => Ok(InventoryHash::Tx(reader.sv_deserialize_into()?)),
            2 => Ok(InventoryHash::Block(reader.sv_deserialize_into()?)),
            3 => Ok(InventoryHash::FilteredBlock(reader.sv_deserialize_into()?)),
            4 => Ok(InventoryHash::CompactBlock(reader.sv_deserialize_into()?)),
            5 => Ok(InventoryHash::DataRefTx(reader.sv_deserialize_into()?)),

            _ => Err(SerializationError::Parse("invalid inventory code")),
        }
    }
}

/// The minimum serialized size of an [`InventoryHash`].
pub(crate) const MIN_INV_HASH_SIZE: usize = 36;

impl TrustedPreallocate for InventoryHash {
    fn max_allocation() -> u64 {
        // An Inventory hash takes at least 36 bytes, and we reserve at least one byte for the
        // Vector length so we can never receive more than ((MAX_PROTOCOL_MESSAGE_LEN - 1) / 36) in
        // a single message
        ((MAX_PROTOCOL_MESSAGE_LEN - 1) / MIN_INV_HASH_SIZE) as u64
    }
}
