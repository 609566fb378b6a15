//! Compact block relay payloads, see [BIP 152].
//!
//! Transaction indexes in `cmpctblock` and `getblocktxn` are differentially
//! encoded on the wire: each one is sent as its distance from the previous
//! index plus one. The types here hold absolute indexes.
//!
//! [BIP 152]: https://github.com/bitcoin/bips/blob/master/bip-0152.mediawiki

use std::{io, sync::Arc};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use svnode_chain::{
    block::{self, Header},
    serialization::{
        ReadSvExt, SerializationError, SvDeserialize, SvDeserializeInto, SvSerialize,
        TrustedPreallocate, WriteSvExt, MAX_PROTOCOL_MESSAGE_LEN,
    },
    transaction::Transaction,
};

/// The number of indexes preallocated before any of them has been read.
const MAX_PREALLOCATED_INDEXES: usize = 1024;

/// A 6-byte short transaction id, derived from the txid with SipHash.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct ShortId(pub [u8; 6]);

impl SvSerialize for ShortId {
    fn sv_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_all(&self.0)
    }
}

impl SvDeserialize for ShortId {
    fn sv_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let mut bytes = [0; 6];
        reader.read_exact(&mut bytes)?;
        Ok(ShortId(bytes))
    }
}

impl TrustedPreallocate for ShortId {
    fn max_allocation() -> u64 {
        ((MAX_PROTOCOL_MESSAGE_LEN - 1) / 6) as u64
    }
}

/// A transaction sent in full inside a `cmpctblock`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PrefilledTransaction {
    /// The position of the transaction in the block.
    pub index: u64,
    /// The transaction.
    pub tx: Arc<Transaction>,
}

/// The payload of a `cmpctblock` message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HeaderAndShortIds {
    /// The block header.
    pub header: Header,
    /// The nonce keying the short id hash.
    pub nonce: u64,
    /// Short ids of the transactions the receiver is expected to have.
    pub short_ids: Vec<ShortId>,
    /// Transactions sent in full, ordered by index.
    pub prefilled_txs: Vec<PrefilledTransaction>,
}

/// The payload of a `getblocktxn` message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockTransactionsRequest {
    /// The block the transactions belong to.
    pub block_hash: block::Hash,
    /// The requested positions, strictly increasing.
    pub indexes: Vec<u64>,
}

/// The payload of a `blocktxn` message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockTransactions {
    /// The block the transactions belong to.
    pub block_hash: block::Hash,
    /// The requested transactions, in request order.
    pub transactions: Vec<Arc<Transaction>>,
}

/// Tracks the previous absolute index while encoding or decoding a
/// differential index list.
#[derive(Default)]
struct DifferentialIndexes {
    next_min: Option<u64>,
    finished: bool,
}

impl DifferentialIndexes {
    /// Returns the wire value for `index`.
    fn encode(&mut self, index: u64) -> Result<u64, io::Error> {
        let min = self.next_min.unwrap_or(0);
        if self.finished || index < min {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "compact block indexes must be strictly increasing",
            ));
        }
        self.advance(index);
        Ok(index - min)
    }

    /// Returns the absolute index for the wire value `diff`.
    fn decode(&mut self, diff: u64) -> Result<u64, SerializationError> {
        let index = if self.finished {
            None
        } else {
            self.next_min.unwrap_or(0).checked_add(diff)
        }
        .ok_or(SerializationError::Parse("differential index overflow"))?;
        self.advance(index);
        Ok(index)
    }

    fn advance(&mut self, index: u64) {
        match index.checked_add(1) {
            Some(next) => self.next_min = Some(next),
            None => self.finished = true,
        }
    }
}

impl SvSerialize for HeaderAndShortIds {
    fn sv_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.header.sv_serialize(&mut writer)?;
        writer.write_u64::<LittleEndian>(self.nonce)?;
        self.short_ids.sv_serialize(&mut writer)?;

        writer.write_compactsize(self.prefilled_txs.len() as u64)?;
        let mut indexes = DifferentialIndexes::default();
        for prefilled in &self.prefilled_txs {
            writer.write_compactsize(indexes.encode(prefilled.index)?)?;
            prefilled.tx.sv_serialize(&mut writer)?;
        }
        Ok(())
    }
}

impl SvDeserialize for HeaderAndShortIds {
    fn sv_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let header = (&mut reader).sv_deserialize_into()?;
        let nonce = reader.read_u64::<LittleEndian>()?;
        let short_ids = (&mut reader).sv_deserialize_into()?;

        let count: usize = reader.read_compactsize()?.try_into()?;
        let mut prefilled_txs = Vec::with_capacity(count.min(MAX_PREALLOCATED_INDEXES));
        let mut indexes = DifferentialIndexes::default();
        for _ in 0..count {
            let index = indexes.decode(reader.read_compact_u64()?)?;
            let tx = (&mut reader).sv_deserialize_into()?;
            prefilled_txs.push(PrefilledTransaction { index, tx });
        }

        Ok(HeaderAndShortIds {
            header,
            nonce,
            short_ids,
            prefilled_txs,
        })
    }
}

impl SvSerialize for BlockTransactionsRequest {
    fn sv_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.block_hash.sv_serialize(&mut writer)?;

        writer.write_compactsize(self.indexes.len() as u64)?;
        let mut indexes = DifferentialIndexes::default();
        for index in &self.indexes {
            writer.write_compactsize(indexes.encode(*index)?)?;
        }
        Ok(())
    }
}

impl SvDeserialize for BlockTransactionsRequest {
    fn sv_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let block_hash = (&mut reader).sv_deserialize_into()?;

        let count: usize = reader.read_compactsize()?.try_into()?;
        let mut indexes = Vec::with_capacity(count.min(MAX_PREALLOCATED_INDEXES));
        let mut differential = DifferentialIndexes::default();
        for _ in 0..count {
            indexes.push(differential.decode(reader.read_compact_u64()?)?);
        }

        Ok(BlockTransactionsRequest {
            block_hash,
            indexes,
        })
    }
}

impl SvSerialize for BlockTransactions {
    fn sv_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.block_hash.sv_serialize(&mut writer)?;
        self.transactions.sv_serialize(&mut writer)
    }
}

impl SvDeserialize for BlockTransactions {
    fn sv_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(BlockTransactions {
            block_hash: (&mut reader).sv_deserialize_into()?,
            transactions: (&mut reader).sv_deserialize_into()?,
        })
    }
}
