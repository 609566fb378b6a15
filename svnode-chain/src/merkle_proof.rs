//! Merkle inclusion proofs.
//!
//! A proof is the list of sibling hashes on the path from a transaction to the
//! merkle root of its block. [`MerkleProof`] is the bare path, [`TscMerkleProof`]
//! is the self-describing format carried by `datareftx`, and [`DsMerkleProof`]
//! is the fixed-layout variant carried by `dsdetected`.

use std::{io, sync::Arc};

use byteorder::{ReadBytesExt, WriteBytesExt};

use crate::{
    block::{self, merkle, Block, Header},
    serialization::{
        sv_serialize_bytes, ReadSvExt, SerializationError, SvDeserialize, SvDeserializeInto,
        SvSerialize, TrustedPreallocate, WriteSvExt, MAX_PROTOCOL_MESSAGE_LEN,
    },
    transaction::{self, Transaction},
};

#[cfg(any(test, feature = "proptest-impl"))]
mod arbitrary;

/// One step of a merkle path.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Node {
    /// The sibling subtree hash, in serialized byte order.
    Hash([u8; 32]),

    /// The working hash has no sibling at this level and is paired with itself.
    Duplicate,
}

impl Node {
    const HASH_TYPE: u8 = 0;
    const DUPLICATE_TYPE: u8 = 1;
}

impl SvSerialize for Node {
    fn sv_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        match self {
            Node::Hash(hash) => {
                writer.write_u8(Node::HASH_TYPE)?;
                writer.write_32_bytes(hash)
            }
            Node::Duplicate => writer.write_u8(Node::DUPLICATE_TYPE),
        }
    }
}

impl SvDeserialize for Node {
    fn sv_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        match reader.read_u8()? {
            Node::HASH_TYPE => Ok(Node::Hash(reader.read_32_bytes()?)),
            Node::DUPLICATE_TYPE => Ok(Node::Duplicate),
            _ => Err(SerializationError::Parse("unsupported merkle proof node type")),
        }
    }
}

/// A duplicate node takes one byte.
impl TrustedPreallocate for Node {
    fn max_allocation() -> u64 {
        MAX_PROTOCOL_MESSAGE_LEN as u64
    }
}

/// Folds `nodes` against `tx_hash`, returning the root the path leads to.
///
/// Bit `n` of `index` says whether the working hash is the right (`1`) or the
/// left (`0`) child at level `n`. Returns `None` for paths that can't describe
/// any tree position: a duplicate on the right, or index bits left over after
/// the last node.
pub fn fold_path(tx_hash: transaction::Hash, index: u64, nodes: &[Node]) -> Option<merkle::Root> {
    let mut working = tx_hash.0;
    let mut position = index;

    for node in nodes {
        let is_right = position & 1 == 1;
        working = match (node, is_right) {
            (Node::Hash(sibling), true) => merkle::hash(sibling, &working),
            (Node::Hash(sibling), false) => merkle::hash(&working, sibling),
            (Node::Duplicate, false) => merkle::hash(&working, &working),
            (Node::Duplicate, true) => return None,
        };
        position >>= 1;
    }

    if position != 0 {
        return None;
    }

    Some(merkle::Root(working))
}

/// The sibling path from the transaction at `index` to the root of `tx_hashes`.
fn build_path(tx_hashes: &[transaction::Hash], index: usize) -> Option<Vec<Node>> {
    if index >= tx_hashes.len() {
        return None;
    }

    let mut level: Vec<[u8; 32]> = tx_hashes.iter().map(|hash| hash.0).collect();
    let mut position = index;
    let mut nodes = Vec::new();

    while level.len() > 1 {
        let sibling = position ^ 1;
        nodes.push(match level.get(sibling) {
            Some(hash) => Node::Hash(*hash),
            None => Node::Duplicate,
        });

        level = merkle::next_level(&level);
        position >>= 1;
    }

    Some(nodes)
}

/// A bare merkle path: which transaction it proves, the root it leads to, and
/// the siblings along the way.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MerkleProof {
    /// The position of the transaction in its block.
    pub index: u64,
    /// The merkle root the path must fold to.
    pub target: merkle::Root,
    /// The siblings, leaf level first.
    pub nodes: Vec<Node>,
}

impl MerkleProof {
    /// Builds the proof for the transaction at `index` in a block whose
    /// transaction ids are `tx_hashes`.
    ///
    /// Returns `None` if `index` is out of range.
    pub fn build(tx_hashes: &[transaction::Hash], index: usize) -> Option<MerkleProof> {
        let nodes = build_path(tx_hashes, index)?;
        Some(MerkleProof {
            index: index as u64,
            target: tx_hashes.iter().copied().collect(),
            nodes,
        })
    }

    /// Builds the proof for the transaction at `index` in `block`.
    pub fn for_block(block: &Block, index: usize) -> Option<MerkleProof> {
        let hashes: Vec<_> = block.transaction_hashes().collect();
        MerkleProof::build(&hashes, index)
    }

    /// Returns `true` if the path folds `tx_hash` into `target`.
    pub fn verify(&self, tx_hash: transaction::Hash) -> bool {
        fold_path(tx_hash, self.index, &self.nodes) == Some(self.target)
    }
}

/// Either a whole transaction or just its id.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TxOrId {
    /// The proof carries the full transaction.
    Transaction(Arc<Transaction>),
    /// The proof carries only the transaction id.
    Id(transaction::Hash),
}

impl TxOrId {
    /// The id of the proved transaction.
    pub fn hash(&self) -> transaction::Hash {
        match self {
            TxOrId::Transaction(tx) => tx.hash(),
            TxOrId::Id(hash) => *hash,
        }
    }
}

/// What a TSC proof folds up to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TscTarget {
    /// The hash of the block containing the transaction.
    BlockHash(block::Hash),
    /// The header of the block containing the transaction.
    Header(Header),
    /// The merkle root of the block containing the transaction.
    MerkleRoot(merkle::Root),
}

/// TSC proof flag: the proof carries the full transaction rather than its id.
const FLAG_TX_INCLUDED: u8 = 0x01;
/// TSC proof flags: mask of the two target type bits.
const FLAG_TARGET_MASK: u8 = 0x06;
const TARGET_BLOCK_HASH: u8 = 0x00;
const TARGET_HEADER: u8 = 0x02;
const TARGET_MERKLE_ROOT: u8 = 0x04;
/// TSC proof flag: the proof is a composite of several paths. Unsupported.
const FLAG_COMPOSITE: u8 = 0x08;

/// A merkle proof in the Technical Standards Committee format.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TscMerkleProof {
    /// The position of the transaction in its block.
    pub index: u64,
    /// The proved transaction, or its id.
    pub tx: TxOrId,
    /// The value the path leads to.
    pub target: TscTarget,
    /// The siblings, leaf level first.
    pub nodes: Vec<Node>,
}

impl TscMerkleProof {
    /// Builds a proof for the transaction at `index` in `block`, carrying the
    /// full transaction and targeting the block's merkle root.
    pub fn for_block(block: &Block, index: usize) -> Option<TscMerkleProof> {
        let proof = MerkleProof::for_block(block, index)?;
        Some(TscMerkleProof {
            index: proof.index,
            tx: TxOrId::Transaction(block.transactions[index].clone()),
            target: TscTarget::MerkleRoot(proof.target),
            nodes: proof.nodes,
        })
    }

    /// The flags byte that describes this proof's layout.
    pub fn flags(&self) -> u8 {
        let tx_flag = match self.tx {
            TxOrId::Transaction(_) => FLAG_TX_INCLUDED,
            TxOrId::Id(_) => 0,
        };
        let target_flag = match self.target {
            TscTarget::BlockHash(_) => TARGET_BLOCK_HASH,
            TscTarget::Header(_) => TARGET_HEADER,
            TscTarget::MerkleRoot(_) => TARGET_MERKLE_ROOT,
        };

        tx_flag | target_flag
    }

    /// The merkle root named by the target, if the target contains one.
    pub fn merkle_root(&self) -> Option<merkle::Root> {
        match &self.target {
            TscTarget::BlockHash(_) => None,
            TscTarget::Header(header) => Some(header.merkle_root()),
            TscTarget::MerkleRoot(root) => Some(*root),
        }
    }

    /// Returns `true` if the path folds the transaction into the target's
    /// merkle root.
    ///
    /// Proofs that only name a block hash can't be checked on their own, use
    /// [`TscMerkleProof::verify_with_header`].
    pub fn verify(&self) -> bool {
        match self.merkle_root() {
            Some(root) => fold_path(self.tx.hash(), self.index, &self.nodes) == Some(root),
            None => false,
        }
    }

    /// Checks the proof against a header the caller trusts.
    pub fn verify_with_header(&self, header: &Header) -> bool {
        let target_matches = match &self.target {
            TscTarget::BlockHash(hash) => *hash == header.hash(),
            TscTarget::Header(target) => target == header,
            TscTarget::MerkleRoot(root) => *root == header.merkle_root(),
        };

        target_matches
            && fold_path(self.tx.hash(), self.index, &self.nodes) == Some(header.merkle_root())
    }
}

impl SvSerialize for TscMerkleProof {
    fn sv_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_u8(self.flags())?;
        writer.write_compactsize(self.index)?;

        match &self.tx {
            TxOrId::Transaction(tx) => sv_serialize_bytes(&tx.sv_serialize_to_vec()?, &mut writer)?,
            TxOrId::Id(hash) => hash.sv_serialize(&mut writer)?,
        }

        match &self.target {
            TscTarget::BlockHash(hash) => hash.sv_serialize(&mut writer)?,
            TscTarget::Header(header) => header.sv_serialize(&mut writer)?,
            TscTarget::MerkleRoot(root) => root.sv_serialize(&mut writer)?,
        }

        self.nodes.sv_serialize(&mut writer)
    }
}

impl SvDeserialize for TscMerkleProof {
    fn sv_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let flags = reader.read_u8()?;
        if flags & FLAG_COMPOSITE != 0 {
            return Err(SerializationError::Parse(
                "composite merkle proofs are not supported",
            ));
        }
        if flags & !(FLAG_TX_INCLUDED | FLAG_TARGET_MASK) != 0 {
            return Err(SerializationError::Parse("unknown merkle proof flags"));
        }

        let index = reader.read_compact_u64()?;

        let tx = if flags & FLAG_TX_INCLUDED != 0 {
            TxOrId::Transaction(Arc::new(read_embedded_transaction(&mut reader)?))
        } else {
            TxOrId::Id((&mut reader).sv_deserialize_into()?)
        };

        let target = match flags & FLAG_TARGET_MASK {
            TARGET_BLOCK_HASH => TscTarget::BlockHash((&mut reader).sv_deserialize_into()?),
            TARGET_HEADER => TscTarget::Header((&mut reader).sv_deserialize_into()?),
            TARGET_MERKLE_ROOT => TscTarget::MerkleRoot((&mut reader).sv_deserialize_into()?),
            _ => return Err(SerializationError::Parse("invalid merkle proof target type")),
        };

        Ok(TscMerkleProof {
            index,
            tx,
            target,
            nodes: (&mut reader).sv_deserialize_into()?,
        })
    }
}

/// Reads a length-prefixed transaction, checking the length matches its contents.
fn read_embedded_transaction<R: io::Read>(reader: R) -> Result<Transaction, SerializationError> {
    let bytes: Vec<u8> = reader.sv_deserialize_into()?;
    let mut cursor = io::Cursor::new(&bytes);
    let tx = Transaction::sv_deserialize(&mut cursor)?;
    if cursor.position() != bytes.len() as u64 {
        return Err(SerializationError::Parse(
            "merkle proof transaction length does not match its contents",
        ));
    }
    Ok(tx)
}

/// The merkle proof inside a `dsdetected` message.
///
/// It is a TSC proof whose flags are always "full transaction, merkle root target".
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DsMerkleProof {
    /// The position of the transaction in its block.
    pub index: u64,
    /// The conflicting transaction.
    pub tx: Arc<Transaction>,
    /// The merkle root of the block containing the transaction.
    pub merkle_root: merkle::Root,
    /// The siblings, leaf level first.
    pub nodes: Vec<Node>,
}

impl DsMerkleProof {
    /// The only flags value allowed in a double-spend proof.
    pub const FLAGS: u8 = FLAG_TX_INCLUDED | TARGET_MERKLE_ROOT;

    /// Builds the proof for the transaction at `index` in `block`.
    pub fn for_block(block: &Block, index: usize) -> Option<DsMerkleProof> {
        let proof = MerkleProof::for_block(block, index)?;
        Some(DsMerkleProof {
            index: proof.index,
            tx: block.transactions[index].clone(),
            merkle_root: proof.target,
            nodes: proof.nodes,
        })
    }

    /// Returns `true` if the path folds the transaction into `merkle_root`.
    pub fn verify(&self) -> bool {
        fold_path(self.tx.hash(), self.index, &self.nodes) == Some(self.merkle_root)
    }
}

impl From<DsMerkleProof> for TscMerkleProof {
    fn from(proof: DsMerkleProof) -> Self {
        TscMerkleProof {
            index: proof.index,
            tx: TxOrId::Transaction(proof.tx),
            target: TscTarget::MerkleRoot(proof.merkle_root),
            nodes: proof.nodes,
        }
    }
}

impl SvSerialize for DsMerkleProof {
    fn sv_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_u8(DsMerkleProof::FLAGS)?;
        writer.write_compactsize(self.index)?;
        sv_serialize_bytes(&self.tx.sv_serialize_to_vec()?, &mut writer)?;
        self.merkle_root.sv_serialize(&mut writer)?;
        self.nodes.sv_serialize(&mut writer)
    }
}

impl SvDeserialize for DsMerkleProof {
    fn sv_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        if reader.read_u8()? != DsMerkleProof::FLAGS {
            return Err(SerializationError::Parse(
                "double-spend merkle proof flags must be 5",
            ));
        }

        Ok(DsMerkleProof {
            index: reader.read_compact_u64()?,
            tx: Arc::new(read_embedded_transaction(&mut reader)?),
            merkle_root: (&mut reader).sv_deserialize_into()?,
            nodes: (&mut reader).sv_deserialize_into()?,
        })
    }
}
