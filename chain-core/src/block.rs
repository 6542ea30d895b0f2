//! Block data structures and operations

use crate::codec::{BinaryReader, BinaryWriter, Decode, Encode};
use crate::crypto::keccak256;
use crate::merkle;
use crate::{Address, BlockIndex, CoreResult, Hash, Timestamp, Transaction, Witness};
use serde::{Deserialize, Serialize};

/// Upper bound on transactions decoded into one block
pub const MAX_BLOCK_TRANSACTIONS: usize = 0x10000;

/// Block header containing metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Header format version
    pub version: u32,
    /// Hash of the parent block
    pub prev_hash: Hash,
    /// Merkle root of the transaction hashes
    pub merkle_root: Hash,
    /// Block timestamp in seconds
    pub timestamp: Timestamp,
    /// Block height
    pub index: BlockIndex,
    /// Script hash of the validator multisig that must sign the next block
    pub next_consensus: Address,
    /// Multisig witness of the current validators
    pub witness: Witness,
}

impl BlockHeader {
    /// Create an unsigned header
    pub fn new(
        prev_hash: Hash,
        merkle_root: Hash,
        timestamp: Timestamp,
        index: BlockIndex,
        next_consensus: Address,
    ) -> Self {
        Self {
            version: 0,
            prev_hash,
            merkle_root,
            timestamp,
            index,
            next_consensus,
            witness: Witness::default(),
        }
    }

    fn encode_unsigned(&self, writer: &mut BinaryWriter) {
        writer.write_u32(self.version);
        writer.write(&self.prev_hash);
        writer.write(&self.merkle_root);
        writer.write_u32(self.timestamp);
        writer.write_u32(self.index);
        writer.write(&self.next_consensus);
    }

    /// The bytes validators sign: everything except the witness
    pub fn unsigned_data(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::new();
        self.encode_unsigned(&mut writer);
        writer.into_bytes()
    }

    /// Calculate the hash of this block header
    pub fn hash(&self) -> Hash {
        keccak256(&self.unsigned_data())
    }

    /// Genesis header signed by nobody, handing control to `next_consensus`
    pub fn genesis(timestamp: Timestamp, next_consensus: Address) -> Self {
        Self::new(Hash::zero(), Hash::zero(), timestamp, 0, next_consensus)
    }
}

impl Encode for BlockHeader {
    fn encode(&self, writer: &mut BinaryWriter) {
        self.encode_unsigned(writer);
        writer.write(&self.witness);
    }
}

impl Decode for BlockHeader {
    fn decode(reader: &mut BinaryReader<'_>) -> CoreResult<Self> {
        Ok(Self {
            version: reader.read_u32()?,
            prev_hash: reader.read()?,
            merkle_root: reader.read()?,
            timestamp: reader.read_u32()?,
            index: reader.read_u32()?,
            next_consensus: reader.read()?,
            witness: reader.read()?,
        })
    }
}

/// Complete block with header and transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block header
    pub header: BlockHeader,
    /// List of transactions, reward transaction first
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Create a new block
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    /// Create genesis block
    pub fn genesis(timestamp: Timestamp, next_consensus: Address) -> Self {
        Self::new(BlockHeader::genesis(timestamp, next_consensus), Vec::new())
    }

    /// Get the block hash (same as header hash)
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn index(&self) -> BlockIndex {
        self.header.index
    }

    /// Calculate the merkle root of the contained transactions
    pub fn calculate_merkle_root(&self) -> Hash {
        let hashes: Vec<Hash> = self.transactions.iter().map(Transaction::hash).collect();
        merkle::compute_root(&hashes)
    }

    /// Validate the block against the script hash expected to sign it
    pub fn validate(&self, signer: &Address) -> bool {
        self.calculate_merkle_root() == self.header.merkle_root
            && self.header.witness.verify(signer, &self.header.unsigned_data())
            && self.transactions.iter().all(Transaction::verify_witness)
    }

    /// Get transaction by hash
    pub fn get_transaction(&self, hash: &Hash) -> Option<&Transaction> {
        self.transactions.iter().find(|tx| tx.hash() == *hash)
    }

    /// Check if block is genesis
    pub fn is_genesis(&self) -> bool {
        self.header.index == 0 && self.header.prev_hash.is_zero()
    }
}

impl Encode for Block {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write(&self.header);
        writer.write_array(&self.transactions);
    }
}

impl Decode for Block {
    fn decode(reader: &mut BinaryReader<'_>) -> CoreResult<Self> {
        Ok(Self {
            header: reader.read()?,
            transactions: reader.read_array_of(MAX_BLOCK_TRANSACTIONS)?,
        })
    }
}
