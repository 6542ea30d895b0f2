//! Transaction data structures and operations
//!
//! Transaction bodies are opaque to the agreement protocol: it only moves
//! their canonical encoding around and addresses them by hash. The body is
//! bincode-encoded; the hash covers the unsigned portion so that attaching
//! the witness does not change a transaction's identity.

use crate::codec::{BinaryReader, BinaryWriter, Decode, Encode};
use crate::script::{invocation_script, signature_redeem_script};
use crate::{Address, Amount, CoreError, CoreResult, Hash, KeyPair, Nonce, Witness};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

/// Upper bound on an encoded transaction
pub const MAX_TRANSACTION_SIZE: usize = 102_400;

/// Transaction discriminator
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub enum TransactionKind {
    /// Pays the block proposer; exactly one per block, always first
    Reward,
    /// Ordinary signed transfer
    Standard,
}

/// Transaction data structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Transaction {
    pub kind: TransactionKind,
    /// Random for reward transactions so that every proposal is unique
    pub nonce: Nonce,
    /// Recipient address
    pub to: Address,
    /// Value to transfer
    pub amount: Amount,
    /// Network fee offered to the proposer
    pub fee: Amount,
    /// Transaction data/input
    pub data: Vec<u8>,
    /// Sender authorization, absent on reward transactions
    pub witness: Option<Witness>,
}

/// Helper struct for encoding transaction data for signing
#[derive(bincode::Encode)]
struct TransactionForSigning<'a> {
    kind: TransactionKind,
    nonce: Nonce,
    to: &'a Address,
    amount: Amount,
    fee: Amount,
    data: &'a [u8],
}

fn bincode_bytes<T: bincode::Encode>(value: &T) -> Vec<u8> {
    match bincode::encode_to_vec(value, bincode::config::standard()) {
        Ok(bytes) => bytes,
        // Derived encoders writing into a Vec have no failure path
        Err(e) => unreachable!("bincode encoding into memory failed: {e}"),
    }
}

impl Transaction {
    /// Create an unsigned standard transaction
    pub fn new(nonce: Nonce, to: Address, amount: Amount, fee: Amount, data: Vec<u8>) -> Self {
        Self {
            kind: TransactionKind::Standard,
            nonce,
            to,
            amount,
            fee,
            data,
            witness: None,
        }
    }

    /// Create a reward transaction paying `amount` to `to` with a random nonce
    pub fn reward(to: Address, amount: Amount) -> Self {
        Self::reward_with_nonce(to, amount, rand::random())
    }

    /// Create a reward transaction with an explicit nonce
    pub fn reward_with_nonce(to: Address, amount: Amount, nonce: Nonce) -> Self {
        Self {
            kind: TransactionKind::Reward,
            nonce,
            to,
            amount,
            fee: 0,
            data: Vec::new(),
            witness: None,
        }
    }

    pub fn is_reward(&self) -> bool {
        self.kind == TransactionKind::Reward
    }

    /// Encode transaction for signing (without witness)
    pub fn encode_for_signing(&self) -> Vec<u8> {
        bincode_bytes(&TransactionForSigning {
            kind: self.kind,
            nonce: self.nonce,
            to: &self.to,
            amount: self.amount,
            fee: self.fee,
            data: &self.data,
        })
    }

    /// Transaction hash over the unsigned portion
    pub fn hash(&self) -> Hash {
        let hash_bytes = Keccak256::digest(self.encode_for_signing());
        Hash::from_slice(hash_bytes.as_slice())
    }

    /// Sign the transaction with a key pair
    pub fn sign(&mut self, pair: &KeyPair) {
        let signature = pair.sign(&self.encode_for_signing());
        self.witness = Some(Witness::new(
            invocation_script(&[signature]),
            signature_redeem_script(&pair.public_key()),
        ));
    }

    /// Script hash of the signer, if signed
    pub fn sender(&self) -> Option<Address> {
        self.witness.as_ref().map(Witness::script_hash)
    }

    /// Verify the transaction's authorization.
    ///
    /// Reward transactions must be unsigned; standard ones must carry a
    /// witness that verifies against its own script hash.
    pub fn verify_witness(&self) -> bool {
        match (self.kind, &self.witness) {
            (TransactionKind::Reward, None) => true,
            (TransactionKind::Reward, Some(_)) => false,
            (TransactionKind::Standard, Some(witness)) => {
                witness.verify(&witness.script_hash(), &self.encode_for_signing())
            }
            (TransactionKind::Standard, None) => false,
        }
    }

    /// Canonical bincode encoding of the whole transaction
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        bincode_bytes(self)
    }

    /// Decode a canonical encoding that must span all of `bytes`
    pub fn from_canonical_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let (tx, read): (Self, usize) =
            bincode::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| CoreError::Bincode(e.to_string()))?;
        if read != bytes.len() {
            return Err(CoreError::Deserialization(format!(
                "{} trailing bytes after transaction",
                bytes.len() - read
            )));
        }
        Ok(tx)
    }
}

impl Encode for Transaction {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_var_bytes(&self.to_canonical_bytes());
    }
}

impl Decode for Transaction {
    fn decode(reader: &mut BinaryReader<'_>) -> CoreResult<Self> {
        let bytes = reader.read_var_bytes(MAX_TRANSACTION_SIZE)?;
        Self::from_canonical_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient() -> Address {
        Address::from_hex("1234567890abcdef1234567890abcdef12345678").unwrap()
    }

    #[test]
    fn test_transaction_creation() {
        let tx = Transaction::new(1, recipient(), 1000, 10, Vec::new());

        assert_eq!(tx.nonce, 1);
        assert_eq!(tx.amount, 1000);
        assert_eq!(tx.kind, TransactionKind::Standard);
        assert!(tx.witness.is_none());
        assert!(!tx.verify_witness());
    }

    #[test]
    fn test_hash_ignores_witness() {
        let pair = KeyPair::generate();
        let mut tx = Transaction::new(1, recipient(), 1000, 10, vec![1, 2]);
        let unsigned = tx.hash();
        tx.sign(&pair);
        assert_eq!(tx.hash(), unsigned);
        assert!(tx.verify_witness());
        assert_eq!(
            tx.sender(),
            Some(Address::from_script(&signature_redeem_script(&pair.public_key())))
        );
    }

    #[test]
    fn test_tampered_transaction_fails() {
        let pair = KeyPair::generate();
        let mut tx = Transaction::new(1, recipient(), 1000, 10, Vec::new());
        tx.sign(&pair);
        tx.amount = 2000;
        assert!(!tx.verify_witness());
    }

    #[test]
    fn test_reward_nonce_makes_hash_unique() {
        let a = Transaction::reward_with_nonce(recipient(), 50, 1);
        let b = Transaction::reward_with_nonce(recipient(), 50, 2);
        assert_ne!(a.hash(), b.hash());
        assert!(a.is_reward());
        assert!(a.verify_witness());
    }

    #[test]
    fn test_codec_round_trip() {
        let pair = KeyPair::generate();
        let mut tx = Transaction::new(9, recipient(), 5, 1, vec![7; 40]);
        tx.sign(&pair);

        let bytes = tx.to_bytes();
        let decoded = Transaction::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, tx);
        assert!(Transaction::from_canonical_bytes(&[0xff, 0xff]).is_err());
    }
}
