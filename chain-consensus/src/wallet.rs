//! Wallet backed by in-process key pairs

use crate::traits::Wallet;
use crate::{ConsensusError, ConsensusResult};
use chain_core::script::signature_redeem_script;
use chain_core::{Address, KeyPair, PublicKey, Signature};
use std::collections::HashMap;
use std::fmt;

/// Holds validator key pairs in memory
pub struct KeyPairWallet {
    pairs: HashMap<PublicKey, KeyPair>,
    reward_address: Address,
}

impl KeyPairWallet {
    /// Wallet over `pairs`; rewards go to the first pair's address
    pub fn new(pairs: Vec<KeyPair>) -> Self {
        let reward_address = pairs
            .first()
            .map(|p| Address::from_script(&signature_redeem_script(&p.public_key())))
            .unwrap_or_default();
        Self {
            pairs: pairs.into_iter().map(|p| (p.public_key(), p)).collect(),
            reward_address,
        }
    }

    /// Wallet over hex-encoded 32-byte secret keys
    pub fn from_secret_hex(secrets: &[String]) -> ConsensusResult<Self> {
        let pairs = secrets
            .iter()
            .map(|s| -> ConsensusResult<KeyPair> {
                let bytes = hex::decode(s.trim_start_matches("0x"))
                    .map_err(|e| ConsensusError::Wallet(format!("bad secret key hex: {e}")))?;
                Ok(KeyPair::from_secret_bytes(&bytes)?)
            })
            .collect::<ConsensusResult<Vec<_>>>()?;
        Ok(Self::new(pairs))
    }

    /// Pay rewards to `address` instead
    pub fn with_reward_address(mut self, address: Address) -> Self {
        self.reward_address = address;
        self
    }

    pub fn public_keys(&self) -> impl Iterator<Item = &PublicKey> {
        self.pairs.keys()
    }
}

impl fmt::Debug for KeyPairWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPairWallet")
            .field("keys", &self.pairs.len())
            .field("reward_address", &self.reward_address)
            .finish()
    }
}

impl Wallet for KeyPairWallet {
    fn has_key_for(&self, key: &PublicKey) -> bool {
        self.pairs.contains_key(key)
    }

    fn sign(&self, key: &PublicKey, data: &[u8]) -> Option<Signature> {
        self.pairs.get(key).map(|pair| pair.sign(data))
    }

    fn reward_address(&self) -> Address {
        self.reward_address
    }
}
