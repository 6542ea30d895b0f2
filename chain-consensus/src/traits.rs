//! Collaborator interfaces the consensus service is driven through
//!
//! The agreement core never reaches for global state. Everything it learns
//! about the chain, the transaction pool, keys, time and the network comes
//! through these traits.

use crate::ConsensusPayload;
use chain_core::{Address, Block, BlockHeader, BlockIndex, Hash, PublicKey, Signature, Transaction};
use std::sync::Arc;

/// Read-only view of the ledger, scoped to one round
pub trait LedgerSnapshot: Send + Sync {
    /// Height of the last persisted block
    fn height(&self) -> BlockIndex;

    /// Hash of the last persisted block
    fn current_block_hash(&self) -> Hash;

    /// Ordered validator keys that must sign block `height + 1`
    fn validators_for_next_block(&self) -> Vec<PublicKey>;

    /// Look up a persisted header
    fn header_by_hash(&self, hash: &Hash) -> Option<BlockHeader>;

    /// Whether a transaction is already on the ledger
    fn contains_transaction(&self, hash: &Hash) -> bool;
}

/// Source of ledger snapshots
pub trait Ledger: Send + Sync {
    /// Snapshot of the current ledger tip
    fn snapshot(&self) -> Arc<dyn LedgerSnapshot>;
}

/// Transaction pool
pub trait Mempool: Send + Sync {
    /// Verified transactions, best first
    fn sorted_verified_transactions(&self) -> Vec<Transaction>;

    /// Look up a pooled transaction, verified or not
    fn get_transaction(&self, hash: &Hash) -> Option<Transaction>;
}

/// Pluggable block-content policy
pub trait TransactionPolicy: Send + Sync {
    /// Narrow the primary's candidate list
    fn filter_for_block(&self, transactions: Vec<Transaction>) -> Vec<Transaction> {
        transactions
    }

    /// Whether a backup accepts a proposed transaction
    fn check_policy(&self, _transaction: &Transaction) -> bool {
        true
    }
}

/// Key holder for the local validator
pub trait Wallet: Send + Sync {
    /// Whether this wallet can sign for `key`
    fn has_key_for(&self, key: &PublicKey) -> bool;

    /// Sign `data` with the private key behind `key`
    fn sign(&self, key: &PublicKey, data: &[u8]) -> Option<Signature>;

    /// Address the reward transaction pays when this node proposes
    fn reward_address(&self) -> Address;
}

/// Outbound network surface
pub trait Transport: Send + Sync {
    /// Send a consensus payload to every validator
    fn broadcast(&self, payload: &ConsensusPayload);

    /// Hand a finalized block to the ledger-append path and peers
    fn relay_block(&self, block: &Block);

    /// Ask peers for transaction bodies missing from the proposal
    fn request_transactions(&self, hashes: &[Hash]);
}

/// Wall clock
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch
    fn now_millis(&self) -> u64;

    /// Seconds since the Unix epoch, as carried in headers and messages
    fn now_secs(&self) -> u32 {
        (self.now_millis() / 1000) as u32
    }
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}
