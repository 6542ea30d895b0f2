//! In-memory collaborators
//!
//! Ledger, mempool, transport, clock and policy implementations that keep
//! everything in process. They back the unit and integration tests and
//! make it possible to run a validator set inside one process.

use crate::payload::ConsensusPayload;
use crate::traits::{Clock, Ledger, LedgerSnapshot, Mempool, Transport, TransactionPolicy};
use crate::validators::quorum;
use crate::{ConsensusError, ConsensusResult};
use chain_core::script::multisig_address;
use chain_core::{Block, BlockHeader, BlockIndex, Hash, PublicKey, Timestamp, Transaction};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct LedgerState {
    headers: Vec<BlockHeader>,
    transactions: HashSet<Hash>,
}

/// Append-only chain held in memory with a fixed validator set
#[derive(Debug)]
pub struct MemoryLedger {
    validators: Vec<PublicKey>,
    state: RwLock<LedgerState>,
}

impl MemoryLedger {
    /// Ledger holding only a genesis block that hands control to `validators`
    pub fn new(validators: Vec<PublicKey>, genesis_timestamp: Timestamp) -> Self {
        let next_consensus =
            multisig_address(quorum(validators.len()), &validators).unwrap_or_default();
        let genesis = BlockHeader::genesis(genesis_timestamp, next_consensus);
        Self {
            validators,
            state: RwLock::new(LedgerState {
                headers: vec![genesis],
                transactions: HashSet::new(),
            }),
        }
    }

    pub fn height(&self) -> BlockIndex {
        (self.state.read().headers.len() - 1) as BlockIndex
    }

    pub fn tip(&self) -> BlockHeader {
        let state = self.state.read();
        state.headers[state.headers.len() - 1].clone()
    }

    /// Append a block extending the tip and signed by the tip's `next_consensus`
    pub fn append(&self, block: Block) -> ConsensusResult<()> {
        let mut state = self.state.write();
        let tip = &state.headers[state.headers.len() - 1];
        if block.index() != tip.index + 1 || block.header.prev_hash != tip.hash() {
            return Err(ConsensusError::Other(format!(
                "block {} does not extend tip {}",
                block.index(),
                tip.index
            )));
        }
        if !block.validate(&tip.next_consensus) {
            return Err(ConsensusError::Other(format!(
                "block {} failed validation",
                block.index()
            )));
        }
        debug!("Appending block {} ({})", block.index(), block.hash());
        state
            .transactions
            .extend(block.transactions.iter().map(Transaction::hash));
        state.headers.push(block.header);
        Ok(())
    }
}

impl Ledger for MemoryLedger {
    fn snapshot(&self) -> Arc<dyn LedgerSnapshot> {
        let state = self.state.read();
        Arc::new(MemorySnapshot {
            validators: self.validators.clone(),
            headers: state.headers.iter().map(|h| (h.hash(), h.clone())).collect(),
            tip: state.headers[state.headers.len() - 1].clone(),
            transactions: state.transactions.clone(),
        })
    }
}

/// Frozen copy of a [`MemoryLedger`]
#[derive(Debug)]
pub struct MemorySnapshot {
    validators: Vec<PublicKey>,
    headers: HashMap<Hash, BlockHeader>,
    tip: BlockHeader,
    transactions: HashSet<Hash>,
}

impl LedgerSnapshot for MemorySnapshot {
    fn height(&self) -> BlockIndex {
        self.tip.index
    }

    fn current_block_hash(&self) -> Hash {
        self.tip.hash()
    }

    fn validators_for_next_block(&self) -> Vec<PublicKey> {
        self.validators.clone()
    }

    fn header_by_hash(&self, hash: &Hash) -> Option<BlockHeader> {
        self.headers.get(hash).cloned()
    }

    fn contains_transaction(&self, hash: &Hash) -> bool {
        self.transactions.contains(hash)
    }
}

/// Transaction pool split into verified and unverified entries
#[derive(Debug, Default)]
pub struct MemoryMempool {
    verified: RwLock<Vec<Transaction>>,
    unverified: RwLock<HashMap<Hash, Transaction>>,
}

impl MemoryMempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_verified(&self, transaction: Transaction) {
        self.verified.write().push(transaction);
    }

    pub fn add_unverified(&self, transaction: Transaction) {
        self.unverified
            .write()
            .insert(transaction.hash(), transaction);
    }

    /// Drop everything included in `block`
    pub fn remove_included(&self, block: &Block) {
        let included: HashSet<Hash> = block.transactions.iter().map(Transaction::hash).collect();
        self.verified
            .write()
            .retain(|tx| !included.contains(&tx.hash()));
        self.unverified
            .write()
            .retain(|hash, _| !included.contains(hash));
    }

    pub fn len(&self) -> usize {
        self.verified.read().len() + self.unverified.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Mempool for MemoryMempool {
    fn sorted_verified_transactions(&self) -> Vec<Transaction> {
        let mut transactions = self.verified.read().clone();
        transactions.sort_by(|a, b| b.fee.cmp(&a.fee).then_with(|| a.hash().cmp(&b.hash())));
        transactions
    }

    fn get_transaction(&self, hash: &Hash) -> Option<Transaction> {
        self.verified
            .read()
            .iter()
            .find(|tx| tx.hash() == *hash)
            .cloned()
            .or_else(|| self.unverified.read().get(hash).cloned())
    }
}

/// Transport that records what was sent instead of sending it
#[derive(Debug, Default)]
pub struct RecordingTransport {
    broadcasts: Mutex<Vec<ConsensusPayload>>,
    blocks: Mutex<Vec<Block>>,
    requests: Mutex<Vec<Vec<Hash>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broadcast payloads since the last call
    pub fn take_broadcasts(&self) -> Vec<ConsensusPayload> {
        std::mem::take(&mut *self.broadcasts.lock())
    }

    /// Relayed blocks since the last call
    pub fn take_blocks(&self) -> Vec<Block> {
        std::mem::take(&mut *self.blocks.lock())
    }

    /// Every transaction request made so far
    pub fn requested(&self) -> Vec<Vec<Hash>> {
        self.requests.lock().clone()
    }
}

impl Transport for RecordingTransport {
    fn broadcast(&self, payload: &ConsensusPayload) {
        self.broadcasts.lock().push(payload.clone());
    }

    fn relay_block(&self, block: &Block) {
        self.blocks.lock().push(block.clone());
    }

    fn request_transactions(&self, hashes: &[Hash]) {
        self.requests.lock().push(hashes.to_vec());
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Accepts every transaction
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl TransactionPolicy for AllowAll {}

/// Rejects a fixed set of transactions
#[derive(Debug, Default)]
pub struct DenyListPolicy {
    denied: RwLock<HashSet<Hash>>,
}

impl DenyListPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny(&self, hash: Hash) {
        self.denied.write().insert(hash);
    }
}

impl TransactionPolicy for DenyListPolicy {
    fn filter_for_block(&self, transactions: Vec<Transaction>) -> Vec<Transaction> {
        let denied = self.denied.read();
        transactions
            .into_iter()
            .filter(|tx| !denied.contains(&tx.hash()))
            .collect()
    }

    fn check_policy(&self, transaction: &Transaction) -> bool {
        !self.denied.read().contains(&transaction.hash())
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use fixtures::{TestNetwork, TEST_GENESIS_TIMESTAMP};

/// Deterministic validator sets for tests. Only built for this crate's tests
/// or with the `test-utils` feature.
#[cfg(any(test, feature = "test-utils"))]
mod fixtures {
    use super::MemoryLedger;
    use crate::validators::{quorum, MAX_VALIDATORS};
    use crate::wallet::KeyPairWallet;
    use chain_core::script::{invocation_script, multisig_redeem_script};
    use chain_core::{
        merkle, Address, Block, BlockHeader, BlockIndex, KeyPair, PublicKey, Timestamp,
        Transaction, Witness,
    };
    use std::sync::Arc;

    /// Genesis timestamp of every [`TestNetwork`] ledger, in seconds
    pub const TEST_GENESIS_TIMESTAMP: Timestamp = 1_600_000_000;

    /// Validator keys derived from their position, one wallet each, and a
    /// shared ledger
    #[derive(Debug)]
    pub struct TestNetwork {
        pub pairs: Vec<KeyPair>,
        pub keys: Vec<PublicKey>,
        pub wallets: Vec<KeyPairWallet>,
        pub ledger: Arc<MemoryLedger>,
    }

    impl TestNetwork {
        /// # Panics
        ///
        /// When `n` is zero or above [`MAX_VALIDATORS`]
        pub fn new(n: usize) -> Self {
            assert!((1..=MAX_VALIDATORS).contains(&n), "{n} validators");
            let pairs: Vec<KeyPair> = (1..=n as u64)
                .map(|i| {
                    let mut secret = [0u8; 32];
                    secret[24..].copy_from_slice(&i.to_be_bytes());
                    KeyPair::from_secret_bytes(&secret).expect("small secrets are valid keys")
                })
                .collect();
            let keys: Vec<PublicKey> = pairs.iter().map(KeyPair::public_key).collect();
            let wallets = pairs
                .iter()
                .map(|p| KeyPairWallet::new(vec![p.clone()]))
                .collect();
            let ledger = Arc::new(MemoryLedger::new(keys.clone(), TEST_GENESIS_TIMESTAMP));
            Self {
                pairs,
                keys,
                wallets,
                ledger,
            }
        }

        /// Transfer signed by validator `sender`'s key
        ///
        /// # Panics
        ///
        /// When `sender` is not a validator of this network
        pub fn signed_transfer(&self, sender: usize, amount: u64, fee: u64) -> Transaction {
            let pair = self
                .pairs
                .get(sender)
                .unwrap_or_else(|| panic!("no validator {sender} of {}", self.pairs.len()));
            let mut tx =
                Transaction::new(rand::random(), Address::zero(), amount, fee, Vec::new());
            tx.sign(pair);
            tx
        }

        /// Block `index` holding only a zero reward, signed by the first `M`
        /// validators
        pub fn empty_block(&self, index: BlockIndex) -> Block {
            let tip = self.ledger.tip();
            let m = quorum(self.keys.len());
            let reward = Transaction::reward_with_nonce(Address::zero(), 0, u64::from(index));
            let mut header = BlockHeader::new(
                tip.hash(),
                merkle::compute_root(&[reward.hash()]),
                tip.timestamp + 15,
                index,
                tip.next_consensus,
            );
            let data = header.unsigned_data();
            let signatures: Vec<_> = self.pairs[..m].iter().map(|p| p.sign(&data)).collect();
            header.witness = Witness::new(
                invocation_script(&signatures),
                multisig_redeem_script(m, &self.keys).unwrap_or_default(),
            );
            Block::new(header, vec![reward])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_core::Witness;

    #[test]
    fn test_ledger_appends_signed_blocks() {
        let net = TestNetwork::new(4);
        let genesis = net.ledger.snapshot();
        assert_eq!(genesis.height(), 0);

        let block = net.empty_block(1);
        let reward = block.transactions[0].hash();
        net.ledger.append(block.clone()).unwrap();
        assert_eq!(net.ledger.height(), 1);
        assert!(net.ledger.append(block).is_err());

        let snapshot = net.ledger.snapshot();
        assert_eq!(snapshot.height(), 1);
        assert!(snapshot.contains_transaction(&reward));
        assert!(snapshot.header_by_hash(&snapshot.current_block_hash()).is_some());
        // earlier snapshots stay frozen
        assert_eq!(genesis.height(), 0);
        assert!(!genesis.contains_transaction(&reward));
    }

    #[test]
    fn test_ledger_rejects_unsigned_block() {
        let net = TestNetwork::new(4);
        let mut block = net.empty_block(1);
        block.header.witness = Witness::default();
        assert!(net.ledger.append(block).is_err());
    }

    #[test]
    fn test_mempool_orders_by_fee() {
        let net = TestNetwork::new(1);
        let pool = MemoryMempool::new();
        let cheap = net.signed_transfer(0, 1, 1);
        let rich = net.signed_transfer(0, 1, 9);
        let loose = net.signed_transfer(0, 1, 5);
        pool.add_verified(cheap.clone());
        pool.add_verified(rich.clone());
        pool.add_unverified(loose.clone());

        assert_eq!(pool.sorted_verified_transactions(), vec![rich.clone(), cheap]);
        assert_eq!(pool.get_transaction(&loose.hash()), Some(loose));
        pool.remove_included(&Block::new(net.empty_block(1).header, vec![rich]));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_deny_list() {
        let net = TestNetwork::new(1);
        let policy = DenyListPolicy::new();
        let bad = net.signed_transfer(0, 1, 1);
        let good = net.signed_transfer(0, 2, 1);
        policy.deny(bad.hash());
        assert!(!policy.check_policy(&bad));
        assert!(policy.check_policy(&good));
        assert_eq!(policy.filter_for_block(vec![bad, good.clone()]), vec![good]);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_500);
        clock.advance(2_000);
        assert_eq!(clock.now_millis(), 3_500);
        assert_eq!(clock.now_secs(), 3);
        clock.set(0);
        assert_eq!(clock.now_millis(), 0);
    }
}
