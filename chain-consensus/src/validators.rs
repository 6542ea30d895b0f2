//! Validator set resolution and BFT arithmetic

use crate::traits::{LedgerSnapshot, Wallet};
use crate::{ConsensusError, ConsensusResult};
use chain_core::script::{multisig_redeem_script, signature_redeem_script};
use chain_core::{Address, BlockIndex, PublicKey};

/// Position of a validator in the ordered set
pub type ValidatorIndex = u16;

/// View number within one height
pub type ViewNumber = u8;

/// Largest validator set the wire format and decoders accept
pub const MAX_VALIDATORS: usize = 1024;

/// Maximum number of faulty validators tolerated among `n`
pub fn max_faulty(n: usize) -> usize {
    n.saturating_sub(1) / 3
}

/// Number of matching votes needed to decide among `n`
pub fn quorum(n: usize) -> usize {
    n - max_faulty(n)
}

/// Primary for `(block_index, view)`: rotates backwards through the set
pub fn primary_index(block_index: BlockIndex, view: ViewNumber, n: usize) -> ValidatorIndex {
    if n == 0 {
        return 0;
    }
    let n = n as i64;
    let p = (i64::from(block_index) - i64::from(view)) % n;
    (if p < 0 { p + n } else { p }) as ValidatorIndex
}

/// Local node's part in the current view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary(ValidatorIndex),
    Backup(ValidatorIndex),
    /// No key for any validator in the set
    Observer,
}

impl Role {
    /// Assign the role for `my_index` given the view's primary
    pub fn assign(my_index: Option<ValidatorIndex>, primary: ValidatorIndex) -> Self {
        match my_index {
            Some(index) if index == primary => Role::Primary(index),
            Some(index) => Role::Backup(index),
            None => Role::Observer,
        }
    }

    pub fn index(&self) -> Option<ValidatorIndex> {
        match self {
            Role::Primary(i) | Role::Backup(i) => Some(*i),
            Role::Observer => None,
        }
    }
}

/// Ordered validator keys for one height
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSet {
    validators: Vec<PublicKey>,
}

impl ValidatorSet {
    pub fn new(validators: Vec<PublicKey>) -> Self {
        Self { validators }
    }

    /// Validators that must sign the block after the snapshot's tip
    pub fn from_snapshot(snapshot: &dyn LedgerSnapshot) -> Self {
        Self::new(snapshot.validators_for_next_block())
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Tolerated faults, `(N - 1) / 3`
    pub fn f(&self) -> usize {
        max_faulty(self.len())
    }

    /// Quorum, `N - F`
    pub fn m(&self) -> usize {
        quorum(self.len())
    }

    pub fn get(&self, index: ValidatorIndex) -> Option<&PublicKey> {
        self.validators.get(usize::from(index))
    }

    /// Key at `index`, failing for indices outside the set
    pub fn key(&self, index: ValidatorIndex) -> ConsensusResult<&PublicKey> {
        self.get(index).ok_or(ConsensusError::UnknownValidator {
            index,
            count: self.len(),
        })
    }

    pub fn keys(&self) -> &[PublicKey] {
        &self.validators
    }

    pub fn index_of(&self, key: &PublicKey) -> Option<ValidatorIndex> {
        self.validators
            .iter()
            .position(|v| v == key)
            .map(|i| i as ValidatorIndex)
    }

    pub fn primary_index(&self, block_index: BlockIndex, view: ViewNumber) -> ValidatorIndex {
        primary_index(block_index, view, self.len())
    }

    /// Script hash a single-signature payload from `index` must carry
    pub fn signer_address(&self, index: ValidatorIndex) -> ConsensusResult<Address> {
        Ok(Address::from_script(&signature_redeem_script(self.key(index)?)))
    }

    /// The M-of-N verification script over the set, in set order
    pub fn multisig_script(&self) -> ConsensusResult<Vec<u8>> {
        Ok(multisig_redeem_script(self.m(), &self.validators)?)
    }

    /// Script hash of the M-of-N contract
    pub fn multisig_address(&self) -> ConsensusResult<Address> {
        Ok(Address::from_script(&self.multisig_script()?))
    }
}

/// Resolve the validator set for the next block and the local node's
/// position in it (the first validator the wallet holds a key for)
pub fn resolve(
    snapshot: &dyn LedgerSnapshot,
    wallet: &dyn Wallet,
) -> (ValidatorSet, Option<ValidatorIndex>) {
    let set = ValidatorSet::from_snapshot(snapshot);
    let my_index = set
        .keys()
        .iter()
        .position(|key| wallet.has_key_for(key))
        .map(|i| i as ValidatorIndex);
    (set, my_index)
}
