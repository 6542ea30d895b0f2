//! Per-height, per-view round state
//!
//! [`RoundContext`] owns everything one node knows about the block being
//! agreed on: the proposal, one slot per validator for each vote kind, and
//! the last height each validator was heard from. It validates and records
//! state but performs no I/O; the service decides what to send and when.

use crate::message::{
    ChangeView, ChangeViewReason, Commit, ConsensusMessage, MessageBody, PrepareRequest,
    PrepareResponse, RecoveryRequest,
};
use crate::payload::{ConsensusPayload, Envelope, PAYLOAD_VERSION};
use crate::slots::ValidatorSlots;
use crate::traits::{LedgerSnapshot, Wallet};
use crate::validators::{self, Role, ValidatorIndex, ValidatorSet, ViewNumber};
use crate::{ConsensusError, ConsensusResult};
use chain_core::script::{invocation_script, signature_redeem_script};
use chain_core::{
    Address, Block, BlockHeader, BlockIndex, Encode, Hash, PublicKey, Timestamp, Transaction,
    Witness,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Proposed block contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProposalData {
    pub timestamp: Timestamp,
    pub next_consensus: Address,
    /// Body order; the reward transaction comes first
    pub transaction_hashes: Vec<Hash>,
    pub transactions: HashMap<Hash, Transaction>,
}

impl ProposalData {
    fn has_all_bodies(&self) -> bool {
        self.transaction_hashes
            .iter()
            .all(|h| self.transactions.contains_key(h))
    }
}

/// A proposal, either still collecting bodies or complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proposal {
    Pending(ProposalData),
    Complete(ProposalData),
}

impl Proposal {
    /// Wrap `data` in the variant matching its completeness
    pub fn new(data: ProposalData) -> Self {
        if data.has_all_bodies() {
            Proposal::Complete(data)
        } else {
            Proposal::Pending(data)
        }
    }

    pub fn data(&self) -> &ProposalData {
        match self {
            Proposal::Pending(data) | Proposal::Complete(data) => data,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Proposal::Complete(_))
    }

    pub fn transaction_hashes(&self) -> &[Hash] {
        &self.data().transaction_hashes
    }

    pub fn transaction(&self, hash: &Hash) -> Option<&Transaction> {
        self.data().transactions.get(hash)
    }

    /// Body count received so far
    pub fn transaction_count(&self) -> usize {
        self.data().transactions.len()
    }

    /// Proposed hashes whose bodies are still missing, in proposal order
    pub fn missing_hashes(&self) -> Vec<Hash> {
        let data = self.data();
        data.transaction_hashes
            .iter()
            .filter(|h| !data.transactions.contains_key(h))
            .copied()
            .collect()
    }

    /// Whether `hash` is proposed but its body has not arrived
    pub fn is_missing(&self, hash: &Hash) -> bool {
        let data = self.data();
        data.transaction_hashes.contains(hash) && !data.transactions.contains_key(hash)
    }

    /// Store a missing body. Returns false if it is not proposed or already held.
    pub fn add_transaction(&mut self, transaction: Transaction) -> bool {
        let hash = transaction.hash();
        if !self.is_missing(&hash) {
            return false;
        }
        if let Proposal::Pending(data) = self {
            data.transactions.insert(hash, transaction);
            if data.has_all_bodies() {
                *self = Proposal::Complete(std::mem::take(data));
            }
        }
        true
    }

    /// Bodies in proposal order, once complete
    pub fn ordered_transactions(&self) -> Option<Vec<Transaction>> {
        match self {
            Proposal::Complete(data) => data
                .transaction_hashes
                .iter()
                .map(|h| data.transactions.get(h).cloned())
                .collect(),
            Proposal::Pending(_) => None,
        }
    }
}

/// Round state for one height
pub struct RoundContext {
    pub(crate) block_index: BlockIndex,
    pub(crate) prev_hash: Hash,
    pub(crate) view_number: ViewNumber,
    pub(crate) validators: ValidatorSet,
    pub(crate) my_index: Option<ValidatorIndex>,
    pub(crate) role: Role,
    pub(crate) proposal: Option<Proposal>,
    pub(crate) preparations: ValidatorSlots<Envelope>,
    pub(crate) commits: ValidatorSlots<Envelope>,
    pub(crate) change_views: ValidatorSlots<Envelope>,
    pub(crate) last_change_views: ValidatorSlots<Envelope>,
    /// Keyed by validator key so it survives validator set changes
    pub(crate) last_seen: HashMap<PublicKey, BlockIndex>,
    pub(crate) header: Option<BlockHeader>,
    pub(crate) block: Option<Block>,
    pub(crate) snapshot: Arc<dyn LedgerSnapshot>,
}

impl fmt::Debug for RoundContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundContext")
            .field("block_index", &self.block_index)
            .field("view_number", &self.view_number)
            .field("role", &self.role)
            .field("validators", &self.validators.len())
            .field("proposal", &self.proposal.as_ref().map(Proposal::is_complete))
            .field("preparations", &self.preparations.count())
            .field("commits", &self.commits.count())
            .field("change_views", &self.change_views.count())
            .finish_non_exhaustive()
    }
}

impl RoundContext {
    /// Fresh context for the block after the snapshot's tip, at view 0
    pub fn new(snapshot: Arc<dyn LedgerSnapshot>, wallet: &dyn Wallet) -> Self {
        let (validators, my_index) = validators::resolve(snapshot.as_ref(), wallet);
        let n = validators.len();
        let block_index = snapshot.height() + 1;
        let primary = validators.primary_index(block_index, 0);
        let mut context = Self {
            block_index,
            prev_hash: snapshot.current_block_hash(),
            view_number: 0,
            my_index,
            role: Role::assign(my_index, primary),
            proposal: None,
            preparations: ValidatorSlots::new(n),
            commits: ValidatorSlots::new(n),
            change_views: ValidatorSlots::new(n),
            last_change_views: ValidatorSlots::new(n),
            last_seen: HashMap::new(),
            header: None,
            block: None,
            validators,
            snapshot,
        };
        context.mark_self_seen();
        context
    }

    /// Full reset for a new height: fresh snapshot, validator set and slots.
    /// Last-seen heights are kept.
    pub fn reset_for_height(&mut self, snapshot: Arc<dyn LedgerSnapshot>, wallet: &dyn Wallet) {
        let last_seen = std::mem::take(&mut self.last_seen);
        *self = Self::new(snapshot, wallet);
        self.last_seen.extend(last_seen);
        self.mark_self_seen();
    }

    /// Partial reset when moving to `view` within the same height.
    ///
    /// The proposal and preparations are dropped; commits and change views
    /// stay. Change views targeting at least `view` are kept aside for
    /// recovery messages.
    pub fn reset_view(&mut self, view: ViewNumber) {
        debug_assert!(view > self.view_number, "views only move forward");
        self.last_change_views = self.change_views.filtered(|cv| {
            cv.message()
                .new_view_number()
                .is_some_and(|target| target >= view)
        });
        self.view_number = view;
        self.role = Role::assign(self.my_index, self.primary_index());
        self.proposal = None;
        self.preparations = ValidatorSlots::new(self.validators.len());
        self.header = None;
        self.mark_self_seen();
    }

    fn mark_self_seen(&mut self) {
        if let Some(key) = self.my_index.and_then(|i| self.validators.get(i)) {
            self.last_seen.insert(*key, self.block_index);
        }
    }

    pub fn block_index(&self) -> BlockIndex {
        self.block_index
    }

    pub fn prev_hash(&self) -> Hash {
        self.prev_hash
    }

    pub fn view_number(&self) -> ViewNumber {
        self.view_number
    }

    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    pub fn my_index(&self) -> Option<ValidatorIndex> {
        self.my_index
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn snapshot(&self) -> &Arc<dyn LedgerSnapshot> {
        &self.snapshot
    }

    pub fn proposal(&self) -> Option<&Proposal> {
        self.proposal.as_ref()
    }

    pub fn preparations(&self) -> &ValidatorSlots<Envelope> {
        &self.preparations
    }

    pub fn commits(&self) -> &ValidatorSlots<Envelope> {
        &self.commits
    }

    pub fn change_views(&self) -> &ValidatorSlots<Envelope> {
        &self.change_views
    }

    pub fn last_change_views(&self) -> &ValidatorSlots<Envelope> {
        &self.last_change_views
    }

    /// Always derived from `(block_index, view_number, N)`
    pub fn primary_index(&self) -> ValidatorIndex {
        self.validators
            .primary_index(self.block_index, self.view_number)
    }

    pub fn f(&self) -> usize {
        self.validators.f()
    }

    pub fn m(&self) -> usize {
        self.validators.m()
    }

    pub fn is_primary(&self) -> bool {
        matches!(self.role, Role::Primary(_))
    }

    pub fn is_backup(&self) -> bool {
        matches!(self.role, Role::Backup(_))
    }

    pub fn watch_only(&self) -> bool {
        self.role == Role::Observer
    }

    pub fn request_sent_or_received(&self) -> bool {
        self.preparations.is_set(self.primary_index())
    }

    pub fn response_sent(&self) -> bool {
        self.my_index.is_some_and(|i| self.preparations.is_set(i))
    }

    pub fn commit_sent(&self) -> bool {
        self.my_index.is_some_and(|i| self.commits.is_set(i))
    }

    pub fn block_sent(&self) -> bool {
        self.block.is_some()
    }

    /// Target view of the change view recorded for `index`
    pub fn change_view_target(&self, index: ValidatorIndex) -> Option<ViewNumber> {
        self.change_views
            .get(index)
            .and_then(|cv| cv.message().new_view_number())
    }

    /// The local node has asked for a view above the current one
    pub fn view_change_requested(&self) -> bool {
        self.my_index
            .and_then(|i| self.change_view_target(i))
            .is_some_and(|target| target > self.view_number)
    }

    /// Commits held, from any view
    pub fn count_committed(&self) -> usize {
        self.commits.count()
    }

    /// Validators not heard from since before the previous height
    pub fn count_failed(&self) -> usize {
        let threshold = self.block_index.saturating_sub(1);
        self.validators
            .keys()
            .iter()
            .filter(|key| self.last_seen.get(*key).is_none_or(|seen| *seen < threshold))
            .count()
    }

    pub fn more_than_f_nodes_committed_or_lost(&self) -> bool {
        self.count_committed() + self.count_failed() > self.f()
    }

    /// Whether normal prepare/commit processing is suspended.
    ///
    /// A pending local change view only suspends processing once more than
    /// `F` validators are committed or lost; below that the node keeps
    /// accepting the current view's traffic.
    pub fn view_changing(&self) -> bool {
        self.view_change_requested() && self.more_than_f_nodes_committed_or_lost()
    }

    /// Record that `index` sent a payload for `height`
    pub fn record_seen(&mut self, index: ValidatorIndex, height: BlockIndex) {
        if let Some(key) = self.validators.get(index) {
            self.last_seen.insert(*key, height);
        }
    }

    /// Last height `index` was heard from
    pub fn last_seen_height(&self, index: ValidatorIndex) -> Option<BlockIndex> {
        self.validators
            .get(index)
            .and_then(|key| self.last_seen.get(key))
            .copied()
    }

    /// Timestamp of the block being extended
    pub fn prev_timestamp(&self) -> Timestamp {
        self.snapshot
            .header_by_hash(&self.prev_hash)
            .map_or(0, |header| header.timestamp)
    }

    pub fn set_preparation(&mut self, envelope: Envelope) -> bool {
        self.preparations.set(envelope.validator_index(), envelope)
    }

    /// Store a commit. A validator's first commit for the height is final.
    pub fn set_commit(&mut self, envelope: Envelope) -> bool {
        let index = envelope.validator_index();
        !self.commits.is_set(index) && self.commits.set(index, envelope)
    }

    /// Store a change view if it targets a higher view than the one held
    pub fn set_change_view(&mut self, envelope: Envelope) -> bool {
        let index = envelope.validator_index();
        let target = envelope.message().new_view_number();
        if target <= self.change_view_target(index) {
            return false;
        }
        self.change_views.set(index, envelope)
    }

    /// Sign a message for the current height and view as the local validator
    pub fn make_signed_payload(
        &self,
        body: MessageBody,
        wallet: &dyn Wallet,
    ) -> ConsensusResult<Envelope> {
        let index = self
            .my_index
            .ok_or_else(|| ConsensusError::Wallet("observer nodes cannot sign".to_string()))?;
        let key = *self.validators.key(index)?;
        let message = ConsensusMessage::new(self.view_number, body);
        let mut payload = ConsensusPayload {
            version: PAYLOAD_VERSION,
            prev_hash: self.prev_hash,
            block_index: self.block_index,
            validator_index: index,
            data: message.to_bytes(),
            witness: Witness::default(),
        };
        let signature = wallet
            .sign(&key, &payload.unsigned_data())
            .ok_or_else(|| ConsensusError::Wallet(format!("no private key for {key}")))?;
        payload.witness = Witness::new(
            invocation_script(&[signature]),
            signature_redeem_script(&key),
        );
        Ok(Envelope::from_parts(payload, message))
    }

    /// Build and record the local change view
    pub fn make_change_view(
        &mut self,
        reason: ChangeViewReason,
        timestamp: Timestamp,
        wallet: &dyn Wallet,
    ) -> ConsensusResult<ConsensusPayload> {
        let envelope =
            self.make_signed_payload(MessageBody::ChangeView(ChangeView { timestamp, reason }), wallet)?;
        let payload = envelope.payload().clone();
        let index = envelope.validator_index();
        self.change_views.set(index, envelope);
        Ok(payload)
    }

    /// Build and record the primary's proposal over `transactions`.
    ///
    /// A reward transaction paying the summed fees to `reward_address` is
    /// prepended. The timestamp is at least one second past the previous
    /// block.
    pub fn make_prepare_request(
        &mut self,
        transactions: Vec<Transaction>,
        reward_address: Address,
        now: Timestamp,
        wallet: &dyn Wallet,
    ) -> ConsensusResult<ConsensusPayload> {
        let fees = transactions
            .iter()
            .fold(0u64, |acc, tx| acc.saturating_add(tx.fee));
        let reward = Transaction::reward(reward_address, fees);

        let mut data = ProposalData {
            timestamp: now.max(self.prev_timestamp().saturating_add(1)),
            next_consensus: self.validators.multisig_address()?,
            transaction_hashes: Vec::with_capacity(transactions.len() + 1),
            transactions: HashMap::with_capacity(transactions.len() + 1),
        };
        for tx in std::iter::once(reward.clone()).chain(transactions) {
            let hash = tx.hash();
            if data.transactions.insert(hash, tx).is_none() {
                data.transaction_hashes.push(hash);
            }
        }

        let request = PrepareRequest {
            timestamp: data.timestamp,
            next_consensus: data.next_consensus,
            transaction_hashes: data.transaction_hashes.clone(),
            reward_transaction: reward,
        };
        let envelope = self.make_signed_payload(MessageBody::PrepareRequest(request), wallet)?;
        let payload = envelope.payload().clone();

        self.proposal = Some(Proposal::new(data));
        self.header = None;
        self.set_preparation(envelope);
        Ok(payload)
    }

    /// Take on a verified proposal from the primary.
    ///
    /// Preparations acknowledging a different proposal and current-view
    /// commits that do not sign the new header are evicted.
    pub fn accept_prepare_request(&mut self, envelope: Envelope, request: &PrepareRequest) {
        let preparation_hash = envelope.hash();
        self.proposal = Some(Proposal::new(ProposalData {
            timestamp: request.timestamp,
            next_consensus: request.next_consensus,
            transaction_hashes: request.transaction_hashes.clone(),
            transactions: HashMap::new(),
        }));
        self.header = None;

        self.preparations.retain(|p| {
            matches!(
                &p.message().body,
                MessageBody::PrepareResponse(r) if r.preparation_hash == preparation_hash
            )
        });
        self.set_preparation(envelope);

        let Some(data) = self.ensure_header().map(BlockHeader::unsigned_data) else {
            return;
        };
        let view = self.view_number;
        let validators = &self.validators;
        self.commits.retain(|c| {
            c.view_number() != view || commit_signature_valid(validators, c, &data)
        });
    }

    /// Acknowledge the held proposal
    pub fn make_prepare_response(&mut self, wallet: &dyn Wallet) -> ConsensusResult<ConsensusPayload> {
        let preparation_hash = self
            .preparations
            .get(self.primary_index())
            .map(Envelope::hash)
            .ok_or_else(|| ConsensusError::Other("no prepare request to respond to".to_string()))?;
        let envelope = self.make_signed_payload(
            MessageBody::PrepareResponse(PrepareResponse { preparation_hash }),
            wallet,
        )?;
        let payload = envelope.payload().clone();
        self.set_preparation(envelope);
        Ok(payload)
    }

    /// The local commit for this height, signing the header on first use.
    /// Once made, the same commit is returned for the rest of the height.
    pub fn make_commit(&mut self, wallet: &dyn Wallet) -> ConsensusResult<ConsensusPayload> {
        if let Some(existing) = self.my_index.and_then(|i| self.commits.get(i)) {
            return Ok(existing.payload().clone());
        }
        let data = self
            .ensure_header()
            .map(BlockHeader::unsigned_data)
            .ok_or_else(|| ConsensusError::Other("no proposal to commit to".to_string()))?;
        let index = self
            .my_index
            .ok_or_else(|| ConsensusError::Wallet("observer nodes cannot commit".to_string()))?;
        let key = *self.validators.key(index)?;
        let signature = wallet
            .sign(&key, &data)
            .ok_or_else(|| ConsensusError::Wallet(format!("no private key for {key}")))?;
        let envelope = self.make_signed_payload(MessageBody::Commit(Commit { signature }), wallet)?;
        let payload = envelope.payload().clone();
        self.commits.set(index, envelope);
        Ok(payload)
    }

    pub fn make_recovery_request(
        &self,
        timestamp: Timestamp,
        wallet: &dyn Wallet,
    ) -> ConsensusResult<ConsensusPayload> {
        Ok(self
            .make_signed_payload(
                MessageBody::RecoveryRequest(RecoveryRequest { timestamp }),
                wallet,
            )?
            .into_payload())
    }

    /// Whether a commit's signature matches the header built from the proposal
    pub fn verify_commit(&mut self, envelope: &Envelope) -> Option<bool> {
        let data = self.ensure_header()?.unsigned_data();
        Some(commit_signature_valid(&self.validators, envelope, &data))
    }
}

pub(crate) fn commit_signature_valid(
    validators: &ValidatorSet,
    envelope: &Envelope,
    header_data: &[u8],
) -> bool {
    let MessageBody::Commit(commit) = &envelope.message().body else {
        return false;
    };
    validators
        .get(envelope.validator_index())
        .is_some_and(|key| key.verify(header_data, &commit.signature))
}
