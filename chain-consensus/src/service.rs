//! dBFT consensus service
//!
//! [`ConsensusService`] owns the [`RoundContext`] and drives it from four
//! inputs: consensus payloads from peers, timer ticks, transactions and
//! persisted blocks. It is single-threaded by construction; see
//! [`crate::actor`] for running it on a task.

use crate::config::ConsensusConfig;
use crate::context::{Proposal, RoundContext};
use crate::message::{ChangeViewReason, MessageBody, PrepareRequest, PrepareResponse, RecoveryMessage};
use crate::payload::{ConsensusPayload, Envelope, PAYLOAD_VERSION};
use crate::persistence::ConsensusStore;
use crate::traits::{Clock, Ledger, Mempool, TransactionPolicy, Transport, Wallet};
use crate::validators::{Role, ViewNumber};
use crate::ConsensusResult;
use chain_core::{Block, BlockIndex, Hash, Transaction};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Everything the service talks to
#[derive(Clone)]
pub struct Collaborators {
    pub ledger: Arc<dyn Ledger>,
    pub mempool: Arc<dyn Mempool>,
    pub policy: Arc<dyn TransactionPolicy>,
    pub wallet: Arc<dyn Wallet>,
    pub transport: Arc<dyn Transport>,
    pub clock: Arc<dyn Clock>,
    pub store: ConsensusStore,
}

/// Notifications emitted as the round progresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusEvent {
    /// A view was (re)initialized
    RoundStarted {
        height: BlockIndex,
        view: ViewNumber,
        role: Role,
    },
    /// The local node asked to leave the current view
    ChangeViewRequested {
        height: BlockIndex,
        view: ViewNumber,
        reason: ChangeViewReason,
    },
    /// The local commit went out
    CommitSent { height: BlockIndex, view: ViewNumber },
    /// A finalized block was handed to the transport
    BlockRelayed { height: BlockIndex, hash: Hash },
}

/// Pending timeout, bound to the round it was set in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Deadline {
    height: BlockIndex,
    view: ViewNumber,
    at_millis: u64,
}

/// `block_ms * 2^exponent`, saturating
fn scaled(block_ms: u64, exponent: u32) -> u64 {
    1u64.checked_shl(exponent)
        .map_or(u64::MAX, |factor| block_ms.saturating_mul(factor))
}

/// The consensus state machine of one node
pub struct ConsensusService {
    config: ConsensusConfig,
    context: RoundContext,
    deps: Collaborators,
    timer: Option<Deadline>,
    clock_started: u64,
    expected_delay: u64,
    block_received_time: u64,
    known_hashes: HashSet<Hash>,
    started: bool,
    is_recovering: bool,
    event_sender: Option<mpsc::UnboundedSender<ConsensusEvent>>,
}

impl ConsensusService {
    /// Create a stopped service for the block after the ledger tip
    pub fn new(config: ConsensusConfig, deps: Collaborators) -> ConsensusResult<Self> {
        config.validate()?;
        let context = RoundContext::new(deps.ledger.snapshot(), deps.wallet.as_ref());
        let now = deps.clock.now_millis();
        Ok(Self {
            config,
            context,
            deps,
            timer: None,
            clock_started: now,
            expected_delay: 0,
            block_received_time: now,
            known_hashes: HashSet::new(),
            started: false,
            is_recovering: false,
            event_sender: None,
        })
    }

    /// Set event sender for notifications
    pub fn set_event_sender(&mut self, sender: mpsc::UnboundedSender<ConsensusEvent>) {
        self.event_sender = Some(sender);
    }

    pub fn context(&self) -> &RoundContext {
        &self.context
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Wall-clock millisecond at which the current timeout fires
    pub fn timer_deadline(&self) -> Option<u64> {
        self.timer.map(|t| t.at_millis)
    }

    fn send_event(&self, event: ConsensusEvent) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event) {
                warn!("Failed to send consensus event: {}", e);
            }
        }
    }

    fn now(&self) -> u64 {
        self.deps.clock.now_millis()
    }

    fn broadcast(&self, payload: &ConsensusPayload) {
        self.deps.transport.broadcast(payload);
    }

    fn save(&self) {
        if self.config.ignore_recovery_logs {
            return;
        }
        if let Err(e) = self.deps.store.save(&self.context) {
            warn!(height = self.context.block_index(), "Failed to persist consensus state: {}", e);
        }
    }

    /// Begin participating.
    ///
    /// A persisted round for the current height is resumed if the node had
    /// already committed in it; otherwise view 0 starts fresh and peers are
    /// asked for their state.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        info!("Consensus service starting");

        if !self.config.ignore_recovery_logs
            && self.deps.store.load(&mut self.context)
            && self.context.commit_sent()
        {
            info!(
                height = self.context.block_index(),
                view = self.context.view_number(),
                "Resuming committed round"
            );
            self.check_preparations();
            return;
        }
        self.initialize(0);
        if !self.context.watch_only() {
            self.request_recovery();
        }
    }

    fn initialize(&mut self, view: ViewNumber) {
        if view == 0 {
            self.context
                .reset_for_height(self.deps.ledger.snapshot(), self.deps.wallet.as_ref());
        } else {
            self.context.reset_view(view);
            warn!(
                height = self.context.block_index(),
                view,
                primary = self.context.primary_index(),
                "Changed view"
            );
        }
        let role = self.context.role();
        info!(
            height = self.context.block_index(),
            view,
            index = ?self.context.my_index(),
            role = ?role,
            "Initialize round"
        );
        self.send_event(ConsensusEvent::RoundStarted {
            height: self.context.block_index(),
            view,
            role,
        });
        if self.context.watch_only() {
            return;
        }

        let block_ms = self.config.block_time_ms;
        let delay = if self.context.is_primary() && !self.is_recovering {
            let elapsed = self.now().saturating_sub(self.block_received_time);
            block_ms.saturating_sub(elapsed)
        } else {
            scaled(block_ms, u32::from(view) + 1)
        };
        self.change_timer(delay);
    }

    fn change_timer(&mut self, delay_ms: u64) {
        let now = self.now();
        self.clock_started = now;
        self.expected_delay = delay_ms;
        self.timer = Some(Deadline {
            height: self.context.block_index(),
            view: self.context.view_number(),
            at_millis: now.saturating_add(delay_ms),
        });
    }

    /// Push the timeout out by `factor * block_time / M` when progress is seen
    fn extend_timer(&mut self, factor: u64) {
        if self.context.watch_only()
            || self.context.view_change_requested()
            || self.context.commit_sent()
        {
            return;
        }
        let m = self.context.m().max(1) as u64;
        let elapsed = self.now().saturating_sub(self.clock_started);
        let extension = factor.saturating_mul(self.config.block_time_ms) / m;
        let next = self
            .expected_delay
            .saturating_add(extension)
            .saturating_sub(elapsed);
        if next > 0 {
            self.change_timer(next);
        }
    }

    /// Handle a payload from the network
    pub fn on_payload_received(&mut self, payload: ConsensusPayload) {
        self.process_payload(payload);
    }

    /// Validate and dispatch; returns whether the payload reached a handler
    fn process_payload(&mut self, payload: ConsensusPayload) -> bool {
        if !self.started || self.context.block_sent() {
            return false;
        }
        if payload.version != PAYLOAD_VERSION {
            debug!(version = payload.version, "Dropping payload with unknown version");
            return false;
        }
        if payload.prev_hash != self.context.prev_hash()
            || payload.block_index != self.context.block_index()
        {
            let height = self.context.snapshot().height();
            if height.saturating_add(1) < payload.block_index {
                info!(
                    expected = payload.block_index,
                    current = height,
                    "chain sync"
                );
            }
            return false;
        }
        if usize::from(payload.validator_index) >= self.context.validators().len() {
            return false;
        }
        let envelope = match Envelope::open(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!("Dropping undecodable payload: {}", e);
                return false;
            }
        };
        let height = self.context.snapshot().height();
        if !envelope
            .payload()
            .verify_with(height, self.context.validators())
        {
            debug!(index = envelope.validator_index(), "Dropping payload with invalid witness");
            return false;
        }
        self.context
            .record_seen(envelope.validator_index(), envelope.payload().block_index);

        match envelope.message().body.clone() {
            MessageBody::ChangeView(_) => self.on_change_view_received(envelope),
            MessageBody::PrepareRequest(request) => {
                self.on_prepare_request_received(envelope, request)
            }
            MessageBody::PrepareResponse(response) => {
                self.on_prepare_response_received(envelope, response)
            }
            MessageBody::Commit(_) => self.on_commit_received(envelope),
            MessageBody::RecoveryRequest(_) => self.on_recovery_request_received(&envelope),
            MessageBody::RecoveryMessage(message) => {
                self.on_recovery_message_received(&envelope, message)
            }
        }
        true
    }

    fn on_change_view_received(&mut self, envelope: Envelope) {
        let Some(target) = envelope.message().new_view_number() else {
            return;
        };
        if target <= self.context.view_number() {
            self.on_recovery_request_received(&envelope);
        }
        if self.context.commit_sent() {
            return;
        }
        let index = envelope.validator_index();
        if target <= self.context.change_view_target(index).unwrap_or(0) {
            return;
        }
        info!(
            height = self.context.block_index(),
            view = envelope.view_number(),
            index,
            nv = target,
            "Received change view"
        );
        self.context.set_change_view(envelope);
        self.check_expected_view(target);
    }

    /// Move to `view` once `M` validators ask for it
    fn check_expected_view(&mut self, view: ViewNumber) {
        if self.context.view_number() >= view {
            return;
        }
        let agreeing = self.context.change_views().count_where(|cv| {
            cv.message()
                .new_view_number()
                .is_some_and(|target| target >= view)
        });
        if agreeing < self.context.m() {
            return;
        }
        if !self.context.watch_only() {
            let mine = self
                .context
                .my_index()
                .and_then(|i| self.context.change_view_target(i));
            if mine.is_none_or(|target| target < view) {
                self.send_change_view(ChangeViewReason::ChangeAgreement);
            }
        }
        self.initialize(view);
    }

    fn on_prepare_request_received(&mut self, envelope: Envelope, request: PrepareRequest) {
        if self.context.request_sent_or_received() || self.context.view_changing() {
            return;
        }
        let index = envelope.validator_index();
        if index != self.context.primary_index()
            || envelope.view_number() != self.context.view_number()
        {
            return;
        }
        info!(
            height = self.context.block_index(),
            view = self.context.view_number(),
            index,
            tx = request.transaction_hashes.len(),
            "Received prepare request"
        );

        let now_secs = u64::from(self.deps.clock.now_secs());
        if request.timestamp <= self.context.prev_timestamp()
            || u64::from(request.timestamp)
                > now_secs.saturating_add(self.config.max_future_timestamp_secs)
        {
            warn!(timestamp = request.timestamp, "Prepare request timestamp out of range");
            return;
        }
        if request.transaction_hashes.len() > self.config.max_transactions_per_block {
            warn!(
                tx = request.transaction_hashes.len(),
                "Prepare request exceeds the transaction cap"
            );
            return;
        }
        if request
            .transaction_hashes
            .iter()
            .any(|h| self.context.snapshot().contains_transaction(h))
        {
            warn!("Prepare request references a transaction already on the ledger");
            return;
        }

        self.extend_timer(2);
        self.context.accept_prepare_request(envelope, &request);

        let mut verified: HashMap<Hash, Transaction> = self
            .deps
            .mempool
            .sorted_verified_transactions()
            .into_iter()
            .map(|tx| (tx.hash(), tx))
            .collect();
        let mut unverified = Vec::new();
        for hash in request.transaction_hashes.iter().skip(1) {
            if let Some(tx) = verified.remove(hash) {
                if !self.add_transaction(tx, false) {
                    return;
                }
            } else if let Some(tx) = self.deps.mempool.get_transaction(hash) {
                unverified.push(tx);
            }
        }
        for tx in unverified {
            if !self.add_transaction(tx, true) {
                return;
            }
        }
        if !self.add_transaction(request.reward_transaction, true) {
            return;
        }

        let missing = self
            .context
            .proposal()
            .map(|p| p.missing_hashes())
            .unwrap_or_default();
        if !missing.is_empty() {
            info!(missing = missing.len(), "Requesting missing transactions");
            self.deps.transport.request_transactions(&missing);
        }
    }

    /// Add a proposed body; a rejected body triggers a view change request
    fn add_transaction(&mut self, tx: Transaction, verify: bool) -> bool {
        if verify && !tx.verify_witness() {
            warn!(hash = %tx.hash(), "Proposed transaction has an invalid witness");
            self.request_change_view(ChangeViewReason::TxInvalid);
            return false;
        }
        if !self.deps.policy.check_policy(&tx) {
            warn!(hash = %tx.hash(), "Proposed transaction rejected by policy");
            self.request_change_view(ChangeViewReason::TxRejectedByPolicy);
            return false;
        }
        let Some(proposal) = self.context.proposal.as_mut() else {
            return false;
        };
        proposal.add_transaction(tx);
        if proposal.is_complete() {
            self.check_prepare_response();
        }
        true
    }

    /// The reward must pay exactly the fees and control must pass to the
    /// validators' multisig
    fn verify_request(&self) -> bool {
        let Some(proposal) = self.context.proposal() else {
            return false;
        };
        let Ok(expected) = self.context.validators().multisig_address() else {
            return false;
        };
        if proposal.data().next_consensus != expected {
            return false;
        }
        reward_pays_fees(proposal)
    }

    fn check_prepare_response(&mut self) {
        if !self.context.proposal().is_some_and(|p| p.is_complete())
            || self.context.is_primary()
            || self.context.watch_only()
            || self.context.response_sent()
        {
            return;
        }
        if !self.verify_request() {
            warn!(height = self.context.block_index(), "Proposal rejected by block policy");
            self.request_change_view(ChangeViewReason::BlockRejectedByPolicy);
            return;
        }
        self.extend_timer(2);
        let payload = match self.context.make_prepare_response(self.deps.wallet.as_ref()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to make prepare response: {}", e);
                return;
            }
        };
        info!(
            height = self.context.block_index(),
            view = self.context.view_number(),
            "Sending prepare response"
        );
        self.save();
        self.broadcast(&payload);
        self.check_preparations();
    }

    fn on_prepare_response_received(&mut self, envelope: Envelope, response: PrepareResponse) {
        let index = envelope.validator_index();
        if envelope.view_number() != self.context.view_number()
            || self.context.preparations().is_set(index)
            || self.context.view_changing()
        {
            return;
        }
        if let Some(request) = self.context.preparations().get(self.context.primary_index()) {
            if response.preparation_hash != request.hash() {
                return;
            }
        }
        info!(
            height = self.context.block_index(),
            view = self.context.view_number(),
            index,
            "Received prepare response"
        );
        self.extend_timer(2);
        self.context.set_preparation(envelope);
        if self.context.watch_only() || self.context.commit_sent() {
            return;
        }
        if self.context.request_sent_or_received() {
            self.check_preparations();
        }
    }

    fn on_commit_received(&mut self, envelope: Envelope) {
        let index = envelope.validator_index();
        if let Some(existing) = self.context.commits().get(index) {
            if existing.hash() != envelope.hash() {
                warn!(
                    height = self.context.block_index(),
                    index,
                    view = envelope.view_number(),
                    existing_view = existing.view_number(),
                    "Rejected second commit"
                );
            }
            return;
        }
        self.extend_timer(4);

        if envelope.view_number() == self.context.view_number() {
            info!(
                height = self.context.block_index(),
                view = self.context.view_number(),
                index,
                nc = self.context.count_committed(),
                "Received commit"
            );
            match self.context.verify_commit(&envelope) {
                Some(true) => {
                    self.context.set_commit(envelope);
                    self.check_commits();
                }
                Some(false) => warn!(index, "Commit signature does not match the header"),
                None => {
                    self.context.set_commit(envelope);
                }
            }
            return;
        }
        info!(
            height = self.context.block_index(),
            view = envelope.view_number(),
            index,
            "Received commit for another view"
        );
        self.context.set_commit(envelope);
    }

    fn check_preparations(&mut self) {
        if self.context.watch_only()
            || self.context.preparations().count() < self.context.m()
            || !self.context.proposal().is_some_and(|p| p.is_complete())
        {
            return;
        }
        let payload = match self.context.make_commit(self.deps.wallet.as_ref()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to make commit: {}", e);
                return;
            }
        };
        info!(
            height = self.context.block_index(),
            view = self.context.view_number(),
            "Sending commit"
        );
        self.save();
        self.broadcast(&payload);
        self.send_event(ConsensusEvent::CommitSent {
            height: self.context.block_index(),
            view: self.context.view_number(),
        });
        self.change_timer(self.config.block_time_ms);
        self.check_commits();
    }

    fn check_commits(&mut self) {
        let view = self.context.view_number();
        if self
            .context
            .commits()
            .count_where(|c| c.view_number() == view)
            < self.context.m()
            || !self.context.proposal().is_some_and(|p| p.is_complete())
        {
            return;
        }
        match self.context.create_block() {
            Ok(Some(block)) => {
                info!(
                    height = block.index(),
                    hash = %block.hash(),
                    tx = block.transactions.len(),
                    "Relaying block"
                );
                self.deps.transport.relay_block(&block);
                self.send_event(ConsensusEvent::BlockRelayed {
                    height: block.index(),
                    hash: block.hash(),
                });
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to assemble block: {}", e),
        }
    }

    /// Handle the timer firing
    pub fn on_timer_tick(&mut self) {
        let Some(deadline) = self.timer else {
            return;
        };
        if !self.started || self.context.watch_only() || self.context.block_sent() {
            return;
        }
        if deadline.height != self.context.block_index()
            || deadline.view != self.context.view_number()
            || self.now() < deadline.at_millis
        {
            return;
        }
        self.timer = None;
        info!(
            height = deadline.height,
            view = deadline.view,
            "Timeout"
        );

        if self.context.is_primary() && !self.context.request_sent_or_received() {
            self.send_prepare_request();
        } else if self.context.commit_sent() {
            self.send_recovery_message();
            self.change_timer(scaled(self.config.block_time_ms, 1));
        } else {
            let missing_bodies = self
                .context
                .proposal()
                .is_some_and(|p| !p.is_complete());
            let reason = if missing_bodies {
                ChangeViewReason::TxNotFound
            } else {
                ChangeViewReason::Timeout
            };
            self.request_change_view(reason);
        }
    }

    fn send_prepare_request(&mut self) {
        let cap = self.config.max_transactions_per_block.saturating_sub(1);
        let transactions: Vec<Transaction> = self
            .deps
            .policy
            .filter_for_block(self.deps.mempool.sorted_verified_transactions())
            .into_iter()
            .filter(|tx| !tx.is_reward())
            .take(cap)
            .collect();
        let payload = match self.context.make_prepare_request(
            transactions,
            self.deps.wallet.reward_address(),
            self.deps.clock.now_secs(),
            self.deps.wallet.as_ref(),
        ) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to make prepare request: {}", e);
                return;
            }
        };
        info!(
            height = self.context.block_index(),
            view = self.context.view_number(),
            tx = self
                .context
                .proposal()
                .map_or(0, |p| p.transaction_hashes().len()),
            "Sending prepare request"
        );
        self.save();
        self.broadcast(&payload);
        if self.context.validators().len() == 1 {
            self.check_preparations();
        }

        let block_ms = self.config.block_time_ms;
        let view = self.context.view_number();
        let first_view_credit = if view == 0 { block_ms } else { 0 };
        self.change_timer(scaled(block_ms, u32::from(view) + 1).saturating_sub(first_view_credit));
    }

    fn send_change_view(&mut self, reason: ChangeViewReason) {
        let payload = match self.context.make_change_view(
            reason,
            self.deps.clock.now_secs(),
            self.deps.wallet.as_ref(),
        ) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to make change view: {}", e);
                return;
            }
        };
        self.save();
        self.broadcast(&payload);
        self.send_event(ConsensusEvent::ChangeViewRequested {
            height: self.context.block_index(),
            view: self.context.view_number(),
            reason,
        });
    }

    /// Ask to leave the current view, or for recovery when a view change
    /// can no longer gather a quorum
    fn request_change_view(&mut self, reason: ChangeViewReason) {
        if self.context.watch_only() {
            return;
        }
        let view = self.context.view_number();
        self.change_timer(scaled(self.config.block_time_ms, u32::from(view) + 2));
        let Some(expected_view) = view.checked_add(1) else {
            warn!(
                height = self.context.block_index(),
                view,
                reason = ?reason,
                "No view left to change to, requesting recovery"
            );
            self.request_recovery();
            return;
        };

        let nc = self.context.count_committed();
        let nf = self.context.count_failed();
        if self.context.more_than_f_nodes_committed_or_lost() {
            info!(
                height = self.context.block_index(),
                view,
                nc,
                nf,
                reason = ?reason,
                "Skipping change view, requesting recovery"
            );
            self.request_recovery();
            return;
        }
        info!(
            height = self.context.block_index(),
            view,
            nv = expected_view,
            nc,
            nf,
            reason = ?reason,
            "Requesting change view"
        );
        self.send_change_view(reason);
        self.check_expected_view(expected_view);
    }

    fn request_recovery(&self) {
        match self
            .context
            .make_recovery_request(self.deps.clock.now_secs(), self.deps.wallet.as_ref())
        {
            Ok(payload) => self.broadcast(&payload),
            Err(e) => warn!("Failed to make recovery request: {}", e),
        }
    }

    fn send_recovery_message(&self) {
        match self.context.make_recovery_message(self.deps.wallet.as_ref()) {
            Ok(payload) => {
                info!(
                    height = self.context.block_index(),
                    view = self.context.view_number(),
                    "Sending recovery message"
                );
                self.broadcast(&payload);
            }
            Err(e) => warn!("Failed to make recovery message: {}", e),
        }
    }

    /// Answer a recovery request at most once per payload. Until the node
    /// has committed only the `F` validators after the requester answer.
    fn on_recovery_request_received(&mut self, envelope: &Envelope) {
        if !self.known_hashes.insert(envelope.hash()) || self.context.watch_only() {
            return;
        }
        if !self.context.commit_sent() {
            let n = self.context.validators().len();
            let requester = usize::from(envelope.validator_index());
            let mine = self.context.my_index().map(usize::from);
            let chosen = (1..=self.context.f()).any(|i| Some((requester + i) % n) == mine);
            if !chosen {
                return;
            }
        }
        info!(
            height = self.context.block_index(),
            index = envelope.validator_index(),
            "Answering recovery request"
        );
        self.send_recovery_message();
    }

    /// Feed a rebuilt payload through the normal path
    fn reverify_and_process(&mut self, payload: ConsensusPayload) -> bool {
        self.process_payload(payload)
    }

    fn on_recovery_message_received(&mut self, envelope: &Envelope, message: RecoveryMessage) {
        let view = envelope.view_number();
        info!(
            height = self.context.block_index(),
            view,
            index = envelope.validator_index(),
            "Received recovery message"
        );
        self.is_recovering = true;
        let (mut valid_change_views, mut total_change_views) = (0, 0);
        let (mut valid_requests, mut total_requests) = (0, 0);
        let (mut valid_responses, mut total_responses) = (0, 0);
        let (mut valid_commits, mut total_commits) = (0, 0);

        if view > self.context.view_number() && !self.context.commit_sent() {
            let payloads = message.change_view_payloads(&self.context);
            total_change_views = payloads.len();
            for payload in payloads {
                if self.reverify_and_process(payload) {
                    valid_change_views += 1;
                }
            }
        }
        if view == self.context.view_number()
            && !self.context.view_changing()
            && !self.context.commit_sent()
        {
            if !self.context.request_sent_or_received() {
                if let Some(payload) = message.prepare_request_payload(&self.context, view) {
                    total_requests = 1;
                    if self.reverify_and_process(payload) {
                        valid_requests = 1;
                    }
                } else if self.context.is_primary() {
                    self.send_prepare_request();
                }
            }
            let payloads = message.prepare_response_payloads(&self.context, view);
            total_responses = payloads.len();
            for payload in payloads {
                if self.reverify_and_process(payload) {
                    valid_responses += 1;
                }
            }
        }
        if view <= self.context.view_number() {
            let payloads = message.commit_payloads(&self.context);
            total_commits = payloads.len();
            for payload in payloads {
                if self.reverify_and_process(payload) {
                    valid_commits += 1;
                }
            }
        }

        info!(
            "Recovery merged (valid/total) change views {}/{} prepare requests {}/{} responses {}/{} commits {}/{}",
            valid_change_views,
            total_change_views,
            valid_requests,
            total_requests,
            valid_responses,
            total_responses,
            valid_commits,
            total_commits
        );
        self.is_recovering = false;
    }

    /// Offer a transaction body the proposal is waiting for
    pub fn on_transaction_received(&mut self, tx: Transaction) {
        if !self.started || tx.is_reward() {
            return;
        }
        if !self.context.is_backup()
            || self.context.view_changing()
            || !self.context.request_sent_or_received()
            || self.context.response_sent()
            || self.context.block_sent()
        {
            return;
        }
        let hash = tx.hash();
        if !self.context.proposal().is_some_and(|p| p.is_missing(&hash)) {
            return;
        }
        debug!(hash = %hash, "Received proposed transaction");
        self.add_transaction(tx, true);
    }

    /// The ledger appended `block`; move on to the next height
    pub fn on_block_persisted(&mut self, block: &Block) {
        info!(
            height = block.index(),
            hash = %block.hash(),
            tx = block.transactions.len(),
            "Block persisted"
        );
        self.block_received_time = self.now();
        self.known_hashes.clear();
        if self.started {
            self.initialize(0);
        }
    }
}

impl std::fmt::Debug for ConsensusService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusService")
            .field("config", &self.config)
            .field("context", &self.context)
            .field("started", &self.started)
            .field("timer", &self.timer)
            .finish_non_exhaustive()
    }
}

/// The proposal opens with its only reward transaction, paying exactly the
/// fees of the rest
fn reward_pays_fees(proposal: &Proposal) -> bool {
    let mut hashes = proposal.transaction_hashes().iter();
    let Some(reward) = hashes
        .next()
        .and_then(|hash| proposal.transaction(hash))
        .filter(|tx| tx.is_reward())
    else {
        return false;
    };
    let mut fees = 0u64;
    for hash in hashes {
        match proposal.transaction(hash) {
            Some(tx) if !tx.is_reward() => fees = fees.saturating_add(tx.fee),
            _ => return false,
        }
    }
    reward.amount == fees
}
