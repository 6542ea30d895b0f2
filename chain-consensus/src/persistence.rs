//! Durable snapshot of the round state
//!
//! The round state is written to the consensus column family before every
//! prepare response, commit and change view leaves the node. After a crash
//! it is read back so the node never signs a conflicting commit for a
//! height it already committed to.

use crate::context::{Proposal, ProposalData, RoundContext};
use crate::message::{MessageType, MAX_TRANSACTIONS_PER_PROPOSAL};
use crate::payload::{Envelope, PAYLOAD_VERSION};
use crate::slots::ValidatorSlots;
use crate::validators::{Role, ValidatorIndex};
use crate::{ConsensusError, ConsensusResult};
use chain_core::{
    Address, BinaryReader, BinaryWriter, BlockIndex, Decode, Encode, Hash, Timestamp, Transaction,
};
use chain_db::{ColumnFamily, SharedDatabase};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Storage key of the round state within the consensus column family
pub const CONSENSUS_STATE_KEY: &[u8] = &[0xf4];

/// Round state as laid out on disk
#[derive(Debug)]
struct StoredRound {
    version: u32,
    block_index: BlockIndex,
    view_number: u8,
    primary_index: u32,
    timestamp: Timestamp,
    next_consensus: Option<Address>,
    transaction_hashes: Vec<Hash>,
    transactions: Vec<Transaction>,
    preparations: ValidatorSlots<Envelope>,
    commits: ValidatorSlots<Envelope>,
    change_views: ValidatorSlots<Envelope>,
    last_change_views: ValidatorSlots<Envelope>,
}

impl Decode for StoredRound {
    fn decode(reader: &mut BinaryReader<'_>) -> chain_core::CoreResult<Self> {
        Ok(Self {
            version: reader.read_u32()?,
            block_index: reader.read_u32()?,
            view_number: reader.read_u8()?,
            primary_index: reader.read_u32()?,
            timestamp: reader.read_u32()?,
            next_consensus: {
                let address: Address = reader.read()?;
                (!address.is_zero()).then_some(address)
            },
            transaction_hashes: reader.read_array_of(MAX_TRANSACTIONS_PER_PROPOSAL)?,
            transactions: reader.read_array_of(MAX_TRANSACTIONS_PER_PROPOSAL)?,
            preparations: reader.read()?,
            commits: reader.read()?,
            change_views: reader.read()?,
            last_change_views: reader.read()?,
        })
    }
}

/// Serialize the part of `context` that must survive a restart
pub fn encode_context(context: &RoundContext) -> Vec<u8> {
    let mut writer = BinaryWriter::new();
    writer.write_u32(PAYLOAD_VERSION);
    writer.write_u32(context.block_index);
    writer.write_u8(context.view_number);
    writer.write_u32(u32::from(context.primary_index()));

    match context.proposal.as_ref().map(Proposal::data) {
        Some(data) => {
            writer.write_u32(data.timestamp);
            writer.write(&data.next_consensus);
            writer.write_array(&data.transaction_hashes);
            let bodies: Vec<Transaction> = data
                .transaction_hashes
                .iter()
                .filter_map(|h| data.transactions.get(h).cloned())
                .collect();
            writer.write_array(&bodies);
        }
        None => {
            writer.write_u32(0);
            writer.write(&Address::zero());
            writer.write_array::<Hash>(&[]);
            writer.write_array::<Transaction>(&[]);
        }
    }

    writer.write(&context.preparations);
    writer.write(&context.commits);
    writer.write(&context.change_views);
    writer.write(&context.last_change_views);
    writer.into_bytes()
}

/// Restore a stored round into `context`.
///
/// The stored round must belong to the same height and validator count.
/// Nothing in `context` changes unless the whole record is accepted.
pub fn decode_into(context: &mut RoundContext, bytes: &[u8]) -> ConsensusResult<()> {
    let stored = StoredRound::from_bytes(bytes)?;
    let reject = |reason: String| -> ConsensusResult<()> { Err(ConsensusError::Persistence(reason)) };

    if stored.version != PAYLOAD_VERSION {
        return reject(format!("version {}", stored.version));
    }
    if stored.block_index != context.block_index {
        return reject(format!(
            "stored height {} but the round is at {}",
            stored.block_index, context.block_index
        ));
    }
    let n = context.validators.len();
    let expected_primary =
        crate::validators::primary_index(stored.block_index, stored.view_number, n);
    if stored.primary_index != u32::from(expected_primary) {
        return reject(format!(
            "primary {} does not match view {}",
            stored.primary_index, stored.view_number
        ));
    }
    for (name, len) in [
        ("preparations", stored.preparations.len()),
        ("commits", stored.commits.len()),
        ("change views", stored.change_views.len()),
        ("last change views", stored.last_change_views.len()),
    ] {
        if len != n {
            return reject(format!("{len} {name} for {n} validators"));
        }
    }

    let slot_kind = |index: ValidatorIndex| {
        if index == expected_primary {
            MessageType::PrepareRequest
        } else {
            MessageType::PrepareResponse
        }
    };
    check_slots(context, "preparations", &stored.preparations, |index, envelope| {
        envelope.message().message_type() == slot_kind(index)
            && envelope.view_number() == stored.view_number
    })?;
    check_slots(context, "commits", &stored.commits, |_, envelope| {
        envelope.message().message_type() == MessageType::Commit
    })?;
    for (name, slots) in [
        ("change views", &stored.change_views),
        ("last change views", &stored.last_change_views),
    ] {
        check_slots(context, name, slots, |_, envelope| {
            envelope.message().message_type() == MessageType::ChangeView
        })?;
    }

    let proposal = if stored.transaction_hashes.is_empty() {
        None
    } else {
        let mut transactions = HashMap::with_capacity(stored.transactions.len());
        for tx in stored.transactions {
            let hash = tx.hash();
            if !stored.transaction_hashes.contains(&hash) {
                return reject(format!("body {hash} is not part of the proposal"));
            }
            transactions.insert(hash, tx);
        }
        Some(Proposal::new(ProposalData {
            timestamp: stored.timestamp,
            next_consensus: stored.next_consensus.unwrap_or_default(),
            transaction_hashes: stored.transaction_hashes,
            transactions,
        }))
    };

    context.view_number = stored.view_number;
    context.role = Role::assign(context.my_index, expected_primary);
    context.proposal = proposal;
    context.preparations = stored.preparations;
    context.commits = stored.commits;
    context.change_views = stored.change_views;
    context.last_change_views = stored.last_change_views;
    context.header = None;
    context.block = None;
    Ok(())
}

/// Every stored payload must be signed by the validator owning its slot,
/// for this round's height and parent, and satisfy `fits`
fn check_slots(
    context: &RoundContext,
    name: &str,
    slots: &ValidatorSlots<Envelope>,
    mut fits: impl FnMut(ValidatorIndex, &Envelope) -> bool,
) -> ConsensusResult<()> {
    for (index, envelope) in slots.iter() {
        let payload = envelope.payload();
        let misplaced = envelope.validator_index() != index
            || payload.block_index != context.block_index
            || payload.prev_hash != context.prev_hash;
        if misplaced || !fits(index, envelope) {
            return Err(ConsensusError::Persistence(format!(
                "{name} slot {index} holds a {:?} from validator {} for block {}",
                envelope.message().message_type(),
                envelope.validator_index(),
                payload.block_index
            )));
        }
    }
    Ok(())
}

/// Reads and writes the round state in a key-value store
#[derive(Clone)]
pub struct ConsensusStore {
    db: SharedDatabase,
}

impl ConsensusStore {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    /// Durably write the round state
    pub fn save(&self, context: &RoundContext) -> ConsensusResult<()> {
        let bytes = encode_context(context);
        self.db.put_sync(
            ColumnFamily::Consensus.name(),
            CONSENSUS_STATE_KEY,
            &bytes,
        )?;
        debug!(
            "Saved consensus state for block {} view {} ({} bytes)",
            context.block_index,
            context.view_number,
            bytes.len()
        );
        Ok(())
    }

    /// Load the stored round into `context`. Returns whether it was applied;
    /// a missing, stale or corrupt record leaves `context` untouched.
    pub fn load(&self, context: &mut RoundContext) -> bool {
        let bytes = match self
            .db
            .get(ColumnFamily::Consensus.name(), CONSENSUS_STATE_KEY)
        {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return false,
            Err(e) => {
                warn!("Failed to read consensus state: {}", e);
                return false;
            }
        };
        match decode_into(context, &bytes) {
            Ok(()) => {
                debug!(
                    "Restored consensus state for block {} view {}",
                    context.block_index, context.view_number
                );
                true
            }
            Err(e) => {
                warn!("Ignoring stored consensus state: {}", e);
                false
            }
        }
    }
}

impl std::fmt::Debug for ConsensusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusStore").finish_non_exhaustive()
    }
}
