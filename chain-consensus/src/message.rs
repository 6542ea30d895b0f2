//! Consensus messages
//!
//! Every message starts with a two-byte header, `type: u8` then
//! `view_number: u8`, followed by the body of that type. Messages travel as
//! the opaque `data` of a [`ConsensusPayload`](crate::ConsensusPayload).

use crate::validators::{ValidatorIndex, ViewNumber, MAX_VALIDATORS};
use crate::{ConsensusError, ConsensusResult};
use chain_core::{
    Address, BinaryReader, BinaryWriter, CoreError, CoreResult, Decode, Encode, Hash, Signature,
    Timestamp, Transaction, Witness,
};
use std::collections::HashSet;

/// Upper bound on hashes in one proposal
pub const MAX_TRANSACTIONS_PER_PROPOSAL: usize = u16::MAX as usize;

/// Wire discriminator of a consensus message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    ChangeView = 0x00,
    PrepareRequest = 0x20,
    PrepareResponse = 0x21,
    Commit = 0x30,
    RecoveryRequest = 0x40,
    RecoveryMessage = 0x41,
}

impl TryFrom<u8> for MessageType {
    type Error = CoreError;

    fn try_from(value: u8) -> CoreResult<Self> {
        Ok(match value {
            0x00 => MessageType::ChangeView,
            0x20 => MessageType::PrepareRequest,
            0x21 => MessageType::PrepareResponse,
            0x30 => MessageType::Commit,
            0x40 => MessageType::RecoveryRequest,
            0x41 => MessageType::RecoveryMessage,
            other => {
                return Err(CoreError::Deserialization(format!(
                    "unknown consensus message type {other:#04x}"
                )))
            }
        })
    }
}

/// Why a validator asks to leave the current view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChangeViewReason {
    Timeout = 0x00,
    ChangeAgreement = 0x01,
    TxNotFound = 0x02,
    TxRejectedByPolicy = 0x03,
    TxInvalid = 0x04,
    BlockRejectedByPolicy = 0x05,
}

impl TryFrom<u8> for ChangeViewReason {
    type Error = CoreError;

    fn try_from(value: u8) -> CoreResult<Self> {
        Ok(match value {
            0x00 => ChangeViewReason::Timeout,
            0x01 => ChangeViewReason::ChangeAgreement,
            0x02 => ChangeViewReason::TxNotFound,
            0x03 => ChangeViewReason::TxRejectedByPolicy,
            0x04 => ChangeViewReason::TxInvalid,
            0x05 => ChangeViewReason::BlockRejectedByPolicy,
            other => {
                return Err(CoreError::Deserialization(format!(
                    "unknown change view reason {other:#04x}"
                )))
            }
        })
    }
}

/// Request to move to `view_number + 1`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeView {
    pub timestamp: Timestamp,
    pub reason: ChangeViewReason,
}

/// The primary's proposal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareRequest {
    pub timestamp: Timestamp,
    pub next_consensus: Address,
    /// Hashes of the proposed body; the first is the reward transaction
    pub transaction_hashes: Vec<Hash>,
    pub reward_transaction: Transaction,
}

/// A backup's acknowledgement of the primary's proposal payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareResponse {
    pub preparation_hash: Hash,
}

/// Signature over the proposed block header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commit {
    pub signature: Signature,
}

/// Ask peers for their round state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryRequest {
    pub timestamp: Timestamp,
}

/// Change view stripped of the envelope it was signed in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeViewCompact {
    pub validator_index: ValidatorIndex,
    pub original_view_number: ViewNumber,
    pub timestamp: Timestamp,
    pub reason: ChangeViewReason,
    pub invocation_script: Vec<u8>,
}

/// Preparation (request or response) stripped of its envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparationCompact {
    pub validator_index: ValidatorIndex,
    pub invocation_script: Vec<u8>,
}

/// Commit stripped of its envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitCompact {
    pub view_number: ViewNumber,
    pub validator_index: ValidatorIndex,
    pub signature: Signature,
    pub invocation_script: Vec<u8>,
}

/// A validator's round state, compacted for a peer that fell behind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryMessage {
    pub change_views: Vec<ChangeViewCompact>,
    pub prepare_request: Option<PrepareRequest>,
    /// Plurality preparation hash, only sent without a prepare request
    pub preparation_hash: Option<Hash>,
    pub preparations: Vec<PreparationCompact>,
    pub commits: Vec<CommitCompact>,
}

/// Message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    ChangeView(ChangeView),
    PrepareRequest(PrepareRequest),
    PrepareResponse(PrepareResponse),
    Commit(Commit),
    RecoveryRequest(RecoveryRequest),
    RecoveryMessage(RecoveryMessage),
}

/// A consensus message: the view it was sent in plus its body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusMessage {
    pub view_number: ViewNumber,
    pub body: MessageBody,
}

impl ConsensusMessage {
    pub fn new(view_number: ViewNumber, body: MessageBody) -> Self {
        Self { view_number, body }
    }

    pub fn message_type(&self) -> MessageType {
        match &self.body {
            MessageBody::ChangeView(_) => MessageType::ChangeView,
            MessageBody::PrepareRequest(_) => MessageType::PrepareRequest,
            MessageBody::PrepareResponse(_) => MessageType::PrepareResponse,
            MessageBody::Commit(_) => MessageType::Commit,
            MessageBody::RecoveryRequest(_) => MessageType::RecoveryRequest,
            MessageBody::RecoveryMessage(_) => MessageType::RecoveryMessage,
        }
    }

    /// Target view of a change view message; always one past the view it was
    /// sent in, and none from the last view
    pub fn new_view_number(&self) -> Option<ViewNumber> {
        match self.body {
            MessageBody::ChangeView(_) => self.view_number.checked_add(1),
            _ => None,
        }
    }

    /// Decode a message carried in a payload
    pub fn decode_from(data: &[u8]) -> ConsensusResult<Self> {
        Self::from_bytes(data).map_err(|e| ConsensusError::InvalidPayload(e.to_string()))
    }
}

impl Encode for ChangeView {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_u32(self.timestamp);
        writer.write_u8(self.reason as u8);
    }
}

impl Decode for ChangeView {
    fn decode(reader: &mut BinaryReader<'_>) -> CoreResult<Self> {
        Ok(Self {
            timestamp: reader.read_u32()?,
            reason: ChangeViewReason::try_from(reader.read_u8()?)?,
        })
    }
}

impl Encode for PrepareRequest {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_u32(self.timestamp);
        writer.write(&self.next_consensus);
        writer.write_array(&self.transaction_hashes);
        writer.write(&self.reward_transaction);
    }
}

impl Decode for PrepareRequest {
    fn decode(reader: &mut BinaryReader<'_>) -> CoreResult<Self> {
        let timestamp = reader.read_u32()?;
        let next_consensus = reader.read()?;
        let transaction_hashes: Vec<Hash> = reader.read_array_of(MAX_TRANSACTIONS_PER_PROPOSAL)?;
        let reward_transaction: Transaction = reader.read()?;

        if transaction_hashes.first() != Some(&reward_transaction.hash()) {
            return Err(CoreError::Deserialization(
                "first transaction hash must be the reward transaction".to_string(),
            ));
        }
        if !reward_transaction.is_reward() {
            return Err(CoreError::Deserialization(
                "reward transaction has the wrong kind".to_string(),
            ));
        }
        let distinct: HashSet<&Hash> = transaction_hashes.iter().collect();
        if distinct.len() != transaction_hashes.len() {
            return Err(CoreError::Deserialization(
                "duplicate transaction hashes".to_string(),
            ));
        }

        Ok(Self {
            timestamp,
            next_consensus,
            transaction_hashes,
            reward_transaction,
        })
    }
}

impl Encode for PrepareResponse {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write(&self.preparation_hash);
    }
}

impl Decode for PrepareResponse {
    fn decode(reader: &mut BinaryReader<'_>) -> CoreResult<Self> {
        Ok(Self {
            preparation_hash: reader.read()?,
        })
    }
}

impl Encode for Commit {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write(&self.signature);
    }
}

impl Decode for Commit {
    fn decode(reader: &mut BinaryReader<'_>) -> CoreResult<Self> {
        Ok(Self {
            signature: reader.read()?,
        })
    }
}

impl Encode for RecoveryRequest {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_u32(self.timestamp);
    }
}

impl Decode for RecoveryRequest {
    fn decode(reader: &mut BinaryReader<'_>) -> CoreResult<Self> {
        Ok(Self {
            timestamp: reader.read_u32()?,
        })
    }
}

impl Encode for ChangeViewCompact {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_u16(self.validator_index);
        writer.write_u8(self.original_view_number);
        writer.write_u32(self.timestamp);
        writer.write_u8(self.reason as u8);
        writer.write_var_bytes(&self.invocation_script);
    }
}

impl Decode for ChangeViewCompact {
    fn decode(reader: &mut BinaryReader<'_>) -> CoreResult<Self> {
        Ok(Self {
            validator_index: reader.read_u16()?,
            original_view_number: reader.read_u8()?,
            timestamp: reader.read_u32()?,
            reason: ChangeViewReason::try_from(reader.read_u8()?)?,
            invocation_script: reader.read_var_bytes(Witness::MAX_INVOCATION_SCRIPT)?,
        })
    }
}

impl Encode for PreparationCompact {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_u16(self.validator_index);
        writer.write_var_bytes(&self.invocation_script);
    }
}

impl Decode for PreparationCompact {
    fn decode(reader: &mut BinaryReader<'_>) -> CoreResult<Self> {
        Ok(Self {
            validator_index: reader.read_u16()?,
            invocation_script: reader.read_var_bytes(Witness::MAX_INVOCATION_SCRIPT)?,
        })
    }
}

impl Encode for CommitCompact {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_u8(self.view_number);
        writer.write_u16(self.validator_index);
        writer.write(&self.signature);
        writer.write_var_bytes(&self.invocation_script);
    }
}

impl Decode for CommitCompact {
    fn decode(reader: &mut BinaryReader<'_>) -> CoreResult<Self> {
        Ok(Self {
            view_number: reader.read_u8()?,
            validator_index: reader.read_u16()?,
            signature: reader.read()?,
            invocation_script: reader.read_var_bytes(Witness::MAX_INVOCATION_SCRIPT)?,
        })
    }
}

impl Encode for RecoveryMessage {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_array(&self.change_views);
        match &self.prepare_request {
            Some(request) => {
                writer.write_bool(true);
                writer.write(request);
            }
            None => {
                writer.write_bool(false);
                match &self.preparation_hash {
                    Some(hash) => writer.write_var_bytes(hash.as_bytes()),
                    None => writer.write_var_bytes(&[]),
                }
            }
        }
        writer.write_array(&self.preparations);
        writer.write_array(&self.commits);
    }
}

impl Decode for RecoveryMessage {
    fn decode(reader: &mut BinaryReader<'_>) -> CoreResult<Self> {
        let change_views = reader.read_array_of(MAX_VALIDATORS)?;
        let (prepare_request, preparation_hash) = if reader.read_bool()? {
            (Some(reader.read()?), None)
        } else {
            let bytes = reader.read_var_bytes(Hash::LEN)?;
            match bytes.len() {
                0 => (None, None),
                Hash::LEN => (None, Some(Hash::from_slice(&bytes))),
                len => {
                    return Err(CoreError::Deserialization(format!(
                        "preparation hash of {len} bytes"
                    )))
                }
            }
        };
        Ok(Self {
            change_views,
            prepare_request,
            preparation_hash,
            preparations: reader.read_array_of(MAX_VALIDATORS)?,
            commits: reader.read_array_of(MAX_VALIDATORS)?,
        })
    }
}

impl Encode for ConsensusMessage {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_u8(self.message_type() as u8);
        writer.write_u8(self.view_number);
        match &self.body {
            MessageBody::ChangeView(m) => writer.write(m),
            MessageBody::PrepareRequest(m) => writer.write(m),
            MessageBody::PrepareResponse(m) => writer.write(m),
            MessageBody::Commit(m) => writer.write(m),
            MessageBody::RecoveryRequest(m) => writer.write(m),
            MessageBody::RecoveryMessage(m) => writer.write(m),
        }
    }
}

impl Decode for ConsensusMessage {
    fn decode(reader: &mut BinaryReader<'_>) -> CoreResult<Self> {
        let message_type = MessageType::try_from(reader.read_u8()?)?;
        let view_number = reader.read_u8()?;
        let body = match message_type {
            MessageType::ChangeView => MessageBody::ChangeView(reader.read()?),
            MessageType::PrepareRequest => MessageBody::PrepareRequest(reader.read()?),
            MessageType::PrepareResponse => MessageBody::PrepareResponse(reader.read()?),
            MessageType::Commit => MessageBody::Commit(reader.read()?),
            MessageType::RecoveryRequest => MessageBody::RecoveryRequest(reader.read()?),
            MessageType::RecoveryMessage => MessageBody::RecoveryMessage(reader.read()?),
        };
        Ok(Self { view_number, body })
    }
}
