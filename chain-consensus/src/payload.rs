//! Signed consensus payload envelope

use crate::message::ConsensusMessage;
use crate::traits::LedgerSnapshot;
use crate::validators::{ValidatorIndex, ValidatorSet};
use crate::ConsensusResult;
use chain_core::{
    keccak256, BinaryReader, BinaryWriter, BlockIndex, CoreResult, Decode, Encode, Hash, Witness,
};

/// Upper bound on the message carried by one payload
pub const MAX_MESSAGE_SIZE: usize = 0x100_0000;

/// Protocol version of payloads and persisted round state
pub const PAYLOAD_VERSION: u32 = 0;

/// A consensus message signed by one validator for one height
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusPayload {
    pub version: u32,
    pub prev_hash: Hash,
    pub block_index: BlockIndex,
    pub validator_index: ValidatorIndex,
    /// Encoded [`ConsensusMessage`]
    pub data: Vec<u8>,
    pub witness: Witness,
}

impl ConsensusPayload {
    fn encode_unsigned(&self, writer: &mut BinaryWriter) {
        writer.write_u32(self.version);
        writer.write(&self.prev_hash);
        writer.write_u32(self.block_index);
        writer.write_u16(self.validator_index);
        writer.write_var_bytes(&self.data);
    }

    /// The signed portion: everything except the witness
    pub fn unsigned_data(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::new();
        self.encode_unsigned(&mut writer);
        writer.into_bytes()
    }

    /// Identity hash over the signed portion
    pub fn hash(&self) -> Hash {
        keccak256(&self.unsigned_data())
    }

    /// Decode the carried message
    pub fn message(&self) -> ConsensusResult<ConsensusMessage> {
        ConsensusMessage::decode_from(&self.data)
    }

    /// Check the payload against the ledger it claims to extend.
    ///
    /// The height must be above the ledger tip and the witness must be a
    /// valid single signature by the validator at `validator_index` in the
    /// set resolved from the snapshot.
    pub fn verify(&self, snapshot: &dyn LedgerSnapshot) -> bool {
        self.verify_with(snapshot.height(), &ValidatorSet::from_snapshot(snapshot))
    }

    /// [`verify`](Self::verify) against an already resolved validator set
    pub fn verify_with(&self, ledger_height: BlockIndex, validators: &ValidatorSet) -> bool {
        if self.block_index <= ledger_height {
            return false;
        }
        let Ok(expected) = validators.signer_address(self.validator_index) else {
            return false;
        };
        self.witness.verify(&expected, &self.unsigned_data())
    }
}

impl Encode for ConsensusPayload {
    fn encode(&self, writer: &mut BinaryWriter) {
        self.encode_unsigned(writer);
        writer.write(&self.witness);
    }
}

impl Decode for ConsensusPayload {
    fn decode(reader: &mut BinaryReader<'_>) -> CoreResult<Self> {
        Ok(Self {
            version: reader.read_u32()?,
            prev_hash: reader.read()?,
            block_index: reader.read_u32()?,
            validator_index: reader.read_u16()?,
            data: reader.read_var_bytes(MAX_MESSAGE_SIZE)?,
            witness: reader.read()?,
        })
    }
}

/// A payload together with its decoded message.
///
/// Decoding happens once, when the envelope is built; the payload itself
/// is never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    payload: ConsensusPayload,
    message: ConsensusMessage,
}

impl Envelope {
    /// Decode `payload`'s message and pair them
    pub fn open(payload: ConsensusPayload) -> ConsensusResult<Self> {
        let message = payload.message()?;
        Ok(Self { payload, message })
    }

    /// Pair a payload with the message it was built from
    pub(crate) fn from_parts(payload: ConsensusPayload, message: ConsensusMessage) -> Self {
        Self { payload, message }
    }

    pub fn payload(&self) -> &ConsensusPayload {
        &self.payload
    }

    pub fn message(&self) -> &ConsensusMessage {
        &self.message
    }

    pub fn hash(&self) -> Hash {
        self.payload.hash()
    }

    pub fn validator_index(&self) -> ValidatorIndex {
        self.payload.validator_index
    }

    pub fn view_number(&self) -> u8 {
        self.message.view_number
    }

    pub fn into_payload(self) -> ConsensusPayload {
        self.payload
    }
}

impl Encode for Envelope {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write(&self.payload);
    }
}

impl Decode for Envelope {
    fn decode(reader: &mut BinaryReader<'_>) -> CoreResult<Self> {
        let payload: ConsensusPayload = reader.read()?;
        let message = ConsensusMessage::from_bytes(&payload.data)?;
        Ok(Self { payload, message })
    }
}
