//! Script-based authorization proofs

use crate::codec::{BinaryReader, BinaryWriter, Decode, Encode};
use crate::script::{parse_invocation_script, VerificationScript};
use crate::{Address, CoreResult};
use serde::{Deserialize, Serialize};

/// Invocation script (signatures) plus the verification script they satisfy
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Witness {
    pub invocation_script: Vec<u8>,
    pub verification_script: Vec<u8>,
}

impl Witness {
    /// Upper bound for a decoded invocation script
    pub const MAX_INVOCATION_SCRIPT: usize = 0x10000;
    /// Upper bound for a decoded verification script
    pub const MAX_VERIFICATION_SCRIPT: usize = 0x10000;

    pub fn new(invocation_script: Vec<u8>, verification_script: Vec<u8>) -> Self {
        Self {
            invocation_script,
            verification_script,
        }
    }

    /// Script hash of the verification script
    pub fn script_hash(&self) -> Address {
        Address::from_script(&self.verification_script)
    }

    /// Check that this witness authorizes `data` on behalf of `expected`.
    ///
    /// The verification script must hash to `expected` and the invocation
    /// script must carry valid signatures for it. Multisig signatures are
    /// matched against the keys in script order.
    pub fn verify(&self, expected: &Address, data: &[u8]) -> bool {
        if self.script_hash() != *expected {
            return false;
        }
        let Ok(script) = VerificationScript::parse(&self.verification_script) else {
            return false;
        };
        let Ok(signatures) = parse_invocation_script(&self.invocation_script) else {
            return false;
        };

        match script {
            VerificationScript::Single(key) => {
                signatures.len() == 1 && key.verify(data, &signatures[0])
            }
            VerificationScript::MultiSig { m, keys } => {
                if signatures.len() != m {
                    return false;
                }
                let mut key_pos = 0;
                for signature in &signatures {
                    loop {
                        if key_pos >= keys.len() {
                            return false;
                        }
                        let key = &keys[key_pos];
                        key_pos += 1;
                        if key.verify(data, signature) {
                            break;
                        }
                    }
                }
                true
            }
        }
    }
}

impl Encode for Witness {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_var_bytes(&self.invocation_script);
        writer.write_var_bytes(&self.verification_script);
    }
}

impl Decode for Witness {
    fn decode(reader: &mut BinaryReader<'_>) -> CoreResult<Self> {
        Ok(Self {
            invocation_script: reader.read_var_bytes(Self::MAX_INVOCATION_SCRIPT)?,
            verification_script: reader.read_var_bytes(Self::MAX_VERIFICATION_SCRIPT)?,
        })
    }
}
