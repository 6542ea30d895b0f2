//! Verification and invocation scripts
//!
//! Only the two script shapes that authorize consensus data are supported:
//!
//! ```text
//! single-signature:  PUSH33 <pubkey> CHECKSIG
//! m-of-n multisig:   PUSH<m> PUSH33 <pk_1> .. PUSH33 <pk_n> PUSH<n> CHECKMULTISIG
//! invocation:        PUSH64 <sig_1> .. PUSH64 <sig_k>
//! ```

use crate::crypto::keccak256;
use crate::{Address, CoreError, CoreResult, PublicKey, Signature};

/// Script opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Push0 = 0x00,
    PushData1 = 0x4c,
    Push1 = 0x51,
    Push16 = 0x60,
    CheckSig = 0xac,
    CheckMultiSig = 0xae,
}

/// Largest payload a single-byte push opcode can carry
const MAX_DIRECT_PUSH: usize = 0x4b;

/// Incremental script builder
#[derive(Debug, Default)]
pub struct ScriptBuilder {
    script: Vec<u8>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a bare opcode
    pub fn emit(&mut self, op: OpCode) -> &mut Self {
        self.script.push(op as u8);
        self
    }

    /// Push a byte string
    pub fn emit_push(&mut self, data: &[u8]) -> &mut Self {
        if data.len() <= MAX_DIRECT_PUSH {
            self.script.push(data.len() as u8);
        } else {
            self.script.push(OpCode::PushData1 as u8);
            self.script.push(data.len() as u8);
        }
        self.script.extend_from_slice(data);
        self
    }

    /// Push a small non-negative integer
    pub fn emit_push_int(&mut self, value: usize) -> &mut Self {
        match value {
            0 => self.emit(OpCode::Push0),
            1..=16 => {
                self.script.push(OpCode::Push1 as u8 + (value as u8 - 1));
                self
            }
            _ => {
                let bytes = (value as u64).to_le_bytes();
                let len = 8 - bytes.iter().rev().take_while(|b| **b == 0).count();
                self.emit_push(&bytes[..len])
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.script.clone()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.script
    }
}

impl Address {
    /// Script hash: the last 20 bytes of the Keccak-256 digest of the script
    pub fn from_script(script: &[u8]) -> Self {
        let digest = keccak256(script);
        Address::from_slice(&digest.as_bytes()[12..])
    }
}

/// Build the single-signature verification script for a key
pub fn signature_redeem_script(key: &PublicKey) -> Vec<u8> {
    let mut sb = ScriptBuilder::new();
    sb.emit_push(key.as_bytes()).emit(OpCode::CheckSig);
    sb.into_bytes()
}

/// Build the m-of-n multisig verification script over `keys` in the given order
pub fn multisig_redeem_script(m: usize, keys: &[PublicKey]) -> CoreResult<Vec<u8>> {
    if m == 0 || m > keys.len() {
        return Err(CoreError::InvalidScript(format!(
            "threshold {m} out of range for {} keys",
            keys.len()
        )));
    }
    let mut sb = ScriptBuilder::new();
    sb.emit_push_int(m);
    for key in keys {
        sb.emit_push(key.as_bytes());
    }
    sb.emit_push_int(keys.len()).emit(OpCode::CheckMultiSig);
    Ok(sb.into_bytes())
}

/// Script hash of the m-of-n multisig contract over `keys`
pub fn multisig_address(m: usize, keys: &[PublicKey]) -> CoreResult<Address> {
    Ok(Address::from_script(&multisig_redeem_script(m, keys)?))
}

/// Build an invocation script pushing the given signatures in order
pub fn invocation_script(signatures: &[Signature]) -> Vec<u8> {
    let mut sb = ScriptBuilder::new();
    for sig in signatures {
        sb.emit_push(sig.as_bytes());
    }
    sb.into_bytes()
}

/// A parsed verification script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationScript {
    /// One key, one signature
    Single(PublicKey),
    /// `m` signatures out of `keys`, in key order
    MultiSig { m: usize, keys: Vec<PublicKey> },
}

impl VerificationScript {
    /// Recognize one of the supported verification script shapes
    pub fn parse(script: &[u8]) -> CoreResult<Self> {
        let mut ops = Instructions::new(script);
        let first = ops.next_instruction()?;

        if let Instruction::Push(data) = &first {
            if data.len() == PublicKey::LEN {
                let key = PublicKey::from_slice(data)?;
                ops.expect_op(OpCode::CheckSig)?;
                ops.expect_end()?;
                return Ok(Self::Single(key));
            }
        }

        let m = first.as_int()?;
        let mut keys = Vec::new();
        let n = loop {
            match ops.next_instruction()? {
                Instruction::Push(data) if data.len() == PublicKey::LEN => {
                    keys.push(PublicKey::from_slice(data)?);
                }
                other => break other.as_int()?,
            }
        };
        ops.expect_op(OpCode::CheckMultiSig)?;
        ops.expect_end()?;

        if n != keys.len() || m == 0 || m > n {
            return Err(CoreError::InvalidScript(format!(
                "malformed multisig: m={m} n={n} keys={}",
                keys.len()
            )));
        }
        Ok(Self::MultiSig { m, keys })
    }
}

/// Extract the signatures pushed by an invocation script
pub fn parse_invocation_script(script: &[u8]) -> CoreResult<Vec<Signature>> {
    let mut ops = Instructions::new(script);
    let mut signatures = Vec::new();
    while !ops.is_empty() {
        match ops.next_instruction()? {
            Instruction::Push(data) => signatures.push(Signature::from_slice(data)?),
            Instruction::Op(op) => {
                return Err(CoreError::InvalidScript(format!(
                    "unexpected opcode {op:#04x} in invocation script"
                )))
            }
        }
    }
    Ok(signatures)
}

enum Instruction<'a> {
    Push(&'a [u8]),
    Op(u8),
}

impl Instruction<'_> {
    fn as_int(&self) -> CoreResult<usize> {
        match self {
            Instruction::Op(op) if *op == OpCode::Push0 as u8 => Ok(0),
            Instruction::Op(op) if (OpCode::Push1 as u8..=OpCode::Push16 as u8).contains(op) => {
                Ok((op - OpCode::Push1 as u8 + 1) as usize)
            }
            Instruction::Push(data) if !data.is_empty() && data.len() <= 8 => {
                let mut bytes = [0u8; 8];
                bytes[..data.len()].copy_from_slice(data);
                Ok(u64::from_le_bytes(bytes) as usize)
            }
            _ => Err(CoreError::InvalidScript("expected integer".to_string())),
        }
    }
}

struct Instructions<'a> {
    script: &'a [u8],
    pos: usize,
}

impl<'a> Instructions<'a> {
    fn new(script: &'a [u8]) -> Self {
        Self { script, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.script.len()
    }

    fn take(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self.pos + len;
        if end > self.script.len() {
            return Err(CoreError::InvalidScript("push past end of script".to_string()));
        }
        let data = &self.script[self.pos..end];
        self.pos = end;
        Ok(data)
    }

    fn next_instruction(&mut self) -> CoreResult<Instruction<'a>> {
        let op = self.take(1)?[0];
        match op {
            0x01..=0x4b => Ok(Instruction::Push(self.take(op as usize)?)),
            0x4c => {
                let len = self.take(1)?[0] as usize;
                Ok(Instruction::Push(self.take(len)?))
            }
            _ => Ok(Instruction::Op(op)),
        }
    }

    fn expect_op(&mut self, expected: OpCode) -> CoreResult<()> {
        match self.next_instruction()? {
            Instruction::Op(op) if op == expected as u8 => Ok(()),
            _ => Err(CoreError::InvalidScript(format!("expected {expected:?}"))),
        }
    }

    fn expect_end(&self) -> CoreResult<()> {
        if !self.is_empty() {
            return Err(CoreError::InvalidScript("trailing bytes".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyPair;

    fn keys(n: u8) -> Vec<PublicKey> {
        (1..=n)
            .map(|i| KeyPair::from_secret_bytes(&[i; 32]).unwrap().public_key())
            .collect()
    }

    #[test]
    fn test_signature_script_shape() {
        let key = keys(1)[0];
        let script = signature_redeem_script(&key);
        assert_eq!(script.len(), 35);
        assert_eq!(script[0], 33);
        assert_eq!(script[34], OpCode::CheckSig as u8);
        assert_eq!(
            VerificationScript::parse(&script).unwrap(),
            VerificationScript::Single(key)
        );
    }

    #[test]
    fn test_multisig_script_parse() {
        let keys = keys(4);
        let script = multisig_redeem_script(3, &keys).unwrap();
        match VerificationScript::parse(&script).unwrap() {
            VerificationScript::MultiSig { m, keys: parsed } => {
                assert_eq!(m, 3);
                assert_eq!(parsed, keys);
            }
            other => panic!("unexpected script {other:?}"),
        }
    }

    #[test]
    fn test_multisig_threshold_bounds() {
        let keys = keys(4);
        assert!(multisig_redeem_script(0, &keys).is_err());
        assert!(multisig_redeem_script(5, &keys).is_err());
    }

    #[test]
    fn test_large_push_int() {
        let mut sb = ScriptBuilder::new();
        sb.emit_push_int(21).emit_push_int(300);
        assert_eq!(sb.to_bytes(), vec![1, 21, 2, 0x2c, 0x01]);
    }

    #[test]
    fn test_address_depends_on_key_order() {
        let mut keys = keys(4);
        let a = multisig_address(3, &keys).unwrap();
        keys.swap(0, 1);
        let b = multisig_address(3, &keys).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_invocation_round_trip() {
        let pair = KeyPair::generate();
        let sigs = vec![pair.sign(b"a"), pair.sign(b"b")];
        let script = invocation_script(&sigs);
        assert_eq!(script.len(), 130);
        assert_eq!(parse_invocation_script(&script).unwrap(), sigs);
        assert!(parse_invocation_script(&[OpCode::CheckSig as u8]).is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(VerificationScript::parse(&[]).is_err());
        assert!(VerificationScript::parse(&[0x21, 1, 2]).is_err());
    }
}
