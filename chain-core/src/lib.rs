//! Core blockchain data structures
//!
//! This crate provides the primitives the agreement protocol is built on:
//! - Basic types (Hash, Address, BlockIndex, etc.)
//! - Binary codec used for payloads, blocks and persisted state
//! - Keys, signatures, verification scripts and witnesses
//! - Transaction and Block structures

pub mod block;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod merkle;
pub mod script;
pub mod transaction;
pub mod types;
pub mod witness;

// Re-export commonly used types
pub use block::*;
pub use codec::{BinaryReader, BinaryWriter, Decode, Encode};
pub use crypto::{keccak256, KeyPair, PublicKey, Signature};
pub use error::*;
pub use transaction::*;
pub use types::*;
pub use witness::*;
