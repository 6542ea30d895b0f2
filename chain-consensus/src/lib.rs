//! dBFT consensus for the chain
//!
//! A fixed validator set of `N` nodes agrees on each block in views. In
//! every view one primary proposes, the backups acknowledge, and once `M`
//! validators have acknowledged they sign the header; `M` matching
//! signatures make the block final. Views change on timeout, and nodes
//! that fall behind catch up from their peers' recovery messages.
//!
//! [`ConsensusService`] is the state machine; [`ConsensusActor`] runs it on a
//! tokio task. Everything it needs from the outside world comes in through
//! the [`traits`] collaborators, with in-memory versions in [`memory`].

pub mod actor;
pub mod assembler;
pub mod config;
pub mod context;
pub mod error;
pub mod memory;
pub mod message;
pub mod payload;
pub mod persistence;
pub mod recovery;
pub mod service;
pub mod slots;
pub mod traits;
pub mod validators;
pub mod wallet;

pub use actor::{ConsensusActor, ConsensusCommand, ConsensusHandle};
pub use config::ConsensusConfig;
pub use context::{Proposal, ProposalData, RoundContext};
pub use error::{ConsensusError, ConsensusResult};
pub use message::{ChangeViewReason, ConsensusMessage, MessageBody, MessageType};
pub use payload::{ConsensusPayload, Envelope};
pub use persistence::ConsensusStore;
pub use service::{Collaborators, ConsensusEvent, ConsensusService};
pub use slots::ValidatorSlots;
pub use traits::{Clock, Ledger, LedgerSnapshot, Mempool, SystemClock, TransactionPolicy, Transport, Wallet};
pub use validators::{Role, ValidatorIndex, ValidatorSet, ViewNumber};
pub use wallet::KeyPairWallet;
