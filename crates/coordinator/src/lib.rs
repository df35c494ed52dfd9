//! Co-signing coordinator for Safe accounts shared between an automated agent
//! and human owners.
//!
//! The coordinator proposes Safe transactions, deduplicates them against the
//! relay's pending pool, collects owner confirmations and executes proposals
//! once the threshold is met.

pub mod account;
pub mod chain;
pub mod config;
pub mod confirmations;
pub mod contracts;
pub mod coordinator;
pub mod error;
pub mod execution;
pub mod metrics;
pub mod pool;
pub mod proposal;
pub mod relay;
pub mod retry;
pub mod sequencer;
mod serde_helpers;
pub mod signatures;
pub mod signer;


pub use account::{OwnerSet, SafeAccount};
pub use chain::{RpcChain, SafeChain};
pub use config::{CoordinatorConfig, DedupPolicy};
pub use confirmations::{Confirmation, ConfirmationStatus, NextStep};
pub use coordinator::{
    Coordinator, ExecutionOutcome, PendingConfirmation, PrepareOutcome, PreparedTransaction,
};
pub use error::{CoordinatorError, ExecutionError, ExecutionFailure, Result};
pub use execution::{ExecutionReceipt, ReceiptStatus};
pub use pool::ProposalState;
pub use proposal::{Operation, ProposalRequest, TransactionProposal};
pub use relay::{SafeServiceClient, TransactionRelay};
pub use signer::AgentSigner;
