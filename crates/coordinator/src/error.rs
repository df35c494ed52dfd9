//! Error taxonomy shared by every component.
//!
//! Chain and relay failures are converted into [`CoordinatorError`] at the client
//! boundary, so callers only ever branch on this enum.

use alloy::primitives::{Address, B256};
use std::fmt;

use crate::execution::ExecutionReceipt;

pub type Result<T, E = CoordinatorError> = std::result::Result<T, E>;

/// External collaborator a request was addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Chain,
    Relay,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chain => f.write_str("chain RPC"),
            Self::Relay => f.write_str("transaction relay"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    InvalidOwnerSet(#[from] OwnerSetError),

    #[error("{provider} unreachable: {message}")]
    ProviderUnreachable { provider: Provider, message: String },

    #[error("proposal {0} not found in relay")]
    ProposalNotFound(B256),

    #[error("relay state does not match expectation: {0}")]
    ProposalMismatch(String),

    #[error("proposal {safe_tx_hash} was superseded by a newer proposal at nonce {nonce}")]
    ProposalSuperseded { safe_tx_hash: B256, nonce: u64 },

    #[error("nonce {nonce} already consumed, account nonce is {current}")]
    NonceConsumed { nonce: u64, current: u64 },

    #[error("nonce {nonce} is not executable yet, account nonce is {current}")]
    NonceGap { nonce: u64, current: u64 },

    #[error("account {0} is not deployed")]
    AccountNotDeployed(Address),

    #[error("{have}/{need} confirmations")]
    InsufficientConfirmations { have: usize, need: u64 },

    #[error("unexpected chain response: {0}")]
    Chain(String),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl CoordinatorError {
    pub fn chain_unreachable(message: impl fmt::Display) -> Self {
        Self::ProviderUnreachable { provider: Provider::Chain, message: message.to_string() }
    }

    pub fn relay_unreachable(message: impl fmt::Display) -> Self {
        Self::ProviderUnreachable { provider: Provider::Relay, message: message.to_string() }
    }

    /// Whether the failed request may be issued again unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderUnreachable { .. })
    }

    /// Whether the caller should rebuild the proposal from scratch.
    pub fn requires_rebuild(&self) -> bool {
        matches!(
            self,
            Self::ProposalNotFound(_)
                | Self::ProposalMismatch(_)
                | Self::ProposalSuperseded { .. }
                | Self::NonceConsumed { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OwnerSetError {
    #[error("invalid owner set: at least 2 owners required, got {0}")]
    TooFewOwners(usize),
    #[error("invalid owner set: duplicate owner {0}")]
    DuplicateOwner(Address),
    #[error("invalid owner set: {0} cannot be an owner")]
    ReservedOwner(Address),
    #[error("invalid owner set: threshold {threshold} outside 1..={owners}")]
    InvalidThreshold { threshold: u64, owners: usize },
}

/// Machine-readable cause of a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionFailure {
    InsufficientFunds,
    NonceAlreadyUsed,
    InvalidSignatures,
    Reverted,
    Rejected,
}

impl ExecutionFailure {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientFunds => "insufficient-funds",
            Self::NonceAlreadyUsed => "nonce-already-used",
            Self::InvalidSignatures => "invalid-signatures",
            Self::Reverted => "reverted",
            Self::Rejected => "rejected",
        }
    }

    /// Maps a node or Safe revert message to a failure reason.
    ///
    /// Safe revert strings are `GSxxx` codes; GS020-GS026 are signature checks.
    pub fn classify(message: &str) -> Self {
        let msg = message.to_lowercase();
        if msg.contains("insufficient funds") || msg.contains("insufficient balance") {
            Self::InsufficientFunds
        } else if msg.contains("nonce too low")
            || msg.contains("nonce already used")
            || msg.contains("already known")
            || msg.contains("replacement transaction underpriced")
        {
            Self::NonceAlreadyUsed
        } else if ["gs020", "gs021", "gs022", "gs023", "gs024", "gs025", "gs026"]
            .iter()
            .any(|code| msg.contains(code))
        {
            Self::InvalidSignatures
        } else if msg.contains("revert") || msg.contains("gs0") || msg.contains("gs1") {
            Self::Reverted
        } else {
            Self::Rejected
        }
    }
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("execution failed ({reason}): {message}")]
pub struct ExecutionError {
    pub reason: ExecutionFailure,
    pub message: String,
    /// Present when the transaction was mined.
    pub receipt: Option<ExecutionReceipt>,
}

impl ExecutionError {
    pub fn new(reason: ExecutionFailure, message: impl Into<String>) -> Self {
        Self { reason, message: message.into(), receipt: None }
    }

    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(ExecutionFailure::classify(&message), message)
    }

    pub fn with_receipt(mut self, receipt: ExecutionReceipt) -> Self {
        self.receipt = Some(receipt);
        self
    }
}
