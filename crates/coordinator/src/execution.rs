//! Submitting confirmed proposals on chain.

use alloy::{
    primitives::{Address, B256, Bytes, Log, U256},
    sol_types::{SolCall, SolEvent},
};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::{
    chain::{ChainReceipt, SafeChain},
    confirmations::CollectedProposal,
    contracts::ISafe,
    error::{CoordinatorError, ExecutionError, ExecutionFailure, Result},
    metrics::CoordinatorMetrics,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Pending,
    Success,
    Reverted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReceipt {
    pub safe_tx_hash: B256,
    /// On-chain transaction, when known.
    pub tx_hash: Option<B256>,
    pub status: ReceiptStatus,
    pub block_confirmations: u64,
    /// The proposal had already been executed; nothing was submitted.
    pub already_executed: bool,
}

impl ExecutionReceipt {
    fn already_executed(safe_tx_hash: B256, tx_hash: Option<B256>) -> Self {
        Self {
            safe_tx_hash,
            tx_hash,
            status: ReceiptStatus::Success,
            block_confirmations: 0,
            already_executed: true,
        }
    }
}

/// Final checks before `execTransaction`, the submission itself, and receipt
/// interpretation. Submissions are never retried.
pub struct ExecutionGate<'a, C> {
    chain: &'a C,
    metrics: &'a CoordinatorMetrics,
    receipt_timeout: Duration,
    lookback: u64,
}

impl<C> std::fmt::Debug for ExecutionGate<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionGate")
            .field("receipt_timeout", &self.receipt_timeout)
            .field("lookback", &self.lookback)
            .finish_non_exhaustive()
    }
}

impl<'a, C: SafeChain> ExecutionGate<'a, C> {
    pub fn new(
        chain: &'a C,
        metrics: &'a CoordinatorMetrics,
        receipt_timeout: Duration,
        lookback: u64,
    ) -> Self {
        Self { chain, metrics, receipt_timeout, lookback }
    }

    /// Receipt for a proposal the relay or the chain already reports as
    /// executed. `None` means it still has to be submitted.
    pub async fn already_executed(
        &self,
        collected: &CollectedProposal,
    ) -> Result<Option<ExecutionReceipt>> {
        let safe = collected.proposal.safe();
        let safe_tx_hash = collected.proposal.canonical_hash();

        if collected.is_executed() {
            info!(%safe, %safe_tx_hash, "Relay reports proposal executed, nothing to submit");
            return Ok(Some(ExecutionReceipt::already_executed(
                safe_tx_hash,
                collected.entry.transaction_hash,
            )));
        }

        if let Some(tx_hash) =
            self.chain.execution_logged(safe, safe_tx_hash, self.lookback).await?
        {
            info!(%safe, %safe_tx_hash, %tx_hash, "Proposal already executed on chain");
            return Ok(Some(ExecutionReceipt::already_executed(safe_tx_hash, Some(tx_hash))));
        }

        Ok(None)
    }

    /// Submits `execTransaction` once and waits for the receipt. A receipt
    /// timeout yields a `pending` receipt rather than an error.
    pub async fn submit(
        &self,
        collected: &CollectedProposal,
        signatures: Bytes,
    ) -> Result<ExecutionReceipt> {
        let proposal = &collected.proposal;
        let safe = proposal.safe();
        let safe_tx_hash = proposal.canonical_hash();

        let current = self.chain.nonce(safe).await?;
        let nonce = proposal.nonce();
        if current > nonce {
            return Err(CoordinatorError::NonceConsumed { nonce, current });
        }
        if current < nonce {
            return Err(CoordinatorError::NonceGap { nonce, current });
        }

        let input: Bytes = proposal.exec_call(signatures).abi_encode().into();
        let tx_hash = match self.chain.send_transaction(safe, U256::ZERO, input).await {
            Ok(tx_hash) => tx_hash,
            Err(err) => {
                self.metrics.record_execution_failed();
                warn!(%safe, %safe_tx_hash, nonce, error = %err, "Execution submission failed");
                return Err(err);
            }
        };
        info!(%safe, %safe_tx_hash, %tx_hash, nonce, "Execution submitted");

        match self.chain.wait_for_receipt(tx_hash, self.receipt_timeout).await? {
            None => {
                warn!(
                    %safe_tx_hash,
                    %tx_hash,
                    timeout_secs = self.receipt_timeout.as_secs(),
                    "Execution not mined before timeout"
                );
                Ok(ExecutionReceipt {
                    safe_tx_hash,
                    tx_hash: Some(tx_hash),
                    status: ReceiptStatus::Pending,
                    block_confirmations: 0,
                    already_executed: false,
                })
            }
            Some(receipt) => self.interpret(safe, safe_tx_hash, receipt).await,
        }
    }

    async fn interpret(
        &self,
        safe: Address,
        safe_tx_hash: B256,
        receipt: ChainReceipt,
    ) -> Result<ExecutionReceipt> {
        let block_confirmations = match (receipt.block_number, self.chain.block_number().await) {
            (Some(mined), Ok(head)) => head.saturating_sub(mined) + 1,
            (Some(_), Err(_)) => 1,
            (None, _) => 0,
        };

        let reverted = !receipt.success
            || receipt
                .logs
                .iter()
                .any(|log| log.address == safe && is_execution_failure(log, safe_tx_hash));

        let result = ExecutionReceipt {
            safe_tx_hash,
            tx_hash: Some(receipt.tx_hash),
            status: if reverted { ReceiptStatus::Reverted } else { ReceiptStatus::Success },
            block_confirmations,
            already_executed: false,
        };

        if reverted {
            self.metrics.record_execution_reverted();
            warn!(%safe_tx_hash, tx_hash = %receipt.tx_hash, "Execution reverted");
            return Err(ExecutionError::new(
                ExecutionFailure::Reverted,
                format!("transaction {} reverted", receipt.tx_hash),
            )
            .with_receipt(result)
            .into());
        }

        self.metrics.record_execution_success();
        info!(
            %safe_tx_hash,
            tx_hash = %receipt.tx_hash,
            block_confirmations,
            "Execution succeeded"
        );
        Ok(result)
    }
}

/// Safe emits `ExecutionFailure` and returns normally when the inner call fails
/// with `safeTxGas` or `gasPrice` set.
fn is_execution_failure(log: &Log, safe_tx_hash: B256) -> bool {
    let topics = log.topics();
    topics.first() == Some(&ISafe::ExecutionFailure::SIGNATURE_HASH)
        && topics.get(1) == Some(&safe_tx_hash)
}
