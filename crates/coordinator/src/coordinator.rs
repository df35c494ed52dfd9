//! The coordinator: one entry point per user-facing operation.
//!
//! Every operation re-reads chain and relay state; the only state kept between
//! calls is the per-account lease in [`NonceSequencer`], whose committed nonce
//! expires after a short TTL.

use alloy::primitives::{Address, B256};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    account::{AccountResolver, OwnerSet, SafeAccount, load_account},
    chain::{RpcChain, SafeChain},
    config::CoordinatorConfig,
    confirmations::{CollectedProposal, ConfirmationCollector, ConfirmationSet, ConfirmationStatus},
    error::{CoordinatorError, Result},
    execution::{ExecutionGate, ExecutionReceipt},
    metrics::CoordinatorMetrics,
    pool::{PendingPool, PendingPoolMatcher, PoolMatch, ProposalState},
    proposal::{ProposalBuilder, ProposalRequest, TransactionProposal},
    relay::{RelayTransaction, SafeServiceClient, TransactionRelay},
    sequencer::NonceSequencer,
    signatures,
    signer::AgentSigner,
};

/// How `prepare_transaction` satisfied the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrepareOutcome {
    /// A new proposal was published with the co-signer's confirmation.
    Created,
    /// The same transaction was already pending with the co-signer's confirmation.
    Duplicate,
    /// The same transaction was pending without the co-signer; it was confirmed.
    Merged,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedTransaction {
    pub canonical_hash: B256,
    pub proposal: TransactionProposal,
    pub status: ConfirmationStatus,
    pub outcome: PrepareOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingConfirmation {
    pub state: ProposalState,
    pub proposal: TransactionProposal,
    pub status: ConfirmationStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum ExecutionOutcome {
    Executed(ExecutionReceipt),
    NotReady(ConfirmationStatus),
    NothingPending,
}

pub struct Coordinator<C, R> {
    chain: C,
    relay: R,
    signer: AgentSigner,
    config: CoordinatorConfig,
    sequencer: NonceSequencer,
    metrics: CoordinatorMetrics,
}

impl<C, R> std::fmt::Debug for Coordinator<C, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("co_signer", &self.signer.address())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Coordinator<RpcChain, SafeServiceClient> {
    /// Connects to the configured chain RPC and relay.
    pub async fn connect(config: CoordinatorConfig, signer: AgentSigner) -> Result<Self> {
        config.validate()?;

        let chain = RpcChain::connect(
            &config.rpc_url,
            signer.signer().clone(),
            config.retry,
            config.timeouts.request(),
            config.timeouts.poll_interval(),
        )
        .await?;
        let relay = SafeServiceClient::new(
            &config.relay_url,
            config.relay_api_key.clone(),
            config.timeouts.request(),
            config.retry,
        )?;

        let coordinator = Self::new(chain, relay, signer, config);
        coordinator.chain_id().await?;
        Ok(coordinator)
    }
}

impl<C: SafeChain, R: TransactionRelay> Coordinator<C, R> {
    pub fn new(chain: C, relay: R, signer: AgentSigner, config: CoordinatorConfig) -> Self {
        Self {
            chain,
            relay,
            signer,
            config,
            sequencer: NonceSequencer::new(),
            metrics: CoordinatorMetrics::default(),
        }
    }

    /// The agent's owner address.
    pub fn co_signer(&self) -> Address {
        self.signer.address()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Chain id from the RPC, checked against the configured one.
    async fn chain_id(&self) -> Result<u64> {
        let chain_id = self.chain.chain_id().await?;
        match self.config.chain_id {
            Some(expected) if expected != chain_id => Err(CoordinatorError::Configuration(format!(
                "RPC reports chain id {chain_id}, configured chain id is {expected}"
            ))),
            _ => Ok(chain_id),
        }
    }

    /// Owner set of the co-signer and one human owner, full consensus.
    pub fn owner_set(&self, owner: Address) -> Result<OwnerSet> {
        Ok(OwnerSet::new(self.co_signer(), [owner], None)?)
    }

    /// Deployed or predicted account shared with `owner`.
    pub async fn check_account(&self, owner: Address) -> Result<SafeAccount> {
        self.check_owner_set(&self.owner_set(owner)?).await
    }

    pub async fn check_owner_set(&self, owner_set: &OwnerSet) -> Result<SafeAccount> {
        AccountResolver::new(&self.chain, &self.config.deployment).resolve(owner_set).await
    }

    /// Deploys the account shared with `owner` unless it exists.
    pub async fn deploy_account(&self, owner: Address) -> Result<SafeAccount> {
        self.deploy_owner_set(&self.owner_set(owner)?).await
    }

    pub async fn deploy_owner_set(&self, owner_set: &OwnerSet) -> Result<SafeAccount> {
        let address = AccountResolver::new(&self.chain, &self.config.deployment)
            .deploy(owner_set, self.config.timeouts.receipt())
            .await?;
        load_account(&self.chain, address).await
    }

    /// Returns the pending proposal for `request`, creating and co-signing one if
    /// none exists. Holding the account's nonce lease for the whole call keeps
    /// concurrent requests from forking duplicates or reusing a nonce.
    pub async fn prepare_transaction(
        &self,
        safe: Address,
        request: ProposalRequest,
    ) -> Result<PreparedTransaction> {
        let chain_id = self.chain_id().await?;
        let mut lease = self.sequencer.lease(safe).await;
        let account = self.owned_account(safe).await?;

        let co_signer = self.co_signer();
        let matcher = PendingPoolMatcher::new(&self.relay, co_signer, self.config.dedup_policy);

        let relay_next = match matcher.find(&account, &request).await? {
            PoolMatch::Duplicate(entry) | PoolMatch::AwaitingCoSigner(entry) => {
                return self.join_pending(&account, chain_id, entry).await;
            }
            PoolMatch::NoMatch { next_nonce } => Some(next_nonce),
            PoolMatch::ListingUnavailable => None,
        };

        let nonce = lease.allocate(account.nonce, relay_next);
        let proposal = ProposalBuilder::new(&self.chain, &self.config.gas)
            .build(&account, chain_id, &request, nonce)
            .await?;

        let confirmation = self.signer.sign(proposal.canonical_hash())?;
        self.relay.propose_transaction(&proposal, &confirmation).await?;
        lease.commit();
        self.metrics.record_proposal_created();

        let confirmations: ConfirmationSet = [confirmation].into_iter().collect();
        let status = ConfirmationStatus::new(
            proposal.canonical_hash(),
            nonce,
            &confirmations,
            &account.owners,
            account.threshold,
            co_signer,
        );
        info!(
            %safe,
            nonce,
            safe_tx_hash = %proposal.canonical_hash(),
            %status,
            "Proposal created"
        );
        Ok(PreparedTransaction {
            canonical_hash: proposal.canonical_hash(),
            proposal,
            status,
            outcome: PrepareOutcome::Created,
        })
    }

    /// Returns a pending proposal for the same request, co-signing it unless the
    /// co-signer's confirmation verifies already.
    async fn join_pending(
        &self,
        account: &SafeAccount,
        chain_id: u64,
        entry: RelayTransaction,
    ) -> Result<PreparedTransaction> {
        let co_signer = self.co_signer();
        let collector = ConfirmationCollector::new(&self.relay, co_signer);
        let mut collected = collector.verify(account, chain_id, entry)?;
        self.metrics.record_proposal_deduplicated();

        if collected.confirmations.contains(&co_signer) {
            info!(
                safe = %account.address,
                nonce = collected.proposal.nonce(),
                safe_tx_hash = %collected.proposal.canonical_hash(),
                "Request already pending, returning existing proposal"
            );
            return Ok(prepared(collected, PrepareOutcome::Duplicate));
        }

        let confirmation = self.signer.sign(collected.proposal.canonical_hash())?;
        if collector.submit(&mut collected, confirmation).await? {
            self.metrics.record_confirmation_submitted();
        }
        info!(
            safe = %account.address,
            nonce = collected.proposal.nonce(),
            safe_tx_hash = %collected.proposal.canonical_hash(),
            status = %collected.status,
            "Co-signed pending proposal for the same request"
        );
        Ok(prepared(collected, PrepareOutcome::Merged))
    }

    /// Non-executed proposals for `safe` with their confirmation progress, in
    /// nonce order. Superseded and abandoned entries are reported, not hidden.
    pub async fn get_pending_confirmations(
        &self,
        safe: Address,
    ) -> Result<Vec<PendingConfirmation>> {
        let chain_id = self.chain_id().await?;
        let account = load_account(&self.chain, safe).await?;
        let collector = ConfirmationCollector::new(&self.relay, self.co_signer());
        let pool = self.pool(&account).await?;

        let mut pending = Vec::new();
        for entry in pool.entries() {
            if entry.state == ProposalState::Executed {
                continue;
            }
            match collector.verify(&account, chain_id, entry.transaction.clone()) {
                Ok(collected) => pending.push(PendingConfirmation {
                    state: entry.state,
                    proposal: collected.proposal,
                    status: collected.status,
                }),
                Err(err) => warn!(
                    %safe,
                    safe_tx_hash = %entry.transaction.safe_tx_hash,
                    error = %err,
                    "Skipping relay entry that failed verification"
                ),
            }
        }
        pending.sort_by_key(|p| p.proposal.nonce());
        Ok(pending)
    }

    /// Executes the live proposal at the account's current nonce, if it has
    /// enough confirmations.
    pub async fn execute_transaction(&self, safe: Address) -> Result<ExecutionOutcome> {
        let chain_id = self.chain_id().await?;
        let account = self.owned_account(safe).await?;
        let pool = self.pool(&account).await?;

        let Some(entry) = pool.executable().cloned() else {
            debug!(%safe, nonce = account.nonce, "No live proposal at the current nonce");
            return Ok(ExecutionOutcome::NothingPending);
        };

        let collected = ConfirmationCollector::new(&self.relay, self.co_signer())
            .verify(&account, chain_id, entry)?;
        self.execute_collected(&account, &pool, collected).await
    }

    /// Executes a specific proposal. Already-executed proposals succeed without
    /// submitting anything; superseded and abandoned ones are refused.
    pub async fn execute_proposal(
        &self,
        safe: Address,
        safe_tx_hash: B256,
    ) -> Result<ExecutionOutcome> {
        let chain_id = self.chain_id().await?;
        let account = self.owned_account(safe).await?;
        let collected = ConfirmationCollector::new(&self.relay, self.co_signer())
            .collect(&account, chain_id, safe_tx_hash)
            .await?;
        let pool = self.pool(&account).await?;
        self.execute_collected(&account, &pool, collected).await
    }

    async fn pool(&self, account: &SafeAccount) -> Result<PendingPool> {
        PendingPoolMatcher::new(&self.relay, self.co_signer(), self.config.dedup_policy)
            .snapshot(account)
            .await
    }

    async fn execute_collected(
        &self,
        account: &SafeAccount,
        pool: &PendingPool,
        collected: CollectedProposal,
    ) -> Result<ExecutionOutcome> {
        let gate = ExecutionGate::new(
            &self.chain,
            &self.metrics,
            self.config.timeouts.receipt(),
            self.config.execution_log_lookback,
        );

        if let Some(receipt) = gate.already_executed(&collected).await? {
            return Ok(ExecutionOutcome::Executed(receipt));
        }
        pool.ensure_current(collected.proposal.canonical_hash())?;

        let signatures = match signatures::aggregate(&collected.confirmations, account.threshold) {
            Ok(signatures) => signatures,
            Err(CoordinatorError::InsufficientConfirmations { have, need }) => {
                info!(
                    safe = %account.address,
                    safe_tx_hash = %collected.proposal.canonical_hash(),
                    have,
                    need,
                    "Proposal not ready to execute"
                );
                return Ok(ExecutionOutcome::NotReady(collected.status));
            }
            Err(err) => return Err(err),
        };

        gate.submit(&collected, signatures).await.map(ExecutionOutcome::Executed)
    }

    /// Adds the co-signer's confirmation to a proposal made by someone else.
    pub async fn confirm_transaction(
        &self,
        safe: Address,
        safe_tx_hash: B256,
    ) -> Result<ConfirmationStatus> {
        let chain_id = self.chain_id().await?;
        let account = self.owned_account(safe).await?;
        let collector = ConfirmationCollector::new(&self.relay, self.co_signer());
        let mut collected = collector.collect(&account, chain_id, safe_tx_hash).await?;

        if collected.is_executed() {
            debug!(%safe, %safe_tx_hash, "Proposal already executed, not confirming");
            return Ok(collected.status);
        }
        self.pool(&account).await?.ensure_current(safe_tx_hash)?;

        let confirmation = self.signer.sign(safe_tx_hash)?;
        if collector.submit(&mut collected, confirmation).await? {
            self.metrics.record_confirmation_submitted();
        }
        Ok(collected.status)
    }

    /// `eth_signTypedData_v4` payload for a human owner to sign `safe_tx_hash`.
    pub async fn typed_data(&self, safe: Address, safe_tx_hash: B256) -> Result<serde_json::Value> {
        let chain_id = self.chain_id().await?;
        let account = load_account(&self.chain, safe).await?;
        let collected = ConfirmationCollector::new(&self.relay, self.co_signer())
            .collect(&account, chain_id, safe_tx_hash)
            .await?;
        Ok(collected.proposal.typed_data())
    }

    /// Loads a deployed account the co-signer owns.
    async fn owned_account(&self, safe: Address) -> Result<SafeAccount> {
        let account = load_account(&self.chain, safe).await?;
        if !account.is_owner(&self.co_signer()) {
            return Err(CoordinatorError::Configuration(format!(
                "agent {} is not an owner of {safe}",
                self.co_signer()
            )));
        }
        Ok(account)
    }
}

fn prepared(collected: CollectedProposal, outcome: PrepareOutcome) -> PreparedTransaction {
    PreparedTransaction {
        canonical_hash: collected.proposal.canonical_hash(),
        proposal: collected.proposal,
        status: collected.status,
        outcome,
    }
}
