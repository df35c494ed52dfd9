//! The relay's pending pool for one account, and duplicate detection in it.

use alloy::primitives::{Address, B256};
use serde::Serialize;
use std::{collections::BTreeMap, fmt};
use tracing::{debug, warn};

use crate::{
    account::SafeAccount,
    config::DedupPolicy,
    error::{CoordinatorError, Result},
    proposal::{ProposalRequest, semantic_equals},
    relay::{RelayTransaction, TransactionRelay},
};

/// Lifecycle of a relay entry relative to the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProposalState {
    Live,
    /// A newer proposal exists for the same nonce.
    Superseded,
    /// The nonce was consumed on chain by another transaction.
    Abandoned,
    Executed,
}

impl ProposalState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Superseded => "superseded",
            Self::Abandoned => "abandoned",
            Self::Executed => "executed",
        }
    }
}

impl fmt::Display for ProposalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct PoolEntry {
    pub transaction: RelayTransaction,
    pub state: ProposalState,
}

/// Classified snapshot of an account's relay entries.
#[derive(Debug, Clone)]
pub struct PendingPool {
    chain_nonce: u64,
    entries: Vec<PoolEntry>,
}

impl PendingPool {
    /// Classifies relay entries against the account's on-chain nonce. Among
    /// entries sharing a nonce, the newest (latest submission date, then latest
    /// in relay order) stays live.
    pub fn classify(chain_nonce: u64, transactions: Vec<RelayTransaction>) -> Self {
        let mut newest: BTreeMap<u64, usize> = BTreeMap::new();
        for (index, tx) in transactions.iter().enumerate() {
            if tx.is_executed || tx.nonce < chain_nonce {
                continue;
            }
            newest
                .entry(tx.nonce)
                .and_modify(|current| {
                    if transactions[*current].submission_date <= tx.submission_date {
                        *current = index;
                    }
                })
                .or_insert(index);
        }

        let entries = transactions
            .into_iter()
            .enumerate()
            .map(|(index, transaction)| {
                let state = if transaction.is_executed {
                    ProposalState::Executed
                } else if transaction.nonce < chain_nonce {
                    ProposalState::Abandoned
                } else if newest.get(&transaction.nonce) == Some(&index) {
                    ProposalState::Live
                } else {
                    ProposalState::Superseded
                };
                PoolEntry { transaction, state }
            })
            .collect();

        Self { chain_nonce, entries }
    }

    pub fn chain_nonce(&self) -> u64 {
        self.chain_nonce
    }

    pub fn entries(&self) -> &[PoolEntry] {
        &self.entries
    }

    pub fn entry(&self, safe_tx_hash: B256) -> Option<&PoolEntry> {
        self.entries.iter().find(|entry| entry.transaction.safe_tx_hash == safe_tx_hash)
    }

    /// Refuses a proposal that lost its nonce, either to a newer proposal or to
    /// another transaction on chain. Entries missing from the listing pass.
    pub fn ensure_current(&self, safe_tx_hash: B256) -> Result<()> {
        let Some(entry) = self.entry(safe_tx_hash) else { return Ok(()) };
        match entry.state {
            ProposalState::Superseded => Err(CoordinatorError::ProposalSuperseded {
                safe_tx_hash,
                nonce: entry.transaction.nonce,
            }),
            ProposalState::Abandoned => Err(CoordinatorError::NonceConsumed {
                nonce: entry.transaction.nonce,
                current: self.chain_nonce,
            }),
            ProposalState::Live | ProposalState::Executed => Ok(()),
        }
    }

    /// Live entries in ascending nonce order.
    pub fn live(&self) -> impl Iterator<Item = &RelayTransaction> {
        let mut live: Vec<_> = self
            .entries
            .iter()
            .filter(|entry| entry.state == ProposalState::Live)
            .map(|entry| &entry.transaction)
            .collect();
        live.sort_by_key(|tx| tx.nonce);
        live.into_iter()
    }

    /// First nonce not taken by the chain or a live proposal.
    pub fn next_nonce(&self) -> u64 {
        self.live()
            .map(|tx| tx.nonce + 1)
            .max()
            .unwrap_or(0)
            .max(self.chain_nonce)
    }

    /// The live proposal the chain will accept next.
    pub fn executable(&self) -> Option<&RelayTransaction> {
        self.live().find(|tx| tx.nonce == self.chain_nonce)
    }

    /// Lowest-nonce live proposal with the same target, value and calldata.
    pub fn find_semantic(&self, request: &ProposalRequest) -> Option<&RelayTransaction> {
        self.live().find(|tx| semantic_equals(&tx.transaction(), request))
    }

    pub fn match_request(&self, request: &ProposalRequest, co_signer: Address) -> PoolMatch {
        match self.find_semantic(request) {
            Some(tx) if tx.confirmations.iter().any(|c| c.owner == co_signer) => {
                PoolMatch::Duplicate(tx.clone())
            }
            Some(tx) => PoolMatch::AwaitingCoSigner(tx.clone()),
            None => PoolMatch::NoMatch { next_nonce: self.next_nonce() },
        }
    }
}

/// Result of looking for a request in the pending pool. Confirmations are as
/// the relay lists them and still need verifying.
#[derive(Debug, Clone)]
pub enum PoolMatch {
    /// Same transaction, listed as confirmed by the co-signer.
    Duplicate(RelayTransaction),
    /// Same transaction, listed without the co-signer's confirmation.
    AwaitingCoSigner(RelayTransaction),
    NoMatch { next_nonce: u64 },
    /// The listing could not be read and the dedup policy allows proceeding.
    ListingUnavailable,
}

/// Reads the relay's pool for an account and matches requests against it.
#[derive(Debug)]
pub struct PendingPoolMatcher<'a, R> {
    relay: &'a R,
    co_signer: Address,
    policy: DedupPolicy,
}

impl<'a, R: TransactionRelay> PendingPoolMatcher<'a, R> {
    pub fn new(relay: &'a R, co_signer: Address, policy: DedupPolicy) -> Self {
        Self { relay, co_signer, policy }
    }

    pub async fn snapshot(&self, account: &SafeAccount) -> Result<PendingPool> {
        let transactions = self.relay.pending_transactions(account.address).await?;
        let pool = PendingPool::classify(account.nonce, transactions);
        debug!(
            safe = %account.address,
            chain_nonce = account.nonce,
            live = pool.live().count(),
            "Classified pending pool"
        );
        Ok(pool)
    }

    /// Finds a duplicate of `request`, honouring the dedup policy when the relay
    /// is unreachable.
    pub async fn find(
        &self,
        account: &SafeAccount,
        request: &ProposalRequest,
    ) -> Result<PoolMatch> {
        match self.snapshot(account).await {
            Ok(pool) => Ok(pool.match_request(request, self.co_signer)),
            Err(err) if err.is_retryable() && self.policy == DedupPolicy::ProceedWithoutDedup => {
                warn!(
                    safe = %account.address,
                    error = %err,
                    "Relay unreachable, proposing without duplicate check"
                );
                Ok(PoolMatch::ListingUnavailable)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{proposal::Operation, relay::RelayConfirmation};
    use alloy::primitives::{B256, Bytes, U256};
    use jiff::Timestamp;

    const CO_SIGNER: Address = Address::repeat_byte(0xaa);
    const HUMAN: Address = Address::repeat_byte(0xbb);

    fn entry(nonce: u64, to: u8, submitted: i64) -> RelayTransaction {
        RelayTransaction {
            safe: Address::repeat_byte(0x5a),
            to: Address::repeat_byte(to),
            value: U256::from(1),
            data: None,
            operation: Operation::Call,
            safe_tx_gas: U256::ZERO,
            base_gas: U256::ZERO,
            gas_price: U256::ZERO,
            gas_token: None,
            refund_receiver: None,
            nonce,
            safe_tx_hash: B256::with_last_byte(to),
            proposer: None,
            submission_date: Some(Timestamp::from_second(submitted).unwrap()),
            is_executed: false,
            is_successful: None,
            transaction_hash: None,
            confirmations: Vec::new(),
        }
    }

    fn confirmed_by(mut tx: RelayTransaction, owner: Address) -> RelayTransaction {
        tx.confirmations.push(RelayConfirmation {
            owner,
            signature: Bytes::from(vec![1; 65]),
            submission_date: None,
            signature_type: None,
        });
        tx
    }

    fn states(pool: &PendingPool) -> Vec<ProposalState> {
        pool.entries().iter().map(|e| e.state).collect()
    }

    #[test]
    fn newer_proposal_supersedes_older_at_same_nonce() {
        let pool =
            PendingPool::classify(5, vec![entry(5, 1, 100), entry(5, 2, 200), entry(6, 3, 50)]);
        assert_eq!(
            states(&pool),
            vec![ProposalState::Superseded, ProposalState::Live, ProposalState::Live]
        );
        assert_eq!(pool.executable().unwrap().to, Address::repeat_byte(2));
        assert_eq!(pool.next_nonce(), 7);
    }

    #[test]
    fn stale_nonces_are_abandoned() {
        let mut executed = entry(3, 9, 10);
        executed.is_executed = true;
        let pool = PendingPool::classify(4, vec![entry(2, 1, 10), executed, entry(4, 2, 10)]);
        assert_eq!(
            states(&pool),
            vec![ProposalState::Abandoned, ProposalState::Executed, ProposalState::Live]
        );
        assert_eq!(pool.live().count(), 1);
    }

    #[test]
    fn next_nonce_without_live_entries_is_chain_nonce() {
        let pool = PendingPool::classify(8, vec![entry(2, 1, 10)]);
        assert_eq!(pool.next_nonce(), 8);
        assert!(pool.executable().is_none());
    }

    #[test]
    fn matching_distinguishes_who_confirmed() {
        let request = ProposalRequest::call(Address::repeat_byte(1), U256::from(1), Bytes::new());
        let mut delegate = request.clone();
        delegate.operation = Operation::DelegateCall;

        let agent_pool = PendingPool::classify(0, vec![confirmed_by(entry(0, 1, 10), CO_SIGNER)]);
        assert!(matches!(agent_pool.match_request(&request, CO_SIGNER), PoolMatch::Duplicate(_)));
        // Operation is not part of semantic identity.
        assert!(matches!(agent_pool.match_request(&delegate, CO_SIGNER), PoolMatch::Duplicate(_)));

        let human_pool = PendingPool::classify(0, vec![confirmed_by(entry(0, 1, 10), HUMAN)]);
        assert!(matches!(
            human_pool.match_request(&request, CO_SIGNER),
            PoolMatch::AwaitingCoSigner(_)
        ));

        let other = ProposalRequest::call(Address::repeat_byte(1), U256::from(2), Bytes::new());
        assert!(matches!(
            human_pool.match_request(&other, CO_SIGNER),
            PoolMatch::NoMatch { next_nonce: 1 }
        ));
    }

    #[test]
    fn superseded_entries_are_not_matched() {
        let request = ProposalRequest::call(Address::repeat_byte(1), U256::from(1), Bytes::new());
        let pool = PendingPool::classify(
            0,
            vec![confirmed_by(entry(0, 1, 10), CO_SIGNER), entry(0, 2, 20)],
        );
        assert!(matches!(
            pool.match_request(&request, CO_SIGNER),
            PoolMatch::NoMatch { next_nonce: 1 }
        ));
    }

    #[test]
    fn only_current_proposals_pass() {
        let pool = PendingPool::classify(
            4,
            vec![entry(3, 1, 10), entry(4, 2, 10), entry(4, 3, 20), entry(5, 4, 10)],
        );

        let err = pool.ensure_current(B256::with_last_byte(1)).unwrap_err();
        assert!(matches!(err, CoordinatorError::NonceConsumed { nonce: 3, current: 4 }), "{err}");

        let err = pool.ensure_current(B256::with_last_byte(2)).unwrap_err();
        assert!(
            matches!(err, CoordinatorError::ProposalSuperseded { nonce: 4, .. }),
            "{err}"
        );
        assert!(err.requires_rebuild());

        pool.ensure_current(B256::with_last_byte(3)).unwrap();
        pool.ensure_current(B256::with_last_byte(4)).unwrap();
        // Not listed: the relay lookup by hash already vouched for it.
        pool.ensure_current(B256::with_last_byte(9)).unwrap();
    }
}
