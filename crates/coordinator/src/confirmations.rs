//! Owner confirmations and threshold tracking.

use alloy::primitives::{Address, B256, Bytes, Signature, eip191_hash_message};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};
use tracing::{debug, info, warn};

use crate::{
    account::SafeAccount,
    error::{CoordinatorError, Result},
    proposal::TransactionProposal,
    relay::{RelayConfirmation, RelayTransaction, TransactionRelay},
};

/// One owner's signature over a canonical hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    pub signer: Address,
    pub signature: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<Timestamp>,
}

/// Owner a Safe signature speaks for, or `None` if it cannot be attributed.
///
/// - `v` 27/28: ECDSA over `hash`.
/// - `v` 31/32: ECDSA over the EIP-191 prefixed `hash` (`eth_sign`).
/// - `v` 0/1: contract signature or approved hash; the owner is encoded in `r`
///   and validity is checked by the Safe on execution.
pub fn recover_signer(hash: B256, signature: &[u8]) -> Option<Address> {
    if signature.len() != 65 {
        return None;
    }

    match signature[64] {
        0 | 1 => {
            let r = B256::from_slice(&signature[..32]);
            r[..12].iter().all(|b| *b == 0).then(|| Address::from_word(r))
        }
        27 | 28 => Signature::from_raw(signature).ok()?.recover_address_from_prehash(&hash).ok(),
        v @ (31 | 32) => {
            let mut adjusted = [0u8; 65];
            adjusted.copy_from_slice(signature);
            adjusted[64] = v - 4;
            Signature::from_raw(&adjusted)
                .ok()?
                .recover_address_from_prehash(&eip191_hash_message(hash))
                .ok()
        }
        _ => None,
    }
}

/// Confirmations keyed by owner. Iteration is in ascending owner address order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfirmationSet {
    by_owner: BTreeMap<Address, Confirmation>,
}

impl ConfirmationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a confirmation, replacing an earlier one from the same owner.
    /// Returns whether the set changed.
    pub fn insert(&mut self, confirmation: Confirmation) -> bool {
        if let Some(existing) = self.by_owner.get(&confirmation.signer) {
            if existing.signature == confirmation.signature {
                return false;
            }
            if let (Some(old), Some(new)) = (existing.submitted_at, confirmation.submitted_at) {
                if new < old {
                    return false;
                }
            }
        }
        self.by_owner.insert(confirmation.signer, confirmation);
        true
    }

    pub fn len(&self) -> usize {
        self.by_owner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_owner.is_empty()
    }

    pub fn contains(&self, owner: &Address) -> bool {
        self.by_owner.contains_key(owner)
    }

    pub fn get(&self, owner: &Address) -> Option<&Confirmation> {
        self.by_owner.get(owner)
    }

    pub fn signers(&self) -> impl Iterator<Item = Address> + '_ {
        self.by_owner.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Confirmation> {
        self.by_owner.values()
    }
}

impl FromIterator<Confirmation> for ConfirmationSet {
    fn from_iter<I: IntoIterator<Item = Confirmation>>(iter: I) -> Self {
        let mut set = Self::new();
        for confirmation in iter {
            set.insert(confirmation);
        }
        set
    }
}

/// What has to happen before a proposal can execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", content = "owners", rename_all = "kebab-case")]
pub enum NextStep {
    /// The co-signer signed; these owners have not.
    AwaitingOwners(Vec<Address>),
    /// Owners signed; the co-signer has not.
    AwaitingCoSigner,
    ReadyToExecute,
    AwaitingAll,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationStatus {
    pub safe_tx_hash: B256,
    pub nonce: u64,
    pub confirmed: usize,
    pub threshold: u64,
    pub signers: Vec<Address>,
    pub missing: Vec<Address>,
    pub ready_to_execute: bool,
    pub next_step: NextStep,
}

impl ConfirmationStatus {
    pub fn new(
        safe_tx_hash: B256,
        nonce: u64,
        confirmations: &ConfirmationSet,
        owners: &[Address],
        threshold: u64,
        co_signer: Address,
    ) -> Self {
        let signers: Vec<Address> =
            confirmations.signers().filter(|signer| owners.contains(signer)).collect();
        let missing: Vec<Address> =
            owners.iter().copied().filter(|owner| !signers.contains(owner)).collect();
        let confirmed = signers.len();
        let ready_to_execute = confirmed as u64 >= threshold;

        let next_step = if ready_to_execute {
            NextStep::ReadyToExecute
        } else if signers.contains(&co_signer) {
            NextStep::AwaitingOwners(missing.clone())
        } else if !signers.is_empty() {
            NextStep::AwaitingCoSigner
        } else {
            NextStep::AwaitingAll
        };

        Self {
            safe_tx_hash,
            nonce,
            confirmed,
            threshold,
            signers,
            missing,
            ready_to_execute,
            next_step,
        }
    }
}

impl fmt::Display for ConfirmationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} confirmations", self.confirmed, self.threshold)?;
        match &self.next_step {
            NextStep::ReadyToExecute => f.write_str(", ready to execute"),
            NextStep::AwaitingCoSigner => f.write_str(", awaiting co-signer"),
            NextStep::AwaitingOwners(owners) => write!(f, ", awaiting {}", join(owners)),
            NextStep::AwaitingAll => write!(f, ", awaiting {}", join(&self.missing)),
        }
    }
}

fn join(owners: &[Address]) -> String {
    owners.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// A relay entry whose fields and confirmations were checked locally.
#[derive(Debug, Clone)]
pub struct CollectedProposal {
    pub proposal: TransactionProposal,
    pub entry: RelayTransaction,
    pub confirmations: ConfirmationSet,
    pub status: ConfirmationStatus,
    owners: Vec<Address>,
    threshold: u64,
    co_signer: Address,
}

impl CollectedProposal {
    pub fn is_executed(&self) -> bool {
        self.entry.is_executed
    }

    fn refresh_status(&mut self) {
        self.status = ConfirmationStatus::new(
            self.proposal.canonical_hash(),
            self.proposal.nonce(),
            &self.confirmations,
            &self.owners,
            self.threshold,
            self.co_signer,
        );
    }
}

/// Reads proposals from the relay and tracks which owners confirmed them.
#[derive(Debug)]
pub struct ConfirmationCollector<'a, R> {
    relay: &'a R,
    co_signer: Address,
}

impl<'a, R: TransactionRelay> ConfirmationCollector<'a, R> {
    pub fn new(relay: &'a R, co_signer: Address) -> Self {
        Self { relay, co_signer }
    }

    /// Fetches the relay entry for `safe_tx_hash` and verifies it.
    pub async fn collect(
        &self,
        account: &SafeAccount,
        chain_id: u64,
        safe_tx_hash: B256,
    ) -> Result<CollectedProposal> {
        let entry = self.relay.transaction(safe_tx_hash).await?;
        if entry.safe_tx_hash != safe_tx_hash {
            return Err(CoordinatorError::ProposalMismatch(format!(
                "relay returned {} for {safe_tx_hash}",
                entry.safe_tx_hash
            )));
        }
        self.verify(account, chain_id, entry)
    }

    /// Rebuilds the proposal from relay fields, checks its hash and keeps only
    /// confirmations that verifiably come from owners.
    pub fn verify(
        &self,
        account: &SafeAccount,
        chain_id: u64,
        entry: RelayTransaction,
    ) -> Result<CollectedProposal> {
        if entry.safe != account.address {
            return Err(CoordinatorError::ProposalMismatch(format!(
                "proposal {} belongs to {}, not {}",
                entry.safe_tx_hash, entry.safe, account.address
            )));
        }

        let proposal = entry.to_proposal(chain_id);
        if proposal.canonical_hash() != entry.safe_tx_hash {
            return Err(CoordinatorError::ProposalMismatch(format!(
                "relay fields hash to {}, relay claims {}",
                proposal.canonical_hash(),
                entry.safe_tx_hash
            )));
        }

        let confirmations = verified_confirmations(
            proposal.canonical_hash(),
            &account.owners,
            &entry.confirmations,
        );

        let status = ConfirmationStatus::new(
            proposal.canonical_hash(),
            proposal.nonce(),
            &confirmations,
            &account.owners,
            account.threshold,
            self.co_signer,
        );

        Ok(CollectedProposal {
            proposal,
            entry,
            confirmations,
            status,
            owners: account.owners.clone(),
            threshold: account.threshold,
            co_signer: self.co_signer,
        })
    }

    /// Adds `confirmation` to the proposal. Returns `false` when the same
    /// signature was already present and nothing was sent.
    pub async fn submit(
        &self,
        collected: &mut CollectedProposal,
        confirmation: Confirmation,
    ) -> Result<bool> {
        let safe_tx_hash = collected.proposal.canonical_hash();

        if collected
            .confirmations
            .get(&confirmation.signer)
            .is_some_and(|existing| existing.signature == confirmation.signature)
        {
            debug!(%safe_tx_hash, signer = %confirmation.signer, "Confirmation already recorded");
            return Ok(false);
        }

        self.relay.add_confirmation(safe_tx_hash, &confirmation.signature).await?;
        info!(
            safe = %collected.proposal.safe(),
            %safe_tx_hash,
            signer = %confirmation.signer,
            "Confirmation submitted"
        );

        collected.confirmations.insert(confirmation);
        collected.refresh_status();
        Ok(true)
    }
}

fn verified_confirmations(
    safe_tx_hash: B256,
    owners: &[Address],
    relay_confirmations: &[RelayConfirmation],
) -> ConfirmationSet {
    let mut set = ConfirmationSet::new();
    for relay_confirmation in relay_confirmations {
        let confirmation = Confirmation::from(relay_confirmation);
        match recover_signer(safe_tx_hash, &confirmation.signature) {
            Some(signer) if signer == confirmation.signer && owners.contains(&signer) => {
                set.insert(confirmation);
            }
            recovered => warn!(
                %safe_tx_hash,
                claimed = %confirmation.signer,
                ?recovered,
                "Dropping confirmation that does not verify against an owner"
            ),
        }
    }
    set
}
