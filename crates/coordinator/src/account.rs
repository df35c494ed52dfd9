//! Deterministic Safe address derivation and account state resolution.

use alloy::{
    primitives::{Address, Bytes, U256, keccak256},
    sol_types::SolCall,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{
    chain::SafeChain,
    config::DeploymentConfig,
    contracts::{ISafe, ISafeProxyFactory, SENTINEL_OWNER},
    error::{CoordinatorError, ExecutionError, ExecutionFailure, OwnerSetError, Result},
};

/// Validated owners and threshold of a Safe. The co-signer is always the first owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnerSet {
    owners: Vec<Address>,
    threshold: u64,
}

impl OwnerSet {
    /// Builds the owner set `[co_signer, humans...]`. `threshold` defaults to the
    /// number of owners (full consensus).
    pub fn new(
        co_signer: Address,
        humans: impl IntoIterator<Item = Address>,
        threshold: Option<u64>,
    ) -> Result<Self, OwnerSetError> {
        let owners: Vec<Address> = std::iter::once(co_signer).chain(humans).collect();
        Self::from_owners(owners, threshold)
    }

    pub fn from_owners(
        owners: Vec<Address>,
        threshold: Option<u64>,
    ) -> Result<Self, OwnerSetError> {
        if owners.len() < 2 {
            return Err(OwnerSetError::TooFewOwners(owners.len()));
        }

        for (i, owner) in owners.iter().enumerate() {
            if owner.is_zero() || *owner == SENTINEL_OWNER {
                return Err(OwnerSetError::ReservedOwner(*owner));
            }
            if owners[..i].contains(owner) {
                return Err(OwnerSetError::DuplicateOwner(*owner));
            }
        }

        let threshold = threshold.unwrap_or(owners.len() as u64);
        if threshold == 0 || threshold > owners.len() as u64 {
            return Err(OwnerSetError::InvalidThreshold { threshold, owners: owners.len() });
        }

        Ok(Self { owners, threshold })
    }

    pub fn owners(&self) -> &[Address] {
        &self.owners
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Whether `other` names the same owners, in any order, with the same threshold.
    pub fn same_as(&self, owners: &[Address], threshold: u64) -> bool {
        let mut a = self.owners.clone();
        let mut b = owners.to_vec();
        a.sort();
        b.sort();
        a == b && self.threshold == threshold
    }
}

/// A Safe as seen by the coordinator. Predicted accounts carry the requested owner
/// set and nonce 0; deployed accounts carry on-chain values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeAccount {
    pub address: Address,
    pub owners: Vec<Address>,
    pub threshold: u64,
    pub nonce: u64,
    pub deployed: bool,
}

impl SafeAccount {
    pub fn is_owner(&self, address: &Address) -> bool {
        self.owners.contains(address)
    }
}

/// Reads the on-chain state of a deployed Safe.
pub async fn load_account<C: SafeChain>(chain: &C, safe: Address) -> Result<SafeAccount> {
    if !chain.is_deployed(safe).await? {
        return Err(CoordinatorError::AccountNotDeployed(safe));
    }
    Ok(SafeAccount {
        address: safe,
        owners: chain.owners(safe).await?,
        threshold: chain.threshold(safe).await?,
        nonce: chain.nonce(safe).await?,
        deployed: true,
    })
}

/// Derives Safe proxy addresses and performs the one-time deployment.
#[derive(Debug)]
pub struct AccountResolver<'a, C> {
    chain: &'a C,
    deployment: &'a DeploymentConfig,
}

impl<'a, C: SafeChain> AccountResolver<'a, C> {
    pub fn new(chain: &'a C, deployment: &'a DeploymentConfig) -> Self {
        Self { chain, deployment }
    }

    /// `Safe.setup` calldata used as the proxy initializer.
    pub fn initializer(&self, owner_set: &OwnerSet) -> Bytes {
        ISafe::setupCall {
            _owners: owner_set.owners().to_vec(),
            _threshold: U256::from(owner_set.threshold()),
            to: Address::ZERO,
            data: Bytes::new(),
            fallbackHandler: self.deployment.fallback_handler,
            paymentToken: Address::ZERO,
            payment: U256::ZERO,
            paymentReceiver: Address::ZERO,
        }
        .abi_encode()
        .into()
    }

    /// CREATE2 address the proxy factory will deploy the Safe at.
    pub fn predict_address(&self, owner_set: &OwnerSet, proxy_creation_code: &[u8]) -> Address {
        predict_safe_address(
            self.deployment.proxy_factory,
            self.deployment.singleton,
            &self.initializer(owner_set),
            self.deployment.salt_nonce,
            proxy_creation_code,
        )
    }

    /// Resolves the account for an owner set without side effects.
    pub async fn resolve(&self, owner_set: &OwnerSet) -> Result<SafeAccount> {
        let creation_code = self.chain.proxy_creation_code(self.deployment.proxy_factory).await?;
        let address = self.predict_address(owner_set, &creation_code);

        if !self.chain.is_deployed(address).await? {
            debug!(safe = %address, "Safe not deployed, returning predicted address");
            return Ok(SafeAccount {
                address,
                owners: owner_set.owners().to_vec(),
                threshold: owner_set.threshold(),
                nonce: 0,
                deployed: false,
            });
        }

        let account = load_account(self.chain, address).await?;
        if !owner_set.same_as(&account.owners, account.threshold) {
            warn!(
                safe = %address,
                onchain_threshold = account.threshold,
                requested_threshold = owner_set.threshold(),
                "Deployed Safe owners differ from the requested owner set"
            );
        }
        Ok(account)
    }

    /// Deploys the Safe unless it already exists. Returns the account address in
    /// both cases.
    pub async fn deploy(&self, owner_set: &OwnerSet, receipt_timeout: Duration) -> Result<Address> {
        let account = self.resolve(owner_set).await?;
        if account.deployed {
            info!(safe = %account.address, "Safe already deployed");
            return Ok(account.address);
        }

        let call = ISafeProxyFactory::createProxyWithNonceCall {
            _singleton: self.deployment.singleton,
            initializer: self.initializer(owner_set),
            saltNonce: U256::from(self.deployment.salt_nonce),
        };

        info!(
            safe = %account.address,
            owners = ?owner_set.owners(),
            threshold = owner_set.threshold(),
            "Deploying Safe"
        );

        let tx_hash = self
            .chain
            .send_transaction(self.deployment.proxy_factory, U256::ZERO, call.abi_encode().into())
            .await;

        let outcome = match tx_hash {
            Ok(tx_hash) => self
                .chain
                .wait_for_receipt(tx_hash, receipt_timeout)
                .await
                .map(|receipt| (tx_hash, receipt)),
            Err(err) => Err(err),
        };

        // A competing deployment makes ours revert; the code being there is what counts.
        if self.chain.is_deployed(account.address).await? {
            if let Ok((tx_hash, _)) = &outcome {
                info!(safe = %account.address, %tx_hash, "Safe deployed");
            }
            return Ok(account.address);
        }

        match outcome {
            Ok((tx_hash, Some(_))) => Err(ExecutionError::new(
                ExecutionFailure::Reverted,
                format!("deployment transaction {tx_hash} mined without creating the Safe"),
            )
            .into()),
            Ok((tx_hash, None)) => Err(CoordinatorError::chain_unreachable(format!(
                "deployment transaction {tx_hash} not mined within {}s",
                receipt_timeout.as_secs()
            ))),
            Err(err) => Err(err),
        }
    }
}

/// `create2(factory, keccak(keccak(initializer) ++ saltNonce), creationCode ++ uint256(singleton))`
pub fn predict_safe_address(
    factory: Address,
    singleton: Address,
    initializer: &[u8],
    salt_nonce: u64,
    proxy_creation_code: &[u8],
) -> Address {
    let mut salt_preimage = [0u8; 64];
    salt_preimage[..32].copy_from_slice(keccak256(initializer).as_slice());
    salt_preimage[32..].copy_from_slice(&U256::from(salt_nonce).to_be_bytes::<32>());
    let salt = keccak256(salt_preimage);

    let mut init_code = Vec::with_capacity(proxy_creation_code.len() + 32);
    init_code.extend_from_slice(proxy_creation_code);
    init_code.extend_from_slice(singleton.into_word().as_slice());

    factory.create2_from_code(salt, init_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn owner(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn default_threshold_is_full_consensus() {
        let set = OwnerSet::new(owner(0xaa), [owner(0xbb), owner(0xcc)], None).unwrap();
        assert_eq!(set.owners(), &[owner(0xaa), owner(0xbb), owner(0xcc)]);
        assert_eq!(set.threshold(), 3);
    }

    #[test_case(vec![owner(0xaa)], None, OwnerSetError::TooFewOwners(1) ; "single owner")]
    #[test_case(
        vec![owner(0xaa), owner(0xaa)], None, OwnerSetError::DuplicateOwner(owner(0xaa))
        ; "duplicate"
    )]
    #[test_case(
        vec![owner(0xaa), Address::ZERO], None, OwnerSetError::ReservedOwner(Address::ZERO)
        ; "zero owner"
    )]
    #[test_case(
        vec![owner(0xaa), SENTINEL_OWNER], None, OwnerSetError::ReservedOwner(SENTINEL_OWNER)
        ; "sentinel owner"
    )]
    #[test_case(
        vec![owner(0xaa), owner(0xbb)],
        Some(0),
        OwnerSetError::InvalidThreshold { threshold: 0, owners: 2 }
        ; "zero threshold"
    )]
    #[test_case(
        vec![owner(0xaa), owner(0xbb)],
        Some(3),
        OwnerSetError::InvalidThreshold { threshold: 3, owners: 2 }
        ; "threshold above owners"
    )]
    fn rejects_invalid_owner_sets(
        owners: Vec<Address>,
        threshold: Option<u64>,
        expected: OwnerSetError,
    ) {
        assert_eq!(OwnerSet::from_owners(owners, threshold).unwrap_err(), expected);
    }

    #[test]
    fn partial_threshold_is_supported() {
        let set = OwnerSet::new(owner(0xaa), [owner(0xbb), owner(0xcc)], Some(2)).unwrap();
        assert_eq!(set.threshold(), 2);
        assert!(set.same_as(&[owner(0xcc), owner(0xaa), owner(0xbb)], 2));
        assert!(!set.same_as(&[owner(0xcc), owner(0xaa), owner(0xbb)], 3));
    }

    #[test]
    fn prediction_depends_on_owners_and_salt() {
        let factory = owner(0xfa);
        let singleton = owner(0x51);
        let code = [0x60u8, 0x80, 0x60, 0x40];

        let a = predict_safe_address(factory, singleton, b"setup-a", 0, &code);
        assert_eq!(a, predict_safe_address(factory, singleton, b"setup-a", 0, &code));
        assert_ne!(a, predict_safe_address(factory, singleton, b"setup-b", 0, &code));
        assert_ne!(a, predict_safe_address(factory, singleton, b"setup-a", 1, &code));
        assert_ne!(a, predict_safe_address(factory, owner(0x52), b"setup-a", 0, &code));
    }
}
