//! Safe transaction proposals and their canonical EIP-712 identity.

use alloy::{
    primitives::{Address, B256, Bytes, U256},
    sol_types::{Eip712Domain, SolStruct},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    account::SafeAccount,
    chain::SafeChain,
    config::GasConfig,
    contracts::{ISafe, SafeTx},
    error::Result,
    serde_helpers::{u64_lenient, u256_decimal},
};

/// `SafeTx` members in type-hash order, as presented to wallets.
pub const SAFE_TX_FIELDS: [(&str, &str); 10] = [
    ("to", "address"),
    ("value", "uint256"),
    ("data", "bytes"),
    ("operation", "uint8"),
    ("safeTxGas", "uint256"),
    ("baseGas", "uint256"),
    ("gasPrice", "uint256"),
    ("gasToken", "address"),
    ("refundReceiver", "address"),
    ("nonce", "uint256"),
];

/// How the Safe invokes the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Operation {
    #[default]
    Call = 0,
    DelegateCall = 1,
}

impl From<Operation> for u8 {
    fn from(operation: Operation) -> Self {
        operation as Self
    }
}

impl TryFrom<u8> for Operation {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Call),
            1 => Ok(Self::DelegateCall),
            other => Err(format!("unknown operation {other}")),
        }
    }
}

/// What the caller wants the Safe to do; everything else is filled in by the builder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalRequest {
    pub to: Address,
    #[serde(with = "u256_decimal")]
    pub value: U256,
    #[serde(default)]
    pub data: Bytes,
    #[serde(default)]
    pub operation: Operation,
}

impl ProposalRequest {
    pub fn call(to: Address, value: U256, data: Bytes) -> Self {
        Self { to, value, data, operation: Operation::Call }
    }
}

/// The hashed fields of a Safe transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeTransaction {
    pub to: Address,
    #[serde(with = "u256_decimal")]
    pub value: U256,
    pub data: Bytes,
    pub operation: Operation,
    #[serde(with = "u256_decimal")]
    pub safe_tx_gas: U256,
    #[serde(with = "u256_decimal")]
    pub base_gas: U256,
    #[serde(with = "u256_decimal")]
    pub gas_price: U256,
    pub gas_token: Address,
    pub refund_receiver: Address,
    #[serde(with = "u64_lenient")]
    pub nonce: u64,
}

impl SafeTransaction {
    /// A transaction without gas refunds.
    pub fn new(request: &ProposalRequest, nonce: u64) -> Self {
        Self {
            to: request.to,
            value: request.value,
            data: request.data.clone(),
            operation: request.operation,
            safe_tx_gas: U256::ZERO,
            base_gas: U256::ZERO,
            gas_price: U256::ZERO,
            gas_token: Address::ZERO,
            refund_receiver: Address::ZERO,
            nonce,
        }
    }

    pub fn as_sol(&self) -> SafeTx {
        SafeTx {
            to: self.to,
            value: self.value,
            data: self.data.clone(),
            operation: self.operation.into(),
            safeTxGas: self.safe_tx_gas,
            baseGas: self.base_gas,
            gasPrice: self.gas_price,
            gasToken: self.gas_token,
            refundReceiver: self.refund_receiver,
            nonce: U256::from(self.nonce),
        }
    }
}

/// The EIP-712 domain a Safe signs under.
pub fn safe_domain(chain_id: u64, safe: Address) -> Eip712Domain {
    Eip712Domain::new(None, None, Some(U256::from(chain_id)), Some(safe), None)
}

/// Canonical identity of a Safe transaction on one account and chain.
pub fn canonical_hash(safe: Address, chain_id: u64, transaction: &SafeTransaction) -> B256 {
    transaction.as_sol().eip712_signing_hash(&safe_domain(chain_id, safe))
}

/// A fully populated proposal. Immutable once constructed; the canonical hash is
/// computed eagerly and always matches the fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionProposal {
    safe: Address,
    chain_id: u64,
    #[serde(flatten)]
    transaction: SafeTransaction,
    safe_tx_hash: B256,
}

impl TransactionProposal {
    pub fn new(safe: Address, chain_id: u64, transaction: SafeTransaction) -> Self {
        let safe_tx_hash = canonical_hash(safe, chain_id, &transaction);
        Self { safe, chain_id, transaction, safe_tx_hash }
    }

    pub fn safe(&self) -> Address {
        self.safe
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn transaction(&self) -> &SafeTransaction {
        &self.transaction
    }

    pub fn nonce(&self) -> u64 {
        self.transaction.nonce
    }

    pub fn canonical_hash(&self) -> B256 {
        self.safe_tx_hash
    }

    /// Retry-tolerant identity: same target, value and calldata. Operation and gas
    /// parameters are deliberately ignored.
    pub fn semantic_equals(&self, request: &ProposalRequest) -> bool {
        semantic_equals(&self.transaction, request)
    }

    /// `execTransaction` call carrying the aggregated signatures.
    pub fn exec_call(&self, signatures: Bytes) -> ISafe::execTransactionCall {
        let tx = &self.transaction;
        ISafe::execTransactionCall {
            to: tx.to,
            value: tx.value,
            data: tx.data.clone(),
            operation: tx.operation.into(),
            safeTxGas: tx.safe_tx_gas,
            baseGas: tx.base_gas,
            gasPrice: tx.gas_price,
            gasToken: tx.gas_token,
            refundReceiver: tx.refund_receiver,
            signatures,
        }
    }

    /// `eth_signTypedData_v4` payload for a human owner's wallet. Signing it yields a
    /// signature over exactly [`Self::canonical_hash`].
    pub fn typed_data(&self) -> serde_json::Value {
        let tx = &self.transaction;
        let safe_tx_type: Vec<_> = SAFE_TX_FIELDS
            .iter()
            .map(|(name, ty)| serde_json::json!({ "name": name, "type": ty }))
            .collect();

        serde_json::json!({
            "types": {
                "EIP712Domain": [
                    { "name": "chainId", "type": "uint256" },
                    { "name": "verifyingContract", "type": "address" },
                ],
                "SafeTx": safe_tx_type,
            },
            "primaryType": "SafeTx",
            "domain": {
                "chainId": self.chain_id,
                "verifyingContract": self.safe,
            },
            "message": {
                "to": tx.to,
                "value": tx.value.to_string(),
                "data": tx.data,
                "operation": u8::from(tx.operation),
                "safeTxGas": tx.safe_tx_gas.to_string(),
                "baseGas": tx.base_gas.to_string(),
                "gasPrice": tx.gas_price.to_string(),
                "gasToken": tx.gas_token,
                "refundReceiver": tx.refund_receiver,
                "nonce": tx.nonce,
            },
        })
    }
}

pub fn semantic_equals(transaction: &SafeTransaction, request: &ProposalRequest) -> bool {
    transaction.to == request.to
        && transaction.value == request.value
        && transaction.data == request.data
}

/// Fills gas parameters for a request and seals it into a [`TransactionProposal`].
#[derive(Debug)]
pub struct ProposalBuilder<'a, C> {
    chain: &'a C,
    gas: &'a GasConfig,
}

impl<'a, C: SafeChain> ProposalBuilder<'a, C> {
    pub fn new(chain: &'a C, gas: &'a GasConfig) -> Self {
        Self { chain, gas }
    }

    pub async fn build(
        &self,
        account: &SafeAccount,
        chain_id: u64,
        request: &ProposalRequest,
        nonce: u64,
    ) -> Result<TransactionProposal> {
        let mut transaction = SafeTransaction::new(request, nonce);
        transaction.safe_tx_gas = self.safe_tx_gas(account.address, request).await;

        if self.gas.refund {
            transaction.gas_price = U256::from(self.chain.gas_price().await?);
            transaction.base_gas = U256::from(self.gas.base_gas);
        }

        let proposal = TransactionProposal::new(account.address, chain_id, transaction);
        debug!(
            safe = %account.address,
            nonce,
            safe_tx_hash = %proposal.canonical_hash(),
            safe_tx_gas = %proposal.transaction().safe_tx_gas,
            "Built proposal"
        );
        Ok(proposal)
    }

    /// Estimated inner-call gas plus buffer, or the configured floor when the call
    /// cannot be estimated. Estimation failure never fails the proposal.
    async fn safe_tx_gas(&self, safe: Address, request: &ProposalRequest) -> U256 {
        if !self.gas.estimate_safe_tx_gas {
            return U256::ZERO;
        }
        let floor = self.gas.min_safe_tx_gas;

        if request.operation == Operation::DelegateCall {
            return U256::from(floor);
        }

        match self
            .chain
            .estimate_gas(safe, request.to, request.value, request.data.clone())
            .await
        {
            Ok(estimate) => {
                let multiplier = self.gas.buffer_percent.saturating_add(100);
                let buffered = estimate.saturating_mul(multiplier) / 100;
                U256::from(buffered.max(floor))
            }
            Err(err) => {
                warn!(
                    %safe,
                    to = %request.to,
                    error = %err,
                    fallback = floor,
                    "Gas estimation failed, using fallback safeTxGas"
                );
                U256::from(floor)
            }
        }
    }
}
