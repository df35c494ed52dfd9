//! Chain access for Safe accounts.

use alloy::{
    network::{EthereumWallet, ReceiptResponse},
    primitives::{Address, B256, Bytes, Log, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::{Filter, TransactionRequest},
    signers::local::PrivateKeySigner,
    sol_types::{SolCall, SolEvent},
    transports::{RpcError, TransportError},
};
use async_trait::async_trait;
use std::{
    future::{Future, IntoFuture},
    time::{Duration, Instant},
};
use tracing::{debug, info};

use crate::{
    contracts::{ISafe, ISafeProxyFactory},
    error::{CoordinatorError, ExecutionError, Result},
    metrics::CoordinatorMetrics,
    retry::{RetryPolicy, is_transient_message, with_retry},
};

/// A mined transaction, reduced to what the coordinator inspects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReceipt {
    pub tx_hash: B256,
    pub success: bool,
    pub block_number: Option<u64>,
    pub logs: Vec<Log>,
}

/// Chain operations the coordinator depends on.
#[async_trait]
pub trait SafeChain: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;

    async fn block_number(&self) -> Result<u64>;

    async fn is_deployed(&self, address: Address) -> Result<bool>;

    async fn owners(&self, safe: Address) -> Result<Vec<Address>>;

    async fn threshold(&self, safe: Address) -> Result<u64>;

    async fn nonce(&self, safe: Address) -> Result<u64>;

    /// Gas for calling `to` from `from`.
    async fn estimate_gas(&self, from: Address, to: Address, value: U256, data: Bytes)
    -> Result<u64>;

    async fn gas_price(&self) -> Result<u128>;

    async fn proxy_creation_code(&self, factory: Address) -> Result<Bytes>;

    /// On-chain transaction that emitted `ExecutionSuccess(safe_tx_hash)` within the
    /// last `lookback` blocks, if any.
    async fn execution_logged(
        &self,
        safe: Address,
        safe_tx_hash: B256,
        lookback: u64,
    ) -> Result<Option<B256>>;

    /// Address transactions are sent from.
    fn sender(&self) -> Address;

    /// Broadcasts a transaction. Never retried.
    async fn send_transaction(&self, to: Address, value: U256, input: Bytes) -> Result<B256>;

    /// Polls for the receipt until `timeout`; `None` if still pending.
    async fn wait_for_receipt(&self, tx_hash: B256, timeout: Duration)
    -> Result<Option<ChainReceipt>>;
}

/// [`SafeChain`] over JSON-RPC, sending from the agent's key.
pub struct RpcChain {
    provider: DynProvider,
    sender: Address,
    retry: RetryPolicy,
    request_timeout: Duration,
    poll_interval: Duration,
    metrics: CoordinatorMetrics,
}

impl std::fmt::Debug for RpcChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChain").field("sender", &self.sender).finish_non_exhaustive()
    }
}

impl RpcChain {
    pub async fn connect(
        rpc_url: &str,
        signer: PrivateKeySigner,
        retry: RetryPolicy,
        request_timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self> {
        let sender = signer.address();
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect(rpc_url)
            .await
            .map_err(rpc_error)?
            .erased();

        info!(%sender, rpc_url, "Connected to chain RPC");

        Ok(Self {
            provider,
            sender,
            retry,
            request_timeout,
            poll_interval,
            metrics: CoordinatorMetrics::default(),
        })
    }

    /// Bounded, retried read.
    async fn read<T, F, Fut>(&self, operation: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, TransportError>>,
    {
        with_retry(operation, &self.retry, || async {
            let started = Instant::now();
            let result = tokio::time::timeout(self.request_timeout, f())
                .await
                .map_err(|_| {
                    CoordinatorError::chain_unreachable(format!("{operation} timed out"))
                })?
                .map_err(rpc_error);
            self.metrics.record_rpc_latency(started.elapsed().as_secs_f64());
            result
        })
        .await
    }

    async fn view<C: SolCall>(&self, operation: &str, to: Address, call: C) -> Result<C::Return> {
        let tx = TransactionRequest::default().to(to).input(call.abi_encode().into());
        let output = self.read(operation, || self.provider.call(tx.clone()).into_future()).await?;
        C::abi_decode_returns(&output)
            .map_err(|e| CoordinatorError::Chain(format!("{operation}: {e}")))
    }
}

#[async_trait]
impl SafeChain for RpcChain {
    async fn chain_id(&self) -> Result<u64> {
        self.read("eth_chainId", || self.provider.get_chain_id()).await
    }

    async fn block_number(&self) -> Result<u64> {
        self.read("eth_blockNumber", || self.provider.get_block_number()).await
    }

    async fn is_deployed(&self, address: Address) -> Result<bool> {
        let code = self
            .read("eth_getCode", || self.provider.get_code_at(address).into_future())
            .await?;
        Ok(!code.is_empty())
    }

    async fn owners(&self, safe: Address) -> Result<Vec<Address>> {
        self.view("get_owners", safe, ISafe::getOwnersCall {}).await
    }

    async fn threshold(&self, safe: Address) -> Result<u64> {
        let threshold = self.view("get_threshold", safe, ISafe::getThresholdCall {}).await?;
        to_u64(threshold, "get_threshold")
    }

    async fn nonce(&self, safe: Address) -> Result<u64> {
        let nonce = self.view("nonce", safe, ISafe::nonceCall {}).await?;
        to_u64(nonce, "nonce")
    }

    async fn estimate_gas(
        &self,
        from: Address,
        to: Address,
        value: U256,
        data: Bytes,
    ) -> Result<u64> {
        let tx = TransactionRequest::default().from(from).to(to).value(value).input(data.into());
        // A revert here is an answer, not an outage: do not retry it.
        let started = Instant::now();
        let result = tokio::time::timeout(
            self.request_timeout,
            self.provider.estimate_gas(tx).into_future(),
        )
        .await
        .map_err(|_| CoordinatorError::chain_unreachable("eth_estimateGas timed out"))?
        .map_err(rpc_error);
        self.metrics.record_rpc_latency(started.elapsed().as_secs_f64());
        result
    }

    async fn gas_price(&self) -> Result<u128> {
        self.read("eth_gasPrice", || self.provider.get_gas_price()).await
    }

    async fn proxy_creation_code(&self, factory: Address) -> Result<Bytes> {
        self.view("proxy_creation_code", factory, ISafeProxyFactory::proxyCreationCodeCall {})
            .await
    }

    async fn execution_logged(
        &self,
        safe: Address,
        safe_tx_hash: B256,
        lookback: u64,
    ) -> Result<Option<B256>> {
        let head = self.block_number().await?;
        let (from, to) = lookback_range(head, lookback);
        let filter = Filter::new()
            .address(safe)
            .event_signature(ISafe::ExecutionSuccess::SIGNATURE_HASH)
            .topic1(safe_tx_hash)
            .from_block(from)
            .to_block(to);

        let logs = self.read("eth_getLogs", || self.provider.get_logs(&filter)).await?;
        Ok(logs.into_iter().find_map(|log| log.transaction_hash))
    }

    fn sender(&self) -> Address {
        self.sender
    }

    async fn send_transaction(&self, to: Address, value: U256, input: Bytes) -> Result<B256> {
        let tx = TransactionRequest::default().to(to).value(value).input(input.into());

        let pending = tokio::time::timeout(self.request_timeout, self.provider.send_transaction(tx))
            .await
            .map_err(|_| CoordinatorError::chain_unreachable("eth_sendRawTransaction timed out"))?
            .map_err(submission_error)?;

        let tx_hash = *pending.tx_hash();
        debug!(%tx_hash, %to, "Transaction broadcast");
        Ok(tx_hash)
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        timeout: Duration,
    ) -> Result<Option<ChainReceipt>> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let receipt = self
                .read("eth_getTransactionReceipt", || {
                    self.provider.get_transaction_receipt(tx_hash).into_future()
                })
                .await?;

            if let Some(receipt) = receipt {
                return Ok(Some(ChainReceipt {
                    tx_hash,
                    success: receipt.status(),
                    block_number: receipt.block_number,
                    logs: receipt.inner.logs().iter().map(|log| log.inner.clone()).collect(),
                }));
            }

            if tokio::time::Instant::now() + self.poll_interval > deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Inclusive block range holding at most `lookback` blocks and ending at `head`.
fn lookback_range(head: u64, lookback: u64) -> (u64, u64) {
    (head.saturating_sub(lookback.saturating_sub(1)), head)
}

fn to_u64(value: U256, what: &str) -> Result<u64> {
    if value > U256::from(u64::MAX) {
        return Err(CoordinatorError::Chain(format!("{what}: {value} exceeds u64")));
    }
    Ok(value.to::<u64>())
}

/// Converts a failed read into the taxonomy.
fn rpc_error(err: TransportError) -> CoordinatorError {
    let message = err.to_string();
    match &err {
        RpcError::Transport(_) => CoordinatorError::chain_unreachable(message),
        _ if is_transient_message(&message) => CoordinatorError::chain_unreachable(message),
        _ => CoordinatorError::Chain(message),
    }
}

/// Converts a failed broadcast: node rejections become structured execution errors.
fn submission_error(err: TransportError) -> CoordinatorError {
    match &err {
        RpcError::ErrorResp(payload) => {
            ExecutionError::from_message(payload.message.to_string()).into()
        }
        _ => rpc_error(err),
    }
}
