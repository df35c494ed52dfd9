//! Transaction relay client.
//!
//! The relay is the shared, off-chain pool where owners publish proposals and
//! their confirmations. [`SafeServiceClient`] speaks the Safe Transaction Service
//! REST API.

use alloy::primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;
use jiff::Timestamp;
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{
    future::Future,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    confirmations::Confirmation,
    error::{CoordinatorError, Result},
    metrics::CoordinatorMetrics,
    proposal::{Operation, SafeTransaction, TransactionProposal},
    retry::{RetryPolicy, with_retry},
    serde_helpers::{u64_lenient, u256_decimal},
};

/// Upper bound on pages followed when listing pending proposals.
const MAX_PAGES: usize = 10;

/// A proposal as stored by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayTransaction {
    pub safe: Address,
    pub to: Address,
    #[serde(with = "u256_decimal")]
    pub value: U256,
    #[serde(default)]
    pub data: Option<Bytes>,
    pub operation: Operation,
    #[serde(with = "u256_decimal")]
    pub safe_tx_gas: U256,
    #[serde(with = "u256_decimal")]
    pub base_gas: U256,
    #[serde(with = "u256_decimal")]
    pub gas_price: U256,
    #[serde(default)]
    pub gas_token: Option<Address>,
    #[serde(default)]
    pub refund_receiver: Option<Address>,
    #[serde(with = "u64_lenient")]
    pub nonce: u64,
    pub safe_tx_hash: B256,
    #[serde(default)]
    pub proposer: Option<Address>,
    #[serde(default)]
    pub submission_date: Option<Timestamp>,
    #[serde(default)]
    pub is_executed: bool,
    #[serde(default)]
    pub is_successful: Option<bool>,
    #[serde(default)]
    pub transaction_hash: Option<B256>,
    #[serde(default)]
    pub confirmations: Vec<RelayConfirmation>,
}

impl RelayTransaction {
    /// The hashed fields, as the relay reports them.
    pub fn transaction(&self) -> SafeTransaction {
        SafeTransaction {
            to: self.to,
            value: self.value,
            data: self.data.clone().unwrap_or_default(),
            operation: self.operation,
            safe_tx_gas: self.safe_tx_gas,
            base_gas: self.base_gas,
            gas_price: self.gas_price,
            gas_token: self.gas_token.unwrap_or_default(),
            refund_receiver: self.refund_receiver.unwrap_or_default(),
            nonce: self.nonce,
        }
    }

    /// Rebuilds the proposal locally. The result's canonical hash is recomputed
    /// and may differ from [`Self::safe_tx_hash`] if the relay entry is corrupt.
    pub fn to_proposal(&self, chain_id: u64) -> TransactionProposal {
        TransactionProposal::new(self.safe, chain_id, self.transaction())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfirmation {
    pub owner: Address,
    pub signature: Bytes,
    #[serde(default)]
    pub submission_date: Option<Timestamp>,
    #[serde(default)]
    pub signature_type: Option<String>,
}

impl From<&RelayConfirmation> for Confirmation {
    fn from(confirmation: &RelayConfirmation) -> Self {
        Self {
            signer: confirmation.owner,
            signature: confirmation.signature.clone(),
            submitted_at: confirmation.submission_date,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Paginated<T> {
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub next: Option<String>,
    pub results: Vec<T>,
}

/// Body of a proposal submission: the transaction plus the proposer's signature.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposeTransactionBody<'a> {
    #[serde(flatten)]
    pub transaction: &'a SafeTransaction,
    pub contract_transaction_hash: B256,
    pub sender: Address,
    pub signature: &'a Bytes,
    pub origin: &'static str,
}

#[derive(Debug, Serialize)]
struct ConfirmationBody<'a> {
    signature: &'a Bytes,
}

/// Relay operations the coordinator depends on.
#[async_trait]
pub trait TransactionRelay: Send + Sync {
    /// Publishes a proposal with its proposer's confirmation. Re-publishing an
    /// identical proposal succeeds.
    async fn propose_transaction(
        &self,
        proposal: &TransactionProposal,
        confirmation: &Confirmation,
    ) -> Result<()>;

    /// Proposals for `safe` the relay has not seen executed.
    async fn pending_transactions(&self, safe: Address) -> Result<Vec<RelayTransaction>>;

    async fn transaction(&self, safe_tx_hash: B256) -> Result<RelayTransaction>;

    /// Adds a signature to an existing proposal. Adding a known signature succeeds.
    async fn add_confirmation(&self, safe_tx_hash: B256, signature: &Bytes) -> Result<()>;
}

/// Safe Transaction Service client.
#[derive(Clone)]
pub struct SafeServiceClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    retry: RetryPolicy,
    metrics: CoordinatorMetrics,
}

impl std::fmt::Debug for SafeServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeServiceClient")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl SafeServiceClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        request_timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CoordinatorError::Configuration(format!("relay client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
            retry,
            metrics: CoordinatorMetrics::default(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned + Send>(
        &self,
        operation: &str,
        url: &str,
        not_found: B256,
    ) -> Result<T> {
        with_retry(operation, &self.retry, || async {
            let started = Instant::now();
            let response = self.authorize(self.client.get(url)).send().await;
            self.metrics.record_relay_latency(started.elapsed().as_secs_f64());

            let response = check_status(response.map_err(transport_error)?, not_found).await?;
            response.json::<T>().await.map_err(|e| {
                CoordinatorError::ProposalMismatch(format!("unexpected relay response: {e}"))
            })
        })
        .await
    }

    async fn post_json<B: Serialize + Sync>(
        &self,
        operation: &str,
        url: &str,
        body: &B,
        not_found: B256,
    ) -> Result<()> {
        with_retry(operation, &self.retry, || async {
            let started = Instant::now();
            let response = self.authorize(self.client.post(url)).json(body).send().await;
            self.metrics.record_relay_latency(started.elapsed().as_secs_f64());

            match check_status(response.map_err(transport_error)?, not_found).await {
                Ok(_) => Ok(()),
                // The relay answers a replayed POST with a 4xx; the state we wanted exists.
                Err(CoordinatorError::ProposalMismatch(message)) if is_already_known(&message) => {
                    debug!(operation, %message, "Relay already has this entry");
                    Ok(())
                }
                Err(err) => Err(err),
            }
        })
        .await
    }
}

#[async_trait]
impl TransactionRelay for SafeServiceClient {
    async fn propose_transaction(
        &self,
        proposal: &TransactionProposal,
        confirmation: &Confirmation,
    ) -> Result<()> {
        let url = self.url(&format!("safes/{}/multisig-transactions/", proposal.safe()));
        let body = ProposeTransactionBody {
            transaction: proposal.transaction(),
            contract_transaction_hash: proposal.canonical_hash(),
            sender: confirmation.signer,
            signature: &confirmation.signature,
            origin: "cosign",
        };

        self.post_json("relay_propose", &url, &body, proposal.canonical_hash()).await?;
        info!(
            safe = %proposal.safe(),
            nonce = proposal.nonce(),
            safe_tx_hash = %proposal.canonical_hash(),
            "Proposal published to relay"
        );
        Ok(())
    }

    async fn pending_transactions(&self, safe: Address) -> Result<Vec<RelayTransaction>> {
        let first = self.url(&format!(
            "safes/{safe}/multisig-transactions/?executed=false&ordering=nonce&limit=100"
        ));
        let (mut transactions, truncated) = follow_pages(first, |url| async move {
            let page: Result<Paginated<RelayTransaction>> =
                self.get_json("relay_pending", &url, B256::ZERO).await;
            match page {
                Ok(page) => Ok(Some(page)),
                // Safes the relay has never indexed have no pending proposals.
                Err(CoordinatorError::ProposalNotFound(_)) => Ok(None),
                Err(err) => Err(err),
            }
        })
        .await?;

        if truncated {
            warn!(
                %safe,
                pages = MAX_PAGES,
                fetched = transactions.len(),
                "Pending proposal listing truncated, later entries are not deduplicated against"
            );
        }

        // Some relay versions ignore the filter.
        transactions.retain(|tx| !tx.is_executed);
        debug!(%safe, count = transactions.len(), "Fetched pending proposals");
        Ok(transactions)
    }

    async fn transaction(&self, safe_tx_hash: B256) -> Result<RelayTransaction> {
        let url = self.url(&format!("multisig-transactions/{safe_tx_hash}/"));
        self.get_json("relay_transaction", &url, safe_tx_hash).await
    }

    async fn add_confirmation(&self, safe_tx_hash: B256, signature: &Bytes) -> Result<()> {
        let url = self.url(&format!("multisig-transactions/{safe_tx_hash}/confirmations/"));
        self.post_json("relay_confirm", &url, &ConfirmationBody { signature }, safe_tx_hash)
            .await
    }
}

/// Maps an HTTP status to the error taxonomy. 404 is reported against `not_found`.
async fn check_status(response: Response, not_found: B256) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, body, not_found))
}

fn status_error(status: StatusCode, body: String, not_found: B256) -> CoordinatorError {
    if status == StatusCode::NOT_FOUND {
        CoordinatorError::ProposalNotFound(not_found)
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        CoordinatorError::relay_unreachable(format!("HTTP {status}: {body}"))
    } else {
        CoordinatorError::ProposalMismatch(format!("HTTP {status}: {body}"))
    }
}

fn transport_error(err: reqwest::Error) -> CoordinatorError {
    CoordinatorError::relay_unreachable(err)
}

/// Follows `next` links from `first`, reading at most [`MAX_PAGES`] pages. A
/// `None` page ends the listing. Returns the items and whether pages were left
/// unread.
async fn follow_pages<T, F, Fut>(first: String, mut fetch: F) -> Result<(Vec<T>, bool)>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Option<Paginated<T>>>>,
{
    let mut url = Some(first);
    let mut items = Vec::new();

    for _ in 0..MAX_PAGES {
        let Some(page_url) = url.take() else { break };
        let Some(page) = fetch(page_url).await? else { break };
        items.extend(page.results);
        url = page.next;
    }
    Ok((items, url.is_some()))
}

fn is_already_known(message: &str) -> bool {
    let msg = message.to_lowercase();
    msg.contains("already exists") || msg.contains("already confirmed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, b256};
    use test_case::test_case;

    const SERVICE_ENTRY: &str = r#"{
        "safe": "0x5aFE3855358E112B5647B952709E6165e1c1eEEe",
        "to": "0x00000000000000000000000000000000000000Bb",
        "value": "1000000000000000",
        "data": null,
        "operation": 0,
        "gasToken": "0x0000000000000000000000000000000000000000",
        "safeTxGas": 0,
        "baseGas": "0",
        "gasPrice": "0",
        "refundReceiver": "0x0000000000000000000000000000000000000000",
        "nonce": "4",
        "executionDate": null,
        "submissionDate": "2024-05-01T12:00:00.123456Z",
        "modified": "2024-05-01T12:00:00.123456Z",
        "blockNumber": null,
        "transactionHash": null,
        "safeTxHash": "0x1111111111111111111111111111111111111111111111111111111111111111",
        "proposer": "0x00000000000000000000000000000000000000aA",
        "isExecuted": false,
        "isSuccessful": null,
        "confirmationsRequired": 2,
        "confirmations": [{
            "owner": "0x00000000000000000000000000000000000000aA",
            "submissionDate": "2024-05-01T12:00:00.123456Z",
            "transactionHash": null,
            "signature": "0x0102",
            "signatureType": "EOA"
        }],
        "trusted": true
    }"#;

    #[test]
    fn decodes_service_entry() {
        let tx: RelayTransaction = serde_json::from_str(SERVICE_ENTRY).unwrap();
        assert_eq!(tx.nonce, 4);
        assert_eq!(tx.value, U256::from(1_000_000_000_000_000u64));
        assert_eq!(tx.safe_tx_gas, U256::ZERO);
        assert_eq!(
            tx.safe_tx_hash,
            b256!("1111111111111111111111111111111111111111111111111111111111111111")
        );
        assert!(tx.submission_date.is_some());
        assert_eq!(tx.confirmations.len(), 1);

        let transaction = tx.transaction();
        assert!(transaction.data.is_empty());
        assert_eq!(transaction.gas_token, Address::ZERO);
        assert_eq!(transaction.to, address!("00000000000000000000000000000000000000bb"));
    }

    #[test]
    fn propose_body_carries_hash_and_sender() {
        let tx: RelayTransaction = serde_json::from_str(SERVICE_ENTRY).unwrap();
        let proposal = tx.to_proposal(1);
        let signature = Bytes::from(vec![1u8; 65]);
        let body = ProposeTransactionBody {
            transaction: proposal.transaction(),
            contract_transaction_hash: proposal.canonical_hash(),
            sender: address!("00000000000000000000000000000000000000aa"),
            signature: &signature,
            origin: "cosign",
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["value"], "1000000000000000");
        assert_eq!(json["safeTxGas"], "0");
        assert_eq!(json["nonce"], 4);
        assert_eq!(json["operation"], 0);
        assert_eq!(
            json["contractTransactionHash"],
            serde_json::to_value(proposal.canonical_hash()).unwrap()
        );
        assert!(json.get("sender").is_some());
    }

    #[test_case(StatusCode::NOT_FOUND, "ProposalNotFound")]
    #[test_case(StatusCode::UNPROCESSABLE_ENTITY, "ProposalMismatch")]
    #[test_case(StatusCode::BAD_REQUEST, "ProposalMismatch")]
    #[test_case(StatusCode::TOO_MANY_REQUESTS, "Unreachable")]
    #[test_case(StatusCode::BAD_GATEWAY, "Unreachable")]
    fn maps_http_status(status: StatusCode, expected: &str) {
        let err = status_error(status, String::new(), B256::ZERO);
        let actual = match err {
            CoordinatorError::ProposalNotFound(_) => "ProposalNotFound",
            CoordinatorError::ProposalMismatch(_) => "ProposalMismatch",
            CoordinatorError::ProviderUnreachable { .. } => "Unreachable",
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(actual, expected);
    }

    #[test]
    fn replayed_posts_are_recognised() {
        let body = r#"{"nonFieldErrors":["Tx with safe-tx-hash=0x11 already exists"]}"#;
        assert!(is_already_known(&format!("HTTP 422: {body}")));
        assert!(is_already_known("HTTP 400: Signature already confirmed"));
        assert!(!is_already_known("HTTP 422: Signer is not an owner"));
    }

    fn page(url: &str, next: Option<String>) -> Result<Option<Paginated<String>>> {
        Ok(Some(Paginated { count: None, next, results: vec![url.to_string()] }))
    }

    #[tokio::test]
    async fn paging_stops_at_page_limit() {
        let (items, truncated) =
            follow_pages("p0".to_string(), |url| async move { page(&url, Some(format!("{url}+"))) })
                .await
                .unwrap();
        assert_eq!(items.len(), MAX_PAGES);
        assert!(truncated);
    }

    #[tokio::test]
    async fn paging_follows_next_links() {
        let (items, truncated) = follow_pages("p0".to_string(), |url| async move {
            let next = (url.len() < 4).then(|| format!("{url}+"));
            page(&url, next)
        })
        .await
        .unwrap();
        assert_eq!(items, vec!["p0", "p0+", "p0++"]);
        assert!(!truncated);

        let (items, truncated) =
            follow_pages::<String, _, _>("p0".to_string(), |_| std::future::ready(Ok(None)))
                .await
                .unwrap();
        assert!(items.is_empty());
        assert!(!truncated);
    }

    #[test]
    fn builds_api_urls() {
        let client = SafeServiceClient::new(
            "https://relay.example/",
            None,
            Duration::from_secs(1),
            RetryPolicy::none(),
        )
        .unwrap();
        assert_eq!(
            client.url("multisig-transactions/0xab/"),
            "https://relay.example/api/v1/multisig-transactions/0xab/"
        );
    }
}
