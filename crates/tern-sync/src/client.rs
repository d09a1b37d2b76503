//! # Ledger Server Client
//!
//! The network seam of the orchestrator. [`SyncClient`] is what the
//! orchestrator calls; [`HttpSyncClient`] is the production implementation
//! over HTTPS. Tests substitute a scripted client.
//!
//! Every call has a definite outcome: a decoded response, or a
//! [`SyncError`] from the transport/protocol categories. A request that
//! exceeds the configured timeout is an error like any other.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use tern_core::Timestamp;

use crate::config::ServerSettings;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{
    CatalogResponse, SubmitBatchRequest, SubmitBatchResponse, CATALOG_PATH, SUBMIT_PATH,
};

/// Longest error body quoted back in an error message.
const MAX_ERROR_BODY: usize = 200;

/// Calls the orchestrator makes against the ledger server.
#[async_trait]
pub trait SyncClient: Send + Sync {
    /// Submits one batch of offline sales.
    async fn submit_batch(&self, request: &SubmitBatchRequest) -> SyncResult<SubmitBatchResponse>;

    /// Fetches products of a store changed since `since` (all when `None`).
    async fn fetch_catalog(
        &self,
        store_id: &str,
        since: Option<Timestamp>,
    ) -> SyncResult<CatalogResponse>;
}

// =============================================================================
// HTTP Implementation
// =============================================================================

/// [`SyncClient`] over reqwest with rustls.
#[derive(Debug, Clone)]
pub struct HttpSyncClient {
    http: Client,
    base_url: Url,
    timeout_secs: u64,
}

impl HttpSyncClient {
    /// `base_url` may carry a path prefix (`https://host/pos`); endpoints
    /// are resolved beneath it.
    pub fn new(mut base_url: Url, settings: &ServerSettings) -> SyncResult<Self> {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = Client::builder()
            .timeout(settings.request_timeout())
            .connect_timeout(settings.connect_timeout())
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("Failed to create HTTP client: {e}")))?;

        Ok(HttpSyncClient {
            http,
            base_url,
            timeout_secs: settings.request_timeout_secs,
        })
    }

    fn endpoint(&self, path: &str) -> SyncResult<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn transport_error(&self, err: reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::Timeout(self.timeout_secs)
        } else {
            SyncError::from(err)
        }
    }

    /// Checks the status and decodes the body.
    async fn decode<T: DeserializeOwned>(&self, response: reqwest::Response) -> SyncResult<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Ledger server rejected request");
            return Err(status_error(status, &body));
        }

        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl SyncClient for HttpSyncClient {
    async fn submit_batch(&self, request: &SubmitBatchRequest) -> SyncResult<SubmitBatchResponse> {
        let url = self.endpoint(SUBMIT_PATH)?;
        debug!(%url, count = request.transactions.len(), "Submitting batch");

        let response = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        self.decode(response).await
    }

    async fn fetch_catalog(
        &self,
        store_id: &str,
        since: Option<Timestamp>,
    ) -> SyncResult<CatalogResponse> {
        let mut url = self.endpoint(CATALOG_PATH)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("storeId", store_id);
            if let Some(since) = since {
                query.append_pair("since", &since.to_rfc3339());
            }
        }
        debug!(%url, "Fetching catalog");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        self.decode(response).await
    }
}

fn status_error(status: StatusCode, body: &str) -> SyncError {
    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("no response body")
            .to_string()
    } else {
        body.chars().take(MAX_ERROR_BODY).collect()
    };

    SyncError::HttpStatus {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> HttpSyncClient {
        HttpSyncClient::new(Url::parse(base).unwrap(), &ServerSettings::default()).unwrap()
    }

    #[test]
    fn test_endpoints_join_base() {
        let client = client("https://ledger.example.com/");
        assert_eq!(
            client.endpoint(SUBMIT_PATH).unwrap().as_str(),
            "https://ledger.example.com/api/sync/transactions"
        );
        assert_eq!(
            client.endpoint(CATALOG_PATH).unwrap().as_str(),
            "https://ledger.example.com/api/sync/catalog"
        );
    }

    #[test]
    fn test_endpoints_keep_base_path_prefix() {
        for base in ["https://host.example.com/pos", "https://host.example.com/pos/"] {
            let client = client(base);
            assert_eq!(
                client.endpoint(SUBMIT_PATH).unwrap().as_str(),
                "https://host.example.com/pos/api/sync/transactions"
            );
            assert_eq!(
                client.endpoint(CATALOG_PATH).unwrap().as_str(),
                "https://host.example.com/pos/api/sync/catalog"
            );
        }

        let bare = client("https://ledger.example.com");
        assert_eq!(
            bare.endpoint(SUBMIT_PATH).unwrap().as_str(),
            "https://ledger.example.com/api/sync/transactions"
        );
    }

    #[test]
    fn test_status_error_quotes_body() {
        let err = status_error(StatusCode::BAD_GATEWAY, "");
        assert!(matches!(
            &err,
            SyncError::HttpStatus { status: 502, message } if message == "Bad Gateway"
        ));
        assert!(err.is_retryable());

        let long = "x".repeat(1_000);
        match status_error(StatusCode::BAD_REQUEST, &long) {
            SyncError::HttpStatus { message, .. } => assert_eq!(message.len(), MAX_ERROR_BODY),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_is_request_failure() {
        // Port 9 (discard) on localhost is not expected to accept HTTP.
        let client = client("http://127.0.0.1:9/");
        let request = SubmitBatchRequest {
            terminal_id: "t-01".into(),
            store_id: "store-1".into(),
            transactions: vec![],
        };

        let err = client.submit_batch(&request).await.unwrap_err();
        assert!(err.is_request_failure());
    }
}
