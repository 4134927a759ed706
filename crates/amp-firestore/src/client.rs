//! Thin client over the Firestore REST surface the ledger needs: point reads,
//! creates, masked updates, deletes, structured queries and atomic commits.
//!
//! Requests carry a cached service-account token that is refreshed once when
//! Firestore reports it expired. With `FIRESTORE_EMULATOR_HOST` set the client
//! talks plain HTTP to the emulator instead.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info_span, Instrument};

use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_request;
use crate::retry::RetryConfig;
use crate::token_cache::TokenCache;
use crate::types::{
    CommitRequest, CommitResponse, Document, RunQueryRequest, RunQueryResponse,
    StructuredQuery, Value, Write,
};

/// Bearer token accepted by the Firestore emulator.
const EMULATOR_TOKEN: &str = "owner";

/// Firestore rejects commits with more writes than this.
const MAX_COMMIT_WRITES: usize = 500;

/// Firestore client configuration.
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    /// GCP project ID
    pub project_id: String,
    /// Database ID (usually "(default)")
    pub database_id: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
    /// `host:port` of a local emulator; disables service-account auth.
    pub emulator_host: Option<String>,
}

impl FirestoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> FirestoreResult<Self> {
        let project_id = std::env::var("GCP_PROJECT_ID")
            .or_else(|_| std::env::var("FIREBASE_PROJECT_ID"))
            .map_err(|_| {
                FirestoreError::auth_error(
                    "GCP_PROJECT_ID or FIREBASE_PROJECT_ID must be set to access Firestore",
                )
            })?;

        if project_id.is_empty() {
            return Err(FirestoreError::auth_error(
                "GCP_PROJECT_ID or FIREBASE_PROJECT_ID cannot be empty",
            ));
        }

        let secs = |key: &str, default: u64| {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        };

        Ok(Self {
            project_id,
            database_id: std::env::var("FIRESTORE_DATABASE_ID")
                .unwrap_or_else(|_| "(default)".to_string()),
            timeout: Duration::from_secs(secs("FIRESTORE_TIMEOUT_SECS", 30)),
            connect_timeout: Duration::from_secs(secs("FIRESTORE_CONNECT_TIMEOUT_SECS", 5)),
            retry: RetryConfig::from_env(),
            emulator_host: std::env::var("FIRESTORE_EMULATOR_HOST")
                .ok()
                .filter(|h| !h.is_empty()),
        })
    }

    fn documents_path(&self) -> String {
        format!(
            "v1/projects/{}/databases/{}/documents",
            self.project_id, self.database_id
        )
    }
}

/// Firestore REST API client.
#[derive(Clone)]
pub struct FirestoreClient {
    http: Client,
    config: FirestoreConfig,
    base_url: String,
    /// `None` when talking to an emulator or a test server.
    token_cache: Option<Arc<TokenCache>>,
}

impl FirestoreClient {
    /// Create a new Firestore client.
    pub async fn new(config: FirestoreConfig) -> FirestoreResult<Self> {
        if let Some(host) = config.emulator_host.clone() {
            debug!(host = %host, "Using Firestore emulator");
            return Self::with_base_url(config, format!("http://{}", host));
        }

        let http = Self::http_client(&config)?;
        let base_url = format!("https://firestore.googleapis.com/{}", config.documents_path());
        let auth = Self::create_auth_provider()?;

        Ok(Self {
            http,
            config,
            base_url,
            token_cache: Some(Arc::new(TokenCache::new(auth))),
        })
    }

    /// Create an unauthenticated client rooted at `root_url`.
    pub fn with_base_url(
        config: FirestoreConfig,
        root_url: impl Into<String>,
    ) -> FirestoreResult<Self> {
        let http = Self::http_client(&config)?;
        let base_url = format!(
            "{}/{}",
            root_url.into().trim_end_matches('/'),
            config.documents_path()
        );
        Ok(Self {
            http,
            config,
            base_url,
            token_cache: None,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> FirestoreResult<Self> {
        let config = FirestoreConfig::from_env()?;
        Self::new(config).await
    }

    fn http_client(config: &FirestoreConfig) -> FirestoreResult<Client> {
        Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("amp-firestore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FirestoreError::Network)
    }

    fn create_auth_provider() -> FirestoreResult<Arc<dyn TokenProvider>> {
        let service_account = CustomServiceAccount::from_env().map_err(|e| {
            FirestoreError::auth_error(format!("Failed to load service account: {}", e))
        })?;

        match service_account {
            Some(sa) => Ok(Arc::new(sa)),
            None => Err(FirestoreError::auth_error(
                "GOOGLE_APPLICATION_CREDENTIALS not set. \
                 Set it to the path of your service account JSON file.",
            )),
        }
    }

    pub fn config(&self) -> &FirestoreConfig {
        &self.config
    }

    async fn get_token(&self) -> FirestoreResult<String> {
        match &self.token_cache {
            Some(cache) => cache.get_token().await,
            None => Ok(EMULATOR_TOKEN.to_string()),
        }
    }

    fn is_access_token_expired(body: &str) -> bool {
        body.contains("ACCESS_TOKEN_EXPIRED") || body.contains("\"UNAUTHENTICATED\"")
    }

    /// Send an authorized request, refreshing the token once on expiry.
    async fn send<B>(&self, url: &str, build: B) -> FirestoreResult<Response>
    where
        B: Fn(&str) -> RequestBuilder,
    {
        let token = self.get_token().await?;
        let response = build(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        match &self.token_cache {
            Some(cache) if Self::is_access_token_expired(&body) => {
                cache.invalidate().await;
                let token = self.get_token().await?;
                Ok(build(&token).send().await?)
            }
            _ => Err(FirestoreError::from_http_status(
                401,
                format!("{} failed: {}", url, body),
            )),
        }
    }

    fn document_url(&self, collection: &str, doc_id: &str) -> String {
        format!("{}/{}/{}", self.base_url, collection, doc_id)
    }

    /// Resource name used inside commit writes and query filters.
    pub fn full_document_name(&self, collection: &str, doc_id: &str) -> String {
        format!("{}/{}/{}", self.config.documents_path(), collection, doc_id)
            .trim_start_matches("v1/")
            .to_string()
    }

    /// Fetch one document; `None` when it does not exist.
    pub async fn get_document(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> FirestoreResult<Option<Document>> {
        let url = self.document_url(collection, doc_id);
        let call = async {
            let response = self
                .send(&url, |token| self.http.get(&url).bearer_auth(token))
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            Self::json_body(&url, response).await.map(Some)
        };
        self.observed("get_document", collection, Some(doc_id), call)
            .await
    }

    /// Create a document under a caller-chosen id. An existing id is `AlreadyExists`.
    pub async fn create_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
    ) -> FirestoreResult<Document> {
        let url = format!(
            "{}/{}?documentId={}",
            self.base_url,
            collection,
            urlencoding::encode(doc_id)
        );
        let body = Document::new(fields);
        let call = async {
            let response = self
                .send(&url, |token| self.http.post(&url).bearer_auth(token).json(&body))
                .await?;
            if response.status() == StatusCode::CONFLICT {
                return Err(FirestoreError::AlreadyExists(format!("{collection}/{doc_id}")));
            }
            Self::json_body(&url, response).await
        };
        self.observed("create_document", collection, Some(doc_id), call)
            .await
    }

    /// Write `fields` to a document, creating it when missing. With a mask only
    /// the listed fields are replaced.
    pub async fn update_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
        update_mask: Option<Vec<String>>,
    ) -> FirestoreResult<Document> {
        let mut url = self.document_url(collection, doc_id);
        if let Some(mask) = update_mask.filter(|m| !m.is_empty()) {
            let query: Vec<String> = mask
                .iter()
                .map(|field| format!("updateMask.fieldPaths={}", urlencoding::encode(field)))
                .collect();
            url = format!("{url}?{}", query.join("&"));
        }
        let body = Document::new(fields);
        let call = async {
            let response = self
                .send(&url, |token| self.http.patch(&url).bearer_auth(token).json(&body))
                .await?;
            Self::json_body(&url, response).await
        };
        self.observed("update_document", collection, Some(doc_id), call)
            .await
    }

    /// Remove one document. A document that is already gone counts as removed.
    pub async fn delete_document(&self, collection: &str, doc_id: &str) -> FirestoreResult<()> {
        let url = self.document_url(collection, doc_id);
        let call = async {
            let response = self
                .send(&url, |token| self.http.delete(&url).bearer_auth(token))
                .await?;
            match response.status() {
                status if status.is_success() => Ok(()),
                StatusCode::NOT_FOUND => {
                    debug!(collection, doc_id, "Delete target already absent");
                    Ok(())
                }
                _ => Err(Self::status_error(&url, response).await),
            }
        };
        self.observed("delete_document", collection, Some(doc_id), call)
            .await
    }

    /// Run a structured query and return the matched documents in order.
    pub async fn run_query(&self, query: StructuredQuery) -> FirestoreResult<Vec<Document>> {
        let url = format!("{}:runQuery", self.base_url);
        let collection = query
            .from
            .first()
            .map(|c| c.collection_id.clone())
            .unwrap_or_default();
        let request = RunQueryRequest {
            structured_query: query,
        };

        let call = async {
            let response = self.post_json(&url, &request).await?;
            // Rows without a document only report the read time.
            let rows: Vec<RunQueryResponse> = Self::json_body(&url, response).await?;
            Ok(rows.into_iter().filter_map(|row| row.document).collect())
        };
        self.observed("run_query", &collection, None, call).await
    }

    /// Apply writes atomically. Either every write lands or none does.
    pub async fn commit(&self, writes: Vec<Write>) -> FirestoreResult<CommitResponse> {
        match writes.len() {
            0 => {
                return Ok(CommitResponse {
                    write_results: Some(Vec::new()),
                    commit_time: None,
                })
            }
            n if n > MAX_COMMIT_WRITES => {
                return Err(FirestoreError::request_failed(format!(
                    "{n} writes in one commit; the limit is {MAX_COMMIT_WRITES}"
                )))
            }
            _ => {}
        }

        let url = format!("{}:commit", self.base_url);
        let request = CommitRequest { writes };
        let call = async {
            let response = self.post_json(&url, &request).await?;
            Self::json_body(&url, response).await
        };
        self.observed("commit", "commit", None, call).await
    }

    /// Repeat `op` on transient failures per the configured retry policy.
    pub async fn with_retry<T, F, Fut>(&self, operation: &str, op: F) -> FirestoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = FirestoreResult<T>>,
    {
        crate::retry::with_retry(&self.config.retry, operation, op).await
    }

    async fn post_json<T: Serialize>(&self, url: &str, body: &T) -> FirestoreResult<Response> {
        self.send(url, |token| self.http.post(url).bearer_auth(token).json(body))
            .await
    }

    /// Decode a 2xx body, or turn any other status into an error.
    async fn json_body<T: DeserializeOwned>(url: &str, response: Response) -> FirestoreResult<T> {
        if !response.status().is_success() {
            return Err(Self::status_error(url, response).await);
        }
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            let prefix: String = text.chars().take(200).collect();
            FirestoreError::InvalidResponse(format!("{url}: {e} (body starts: {prefix})"))
        })
    }

    async fn status_error(url: &str, response: Response) -> FirestoreError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        FirestoreError::from_http_status(status, format!("{url} returned {status}: {body}"))
    }

    /// Run `call` inside a span and record its latency and outcome.
    async fn observed<T>(
        &self,
        operation: &str,
        collection: &str,
        doc_id: Option<&str>,
        call: impl Future<Output = FirestoreResult<T>>,
    ) -> FirestoreResult<T> {
        let span = info_span!(
            "firestore",
            operation,
            collection,
            doc_id = doc_id.unwrap_or_default()
        );

        let started = Instant::now();
        let result = call.instrument(span).await;
        let status = result
            .as_ref()
            .map_or_else(|e| e.http_status().unwrap_or(500), |_| 200);
        record_request(operation, status, started.elapsed().as_millis() as f64);

        result
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod client_tests;
