use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;

/// Minimal HTTP client for the Elasticsearch / OpenSearch REST API.
///
/// Only the calls the hook needs are implemented: index existence check,
/// index creation, single-document indexing and `_bulk`.
#[derive(Clone, Debug)]
pub struct ElasticClient {
    client: Client,
    /// Base URL of the cluster, e.g. "http://localhost:9200".
    base_url: String,
}

/// Error type returned by [`ElasticClient`] calls.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("error: [{status}] {kind}: {reason}")]
    Api { status: u16, kind: String, reason: String },

    #[error("failure to parse response body (status {status}): {message}")]
    Decode { status: u16, message: String },

    #[error("bulk request completed with {failed} failed item(s)")]
    BulkItems { failed: usize },
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorCause,
}

#[derive(Deserialize)]
struct ErrorCause {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Deserialize)]
struct BulkItem {
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl ElasticClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Use a preconfigured `reqwest` client (timeouts, TLS, default headers).
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        ElasticClient {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, index: &str, endpoint: Option<&str>) -> String {
        let index = urlencoding::encode(index);
        match endpoint {
            Some(endpoint) => format!("{}/{}/{}", self.base_url, index, endpoint),
            None => format!("{}/{}", self.base_url, index),
        }
    }

    /// `HEAD /{index}`: `Ok(false)` on 404.
    pub async fn index_exists(&self, index: &str) -> Result<bool, ClientError> {
        let resp = self.client.head(self.url(index, None)).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(api_error(resp).await),
        }
    }

    /// `PUT /{index}` with default settings.
    pub async fn create_index(&self, index: &str) -> Result<(), ClientError> {
        let resp = self.client.put(self.url(index, None)).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(api_error(resp).await)
        }
    }

    /// Index a single JSON document via `POST /{index}/_doc`.
    pub async fn index_document(&self, index: &str, body: Vec<u8>) -> Result<(), ClientError> {
        let resp = self
            .client
            .post(self.url(index, Some("_doc")))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(api_error(resp).await)
        }
    }

    /// Send an NDJSON body to `POST /{index}/_bulk`.
    ///
    /// A successful response may still report per-item failures; those are
    /// surfaced as [`ClientError::BulkItems`].
    pub async fn bulk(&self, index: &str, body: Vec<u8>) -> Result<(), ClientError> {
        let resp = self
            .client
            .post(self.url(index, Some("_bulk")))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }

        let status = resp.status().as_u16();
        let bytes = resp.bytes().await?;
        let parsed: BulkResponse = serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode {
            status,
            message: e.to_string(),
        })?;
        if !parsed.errors {
            return Ok(());
        }
        let failed = parsed
            .items
            .iter()
            .filter(|item| item.values().any(|result| result.error.is_some()))
            .count();
        Err(ClientError::BulkItems { failed })
    }
}

async fn api_error(resp: Response) -> ClientError {
    let status = resp.status().as_u16();
    let bytes = match resp.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => return ClientError::Transport(e),
    };
    match serde_json::from_slice::<ErrorBody>(&bytes) {
        Ok(ErrorBody { error }) => ClientError::Api {
            status,
            kind: error.kind,
            reason: error.reason.unwrap_or_default(),
        },
        Err(e) => ClientError::Decode {
            status,
            message: e.to_string(),
        },
    }
}
