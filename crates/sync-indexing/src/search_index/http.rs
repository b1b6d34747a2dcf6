//! HTTP client for an Algolia-compatible index API.

use std::time::Duration;

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::json;
use sync_types::{EntityId, IndexDocument, SearchIndexSettings};
use tracing::{debug, error, warn};

use super::{SearchIndex, SearchIndexError};

#[derive(Serialize)]
struct BatchRequest {
    requests: Vec<BatchOperation>,
}

#[derive(Serialize)]
struct BatchOperation {
    action: &'static str,
    body: serde_json::Value,
}

/// Index client posting batch operations to `/1/indexes/{index}/batch`.
pub struct HttpSearchIndex {
    client: Client,
    base_url: String,
    index_name: String,
    application_id: String,
    api_key: SecretString,
    max_retries: u32,
}

impl HttpSearchIndex {
    pub fn new(settings: &SearchIndexSettings) -> Result<Self, SearchIndexError> {
        if settings.index_name.is_empty() {
            return Err(SearchIndexError::Config("index_name is empty".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| SearchIndexError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            index_name: settings.index_name.clone(),
            application_id: settings.application_id.clone(),
            api_key: settings.api_key.clone(),
            max_retries: settings.max_retries.max(1),
        })
    }

    fn url(&self, operation: &str) -> String {
        format!("{}/1/indexes/{}/{}", self.base_url, self.index_name, operation)
    }

    /// Post with retries. Client errors other than 429 are not retried.
    async fn post_with_retry(
        &self,
        operation: &str,
        body: &serde_json::Value,
    ) -> Result<(), SearchIndexError> {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(200),
            max_elapsed_time: Some(Duration::from_secs(60)),
            ..Default::default()
        };

        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!(attempt = attempts, operation, "Calling search index");

            match self.post(operation, body).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if !is_retryable(&e) || attempts >= self.max_retries {
                        error!(error = %e, attempts, operation, "Search index call failed");
                        return Err(e);
                    }

                    match backoff.next_backoff() {
                        Some(duration) => {
                            warn!(
                                error = %e,
                                retry_in_ms = duration.as_millis(),
                                "Search index call failed, retrying"
                            );
                            tokio::time::sleep(duration).await;
                        }
                        None => {
                            error!(error = %e, "Backoff exhausted");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    async fn post(&self, operation: &str, body: &serde_json::Value) -> Result<(), SearchIndexError> {
        let response = self
            .client
            .post(self.url(operation))
            .header("X-Algolia-Application-Id", &self.application_id)
            .header("X-Algolia-API-Key", self.api_key.expose_secret())
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchIndexError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

fn is_retryable(error: &SearchIndexError) -> bool {
    match error {
        SearchIndexError::Http(_) => true,
        SearchIndexError::Rejected { status, .. } => *status == 429 || *status >= 500,
        SearchIndexError::Config(_) => false,
    }
}

fn batch_body(requests: Vec<BatchOperation>) -> Result<serde_json::Value, SearchIndexError> {
    serde_json::to_value(BatchRequest { requests })
        .map_err(|e| SearchIndexError::Config(format!("unserializable batch: {}", e)))
}

#[async_trait]
impl SearchIndex for HttpSearchIndex {
    async fn add_objects(&self, documents: &[IndexDocument]) -> Result<(), SearchIndexError> {
        if documents.is_empty() {
            return Ok(());
        }
        let requests = documents
            .iter()
            .map(|doc| {
                serde_json::to_value(doc).map(|body| BatchOperation {
                    action: "updateObject",
                    body,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SearchIndexError::Config(format!("unserializable document: {}", e)))?;
        self.post_with_retry("batch", &batch_body(requests)?).await
    }

    async fn delete_objects(&self, ids: &[EntityId]) -> Result<(), SearchIndexError> {
        if ids.is_empty() {
            return Ok(());
        }
        let requests = ids
            .iter()
            .map(|id| BatchOperation {
                action: "deleteObject",
                body: json!({ "objectID": id }),
            })
            .collect();
        self.post_with_retry("batch", &batch_body(requests)?).await
    }

    async fn clear_index(&self) -> Result<(), SearchIndexError> {
        self.post_with_retry("clear", &json!({})).await
    }
}
