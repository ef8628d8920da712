//! Search gateway: forwards tenant-scoped queries to the external search
//! engine. Each tenant maps to its own index, so a query can never see
//! another tenant's documents regardless of its content.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;
use tracing::{debug, error};

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    20
}

/// A crawled page as stored in the search index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub id: String,
    pub url: String,
    pub title: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub document: IndexedDocument,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total: u64,
    pub processing_ms: u64,
}

#[derive(Deserialize)]
struct EngineResponse {
    hits: Vec<IndexedDocument>,
    #[serde(rename = "estimatedTotalHits", default)]
    estimated_total_hits: u64,
    #[serde(rename = "processingTimeMs", default)]
    processing_time_ms: u64,
}

/// Client for the search engine's HTTP API.
pub struct SearchClient {
    host: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl SearchClient {
    pub fn new(host: &str, api_key: Option<String>) -> Self {
        Self {
            host: host.trim_end_matches('/').to_string(),
            api_key,
            http: reqwest::Client::new(),
        }
    }

    /// Index uid for a tenant's pages.
    fn index_uid(tenant_id: &str) -> String {
        format!("pages_{}", tenant_id.replace(['-', '.'], "_"))
    }

    /// Run a query against the tenant's index.
    pub async fn search(
        &self,
        tenant_id: &str,
        request: &SearchRequest,
    ) -> AppResult<SearchResponse> {
        let uid = Self::index_uid(tenant_id);
        let url = format!("{}/indexes/{}/search", self.host, uid);

        let mut req = self.http.post(&url).json(&json!({
            "q": request.query,
            "limit": request.limit,
            "offset": request.offset,
        }));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let t0 = Instant::now();
        let resp = req.send().await?;
        let status = resp.status();

        // a tenant with no crawled pages has no index yet
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(SearchResponse {
                results: Vec::new(),
                total: 0,
                processing_ms: 0,
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            error!(target: "search", %tenant_id, %status, "search engine error");
            return Err(AppError::internal(format!(
                "search engine returned {status}: {body}"
            )));
        }

        let engine: EngineResponse = resp.json().await?;
        debug!(
            target: "search",
            %tenant_id,
            hits = engine.hits.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "query served"
        );
        Ok(SearchResponse {
            results: engine
                .hits
                .into_iter()
                .map(|document| SearchResult {
                    document,
                    score: None,
                })
                .collect(),
            total: engine.estimated_total_hits,
            processing_ms: engine.processing_time_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_uid_is_tenant_scoped() {
        assert_eq!(SearchClient::index_uid("lalasearch"), "pages_lalasearch");
        assert_ne!(
            SearchClient::index_uid("tenant1"),
            SearchClient::index_uid("tenant2")
        );
    }

    #[test]
    fn index_uid_sanitizes_separators() {
        assert_eq!(SearchClient::index_uid("acme-corp.io"), "pages_acme_corp_io");
    }

    #[test]
    fn request_defaults() {
        let req: SearchRequest = serde_json::from_str(r#"{"query":"rust"}"#).unwrap();
        assert_eq!(req.limit, 20);
        assert_eq!(req.offset, 0);
    }

    #[test]
    fn result_serializes_with_nested_document() {
        let result = SearchResult {
            document: IndexedDocument {
                id: "1".into(),
                url: "https://example.com/".into(),
                title: Some("Example".into()),
                snippet: None,
                domain: None,
            },
            score: None,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["document"]["url"], "https://example.com/");
        assert!(value.get("url").is_none());
    }

    #[test]
    fn engine_response_parses_meilisearch_shape() {
        let raw = r#"{
            "hits": [{"id": "1", "url": "https://example.com/", "title": "Example"}],
            "estimatedTotalHits": 42,
            "processingTimeMs": 3
        }"#;
        let parsed: EngineResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.hits.len(), 1);
        assert_eq!(parsed.estimated_total_hits, 42);
        assert_eq!(parsed.processing_time_ms, 3);
    }
}
