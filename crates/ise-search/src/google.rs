//! Google Custom Search JSON API client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use ise_core::{ConfigError, IseError, Result, SearchBackend, SearchConfig, SearchHit};

/// Custom Search client
pub struct GoogleSearchClient {
    client: Client,
    api_key: String,
    engine_id: String,
    base_url: String,
    results_per_query: u32,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    display_link: String,
    /// Complete URL, not the formatted one
    link: String,
    #[serde(default)]
    snippet: String,
}

impl GoogleSearchClient {
    /// Create from config
    pub fn from_config(config: &SearchConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ConfigError::MissingRequired("search API key (GSEARCH_JSON_API)".to_string()))?;
        let engine_id = config
            .engine_id
            .clone()
            .ok_or_else(|| ConfigError::MissingRequired("search engine ID (GSEARCH_ENGINE)".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IseError::Other(anyhow::anyhow!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            engine_id,
            base_url: config.base_url.clone(),
            results_per_query: config.results_per_query,
        })
    }

    /// Parse a response body into ranked hits
    pub fn parse_response(body: &str) -> Result<Vec<SearchHit>> {
        let response: SearchResponse = serde_json::from_str(body)
            .map_err(|e| IseError::Search(format!("Malformed search response: {e}")))?;

        Ok(response
            .items
            .into_iter()
            .filter(|item| !item.link.trim().is_empty())
            .map(|item| SearchHit {
                title: item.title,
                display_url: item.display_link,
                url: item.link,
                snippet: item.snippet,
            })
            .collect())
    }
}

#[async_trait]
impl SearchBackend for GoogleSearchClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let num = self.results_per_query.to_string();
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.engine_id.as_str()),
                ("q", query),
                ("num", num.as_str()),
            ])
            .send()
            .await
            .map_err(|e| IseError::Search(format!("Search request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(IseError::Search(format!(
                "Search API error {status}: {error_text}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| IseError::Search(format!("Failed to read search response: {e}")))?;

        let hits = Self::parse_response(&body)?;
        tracing::debug!("Search returned {} hits for {:?}", hits.len(), query);
        Ok(hits)
    }

    fn name(&self) -> &str {
        "google"
    }
}
