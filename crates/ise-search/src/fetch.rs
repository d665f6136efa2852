//! Page text via an Apache Tika server
//!
//! The page is downloaded directly and its bytes handed to Tika's `/tika`
//! endpoint for plain-text extraction. Any failure yields empty text so a
//! single bad URL never stops a run.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use ise_core::{FetchConfig, IseError, Result, TextFetcher};

/// Keep non-blank lines, ASCII characters only
pub fn clean_page_text(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.chars().filter(char::is_ascii).collect::<String>())
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fetches pages and extracts their text through Tika
pub struct TikaTextFetcher {
    client: Client,
    tika_url: String,
}

impl TikaTextFetcher {
    /// Create a new fetcher
    pub fn new(tika_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            tika_url: tika_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create from config
    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| IseError::Other(anyhow::anyhow!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            tika_url: config.tika_url.trim_end_matches('/').to_string(),
        })
    }

    async fn try_fetch(&self, url: &str) -> anyhow::Result<String> {
        let page = self.client.get(url).send().await?.error_for_status()?;
        let bytes = page.bytes().await?;

        let text = self
            .client
            .put(format!("{}/tika", self.tika_url))
            .header("Accept", "text/plain")
            .body(bytes)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(clean_page_text(&text))
    }
}

#[async_trait]
impl TextFetcher for TikaTextFetcher {
    async fn fetch_text(&self, url: &str) -> String {
        if url.trim().is_empty() {
            return String::new();
        }
        match self.try_fetch(url).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Failed to fetch {}: {}", url, e);
                String::new()
            }
        }
    }
}
