//! ISE Configuration Management
//!
//! Handles configuration from environment variables, config files,
//! and command-line arguments with sensible defaults for development.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::Relation;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Expansion loop configuration
    pub expansion: ExpansionConfig,

    /// Web search configuration
    pub search: SearchConfig,

    /// Page fetch and text extraction
    pub fetch: FetchConfig,

    /// Annotation server configuration
    pub nlp: NlpConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env()?;
        Ok(self)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Search credentials
        if let Ok(key) = std::env::var("GSEARCH_JSON_API") {
            self.search.api_key = Some(key);
        }
        if let Ok(engine) = std::env::var("GSEARCH_ENGINE") {
            self.search.engine_id = Some(engine);
        }
        if let Ok(url) = std::env::var("GSEARCH_URL") {
            self.search.base_url = url;
        }

        // Collaborator services
        if let Ok(url) = std::env::var("TIKA_URL") {
            self.fetch.tika_url = url;
        }
        if let Ok(url) = std::env::var("CORENLP_URL") {
            self.nlp.corenlp_url = url;
        }

        // Expansion bounds
        if let Ok(value) = std::env::var("ISE_MAX_ITERATIONS") {
            self.expansion.max_iterations = parse_env("ISE_MAX_ITERATIONS", value)?;
        }
        if let Ok(value) = std::env::var("ISE_CONCURRENCY") {
            self.expansion.concurrency = parse_env("ISE_CONCURRENCY", value)?;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(value) = std::env::var("LOG_JSON") {
            self.logging.json_format = parse_env("LOG_JSON", value)?;
        }

        Ok(())
    }

    /// Check every bound the expansion loop relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.expansion.validate()?;
        if self.search.results_per_query == 0 || self.search.results_per_query > 10 {
            return Err(ConfigError::InvalidValue {
                key: "search.results_per_query".to_string(),
                value: self.search.results_per_query.to_string(),
            });
        }
        if self.nlp.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "nlp.chunk_size".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

/// Tie handling when a mention's target score equals another relation's score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DominancePolicy {
    /// Target score must be strictly greater than every other score
    #[default]
    Strict,
    /// Target score must be at least every other score
    AllowTies,
}

/// Expansion loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    /// Target relation
    pub relation: Relation,

    /// Minimal confidence for a tuple to be reported, in (0, 1]
    pub threshold: f64,

    /// Stop once this many tuples clear the threshold
    pub target_tuples: usize,

    /// Hard bound on iterations
    pub max_iterations: u32,

    /// Sentences with this many tokens or more are skipped
    pub sentence_token_limit: usize,

    /// Per-document extraction timeout in seconds
    pub document_timeout_secs: u64,

    /// Documents extracted concurrently within one iteration
    pub concurrency: usize,

    /// Tie handling in relation scoring
    pub dominance: DominancePolicy,

    /// Write a checkpoint here after every iteration
    pub checkpoint_path: Option<PathBuf>,
}

impl ExpansionConfig {
    pub fn document_timeout(&self) -> Duration {
        Duration::from_secs(self.document_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(ConfigError::InvalidValue {
                key: "threshold".to_string(),
                value: self.threshold.to_string(),
            });
        }
        let positive = [
            ("target_tuples", self.target_tuples),
            ("max_iterations", self.max_iterations as usize),
            ("sentence_token_limit", self.sentence_token_limit),
            ("document_timeout_secs", self.document_timeout_secs as usize),
            ("concurrency", self.concurrency),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: "0".to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            relation: Relation::WorkFor,
            threshold: 0.35,
            target_tuples: 10,
            max_iterations: 10,
            sentence_token_limit: 50,
            document_timeout_secs: 60,
            concurrency: 4,
            dominance: DominancePolicy::Strict,
            checkpoint_path: None,
        }
    }
}

/// Web search configuration (Google Custom Search JSON API)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// API key
    pub api_key: Option<String>,

    /// Search engine ID (`cx`)
    pub engine_id: Option<String>,

    /// API endpoint
    pub base_url: String,

    /// Results requested per query (the API caps this at 10)
    pub results_per_query: u32,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            engine_id: None,
            base_url: "https://www.googleapis.com/customsearch/v1".to_string(),
            results_per_query: 10,
            timeout_secs: 30,
        }
    }
}

/// Page fetch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Apache Tika server used to turn pages into plain text
    pub tika_url: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// User agent for page requests
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            tika_url: "http://localhost:9998".to_string(),
            timeout_secs: 20,
            user_agent: concat!("ise/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Annotation server configuration (Stanford CoreNLP server)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NlpConfig {
    /// CoreNLP server URL
    pub corenlp_url: String,

    /// Parser model used by the full profile
    pub parse_model: String,

    /// Lines sent per annotation request
    pub chunk_size: usize,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for NlpConfig {
    fn default() -> Self {
        Self {
            corenlp_url: "http://localhost:9000".to_string(),
            parse_model: "edu/stanford/nlp/models/lexparser/englishPCFG.ser.gz".to_string(),
            chunk_size: 500,
            timeout_secs: 120,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
