//! ISE Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout the ISE system:
//! - Relation tuples and the merge/rank store (`TupleSet`)
//! - The closed set of supported relations and their entity screens
//! - Annotation and search data models
//! - Collaborator traits (search, page text, annotation, extraction)
//! - Common error types
//! - Configuration management

pub mod config;
pub mod tuple;

pub use config::{
    AppConfig, ConfigError, DominancePolicy, ExpansionConfig, FetchConfig, LoggingConfig,
    NlpConfig, SearchConfig,
};
pub use tuple::{MergeOutcome, RelationTuple, TupleKey, TupleSet};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for ISE operations
#[derive(Error, Debug)]
pub enum IseError {
    #[error("Invalid tuple: {0}")]
    InvalidTuple(String),

    #[error("Unsupported relation: {0}")]
    UnsupportedRelation(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, IseError>;

/// Terms of one search query, in issue order
pub type QueryTerms = Vec<String>;

// ============================================================================
// Relations
// ============================================================================

/// Named-entity label for people
pub const PERSON: &str = "PERSON";
/// Named-entity label for organizations
pub const ORGANIZATION: &str = "ORGANIZATION";
/// Named-entity label for locations
pub const LOCATION: &str = "LOCATION";

/// Relations the expansion loop can target
///
/// The set is closed: supporting a new relation means adding a variant and
/// its entity screen in [`Relation::admits`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Relation {
    #[serde(rename = "Live_In")]
    LiveIn,
    #[serde(rename = "Located_In")]
    LocatedIn,
    #[serde(rename = "OrgBased_In")]
    OrgBasedIn,
    #[serde(rename = "Work_For")]
    WorkFor,
}

impl Relation {
    /// All supported relations, in menu order
    pub const ALL: [Relation; 4] = [
        Relation::LiveIn,
        Relation::LocatedIn,
        Relation::OrgBasedIn,
        Relation::WorkFor,
    ];

    /// Label used by the relation annotator
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LiveIn => "Live_In",
            Self::LocatedIn => "Located_In",
            Self::OrgBasedIn => "OrgBased_In",
            Self::WorkFor => "Work_For",
        }
    }

    /// Menu number (1-based) shown by the CLI
    pub fn number(&self) -> u8 {
        match self {
            Self::LiveIn => 1,
            Self::LocatedIn => 2,
            Self::OrgBasedIn => 3,
            Self::WorkFor => 4,
        }
    }

    /// Look up a relation by its menu number
    pub fn from_number(n: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.number() == n)
    }

    /// Entity screen: does a sentence with these entity counts deserve a full parse?
    pub fn admits(&self, counts: &EntityCounts) -> bool {
        match self {
            Self::LiveIn => counts.get(PERSON) > 0 && counts.get(LOCATION) > 0,
            Self::LocatedIn => counts.get(LOCATION) > 1,
            Self::OrgBasedIn => counts.get(LOCATION) > 0 && counts.get(ORGANIZATION) > 0,
            Self::WorkFor => counts.get(PERSON) > 0 && counts.get(ORGANIZATION) > 0,
        }
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Relation {
    type Err = IseError;

    /// Accepts the annotator label (case-insensitive) or the menu number
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u8>() {
            return Self::from_number(n).ok_or_else(|| IseError::UnsupportedRelation(s.to_string()));
        }
        Self::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| IseError::UnsupportedRelation(s.to_string()))
    }
}

/// Named-entity label counts for one sentence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityCounts(HashMap<String, usize>);

impl EntityCounts {
    /// Count the NER labels of a token sequence
    pub fn from_tokens(tokens: &[Token]) -> Self {
        let mut counts = HashMap::new();
        for token in tokens {
            *counts.entry(token.ner.clone()).or_insert(0) += 1;
        }
        Self(counts)
    }

    /// Count for a label, zero when absent
    pub fn get(&self, label: &str) -> usize {
        self.0.get(label).copied().unwrap_or(0)
    }
}

// ============================================================================
// Annotation Models
// ============================================================================

/// Capability profile requested from the annotator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationProfile {
    /// Tokenization and named entities only
    Light,
    /// Adds constituency parse and relation scoring
    Full,
}

impl AnnotationProfile {
    /// Annotator chain for this profile
    pub fn annotators(&self) -> &'static str {
        match self {
            Self::Light => "tokenize,ssplit,pos,lemma,ner",
            Self::Full => "tokenize,ssplit,pos,lemma,ner,parse,relation",
        }
    }
}

/// A single token with its named-entity label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub word: String,
    /// NER label, "O" for none
    pub ner: String,
}

impl Token {
    pub fn new(word: impl Into<String>, ner: impl Into<String>) -> Self {
        Self {
            word: word.into(),
            ner: ner.into(),
        }
    }
}

/// Entity attached to a relation mention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionEntity {
    pub value: String,
    #[serde(rename = "type")]
    pub entity_type: String,
}

/// Candidate relation between entities of one sentence, with a score per relation type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationMention {
    #[serde(default)]
    pub entities: Vec<MentionEntity>,
    #[serde(default, alias = "probabilities")]
    pub scores: HashMap<String, f64>,
}

/// One annotated sentence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedSentence {
    pub tokens: Vec<Token>,
    #[serde(default)]
    pub relations: Vec<RelationMention>,
}

impl AnnotatedSentence {
    /// Sentence text rebuilt from its tokens
    pub fn text(&self) -> String {
        self.tokens
            .iter()
            .map(|t| t.word.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ============================================================================
// Search Models
// ============================================================================

/// One ranked search result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub display_url: String,
    pub url: String,
    pub snippet: String,
}

impl SearchHit {
    /// Key under which the document is recorded as processed
    ///
    /// Fragments are dropped so `page#a` and `page#b` count as one document.
    pub fn canonical_url(&self) -> String {
        let raw = self.url.trim();
        match url::Url::parse(raw) {
            Ok(mut parsed) => {
                parsed.set_fragment(None);
                parsed.to_string()
            }
            Err(_) => raw.to_string(),
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Web search collaborator
#[async_trait::async_trait]
pub trait SearchBackend: Send + Sync {
    /// Ranked hits for a query; quota or network failures are `IseError::Search`
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>>;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Page fetch and plain-text extraction collaborator
#[async_trait::async_trait]
pub trait TextFetcher: Send + Sync {
    /// Plain text of the page, empty on any failure
    async fn fetch_text(&self, url: &str) -> String;
}

/// Linguistic annotation collaborator
#[async_trait::async_trait]
pub trait Annotator: Send + Sync {
    /// Annotate lines of text; failures are `IseError::Extraction`
    async fn annotate(
        &self,
        lines: &[String],
        profile: AnnotationProfile,
    ) -> Result<Vec<AnnotatedSentence>>;
}

/// Turns a document's text into tuples of one relation
#[async_trait::async_trait]
pub trait TupleExtractor: Send + Sync {
    async fn extract(&self, text: &str, relation: Relation) -> Result<Vec<RelationTuple>>;
}

// ============================================================================
// Tests
// ============================================================================
