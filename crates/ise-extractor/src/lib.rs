//! ISE Extractor - Relation extraction pipeline
//!
//! Turns the plain text of a web page into relation tuples in two stages:
//! a cheap named-entity screen that keeps only sentences worth parsing,
//! then full annotation where each relation mention is kept only if the
//! target relation dominates its scores.

pub mod corenlp;
pub mod pipeline;
pub mod scoring;
pub mod screening;

pub use corenlp::CoreNlpClient;
pub use pipeline::{PipelineConfig, RelationPipeline};
pub use scoring::{dominant_score, score_mentions, ScoredMention};
pub use screening::{candidate_lines, clean_sentence, SentenceScreen};
