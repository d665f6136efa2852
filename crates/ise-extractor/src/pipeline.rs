//! Extraction pipeline adapter
//!
//! Runs both stages against an injected annotator and folds the result
//! into one tuple per relation instance for the document.

use std::sync::Arc;

use async_trait::async_trait;
use ise_core::{
    AnnotatedSentence, AnnotationProfile, Annotator, DominancePolicy, ExpansionConfig, NlpConfig,
    Relation, RelationTuple, Result, TupleExtractor, TupleSet,
};

use crate::scoring::score_mentions;
use crate::screening::{candidate_lines, SentenceScreen};

/// Pipeline tuning
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Sentences with this many tokens or more skip the full parse
    pub sentence_token_limit: usize,
    /// Lines per annotation request
    pub chunk_size: usize,
    /// Tie handling in relation scoring
    pub dominance: DominancePolicy,
}

impl PipelineConfig {
    pub fn from_config(expansion: &ExpansionConfig, nlp: &NlpConfig) -> Self {
        Self {
            sentence_token_limit: expansion.sentence_token_limit,
            chunk_size: nlp.chunk_size,
            dominance: expansion.dominance,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sentence_token_limit: 50,
            chunk_size: 500,
            dominance: DominancePolicy::Strict,
        }
    }
}

/// Two-stage extraction over an injected annotator
pub struct RelationPipeline {
    annotator: Arc<dyn Annotator>,
    config: PipelineConfig,
    screen: SentenceScreen,
}

impl RelationPipeline {
    pub fn new(annotator: Arc<dyn Annotator>, config: PipelineConfig) -> Self {
        let screen = SentenceScreen::new(config.sentence_token_limit);
        Self {
            annotator,
            config,
            screen,
        }
    }

    /// Stage one: sentences worth a full parse
    pub async fn screen(&self, lines: &[String], relation: Relation) -> Result<Vec<String>> {
        let sentences = self.annotate(lines, AnnotationProfile::Light).await?;
        Ok(self.screen.screen(&sentences, relation))
    }

    /// Stage two: tuples from dominant mentions, one per instance
    pub async fn score(&self, lines: &[String], relation: Relation) -> Result<Vec<RelationTuple>> {
        let sentences = self.annotate(lines, AnnotationProfile::Full).await?;

        let mut tuples = TupleSet::new();
        for m in score_mentions(&sentences, relation, self.config.dominance) {
            match RelationTuple::new(
                m.value0,
                m.value1,
                m.type0,
                m.type1,
                m.confidence,
                m.sentence,
                relation.as_str(),
            ) {
                Ok(tuple) => {
                    tuples.merge(tuple);
                }
                Err(e) => tracing::debug!("Skipping mention: {}", e),
            }
        }

        let mut tuples = tuples.into_vec();
        tuples.sort_by(|a, b| b.cmp_by_confidence(a));
        Ok(tuples)
    }

    /// Annotate in chunks of `chunk_size` lines
    async fn annotate(
        &self,
        lines: &[String],
        profile: AnnotationProfile,
    ) -> Result<Vec<AnnotatedSentence>> {
        let mut sentences = Vec::new();
        for chunk in lines.chunks(self.config.chunk_size.max(1)) {
            sentences.extend(self.annotator.annotate(chunk, profile).await?);
        }
        Ok(sentences)
    }
}

#[async_trait]
impl TupleExtractor for RelationPipeline {
    async fn extract(&self, text: &str, relation: Relation) -> Result<Vec<RelationTuple>> {
        let lines = candidate_lines(text);
        if lines.is_empty() {
            return Ok(Vec::new());
        }

        let screened = self.screen(&lines, relation).await?;
        tracing::debug!(
            "Screening kept {} of {} lines for {}",
            screened.len(),
            lines.len(),
            relation
        );
        if screened.is_empty() {
            return Ok(Vec::new());
        }

        let tuples = self.score(&screened, relation).await?;
        tracing::debug!("Extracted {} tuples", tuples.len());
        Ok(tuples)
    }
}
