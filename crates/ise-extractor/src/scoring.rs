//! Stage two: relation scoring
//!
//! A relation mention is kept only when the target relation is the
//! dominant relation type for it. There is no threshold at this stage;
//! confidence pruning happens over the whole result set.

use ise_core::{AnnotatedSentence, DominancePolicy, Relation, RelationMention};

use crate::screening::clean_sentence;

/// A dominant two-entity mention, ready to become a tuple
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMention {
    pub value0: String,
    pub value1: String,
    pub type0: String,
    pub type1: String,
    pub confidence: f64,
    pub sentence: String,
}

/// Target relation score if it dominates the mention's scores
///
/// Under `Strict` any other relation type scoring equal or higher rejects
/// the mention. A mention without a score for the target is rejected.
pub fn dominant_score(
    mention: &RelationMention,
    relation: Relation,
    policy: DominancePolicy,
) -> Option<f64> {
    let target = *mention.scores.get(relation.as_str())?;
    if target.is_nan() {
        return None;
    }

    let dominated = mention
        .scores
        .iter()
        .filter(|(name, _)| name.as_str() != relation.as_str())
        .any(|(_, &score)| match policy {
            DominancePolicy::Strict => score >= target,
            DominancePolicy::AllowTies => score > target,
        });

    (!dominated).then_some(target)
}

/// Dominant two-entity mentions across fully annotated sentences
pub fn score_mentions(
    sentences: &[AnnotatedSentence],
    relation: Relation,
    policy: DominancePolicy,
) -> Vec<ScoredMention> {
    let mut scored = Vec::new();

    for sentence in sentences {
        let mut text: Option<String> = None;

        for mention in &sentence.relations {
            let Some(confidence) = dominant_score(mention, relation, policy) else {
                continue;
            };
            let [e0, e1] = mention.entities.as_slice() else {
                continue;
            };

            let text = text.get_or_insert_with(|| clean_sentence(&sentence.text()));
            scored.push(ScoredMention {
                value0: e0.value.trim_end().to_string(),
                value1: e1.value.trim_end().to_string(),
                type0: e0.entity_type.trim_end().to_string(),
                type1: e1.entity_type.trim_end().to_string(),
                confidence,
                sentence: text.clone(),
            });
        }
    }

    scored
}
