//! Relation tuples and the merge/rank store
//!
//! A `RelationTuple` is one extracted instance of the target relation. Its
//! entity pair is stored in a canonical order (descending by value) so that
//! `(A, B)` and `(B, A)` are the same instance. `TupleSet` keeps one tuple per
//! instance, always the most confident one seen.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{IseError, QueryTerms, Result};

// ============================================================================
// Identity Key
// ============================================================================

/// Identity of a relation instance: the normalized entity pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TupleKey {
    first: String,
    second: String,
}

impl TupleKey {
    /// Build a key from an unordered pair of entity values
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        let (a, b) = (a.into(), b.into());
        if b > a {
            Self { first: b, second: a }
        } else {
            Self { first: a, second: b }
        }
    }

    /// The pair as the terms of a follow-up search query
    pub fn query_terms(&self) -> QueryTerms {
        vec![self.first.clone(), self.second.clone()]
    }
}

impl std::fmt::Display for TupleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.first, self.second)
    }
}

// ============================================================================
// Relation Tuple
// ============================================================================

/// One instance of the target relation between two entity mentions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TupleRecord", into = "TupleRecord")]
pub struct RelationTuple {
    value0: String,
    value1: String,
    type0: String,
    type1: String,
    confidence: f64,
    relation_name: String,
    source_sentence: String,
    key: TupleKey,
}

impl RelationTuple {
    /// Create a normalized tuple
    ///
    /// Values and types are trimmed; the pair is reordered so that
    /// `value0 >= value1`. Fails when a value is empty or the confidence is
    /// outside (0, 1].
    pub fn new(
        value0: impl Into<String>,
        value1: impl Into<String>,
        type0: impl Into<String>,
        type1: impl Into<String>,
        confidence: f64,
        sentence: impl Into<String>,
        relation_name: impl Into<String>,
    ) -> Result<Self> {
        let mut value0 = value0.into().trim().to_string();
        let mut value1 = value1.into().trim().to_string();
        let mut type0 = type0.into().trim().to_string();
        let mut type1 = type1.into().trim().to_string();

        if value0.is_empty() || value1.is_empty() {
            return Err(IseError::InvalidTuple(format!(
                "empty entity value in pair ({value0:?}, {value1:?})"
            )));
        }
        if !(confidence > 0.0 && confidence <= 1.0) {
            return Err(IseError::InvalidTuple(format!(
                "confidence {confidence} not in range (0, 1]"
            )));
        }

        if value1 > value0 {
            std::mem::swap(&mut value0, &mut value1);
            std::mem::swap(&mut type0, &mut type1);
        }

        let key = TupleKey {
            first: value0.clone(),
            second: value1.clone(),
        };

        Ok(Self {
            value0,
            value1,
            type0,
            type1,
            confidence,
            relation_name: relation_name.into(),
            source_sentence: sentence.into().trim_end_matches(&['\n', '\r'][..]).to_string(),
            key,
        })
    }

    pub fn value0(&self) -> &str {
        &self.value0
    }

    pub fn value1(&self) -> &str {
        &self.value1
    }

    pub fn type0(&self) -> &str {
        &self.type0
    }

    pub fn type1(&self) -> &str {
        &self.type1
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn relation_name(&self) -> &str {
        &self.relation_name
    }

    pub fn source_sentence(&self) -> &str {
        &self.source_sentence
    }

    /// Identity of this instance, independent of confidence and provenance
    pub fn identity_key(&self) -> &TupleKey {
        &self.key
    }

    /// Total order by confidence, ties broken by identity key
    pub fn cmp_by_confidence(&self, other: &Self) -> Ordering {
        self.confidence
            .total_cmp(&other.confidence)
            .then_with(|| self.key.cmp(&other.key))
    }

    /// True when both tuples describe the same relation instance
    pub fn same_instance(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl std::fmt::Display for RelationTuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=============== EXTRACTED RELATION ===============")?;
        writeln!(f, "Sentence: {}", self.source_sentence)?;
        writeln!(
            f,
            "RelationType: {} | Confidence = {} | EntityType1 = {} | EntityValue1 = {} | EntityType2 = {} | EntityValue2 = {}",
            self.relation_name, self.confidence, self.type0, self.value0, self.type1, self.value1
        )?;
        write!(f, "============== END OF RELATION DESC ==============")
    }
}

/// Serialized form; deserialization re-runs normalization and validation
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TupleRecord {
    value0: String,
    value1: String,
    #[serde(default)]
    type0: String,
    #[serde(default)]
    type1: String,
    confidence: f64,
    #[serde(default)]
    relation_name: String,
    #[serde(default)]
    source_sentence: String,
}

impl TryFrom<TupleRecord> for RelationTuple {
    type Error = IseError;

    fn try_from(r: TupleRecord) -> Result<Self> {
        RelationTuple::new(
            r.value0,
            r.value1,
            r.type0,
            r.type1,
            r.confidence,
            r.source_sentence,
            r.relation_name,
        )
    }
}

impl From<RelationTuple> for TupleRecord {
    fn from(t: RelationTuple) -> Self {
        Self {
            value0: t.value0,
            value1: t.value1,
            type0: t.type0,
            type1: t.type1,
            confidence: t.confidence,
            relation_name: t.relation_name,
            source_sentence: t.source_sentence,
        }
    }
}

// ============================================================================
// Tuple Set
// ============================================================================

/// Result of merging one tuple into a `TupleSet`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// First time this instance was seen
    Inserted,
    /// Known instance, the new tuple is more confident and replaced it
    Replaced,
    /// Known instance, the stored tuple is at least as confident
    Kept,
}

/// One tuple per relation instance, keeping the most confident
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<RelationTuple>", into = "Vec<RelationTuple>")]
pub struct TupleSet {
    tuples: BTreeMap<TupleKey, RelationTuple>,
}

impl TupleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a tuple: insert if new, replace only on strictly higher confidence
    pub fn merge(&mut self, tuple: RelationTuple) -> MergeOutcome {
        use std::collections::btree_map::Entry;

        match self.tuples.entry(tuple.key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(tuple);
                MergeOutcome::Inserted
            }
            Entry::Occupied(mut slot) => {
                if tuple.confidence > slot.get().confidence {
                    slot.insert(tuple);
                    MergeOutcome::Replaced
                } else {
                    MergeOutcome::Kept
                }
            }
        }
    }

    /// Tuples with confidence >= threshold, most confident first
    pub fn pruned(&self, threshold: f64) -> Vec<&RelationTuple> {
        let mut view: Vec<&RelationTuple> = self
            .tuples
            .values()
            .filter(|t| t.confidence >= threshold)
            .collect();
        view.sort_by(|a, b| b.cmp_by_confidence(a));
        view
    }

    /// Most confident tuple whose pair has not been issued as a query yet
    pub fn best_unused(&self, used_queries: &BTreeSet<QueryTerms>) -> Option<&RelationTuple> {
        self.tuples
            .values()
            .filter(|t| !used_queries.contains(&t.key.query_terms()))
            .max_by(|a, b| a.cmp_by_confidence(b))
    }

    pub fn get(&self, key: &TupleKey) -> Option<&RelationTuple> {
        self.tuples.get(key)
    }

    pub fn contains(&self, key: &TupleKey) -> bool {
        self.tuples.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RelationTuple> {
        self.tuples.values()
    }

    pub fn into_vec(self) -> Vec<RelationTuple> {
        self.tuples.into_values().collect()
    }
}

impl From<Vec<RelationTuple>> for TupleSet {
    fn from(tuples: Vec<RelationTuple>) -> Self {
        let mut set = Self::new();
        for tuple in tuples {
            set.merge(tuple);
        }
        set
    }
}

impl From<TupleSet> for Vec<RelationTuple> {
    fn from(set: TupleSet) -> Self {
        set.into_vec()
    }
}

impl FromIterator<RelationTuple> for TupleSet {
    fn from_iter<I: IntoIterator<Item = RelationTuple>>(iter: I) -> Self {
        let mut set = Self::new();
        for tuple in iter {
            set.merge(tuple);
        }
        set
    }
}

// ============================================================================
// Tests
// ============================================================================
