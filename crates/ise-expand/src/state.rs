//! Expansion state and checkpoints
//!
//! The state is owned and mutated only by the controller. A checkpoint is
//! the state plus run metadata, written as JSON after every iteration so an
//! interrupted run can pick up where it stopped.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ise_core::{IseError, QueryTerms, Relation, Result, TupleSet};

use crate::report::{IterationReport, StopReason};

/// Everything the loop has learned so far
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionState {
    pub relation: Relation,
    /// Number of the next (or current) iteration, starting at 1
    pub iteration: u32,
    /// Terms of the next (or current) query
    pub query_terms: QueryTerms,
    /// Every discovered instance; never shrinks
    pub result_set: TupleSet,
    pub used_queries: BTreeSet<QueryTerms>,
    /// Canonical URLs already mined
    pub processed_documents: BTreeSet<String>,
    /// Tuples returned by the extractor across all iterations
    pub raw_tuple_count: usize,
    /// Progress of the current iteration if cancellation cut it short
    #[serde(default)]
    pub partial: Option<PartialIteration>,
}

/// An iteration cut short by cancellation
///
/// Resuming runs the same iteration again; its counters continue from here
/// and pages in `documents` are not counted a second time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialIteration {
    pub report: IterationReport,
    /// Canonical URLs mined before the cut
    pub documents: BTreeSet<String>,
}

impl ExpansionState {
    pub fn new(relation: Relation, query_terms: QueryTerms) -> Self {
        Self {
            relation,
            iteration: 1,
            query_terms,
            result_set: TupleSet::new(),
            used_queries: BTreeSet::new(),
            processed_documents: BTreeSet::new(),
            raw_tuple_count: 0,
            partial: None,
        }
    }

    pub fn query(&self) -> String {
        self.query_terms.join(" ")
    }
}

/// Persisted expansion state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: Uuid,
    pub saved_at: DateTime<Utc>,
    /// Set once the run has stopped
    pub completed: Option<StopReason>,
    pub state: ExpansionState,
}

impl Checkpoint {
    pub fn new(run_id: Uuid, state: ExpansionState, completed: Option<StopReason>) -> Self {
        Self {
            run_id,
            saved_at: Utc::now(),
            completed,
            state,
        }
    }

    /// Write atomically: temp file next to the target, then rename
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| IseError::Checkpoint(format!("Failed to serialize checkpoint: {e}")))?;

        let tmp = temp_path(path);
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read(path)?;
        serde_json::from_slice(&content).map_err(|e| {
            IseError::Checkpoint(format!("Failed to parse checkpoint {}: {e}", path.display()))
        })
    }
}

/// `<path>.tmp`, keeping the original extension
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
