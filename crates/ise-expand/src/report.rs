//! Iteration and run reports

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ise_core::{Relation, RelationTuple};

/// Why the expansion loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// No new tuple in the last iteration, or no unused tuple left to query
    Converged,
    /// Enough tuples cleared the threshold
    Saturated,
    /// Iteration bound reached
    Exhausted,
    /// Stopped on request
    Cancelled,
}

impl StopReason {
    /// Whether a checkpoint with this reason may be resumed
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Converged => write!(f, "converged"),
            Self::Saturated => write!(f, "saturated"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Lifecycle of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Running,
    Stopped(StopReason),
    /// Search failed; the run cannot make progress
    Aborted,
}

/// Summary of one iteration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationReport {
    pub iteration: u32,
    pub query: String,
    /// Hits returned by search
    pub hits: usize,
    /// Documents extracted this iteration
    pub processed: usize,
    /// Hits skipped as already processed
    pub skipped: usize,
    /// Documents whose extraction failed or timed out
    pub failed: usize,
    /// Tuples returned by the extractor
    pub raw_tuples: usize,
    /// Tuples with a never-seen identity key
    pub new_tuples: usize,
    /// Tuples for known instances (including replacements)
    pub duplicate_tuples: usize,
    /// Known instances whose confidence went up
    pub replaced_tuples: usize,
    /// Result set size after merging
    pub total_tuples: usize,
    /// Pruned view: tuples at or above threshold, most confident first
    pub ranked: Vec<RelationTuple>,
    /// Cancellation cut the iteration short
    pub interrupted: bool,
}

impl IterationReport {
    pub fn new_found(&self) -> bool {
        self.new_tuples > 0
    }
}

/// Summary of a whole run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub relation: Relation,
    pub threshold: f64,
    pub stop_reason: StopReason,
    /// Iterations run by this invocation
    pub iterations: usize,
    pub processed_documents: usize,
    pub raw_tuples: usize,
    pub merged_tuples: usize,
    pub ranked: Vec<RelationTuple>,
    pub history: Vec<IterationReport>,
}
