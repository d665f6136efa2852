//! Expansion controller
//!
//! One iteration: search for the current query, extract tuples from every
//! page not mined before, merge them by identity key, compute the pruned
//! view, then decide whether to stop. When the loop goes on, the most
//! confident tuple not yet used as a query becomes the next query.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ise_core::{
    ConfigError, ExpansionConfig, IseError, MergeOutcome, QueryTerms, Relation, RelationTuple,
    Result, SearchBackend, TextFetcher, TupleExtractor,
};

use crate::report::{ControllerState, IterationReport, RunReport, StopReason};
use crate::state::{Checkpoint, ExpansionState, PartialIteration};

/// A page selected for extraction in the current iteration
#[derive(Debug, Clone)]
struct PendingDocument {
    rank: usize,
    key: String,
    url: String,
}

/// What came out of one page
#[derive(Debug)]
enum DocumentOutcome {
    Extracted(Vec<RelationTuple>),
    Failed(String),
    Cancelled,
}

/// Iterative set expansion over injected collaborators
pub struct ExpansionController {
    search: Arc<dyn SearchBackend>,
    fetcher: Arc<dyn TextFetcher>,
    extractor: Arc<dyn TupleExtractor>,
    config: ExpansionConfig,
    state: ExpansionState,
    phase: ControllerState,
    run_id: Uuid,
}

impl ExpansionController {
    /// Create a controller for a fresh run
    pub fn new(
        search: Arc<dyn SearchBackend>,
        fetcher: Arc<dyn TextFetcher>,
        extractor: Arc<dyn TupleExtractor>,
        config: ExpansionConfig,
        query_terms: QueryTerms,
    ) -> Result<Self> {
        config.validate()?;

        let query_terms: QueryTerms = query_terms
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if query_terms.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "query".to_string(),
                value: String::new(),
            }
            .into());
        }

        let state = ExpansionState::new(config.relation, query_terms);
        Ok(Self {
            search,
            fetcher,
            extractor,
            config,
            state,
            phase: ControllerState::Idle,
            run_id: Uuid::new_v4(),
        })
    }

    /// Continue a run from a checkpoint
    pub fn resume(
        search: Arc<dyn SearchBackend>,
        fetcher: Arc<dyn TextFetcher>,
        extractor: Arc<dyn TupleExtractor>,
        config: ExpansionConfig,
        checkpoint: Checkpoint,
    ) -> Result<Self> {
        config.validate()?;

        if let Some(reason) = checkpoint.completed {
            if !reason.is_resumable() {
                return Err(IseError::Checkpoint(format!("run already finished ({reason})")));
            }
        }
        if checkpoint.state.relation != config.relation {
            return Err(IseError::Checkpoint(format!(
                "checkpoint relation {} does not match configured {}",
                checkpoint.state.relation, config.relation
            )));
        }

        tracing::info!(
            "Resuming run {} at iteration {} with {} tuples",
            checkpoint.run_id,
            checkpoint.state.iteration,
            checkpoint.state.result_set.len()
        );

        Ok(Self {
            search,
            fetcher,
            extractor,
            config,
            state: checkpoint.state,
            phase: ControllerState::Idle,
            run_id: checkpoint.run_id,
        })
    }

    pub fn state(&self) -> &ExpansionState {
        &self.state
    }

    pub fn phase(&self) -> ControllerState {
        self.phase
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Run until a stopping condition fires
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<RunReport> {
        self.run_with(cancel, |_| {}).await
    }

    /// Run until a stopping condition fires, reporting every iteration
    pub async fn run_with<F>(&mut self, cancel: &CancellationToken, mut observer: F) -> Result<RunReport>
    where
        F: FnMut(&IterationReport),
    {
        self.phase = ControllerState::Running;
        let mut history = Vec::new();

        let reason = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            let report = match self.run_iteration(cancel).await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!("Iteration {} aborted: {}", self.state.iteration, e);
                    self.phase = ControllerState::Aborted;
                    return Err(e);
                }
            };
            observer(&report);

            let interrupted = report.interrupted;
            let stop = self.evaluate(&report);
            history.push(report);

            if interrupted {
                break StopReason::Cancelled;
            }
            if let Some(reason) = stop {
                break reason;
            }

            // Next query: most confident pair never used as query terms
            match self.state.result_set.best_unused(&self.state.used_queries) {
                Some(tuple) => {
                    self.state.query_terms = tuple.identity_key().query_terms();
                }
                None => {
                    tracing::info!("No unused tuple left to query");
                    break StopReason::Converged;
                }
            }

            self.state.iteration += 1;
            self.save_checkpoint(None);
        };

        tracing::info!(
            "Run {} stopped: {} after {} iterations ({} tuples)",
            self.run_id,
            reason,
            history.len(),
            self.state.result_set.len()
        );
        self.phase = ControllerState::Stopped(reason);
        self.save_checkpoint(Some(reason));

        Ok(self.report(reason, history))
    }

    /// Steps 1-3: query, extract and merge, prune
    async fn run_iteration(&mut self, cancel: &CancellationToken) -> Result<IterationReport> {
        let query = self.state.query();
        tracing::info!(
            "Iteration {} - query: {} ({})",
            self.state.iteration,
            query,
            self.search.name()
        );

        self.state.used_queries.insert(self.state.query_terms.clone());
        let hits = self.search.search(&query).await?;

        // A cancelled attempt at this iteration left its counters behind
        let carried = self
            .state
            .partial
            .take()
            .filter(|p| p.report.iteration == self.state.iteration)
            .unwrap_or_default();
        if !carried.documents.is_empty() {
            tracing::info!(
                "Continuing iteration {} after {} documents",
                self.state.iteration,
                carried.documents.len()
            );
        }
        let mut mined = carried.documents;
        let mut report = IterationReport {
            iteration: self.state.iteration,
            query,
            hits: hits.len(),
            processed: carried.report.processed,
            failed: carried.report.failed,
            raw_tuples: carried.report.raw_tuples,
            new_tuples: carried.report.new_tuples,
            duplicate_tuples: carried.report.duplicate_tuples,
            replaced_tuples: carried.report.replaced_tuples,
            ..Default::default()
        };

        // Select pages not mined before, in rank order
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for (rank, hit) in hits.iter().enumerate() {
            let key = hit.canonical_url();
            let first_sighting = seen.insert(key.clone());
            if first_sighting && mined.contains(&key) {
                // Counted by the cancelled attempt
                continue;
            }
            if !first_sighting || self.state.processed_documents.contains(&key) {
                tracing::debug!("[{}] Already processed, skipping: {}", rank + 1, hit.url);
                report.skipped += 1;
                continue;
            }
            pending.push(PendingDocument {
                rank: rank + 1,
                key,
                url: hit.url.clone(),
            });
        }

        let fetcher = Arc::clone(&self.fetcher);
        let extractor = Arc::clone(&self.extractor);
        let relation = self.config.relation;
        let timeout = self.config.document_timeout();
        let token = cancel.clone();

        // Extraction runs concurrently; `buffered` yields in rank order so merges are deterministic
        let mut outcomes = stream::iter(pending)
            .map(move |doc| {
                let fetcher = Arc::clone(&fetcher);
                let extractor = Arc::clone(&extractor);
                let token = token.clone();
                async move {
                    let outcome =
                        extract_document(fetcher, extractor, &doc, relation, timeout, token).await;
                    (doc, outcome)
                }
            })
            .buffered(self.config.concurrency);

        while let Some((doc, outcome)) = outcomes.next().await {
            let tuples = match outcome {
                DocumentOutcome::Extracted(tuples) => tuples,
                DocumentOutcome::Failed(reason) => {
                    tracing::warn!("[{}] Extraction failed for {}: {}", doc.rank, doc.url, reason);
                    mined.insert(doc.key.clone());
                    self.state.processed_documents.insert(doc.key);
                    report.failed += 1;
                    continue;
                }
                DocumentOutcome::Cancelled => {
                    report.interrupted = true;
                    continue;
                }
            };

            mined.insert(doc.key.clone());
            self.state.processed_documents.insert(doc.key);
            report.processed += 1;

            let mut new_here = 0;
            for tuple in tuples {
                report.raw_tuples += 1;
                self.state.raw_tuple_count += 1;
                let key = tuple.identity_key().clone();
                match self.state.result_set.merge(tuple) {
                    MergeOutcome::Inserted => {
                        new_here += 1;
                        tracing::debug!("New tuple {}", key);
                    }
                    MergeOutcome::Replaced => {
                        report.replaced_tuples += 1;
                        report.duplicate_tuples += 1;
                    }
                    MergeOutcome::Kept => report.duplicate_tuples += 1,
                }
            }
            report.new_tuples += new_here;

            tracing::debug!(
                "[{}] {}: {} new relations (overall: {})",
                doc.rank,
                doc.url,
                new_here,
                self.state.result_set.len()
            );
        }

        report.total_tuples = self.state.result_set.len();
        if report.interrupted {
            self.state.partial = Some(PartialIteration {
                report: report.clone(),
                documents: mined,
            });
        }
        report.ranked = self.ranked();

        tracing::info!(
            "Iteration {}: {} new, {} duplicate, {} above threshold ({} total)",
            report.iteration,
            report.new_tuples,
            report.duplicate_tuples,
            report.ranked.len(),
            report.total_tuples
        );

        Ok(report)
    }

    /// Step 4: stopping conditions, in order
    fn evaluate(&self, report: &IterationReport) -> Option<StopReason> {
        if !report.new_found() {
            tracing::info!("No new tuples found");
            Some(StopReason::Converged)
        } else if report.ranked.len() >= self.config.target_tuples {
            tracing::info!("Reached {} tuples", report.ranked.len());
            Some(StopReason::Saturated)
        } else if self.state.iteration >= self.config.max_iterations {
            tracing::info!("Maximum iterations reached");
            Some(StopReason::Exhausted)
        } else {
            None
        }
    }

    /// Pruned view of the current result set
    fn ranked(&self) -> Vec<RelationTuple> {
        self.state
            .result_set
            .pruned(self.config.threshold)
            .into_iter()
            .cloned()
            .collect()
    }

    fn save_checkpoint(&self, completed: Option<StopReason>) {
        let Some(path) = &self.config.checkpoint_path else {
            return;
        };
        let checkpoint = Checkpoint::new(self.run_id, self.state.clone(), completed);
        if let Err(e) = checkpoint.save(path) {
            tracing::warn!("Failed to write checkpoint {}: {}", path.display(), e);
        }
    }

    fn report(&self, stop_reason: StopReason, history: Vec<IterationReport>) -> RunReport {
        RunReport {
            run_id: self.run_id,
            relation: self.config.relation,
            threshold: self.config.threshold,
            stop_reason,
            iterations: history.len(),
            processed_documents: self.state.processed_documents.len(),
            raw_tuples: self.state.raw_tuple_count,
            merged_tuples: self.state.result_set.len(),
            ranked: self.ranked(),
            history,
        }
    }
}

/// Fetch and extract one page under the per-document timeout
async fn extract_document(
    fetcher: Arc<dyn TextFetcher>,
    extractor: Arc<dyn TupleExtractor>,
    doc: &PendingDocument,
    relation: Relation,
    timeout: Duration,
    cancel: CancellationToken,
) -> DocumentOutcome {
    let work = async {
        let text = fetcher.fetch_text(&doc.url).await;
        extractor.extract(&text, relation).await
    };

    tokio::select! {
        _ = cancel.cancelled() => DocumentOutcome::Cancelled,
        result = tokio::time::timeout(timeout, work) => match result {
            Ok(Ok(tuples)) => DocumentOutcome::Extracted(tuples),
            Ok(Err(e)) => DocumentOutcome::Failed(e.to_string()),
            Err(_) => DocumentOutcome::Failed(format!("timed out after {timeout:?}")),
        },
    }
}
