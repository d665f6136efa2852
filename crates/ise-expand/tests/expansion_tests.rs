//! Expansion loop integration tests
//!
//! All collaborators are in-memory fakes: search hits are derived from the
//! query, the fetcher echoes the URL as page text, and the extractor is a
//! script over that text.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ise_core::{
    ExpansionConfig, IseError, Relation, RelationTuple, Result, SearchBackend, SearchHit,
    TextFetcher, TupleExtractor,
};
use ise_expand::{
    Checkpoint, ControllerState, CancellationToken, ExpansionController, StopReason,
};

// =============================================================================
// Fakes
// =============================================================================

type HitFn = dyn Fn(&str) -> Result<Vec<SearchHit>> + Send + Sync;

struct FakeSearch {
    hits: Box<HitFn>,
    queries: Mutex<Vec<String>>,
}

impl FakeSearch {
    fn new(hits: impl Fn(&str) -> Result<Vec<SearchHit>> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            hits: Box::new(hits),
            queries: Mutex::new(Vec::new()),
        })
    }

    /// One page per query, unique to the query
    fn per_query() -> Arc<Self> {
        Self::new(|q| Ok(vec![hit(&format!("https://example.com/{}", q.replace(' ', "_")))]))
    }

    fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchBackend for FakeSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.queries.lock().unwrap().push(query.to_string());
        (self.hits)(query)
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Page text is the URL itself
struct EchoFetcher;

#[async_trait]
impl TextFetcher for EchoFetcher {
    async fn fetch_text(&self, url: &str) -> String {
        url.to_string()
    }
}

type ExtractFn = dyn Fn(&str) -> Result<Vec<RelationTuple>> + Send + Sync;

struct FakeExtractor {
    script: Box<ExtractFn>,
    /// Pages containing the marker sleep for the duration first
    delays: Vec<(&'static str, Duration)>,
}

impl FakeExtractor {
    fn new(script: impl Fn(&str) -> Result<Vec<RelationTuple>> + Send + Sync + 'static) -> Arc<Self> {
        Self::with_delays(script, Vec::new())
    }

    fn with_delays(
        script: impl Fn(&str) -> Result<Vec<RelationTuple>> + Send + Sync + 'static,
        delays: Vec<(&'static str, Duration)>,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            delays,
        })
    }
}

#[async_trait]
impl TupleExtractor for FakeExtractor {
    async fn extract(&self, text: &str, _relation: Relation) -> Result<Vec<RelationTuple>> {
        for (marker, delay) in &self.delays {
            if text.contains(marker) {
                tokio::time::sleep(*delay).await;
            }
        }
        (self.script)(text)
    }
}

fn hit(url: &str) -> SearchHit {
    SearchHit {
        title: url.to_string(),
        display_url: "example.com".to_string(),
        url: url.to_string(),
        snippet: String::new(),
    }
}

fn work_for(a: &str, b: &str, confidence: f64) -> RelationTuple {
    RelationTuple::new(a, b, "PERSON", "ORGANIZATION", confidence, "sentence", "Work_For").unwrap()
}

fn config(threshold: f64, target_tuples: usize, max_iterations: u32) -> ExpansionConfig {
    ExpansionConfig {
        relation: Relation::WorkFor,
        threshold,
        target_tuples,
        max_iterations,
        document_timeout_secs: 1,
        ..Default::default()
    }
}

fn controller(
    search: Arc<FakeSearch>,
    extractor: Arc<FakeExtractor>,
    config: ExpansionConfig,
) -> ExpansionController {
    ExpansionController::new(search, Arc::new(EchoFetcher), extractor, config, vec!["seed".to_string()])
        .unwrap()
}

// =============================================================================
// Stopping conditions
// =============================================================================

#[tokio::test]
async fn test_saturated_collaborator_converges_in_two_iterations() {
    let search = FakeSearch::per_query();
    let extractor = FakeExtractor::new(|_| Ok(vec![work_for("Alice", "Acme", 1.0)]));
    let mut ctl = controller(search.clone(), extractor, config(0.5, 10, 10));

    let report = ctl.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.stop_reason, StopReason::Converged);
    assert_eq!(report.iterations, 2);
    assert_eq!(report.history[0].new_tuples, 1);
    assert_eq!(report.history[1].new_tuples, 0);
    assert_eq!(report.history[1].duplicate_tuples, 1);
    assert_eq!(search.queries(), vec!["seed", "Alice Acme"]);
    assert_eq!(ctl.phase(), ControllerState::Stopped(StopReason::Converged));
}

#[tokio::test]
async fn test_novel_collaborator_stops_at_max_iterations() {
    let search = FakeSearch::per_query();
    let counter = AtomicUsize::new(0);
    let extractor = FakeExtractor::new(move |_| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        Ok(vec![work_for(&format!("Person{n}"), &format!("Org{n}"), 0.5)])
    });
    let mut ctl = controller(search.clone(), extractor, config(0.9, 100, 4));

    let report = ctl.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.stop_reason, StopReason::Exhausted);
    assert_eq!(report.iterations, 4);
    assert_eq!(ctl.state().iteration, 4);
    assert_eq!(search.queries().len(), 4);
    assert_eq!(report.merged_tuples, 4);
    assert!(report.ranked.is_empty());
}

#[tokio::test]
async fn test_saturates_on_first_iteration() {
    let search = FakeSearch::per_query();
    let extractor = FakeExtractor::new(|_| {
        Ok(vec![work_for("Alice", "Acme", 0.9), work_for("Bob", "Beta", 0.3)])
    });
    let mut ctl = controller(search.clone(), extractor, config(0.8, 1, 10));

    let report = ctl.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.stop_reason, StopReason::Saturated);
    assert_eq!(report.iterations, 1);
    assert_eq!(report.ranked.len(), 1);
    assert_eq!(report.ranked[0].value0(), "Alice");
    assert_eq!(report.ranked[0].value1(), "Acme");
    assert_eq!(report.ranked[0].confidence(), 0.9);
    // Pruning filters the view only
    assert_eq!(report.merged_tuples, 2);
    // Next query never computed
    assert_eq!(ctl.state().query_terms, vec!["seed".to_string()]);
    assert_eq!(ctl.state().used_queries.len(), 1);
}

#[tokio::test]
async fn test_converges_when_no_unused_pair_left() {
    // The only tuple found is the seed pair itself
    let search = FakeSearch::per_query();
    let extractor = FakeExtractor::new(|_| Ok(vec![work_for("seed", "acme", 0.6)]));
    let mut ctl = ExpansionController::new(
        search.clone(),
        Arc::new(EchoFetcher),
        extractor,
        config(0.5, 10, 10),
        vec!["seed".to_string(), "acme".to_string()],
    )
    .unwrap();

    let report = ctl.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.stop_reason, StopReason::Converged);
    assert_eq!(report.iterations, 1);
    assert_eq!(search.queries(), vec!["seed acme"]);
}

#[tokio::test]
async fn test_next_query_is_most_confident_unused() {
    let search = FakeSearch::per_query();
    let extractor = FakeExtractor::new(|text| {
        if text.ends_with("/seed") {
            Ok(vec![work_for("Bob", "Beta", 0.4), work_for("Carol", "Corp", 0.8)])
        } else {
            Ok(Vec::new())
        }
    });
    let mut ctl = controller(search.clone(), extractor, config(0.5, 10, 10));

    let report = ctl.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(search.queries(), vec!["seed", "Corp Carol"]);
    assert_eq!(report.stop_reason, StopReason::Converged);
}

// =============================================================================
// Documents and merging
// =============================================================================

#[tokio::test]
async fn test_processed_documents_are_skipped() {
    let search = FakeSearch::new(|_| {
        Ok(vec![
            hit("https://example.com/page#top"),
            hit("https://example.com/page#bottom"),
        ])
    });
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let extractor = FakeExtractor::new(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(vec![work_for("Alice", "Acme", 0.9)])
    });
    let mut ctl = controller(search, extractor, config(0.5, 10, 10));

    let report = ctl.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.history[0].processed, 1);
    assert_eq!(report.history[0].skipped, 1);
    assert_eq!(report.history[1].skipped, 2);
    assert_eq!(report.processed_documents, 1);
    assert_eq!(report.stop_reason, StopReason::Converged);
}

#[tokio::test]
async fn test_higher_confidence_duplicate_replaces() {
    let search = FakeSearch::new(|_| Ok(vec![hit("https://a.com/1"), hit("https://a.com/2")]));
    let extractor = FakeExtractor::new(|text| {
        if text.ends_with("/1") {
            Ok(vec![work_for("Alice", "Acme", 0.4)])
        } else {
            Ok(vec![work_for("Acme", "Alice", 0.7)])
        }
    });
    let mut ctl = controller(search, extractor, config(0.5, 1, 10));

    let report = ctl.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.history[0].new_tuples, 1);
    assert_eq!(report.history[0].replaced_tuples, 1);
    assert_eq!(report.raw_tuples, 2);
    assert_eq!(report.merged_tuples, 1);
    assert_eq!(report.ranked[0].confidence(), 0.7);
    assert_eq!(report.stop_reason, StopReason::Saturated);
}

#[tokio::test(start_paused = true)]
async fn test_merge_follows_rank_order_under_concurrency() {
    let search = FakeSearch::new(|_| Ok(vec![hit("https://a.com/slow"), hit("https://a.com/fast")]));
    let extractor = FakeExtractor::with_delays(
        |text| {
            let sentence = if text.contains("slow") { "first" } else { "second" };
            Ok(vec![RelationTuple::new(
                "Alice", "Acme", "PERSON", "ORGANIZATION", 0.7, sentence, "Work_For",
            )
            .unwrap()])
        },
        vec![("slow", Duration::from_millis(500))],
    );
    let mut cfg = config(0.5, 1, 10);
    cfg.concurrency = 2;
    cfg.document_timeout_secs = 5;
    let mut ctl = controller(search, extractor, cfg);

    let report = ctl.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.history[0].processed, 2);
    assert_eq!(report.ranked[0].source_sentence(), "first");
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_search_failure_aborts_run() {
    let search = FakeSearch::new(|_| Err(IseError::Search("quota exceeded".to_string())));
    let extractor = FakeExtractor::new(|_| Ok(Vec::new()));
    let mut ctl = controller(search, extractor, config(0.5, 1, 10));

    let result = ctl.run(&CancellationToken::new()).await;

    assert!(matches!(result, Err(IseError::Search(_))));
    assert_eq!(ctl.phase(), ControllerState::Aborted);
}

#[tokio::test]
async fn test_extraction_failure_is_not_fatal() {
    let search = FakeSearch::new(|_| Ok(vec![hit("https://a.com/bad"), hit("https://a.com/good")]));
    let extractor = FakeExtractor::new(|text| {
        if text.contains("bad") {
            Err(IseError::Extraction("annotator timeout".to_string()))
        } else {
            Ok(vec![work_for("Alice", "Acme", 0.9)])
        }
    });
    let mut ctl = controller(search, extractor, config(0.5, 1, 10));

    let report = ctl.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.history[0].failed, 1);
    assert_eq!(report.history[0].processed, 1);
    assert_eq!(report.processed_documents, 2);
    assert_eq!(report.stop_reason, StopReason::Saturated);
}

#[tokio::test(start_paused = true)]
async fn test_document_timeout_counts_as_failure() {
    let search = FakeSearch::new(|_| Ok(vec![hit("https://a.com/slow"), hit("https://a.com/ok")]));
    let extractor = FakeExtractor::with_delays(
        |_| Ok(vec![work_for("Alice", "Acme", 0.9)]),
        vec![("slow", Duration::from_secs(120))],
    );
    let mut ctl = controller(search, extractor, config(0.5, 1, 10));

    let report = ctl.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.history[0].failed, 1);
    assert_eq!(report.history[0].processed, 1);
    assert_eq!(report.stop_reason, StopReason::Saturated);
}

// =============================================================================
// Cancellation and checkpoints
// =============================================================================

#[tokio::test]
async fn test_cancelled_before_start() {
    let search = FakeSearch::per_query();
    let extractor = FakeExtractor::new(|_| Ok(Vec::new()));
    let mut ctl = controller(search.clone(), extractor, config(0.5, 1, 10));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = ctl.run(&cancel).await.unwrap();

    assert_eq!(report.stop_reason, StopReason::Cancelled);
    assert_eq!(report.iterations, 0);
    assert!(search.queries().is_empty());
}

#[tokio::test]
async fn test_cancel_then_resume_from_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ise.json");

    let counter = Arc::new(AtomicUsize::new(0));
    let novel = {
        let counter = Arc::clone(&counter);
        move |_: &str| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![work_for(&format!("Person{n}"), &format!("Org{n}"), 0.5)])
        }
    };

    let mut cfg = config(0.9, 100, 3);
    cfg.checkpoint_path = Some(path.clone());

    let search = FakeSearch::per_query();
    let mut ctl = controller(search.clone(), FakeExtractor::new(novel.clone()), cfg.clone());

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    let report = ctl.run_with(&cancel, |_| stopper.cancel()).await.unwrap();
    assert_eq!(report.stop_reason, StopReason::Cancelled);
    assert_eq!(report.iterations, 1);

    let checkpoint = Checkpoint::load(&path).unwrap();
    assert_eq!(checkpoint.completed, Some(StopReason::Cancelled));
    assert_eq!(checkpoint.state.iteration, 2);
    assert_eq!(checkpoint.state.result_set.len(), 1);
    let run_id = checkpoint.run_id;

    let search = FakeSearch::per_query();
    let mut resumed = ExpansionController::resume(
        search.clone(),
        Arc::new(EchoFetcher),
        FakeExtractor::new(novel),
        cfg.clone(),
        checkpoint,
    )
    .unwrap();
    let report = resumed.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(resumed.run_id(), run_id);
    assert_eq!(report.stop_reason, StopReason::Exhausted);
    assert_eq!(report.iterations, 2);
    assert_eq!(search.queries(), vec!["Person0 Org0", "Person1 Org1"]);
    assert_eq!(report.merged_tuples, 3);

    // A finished run cannot be resumed
    let finished = Checkpoint::load(&path).unwrap();
    assert_eq!(finished.completed, Some(StopReason::Exhausted));
    let again = ExpansionController::resume(
        FakeSearch::per_query(),
        Arc::new(EchoFetcher),
        FakeExtractor::new(|_| Ok(Vec::new())),
        cfg,
        finished,
    );
    assert!(matches!(again, Err(IseError::Checkpoint(_))));
}

/// The seed query returns a fast page and a slow one; later queries one page each
fn fast_and_slow_search() -> Arc<FakeSearch> {
    FakeSearch::new(|q| {
        if q == "seed" {
            Ok(vec![hit("https://a.com/fast"), hit("https://a.com/slow")])
        } else {
            Ok(vec![hit(&format!("https://a.com/{}", q.replace(' ', "_")))])
        }
    })
}

fn fast_and_slow_extractor() -> Arc<FakeExtractor> {
    FakeExtractor::with_delays(
        |text| {
            if text.contains("slow") {
                Ok(Vec::new())
            } else {
                Ok(vec![work_for("Alice", "Acme", 0.6)])
            }
        },
        vec![("slow", Duration::from_millis(500))],
    )
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_iteration_then_resume_matches_uninterrupted_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ise.json");

    let mut plain = config(0.5, 10, 10);
    plain.document_timeout_secs = 5;
    let mut cfg = plain.clone();
    cfg.checkpoint_path = Some(path.clone());

    let mut baseline = controller(fast_and_slow_search(), fast_and_slow_extractor(), plain);
    let expected = baseline.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(expected.stop_reason, StopReason::Converged);
    assert_eq!(expected.iterations, 2);

    // Cancel while the slow page is still being extracted
    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        stopper.cancel();
    });
    let mut first = controller(fast_and_slow_search(), fast_and_slow_extractor(), cfg.clone());
    let report = first.run(&cancel).await.unwrap();

    assert_eq!(report.stop_reason, StopReason::Cancelled);
    assert_eq!(report.iterations, 1);
    assert!(report.history[0].interrupted);
    assert_eq!(report.history[0].processed, 1);
    assert_eq!(report.history[0].new_tuples, 1);

    let checkpoint = Checkpoint::load(&path).unwrap();
    assert_eq!(checkpoint.completed, Some(StopReason::Cancelled));
    assert_eq!(checkpoint.state.iteration, 1);
    assert!(checkpoint.state.processed_documents.contains("https://a.com/fast"));
    assert!(!checkpoint.state.processed_documents.contains("https://a.com/slow"));
    let partial = checkpoint.state.partial.clone().unwrap();
    assert_eq!(partial.report.new_tuples, 1);
    assert_eq!(partial.documents.len(), 1);

    let search = fast_and_slow_search();
    let mut resumed = ExpansionController::resume(
        search.clone(),
        Arc::new(EchoFetcher),
        fast_and_slow_extractor(),
        cfg,
        checkpoint,
    )
    .unwrap();
    let report = resumed.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.stop_reason, expected.stop_reason);
    assert_eq!(report.history, expected.history);
    assert_eq!(report.raw_tuples, expected.raw_tuples);
    assert_eq!(report.ranked, expected.ranked);
    assert_eq!(search.queries(), vec!["seed", "Alice Acme"]);
    assert_eq!(resumed.state().used_queries, baseline.state().used_queries);
    assert_eq!(resumed.state().processed_documents, baseline.state().processed_documents);
    assert!(resumed.state().partial.is_none());
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn test_rejects_empty_query_and_bad_config() {
    let extractor = FakeExtractor::new(|_| Ok(Vec::new()));

    let empty = ExpansionController::new(
        FakeSearch::per_query(),
        Arc::new(EchoFetcher),
        extractor.clone(),
        config(0.5, 1, 10),
        vec!["  ".to_string()],
    );
    assert!(matches!(empty, Err(IseError::Config(_))));

    let bad_threshold = ExpansionController::new(
        FakeSearch::per_query(),
        Arc::new(EchoFetcher),
        extractor,
        config(0.0, 1, 10),
        vec!["seed".to_string()],
    );
    assert!(matches!(bad_threshold, Err(IseError::Config(_))));
}
