//! Console rendering of run parameters and results

use std::fmt::Write;

use ise_core::{AppConfig, RelationTuple};
use ise_expand::{IterationReport, RunReport, StopReason};

/// Show only the tail of a secret
pub fn mask(secret: Option<&str>) -> String {
    match secret {
        None => "<unset>".to_string(),
        Some(s) if s.chars().count() <= 4 => "****".to_string(),
        Some(s) => {
            let tail: String = s.chars().skip(s.chars().count() - 4).collect();
            format!("****{tail}")
        }
    }
}

pub fn parameters(config: &AppConfig, query: &str) -> String {
    let e = &config.expansion;
    let mut out = String::from("\nParameters:\n");
    let _ = writeln!(out, "Client key      = {}", mask(config.search.api_key.as_deref()));
    let _ = writeln!(out, "Engine key      = {}", mask(config.search.engine_id.as_deref()));
    let _ = writeln!(out, "Relation        = {}", e.relation);
    let _ = writeln!(out, "Threshold       = {}", e.threshold);
    let _ = writeln!(out, "Query           = {query}");
    let _ = writeln!(out, "# of Tuples     = {}", e.target_tuples);
    let _ = writeln!(out, "Max iterations  = {}", e.max_iterations);
    out
}

/// One row of the ranked table
pub fn tuple_row(tuple: &RelationTuple) -> String {
    format!(
        "Relation Type: {} | Confidence: {:.3} | Entity #1: {} ({})\t| Entity #2: {} ({})",
        tuple.relation_name(),
        tuple.confidence(),
        tuple.value0(),
        tuple.type0(),
        tuple.value1(),
        tuple.type1()
    )
}

pub fn iteration(report: &IterationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "=========== Iteration: {} - Query: {} ===========",
        report.iteration, report.query
    );
    let _ = writeln!(
        out,
        "Documents: {} hits, {} processed, {} skipped, {} failed",
        report.hits, report.processed, report.skipped, report.failed
    );
    let _ = writeln!(
        out,
        "Relations: {} new, {} duplicate (overall: {})",
        report.new_tuples, report.duplicate_tuples, report.total_tuples
    );
    let _ = writeln!(out, "Number of tuples after pruning: {}", report.ranked.len());
    out.push_str("================== ALL RELATIONS =================\n");
    for tuple in &report.ranked {
        out.push_str(&tuple_row(tuple));
        out.push('\n');
    }
    out
}

pub fn stop_message(report: &RunReport) -> String {
    match report.stop_reason {
        StopReason::Converged => "No new tuples found. Shutting down...".to_string(),
        StopReason::Saturated => format!(
            "Program reached {} number of tuples. Shutting down...",
            report.ranked.len()
        ),
        StopReason::Exhausted => "Maximum iterations reached. Shutting down...".to_string(),
        StopReason::Cancelled => "Interrupted. Resume with --resume.".to_string(),
    }
}
