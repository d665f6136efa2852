//! ISE Expand - Iterative Set Expansion controller
//!
//! Drives the search → extract → merge → prune → next-query loop over
//! injected collaborators:
//! - a `SearchBackend` turning queries into ranked pages
//! - a `TextFetcher` turning pages into plain text
//! - a `TupleExtractor` turning text into relation tuples
//!
//! Iterations run strictly one after another; documents within an
//! iteration are extracted concurrently and merged in search-rank order.

pub mod controller;
pub mod report;
pub mod state;

pub use controller::ExpansionController;
pub use report::{ControllerState, IterationReport, RunReport, StopReason};
pub use state::{Checkpoint, ExpansionState, PartialIteration};
pub use tokio_util::sync::CancellationToken;
