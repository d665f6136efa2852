//! ISE Search - Document retrieval collaborators
//!
//! HTTP clients for the services that turn a query into ranked pages and a
//! page into plain text:
//! - Google Custom Search JSON API (`SearchBackend`)
//! - Apache Tika server behind a plain page fetch (`TextFetcher`)

pub mod fetch;
pub mod google;

pub use fetch::{clean_page_text, TikaTextFetcher};
pub use google::GoogleSearchClient;
