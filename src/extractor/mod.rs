//! Extractor: builds indexer commands and runs them
//!
//! - `query` - structured query → command line
//! - `runner` - process execution, streaming output parsing, capture files
//! - `backoff` - retry delays for timed-out invocations

pub mod backoff;
pub mod query;
pub mod runner;

pub use query::{ChifraQuery, QueryValue};
pub use runner::{ChifraOutput, ChifraRunner, IndexerSource, OutputCapture, ParseMode, RunnerSettings};
