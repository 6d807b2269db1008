//! EVM trace / transaction ETL
//!
//! Pulls call traces and receipts for an address out of a local `chifra`
//! index, regroups them into one record per transaction and upserts the
//! result into SQLite.

pub mod cache;
pub mod config;
pub mod error;
pub mod extractor;
pub mod handler;
pub mod loader;
pub mod transformer;

pub use error::{EtlError, EtlResult};
pub use handler::{RefreshReport, SinceBlock, TraceRefresh, TrueblocksHandler};
