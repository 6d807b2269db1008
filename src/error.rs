//! Error types for the extract / transform / load stages
//!
//! Input problems (bad indexer output, malformed entries, missing origins)
//! degrade locally and are only logged. Store problems (`PersistenceError`)
//! always propagate and abort the enclosing batch.

use crate::transformer::records::TransactionId;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

pub type EtlResult<T> = Result<T, EtlError>;

/// A query could not be turned into a command line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("query is missing required field `{0}`")]
    MissingField(&'static str),
}

/// Failure while running the external indexer
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("failed to spawn indexer process: {0}")]
    Spawn(std::io::Error),
    #[error("error reading indexer output: {0}")]
    Io(#[from] std::io::Error),
    #[error("indexer exited abnormally ({0})")]
    Exit(ExitStatus),
    #[error("indexer did not finish within {0:?}")]
    Timeout(Duration),
    #[error("could not parse indexer output as JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ExtractError {
    /// Timeouts are worth another attempt; everything else is deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExtractError::Timeout(_))
    }
}

/// Diagnostics raised while reconstructing aggregates. Never returned to
/// callers: the offending entry or group is skipped and this is logged.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("malformed {context}: {reason}")]
    MalformedRecord { context: String, reason: String },
    #[error("no root call found for transaction {0}; skipping")]
    MissingOrigin(TransactionId),
}

/// Store-level failure. Fatal to the enclosing batch.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("could not encode JSON column: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("schema migration {name} failed: {reason}")]
    Migration { name: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Errors surfaced by the pipeline orchestrator
#[derive(Error, Debug)]
pub enum EtlError {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
