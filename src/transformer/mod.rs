//! Reconstruction of per-transaction aggregates from raw indexer output
//!
//! Two input shapes are supported:
//! - trace exports (`traces`): flat call entries addressed by `traceAddress`,
//!   regrouped into one aggregate per transaction (see [`traces`])
//! - transaction exports (`transactions`): one receipt-shaped entry per
//!   transaction, with logs (see [`receipts`])
//!
//! Missing or malformed input never fails the batch: the affected entry or
//! transaction is skipped and a warning is logged.

pub mod raw;
pub mod receipts;
pub mod records;
pub mod traces;

pub use receipts::transform_transaction_result;
pub use records::{
    CallPath, CallSubRecord, Chain, LogSubRecord, TransactionAggregate, TransactionId,
};
pub use traces::{reconstruct_transactions, transform_trace_result};

use crate::error::TransformError;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// The `data` array of an export, if there is one
fn data_entries(result: &Value) -> Option<&Vec<Value>> {
    result.get("data").and_then(Value::as_array)
}

/// Deserialize each entry on its own, dropping the ones that don't fit.
fn parse_entries<T: DeserializeOwned>(entries: &[Value], context: &str) -> Vec<T> {
    entries
        .iter()
        .enumerate()
        .filter_map(|(i, entry)| match T::deserialize(entry) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                log::warn!(
                    "{}",
                    TransformError::MalformedRecord {
                        context: format!("{} #{}", context, i),
                        reason: e.to_string(),
                    }
                );
                log::debug!("Skipped entry: {}", entry);
                None
            }
        })
        .collect()
}

/// A blank address counts as missing. The store only accepts non-empty ones.
fn present_address(address: Option<&str>, context: &str) -> Option<String> {
    match address {
        Some(a) if a.trim().is_empty() => {
            log::warn!(
                "{}",
                TransformError::MalformedRecord {
                    context: context.to_string(),
                    reason: "address is blank".to_string(),
                }
            );
            None
        }
        other => other.map(str::to_string),
    }
}

/// Append unless an address equal up to case is already present
fn push_unique(list: &mut Vec<String>, address: &str) {
    if !list.iter().any(|a| a.eq_ignore_ascii_case(address)) {
        list.push(address.to_string());
    }
}
