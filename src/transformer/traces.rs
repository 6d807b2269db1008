//! Trace path: rebuild per-transaction aggregates from flat call entries
//!
//! ```text
//! data[] ─► RawCallEntry ─► group by <block>.<index> ─► origin (root call)
//!                                                    ├─► contracts created
//!                                                    └─► calls (+ shallow delegate)
//! ```

use super::raw::{CallType, RawCallEntry};
use super::records::{normalize_address, CallSubRecord, TransactionAggregate, TransactionId};
use super::{data_entries, parse_entries, present_address, push_unique};
use crate::error::TransformError;
use serde_json::Value;
use std::collections::BTreeMap;

/// Transform a parsed trace export (`{"data": [...]}`) into aggregates.
pub fn transform_trace_result(result: &Value) -> Vec<TransactionAggregate> {
    let Some(data) = data_entries(result) else {
        log::warn!("'data' not found in trace result");
        return Vec::new();
    };
    let entries: Vec<RawCallEntry> = parse_entries(data, "trace entry");
    reconstruct_transactions(entries)
}

/// One aggregate per transaction id that has a root call. Groups without a
/// root are dropped with a warning; the rest of the batch is unaffected.
pub fn reconstruct_transactions(entries: Vec<RawCallEntry>) -> Vec<TransactionAggregate> {
    let mut groups: BTreeMap<TransactionId, Vec<RawCallEntry>> = BTreeMap::new();
    for entry in entries {
        let id = TransactionId::new(entry.block_number, entry.transaction_index);
        groups.entry(id).or_default().push(entry);
    }

    let total = groups.len();
    let aggregates: Vec<TransactionAggregate> = groups
        .into_iter()
        .filter_map(|(id, group)| build_aggregate(id, &group))
        .collect();

    log::debug!(
        "Reconstructed {} of {} transactions from trace entries",
        aggregates.len(),
        total
    );
    aggregates
}

fn build_aggregate(id: TransactionId, group: &[RawCallEntry]) -> Option<TransactionAggregate> {
    let origins: Vec<&RawCallEntry> = group.iter().filter(|e| e.is_root()).collect();
    let origin = match origins.as_slice() {
        [] => {
            log::warn!("{}", TransformError::MissingOrigin(id));
            return None;
        }
        [only] => *only,
        [first, ..] => {
            // repeated roots have so far been identical copies
            log::warn!(
                "Found {} root calls for transaction {}; expected 1. Using the first one found",
                origins.len(),
                id
            );
            *first
        }
    };

    let mut aggregate = TransactionAggregate::new(id);
    aggregate.block_number = origin.block_number;
    aggregate.transaction_hash = origin.transaction_hash.clone();
    aggregate.error = origin.error.clone();
    if let Some(action) = &origin.action {
        let context = format!("root call of transaction {}", id);
        aggregate.from_address = present_address(action.from.as_deref(), &context);
        aggregate.to_address = present_address(action.to.as_deref(), &context);
        aggregate.value = action.value.clone();
    }
    if let Some(articulated) = &origin.articulated_trace {
        aggregate.call_name = articulated.name.clone();
        aggregate.call_inputs = articulated.inputs.clone();
        aggregate.call_outputs = articulated.outputs.clone();
    }

    aggregate.contracts_created = contracts_created(id, group);
    aggregate.traces = call_records(id, group);

    Some(aggregate)
}

fn contracts_created(id: TransactionId, group: &[RawCallEntry]) -> Vec<String> {
    let mut created = Vec::new();
    for entry in group
        .iter()
        .filter(|e| e.call_type() == Some(CallType::Creation))
    {
        match entry.result.as_ref().and_then(|r| r.new_contract.as_deref()) {
            Some(address) if !address.trim().is_empty() => push_unique(&mut created, address),
            _ => log::warn!(
                "{}",
                TransformError::MalformedRecord {
                    context: format!("creation entry in transaction {}", id),
                    reason: "result.newContract is missing".to_string(),
                }
            ),
        }
    }
    created
}

fn non_blank(address: &Option<String>) -> Option<&str> {
    address.as_deref().filter(|a| !a.trim().is_empty())
}

/// A delegatecall eligible for matching, with the keys matching needs.
struct DelegateCandidate<'a> {
    entry: &'a RawCallEntry,
    from: String,
    to: &'a str,
}

fn call_records(id: TransactionId, group: &[RawCallEntry]) -> Vec<CallSubRecord> {
    let delegates: Vec<DelegateCandidate> = group
        .iter()
        .filter(|e| !e.is_root() && e.call_type() == Some(CallType::Delegatecall))
        .filter_map(|entry| {
            let action = entry.action.as_ref()?;
            match (non_blank(&action.from), non_blank(&action.to)) {
                (Some(from), Some(to)) => Some(DelegateCandidate {
                    entry,
                    from: normalize_address(from),
                    to,
                }),
                _ => {
                    log::warn!(
                        "{}",
                        TransformError::MalformedRecord {
                            context: format!("delegatecall entry in transaction {}", id),
                            reason: "action.from or action.to is missing or blank".to_string(),
                        }
                    );
                    None
                }
            }
        })
        .collect();

    let mut calls = Vec::new();
    for entry in group
        .iter()
        .filter(|e| !e.is_root() && e.call_type() == Some(CallType::Call))
    {
        let (Some(path), Some(action)) = (entry.trace_address.as_ref(), entry.action.as_ref()) else {
            continue;
        };
        let context = format!("call {} in transaction {}", path, id);
        let Some(to) = non_blank(&action.to) else {
            log::warn!(
                "{}",
                TransformError::MalformedRecord {
                    context,
                    reason: "action.to is missing or blank".to_string(),
                }
            );
            continue;
        };

        let destination = normalize_address(to);
        let delegate = delegates
            .iter()
            .find(|d| {
                d.from == destination
                    && d.entry.compressed() == entry.compressed()
                    && d.entry
                        .trace_address
                        .as_ref()
                        .map(|p| p.is_strict_descendant_of(path))
                        .unwrap_or(false)
            })
            .map(|d| d.to.to_string());

        calls.push(CallSubRecord {
            transaction_id: id,
            call_path: path.clone(),
            from_address: present_address(action.from.as_deref(), &context),
            to_address: Some(to.to_string()),
            value: action.value.clone(),
            compressed_trace: entry.compressed().to_string(),
            error: entry.error.clone(),
            outputs: entry.result.as_ref().and_then(|r| r.output.clone()),
            delegate,
        });
    }
    calls
}
