//! Receipt path: one aggregate per exported transaction, with logs and the
//! set of addresses the transaction touched. Never produces traces.

use super::raw::{RawLog, RawTransaction};
use super::records::{
    could_be_address, is_zero_address, LogSubRecord, TransactionAggregate, TransactionId,
};
use super::{data_entries, parse_entries, present_address, push_unique};
use crate::error::TransformError;
use serde_json::Value;

/// Transform a parsed transaction export (`{"data": [...]}`) into aggregates.
pub fn transform_transaction_result(result: &Value) -> Vec<TransactionAggregate> {
    let Some(data) = data_entries(result) else {
        log::warn!("'data' not found in transaction result");
        return Vec::new();
    };
    let transactions: Vec<RawTransaction> = parse_entries(data, "transaction entry");
    transactions.iter().map(build_aggregate).collect()
}

fn build_aggregate(tx: &RawTransaction) -> TransactionAggregate {
    let id = TransactionId::new(tx.block_number, tx.transaction_index);
    let mut aggregate = TransactionAggregate::new(id);
    aggregate.transaction_hash = tx.hash.clone();
    let context = format!("transaction {}", id);
    aggregate.from_address = present_address(tx.from.as_deref(), &context);
    aggregate.to_address = present_address(tx.to.as_deref(), &context);
    aggregate.value = tx.value.clone();

    if let Some(articulated) = &tx.articulated_tx {
        aggregate.call_name = articulated.name.clone();
        aggregate.call_inputs = articulated.inputs.clone();
        aggregate.call_outputs = articulated.outputs.clone();
    }

    let receipt = tx.receipt.clone().unwrap_or_default();
    if let Some(created) = receipt.contract_address.as_deref() {
        if !created.trim().is_empty() && !is_zero_address(created) {
            aggregate.contracts_created.push(created.to_string());
        }
    }

    let mut involved = Vec::new();
    for address in [&aggregate.from_address, &aggregate.to_address].into_iter().flatten() {
        push_unique(&mut involved, address);
    }
    for address in &aggregate.contracts_created {
        push_unique(&mut involved, address);
    }

    let logs: Vec<RawLog> = parse_entries(&receipt.logs, &format!("log in transaction {}", id));
    for entry in logs {
        if entry.address.trim().is_empty() {
            log::warn!(
                "{}",
                TransformError::MalformedRecord {
                    context: format!("log {} in transaction {}", entry.log_index, id),
                    reason: "address is blank".to_string(),
                }
            );
            continue;
        }
        push_unique(&mut involved, &entry.address);
        if let Some(inputs) = entry.articulated_log.as_ref().and_then(|a| a.inputs.as_ref()) {
            for candidate in argument_strings(inputs) {
                if could_be_address(candidate) {
                    push_unique(&mut involved, candidate);
                }
            }
        }

        aggregate.logs.push(LogSubRecord {
            transaction_id: id,
            log_index: entry.log_index,
            address: entry.address,
            event: entry.articulated_log.and_then(|a| a.name),
            compressed_log: entry.compressed_log,
        });
    }

    aggregate.addresses_involved = involved;
    aggregate
}

/// Top-level string arguments of a decoded log, whether keyed or positional
fn argument_strings(inputs: &Value) -> Vec<&str> {
    match inputs {
        Value::Object(map) => map.values().filter_map(Value::as_str).collect(),
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}
