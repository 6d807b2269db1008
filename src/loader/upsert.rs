//! Row-level upserts
//!
//! Every cross-reference goes through [`upsert_address`], a single
//! `INSERT .. ON CONFLICT .. RETURNING` statement, so concurrent first
//! references to one address collapse onto one row. Callers own the
//! surrounding transaction.

use crate::error::PersistenceError;
use crate::transformer::records::{
    normalize_address, CallSubRecord, Chain, LogSubRecord, TransactionAggregate,
};
use rusqlite::{params, Connection};
use serde_json::Value;

/// Canonical address row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRow {
    pub id: i64,
    pub chain: String,
    pub address: String,
}

pub fn upsert_address(
    conn: &Connection,
    chain: Chain,
    address: &str,
) -> Result<AddressRow, PersistenceError> {
    let normalized = normalize_address(address);
    let row = conn.query_row(
        "INSERT INTO blockchain_addresses (chain, address)
         VALUES (?1, ?2)
         ON CONFLICT(chain, address) DO UPDATE SET chain = excluded.chain
         RETURNING id, chain, address",
        params![chain.as_str(), normalized],
        |row| {
            Ok(AddressRow {
                id: row.get(0)?,
                chain: row.get(1)?,
                address: row.get(2)?,
            })
        },
    )?;
    Ok(row)
}

fn address_id(
    conn: &Connection,
    chain: Chain,
    address: Option<&str>,
) -> Result<Option<i64>, PersistenceError> {
    match address {
        Some(address) => Ok(Some(upsert_address(conn, chain, address)?.id)),
        None => Ok(None),
    }
}

fn json_column(value: Option<&Value>) -> Result<Option<String>, PersistenceError> {
    value
        .map(serde_json::to_string)
        .transpose()
        .map_err(PersistenceError::from)
}

/// Fetch-or-create a log row. Returns true when a new row was written.
pub fn upsert_log(
    conn: &Connection,
    chain: Chain,
    record: &LogSubRecord,
) -> Result<bool, PersistenceError> {
    let address_id = upsert_address(conn, chain, &record.address)?.id;

    let inserted = conn.execute(
        "INSERT INTO blockchain_logs (
            log_id, transaction_id, log_index, address_id, event, compressed_log
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(log_id) DO NOTHING",
        params![
            record.id(),
            record.transaction_id.to_string(),
            record.log_index as i64,
            address_id,
            record.event,
            record.compressed_log,
        ],
    )?;

    log::debug!("log {} ({})", record.id(), if inserted > 0 { "new" } else { "exists" });
    Ok(inserted > 0)
}

/// Fetch-or-create a trace row. Returns true when a new row was written.
pub fn upsert_trace(
    conn: &Connection,
    chain: Chain,
    record: &CallSubRecord,
) -> Result<bool, PersistenceError> {
    let from_id = address_id(conn, chain, record.from_address.as_deref())?;
    let to_id = address_id(conn, chain, record.to_address.as_deref())?;
    let delegate_id = address_id(conn, chain, record.delegate.as_deref())?;

    let inserted = conn.execute(
        "INSERT INTO blockchain_traces (
            trace_id, transaction_id, call_path, from_address_id, to_address_id,
            value, compressed_trace, error, outputs, delegate_address_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(trace_id) DO NOTHING",
        params![
            record.id(),
            record.transaction_id.to_string(),
            record.call_path.as_str(),
            from_id,
            to_id,
            record.value,
            record.compressed_trace,
            record.error,
            json_column(record.outputs.as_ref())?,
            delegate_id,
        ],
    )?;

    log::debug!("trace {} ({})", record.id(), if inserted > 0 { "new" } else { "exists" });
    Ok(inserted > 0)
}

/// Create or refresh a transaction row and merge its relationships.
///
/// Scalars are overwritten on conflict (`created_at` is kept). Created
/// contracts, involved addresses, logs and (when `include_traces`) traces
/// are union-merged: linking something already linked is a no-op.
pub fn upsert_transaction(
    conn: &Connection,
    chain: Chain,
    aggregate: &TransactionAggregate,
    include_traces: bool,
) -> Result<(), PersistenceError> {
    let transaction_id = aggregate.transaction_id.to_string();
    let from_id = address_id(conn, chain, aggregate.from_address.as_deref())?;
    let to_id = address_id(conn, chain, aggregate.to_address.as_deref())?;
    let now = chrono::Utc::now().timestamp();

    conn.execute(
        "INSERT INTO blockchain_transactions (
            transaction_id, transaction_hash, block_number, from_address_id, to_address_id,
            value, error, call_name, call_inputs, call_outputs, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
        ON CONFLICT(transaction_id) DO UPDATE SET
            transaction_hash = excluded.transaction_hash,
            block_number = excluded.block_number,
            from_address_id = excluded.from_address_id,
            to_address_id = excluded.to_address_id,
            value = excluded.value,
            error = excluded.error,
            call_name = excluded.call_name,
            call_inputs = excluded.call_inputs,
            call_outputs = excluded.call_outputs,
            updated_at = excluded.updated_at",
        params![
            transaction_id,
            aggregate.transaction_hash,
            aggregate.block_number as i64,
            from_id,
            to_id,
            aggregate.value,
            aggregate.error,
            aggregate.call_name,
            json_column(aggregate.call_inputs.as_ref())?,
            json_column(aggregate.call_outputs.as_ref())?,
            now,
        ],
    )?;

    for contract in &aggregate.contracts_created {
        let id = upsert_address(conn, chain, contract)?.id;
        conn.execute(
            "INSERT OR IGNORE INTO transaction_contracts_created (transaction_id, address_id)
             VALUES (?1, ?2)",
            params![transaction_id, id],
        )?;
    }

    for involved in &aggregate.addresses_involved {
        let id = upsert_address(conn, chain, involved)?.id;
        conn.execute(
            "INSERT OR IGNORE INTO transaction_addresses_involved (transaction_id, address_id)
             VALUES (?1, ?2)",
            params![transaction_id, id],
        )?;
    }

    for record in &aggregate.logs {
        upsert_log(conn, chain, record)?;
    }

    if include_traces {
        for record in &aggregate.traces {
            upsert_trace(conn, chain, record)?;
        }
    }

    log::debug!(
        "upserted transaction {} ({} logs, {} traces{})",
        transaction_id,
        aggregate.logs.len(),
        aggregate.traces.len(),
        if include_traces { "" } else { " skipped" }
    );
    Ok(())
}
