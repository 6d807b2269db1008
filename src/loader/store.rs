use super::schema::{apply_embedded_migrations, run_schema_migrations};
use super::sqlite_pragma::apply_optimized_pragmas;
use super::upsert::{self, AddressRow};
use crate::error::PersistenceError;
use crate::transformer::records::{normalize_address, Chain, TransactionAggregate, TransactionId};
use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, TransactionBehavior};
use std::collections::HashSet;
use std::path::Path;

/// Bound on `IN (..)` parameters per lookup query
const LOOKUP_CHUNK: usize = 500;

/// Repository the pipeline loads into
#[async_trait]
pub trait TransactionStore: Send {
    /// Fetch-or-create the canonical row for an address
    async fn upsert_address(&mut self, chain: Chain, address: &str)
        -> Result<AddressRow, PersistenceError>;

    /// Upsert every aggregate in one atomic scope; returns how many were processed
    async fn insert_batch(
        &mut self,
        aggregates: &[TransactionAggregate],
        include_traces: bool,
    ) -> Result<usize, PersistenceError>;

    /// The subset of `ids` already stored
    async fn existing_transaction_ids(
        &mut self,
        ids: &[TransactionId],
    ) -> Result<HashSet<TransactionId>, PersistenceError>;

    /// Highest block of any stored transaction referencing the address
    async fn most_recent_appearance(
        &mut self,
        chain: Chain,
        address: &str,
    ) -> Result<Option<u64>, PersistenceError>;

    /// Chain used for addresses written by `insert_batch`
    fn chain(&self) -> Chain;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

pub struct SqliteStore {
    conn: Connection,
    chain: Chain,
}

impl SqliteStore {
    /// Open (or create) a database file and bring its schema up to date
    /// from the embedded schema files.
    pub fn open(db_path: impl AsRef<Path>, chain: Chain) -> Result<Self, PersistenceError> {
        let mut store = Self::open_unmigrated(db_path, chain)?;
        apply_embedded_migrations(&mut store.conn)?;
        Ok(store)
    }

    /// Open without touching the schema
    pub fn open_unmigrated(db_path: impl AsRef<Path>, chain: Chain) -> Result<Self, PersistenceError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PersistenceError::Migration {
                name: parent.display().to_string(),
                reason: format!("failed to create database directory: {}", e),
            })?;
        }

        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;
        log::info!("✅ SQLite store opened: {} (chain {})", db_path.display(), chain);
        Ok(Self { conn, chain })
    }

    pub fn open_in_memory(chain: Chain) -> Result<Self, PersistenceError> {
        let mut conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        apply_embedded_migrations(&mut conn)?;
        Ok(Self { conn, chain })
    }

    /// Apply schema files from a directory, falling back to the embedded
    /// copies when the directory does not exist.
    pub fn migrate(&mut self, schema_dir: impl AsRef<Path>) -> Result<usize, PersistenceError> {
        let schema_dir = schema_dir.as_ref();
        if schema_dir.is_dir() {
            run_schema_migrations(&mut self.conn, schema_dir)
        } else {
            log::warn!(
                "Schema directory {} not found, using embedded schema",
                schema_dir.display()
            );
            apply_embedded_migrations(&mut self.conn)
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn insert_batch_sync(
        &mut self,
        aggregates: &[TransactionAggregate],
        include_traces: bool,
    ) -> Result<usize, PersistenceError> {
        if aggregates.is_empty() {
            return Ok(0);
        }

        // take the write lock up front; a deferred upgrade can fail under contention
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        for aggregate in aggregates {
            upsert::upsert_transaction(&tx, self.chain, aggregate, include_traces)?;
        }
        tx.commit()?;

        log::info!(
            "✅ Loaded {} transactions into SQLite (traces {})",
            aggregates.len(),
            if include_traces { "included" } else { "skipped" }
        );
        Ok(aggregates.len())
    }

    fn existing_ids_sync(
        &self,
        ids: &[TransactionId],
    ) -> Result<HashSet<TransactionId>, PersistenceError> {
        let mut found = HashSet::new();
        for chunk in ids.chunks(LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT transaction_id FROM blockchain_transactions WHERE transaction_id IN ({})",
                placeholders
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter().map(|id| id.to_string())), |row| {
                row.get::<_, String>(0)
            })?;
            for row in rows {
                let raw = row?;
                match raw.parse::<TransactionId>() {
                    Ok(id) => {
                        found.insert(id);
                    }
                    Err(e) => log::warn!("Ignoring stored transaction id {}: {}", raw, e),
                }
            }
        }
        Ok(found)
    }

    fn most_recent_appearance_sync(
        &self,
        chain: Chain,
        address: &str,
    ) -> Result<Option<u64>, PersistenceError> {
        let block: Option<i64> = self.conn.query_row(
            "SELECT MAX(t.block_number)
             FROM blockchain_transactions t
             JOIN blockchain_addresses a ON a.chain = ?1 AND a.address = ?2
             WHERE t.from_address_id = a.id
                OR t.to_address_id = a.id
                OR EXISTS (SELECT 1 FROM transaction_contracts_created c
                           WHERE c.transaction_id = t.transaction_id AND c.address_id = a.id)
                OR EXISTS (SELECT 1 FROM transaction_addresses_involved i
                           WHERE i.transaction_id = t.transaction_id AND i.address_id = a.id)",
            params![chain.as_str(), normalize_address(address)],
            |row| row.get(0),
        )?;
        Ok(block.map(|b| b as u64))
    }
}

#[async_trait]
impl TransactionStore for SqliteStore {
    async fn upsert_address(
        &mut self,
        chain: Chain,
        address: &str,
    ) -> Result<AddressRow, PersistenceError> {
        upsert::upsert_address(&self.conn, chain, address)
    }

    async fn insert_batch(
        &mut self,
        aggregates: &[TransactionAggregate],
        include_traces: bool,
    ) -> Result<usize, PersistenceError> {
        self.insert_batch_sync(aggregates, include_traces)
    }

    async fn existing_transaction_ids(
        &mut self,
        ids: &[TransactionId],
    ) -> Result<HashSet<TransactionId>, PersistenceError> {
        self.existing_ids_sync(ids)
    }

    async fn most_recent_appearance(
        &mut self,
        chain: Chain,
        address: &str,
    ) -> Result<Option<u64>, PersistenceError> {
        self.most_recent_appearance_sync(chain, address)
    }

    fn chain(&self) -> Chain {
        self.chain
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}
