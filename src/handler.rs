//! Pipeline orchestrator: extract → transform → load for one address
//!
//! Two workflows:
//! - traces: every transaction id the index holds for the address, minus
//!   those already stored, exported with `chifra traces` and loaded with
//!   their call sub-records
//! - transactions: ids newer than a block, exported with
//!   `chifra transactions` and loaded with logs and involved addresses
//!
//! Raw indexer output is captured to a per-address cache file as it is read.
//! The traces workflow reuses that file only when asked to; the transactions
//! workflow reuses it whenever it exists.

use crate::cache::{self, parsed_dump_path, traces_cache_path, transactions_cache_path};
use crate::error::EtlError;
use crate::extractor::{ChifraQuery, IndexerSource, OutputCapture, ParseMode};
use crate::loader::TransactionStore;
use crate::transformer::records::{normalize_address, TransactionAggregate, TransactionId};
use crate::transformer::{transform_trace_result, transform_transaction_result};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Options for [`TrueblocksHandler::refresh_address_traces`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceRefresh {
    /// Write the reconstructed aggregates to disk instead of loading them
    pub debug: bool,
    /// Use an existing trace cache file instead of invoking the indexer
    pub reuse_cache: bool,
}

/// Lower bound for the transactions workflow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SinceBlock {
    /// After the address's most recent stored appearance
    #[default]
    Auto,
    /// Strictly after this block
    Block(u64),
    /// No lower bound
    All,
}

/// What one workflow run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub address: String,
    /// Ids returned by the index
    pub ids_found: usize,
    /// Ids left after filtering and sent to the indexer
    pub ids_requested: usize,
    pub from_cache: bool,
    /// Aggregates reconstructed from the output
    pub aggregates: usize,
    /// Aggregates written to the store
    pub loaded: usize,
    pub dump_path: Option<PathBuf>,
}

pub struct TrueblocksHandler<S, T> {
    source: S,
    store: T,
    cache_dir: PathBuf,
}

impl<S: IndexerSource, T: TransactionStore> TrueblocksHandler<S, T> {
    pub fn new(source: S, store: T, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            store,
            cache_dir: cache_dir.into(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn store(&self) -> &T {
        &self.store
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub async fn refresh_address_traces(
        &mut self,
        address: &str,
        options: TraceRefresh,
    ) -> Result<RefreshReport, EtlError> {
        let address = normalize_address(address);
        let cache_path = traces_cache_path(&self.cache_dir, &address);
        let mut report = RefreshReport {
            address: address.clone(),
            ..Default::default()
        };

        let cached = if options.reuse_cache {
            read_cache(&cache_path)
        } else {
            None
        };

        let result = match cached {
            Some(doc) => {
                log::info!("📂 Using existing trace export for {}", address);
                report.from_cache = true;
                Some(doc)
            }
            None => {
                let ids = self.source.transaction_ids(&address).await;
                report.ids_found = ids.len();

                let existing = self.store.existing_transaction_ids(&ids).await?;
                let new_ids: Vec<TransactionId> =
                    ids.into_iter().filter(|id| !existing.contains(id)).collect();
                report.ids_requested = new_ids.len();
                log::info!(
                    "🔍 Processing {} transactions (of {} total found) for {}",
                    new_ids.len(),
                    report.ids_found,
                    address
                );

                self.export("traces", &new_ids, &cache_path).await?
            }
        };

        let parsed = result
            .as_ref()
            .map(transform_trace_result)
            .unwrap_or_default();

        if options.debug {
            report.aggregates = parsed.len();
            report.dump_path = Some(self.dump(&address, &parsed)?);
            return Ok(report);
        }

        self.load(&mut report, &parsed, true).await?;
        Ok(report)
    }

    pub async fn refresh_address_transactions(
        &mut self,
        address: &str,
        since: SinceBlock,
        local_only: bool,
    ) -> Result<RefreshReport, EtlError> {
        let address = normalize_address(address);
        let cache_path = transactions_cache_path(&self.cache_dir, &address);
        let mut report = RefreshReport {
            address: address.clone(),
            ..Default::default()
        };

        let result = match read_cache(&cache_path) {
            Some(doc) => {
                log::info!("📂 Using existing transaction export for {}", address);
                report.from_cache = true;
                Some(doc)
            }
            None => {
                let ids = self.source.transaction_ids(&address).await;
                report.ids_found = ids.len();

                let lower_bound = match since {
                    SinceBlock::All => None,
                    SinceBlock::Block(block) => Some(block),
                    SinceBlock::Auto => {
                        let chain = self.store.chain();
                        self.store.most_recent_appearance(chain, &address).await?
                    }
                };
                let new_ids: Vec<TransactionId> = match lower_bound {
                    Some(block) => ids.into_iter().filter(|id| id.block_number > block).collect(),
                    None => ids,
                };
                report.ids_requested = new_ids.len();
                log::info!(
                    "🔍 Processing {} transactions (of {} total found, since block {}) for {}",
                    new_ids.len(),
                    report.ids_found,
                    lower_bound.map_or_else(|| "-".to_string(), |b| b.to_string()),
                    address
                );

                self.export("transactions", &new_ids, &cache_path).await?
            }
        };

        let parsed = result
            .as_ref()
            .map(transform_transaction_result)
            .unwrap_or_default();

        if local_only {
            report.aggregates = parsed.len();
            report.dump_path = Some(self.dump(&address, &parsed)?);
            return Ok(report);
        }

        self.load(&mut report, &parsed, false).await?;
        Ok(report)
    }

    /// Run `chifra <function> --articulate --fmt json <ids>`, capturing the
    /// raw output to `cache_path`. No ids means no invocation.
    async fn export(
        &self,
        function: &str,
        ids: &[TransactionId],
        cache_path: &Path,
    ) -> Result<Option<Value>, EtlError> {
        if ids.is_empty() {
            log::info!("Nothing new to export with chifra {}", function);
            return Ok(None);
        }

        let values: Vec<String> = ids.iter().map(TransactionId::to_string).collect();
        let command = ChifraQuery::new(function, values)
            .format("json")
            .flag("articulate")
            .build_for(self.source.tool())?;

        log::info!("⏳ Running chifra {} for {} transaction ids...", function, ids.len());
        let output = self
            .source
            .run(&command, ParseMode::Json, &OutputCapture::overwrite(cache_path))
            .await;
        Ok(output.into_json())
    }

    fn dump(&self, address: &str, parsed: &[TransactionAggregate]) -> Result<PathBuf, EtlError> {
        let path = parsed_dump_path(&self.cache_dir, address);
        cache::save_json(parsed, &path)?;
        log::info!("💾 Wrote {} parsed transactions to {}", parsed.len(), path.display());
        Ok(path)
    }

    async fn load(
        &mut self,
        report: &mut RefreshReport,
        parsed: &[TransactionAggregate],
        include_traces: bool,
    ) -> Result<(), EtlError> {
        report.aggregates = parsed.len();
        let chain = self.store.chain();
        self.store.upsert_address(chain, &report.address).await?;

        log::info!(
            "Adding {} transactions to {} store...",
            parsed.len(),
            self.store.backend_type()
        );
        report.loaded = self.store.insert_batch(parsed, include_traces).await?;
        Ok(())
    }
}

/// A cache file that exists but cannot be read is treated as absent.
fn read_cache(path: &Path) -> Option<Value> {
    match cache::load_json(path) {
        Ok(doc) => doc,
        Err(e) => {
            log::warn!(
                "⚠️  Ignoring unreadable cache file {}: {}",
                path.display(),
                e
            );
            None
        }
    }
}
