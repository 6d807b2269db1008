//! End-to-end tests for the traces and transactions workflows
//!
//! The indexer is replaced by an in-test `IndexerSource` that serves canned
//! output, records every command it receives and writes its JSON answers to
//! the requested capture file the way `tee` would.

use async_trait::async_trait;
use evm_trace_etl::error::EtlError;
use evm_trace_etl::extractor::{ChifraOutput, IndexerSource, OutputCapture, ParseMode};
use evm_trace_etl::loader::{SqliteStore, TransactionStore};
use evm_trace_etl::transformer::{Chain, TransactionAggregate, TransactionId};
use evm_trace_etl::{SinceBlock, TraceRefresh, TrueblocksHandler};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tempfile::{tempdir, TempDir};

const SUBJECT: &str = "0x595B34C93AA2C2BA0A38DAEEDE629A0DFBDCC559";
const SENDER: &str = "0x1111111111111111111111111111111111111111";
const CHILD: &str = "0x2222222222222222222222222222222222222222";
const TOKEN: &str = "0x3333333333333333333333333333333333333333";

struct FakeIndexer {
    ids: Vec<String>,
    documents: HashMap<String, Value>,
    commands: Mutex<Vec<String>>,
}

impl FakeIndexer {
    fn new(ids: &[&str]) -> Self {
        Self {
            ids: ids.iter().map(|s| s.to_string()).collect(),
            documents: HashMap::new(),
            commands: Mutex::new(Vec::new()),
        }
    }

    fn answering(mut self, function: &str, doc: Value) -> Self {
        self.documents.insert(function.to_string(), doc);
        self
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl IndexerSource for FakeIndexer {
    fn tool(&self) -> &str {
        "chifra"
    }

    async fn run(&self, command: &str, mode: ParseMode, capture: &OutputCapture) -> ChifraOutput {
        self.commands.lock().unwrap().push(command.to_string());
        let function = command.split_whitespace().nth(1).unwrap_or_default();

        match mode {
            ParseMode::Lines => ChifraOutput::Lines(self.ids.clone()),
            ParseMode::Json => match self.documents.get(function) {
                Some(doc) => {
                    if let OutputCapture::File { path, .. } = capture {
                        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                        std::fs::write(path, doc.to_string()).unwrap();
                    }
                    ChifraOutput::Json(doc.clone())
                }
                None => ChifraOutput::Nothing,
            },
        }
    }
}

fn root(block: u64, index: u64, from: &str) -> Value {
    json!({
        "blockNumber": block,
        "transactionIndex": index,
        "transactionHash": format!("0x{:x}{:x}", block, index),
        "traceAddress": [],
        "action": {"from": from, "to": SUBJECT, "value": "0", "callType": "call"},
        "result": {"output": "0x"},
        "compressedTrace": "newDao(string)",
        "articulatedTrace": {"name": "newDao", "inputs": {"_name": "omega"}}
    })
}

fn creation(block: u64, index: u64, path: &str) -> Value {
    json!({
        "blockNumber": block,
        "transactionIndex": index,
        "traceAddress": path,
        "action": {"from": SUBJECT, "value": "0", "callType": "creation"},
        "result": {"newContract": CHILD},
        "compressedTrace": ""
    })
}

fn call(block: u64, index: u64, path: &str) -> Value {
    json!({
        "blockNumber": block,
        "transactionIndex": index,
        "traceAddress": path,
        "action": {"from": SUBJECT, "to": TOKEN, "value": "0", "callType": "call"},
        "result": {"output": "0x01"},
        "compressedTrace": "initialize()"
    })
}

fn receipt(block: u64, index: u64) -> Value {
    json!({
        "blockNumber": block,
        "transactionIndex": index,
        "hash": format!("0x{:x}{:x}", block, index),
        "from": SENDER,
        "to": SUBJECT,
        "value": "0",
        "articulatedTx": {"name": "vote"},
        "receipt": {
            "contractAddress": "0x0000000000000000000000000000000000000000",
            "logs": [{
                "logIndex": 0,
                "address": SUBJECT,
                "articulatedLog": {"name": "CastVote", "inputs": {"voter": SENDER}},
                "compressedLog": "CastVote(0x11..)"
            }]
        }
    })
}

fn stored_aggregate(block: u64, index: u64, from: &str) -> TransactionAggregate {
    let mut agg = TransactionAggregate::new(TransactionId::new(block, index));
    agg.from_address = Some(from.to_string());
    agg.to_address = Some(TOKEN.to_string());
    agg
}

async fn handler_with(
    indexer: FakeIndexer,
    preload: &[TransactionAggregate],
) -> (TrueblocksHandler<FakeIndexer, SqliteStore>, TempDir) {
    let dir = tempdir().unwrap();
    let mut store = SqliteStore::open_in_memory(Chain::Mainnet).unwrap();
    store.insert_batch(preload, true).await.unwrap();
    (TrueblocksHandler::new(indexer, store, dir.path().join("tmp")), dir)
}

fn count(handler: &TrueblocksHandler<FakeIndexer, SqliteStore>, table: &str) -> i64 {
    handler
        .store()
        .connection()
        .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
        .unwrap()
}

fn read_dump(path: &Path) -> Vec<TransactionAggregate> {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_traces_workflow_skips_stored_ids_and_loads_the_rest() {
    let indexer = FakeIndexer::new(&["100.0", "101.1"]).answering(
        "traces",
        json!({"data": [root(101, 1, SENDER), creation(101, 1, "0"), call(101, 1, "1")]}),
    );
    let (mut handler, _dir) = handler_with(indexer, &[stored_aggregate(100, 0, SENDER)]).await;

    let report = handler
        .refresh_address_traces(SUBJECT, TraceRefresh::default())
        .await
        .unwrap();

    assert_eq!(report.address, SUBJECT.to_lowercase());
    assert_eq!(report.ids_found, 2);
    assert_eq!(report.ids_requested, 1);
    assert_eq!(report.aggregates, 1);
    assert_eq!(report.loaded, 1);
    assert!(!report.from_cache);

    let commands = handler.source().commands();
    assert_eq!(commands.len(), 2);
    assert!(commands[0].starts_with(&format!("chifra list {}", SUBJECT.to_lowercase())));
    assert_eq!(commands[1], "chifra traces --articulate --fmt json 101.1");

    assert_eq!(count(&handler, "blockchain_transactions"), 2);
    assert_eq!(count(&handler, "blockchain_traces"), 1);
    assert_eq!(count(&handler, "transaction_contracts_created"), 1);

    let cache = handler
        .cache_dir()
        .join(format!("trueblocks_traces_{}.json", SUBJECT.to_lowercase()));
    assert!(cache.exists());
}

#[tokio::test]
async fn test_traces_rerun_is_idempotent() {
    let doc = json!({"data": [root(101, 1, SENDER), call(101, 1, "1")]});
    let indexer = FakeIndexer::new(&["101.1"]).answering("traces", doc);
    let (mut handler, _dir) = handler_with(indexer, &[]).await;

    handler
        .refresh_address_traces(SUBJECT, TraceRefresh::default())
        .await
        .unwrap();
    // second run reuses the capture written by the first
    let report = handler
        .refresh_address_traces(
            SUBJECT,
            TraceRefresh {
                debug: false,
                reuse_cache: true,
            },
        )
        .await
        .unwrap();

    assert!(report.from_cache);
    assert_eq!(report.loaded, 1);
    assert_eq!(handler.source().commands().len(), 2);
    assert_eq!(count(&handler, "blockchain_transactions"), 1);
    assert_eq!(count(&handler, "blockchain_traces"), 1);
}

#[tokio::test]
async fn test_reuse_without_cache_file_runs_the_indexer() {
    let indexer = FakeIndexer::new(&["5.0"]).answering("traces", json!({"data": [root(5, 0, SENDER)]}));
    let (mut handler, _dir) = handler_with(indexer, &[]).await;

    let report = handler
        .refresh_address_traces(
            SUBJECT,
            TraceRefresh {
                debug: false,
                reuse_cache: true,
            },
        )
        .await
        .unwrap();
    assert!(!report.from_cache);
    assert_eq!(report.loaded, 1);
}

#[tokio::test]
async fn test_unreadable_cache_falls_back_to_indexer() {
    let indexer = FakeIndexer::new(&["5.0"]).answering("traces", json!({"data": [root(5, 0, SENDER)]}));
    let (mut handler, _dir) = handler_with(indexer, &[]).await;

    let cache = handler
        .cache_dir()
        .join(format!("trueblocks_traces_{}.json", SUBJECT.to_lowercase()));
    std::fs::create_dir_all(cache.parent().unwrap()).unwrap();
    std::fs::write(&cache, "{ truncated").unwrap();

    let report = handler
        .refresh_address_traces(
            SUBJECT,
            TraceRefresh {
                debug: false,
                reuse_cache: true,
            },
        )
        .await
        .unwrap();
    assert!(!report.from_cache);
    assert_eq!(handler.source().commands().len(), 2);
    assert_eq!(report.loaded, 1);
}

#[tokio::test]
async fn test_debug_mode_dumps_without_loading() {
    let indexer = FakeIndexer::new(&["101.1"]).answering(
        "traces",
        json!({"data": [root(101, 1, SENDER), creation(101, 1, "0")]}),
    );
    let (mut handler, _dir) = handler_with(indexer, &[]).await;

    let report = handler
        .refresh_address_traces(
            SUBJECT,
            TraceRefresh {
                debug: true,
                reuse_cache: false,
            },
        )
        .await
        .unwrap();

    let dump = report.dump_path.expect("debug run writes a dump");
    assert!(dump.ends_with(format!("trueblocks_{}_parsed.json", SUBJECT.to_lowercase())));
    let parsed = read_dump(&dump);
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].contracts_created, vec![CHILD.to_string()]);

    assert_eq!(report.loaded, 0);
    assert_eq!(count(&handler, "blockchain_transactions"), 0);
    assert_eq!(count(&handler, "blockchain_addresses"), 0);
}

#[tokio::test]
async fn test_nothing_new_issues_no_export() {
    let indexer = FakeIndexer::new(&["100.0"]);
    let (mut handler, _dir) = handler_with(indexer, &[stored_aggregate(100, 0, SENDER)]).await;

    let report = handler
        .refresh_address_traces(SUBJECT, TraceRefresh::default())
        .await
        .unwrap();

    assert_eq!(report.ids_requested, 0);
    assert_eq!(report.loaded, 0);
    assert_eq!(handler.source().commands().len(), 1);
}

#[tokio::test]
async fn test_blank_addresses_do_not_sink_the_batch() {
    let mut creation_root = root(2, 0, SENDER);
    creation_root["action"]["to"] = json!("");
    let indexer = FakeIndexer::new(&["1.0", "2.0", "3.0"]).answering(
        "traces",
        json!({"data": [root(1, 0, SENDER), creation_root, root(3, 0, "")]}),
    );
    let (mut handler, _dir) = handler_with(indexer, &[]).await;

    let report = handler
        .refresh_address_traces(SUBJECT, TraceRefresh::default())
        .await
        .unwrap();

    assert_eq!(report.loaded, 3);
    assert_eq!(count(&handler, "blockchain_transactions"), 3);
    let missing: (i64, i64) = handler
        .store()
        .connection()
        .query_row(
            "SELECT SUM(to_address_id IS NULL), SUM(from_address_id IS NULL)
             FROM blockchain_transactions",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(missing, (1, 1));
}

#[tokio::test]
async fn test_persistence_failure_surfaces_and_rolls_back() {
    let indexer = FakeIndexer::new(&["7.0", "8.0"]).answering(
        "traces",
        json!({"data": [root(7, 0, SENDER), root(8, 0, SENDER)]}),
    );
    let (mut handler, _dir) = handler_with(indexer, &[]).await;
    handler
        .store()
        .connection()
        .execute_batch(
            "CREATE TRIGGER reject_block_8 BEFORE INSERT ON blockchain_transactions
             WHEN NEW.block_number = 8
             BEGIN SELECT RAISE(ABORT, 'block 8 rejected'); END;",
        )
        .unwrap();

    let err = handler
        .refresh_address_traces(SUBJECT, TraceRefresh::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EtlError::Persistence(_)));
    assert_eq!(count(&handler, "blockchain_transactions"), 0);
}

#[tokio::test]
async fn test_transactions_since_explicit_block() {
    let indexer = FakeIndexer::new(&["99.0", "100.1", "101.0"])
        .answering("transactions", json!({"data": [receipt(101, 0)]}));
    let (mut handler, _dir) = handler_with(indexer, &[]).await;

    let report = handler
        .refresh_address_transactions(SUBJECT, SinceBlock::Block(100), false)
        .await
        .unwrap();

    assert_eq!(report.ids_found, 3);
    assert_eq!(report.ids_requested, 1);
    assert_eq!(
        handler.source().commands()[1],
        "chifra transactions --articulate --fmt json 101.0"
    );
    assert_eq!(report.loaded, 1);
    assert_eq!(count(&handler, "blockchain_logs"), 1);
    assert_eq!(count(&handler, "blockchain_traces"), 0);
    assert_eq!(count(&handler, "transaction_addresses_involved"), 2);
}

#[tokio::test]
async fn test_transactions_since_most_recent_appearance() {
    let indexer = FakeIndexer::new(&["140.0", "150.0", "151.2"])
        .answering("transactions", json!({"data": [receipt(151, 2)]}));
    let (mut handler, _dir) = handler_with(indexer, &[stored_aggregate(150, 0, SUBJECT)]).await;

    let report = handler
        .refresh_address_transactions(SUBJECT, SinceBlock::Auto, false)
        .await
        .unwrap();

    assert_eq!(report.ids_requested, 1);
    assert_eq!(
        handler.source().commands()[1],
        "chifra transactions --articulate --fmt json 151.2"
    );
    assert_eq!(count(&handler, "blockchain_transactions"), 2);
}

#[tokio::test]
async fn test_transactions_auto_without_history_takes_everything() {
    let indexer = FakeIndexer::new(&["1.0", "2.0"])
        .answering("transactions", json!({"data": [receipt(1, 0), receipt(2, 0)]}));
    let (mut handler, _dir) = handler_with(indexer, &[]).await;

    let report = handler
        .refresh_address_transactions(SUBJECT, SinceBlock::Auto, false)
        .await
        .unwrap();
    assert_eq!(report.ids_requested, 2);
    assert_eq!(report.loaded, 2);
}

#[tokio::test]
async fn test_transactions_all_ignores_history() {
    let indexer = FakeIndexer::new(&["140.0", "151.2"])
        .answering("transactions", json!({"data": [receipt(140, 0), receipt(151, 2)]}));
    let (mut handler, _dir) = handler_with(indexer, &[stored_aggregate(150, 0, SUBJECT)]).await;

    let report = handler
        .refresh_address_transactions(SUBJECT, SinceBlock::All, false)
        .await
        .unwrap();
    assert_eq!(report.ids_requested, 2);
    assert_eq!(
        handler.source().commands()[1],
        "chifra transactions --articulate --fmt json 140.0 151.2"
    );
}

#[tokio::test]
async fn test_transactions_local_only_and_cache_reuse() {
    let indexer = FakeIndexer::new(&["10.0"]).answering("transactions", json!({"data": [receipt(10, 0)]}));
    let (mut handler, _dir) = handler_with(indexer, &[]).await;

    let first = handler
        .refresh_address_transactions(SUBJECT, SinceBlock::All, true)
        .await
        .unwrap();
    let dump = first.dump_path.expect("local-only run writes a dump");
    assert_eq!(read_dump(&dump).len(), 1);
    assert_eq!(count(&handler, "blockchain_transactions"), 0);

    // the capture from the first run short-circuits the indexer
    let second = handler
        .refresh_address_transactions(SUBJECT, SinceBlock::All, false)
        .await
        .unwrap();
    assert!(second.from_cache);
    assert_eq!(second.loaded, 1);
    assert_eq!(handler.source().commands().len(), 2);
    assert_eq!(count(&handler, "blockchain_transactions"), 1);
}

#[tokio::test]
async fn test_indexer_failure_loads_nothing() {
    // no canned document: the export degrades to no output
    let indexer = FakeIndexer::new(&["10.0"]);
    let (mut handler, _dir) = handler_with(indexer, &[]).await;

    let report = handler
        .refresh_address_transactions(SUBJECT, SinceBlock::All, false)
        .await
        .unwrap();
    assert_eq!(report.ids_requested, 1);
    assert_eq!(report.aggregates, 0);
    assert_eq!(report.loaded, 0);
    // the subject address is still recorded
    assert_eq!(count(&handler, "blockchain_addresses"), 1);
}
