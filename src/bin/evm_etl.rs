//! EVM ETL runtime
//!
//! Usage:
//!   evm_etl traces <address> [--debug] [--reuse]
//!   evm_etl transactions <address> [--since <block> | --all] [--local-only]
//!   evm_etl migrate
//!
//! Environment variables (also read from `.env`):
//!   CHIFRA_BIN, CHIFRA_TIMEOUT_SECS, CHIFRA_MAX_RETRIES, CHIFRA_LOG_PATH,
//!   EVM_ETL_DB_PATH, EVM_ETL_SCHEMA_DIR, EVM_ETL_CACHE_DIR, EVM_ETL_CHAIN

use dotenv::dotenv;
use env_logger::Env;
use evm_trace_etl::config::{EtlCommand, EtlConfig, USAGE};
use evm_trace_etl::extractor::ChifraRunner;
use evm_trace_etl::loader::schema::applied_versions;
use evm_trace_etl::loader::SqliteStore;
use evm_trace_etl::{RefreshReport, TrueblocksHandler};
use log::{error, info};
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let command = match EtlCommand::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    let config = EtlConfig::from_env()?;
    info!("🚀 EVM ETL");
    info!("   ├─ Database: {}", config.db_path.display());
    info!("   ├─ Chain: {}", config.chain);
    info!("   ├─ Indexer: {}", config.chifra_bin);
    info!("   └─ Cache dir: {}", config.cache_dir.display());

    let mut store = SqliteStore::open_unmigrated(&config.db_path, config.chain)?;
    store.migrate(&config.schema_dir)?;

    if command == EtlCommand::Migrate {
        let versions = applied_versions(store.connection())?;
        info!("✅ Schema up to date ({} files applied)", versions.len());
        for version in &versions {
            info!("   ├─ {}", version);
        }
        return Ok(());
    }

    let runner = ChifraRunner::new(config.runner_settings());
    let mut handler = TrueblocksHandler::new(runner, store, &config.cache_dir);

    let result = match command {
        EtlCommand::Traces { address, options } => {
            handler.refresh_address_traces(&address, options).await
        }
        EtlCommand::Transactions {
            address,
            since,
            local_only,
        } => {
            handler
                .refresh_address_transactions(&address, since, local_only)
                .await
        }
        EtlCommand::Migrate => return Ok(()),
    };

    match result {
        Ok(report) => {
            log_report(&report);
            Ok(())
        }
        Err(e) => {
            error!("❌ Refresh failed: {}", e);
            Err(e.into())
        }
    }
}

fn log_report(report: &RefreshReport) {
    info!("✅ Refresh complete for {}", report.address);
    if report.from_cache {
        info!("   ├─ Source: cached export");
    } else {
        info!(
            "   ├─ Transaction ids: {} found, {} requested",
            report.ids_found, report.ids_requested
        );
    }
    info!("   ├─ Aggregates: {}", report.aggregates);
    match &report.dump_path {
        Some(path) => info!("   └─ Parsed dump: {}", path.display()),
        None => info!("   └─ Loaded: {}", report.loaded),
    }
}
