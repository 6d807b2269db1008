//! Configuration from environment variables and command-line arguments

use crate::error::ConfigError;
use crate::extractor::query::DEFAULT_TOOL;
use crate::extractor::RunnerSettings;
use crate::handler::{SinceBlock, TraceRefresh};
use crate::transformer::records::Chain;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct EtlConfig {
    /// Indexer executable
    pub chifra_bin: String,

    /// Bounded wait for one indexer invocation
    pub chifra_timeout: Duration,

    /// Retries after a timed-out invocation
    pub chifra_max_retries: u32,

    /// Default capture file for indexer output
    pub chifra_log_path: PathBuf,

    /// Path to SQLite database file
    pub db_path: PathBuf,

    /// Directory holding ordered `.sql` schema files
    pub schema_dir: PathBuf,

    /// Directory for cached exports and parsed dumps
    pub cache_dir: PathBuf,

    pub chain: Chain,
}

impl Default for EtlConfig {
    fn default() -> Self {
        let runner = RunnerSettings::default();
        Self {
            chifra_bin: DEFAULT_TOOL.to_string(),
            chifra_timeout: runner.timeout,
            chifra_max_retries: runner.max_retries,
            chifra_log_path: runner.default_capture_path,
            db_path: PathBuf::from("evm_contracts.db"),
            schema_dir: PathBuf::from("sql"),
            cache_dir: PathBuf::from("tmp"),
            chain: Chain::default(),
        }
    }
}

impl EtlConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `CHIFRA_BIN` (default: chifra)
    /// - `CHIFRA_TIMEOUT_SECS` (default: 3600)
    /// - `CHIFRA_MAX_RETRIES` (default: 2)
    /// - `CHIFRA_LOG_PATH` (default: tmp/trueblocks.log)
    /// - `EVM_ETL_DB_PATH` (default: evm_contracts.db)
    /// - `EVM_ETL_SCHEMA_DIR` (default: sql)
    /// - `EVM_ETL_CACHE_DIR` (default: tmp)
    /// - `EVM_ETL_CHAIN` (default: ETH)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`EtlConfig::from_env`] with an arbitrary variable source.
    /// Unparseable numbers fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let chain = match lookup("EVM_ETL_CHAIN") {
            Some(code) => code.parse::<Chain>().map_err(ConfigError::InvalidValue)?,
            None => defaults.chain,
        };

        let chifra_bin = lookup("CHIFRA_BIN").unwrap_or(defaults.chifra_bin);
        if chifra_bin.trim().is_empty() {
            return Err(ConfigError::InvalidValue("CHIFRA_BIN is empty".to_string()));
        }

        Ok(Self {
            chifra_bin,
            chifra_timeout: lookup("CHIFRA_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.chifra_timeout),
            chifra_max_retries: lookup("CHIFRA_MAX_RETRIES")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.chifra_max_retries),
            chifra_log_path: lookup("CHIFRA_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.chifra_log_path),
            db_path: lookup("EVM_ETL_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            schema_dir: lookup("EVM_ETL_SCHEMA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.schema_dir),
            cache_dir: lookup("EVM_ETL_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            chain,
        })
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            tool: self.chifra_bin.clone(),
            timeout: self.chifra_timeout,
            max_retries: self.chifra_max_retries,
            default_capture_path: self.chifra_log_path.clone(),
            ..RunnerSettings::default()
        }
    }
}

/// What the binary was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EtlCommand {
    Traces {
        address: String,
        options: TraceRefresh,
    },
    Transactions {
        address: String,
        since: SinceBlock,
        local_only: bool,
    },
    Migrate,
}

pub const USAGE: &str = "usage:
  evm_etl traces <address> [--debug] [--reuse]
  evm_etl transactions <address> [--since <block> | --all] [--local-only]
  evm_etl migrate";

impl EtlCommand {
    /// Parse arguments after the program name
    pub fn parse(args: &[String]) -> Result<Self, ConfigError> {
        let command = args
            .first()
            .ok_or_else(|| ConfigError::MissingVariable("command".to_string()))?;
        let rest = &args[1..];

        match command.as_str() {
            "migrate" => Ok(EtlCommand::Migrate),
            "traces" => {
                let address = positional_address(rest)?;
                Ok(EtlCommand::Traces {
                    address,
                    options: TraceRefresh {
                        debug: has_flag(rest, "--debug"),
                        reuse_cache: has_flag(rest, "--reuse"),
                    },
                })
            }
            "transactions" => {
                let address = positional_address(rest)?;
                let since = if has_flag(rest, "--all") {
                    SinceBlock::All
                } else if let Some(idx) = rest.iter().position(|a| a == "--since") {
                    let raw = rest
                        .get(idx + 1)
                        .ok_or_else(|| ConfigError::MissingVariable("--since <block>".to_string()))?;
                    let block = raw.parse().map_err(|_| {
                        ConfigError::InvalidValue(format!("--since expects a block number, got '{}'", raw))
                    })?;
                    SinceBlock::Block(block)
                } else {
                    SinceBlock::Auto
                };
                Ok(EtlCommand::Transactions {
                    address,
                    since,
                    local_only: has_flag(rest, "--local-only"),
                })
            }
            other => Err(ConfigError::InvalidValue(format!("unknown command '{}'", other))),
        }
    }
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn positional_address(args: &[String]) -> Result<String, ConfigError> {
    args.first()
        .filter(|a| !a.starts_with("--") && !a.trim().is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingVariable("address".to_string()))
}
