//! On-disk copies of indexer output and parsed dumps, keyed by address

use crate::error::EtlError;
use crate::extractor::runner::decode_output;
use crate::transformer::records::normalize_address;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Raw `chifra traces` output for an address
pub fn traces_cache_path(dir: &Path, address: &str) -> PathBuf {
    dir.join(format!("trueblocks_traces_{}.json", normalize_address(address)))
}

/// Raw `chifra transactions` output for an address
pub fn transactions_cache_path(dir: &Path, address: &str) -> PathBuf {
    dir.join(format!("trueblocks_txns_{}.json", normalize_address(address)))
}

/// Reconstructed aggregates written in debug / local-only runs
pub fn parsed_dump_path(dir: &Path, address: &str) -> PathBuf {
    dir.join(format!("trueblocks_{}_parsed.json", normalize_address(address)))
}

/// Load a cached indexer document.
///
/// Returns `Ok(None)` when there is no file. The text goes through the same
/// decoding as live indexer output.
pub fn load_json(path: &Path) -> Result<Option<Value>, EtlError> {
    if !path.is_file() {
        return Ok(None);
    }

    let bytes = fs::read(path)?;
    let value = serde_json::from_str(&decode_output(&bytes))?;
    log::info!("📂 Loaded cached indexer output from {}", path.display());
    Ok(Some(value))
}

/// Pretty-print `value` to `path`, creating the parent directory
pub fn save_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<(), EtlError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;

    log::debug!("Saved {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_cache_names_use_lowercase_address() {
        let dir = Path::new("tmp");
        assert_eq!(
            traces_cache_path(dir, "0xABC"),
            PathBuf::from("tmp/trueblocks_traces_0xabc.json")
        );
        assert_eq!(
            transactions_cache_path(dir, "0xabc"),
            PathBuf::from("tmp/trueblocks_txns_0xabc.json")
        );
        assert_eq!(
            parsed_dump_path(dir, "0xabc"),
            PathBuf::from("tmp/trueblocks_0xabc_parsed.json")
        );
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");
        let doc = json!({"data": [{"blockNumber": 1}]});

        save_json(&doc, &path).unwrap();
        assert_eq!(load_json(&path).unwrap(), Some(doc));
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempdir().unwrap();
        assert_eq!(load_json(&dir.path().join("absent.json")).unwrap(), None);
    }

    #[test]
    fn test_raw_backslashes_are_tolerated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raw.json");
        fs::write(&path, br#"{"path": "C:\q"}"#).unwrap();
        assert_eq!(load_json(&path).unwrap().unwrap()["path"], "C:\\q");
    }

    #[test]
    fn test_garbage_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ nope").unwrap();
        assert!(matches!(load_json(&path), Err(EtlError::Serialization(_))));
    }
}
