//! Canonical per-transaction records produced by the transformer and
//! consumed by the loader.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// `<blockNumber>.<transactionIndex>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId {
    pub block_number: u64,
    pub transaction_index: u64,
}

impl TransactionId {
    pub fn new(block_number: u64, transaction_index: u64) -> Self {
        Self {
            block_number,
            transaction_index,
        }
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.block_number, self.transaction_index)
    }
}

impl FromStr for TransactionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (block, index) = s
            .trim()
            .split_once('.')
            .ok_or_else(|| format!("transaction id '{}' has no '.' separator", s))?;
        let block_number = block
            .parse::<u64>()
            .map_err(|e| format!("bad block number in '{}': {}", s, e))?;
        let transaction_index = index
            .parse::<u64>()
            .map_err(|e| format!("bad transaction index in '{}': {}", s, e))?;
        Ok(Self::new(block_number, transaction_index))
    }
}

impl Serialize for TransactionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TransactionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Position of a call inside its transaction's call tree.
///
/// The indexer emits it either as a string or as an array of child indices;
/// arrays are normalised to `-`-joined text so the id format is stable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallPath(String);

impl CallPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn from_indices(indices: &[u64]) -> Self {
        let joined = indices
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join("-");
        Self(joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn indices(&self) -> Option<Vec<u64>> {
        let parts: Vec<&str> = self
            .0
            .split(|c: char| !c.is_ascii_digit())
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            return None;
        }
        parts.iter().map(|p| p.parse().ok()).collect()
    }

    /// True when `self` sits strictly below `ancestor` in the call tree.
    pub fn is_strict_descendant_of(&self, ancestor: &CallPath) -> bool {
        match (self.indices(), ancestor.indices()) {
            (Some(mine), Some(theirs)) => {
                mine.len() > theirs.len() && mine[..theirs.len()] == theirs[..]
            }
            _ => self.0.len() > ancestor.0.len() && self.0.starts_with(&ancestor.0),
        }
    }
}

impl fmt::Display for CallPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Chain an address lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Chain {
    #[default]
    #[serde(rename = "ETH")]
    Mainnet,
    #[serde(rename = "RIN")]
    Rinkeby,
    #[serde(rename = "ROP")]
    Ropsten,
    #[serde(rename = "GOE")]
    Goerli,
    #[serde(rename = "KOV")]
    Kovan,
    #[serde(rename = "GNO")]
    Gnosis,
    #[serde(rename = "OPT")]
    Optimism,
    #[serde(rename = "POL")]
    Polygon,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Mainnet => "ETH",
            Chain::Rinkeby => "RIN",
            Chain::Ropsten => "ROP",
            Chain::Goerli => "GOE",
            Chain::Kovan => "KOV",
            Chain::Gnosis => "GNO",
            Chain::Optimism => "OPT",
            Chain::Polygon => "POL",
        }
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ETH" => Ok(Chain::Mainnet),
            "RIN" => Ok(Chain::Rinkeby),
            "ROP" => Ok(Chain::Ropsten),
            "GOE" => Ok(Chain::Goerli),
            "KOV" => Ok(Chain::Kovan),
            "GNO" => Ok(Chain::Gnosis),
            "OPT" => Ok(Chain::Optimism),
            "POL" => Ok(Chain::Polygon),
            other => Err(format!("unknown chain code '{}'", other)),
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reconstructed transaction with its sub-records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionAggregate {
    pub transaction_id: TransactionId,
    pub block_number: u64,
    pub transaction_hash: Option<String>,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub value: Option<String>,
    pub error: Option<String>,
    pub call_name: Option<String>,
    pub call_inputs: Option<serde_json::Value>,
    pub call_outputs: Option<serde_json::Value>,
    /// Encounter order, no duplicates
    pub contracts_created: Vec<String>,
    pub traces: Vec<CallSubRecord>,
    pub logs: Vec<LogSubRecord>,
    /// Receipt path only
    pub addresses_involved: Vec<String>,
}

impl TransactionAggregate {
    pub fn new(transaction_id: TransactionId) -> Self {
        Self {
            transaction_id,
            block_number: transaction_id.block_number,
            transaction_hash: None,
            from_address: None,
            to_address: None,
            value: None,
            error: None,
            call_name: None,
            call_inputs: None,
            call_outputs: None,
            contracts_created: Vec::new(),
            traces: Vec::new(),
            logs: Vec::new(),
            addresses_involved: Vec::new(),
        }
    }
}

/// A non-root `call` inside a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSubRecord {
    pub transaction_id: TransactionId,
    pub call_path: CallPath,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub value: Option<String>,
    pub compressed_trace: String,
    pub error: Option<String>,
    pub outputs: Option<serde_json::Value>,
    /// Shallow resolution: the first matching delegatecall one level below
    /// this call. Deeper delegate chains are not followed.
    pub delegate: Option<String>,
}

impl CallSubRecord {
    /// `<transactionId>.<callPath>`
    pub fn id(&self) -> String {
        format!("{}.{}", self.transaction_id, self.call_path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSubRecord {
    pub transaction_id: TransactionId,
    pub log_index: u64,
    pub address: String,
    pub event: Option<String>,
    pub compressed_log: Option<String>,
}

impl LogSubRecord {
    /// `<transactionId>.<logIndex>`
    pub fn id(&self) -> String {
        format!("{}.{}", self.transaction_id, self.log_index)
    }
}

/// Lower-cased, trimmed form used for every address comparison and row key
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// `0x` followed by exactly 40 hex digits
pub fn could_be_address(candidate: &str) -> bool {
    match candidate.strip_prefix("0x").or_else(|| candidate.strip_prefix("0X")) {
        Some(body) => body.len() == 40 && hex::decode(body).is_ok(),
        None => false,
    }
}

/// `0x0`, `0x`, or `0x` followed by zeros only
pub fn is_zero_address(candidate: &str) -> bool {
    candidate
        .trim()
        .strip_prefix("0x")
        .map(|body| body.chars().all(|c| c == '0'))
        .unwrap_or(false)
}
