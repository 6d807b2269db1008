//! Raw indexer export shapes
//!
//! These mirror the JSON the indexer writes under its top-level `data` field.
//! Everything that may be missing is optional; only the fields needed to
//! derive a transaction id are required, so a single broken entry can be
//! rejected on its own.

use super::records::CallPath;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// One per-call entry from a trace export
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCallEntry {
    #[serde(deserialize_with = "loose_u64")]
    pub block_number: u64,
    #[serde(deserialize_with = "loose_u64")]
    pub transaction_index: u64,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default, deserialize_with = "trace_address")]
    pub trace_address: Option<CallPath>,
    #[serde(default)]
    pub action: Option<RawAction>,
    #[serde(default)]
    pub result: Option<RawCallResult>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub compressed_trace: Option<String>,
    #[serde(default)]
    pub articulated_trace: Option<ArticulatedCall>,
}

impl RawCallEntry {
    pub fn is_root(&self) -> bool {
        self.trace_address.is_none()
    }

    pub fn call_type(&self) -> Option<CallType> {
        self.action.as_ref().and_then(|a| a.call_type)
    }

    /// Compressed trace with absence treated as the empty string
    pub fn compressed(&self) -> &str {
        self.compressed_trace.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAction {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub value: Option<String>,
    #[serde(default)]
    pub call_type: Option<CallType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Call,
    Delegatecall,
    Staticcall,
    Creation,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCallResult {
    #[serde(default, alias = "address")]
    pub new_contract: Option<String>,
    #[serde(default)]
    pub output: Option<Value>,
}

/// Decoded call payload (name plus argument values)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArticulatedCall {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub inputs: Option<Value>,
    #[serde(default)]
    pub outputs: Option<Value>,
}

/// One transaction from a transaction export (receipt-shaped, no call tree)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    #[serde(deserialize_with = "loose_u64")]
    pub block_number: u64,
    #[serde(deserialize_with = "loose_u64")]
    pub transaction_index: u64,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub value: Option<String>,
    #[serde(default)]
    pub articulated_tx: Option<ArticulatedCall>,
    #[serde(default)]
    pub receipt: Option<RawReceipt>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReceipt {
    #[serde(default)]
    pub contract_address: Option<String>,
    /// Kept untyped so one malformed log can be dropped on its own
    #[serde(default, deserialize_with = "null_as_empty")]
    pub logs: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    #[serde(deserialize_with = "loose_u64")]
    pub log_index: u64,
    pub address: String,
    #[serde(default)]
    pub articulated_log: Option<ArticulatedCall>,
    #[serde(default)]
    pub compressed_log: Option<String>,
}

/// Numbers may arrive as JSON numbers or as decimal strings.
fn loose_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom(format!("expected unsigned integer, got {}", n))),
        Value::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!(
            "expected unsigned integer, got {}",
            other
        ))),
    }
}

/// Wei amounts overflow u64 and come as numbers or strings; keep them as text.
fn loose_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

/// `null` stands for an empty list.
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Value>, D::Error> {
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// `null`, `""` and `[]` all mark the root call.
fn trace_address<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<CallPath>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => Ok(Some(CallPath::new(s.trim()))),
        Value::Array(items) if items.is_empty() => Ok(None),
        Value::Array(items) => {
            let indices = items
                .iter()
                .map(|v| {
                    v.as_u64()
                        .ok_or_else(|| serde::de::Error::custom("traceAddress entries must be integers"))
                })
                .collect::<Result<Vec<u64>, D::Error>>()?;
            Ok(Some(CallPath::from_indices(&indices)))
        }
        other => Err(serde::de::Error::custom(format!(
            "unexpected traceAddress {}",
            other
        ))),
    }
}
