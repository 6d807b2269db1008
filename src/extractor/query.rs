//! Indexer query → command line
//!
//! Grammar (fixed order):
//! ```text
//! <tool> <function> [--<flag>]* [--<key> <value>]* [--fmt <format>] <value...> [postprocess] [> path]
//! ```

use crate::error::BuildError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TOOL: &str = "chifra";

/// Pipeline that turns `chifra list` output into `<block>.<index>` lines
pub const TRANSACTION_ID_POSTPROCESS: &str = "| cut -f2,3 | tr '\t' '.' | grep -v blockNumber";

/// Positional argument(s): one value or several, joined with spaces in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
    Single(String),
    Many(Vec<String>),
}

impl QueryValue {
    fn joined(&self) -> String {
        match self {
            QueryValue::Single(v) => v.clone(),
            QueryValue::Many(vs) => vs.join(" "),
        }
    }
}

impl From<&str> for QueryValue {
    fn from(v: &str) -> Self {
        QueryValue::Single(v.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(v: String) -> Self {
        QueryValue::Single(v)
    }
}

impl From<Vec<String>> for QueryValue {
    fn from(vs: Vec<String>) -> Self {
        QueryValue::Many(vs)
    }
}

/// Structured description of one indexer invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChifraQuery {
    pub function: Option<String>,
    pub value: Option<QueryValue>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default, rename = "args")]
    pub flags: Vec<String>,
    /// Keyword arguments in insertion order
    #[serde(default)]
    pub kwargs: Vec<(String, String)>,
    #[serde(default)]
    pub postprocess: Option<String>,
    #[serde(default)]
    pub filepath: Option<String>,
}

impl ChifraQuery {
    pub fn new(function: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        Self {
            function: Some(function.into()),
            value: Some(value.into()),
            ..Default::default()
        }
    }

    /// `chifra list <address>` reduced to transaction ids
    pub fn transaction_ids(address: &str) -> Self {
        Self::new("list", address).postprocess(TRANSACTION_ID_POSTPROCESS)
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.kwargs.push((key.into(), value.into()));
        self
    }

    pub fn postprocess(mut self, pipeline: impl Into<String>) -> Self {
        self.postprocess = Some(pipeline.into());
        self
    }

    pub fn redirect(mut self, path: impl Into<String>) -> Self {
        self.filepath = Some(path.into());
        self
    }

    /// Build with the default tool name
    pub fn build(&self) -> Result<String, BuildError> {
        self.build_for(DEFAULT_TOOL)
    }

    pub fn build_for(&self, tool: &str) -> Result<String, BuildError> {
        let function = self
            .function
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .ok_or(BuildError::MissingField("function"))?;
        let value = self.value.as_ref().ok_or(BuildError::MissingField("value"))?;

        let mut parts: Vec<String> = vec![tool.to_string(), function.to_string()];
        parts.extend(
            self.flags
                .iter()
                .map(|f| format!("--{}", f.trim_start_matches('-'))),
        );
        parts.extend(
            self.kwargs
                .iter()
                .map(|(k, v)| format!("--{} {}", k.trim_start_matches('-'), v)),
        );
        if let Some(format) = &self.format {
            parts.push(format!("--fmt {}", format));
        }
        parts.push(value.joined());
        if let Some(pipeline) = &self.postprocess {
            parts.push(pipeline.clone());
        }
        if let Some(path) = &self.filepath {
            parts.push(format!("> {}", path));
        }

        Ok(parts.join(" "))
    }
}
