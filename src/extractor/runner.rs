//! Runs indexer commands and parses what they print
//!
//! Output is read line by line while the process is still running, so a
//! large export never backs up the pipe. Every failure (spawn, exit status,
//! timeout, unparseable output) is logged and turned into an empty result by
//! [`IndexerSource::run`]; [`ChifraRunner::try_run`] exposes the classified
//! error for callers that care.

use super::backoff::ExponentialBackoff;
use super::query::{ChifraQuery, DEFAULT_TOOL};
use crate::error::ExtractError;
use crate::transformer::records::TransactionId;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// One structured document
    Json,
    /// Trimmed, non-empty lines
    Lines,
}

/// Where a copy of the raw output goes while it is being parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputCapture {
    /// The runner's default log file, overwritten
    Default,
    File { path: PathBuf, append: bool },
    Suppressed,
}

impl OutputCapture {
    pub fn overwrite(path: impl Into<PathBuf>) -> Self {
        OutputCapture::File {
            path: path.into(),
            append: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChifraOutput {
    Json(Value),
    Lines(Vec<String>),
    Nothing,
}

impl ChifraOutput {
    pub fn into_lines(self) -> Vec<String> {
        match self {
            ChifraOutput::Lines(lines) => lines,
            _ => Vec::new(),
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            ChifraOutput::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Something that can answer indexer commands
#[async_trait]
pub trait IndexerSource: Send + Sync {
    /// Executable name placed at the front of built commands
    fn tool(&self) -> &str;

    /// Run a command. Never fails: problems are logged and yield
    /// [`ChifraOutput::Nothing`].
    async fn run(&self, command: &str, mode: ParseMode, capture: &OutputCapture) -> ChifraOutput;

    /// All `<block>.<index>` ids the index holds for an address
    async fn transaction_ids(&self, address: &str) -> Vec<TransactionId> {
        let command = match ChifraQuery::transaction_ids(address).build_for(self.tool()) {
            Ok(command) => command,
            Err(e) => {
                log::warn!("Could not build transaction id query: {}", e);
                return Vec::new();
            }
        };

        self.run(&command, ParseMode::Lines, &OutputCapture::Default)
            .await
            .into_lines()
            .iter()
            .filter_map(|line| match line.parse::<TransactionId>() {
                Ok(id) => Some(id),
                Err(e) => {
                    log::warn!("Ignoring unexpected line from transaction list: {}", e);
                    None
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub tool: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub default_capture_path: PathBuf,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            tool: DEFAULT_TOOL.to_string(),
            timeout: Duration::from_secs(3600),
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
            default_capture_path: PathBuf::from("tmp/trueblocks.log"),
        }
    }
}

/// Runs commands through `sh -c` so postprocess pipes and redirects work
pub struct ChifraRunner {
    settings: RunnerSettings,
}

impl ChifraRunner {
    pub fn new(settings: RunnerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Add the ` | tee` side effect unless the command redirects on its own
    /// or capture is suppressed.
    pub fn with_capture(&self, command: &str, capture: &OutputCapture) -> String {
        if let Some((_, target)) = command.rsplit_once('>') {
            log::warn!(
                "Command already pipes output to {}: will not change this",
                target.trim()
            );
            return command.to_string();
        }

        let (path, append) = match capture {
            OutputCapture::Suppressed => return command.to_string(),
            OutputCapture::Default => (self.settings.default_capture_path.as_path(), false),
            OutputCapture::File { path, append } => (path.as_path(), *append),
        };
        ensure_parent_dir(path);

        let mode = if append { " -a" } else { "" };
        format!("{} | tee{} {}", command, mode, shell_quote(path))
    }

    /// One attempt, bounded by the configured timeout
    pub async fn try_run(
        &self,
        command: &str,
        mode: ParseMode,
        capture: &OutputCapture,
    ) -> Result<ChifraOutput, ExtractError> {
        let command = self.with_capture(command, capture);
        log::debug!("Running indexer command: {}", command);

        let mut shell = Command::new("sh");
        shell
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true);
        own_process_group(&mut shell);
        let mut child = shell.spawn().map_err(ExtractError::Spawn)?;

        let stdout = child.stdout.take().ok_or_else(|| {
            ExtractError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "indexer stdout was not captured",
            ))
        })?;

        let lines = match timeout(self.settings.timeout, collect_output(&mut child, stdout)).await {
            Ok(result) => result?,
            Err(_) => {
                kill_process_group(&mut child).await;
                return Err(ExtractError::Timeout(self.settings.timeout));
            }
        };

        parse_output(lines, mode)
    }
}

#[async_trait]
impl IndexerSource for ChifraRunner {
    fn tool(&self) -> &str {
        &self.settings.tool
    }

    async fn run(&self, command: &str, mode: ParseMode, capture: &OutputCapture) -> ChifraOutput {
        let mut backoff = ExponentialBackoff::new(
            self.settings.retry_delay,
            self.settings.retry_delay.saturating_mul(60),
            self.settings.max_retries,
        );

        loop {
            match self.try_run(command, mode, capture).await {
                Ok(output) => return output,
                Err(e) if e.is_retryable() => {
                    log::warn!("⚠️  {}", e);
                    if backoff.sleep().await.is_err() {
                        log::error!("❌ Giving up on indexer command: {}", command);
                        return ChifraOutput::Nothing;
                    }
                }
                Err(e @ ExtractError::Spawn(_)) => {
                    log::error!("❌ {}", e);
                    return ChifraOutput::Nothing;
                }
                Err(e) => {
                    log::warn!("⚠️  {} (command: {})", e, command);
                    return ChifraOutput::Nothing;
                }
            }
        }
    }
}

async fn collect_output(
    child: &mut Child,
    stdout: ChildStdout,
) -> Result<Vec<String>, ExtractError> {
    let mut reader = BufReader::new(stdout);
    let mut lines = Vec::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        lines.push(decode_output(&buf));
    }

    let status = child.wait().await?;
    if !status.success() {
        return Err(ExtractError::Exit(status));
    }
    Ok(lines)
}

/// Lossy UTF-8 decode, then double every backslash so stray Windows-style
/// paths in decoded strings don't break JSON parsing.
pub fn decode_output(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).replace('\\', "\\\\")
}

fn parse_output(lines: Vec<String>, mode: ParseMode) -> Result<ChifraOutput, ExtractError> {
    match mode {
        ParseMode::Lines => Ok(ChifraOutput::Lines(
            lines
                .iter()
                .map(|l| l.trim())
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
        )),
        ParseMode::Json => {
            let text = lines.concat();
            Ok(ChifraOutput::Json(serde_json::from_str(&text)?))
        }
    }
}

/// Single-quote a path for `sh`, escaping embedded quotes as `'\''`.
fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', "'\\''"))
}

/// The shell leads its own group so a timeout can take down the whole
/// pipeline, not just `sh`.
#[cfg(unix)]
fn own_process_group(command: &mut Command) {
    command.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_command: &mut Command) {}

#[cfg(unix)]
async fn kill_process_group(child: &mut Child) {
    if let Some(pid) = child.id() {
        let signalled = Command::new("sh")
            .arg("-c")
            .arg(format!("kill -KILL -{}", pid))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = signalled {
            log::warn!("Failed to signal process group {}: {}", pid, e);
        }
    }
    let _ = child.kill().await;
}

#[cfg(not(unix))]
async fn kill_process_group(child: &mut Child) {
    let _ = child.kill().await;
}

fn ensure_parent_dir(path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = std::fs::create_dir_all(parent) {
            log::warn!("Failed to create capture directory {}: {}", parent.display(), e);
        }
    }
}
