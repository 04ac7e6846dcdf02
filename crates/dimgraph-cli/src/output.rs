//! Shared output layer for text/JSON parity across all CLI commands.
//!
//! Every command handler receives an [`OutputMode`] and formats its result
//! accordingly: compact text for operators and pipes, or stable JSON.
//!
//! ```ignore
//! render(mode, &value, |v, w| writeln!(w, "{}", v.name))
//! ```
//!
//! Errors go to stderr through [`render_error`], carrying the stable `E####`
//! code and the remediation hint of the underlying failure.

use std::io::{self, Write};

use dimgraph_core::CommandError;
use dimgraph_core::config::ConfigError;
use dimgraph_core::error::ErrorCode;
use dimgraph_core::lock::LockError;
use dimgraph_core::repository::RepositoryError;
use dimgraph_core::subscription::EngineError;
use serde::Serialize;

/// Width of the key column in [`kv`] lines.
const KEY_WIDTH: usize = 14;

/// The output modes supported by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Plain text for operators and pipes.
    Text,
    /// Machine-readable JSON (one object per result, or a JSON array).
    Json,
}

impl OutputMode {
    /// Returns `true` if JSON output was requested.
    #[must_use]
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Render a left-aligned key/value line in text output.
pub fn kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<width$} {}", format!("{key}:"), value.as_ref(), width = KEY_WIDTH)
}

/// Render a serializable value to stdout in the requested format.
///
/// In JSON mode, the value is serialized with `serde_json`. In text mode the
/// provided `text_fn` closure produces the output.
pub fn render<T: Serialize>(
    mode: OutputMode,
    value: &T,
    text_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Text => text_fn(value, &mut out)?,
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A structured error with its stable code and an optional hint.
#[derive(Debug, Serialize)]
pub struct CliError {
    /// Human-readable error message.
    pub message: String,
    /// Machine-readable error code (e.g. `E2201`).
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'static str>,
}

impl CliError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.code(),
            hint: code.hint(),
        }
    }

    /// Classify an error by the first typed failure in its chain.
    ///
    /// Anything unrecognized is reported as [`ErrorCode::InternalUnexpected`].
    #[must_use]
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let code = err
            .chain()
            .find_map(code_of)
            .unwrap_or(ErrorCode::InternalUnexpected);
        Self::new(code, format!("{err:#}"))
    }
}

fn code_of(err: &(dyn std::error::Error + 'static)) -> Option<ErrorCode> {
    if let Some(coded) = err.downcast_ref::<Coded>() {
        return Some(coded.0);
    }
    if let Some(err) = err.downcast_ref::<CommandError>() {
        return Some(err.code());
    }
    if let Some(err) = err.downcast_ref::<EngineError>() {
        return Some(err.code());
    }
    if let Some(err) = err.downcast_ref::<RepositoryError>() {
        return Some(err.code());
    }
    if let Some(err) = err.downcast_ref::<ConfigError>() {
        return Some(err.code());
    }
    err.downcast_ref::<LockError>().map(LockError::code)
}

/// An error raised by the CLI itself with a fixed code.
#[derive(Debug)]
pub struct Coded(pub ErrorCode, pub String);

impl std::fmt::Display for Coded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.1)
    }
}

impl std::error::Error for Coded {}

/// Render an error to stderr in the requested format.
pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    match mode {
        OutputMode::Json => {
            let wrapper = serde_json::json!({ "error": error });
            serde_json::to_writer_pretty(&mut out, &wrapper)?;
            writeln!(out)?;
        }
        OutputMode::Text => {
            writeln!(out, "error[{}]: {}", error.code, error.message)?;
            if let Some(hint) = error.hint {
                writeln!(out, "  hint: {hint}")?;
            }
        }
    }
    Ok(())
}
