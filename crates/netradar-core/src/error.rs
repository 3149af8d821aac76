// ── Core error types ──
//
// User-facing errors from netradar-core. Collector faults never surface
// here -- collectors fail closed and return empty results. CoreError is
// reserved for conditions the caller must act on: a missing capture tool,
// a probe that cannot run, an engine that was asked to do something in
// the wrong state.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Capture errors ───────────────────────────────────────────────
    #[error("capture tool not found: {guidance}")]
    CaptureToolMissing { guidance: String },

    #[error("capture permission denied: {guidance}")]
    CapturePermission { guidance: String },

    #[error("no capture interface available")]
    NoCaptureInterface,

    #[error("capture already stopping")]
    CaptureBusy,

    // ── Probe errors ─────────────────────────────────────────────────
    #[error("probe tool not found: {tool}")]
    ProbeToolMissing { tool: String },

    #[error("probe failed for {ip}: {reason}")]
    ProbeFailed { ip: String, reason: String },

    // ── Subprocess errors ────────────────────────────────────────────
    #[error("command `{command}` failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("command `{command}` timed out after {timeout_secs}s")]
    CommandTimeout { command: String, timeout_secs: u64 },

    // ── Engine lifecycle ─────────────────────────────────────────────
    #[error("engine is shutting down")]
    ShuttingDown,

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Build a `CommandFailed` from an io error, with the reason trimmed
    /// to a single concise line.
    pub(crate) fn command_io(command: &str, err: &std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.to_owned(),
            reason: crate::truncate_reason(&err.to_string()),
        }
    }
}
