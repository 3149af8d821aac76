// ── CLI error type ──
//
// Thin wrapper over the library errors, with stable exit codes and
// miette-rendered reports.

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] netradar_config::ConfigError),

    #[error(transparent)]
    Core(#[from] netradar_core::CoreError),

    #[error(transparent)]
    Wire(#[from] netradar_wire::WireError),

    #[error("{0}")]
    Other(String),
}

impl CliError {
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Core(_) => 3,
            Self::Wire(_) => 4,
            Self::Other(_) => 1,
        }
    }
}
