// ── Wire error types ──

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),

    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    #[error("socket error: {0}")]
    Socket(String),

    #[error("encode error: {0}")]
    Encode(String),
}
