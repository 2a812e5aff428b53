//! Error handling - infrastructure failures only.
//!
//! Game rule rejections (insufficient funds, room full, ...) are not errors of
//! this kind: each engine returns its own rejection enum whose `Display` is the
//! message shown to the player.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Market-rounds error hierarchy
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network errors talking to an external collaborator
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// WebSocket transport errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Socket / file IO
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External directory returned something unusable
    #[error("Directory error: {0}")]
    Directory(String),
}
