//! Crate-wide error type.

/// Errors surfaced by pattern compilation, the search engine and key handling.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid pattern: {reason}")]
    InvalidPattern { reason: String },

    #[error("Invalid search grid: {0}")]
    InvalidGrid(String),

    #[error("Unsupported key packet: {0}")]
    UnsupportedPacket(String),

    #[error("Compute substrate lost: {0}")]
    ComputeSubstrateLost(String),

    #[error("Key generation failed: {0}")]
    KeyGeneration(#[source] anyhow::Error),

    #[error("Key finalization failed: {0}")]
    KeyFinalizationFailed(#[source] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
