use thiserror::Error;

/// Errors surfaced by the elementary-stream output layer.
///
/// Per-call recoverable conditions (dropped blocks, not-applicable
/// controls) are not errors; see [`crate::es::ControlOutcome`].
#[derive(Error, Debug)]
pub enum EsOutError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown track {0}")]
    UnknownTrack(u32),

    #[error("unknown program group {0}")]
    UnknownGroup(i32),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("decoder error: {0}")]
    Decoder(String),

    #[error("timeshift storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, EsOutError>;
