//! Crate-wide error kinds.
//!
//! Library code returns [`TakionError`]; the CLI boundary converts to
//! `anyhow::Result` with added context, same layering as a typical
//! tokio service binary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TakionError {
    #[error("out of memory")]
    Memory,
    #[error("overflow")]
    Overflow,
    #[error("unknown error: {0}")]
    Unknown(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("buffer too small")]
    BufferTooSmall,
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),
    #[error("connection refused")]
    ConnectionRefused,
    #[error("host down")]
    HostDown,
    #[error("host unreachable")]
    HostUnreach,
    #[error("operation timed out")]
    Timeout,
    #[error("operation canceled")]
    Canceled,
    #[error("unexpected end of stream")]
    Eof,
    #[error("worker task error: {0}")]
    ThreadError(String),
    #[error("parse error: {0}")]
    ParseError(String),
    #[error("protocol version mismatch")]
    VersionMismatch,
}

pub type Result<T> = std::result::Result<T, TakionError>;

/// Reason a session driver stopped, surfaced to the caller as the single
/// user-visible outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuitReason {
    Stopped,
    SessionRequestFailed,
    CtrlFailed,
    StreamConnectionFailed,
    SystemVersionMismatch,
    HostUnreachable,
    AuthFailed,
    PsPlusRequired,
    Unknown(String),
}

impl std::fmt::Display for QuitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuitReason::Stopped => write!(f, "stopped"),
            QuitReason::SessionRequestFailed => write!(f, "session request failed"),
            QuitReason::CtrlFailed => write!(f, "ctrl channel failed"),
            QuitReason::StreamConnectionFailed => write!(f, "stream connection failed"),
            QuitReason::SystemVersionMismatch => write!(f, "system version mismatch"),
            QuitReason::HostUnreachable => write!(f, "host unreachable"),
            QuitReason::AuthFailed => write!(f, "authentication failed"),
            QuitReason::PsPlusRequired => write!(f, "PS Plus required"),
            QuitReason::Unknown(s) => write!(f, "unknown: {s}"),
        }
    }
}
