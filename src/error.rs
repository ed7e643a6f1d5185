//! Crate-wide error type.
//!
//! All fallible operations in this crate return [`Result`]. Sub-errors from
//! the various external collaborators (serial I/O, the broker client, JSON
//! codec, configuration loading) are wrapped with `#[from]` so `?` composes
//! across module boundaries, the way `maviola::core::error::Error` wraps
//! `FrameError`/`SpecError`/`NodeError`.

use std::fmt;
use std::sync::Arc;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors produced by this crate.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    /// Configuration could not be loaded or was invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error wrapper (serial ports, files).
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(Arc<serialport::Error>),

    /// JSON encoding/decoding error.
    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    /// Broker (MQTT) client error.
    #[error("broker error: {0}")]
    Broker(String),

    /// JSON-RPC request validation error, carries the reason shown to the caller.
    #[error("{0}")]
    RpcRequest(String),

    /// Thread join / synchronisation error.
    #[error("synchronisation error: {0}")]
    Sync(String),

    /// Catch-all for errors that don't deserve their own variant.
    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

impl From<serialport::Error> for Error {
    fn from(e: serialport::Error) -> Self {
        Error::Serial(Arc::new(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(Arc::new(e))
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Error::Sync(format!("poisoned mutex: {e}"))
    }
}

/// A lightweight display helper used when logging errors that are otherwise
/// discarded (per spec §7, most transient errors are logged and swallowed).
pub fn log_and_drop(context: &str, err: impl fmt::Display) {
    log::warn!("{context}: {err}");
}
