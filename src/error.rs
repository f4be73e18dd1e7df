//! Error kinds and failure reporting.
//!
//! Every error is local to the component that detected it: setup errors stop
//! the listener, accept errors are reported and skipped, session errors close
//! only the session they happened on.

use std::fmt;
use std::io;
use std::path::PathBuf;
use tokio_tungstenite::tungstenite;
use tracing::error;

/// An asynchronous operation that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Accept,
    Handshake,
    Read,
    Write,
}

impl Op {
    pub fn as_str(self) -> &'static str {
        match self {
            Op::Accept => "accept",
            Op::Handshake => "handshake",
            Op::Read => "read",
            Op::Write => "write",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure while preparing the accepting socket.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("open: {0}")]
    Open(#[source] io::Error),
    #[error("set_option: {0}")]
    SetOption(#[source] io::Error),
    #[error("bind: {0}")]
    Bind(#[source] io::Error),
    #[error("listen: {0}")]
    Listen(#[source] io::Error),
    #[error("register: {0}")]
    Register(#[source] io::Error),
}

/// Failure that terminates a single session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("handshake: {0}")]
    Handshake(#[source] tungstenite::Error),
    #[error("read: {0}")]
    Read(#[source] tungstenite::Error),
    #[error("write: {0}")]
    Write(#[source] tungstenite::Error),
    #[error("{op}: timed out")]
    Timeout { op: Op },
    #[error("write: text payload is not valid UTF-8: {0}")]
    Encoding(#[source] std::str::Utf8Error),
}

impl SessionError {
    /// The operation that failed.
    pub fn op(&self) -> Op {
        match self {
            SessionError::Handshake(_) => Op::Handshake,
            SessionError::Read(_) => Op::Read,
            SessionError::Write(_) | SessionError::Encoding(_) => Op::Write,
            SessionError::Timeout { op } => *op,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead { path: PathBuf, source: io::Error },
    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid server header {0:?}")]
    InvalidHeader(String),
}

/// Top-level failure of the server process.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build worker pool: {0}")]
    Runtime(#[source] io::Error),
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error("listener task ended: {0}")]
    Listener(#[from] tokio::task::JoinError),
}

/// Report a failure.
pub fn fail(op: Op, err: &dyn std::error::Error) {
    error!(op = %op, error = %err, "{op} failed");
}
