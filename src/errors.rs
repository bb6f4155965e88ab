//! Error types shared across the client.

use std::fmt::{Display, Formatter};

/// Shared client result type.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client error enumeration covering all protocol failure modes.
///
/// Payloads are plain strings so the error is `Clone`: an engine error or a
/// lost connection is delivered to every outstanding request at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Malformed escape sequence or missing field; carries the offending text.
    Decode(String),
    /// A request was issued while another one with the same key is pending.
    DuplicateRequest(String),
    /// The engine answered with an `Error in` line.
    Engine(String),
    /// The connection ended (EOF, peer reset, or local teardown).
    ConnectionClosed(String),
    /// The engine sent a line this client cannot interpret.
    Protocol(String),
    /// Any other transport failure.
    Io(String),
}

impl Display for ClientError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Decode(msg) => write!(f, "decode: {msg}"),
            Self::DuplicateRequest(msg) => write!(f, "duplicate request: {msg}"),
            Self::Engine(msg) => write!(f, "engine: {msg}"),
            Self::ConnectionClosed(msg) => write!(f, "connection closed: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<toml::de::Error> for ClientError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        crate::client::transport::classify_io_error(&err)
    }
}
