//! Byte-stream transports to the engine.
//!
//! The engine accepts external modules on a TCP listener or launches them
//! as child processes talking over standard input/output. Either way the
//! client sees one readable and one writable half.
//!
//! I/O errors are classified here: peer-reset-like failures are a graceful
//! disconnect ([`ClientError::ConnectionClosed`]); everything else is
//! reported as [`ClientError::Io`].

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::TransportConfig;
use crate::{ClientError, Result};

/// Readable half of a transport.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Writable half of a transport.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Open the transport described by `config`.
///
/// # Errors
///
/// Returns [`ClientError::Io`] when the TCP connection cannot be established.
pub async fn open(config: &TransportConfig) -> Result<(BoxedReader, BoxedWriter)> {
    match config {
        TransportConfig::Tcp { host, port } => connect_tcp(host, *port).await,
        TransportConfig::Stdio => Ok(stdio()),
    }
}

/// Connect to the engine's TCP listener.
///
/// # Errors
///
/// Returns [`ClientError::Io`] when the connection fails.
pub async fn connect_tcp(host: &str, port: u16) -> Result<(BoxedReader, BoxedWriter)> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|err| ClientError::Io(format!("connect to {host}:{port} failed: {err}")))?;
    stream
        .set_nodelay(true)
        .map_err(|err| ClientError::Io(format!("set_nodelay failed: {err}")))?;
    debug!(host, port, "transport: tcp connected");
    let (read, write) = stream.into_split();
    Ok((Box::new(read), Box::new(write)))
}

/// Use the process's standard input and output.
///
/// Nothing else in the process may write to stdout while the client runs.
#[must_use]
pub fn stdio() -> (BoxedReader, BoxedWriter) {
    debug!("transport: using stdio");
    (Box::new(tokio::io::stdin()), Box::new(tokio::io::stdout()))
}

/// Whether `err` means the peer went away rather than a local failure.
#[must_use]
pub fn is_benign_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

/// Map a transport I/O error to a [`ClientError`].
#[must_use]
pub fn classify_io_error(err: &io::Error) -> ClientError {
    if is_benign_disconnect(err) {
        ClientError::ConnectionClosed(err.to_string())
    } else {
        ClientError::Io(err.to_string())
    }
}
