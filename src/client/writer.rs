//! Writer task.
//!
//! All outbound lines go through one task that owns the writable half of
//! the transport. Callers hand lines over a bounded [`mpsc`] channel, so
//! lines from concurrent callers are never interleaved, and a line accepted
//! into the queue is written in full even if its caller stops waiting.

use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::wire::lines::LineCodec;
use crate::{ClientError, Result};

/// A batch of lines written back to back, plus the caller's completion.
#[derive(Debug)]
struct Outbound {
    lines: Vec<String>,
    done: oneshot::Sender<Result<()>>,
}

/// Handle to the writer task. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LineWriter {
    tx: mpsc::Sender<Outbound>,
}

impl LineWriter {
    /// Spawn the writer task over `writer`.
    ///
    /// `queue` bounds the number of batches waiting to be written. The task
    /// stops when `cancel` fires, when every handle is dropped, or after the
    /// first write failure (which also cancels `cancel`).
    pub fn spawn<W>(
        writer: W,
        queue: usize,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<Result<()>>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(queue.max(1));
        let handle = tokio::spawn(run_writer(writer, rx, cancel));
        (Self { tx }, handle)
    }

    /// Write one line; the terminator is appended by the codec.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionClosed`] when the writer has stopped,
    /// or the write error reported by the transport.
    pub async fn send(&self, line: String) -> Result<()> {
        self.send_all(vec![line]).await
    }

    /// Write several lines with nothing from other callers in between.
    ///
    /// # Errors
    ///
    /// Same as [`LineWriter::send`].
    pub async fn send_all(&self, lines: Vec<String>) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(Outbound { lines, done })
            .await
            .map_err(|_| ClientError::ConnectionClosed("writer stopped".into()))?;
        rx.await.map_err(|_| {
            ClientError::ConnectionClosed("writer stopped before the line was written".into())
        })?
    }
}

/// Writer loop: drains `rx` into `writer` until cancelled or closed.
///
/// # Errors
///
/// Returns the first write failure.
async fn run_writer<W>(
    writer: W,
    mut rx: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut framed = FramedWrite::new(writer, LineCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("writer: cancellation received, stopping");
                break;
            }

            msg = rx.recv() => {
                let Some(Outbound { lines, done }) = msg else {
                    debug!("writer: all handles dropped, stopping");
                    break;
                };

                let result = write_lines(&mut framed, lines).await;
                let failure = result.as_ref().err().cloned();
                // The caller may have stopped waiting; the line is written regardless.
                let _ = done.send(result);

                if let Some(err) = failure {
                    warn!(error = %err, "writer: write failed, closing connection");
                    cancel.cancel();
                    return Err(err);
                }
            }
        }
    }

    if let Err(err) = framed.close().await {
        debug!(error = %err, "writer: close failed");
    }
    Ok(())
}

async fn write_lines<W>(framed: &mut FramedWrite<W, LineCodec>, lines: Vec<String>) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    for line in lines {
        debug!(line = %line, "writer: sending");
        framed.feed(line).await?;
    }
    framed.flush().await
}
