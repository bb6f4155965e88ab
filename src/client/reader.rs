//! Reader task and dispatch loop.
//!
//! Owns the readable half of the transport from connect until EOF, a fatal
//! error, or teardown. Every line is routed in arrival order:
//!
//! | Directive                                | Action                                          |
//! |------------------------------------------|-------------------------------------------------|
//! | `Error in`                               | fail every pending request                      |
//! | `%<setlocal`, `%<watch`, `%<unwatch`     | complete the request keyed by field 1           |
//! | `%<install`, `%<uninstall`               | complete the request keyed by field 2           |
//! | `%<message`                              | complete by id, else notify watchers            |
//! | `%>message`                              | run handlers, then acknowledge                  |
//! | *(any other)*                            | fatal: the loop stops with a protocol error     |
//!
//! Known lines with malformed fields are logged and skipped. Subscriber
//! failures are logged locally, reported to the engine as `%>output`
//! lines, and never prevent the acknowledgment.
//!
//! A `%>message` whose id decodes but whose other fields do not is declined
//! with an unhandled acknowledgment before being skipped, so the engine
//! does not wait for it.
//!
//! On exit the reader drains outstanding notification work, closes the
//! pending table with [`ClientError::ConnectionClosed`], stops the writer,
//! and declares the disconnect exactly once.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::client::pending::PendingTable;
use crate::client::registry::{invoke, Registry};
use crate::client::writer::LineWriter;
use crate::client::DispatchMode;
use crate::wire::directive::{CorrelationKey, Directive};
use crate::wire::escape::decode;
use crate::wire::lines::LineCodec;
use crate::wire::message::{lines, MessageEvent, WireLine};
use crate::{ClientError, Result};

/// Everything the reader shares with the rest of the connection.
#[derive(Debug, Clone)]
pub struct ReaderContext {
    /// Requests waiting for a response.
    pub pending: Arc<PendingTable>,
    /// Message and disconnect callbacks.
    pub registry: Arc<Registry>,
    /// Outbound lines (acknowledgments and failure reports).
    pub writer: LineWriter,
    /// Where subscriber work runs.
    pub mode: DispatchMode,
    /// Fired by the owner to tear the connection down.
    pub shutdown: CancellationToken,
    /// Fired by the reader once the disconnect has been declared.
    pub closed: CancellationToken,
    /// Inbound line length limit.
    pub max_line_bytes: usize,
}

/// Reader task: reads lines from `reader` and dispatches them until EOF,
/// a fatal error, or `ctx.shutdown`.
///
/// # Errors
///
/// Returns [`ClientError::Protocol`] for an unknown directive,
/// [`ClientError::Decode`] for an oversized line, and [`ClientError::Io`]
/// for transport failures other than a peer reset. EOF, peer reset and
/// shutdown return `Ok(())`.
pub async fn run_reader<R>(reader: R, ctx: ReaderContext) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(reader, LineCodec::with_max_length(ctx.max_line_bytes));
    let tracker = TaskTracker::new();

    let outcome = loop {
        tokio::select! {
            biased;

            () = ctx.shutdown.cancelled() => {
                debug!("reader: shutdown received, stopping");
                break Ok(());
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!("reader: EOF detected");
                        break Ok(());
                    }

                    Some(Err(ClientError::ConnectionClosed(reason))) => {
                        debug!(reason = %reason, "reader: peer closed the connection");
                        break Ok(());
                    }

                    Some(Err(err)) => {
                        // The framing layer does not resume after an error.
                        warn!(error = %err, "reader: stream error, stopping");
                        break Err(err);
                    }

                    Some(Ok(line)) => match dispatch(&ctx, &tracker, &line).await {
                        Ok(()) => {}
                        Err(err @ ClientError::Protocol(_)) => {
                            warn!(
                                error = %err,
                                raw_line = %line,
                                "reader: protocol violation, stopping"
                            );
                            break Err(err);
                        }
                        Err(err) => {
                            warn!(
                                error = %err,
                                raw_line = %line,
                                "reader: malformed line, skipping"
                            );
                        }
                    },
                }
            }
        }
    };

    tracker.close();
    tracker.wait().await;

    let reason = match &outcome {
        Ok(()) => "connection closed".to_owned(),
        Err(err) => err.to_string(),
    };
    let failed = ctx.pending.close(&ClientError::ConnectionClosed(reason));
    ctx.shutdown.cancel();
    if ctx.registry.fire_disconnect() {
        info!(failed_requests = failed, "reader: disconnected");
    }
    ctx.closed.cancel();

    outcome
}

/// Route one inbound line.
///
/// # Errors
///
/// [`ClientError::Protocol`] is fatal for the connection; any other error
/// means the line was skipped.
async fn dispatch(ctx: &ReaderContext, tracker: &TaskTracker, line: &str) -> Result<()> {
    if line.is_empty() {
        return Ok(());
    }

    let wire = WireLine::parse(line);
    let Some(directive) = wire.directive()? else {
        return Err(ClientError::Protocol(format!("unknown directive in '{line}'")));
    };
    debug!(%directive, "reader: line received");

    match directive {
        Directive::Error => {
            let text = error_text(&wire);
            let failed = ctx.pending.fail_all(&ClientError::Engine(text.clone()));
            warn!(error = %text, failed_requests = failed, "reader: engine reported an error");
        }

        Directive::SetLocalReply | Directive::WatchReply | Directive::UnwatchReply => {
            complete_reply(ctx, directive, wire, 1)?;
        }

        Directive::InstallReply | Directive::UninstallReply => {
            complete_reply(ctx, directive, wire, 2)?;
        }

        Directive::MessageReply => {
            let key = CorrelationKey::new(directive, wire.decoded(1)?);
            if !ctx.pending.complete(&key, wire.clone()) {
                let event = MessageEvent::from_notification(&wire)?;
                debug!(name = %event.name, id = %event.id, "reader: watched message");
                let work =
                    deliver_notification(Arc::clone(&ctx.registry), ctx.writer.clone(), event);
                match ctx.mode {
                    DispatchMode::Inline => work.await,
                    DispatchMode::Concurrent => {
                        tracker.spawn(work);
                    }
                }
            }
        }

        Directive::Message => {
            let event = match MessageEvent::from_dispatch(&wire) {
                Ok(event) => event,
                Err(err) => {
                    decline(ctx, &wire).await;
                    return Err(err);
                }
            };
            debug!(name = %event.name, id = %event.id, "reader: engine message");
            let work = deliver_dispatch(Arc::clone(&ctx.registry), ctx.writer.clone(), event);
            match ctx.mode {
                DispatchMode::Inline => work.await,
                DispatchMode::Concurrent => {
                    tracker.spawn(work);
                }
            }
        }

        Directive::Connect
        | Directive::Output
        | Directive::SetLocal
        | Directive::Install
        | Directive::Uninstall
        | Directive::Watch
        | Directive::Unwatch => {
            return Err(ClientError::Protocol(format!(
                "engine sent client directive '{directive}'"
            )));
        }
    }

    Ok(())
}

/// Complete the request keyed by the decoded field at `qualifier`.
fn complete_reply(
    ctx: &ReaderContext,
    directive: Directive,
    wire: WireLine,
    qualifier: usize,
) -> Result<()> {
    let key = CorrelationKey::new(directive, wire.decoded(qualifier)?);
    if !ctx.pending.complete(&key, wire) {
        debug!(%key, "reader: unclaimed reply ignored");
    }
    Ok(())
}

/// Answer an undecodable `%>message` as unhandled when its id is readable.
async fn decline(ctx: &ReaderContext, wire: &WireLine) {
    let Some(id) = wire.decoded(1).ok().filter(|id| !id.is_empty()) else {
        return;
    };
    if let Err(err) = ctx.writer.send(lines::decline(&id)).await {
        warn!(id = %id, error = %err, "reader: decline not sent");
    }
}

/// Text of an `Error in:<line>` report.
///
/// The engine echoes the offending line, which may contain `:` and need not
/// be a valid encoding; the raw text is kept when it does not decode.
fn error_text(wire: &WireLine) -> String {
    let raw = wire.tail(1).join(":");
    decode(&raw).unwrap_or(raw)
}

/// Run watchers for an unclaimed `%<message`.
async fn deliver_notification(
    registry: Arc<Registry>,
    writer: LineWriter,
    mut event: MessageEvent,
) {
    let subscribers = registry.notification_subscribers(&event.name);
    let failures = invoke(&subscribers, &mut event);
    report_failures(&writer, &event, failures).await;
}

/// Run handlers for an engine-initiated `%>message`, then acknowledge it.
async fn deliver_dispatch(registry: Arc<Registry>, writer: LineWriter, mut event: MessageEvent) {
    let subscribers = registry.dispatch_subscribers(&event.name);
    let failures = invoke(&subscribers, &mut event);
    report_failures(&writer, &event, failures).await;

    if let Err(err) = writer.send(lines::acknowledge(&event)).await {
        warn!(name = %event.name, id = %event.id, error = %err, "reader: acknowledgment not sent");
    }
}

async fn report_failures(writer: &LineWriter, event: &MessageEvent, failures: Vec<String>) {
    for failure in failures {
        warn!(name = %event.name, id = %event.id, error = %failure, "reader: subscriber failed");
        if let Err(err) = writer.send_all(lines::output_lines(&failure)).await {
            debug!(error = %err, "reader: failure report not sent");
        }
    }
}
