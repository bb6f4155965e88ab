//! Client for the engine's external module protocol.
//!
//! A [`Client`] owns one connection. Two tasks run per connection:
//!
//! - `reader`: reads inbound lines in order, completes pending requests,
//!   and dispatches messages to subscribers.
//! - `writer`: writes outbound lines one at a time.
//!
//! Requests are correlated by [`CorrelationKey`]; any number of requests
//! may be outstanding as long as their keys differ, and they complete in
//! whatever order the engine answers.
//!
//! ```rust,no_run
//! use yate_extmodule::{Client, ClientOptions, InstallRequest, Role};
//!
//! # async fn demo() -> yate_extmodule::Result<()> {
//! let client = Client::builder(ClientOptions::default())
//!     .on_message(|event| {
//!         if event.name == "call.route" {
//!             event.result = "tone/busy".into();
//!             event.set_handled(true);
//!         }
//!         Ok(())
//!     })
//!     .connect_tcp("127.0.0.1", 5039)
//!     .await?;
//!
//! client.install(&InstallRequest::new("call.route").priority(50)).await?;
//! let suffix = client.get_local("engine.cfgsuffix").await?;
//! client.log(&format!("config suffix is {suffix}")).await?;
//! # Ok(())
//! # }
//! ```

pub mod pending;
pub mod reader;
pub mod registry;
pub mod transport;
pub mod writer;

use std::sync::Arc;

use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::pending::PendingTable;
use crate::client::reader::{run_reader, ReaderContext};
use crate::client::registry::{HandlerResult, Registry, Subscriber};
use crate::client::writer::LineWriter;
use crate::config::TransportConfig;
use crate::wire::directive::{CorrelationKey, Directive};
use crate::wire::lines::MAX_LINE_BYTES;
use crate::wire::message::{
    is_true, lines, InstallRequest, InstallResult, LocalSetting, MessageEvent, MessageResponse,
    Role, TypedMessage, WireLine,
};
use crate::{ClientError, Result};

/// Default depth of the outbound line queue.
pub const DEFAULT_WRITE_QUEUE: usize = 256;

/// Where subscriber callbacks run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// On the reader task: the next line is read only after the callbacks
    /// and the acknowledgment of the current message are done.
    #[default]
    Inline,
    /// On a tracked task per message: the reader keeps reading while
    /// callbacks run. Outstanding work is drained before disconnect.
    Concurrent,
}

/// Connection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Role announced on the connect line.
    pub role: Role,
    /// Channel to attach to, for channel-bound roles.
    pub channel_id: Option<String>,
    /// Channel type; only sent together with `channel_id`.
    pub channel_type: Option<String>,
    /// Where subscriber callbacks run.
    pub dispatch: DispatchMode,
    /// Inbound line length limit.
    pub max_line_bytes: usize,
    /// Depth of the outbound line queue.
    pub write_queue: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            role: Role::Global,
            channel_id: None,
            channel_type: None,
            dispatch: DispatchMode::Inline,
            max_line_bytes: MAX_LINE_BYTES,
            write_queue: DEFAULT_WRITE_QUEUE,
        }
    }
}

/// Wrap a closure as a [`Subscriber`].
fn subscriber<F>(callback: F) -> Subscriber
where
    F: Fn(&mut MessageEvent) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(callback)
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Collects callbacks that must be in place before the first inbound line.
#[derive(Debug)]
pub struct ClientBuilder {
    options: ClientOptions,
    registry: Arc<Registry>,
}

impl ClientBuilder {
    /// Start a builder with `options`.
    #[must_use]
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            registry: Arc::new(Registry::new()),
        }
    }

    /// Call `callback` for every engine-initiated message before it is
    /// acknowledged. The callback may change the event to shape the
    /// acknowledgment.
    #[must_use]
    pub fn on_message<F>(self, callback: F) -> Self
    where
        F: Fn(&mut MessageEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.registry.add_message_hook(subscriber(callback));
        self
    }

    /// Call `callback` for every watched message.
    #[must_use]
    pub fn on_watch<F>(self, callback: F) -> Self
    where
        F: Fn(&mut MessageEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.registry.add_watch_hook(subscriber(callback));
        self
    }

    /// Call `callback` once when the connection ends.
    #[must_use]
    pub fn on_disconnect<F>(self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.registry.add_disconnect_hook(Box::new(callback));
        self
    }

    /// Connect over the transport described by `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Io`] when the transport cannot be opened, or
    /// [`ClientError::ConnectionClosed`] when the connect line cannot be sent.
    pub async fn connect(self, transport: &TransportConfig) -> Result<Client> {
        let (reader, writer) = transport::open(transport).await?;
        self.connect_stream(reader, writer).await
    }

    /// Connect to the engine's TCP listener.
    ///
    /// # Errors
    ///
    /// Same as [`ClientBuilder::connect`].
    pub async fn connect_tcp(self, host: &str, port: u16) -> Result<Client> {
        let (reader, writer) = transport::connect_tcp(host, port).await?;
        self.connect_stream(reader, writer).await
    }

    /// Talk to the engine over this process's standard input and output.
    ///
    /// # Errors
    ///
    /// Same as [`ClientBuilder::connect`].
    pub async fn connect_stdio(self) -> Result<Client> {
        let (reader, writer) = transport::stdio();
        self.connect_stream(reader, writer).await
    }

    /// Run the protocol over an arbitrary stream pair.
    ///
    /// Starts the writer and reader tasks, then sends the connect line as
    /// the first outbound traffic. The engine does not answer it; a refused
    /// connection shows up as a disconnect.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionClosed`] or [`ClientError::Io`] when
    /// the connect line cannot be written.
    pub async fn connect_stream<R, W>(self, reader: R, writer: W) -> Result<Client>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Self { options, registry } = self;
        let shutdown = CancellationToken::new();
        let closed = CancellationToken::new();
        let pending = PendingTable::new();

        let (line_writer, writer_task) =
            LineWriter::spawn(writer, options.write_queue, shutdown.clone());
        let ctx = ReaderContext {
            pending: Arc::clone(&pending),
            registry: Arc::clone(&registry),
            writer: line_writer.clone(),
            mode: options.dispatch,
            shutdown: shutdown.clone(),
            closed: closed.clone(),
            max_line_bytes: options.max_line_bytes,
        };
        let reader_task = tokio::spawn(run_reader(reader, ctx));

        let client = Client {
            inner: Arc::new(Inner {
                pending,
                registry,
                writer: line_writer,
                shutdown,
                closed,
                tasks: Mutex::new(Some(Tasks {
                    reader: reader_task,
                    writer: writer_task,
                })),
            }),
        };

        let connect = lines::connect(
            options.role,
            options.channel_id.as_deref(),
            options.channel_type.as_deref(),
        );
        client.inner.writer.send(connect).await?;
        info!(role = options.role.as_str(), "client: connected");
        Ok(client)
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Tasks {
    reader: JoinHandle<Result<()>>,
    writer: JoinHandle<Result<()>>,
}

#[derive(Debug)]
struct Inner {
    pending: Arc<PendingTable>,
    registry: Arc<Registry>,
    writer: LineWriter,
    shutdown: CancellationToken,
    closed: CancellationToken,
    /// `None` once [`Client::close`] has run.
    tasks: Mutex<Option<Tasks>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A connection to the engine.
///
/// Cheap to clone; all clones share the connection. The connection is
/// torn down by [`Client::close`] or when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Start building a client.
    #[must_use]
    pub fn builder(options: ClientOptions) -> ClientBuilder {
        ClientBuilder::new(options)
    }

    /// Connect to a TCP listener with `options` and no early callbacks.
    ///
    /// # Errors
    ///
    /// Same as [`ClientBuilder::connect`].
    pub async fn connect_tcp(host: &str, port: u16, options: ClientOptions) -> Result<Self> {
        ClientBuilder::new(options).connect_tcp(host, port).await
    }

    /// Send `text` to the engine log. No answer is expected.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionClosed`] or [`ClientError::Io`] when
    /// the line cannot be written.
    pub async fn log(&self, text: &str) -> Result<()> {
        self.inner.writer.send_all(lines::output_lines(text)).await
    }

    /// Read engine local parameter `name`.
    ///
    /// # Errors
    ///
    /// See [`Client::set_local`].
    pub async fn get_local(&self, name: &str) -> Result<String> {
        Ok(self.set_local(name, "").await?.value)
    }

    /// Change engine local parameter `name`; an empty value only reads it.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::DuplicateRequest`] when a `setlocal` for
    /// `name` is pending, [`ClientError::Engine`] or
    /// [`ClientError::ConnectionClosed`] when the request is failed, and
    /// [`ClientError::Decode`] for a malformed answer.
    pub async fn set_local(&self, name: &str, value: &str) -> Result<LocalSetting> {
        let key = CorrelationKey::new(Directive::SetLocalReply, name);
        let reply = self.request(key, lines::set_local(name, value)).await?;
        LocalSetting::from_line(&reply)
    }

    /// Ask the engine to process message `name`.
    ///
    /// The message gets a fresh id and the current time. `result` is the
    /// default return value.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Engine`] or [`ClientError::ConnectionClosed`]
    /// when the request is failed, and [`ClientError::Decode`] for a
    /// malformed answer.
    pub async fn send_message(
        &self,
        name: &str,
        result: &str,
        parameters: &[(String, String)],
    ) -> Result<MessageResponse> {
        let id = Uuid::new_v4().to_string();
        let time = chrono::Utc::now().timestamp();
        let key = CorrelationKey::new(Directive::MessageReply, id.as_str());
        let line = lines::message(&id, time, name, result, parameters);
        let reply = self.request(key, line).await?;
        MessageResponse::from_line(&reply)
    }

    /// Send a [`TypedMessage`] and parse its answer.
    ///
    /// # Errors
    ///
    /// Errors from [`Client::send_message`] and from
    /// [`TypedMessage::parse_response`].
    pub async fn send_typed<M: TypedMessage>(&self, message: &M) -> Result<M::Output> {
        let response = self
            .send_message(message.name(), message.result(), &message.parameters())
            .await?;
        message.parse_response(response)
    }

    /// Ask the engine to route messages matching `request` to this client.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::DuplicateRequest`] when an `install` for the
    /// same name is pending, otherwise as [`Client::set_local`].
    pub async fn install(&self, request: &InstallRequest) -> Result<InstallResult> {
        let key = CorrelationKey::new(Directive::InstallReply, request.name.as_str());
        let reply = self.request(key, lines::install(request)).await?;
        InstallResult::from_line(&reply)
    }

    /// [`Client::install`], registering `handler` for the message name
    /// first. The handler stays registered whatever the engine answers.
    ///
    /// # Errors
    ///
    /// Same as [`Client::install`].
    pub async fn install_with<F>(
        &self,
        request: &InstallRequest,
        handler: F,
    ) -> Result<InstallResult>
    where
        F: Fn(&mut MessageEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.registry.add_handler(&request.name, subscriber(handler));
        self.install(request).await
    }

    /// Remove this client's handler for `name` on the engine side.
    ///
    /// # Errors
    ///
    /// Same as [`Client::install`].
    pub async fn uninstall(&self, name: &str) -> Result<InstallResult> {
        let key = CorrelationKey::new(Directive::UninstallReply, name);
        let reply = self.request(key, lines::uninstall(name)).await?;
        InstallResult::from_line(&reply)
    }

    /// Subscribe to processed messages named `name`.
    ///
    /// # Errors
    ///
    /// Same as [`Client::set_local`].
    pub async fn watch(&self, name: &str) -> Result<bool> {
        let key = CorrelationKey::new(Directive::WatchReply, name);
        let reply = self.request(key, lines::watch(name)).await?;
        Ok(is_true(&reply.decoded_or_empty(2)?))
    }

    /// [`Client::watch`], appending `callback` to the watchers of `name`
    /// first. The callback stays registered whatever the engine answers.
    ///
    /// # Errors
    ///
    /// Same as [`Client::watch`].
    pub async fn watch_with<F>(&self, name: &str, callback: F) -> Result<bool>
    where
        F: Fn(&mut MessageEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.registry.add_watcher(name, subscriber(callback));
        self.watch(name).await
    }

    /// Cancel the engine-side subscription to `name`.
    ///
    /// Callbacks registered with [`Client::watch_with`] stay registered and
    /// run again if `name` is watched later.
    ///
    /// # Errors
    ///
    /// Same as [`Client::set_local`].
    pub async fn unwatch(&self, name: &str) -> Result<bool> {
        let key = CorrelationKey::new(Directive::UnwatchReply, name);
        let reply = self.request(key, lines::unwatch(name)).await?;
        Ok(is_true(&reply.decoded_or_empty(2)?))
    }

    /// See [`ClientBuilder::on_message`].
    pub fn on_message<F>(&self, callback: F)
    where
        F: Fn(&mut MessageEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.registry.add_message_hook(subscriber(callback));
    }

    /// See [`ClientBuilder::on_watch`].
    pub fn on_watch<F>(&self, callback: F)
    where
        F: Fn(&mut MessageEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.registry.add_watch_hook(subscriber(callback));
    }

    /// See [`ClientBuilder::on_disconnect`]. Runs immediately when the
    /// connection has already ended.
    pub fn on_disconnect<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.registry.add_disconnect_hook(Box::new(callback));
    }

    /// Number of requests waiting for an answer.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Whether the disconnect has been declared.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Wait until the disconnect has been declared.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await;
    }

    /// Tear the connection down.
    ///
    /// Stops the reader and writer, fails outstanding requests with
    /// [`ClientError::ConnectionClosed`], fires the disconnect callbacks if
    /// that has not happened yet, and drops every message callback. Later
    /// calls return `Ok(())` without doing anything.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the reader, if any: a protocol
    /// violation, an oversized line, or a non-benign transport failure.
    pub async fn close(&self) -> Result<()> {
        let Some(tasks) = self.inner.tasks.lock().await.take() else {
            return Ok(());
        };
        debug!("client: closing");
        self.inner.shutdown.cancel();

        let outcome = tasks
            .reader
            .await
            .map_err(|err| ClientError::Io(format!("reader task failed: {err}")))?;
        match tasks.writer.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(error = %err, "client: writer had failed"),
            Err(err) => debug!(error = %err, "client: writer task failed"),
        }

        self.inner.registry.clear();
        info!("client: closed");
        outcome
    }

    /// Register `key`, send `line`, and wait for the matching reply.
    async fn request(&self, key: CorrelationKey, line: String) -> Result<WireLine> {
        let slot = self.inner.pending.register(key)?;
        self.inner.writer.send(line).await?;
        slot.wait().await
    }
}
