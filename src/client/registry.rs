//! Subscriber registry.
//!
//! Holds the callbacks the reader invokes for inbound messages:
//!
//! | List                 | Invoked for                                        |
//! |----------------------|----------------------------------------------------|
//! | watch hooks          | every unclaimed `%<message` (watched notification) |
//! | watchers, by name    | unclaimed `%<message` with that name               |
//! | message hooks        | every engine-initiated `%>message`                 |
//! | handlers, by name    | engine-initiated `%>message` with that name        |
//! | disconnect hooks     | once, when the connection ends                     |
//!
//! Lists only grow while the connection lives; they are cleared on teardown.
//! Callbacks run outside the registry locks, so a callback may register
//! further callbacks.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::wire::message::MessageEvent;

/// Error a subscriber may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of one subscriber invocation.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// A message callback.
pub type Subscriber = Arc<dyn Fn(&mut MessageEvent) -> HandlerResult + Send + Sync>;

/// A disconnect callback.
pub type DisconnectHook = Box<dyn FnOnce() + Send>;

type NamedLists = RwLock<HashMap<String, Vec<Subscriber>>>;

/// Per-connection callback registry.
pub struct Registry {
    watchers: NamedLists,
    handlers: NamedLists,
    watch_hooks: RwLock<Vec<Subscriber>>,
    message_hooks: RwLock<Vec<Subscriber>>,
    /// `None` once the disconnect has been declared.
    disconnect_hooks: Mutex<Option<Vec<DisconnectHook>>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("watched_names", &names(&self.watchers))
            .field("handled_names", &names(&self.handlers))
            .finish_non_exhaustive()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create an empty registry that has not seen a disconnect.
    #[must_use]
    pub fn new() -> Self {
        Self {
            watchers: RwLock::default(),
            handlers: RwLock::default(),
            watch_hooks: RwLock::default(),
            message_hooks: RwLock::default(),
            disconnect_hooks: Mutex::new(Some(Vec::new())),
        }
    }

    /// Append a callback for watched messages named `name`.
    pub fn add_watcher(&self, name: &str, subscriber: Subscriber) {
        push_named(&self.watchers, name, subscriber);
    }

    /// Append a handler for engine-initiated messages named `name`.
    pub fn add_handler(&self, name: &str, subscriber: Subscriber) {
        push_named(&self.handlers, name, subscriber);
    }

    /// Append a callback for every watched message.
    pub fn add_watch_hook(&self, subscriber: Subscriber) {
        self.watch_hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscriber);
    }

    /// Append a callback for every engine-initiated message.
    pub fn add_message_hook(&self, subscriber: Subscriber) {
        self.message_hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscriber);
    }

    /// Register a disconnect callback.
    ///
    /// When the disconnect has already been declared the callback runs
    /// immediately.
    pub fn add_disconnect_hook(&self, hook: DisconnectHook) {
        let mut hooks = self
            .disconnect_hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match hooks.as_mut() {
            Some(pending) => pending.push(hook),
            None => {
                drop(hooks);
                hook();
            }
        }
    }

    /// Number of watch callbacks registered for `name`.
    #[must_use]
    pub fn watcher_count(&self, name: &str) -> usize {
        count_named(&self.watchers, name)
    }

    /// Number of handlers registered for `name`.
    #[must_use]
    pub fn handler_count(&self, name: &str) -> usize {
        count_named(&self.handlers, name)
    }

    /// Callbacks for a watched message named `name`, hooks first.
    #[must_use]
    pub fn notification_subscribers(&self, name: &str) -> Vec<Subscriber> {
        collect(&self.watch_hooks, &self.watchers, name)
    }

    /// Callbacks for an engine-initiated message named `name`, hooks first.
    #[must_use]
    pub fn dispatch_subscribers(&self, name: &str) -> Vec<Subscriber> {
        collect(&self.message_hooks, &self.handlers, name)
    }

    /// Run the disconnect callbacks. Only the first call has any effect.
    ///
    /// Returns whether this call declared the disconnect.
    pub fn fire_disconnect(&self) -> bool {
        let hooks = self
            .disconnect_hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(hooks) = hooks else {
            return false;
        };
        for hook in hooks {
            hook();
        }
        true
    }

    /// Whether the disconnect has been declared.
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.disconnect_hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Drop every message callback.
    pub fn clear(&self) {
        self.watchers.write().unwrap_or_else(PoisonError::into_inner).clear();
        self.handlers.write().unwrap_or_else(PoisonError::into_inner).clear();
        self.watch_hooks.write().unwrap_or_else(PoisonError::into_inner).clear();
        self.message_hooks.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Invoke `subscribers` in order on `event`.
///
/// A failing or panicking subscriber does not prevent the others from
/// running. Returns one description per failure.
#[must_use]
pub fn invoke(subscribers: &[Subscriber], event: &mut MessageEvent) -> Vec<String> {
    let mut failures = Vec::new();
    for subscriber in subscribers {
        match catch_unwind(AssertUnwindSafe(|| subscriber(event))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => failures.push(err.to_string()),
            Err(panic) => failures.push(panic_message(panic.as_ref())),
        }
    }
    failures
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "subscriber panicked".to_owned()
    }
}

fn push_named(lists: &NamedLists, name: &str, subscriber: Subscriber) {
    lists
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(name.to_owned())
        .or_default()
        .push(subscriber);
}

fn count_named(lists: &NamedLists, name: &str) -> usize {
    lists
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .map_or(0, Vec::len)
}

fn collect(hooks: &RwLock<Vec<Subscriber>>, lists: &NamedLists, name: &str) -> Vec<Subscriber> {
    let mut out = hooks.read().unwrap_or_else(PoisonError::into_inner).clone();
    if let Some(named) = lists.read().unwrap_or_else(PoisonError::into_inner).get(name) {
        out.extend(named.iter().cloned());
    }
    out
}

fn names(lists: &NamedLists) -> Vec<String> {
    lists
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect()
}
