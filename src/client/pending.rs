//! Pending-request table.
//!
//! Maps a [`CorrelationKey`] to the one-shot slot of the request waiting for
//! it. The reader completes slots as responses arrive; callers await them.
//!
//! A slot removes its own entry when dropped before completion, so a request
//! whose future is cancelled leaves nothing behind and a late response for
//! its key is treated as unclaimed. Each registration carries a token so a
//! stale slot never removes a newer registration under the same key.
//!
//! Once the connection is gone the table is closed: outstanding slots are
//! failed and every later registration is refused under the same lock, so
//! no request can slip in after the final drain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::debug;

use crate::wire::directive::CorrelationKey;
use crate::wire::message::WireLine;
use crate::{ClientError, Result};

type Completion = Result<WireLine>;

#[derive(Debug)]
struct Entry {
    token: u64,
    tx: oneshot::Sender<Completion>,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<CorrelationKey, Entry>,
    /// Set once the connection is gone; later registrations fail with it.
    closed: Option<ClientError>,
}

/// Concurrent map from correlation key to the waiting request.
#[derive(Debug, Default)]
pub struct PendingTable {
    state: Mutex<State>,
    next_token: AtomicU64,
}

impl PendingTable {
    /// Create an empty, shareable table.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve `key` for a new request.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::DuplicateRequest`] when a request under `key`
    /// is already outstanding (the existing request is unaffected), or the
    /// error the table was closed with.
    pub fn register(self: &Arc<Self>, key: CorrelationKey) -> Result<PendingSlot> {
        let (tx, rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.state();
            if let Some(err) = &state.closed {
                return Err(err.clone());
            }
            if state.entries.contains_key(&key) {
                return Err(ClientError::DuplicateRequest(format!(
                    "request '{key}' is already pending"
                )));
            }
            state.entries.insert(key.clone(), Entry { token, tx });
        }
        Ok(PendingSlot {
            key,
            token,
            rx,
            table: Arc::clone(self),
        })
    }

    /// Deliver `line` to the request waiting on `key`.
    ///
    /// Returns `false` when no request claims the key; the caller decides
    /// what an unclaimed line means.
    pub fn complete(&self, key: &CorrelationKey, line: WireLine) -> bool {
        let Some(entry) = self.state().entries.remove(key) else {
            return false;
        };
        if entry.tx.send(Ok(line)).is_err() {
            debug!(%key, "pending: waiter dropped before completion");
        }
        true
    }

    /// Fail every outstanding request with `error` and clear the table.
    ///
    /// Returns the number of requests failed.
    pub fn fail_all(&self, error: &ClientError) -> usize {
        let drained: Vec<Entry> = self.state().entries.drain().map(|(_, entry)| entry).collect();
        fail_entries(drained, error)
    }

    /// Fail every outstanding request with `error` and refuse new ones.
    ///
    /// Only the first call records the error; later calls still drain.
    /// Returns the number of requests failed.
    pub fn close(&self, error: &ClientError) -> usize {
        let drained: Vec<Entry> = {
            let mut state = self.state();
            state.closed.get_or_insert_with(|| error.clone());
            state.entries.drain().map(|(_, entry)| entry).collect()
        };
        fail_entries(drained, error)
    }

    /// Whether [`PendingTable::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state().closed.is_some()
    }

    /// Number of outstanding requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    /// Whether no request is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    /// Whether a request under `key` is outstanding.
    #[must_use]
    pub fn contains(&self, key: &CorrelationKey) -> bool {
        self.state().entries.contains_key(key)
    }

    fn abandon(&self, key: &CorrelationKey, token: u64) {
        let mut state = self.state();
        if state.entries.get(key).is_some_and(|entry| entry.token == token) {
            state.entries.remove(key);
            debug!(%key, "pending: request abandoned");
        }
    }
}

fn fail_entries(entries: Vec<Entry>, error: &ClientError) -> usize {
    let count = entries.len();
    for entry in entries {
        // A closed receiver means the waiter is already gone.
        let _ = entry.tx.send(Err(error.clone()));
    }
    count
}

/// The receiving side of one registered request.
///
/// Dropping the slot before completion unregisters the request.
#[derive(Debug)]
pub struct PendingSlot {
    key: CorrelationKey,
    token: u64,
    rx: oneshot::Receiver<Completion>,
    table: Arc<PendingTable>,
}

impl PendingSlot {
    /// Key this slot is registered under.
    #[must_use]
    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }

    /// Wait for the response line.
    ///
    /// # Errors
    ///
    /// Returns the error the slot was failed with ([`ClientError::Engine`]
    /// or [`ClientError::ConnectionClosed`]), or
    /// [`ClientError::ConnectionClosed`] if the table was dropped.
    pub async fn wait(mut self) -> Result<WireLine> {
        match (&mut self.rx).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ClientError::ConnectionClosed(format!(
                "request '{}' abandoned",
                self.key
            ))),
        }
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.table.abandon(&self.key, self.token);
    }
}
