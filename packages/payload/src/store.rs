//! The live, shared payload store.
//!
//! `PayloadStore` wraps a [`Payload`] behind one lock so that every compound
//! mutation (clearing a key, applying a fetch result) is atomic. It also owns
//! the keyed pending-operation registry and the in-flight `once` map, which
//! is what lets a clear drop pending work together with the data it would
//! have written.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::broadcast;
use tracing::debug;

use crate::payload::{state_key, Payload};
use crate::record::ErrorRecord;
use crate::Value;

const CHANGE_CAPACITY: usize = 256;

/// Outcome of a keyed fetch, shared between everyone awaiting it.
pub type FetchResult = std::result::Result<Value, ErrorRecord>;

/// A keyed fetch that several callers can await.
pub type PendingFetch = Shared<BoxFuture<'static, FetchResult>>;

type OnceFuture = Shared<BoxFuture<'static, std::result::Result<(), ErrorRecord>>>;

/// Which part of the payload a change touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Data,
    State,
    Errors,
    Once,
    Error,
}

/// A change notification. `key` is `None` for whole-section changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadChange {
    pub section: Section,
    pub key: Option<String>,
}

impl PayloadChange {
    fn keyed(section: Section, key: &str) -> Self {
        Self {
            section,
            key: Some(key.to_string()),
        }
    }
}

/// Which keys a [`PayloadStore::clear`] affects.
pub enum ClearKeys<'a> {
    /// Every data key.
    All,
    /// Exactly these keys.
    Keys(Vec<String>),
    /// Every data key the predicate accepts.
    Matching(&'a (dyn Fn(&str) -> bool + Send + Sync)),
}

impl From<&str> for ClearKeys<'_> {
    fn from(key: &str) -> Self {
        ClearKeys::Keys(vec![key.to_string()])
    }
}

impl From<Vec<String>> for ClearKeys<'_> {
    fn from(keys: Vec<String>) -> Self {
        ClearKeys::Keys(keys)
    }
}

impl From<&[&str]> for ClearKeys<'_> {
    fn from(keys: &[&str]) -> Self {
        ClearKeys::Keys(keys.iter().map(|k| k.to_string()).collect())
    }
}

struct PendingEntry {
    token: u64,
    fetch: PendingFetch,
}

#[derive(Default)]
struct Inner {
    payload: Payload,
    pending: HashMap<String, PendingEntry>,
    once_inflight: HashMap<String, OnceFuture>,
    next_token: u64,
}

/// Shared container for everything that crosses from server render to client
/// hydration.
pub struct PayloadStore {
    inner: Mutex<Inner>,
    changes: broadcast::Sender<PayloadChange>,
}

impl Default for PayloadStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadStore {
    pub fn new() -> Self {
        Self::from_payload(Payload::default())
    }

    /// Seed a store from a revived payload.
    pub fn from_payload(payload: Payload) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                payload,
                ..Inner::default()
            }),
            changes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, change: PayloadChange) {
        // No receivers is fine.
        let _ = self.changes.send(change);
    }

    /// Receive a notification for every subsequent change.
    pub fn subscribe(&self) -> broadcast::Receiver<PayloadChange> {
        self.changes.subscribe()
    }

    /// Read the whole payload under the lock.
    pub fn read<R>(&self, f: impl FnOnce(&Payload) -> R) -> R {
        f(&self.lock().payload)
    }

    /// Clone the current payload.
    pub fn snapshot(&self) -> Payload {
        self.lock().payload.clone()
    }

    /// Replace the payload wholesale, dropping all pending work.
    pub fn replace(&self, payload: Payload) {
        {
            let mut inner = self.lock();
            inner.payload = payload;
            inner.pending.clear();
        }
        for section in [Section::Data, Section::State, Section::Errors, Section::Error] {
            self.notify(PayloadChange { section, key: None });
        }
    }

    // -- data ---------------------------------------------------------------

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().payload.data.get(key).cloned()
    }

    /// Whether `key` holds non-null data.
    pub fn has(&self, key: &str) -> bool {
        self.lock()
            .payload
            .data
            .get(key)
            .is_some_and(|v| !v.is_null())
    }

    pub fn set(&self, key: &str, value: Value) {
        self.lock().payload.data.insert(key.to_string(), value);
        self.notify(PayloadChange::keyed(Section::Data, key));
    }

    /// Null out data, errors and pending work for the selected keys.
    ///
    /// Everything happens under one lock; returns the keys that were cleared.
    pub fn clear<'a>(&self, keys: impl Into<ClearKeys<'a>>) -> Vec<String> {
        let cleared = {
            let mut inner = self.lock();
            let targets: Vec<String> = match keys.into() {
                ClearKeys::All => inner.payload.data.keys().cloned().collect(),
                ClearKeys::Keys(keys) => keys,
                ClearKeys::Matching(predicate) => inner
                    .payload
                    .data
                    .keys()
                    .filter(|k| predicate(k.as_str()))
                    .cloned()
                    .collect(),
            };
            for key in &targets {
                if let Some(slot) = inner.payload.data.get_mut(key) {
                    *slot = Value::Null;
                }
                if let Some(slot) = inner.payload.errors.get_mut(key) {
                    *slot = None;
                }
                inner.pending.remove(key);
            }
            targets
        };
        debug!(keys = ?cleared, "cleared payload keys");
        for key in &cleared {
            self.notify(PayloadChange::keyed(Section::Data, key));
            self.notify(PayloadChange::keyed(Section::Errors, key));
        }
        cleared
    }

    // -- errors -------------------------------------------------------------

    pub fn error_for(&self, key: &str) -> Option<ErrorRecord> {
        self.lock().payload.errors.get(key).cloned().flatten()
    }

    /// Record (or reset) the error for `key`.
    ///
    /// A data slot is created as null when missing so every error key stays
    /// tied to a data key.
    pub fn set_error(&self, key: &str, error: Option<ErrorRecord>) {
        {
            let mut inner = self.lock();
            inner
                .payload
                .data
                .entry(key.to_string())
                .or_insert(Value::Null);
            inner.payload.errors.insert(key.to_string(), error);
        }
        self.notify(PayloadChange::keyed(Section::Errors, key));
    }

    pub fn global_error(&self) -> Option<ErrorRecord> {
        self.lock().payload.error.clone()
    }

    pub fn set_global_error(&self, error: Option<ErrorRecord>) {
        self.lock().payload.error = error;
        self.notify(PayloadChange {
            section: Section::Error,
            key: None,
        });
    }

    // -- state --------------------------------------------------------------

    pub fn state(&self, key: &str) -> Option<Value> {
        self.lock().payload.state.get(&state_key(key)).cloned()
    }

    pub fn set_state(&self, key: &str, value: Value) {
        self.lock().payload.state.insert(state_key(key), value);
        self.notify(PayloadChange::keyed(Section::State, key));
    }

    /// Read `key`, initializing it with `init` when absent.
    pub fn state_or_init(&self, key: &str, init: impl FnOnce() -> Value) -> Value {
        let (value, created) = {
            let mut inner = self.lock();
            let internal = state_key(key);
            match inner.payload.state.get(&internal) {
                Some(value) => (value.clone(), false),
                None => {
                    let value = init();
                    inner.payload.state.insert(internal, value.clone());
                    (value, true)
                }
            }
        };
        if created {
            self.notify(PayloadChange::keyed(Section::State, key));
        }
        value
    }

    pub fn remove_state(&self, key: &str) -> Option<Value> {
        let removed = self.lock().payload.state.remove(&state_key(key));
        if removed.is_some() {
            self.notify(PayloadChange::keyed(Section::State, key));
        }
        removed
    }

    // -- metadata -----------------------------------------------------------

    pub fn server_rendered(&self) -> bool {
        self.lock().payload.server_rendered
    }

    pub fn set_server_rendered(&self, server_rendered: bool) {
        self.lock().payload.server_rendered = server_rendered;
    }

    pub fn set_path(&self, path: impl Into<String>) {
        self.lock().payload.path = Some(path.into());
    }

    pub fn set_prerendered_at(&self, timestamp_ms: i64) {
        self.lock().payload.prerendered_at = Some(timestamp_ms);
    }

    pub fn set_config(&self, config: Value) {
        self.lock().payload.config = config;
    }

    // -- once ---------------------------------------------------------------

    pub fn is_once_done(&self, key: &str) -> bool {
        self.lock().payload.once.contains(key)
    }

    /// Run `f` at most once for `key`.
    ///
    /// Concurrent callers with the same key await the same execution. A
    /// failed run leaves the key unmarked so a later call may retry.
    ///
    /// `f` is only called by the caller whose entry wins the registration,
    /// and not until that shared execution is first polled.
    pub async fn call_once<F, Fut>(
        &self,
        key: &str,
        f: F,
    ) -> std::result::Result<(), ErrorRecord>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), ErrorRecord>> + Send + 'static,
    {
        let shared = {
            let mut inner = self.lock();
            if inner.payload.once.contains(key) {
                return Ok(());
            }
            inner
                .once_inflight
                .entry(key.to_string())
                .or_insert_with(|| async move { f().await }.boxed().shared())
                .clone()
        };

        let result = shared.clone().await;

        let newly_done = {
            let mut inner = self.lock();
            if inner
                .once_inflight
                .get(key)
                .is_some_and(|current| current.ptr_eq(&shared))
            {
                inner.once_inflight.remove(key);
            }
            result.is_ok() && inner.payload.once.insert(key.to_string())
        };
        if newly_done {
            self.notify(PayloadChange::keyed(Section::Once, key));
        }
        result
    }

    /// Allow the given once keys to run again.
    pub fn rearm_once(&self, keys: &[&str]) {
        {
            let mut inner = self.lock();
            for key in keys {
                inner.payload.once.remove(*key);
            }
        }
        for key in keys {
            self.notify(PayloadChange::keyed(Section::Once, key));
        }
    }

    // -- pending keyed operations -------------------------------------------

    /// The in-flight fetch for `key`, if any, with its token.
    pub fn pending(&self, key: &str) -> Option<(u64, PendingFetch)> {
        self.lock()
            .pending
            .get(key)
            .map(|entry| (entry.token, entry.fetch.clone()))
    }

    /// Register `fetch` as the current operation for `key`, superseding any
    /// previous one. The returned token identifies this operation.
    pub fn begin_pending(&self, key: &str, fetch: BoxFuture<'static, FetchResult>) -> (u64, PendingFetch) {
        let mut inner = self.lock();
        inner.next_token += 1;
        let token = inner.next_token;
        let fetch = fetch.shared();
        inner.pending.insert(
            key.to_string(),
            PendingEntry {
                token,
                fetch: fetch.clone(),
            },
        );
        (token, fetch)
    }

    /// Apply a finished fetch if `token` is still current for `key`.
    ///
    /// Stale results (superseded or cleared meanwhile) are discarded and
    /// `false` is returned.
    pub fn finish_pending(&self, key: &str, token: u64, result: FetchResult) -> bool {
        {
            let mut inner = self.lock();
            match inner.pending.get(key) {
                Some(entry) if entry.token == token => {}
                _ => return false,
            }
            inner.pending.remove(key);
            match result {
                Ok(value) => {
                    inner.payload.data.insert(key.to_string(), value);
                    inner.payload.errors.insert(key.to_string(), None);
                }
                Err(record) => {
                    inner
                        .payload
                        .data
                        .entry(key.to_string())
                        .or_insert(Value::Null);
                    inner.payload.errors.insert(key.to_string(), Some(record));
                }
            }
        }
        self.notify(PayloadChange::keyed(Section::Data, key));
        self.notify(PayloadChange::keyed(Section::Errors, key));
        true
    }

    /// Drop the pending operation for `key` without applying it.
    pub fn cancel_pending(&self, key: &str) -> bool {
        self.lock().pending.remove(key).is_some()
    }
}

impl std::fmt::Debug for PayloadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("PayloadStore")
            .field("payload", &inner.payload)
            .field("pending", &inner.pending.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn get_and_set() {
        let store = PayloadStore::new();
        assert_eq!(store.get("a"), None);
        store.set("a", Value::from(1i64));
        assert_eq!(store.get("a"), Some(Value::Integer(1)));
        assert!(store.has("a"));
    }

    #[test]
    fn state_is_prefixed_and_separate_from_data() {
        let store = PayloadStore::new();
        store.set("count", Value::from("data"));
        store.set_state("count", Value::from(1i64));
        assert_eq!(store.get("count"), Some(Value::from("data")));
        assert_eq!(store.state("count"), Some(Value::Integer(1)));
        store.read(|p| assert!(p.state.contains_key("$scount")));
    }

    #[test]
    fn state_or_init_only_initializes_once() {
        let store = PayloadStore::new();
        assert_eq!(store.state_or_init("n", || Value::from(1i64)), Value::Integer(1));
        assert_eq!(store.state_or_init("n", || Value::from(2i64)), Value::Integer(1));
    }

    #[test]
    fn set_error_creates_data_slot() {
        let store = PayloadStore::new();
        store.set_error("missing", Some(ErrorRecord::new("boom")));
        store.read(|p| {
            assert_eq!(p.data.get("missing"), Some(&Value::Null));
            assert!(p.errors["missing"].is_some());
        });
    }

    #[test]
    fn clear_variants() {
        let store = PayloadStore::new();
        for key in ["user:1", "user:2", "post:1"] {
            store.set(key, Value::from(key));
        }

        store.clear("post:1");
        assert_eq!(store.get("post:1"), Some(Value::Null));
        assert!(store.has("user:1"));

        let users = |k: &str| k.starts_with("user:");
        let cleared = store.clear(ClearKeys::Matching(&users));
        assert_eq!(cleared, vec!["user:1".to_string(), "user:2".to_string()]);
        assert!(!store.has("user:1"));

        store.set("x", Value::from(1i64));
        store.clear(ClearKeys::All);
        assert!(!store.has("x"));
    }

    #[tokio::test]
    async fn clear_resets_errors_and_pending_together() {
        let store = PayloadStore::new();
        store.set_error("k", Some(ErrorRecord::new("stale")));
        let (token, _fetch) = store.begin_pending("k", async { Ok::<_, ErrorRecord>(Value::from(1i64)) }.boxed());

        store.clear("k");

        assert_eq!(store.error_for("k"), None);
        assert!(store.pending("k").is_none());
        assert!(!store.finish_pending("k", token, Ok(Value::from(1i64))));
        assert_eq!(store.get("k"), Some(Value::Null));
    }

    #[test]
    fn newer_pending_supersedes_older() {
        let store = PayloadStore::new();
        let (old, _) = store.begin_pending("k", async { Ok::<_, ErrorRecord>(Value::from(1i64)) }.boxed());
        let (new, _) = store.begin_pending("k", async { Ok::<_, ErrorRecord>(Value::from(2i64)) }.boxed());

        assert!(store.finish_pending("k", new, Ok(Value::from(2i64))));
        assert!(!store.finish_pending("k", old, Ok(Value::from(1i64))));
        assert_eq!(store.get("k"), Some(Value::Integer(2)));
    }

    #[test]
    fn failed_fetch_records_error() {
        let store = PayloadStore::new();
        let (token, _) = store.begin_pending("k", async { Err::<Value, _>(ErrorRecord::new("x")) }.boxed());
        assert!(store.finish_pending("k", token, Err(ErrorRecord::new("down"))));
        assert_eq!(store.error_for("k").map(|e| e.message), Some("down".to_string()));
        assert_eq!(store.get("k"), Some(Value::Null));
    }

    #[tokio::test]
    async fn call_once_runs_once() {
        let store = PayloadStore::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let counter = counter.clone();
            store
                .call_once("init", move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), ErrorRecord>(())
                })
                .await
                .unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(store.is_once_done("init"));
    }

    #[tokio::test]
    async fn concurrent_call_once_shares_execution() {
        let store = Arc::new(PayloadStore::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let run = |store: Arc<PayloadStore>, counter: Arc<AtomicUsize>| async move {
            store
                .call_once("slow", move || async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), ErrorRecord>(())
                })
                .await
        };

        let (a, b) = tokio::join!(
            run(store.clone(), counter.clone()),
            run(store.clone(), counter.clone())
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_call_once_calls_the_closure_once() {
        let store = Arc::new(PayloadStore::new());
        let setups = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let (store, setups, runs) = (store.clone(), setups.clone(), runs.clone());
                tokio::spawn(async move {
                    store
                        .call_once("boot", move || {
                            setups.fetch_add(1, Ordering::SeqCst);
                            async move {
                                tokio::time::sleep(Duration::from_millis(10)).await;
                                runs.fetch_add(1, Ordering::SeqCst);
                                Ok::<(), ErrorRecord>(())
                            }
                        })
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(setups.load(Ordering::SeqCst), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(store.is_once_done("boot"));
    }

    #[tokio::test]
    async fn failed_once_can_retry_and_rearm_reruns() {
        let store = PayloadStore::new();
        let err = store
            .call_once("k", || async { Err::<(), _>(ErrorRecord::new("nope")) })
            .await;
        assert!(err.is_err());
        assert!(!store.is_once_done("k"));

        let counter = Arc::new(AtomicUsize::new(0));
        let bump = |counter: Arc<AtomicUsize>| {
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), ErrorRecord>(())
            }
        };
        store.call_once("k", bump(counter.clone())).await.unwrap();
        store.rearm_once(&["k"]);
        store.call_once("k", bump(counter.clone())).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let store = PayloadStore::new();
        let mut rx = store.subscribe();
        store.set("a", Value::from(1i64));
        store.set_state("b", Value::from(2i64));

        assert_eq!(rx.recv().await.unwrap(), PayloadChange::keyed(Section::Data, "a"));
        assert_eq!(rx.recv().await.unwrap(), PayloadChange::keyed(Section::State, "b"));
    }
}
