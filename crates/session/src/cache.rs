//! Keyed session cache with heartbeat supervision.
//!
//! Every record owns a set of tasks, all cancelled through the record's
//! token:
//!
//! - a heartbeat, armed while the session has credentials;
//! - an auth watcher that re-arms or disarms the heartbeat when the
//!   session's credentials change;
//! - a one-shot grace check that evicts the record if it is still
//!   unauthenticated after [`CacheConfig::auth_grace_period`].
//!
//! Evictions triggered by these tasks only remove the record that spawned
//! them; a record replaced under the same key is left alone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use holosens_httpconn::AuthState;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::SessionError;
use crate::heartbeat::heartbeat;
use crate::session::{ClientSession, ServerSession, Session};

/// A cached session of either role.
#[derive(Debug, Clone)]
pub enum CachedSession {
    Server(Arc<ServerSession>),
    Client(Arc<ClientSession>),
}

impl CachedSession {
    pub fn session(&self) -> &Session {
        match self {
            Self::Server(s) => s.session(),
            Self::Client(c) => c.session(),
        }
    }

    /// Serial number from the registration, for server sessions.
    pub fn serial_number(&self) -> Option<&str> {
        match self {
            Self::Server(s) => Some(s.serial_number()),
            Self::Client(_) => None,
        }
    }

    fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Server(a), Self::Server(b)) => Arc::ptr_eq(a, b),
            (Self::Client(a), Self::Client(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<ServerSession> for CachedSession {
    fn from(session: ServerSession) -> Self {
        Self::Server(Arc::new(session))
    }
}

impl From<Arc<ServerSession>> for CachedSession {
    fn from(session: Arc<ServerSession>) -> Self {
        Self::Server(session)
    }
}

impl From<ClientSession> for CachedSession {
    fn from(session: ClientSession) -> Self {
        Self::Client(Arc::new(session))
    }
}

impl From<Arc<ClientSession>> for CachedSession {
    fn from(session: Arc<ClientSession>) -> Self {
        Self::Client(session)
    }
}

struct Heartbeat {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub(crate) struct Record {
    /// Distinguishes records that reuse a key.
    pub(crate) id: u64,
    pub(crate) key: String,
    pub(crate) session: CachedSession,
    cancel: CancellationToken,
    /// Serializes arming and disarming.
    heartbeat: Mutex<Option<Heartbeat>>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Record {
    /// Replaces the running heartbeat, if any, with a fresh one.
    async fn arm_heartbeat(self: &Arc<Self>, cache: Weak<CacheInner>, config: &CacheConfig) {
        let mut slot = self.heartbeat.lock().await;
        if let Some(old) = slot.take() {
            old.cancel.cancel();
            join(old.handle, &self.key).await;
        }
        if self.cancel.is_cancelled() {
            return;
        }
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(heartbeat(
            cache,
            self.clone(),
            config.clone(),
            cancel.clone(),
        ));
        *slot = Some(Heartbeat { cancel, handle });
        debug!(key = %self.key, "heartbeat armed");
    }

    async fn disarm_heartbeat(&self) {
        let running = self.heartbeat.lock().await.take();
        if let Some(hb) = running {
            hb.cancel.cancel();
            join(hb.handle, &self.key).await;
            debug!(key = %self.key, "heartbeat disarmed");
        }
    }

    async fn heartbeat_armed(&self) -> bool {
        self.heartbeat
            .lock()
            .await
            .as_ref()
            .is_some_and(|hb| !hb.handle.is_finished())
    }

    fn track(&self, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(handle);
        }
    }

    /// Stops every task of the record and waits for them to finish.
    async fn shutdown(&self, close_session: bool) {
        self.cancel.cancel();
        if close_session {
            self.session.session().close().await;
        }
        self.disarm_heartbeat().await;
        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => Vec::new(),
        };
        for handle in tasks {
            join(handle, &self.key).await;
        }
    }
}

async fn join(handle: JoinHandle<()>, key: &str) {
    if let Err(e) = handle.await {
        if e.is_panic() {
            warn!(key = %key, "session task panicked");
        }
    }
}

pub(crate) struct CacheInner {
    records: RwLock<HashMap<String, Arc<Record>>>,
    config: CacheConfig,
    next_id: AtomicU64,
}

impl CacheInner {
    /// Removes `key` only while it still maps to record `id`.
    pub(crate) async fn evict_if_current(&self, key: &str, id: u64) -> bool {
        let removed = {
            let mut records = self.records.write().await;
            match records.get(key) {
                Some(record) if record.id == id => records.remove(key),
                _ => None,
            }
        };
        match removed {
            Some(record) => {
                record.shutdown(true).await;
                info!(key = %key, "session evicted");
                true
            }
            None => false,
        }
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        for record in self.records.get_mut().values() {
            record.cancel.cancel();
        }
    }
}

/// Sessions by key, each supervised by its own tasks.
///
/// Cheap to clone; clones share the same records. Dropping the last clone
/// stops all supervision tasks without closing the sessions explicitly.
#[derive(Clone)]
pub struct SessionCache {
    inner: Arc<CacheInner>,
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl SessionCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                records: RwLock::new(HashMap::new()),
                config,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Caches `session` under `key`, closing whatever was cached there.
    pub async fn set(&self, key: impl Into<String>, session: impl Into<CachedSession>) {
        let key = key.into();
        let session = session.into();
        let record = Arc::new(Record {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            key: key.clone(),
            session,
            cancel: CancellationToken::new(),
            heartbeat: Mutex::new(None),
            tasks: std::sync::Mutex::new(Vec::new()),
        });

        let previous = self
            .inner
            .records
            .write()
            .await
            .insert(key.clone(), record.clone());
        if let Some(old) = previous {
            let close = !old.session.same_as(&record.session);
            info!(key = %key, "replacing cached session");
            old.shutdown(close).await;
        }

        let auth_rx = record.session.session().subscribe_auth();
        let authorized = auth_rx.borrow().configured;
        if authorized {
            record
                .arm_heartbeat(Arc::downgrade(&self.inner), &self.inner.config)
                .await;
        }

        let watcher = tokio::spawn(watch_auth(
            Arc::downgrade(&self.inner),
            record.clone(),
            auth_rx,
        ));
        let grace = tokio::spawn(grace_check(Arc::downgrade(&self.inner), record.clone()));
        record.track(watcher);
        record.track(grace);

        info!(key = %key, authorized, "session cached");
    }

    pub async fn get(&self, key: &str) -> Option<CachedSession> {
        self.inner
            .records
            .read()
            .await
            .get(key)
            .map(|r| r.session.clone())
    }

    pub async fn get_server(&self, key: &str) -> Result<Arc<ServerSession>, SessionError> {
        match self.get(key).await {
            Some(CachedSession::Server(s)) => Ok(s),
            Some(CachedSession::Client(_)) => Err(SessionError::RoleMismatch(key.to_string())),
            None => Err(SessionError::KeyNotFound(key.to_string())),
        }
    }

    pub async fn get_client(&self, key: &str) -> Result<Arc<ClientSession>, SessionError> {
        match self.get(key).await {
            Some(CachedSession::Client(c)) => Ok(c),
            Some(CachedSession::Server(_)) => Err(SessionError::RoleMismatch(key.to_string())),
            None => Err(SessionError::KeyNotFound(key.to_string())),
        }
    }

    /// Every cached session, in no particular order.
    pub async fn list(&self) -> Vec<CachedSession> {
        self.inner
            .records
            .read()
            .await
            .values()
            .map(|r| r.session.clone())
            .collect()
    }

    /// Server sessions ordered by serial number.
    pub async fn list_server(&self) -> Vec<Arc<ServerSession>> {
        let mut list: Vec<_> = self
            .inner
            .records
            .read()
            .await
            .values()
            .filter_map(|r| match &r.session {
                CachedSession::Server(s) => Some(s.clone()),
                CachedSession::Client(_) => None,
            })
            .collect();
        list.sort_by(|a, b| a.serial_number().cmp(b.serial_number()));
        list
    }

    /// Client sessions, in no particular order.
    pub async fn list_client(&self) -> Vec<Arc<ClientSession>> {
        self.inner
            .records
            .read()
            .await
            .values()
            .filter_map(|r| match &r.session {
                CachedSession::Client(c) => Some(c.clone()),
                CachedSession::Server(_) => None,
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.records.read().await.is_empty()
    }

    /// Whether a heartbeat is currently running for `key`.
    pub async fn is_heartbeat_armed(&self, key: &str) -> bool {
        let record = self.inner.records.read().await.get(key).cloned();
        match record {
            Some(record) => record.heartbeat_armed().await,
            None => false,
        }
    }

    /// Stops supervision, closes the session and forgets `key`.
    ///
    /// Returns `false` if nothing was cached under `key`.
    pub async fn remove(&self, key: &str) -> bool {
        let removed = self.inner.records.write().await.remove(key);
        match removed {
            Some(record) => {
                record.shutdown(true).await;
                info!(key = %key, "session removed");
                true
            }
            None => false,
        }
    }

    /// Removes every record.
    pub async fn shutdown(&self) {
        let records: Vec<_> = self.inner.records.write().await.drain().collect();
        for (key, record) in records {
            record.shutdown(true).await;
            debug!(key = %key, "session removed on shutdown");
        }
    }
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Follows credential changes of the record's session.
async fn watch_auth(
    cache: Weak<CacheInner>,
    record: Arc<Record>,
    mut auth_rx: watch::Receiver<AuthState>,
) {
    loop {
        tokio::select! {
            biased;
            _ = record.cancel.cancelled() => break,
            changed = auth_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let configured = auth_rx.borrow_and_update().configured;
        if configured {
            let Some(inner) = cache.upgrade() else {
                break;
            };
            info!(key = %record.key, "credentials changed, re-arming heartbeat");
            record
                .arm_heartbeat(Arc::downgrade(&inner), &inner.config)
                .await;
        } else {
            info!(key = %record.key, "credentials cleared, stopping heartbeat");
            record.disarm_heartbeat().await;
        }
    }
}

/// Evicts the record if its session is still unauthenticated once the
/// grace period is over.
async fn grace_check(cache: Weak<CacheInner>, record: Arc<Record>) {
    let Some(period) = cache.upgrade().map(|inner| inner.config.auth_grace_period) else {
        return;
    };
    tokio::select! {
        biased;
        _ = record.cancel.cancelled() => return,
        _ = tokio::time::sleep(period) => {}
    }

    if record.session.session().is_authorized() {
        return;
    }
    warn!(key = %record.key, "no credentials within grace period, evicting");
    // Eviction joins this task, so it must run elsewhere.
    if let Some(inner) = cache.upgrade() {
        let (key, id) = (record.key.clone(), record.id);
        tokio::spawn(async move { inner.evict_if_current(&key, id).await });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::SessionConfig;
    use tokio::io::duplex;

    async fn idle_client() -> ClientSession {
        let (ours, theirs) = duplex(1024);
        // Keep the peer open for the lifetime of the test runtime.
        tokio::spawn(async move {
            let _theirs = theirs;
            std::future::pending::<()>().await
        });
        ClientSession::new(ours, &SessionConfig::default()).await
    }

    #[tokio::test]
    async fn eviction_ignores_a_replaced_record() {
        let cache = SessionCache::default();
        cache.set("k", idle_client().await).await;
        let first = cache.inner.records.read().await["k"].id;

        let second = Arc::new(idle_client().await);
        cache.set("k", second.clone()).await;

        assert!(!cache.inner.evict_if_current("k", first).await);
        assert!(!second.is_closed());
        assert!(cache.get("k").await.is_some());

        let current = cache.inner.records.read().await["k"].id;
        assert!(cache.inner.evict_if_current("k", current).await);
        assert!(second.is_closed());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn setting_the_same_session_again_keeps_it_open() {
        let cache = SessionCache::default();
        let session = Arc::new(idle_client().await);
        cache.set("k", session.clone()).await;
        cache.set("k", session.clone()).await;
        assert!(!session.is_closed());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn dropping_the_cache_stops_record_tasks() {
        let cache = SessionCache::default();
        let session = Arc::new(idle_client().await);
        cache.set("k", session.clone()).await;
        let record = cache.inner.records.read().await["k"].clone();

        drop(cache);
        assert!(record.cancel.is_cancelled());
    }
}
