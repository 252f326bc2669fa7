//! Server-side session state keyed by the session cookie.
//!
//! The store owns two shapes per browser session: the [`PendingFlow`] between
//! login initiation and callback, and the [`AuthenticatedSession`] afterwards.
//! Flash messages ride along so redirects can report outcomes.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Error type returned by [`SessionStore`] implementations.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// How long a pending authorization stays valid.
pub const PENDING_FLOW_TTL: Duration = Duration::from_secs(10 * 60);

/// CSRF state and PKCE verifier for an authorization in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFlow {
    pub state: String,
    pub code_verifier: String,
}

/// How the session was authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    Local,
    External,
}

/// Identity attached to a browser session after login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedSession {
    pub is_authenticated: bool,
    pub provider: AuthProvider,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub project_id: Option<String>,
    pub vm_count: Option<u64>,
}

impl AuthenticatedSession {
    /// Session for a static-credential login: no identity attributes.
    #[must_use]
    pub fn local() -> Self {
        Self {
            is_authenticated: true,
            provider: AuthProvider::Local,
            user_name: None,
            user_email: None,
            project_id: None,
            vm_count: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashLevel {
    Success,
    Info,
    Error,
}

/// One-shot user-visible message shown on the next page view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Flash {
    pub level: FlashLevel,
    pub message: String,
}

impl Flash {
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: FlashLevel::Success,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: FlashLevel::Info,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: FlashLevel::Error,
            message: message.into(),
        }
    }
}

/// Typed session persistence.
///
/// Sessions are identified by the opaque id stored in the session cookie.
/// `take_pending` must remove the flow atomically: of two concurrent callers
/// for the same session, at most one may receive it.
pub trait SessionStore: Send + Sync + 'static {
    /// Record a pending authorization, replacing any earlier one.
    fn put_pending(
        &self,
        session_id: &str,
        flow: PendingFlow,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove and return the pending authorization, if one is live.
    fn take_pending(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<Option<PendingFlow>, StoreError>> + Send;

    fn load(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<Option<AuthenticatedSession>, StoreError>> + Send;

    fn save(
        &self,
        session_id: &str,
        session: AuthenticatedSession,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Drop everything held for the session (logout).
    fn clear(&self, session_id: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Re-key the session under `new_id` after a privilege change.
    ///
    /// The authenticated session and queued flashes move to `new_id`. Any
    /// pending flow is dropped and nothing remains under `old_id`.
    fn rotate(
        &self,
        old_id: &str,
        new_id: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn push_flash(
        &self,
        session_id: &str,
        flash: Flash,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove and return queued flash messages, oldest first.
    fn take_flashes(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<Vec<Flash>, StoreError>> + Send;
}

/// Writes between sweeps of idle records.
const SWEEP_INTERVAL: usize = 64;

struct SessionRecord {
    pending: Option<(PendingFlow, Instant)>,
    auth: Option<AuthenticatedSession>,
    flashes: Vec<Flash>,
    touched: Instant,
}

impl SessionRecord {
    fn new() -> Self {
        Self {
            pending: None,
            auth: None,
            flashes: Vec::new(),
            touched: Instant::now(),
        }
    }

    fn is_empty(&self) -> bool {
        self.pending.is_none() && self.auth.is_none() && self.flashes.is_empty()
    }

    /// Drop an expired pending flow and report whether the record is worth keeping.
    ///
    /// Anonymous records (pending flows, flashes) live no longer than `ttl` past
    /// their last write. Authenticated records stay until logout.
    fn sweep(&mut self, ttl: Duration) -> bool {
        if self
            .pending
            .as_ref()
            .is_some_and(|(_, created)| created.elapsed() >= ttl)
        {
            self.pending = None;
        }
        self.auth.is_some() || (!self.is_empty() && self.touched.elapsed() < ttl)
    }
}

#[derive(Default)]
struct Records {
    map: HashMap<String, SessionRecord>,
    writes: usize,
}

/// In-process [`SessionStore`] backed by a mutex-guarded map.
///
/// Every [`SWEEP_INTERVAL`] writes the map is swept of expired pending flows
/// and idle anonymous records, so abandoned logins do not accumulate.
pub struct MemorySessionStore {
    records: Mutex<Records>,
    pending_ttl: Duration,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Records::default()),
            pending_ttl: PENDING_FLOW_TTL,
        }
    }

    /// Override how long a pending authorization stays valid.
    #[must_use]
    pub fn with_pending_ttl(mut self, ttl: Duration) -> Self {
        self.pending_ttl = ttl;
        self
    }

    fn with_records<T>(&self, f: impl FnOnce(&mut Records) -> T) -> Result<T, StoreError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| StoreError::from("session map lock poisoned"))?;
        Ok(f(&mut records))
    }

    fn with_record<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut SessionRecord) -> T,
    ) -> Result<T, StoreError> {
        let ttl = self.pending_ttl;
        self.with_records(|records| {
            records.writes = records.writes.wrapping_add(1);
            if records.writes % SWEEP_INTERVAL == 0 {
                let before = records.map.len();
                records.map.retain(|_, record| record.sweep(ttl));
                tracing::debug!(evicted = before - records.map.len(), "Swept session records");
            }

            let record = records
                .map
                .entry(session_id.to_string())
                .or_insert_with(SessionRecord::new);
            record.touched = Instant::now();
            let out = f(record);
            if record.is_empty() {
                records.map.remove(session_id);
            }
            out
        })
    }

    #[cfg(test)]
    fn record_count(&self) -> usize {
        self.with_records(|records| records.map.len()).unwrap_or(0)
    }
}

impl SessionStore for MemorySessionStore {
    async fn put_pending(&self, session_id: &str, flow: PendingFlow) -> Result<(), StoreError> {
        self.with_record(session_id, |record| {
            record.pending = Some((flow, Instant::now()));
        })
    }

    async fn take_pending(&self, session_id: &str) -> Result<Option<PendingFlow>, StoreError> {
        let ttl = self.pending_ttl;
        self.with_record(session_id, |record| {
            record
                .pending
                .take()
                .filter(|(_, created)| created.elapsed() < ttl)
                .map(|(flow, _)| flow)
        })
    }

    async fn load(&self, session_id: &str) -> Result<Option<AuthenticatedSession>, StoreError> {
        self.with_records(|records| {
            records
                .map
                .get(session_id)
                .and_then(|r| r.auth.clone())
        })
    }

    async fn save(
        &self,
        session_id: &str,
        session: AuthenticatedSession,
    ) -> Result<(), StoreError> {
        self.with_record(session_id, |record| record.auth = Some(session))
    }

    async fn clear(&self, session_id: &str) -> Result<(), StoreError> {
        self.with_records(|records| {
            records.map.remove(session_id);
        })
    }

    async fn rotate(&self, old_id: &str, new_id: &str) -> Result<(), StoreError> {
        self.with_records(|records| {
            let Some(old) = records.map.remove(old_id) else {
                return;
            };
            let moved = SessionRecord {
                auth: old.auth,
                flashes: old.flashes,
                ..SessionRecord::new()
            };
            if !moved.is_empty() {
                records.map.insert(new_id.to_string(), moved);
            }
        })
    }

    async fn push_flash(&self, session_id: &str, flash: Flash) -> Result<(), StoreError> {
        self.with_record(session_id, |record| record.flashes.push(flash))
    }

    async fn take_flashes(&self, session_id: &str) -> Result<Vec<Flash>, StoreError> {
        self.with_record(session_id, |record| std::mem::take(&mut record.flashes))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn flow(state: &str) -> PendingFlow {
        PendingFlow {
            state: state.into(),
            code_verifier: format!("{state}-verifier"),
        }
    }

    #[tokio::test]
    async fn test_take_pending_is_single_use() {
        let store = MemorySessionStore::new();
        store.put_pending("sid", flow("s1")).await.unwrap();

        assert_eq!(store.take_pending("sid").await.unwrap(), Some(flow("s1")));
        assert_eq!(store.take_pending("sid").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_new_pending_overwrites_previous() {
        let store = MemorySessionStore::new();
        store.put_pending("sid", flow("s1")).await.unwrap();
        store.put_pending("sid", flow("s2")).await.unwrap();

        assert_eq!(store.take_pending("sid").await.unwrap(), Some(flow("s2")));
    }

    #[tokio::test]
    async fn test_expired_pending_is_absent() {
        let store = MemorySessionStore::new().with_pending_ttl(Duration::ZERO);
        store.put_pending("sid", flow("s1")).await.unwrap();

        assert_eq!(store.take_pending("sid").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = MemorySessionStore::new();
        store.put_pending("a", flow("s1")).await.unwrap();
        store.save("b", AuthenticatedSession::local()).await.unwrap();

        assert_eq!(store.take_pending("b").await.unwrap(), None);
        assert_eq!(store.load("a").await.unwrap(), None);
        assert_eq!(
            store.load("b").await.unwrap(),
            Some(AuthenticatedSession::local())
        );
    }

    #[tokio::test]
    async fn test_clear_drops_everything() {
        let store = MemorySessionStore::new();
        store.put_pending("sid", flow("s1")).await.unwrap();
        store.save("sid", AuthenticatedSession::local()).await.unwrap();
        store.push_flash("sid", Flash::info("hi")).await.unwrap();

        store.clear("sid").await.unwrap();

        assert_eq!(store.take_pending("sid").await.unwrap(), None);
        assert_eq!(store.load("sid").await.unwrap(), None);
        assert!(store.take_flashes("sid").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rotate_moves_session_and_flashes() {
        let store = MemorySessionStore::new();
        store.put_pending("old", flow("s1")).await.unwrap();
        store.save("old", AuthenticatedSession::local()).await.unwrap();
        store.push_flash("old", Flash::error("earlier")).await.unwrap();

        store.rotate("old", "new").await.unwrap();

        assert_eq!(store.load("old").await.unwrap(), None);
        assert!(store.take_flashes("old").await.unwrap().is_empty());
        assert_eq!(
            store.load("new").await.unwrap(),
            Some(AuthenticatedSession::local())
        );
        assert_eq!(store.take_pending("new").await.unwrap(), None);
        assert_eq!(
            store.take_flashes("new").await.unwrap(),
            vec![Flash::error("earlier")]
        );
    }

    #[tokio::test]
    async fn test_abandoned_logins_are_evicted() {
        let store = MemorySessionStore::new().with_pending_ttl(Duration::ZERO);
        for i in 0..1000 {
            store.put_pending(&format!("sid-{i}"), flow("s")).await.unwrap();
            store
                .push_flash(&format!("flash-{i}"), Flash::error("nope"))
                .await
                .unwrap();
        }
        store.save("kept", AuthenticatedSession::local()).await.unwrap();

        assert!(store.record_count() <= SWEEP_INTERVAL + 1);
    }

    #[tokio::test]
    async fn test_sweep_keeps_authenticated_and_live_records() {
        let store = MemorySessionStore::new();
        store.save("auth", AuthenticatedSession::local()).await.unwrap();
        store.put_pending("live", flow("s1")).await.unwrap();
        for i in 0..SWEEP_INTERVAL * 2 {
            store.push_flash(&format!("other-{i}"), Flash::info("x")).await.unwrap();
        }

        assert_eq!(
            store.load("auth").await.unwrap(),
            Some(AuthenticatedSession::local())
        );
        assert_eq!(store.take_pending("live").await.unwrap(), Some(flow("s1")));
    }

    #[tokio::test]
    async fn test_sweep_never_evicts_authenticated_sessions() {
        let store = MemorySessionStore::new().with_pending_ttl(Duration::ZERO);
        store.save("auth", AuthenticatedSession::local()).await.unwrap();
        for i in 0..SWEEP_INTERVAL * 2 {
            store.put_pending(&format!("sid-{i}"), flow("s")).await.unwrap();
        }

        assert_eq!(
            store.load("auth").await.unwrap(),
            Some(AuthenticatedSession::local())
        );
    }

    #[tokio::test]
    async fn test_flashes_are_consumed_in_order() {
        let store = MemorySessionStore::new();
        store.push_flash("sid", Flash::error("first")).await.unwrap();
        store.push_flash("sid", Flash::success("second")).await.unwrap();

        let flashes = store.take_flashes("sid").await.unwrap();
        assert_eq!(flashes, vec![Flash::error("first"), Flash::success("second")]);
        assert!(store.take_flashes("sid").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_take_pending_yields_one_winner() {
        let store = Arc::new(MemorySessionStore::new());
        store.put_pending("sid", flow("s1")).await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.take_pending("sid").await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
