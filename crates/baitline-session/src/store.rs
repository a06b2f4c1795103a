use async_trait::async_trait;
use baitline_core::{BaitlineError, BaitlineResult, Session, SessionStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

// ---------------------------------------------------------------------------
// SessionFilter
// ---------------------------------------------------------------------------

/// Paging and filtering for [`SessionStore::list`] and [`SessionStore::count`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionFilter {
    pub skip: usize,
    /// `None` returns everything after `skip`.
    pub limit: Option<usize>,
    pub scam_only: bool,
}

impl SessionFilter {
    pub fn matches(&self, session: &Session) -> bool {
        !self.scam_only || session.scam_detected
    }

    /// Filter, order newest-first and page an unordered set of sessions.
    pub fn apply(&self, sessions: impl IntoIterator<Item = Session>) -> Vec<Session> {
        let mut matched: Vec<Session> = sessions.into_iter().filter(|s| self.matches(s)).collect();
        matched.sort_by(|a, b| {
            b.last_update_time
                .cmp(&a.last_update_time)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        matched
            .into_iter()
            .skip(self.skip)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }
}

/// Whether a session is due for the inactivity sweep.
pub fn is_stale(session: &Session, cutoff: DateTime<Utc>) -> bool {
    session.scam_detected
        && !session.callback_sent
        && session.status == SessionStatus::Active
        && session.last_update_time < cutoff
}

/// Oldest-first selection of stale sessions, at most `limit`.
pub fn select_stale(
    sessions: impl IntoIterator<Item = Session>,
    cutoff: DateTime<Utc>,
    limit: usize,
) -> Vec<Session> {
    let mut stale: Vec<Session> = sessions
        .into_iter()
        .filter(|s| is_stale(s, cutoff))
        .collect();
    stale.sort_by(|a, b| a.last_update_time.cmp(&b.last_update_time));
    stale.truncate(limit);
    stale
}

/// Prepare a snapshot for writing over `stored` (if any).
///
/// Claim fields are never taken from the caller; a brand-new record starts
/// unclaimed.
pub fn reconcile(mut incoming: Session, stored: Option<&Session>) -> Session {
    match stored {
        Some(stored) => incoming.merge_durable_fields(stored),
        None => {
            incoming.callback_sent = false;
            incoming.callback_sent_at = None;
        }
    }
    incoming
}

// ---------------------------------------------------------------------------
// SessionStore trait
// ---------------------------------------------------------------------------

/// Durable home of [`Session`] records and the source of truth for the
/// exactly-once claim.
///
/// Implementations must make [`try_claim`](SessionStore::try_claim) an
/// atomic test-and-set, and must report an unreachable backend as
/// [`BaitlineError::StoreUnavailable`].
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find_by_id(&self, session_id: &str) -> BaitlineResult<Option<Session>>;

    /// Insert or update. Never writes `callback_sent`/`callback_sent_at`,
    /// never regresses `status` or `scam_detected`.
    ///
    /// Returns the record as stored after reconciliation.
    async fn upsert(&self, session: &Session) -> BaitlineResult<Session>;

    /// Set `callback_sent` if and only if it is currently unset.
    ///
    /// Returns `false` for an already-claimed or unknown session.
    async fn try_claim(&self, session_id: &str, at: DateTime<Utc>) -> BaitlineResult<bool>;

    /// Undo a claim after a failed delivery.
    async fn release_claim(&self, session_id: &str) -> BaitlineResult<()>;

    /// Active, scam-flagged, unclaimed sessions last updated before `cutoff`.
    async fn find_stale(&self, cutoff: DateTime<Utc>, limit: usize)
        -> BaitlineResult<Vec<Session>>;

    async fn list(&self, filter: &SessionFilter) -> BaitlineResult<Vec<Session>>;

    async fn count(&self, filter: &SessionFilter) -> BaitlineResult<usize>;

    /// Cheap reachability probe.
    async fn ping(&self) -> BaitlineResult<()>;
}

// ---------------------------------------------------------------------------
// MemorySessionStore
// ---------------------------------------------------------------------------

/// In-process store for tests and ephemeral deployments.
///
/// [`set_available`](MemorySessionStore::set_available) simulates an outage:
/// while unavailable every call fails with `StoreUnavailable`.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    offline: AtomicBool,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    fn check(&self) -> BaitlineResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BaitlineError::StoreUnavailable(
                "memory store is offline".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn find_by_id(&self, session_id: &str) -> BaitlineResult<Option<Session>> {
        self.check()?;
        Ok(self.sessions.lock().get(session_id).cloned())
    }

    async fn upsert(&self, session: &Session) -> BaitlineResult<Session> {
        self.check()?;
        let mut sessions = self.sessions.lock();
        let merged = reconcile(session.clone(), sessions.get(&session.session_id));
        sessions.insert(merged.session_id.clone(), merged.clone());
        Ok(merged)
    }

    async fn try_claim(&self, session_id: &str, at: DateTime<Utc>) -> BaitlineResult<bool> {
        self.check()?;
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(session_id) {
            Some(session) if !session.callback_sent => {
                session.callback_sent = true;
                session.callback_sent_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_claim(&self, session_id: &str) -> BaitlineResult<()> {
        self.check()?;
        if let Some(session) = self.sessions.lock().get_mut(session_id) {
            session.callback_sent = false;
            session.callback_sent_at = None;
        }
        Ok(())
    }

    async fn find_stale(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> BaitlineResult<Vec<Session>> {
        self.check()?;
        let snapshot: Vec<Session> = self.sessions.lock().values().cloned().collect();
        Ok(select_stale(snapshot, cutoff, limit))
    }

    async fn list(&self, filter: &SessionFilter) -> BaitlineResult<Vec<Session>> {
        self.check()?;
        let snapshot: Vec<Session> = self.sessions.lock().values().cloned().collect();
        Ok(filter.apply(snapshot))
    }

    async fn count(&self, filter: &SessionFilter) -> BaitlineResult<usize> {
        self.check()?;
        Ok(self
            .sessions
            .lock()
            .values()
            .filter(|s| filter.matches(s))
            .count())
    }

    async fn ping(&self) -> BaitlineResult<()> {
        self.check()
    }
}

// ---------------------------------------------------------------------------
// FileSessionStore
// ---------------------------------------------------------------------------

/// JSON-file store, one file per session.
///
/// Writes go through a temp file and a rename so readers never observe a
/// torn record. Every read-modify-write (upsert, claim, release) holds the
/// same async lock, which is what makes `try_claim` atomic within the
/// process.
pub struct FileSessionStore {
    dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileSessionStore {
    pub async fn new(dir: PathBuf) -> BaitlineResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(session_id)))
    }

    async fn read(&self, session_id: &str) -> BaitlineResult<Option<Session>> {
        let path = self.session_path(session_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => {
                let session: Session = serde_json::from_str(&data).map_err(|e| {
                    BaitlineError::Store(format!("Failed to parse session {session_id}: {e}"))
                })?;
                Ok(Some(session))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // A vanished directory means the backing volume is gone,
                // not that the session does not exist.
                if tokio::fs::metadata(&self.dir).await.is_err() {
                    return Err(unavailable(&self.dir, e));
                }
                Ok(None)
            }
            Err(e) => Err(unavailable(&self.dir, e)),
        }
    }

    async fn write(&self, session: &Session) -> BaitlineResult<()> {
        let path = self.session_path(&session.session_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(session)?;
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| unavailable(&self.dir, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| unavailable(&self.dir, e))?;
        Ok(())
    }

    async fn read_all(&self) -> BaitlineResult<Vec<Session>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| unavailable(&self.dir, e))?;
        let mut sessions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| unavailable(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = match tokio::fs::read_to_string(&path).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable session file");
                    continue;
                }
            };
            match serde_json::from_str::<Session>(&data) {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping corrupt session file");
                }
            }
        }
        Ok(sessions)
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn find_by_id(&self, session_id: &str) -> BaitlineResult<Option<Session>> {
        self.read(session_id).await
    }

    async fn upsert(&self, session: &Session) -> BaitlineResult<Session> {
        let _guard = self.write_lock.lock().await;
        let stored = self.read(&session.session_id).await?;
        let merged = reconcile(session.clone(), stored.as_ref());
        self.write(&merged).await?;
        Ok(merged)
    }

    async fn try_claim(&self, session_id: &str, at: DateTime<Utc>) -> BaitlineResult<bool> {
        let _guard = self.write_lock.lock().await;
        let Some(mut session) = self.read(session_id).await? else {
            return Ok(false);
        };
        if session.callback_sent {
            return Ok(false);
        }
        session.callback_sent = true;
        session.callback_sent_at = Some(at);
        self.write(&session).await?;
        Ok(true)
    }

    async fn release_claim(&self, session_id: &str) -> BaitlineResult<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(mut session) = self.read(session_id).await? {
            session.callback_sent = false;
            session.callback_sent_at = None;
            self.write(&session).await?;
        }
        Ok(())
    }

    async fn find_stale(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> BaitlineResult<Vec<Session>> {
        Ok(select_stale(self.read_all().await?, cutoff, limit))
    }

    async fn list(&self, filter: &SessionFilter) -> BaitlineResult<Vec<Session>> {
        Ok(filter.apply(self.read_all().await?))
    }

    async fn count(&self, filter: &SessionFilter) -> BaitlineResult<usize> {
        Ok(self
            .read_all()
            .await?
            .iter()
            .filter(|s| filter.matches(s))
            .count())
    }

    async fn ping(&self) -> BaitlineResult<()> {
        let meta = tokio::fs::metadata(&self.dir)
            .await
            .map_err(|e| unavailable(&self.dir, e))?;
        if !meta.is_dir() {
            return Err(BaitlineError::StoreUnavailable(format!(
                "{} is not a directory",
                self.dir.display()
            )));
        }
        Ok(())
    }
}

fn unavailable(dir: &std::path::Path, e: std::io::Error) -> BaitlineError {
    BaitlineError::StoreUnavailable(format!("{}: {e}", dir.display()))
}

/// Filesystem-safe, collision-free encoding of an opaque session id.
pub(crate) fn file_stem(session_id: &str) -> String {
    let mut out = String::with_capacity(session_id.len());
    for b in session_id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
