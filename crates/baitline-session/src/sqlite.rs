//! SQLite-backed session store and callback log.
//!
//! Sessions are stored as a JSON document plus the handful of columns the
//! queries filter on. The claim columns are only ever written by
//! `try_claim`/`release_claim`; the claim itself is a conditional
//! `UPDATE ... WHERE callback_sent = 0` whose change count is the answer.

use crate::callback_log::CallbackLog;
use crate::store::{reconcile, SessionFilter, SessionStore};
use async_trait::async_trait;
use baitline_core::{BaitlineError, BaitlineResult, CallbackRecord, Session, SessionStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    session_id       TEXT PRIMARY KEY,
    status           TEXT NOT NULL,
    scam_detected    INTEGER NOT NULL DEFAULT 0,
    callback_sent    INTEGER NOT NULL DEFAULT 0,
    callback_sent_at INTEGER,
    last_update_ms   INTEGER NOT NULL,
    data             TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sessions_stale
    ON sessions (scam_detected, callback_sent, status, last_update_ms);

CREATE TABLE IF NOT EXISTS callbacks (
    id           TEXT PRIMARY KEY,
    session_id   TEXT NOT NULL,
    sent_time_ms INTEGER NOT NULL,
    data         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_callbacks_session ON callbacks (session_id, sent_time_ms);
";

type Shared = Arc<Mutex<Connection>>;

/// Run a blocking closure against the shared connection off the runtime.
async fn with_conn<T, F>(conn: &Shared, f: F) -> BaitlineResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> BaitlineResult<T> + Send + 'static,
{
    let conn = conn.clone();
    tokio::task::spawn_blocking(move || {
        let mut guard = conn.lock();
        f(&mut guard)
    })
    .await
    .map_err(|e| BaitlineError::StoreUnavailable(format!("sqlite worker failed: {e}")))?
    .map_err(classify)
}

/// Promote connection-level failures to `StoreUnavailable`.
fn classify(err: BaitlineError) -> BaitlineError {
    if let BaitlineError::Sqlite(rusqlite::Error::SqliteFailure(code, msg)) = &err {
        let unreachable = matches!(
            code.code,
            ErrorCode::CannotOpen
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::NotADatabase
        );
        if unreachable {
            return BaitlineError::StoreUnavailable(
                msg.clone().unwrap_or_else(|| code.to_string()),
            );
        }
    }
    err
}

fn status_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Active => "active",
        SessionStatus::Completed => "completed",
    }
}

struct SessionRow {
    data: String,
    callback_sent: bool,
    callback_sent_at: Option<i64>,
}

impl SessionRow {
    fn decode(self) -> BaitlineResult<Session> {
        let mut session: Session = serde_json::from_str(&self.data)?;
        session.callback_sent = self.callback_sent;
        session.callback_sent_at = self.callback_sent_at.and_then(DateTime::from_timestamp_millis);
        Ok(session)
    }
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        data: row.get(0)?,
        callback_sent: row.get::<_, i64>(1)? != 0,
        callback_sent_at: row.get(2)?,
    })
}

fn load(conn: &Connection, session_id: &str) -> BaitlineResult<Option<Session>> {
    let row = conn
        .query_row(
            "SELECT data, callback_sent, callback_sent_at FROM sessions WHERE session_id = ?1",
            params![session_id],
            read_row,
        )
        .optional()?;
    row.map(SessionRow::decode).transpose()
}

fn limit_param(limit: Option<usize>) -> i64 {
    limit
        .and_then(|l| i64::try_from(l).ok())
        .unwrap_or(-1)
}

// ---------------------------------------------------------------------------
// SqliteSessionStore
// ---------------------------------------------------------------------------

pub struct SqliteSessionStore {
    conn: Shared,
}

impl SqliteSessionStore {
    pub fn open(path: impl AsRef<Path>) -> BaitlineResult<Self> {
        let conn = Connection::open(path).map_err(|e| classify(e.into()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> BaitlineResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> BaitlineResult<Self> {
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version > SCHEMA_VERSION {
            return Err(BaitlineError::Store(format!(
                "unsupported schema version {version} (supported: {SCHEMA_VERSION})"
            )));
        }
        if version < SCHEMA_VERSION {
            conn.execute_batch(SCHEMA)?;
            conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// A callback log sharing this store's database.
    pub fn callback_log(&self) -> SqliteCallbackLog {
        SqliteCallbackLog {
            conn: self.conn.clone(),
        }
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn find_by_id(&self, session_id: &str) -> BaitlineResult<Option<Session>> {
        let id = session_id.to_string();
        with_conn(&self.conn, move |conn| load(conn, &id)).await
    }

    async fn upsert(&self, session: &Session) -> BaitlineResult<Session> {
        let incoming = session.clone();
        with_conn(&self.conn, move |conn| {
            let tx = conn.transaction()?;
            let stored = load(&tx, &incoming.session_id)?;
            let merged = reconcile(incoming, stored.as_ref());
            let data = serde_json::to_string(&merged)?;
            tx.execute(
                "
                INSERT INTO sessions (
                    session_id, status, scam_detected, last_update_ms, data
                ) VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(session_id) DO UPDATE SET
                    status = excluded.status,
                    scam_detected = excluded.scam_detected,
                    last_update_ms = excluded.last_update_ms,
                    data = excluded.data
                ",
                params![
                    merged.session_id,
                    status_str(merged.status),
                    i64::from(merged.scam_detected),
                    merged.last_update_time.timestamp_millis(),
                    data,
                ],
            )?;
            tx.commit()?;
            Ok(merged)
        })
        .await
    }

    async fn try_claim(&self, session_id: &str, at: DateTime<Utc>) -> BaitlineResult<bool> {
        let id = session_id.to_string();
        with_conn(&self.conn, move |conn| {
            let changes = conn.execute(
                "UPDATE sessions SET callback_sent = 1, callback_sent_at = ?2
                 WHERE session_id = ?1 AND callback_sent = 0",
                params![id, at.timestamp_millis()],
            )?;
            Ok(changes == 1)
        })
        .await
    }

    async fn release_claim(&self, session_id: &str) -> BaitlineResult<()> {
        let id = session_id.to_string();
        with_conn(&self.conn, move |conn| {
            conn.execute(
                "UPDATE sessions SET callback_sent = 0, callback_sent_at = NULL
                 WHERE session_id = ?1",
                params![id],
            )?;
            Ok(())
        })
        .await
    }

    async fn find_stale(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> BaitlineResult<Vec<Session>> {
        let limit = limit_param(Some(limit));
        with_conn(&self.conn, move |conn| {
            let mut stmt = conn.prepare(
                "SELECT data, callback_sent, callback_sent_at FROM sessions
                 WHERE scam_detected = 1 AND callback_sent = 0 AND status = 'active'
                   AND last_update_ms < ?1
                 ORDER BY last_update_ms ASC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![cutoff.timestamp_millis(), limit], read_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(SessionRow::decode).collect()
        })
        .await
    }

    async fn list(&self, filter: &SessionFilter) -> BaitlineResult<Vec<Session>> {
        let filter = *filter;
        with_conn(&self.conn, move |conn| {
            let mut stmt = conn.prepare(
                "SELECT data, callback_sent, callback_sent_at FROM sessions
                 WHERE (?1 = 0 OR scam_detected = 1)
                 ORDER BY last_update_ms DESC, session_id ASC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let skip = i64::try_from(filter.skip).unwrap_or(i64::MAX);
            let rows = stmt
                .query_map(
                    params![i64::from(filter.scam_only), limit_param(filter.limit), skip],
                    read_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(SessionRow::decode).collect()
        })
        .await
    }

    async fn count(&self, filter: &SessionFilter) -> BaitlineResult<usize> {
        let scam_only = filter.scam_only;
        with_conn(&self.conn, move |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sessions WHERE (?1 = 0 OR scam_detected = 1)",
                params![i64::from(scam_only)],
                |row| row.get(0),
            )?;
            Ok(usize::try_from(n).unwrap_or_default())
        })
        .await
    }

    async fn ping(&self) -> BaitlineResult<()> {
        with_conn(&self.conn, |conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// SqliteCallbackLog
// ---------------------------------------------------------------------------

pub struct SqliteCallbackLog {
    conn: Shared,
}

#[async_trait]
impl CallbackLog for SqliteCallbackLog {
    async fn append(&self, record: &CallbackRecord) -> BaitlineResult<()> {
        let record = record.clone();
        with_conn(&self.conn, move |conn| {
            let data = serde_json::to_string(&record)?;
            conn.execute(
                "INSERT INTO callbacks (id, session_id, sent_time_ms, data)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.id.to_string(),
                    record.session_id,
                    record.sent_time.timestamp_millis(),
                    data,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn for_session(&self, session_id: &str) -> BaitlineResult<Vec<CallbackRecord>> {
        let id = session_id.to_string();
        with_conn(&self.conn, move |conn| {
            let mut stmt = conn.prepare(
                "SELECT data FROM callbacks WHERE session_id = ?1 ORDER BY sent_time_ms ASC",
            )?;
            let rows = stmt
                .query_map(params![id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            rows.iter()
                .map(|data| serde_json::from_str(data).map_err(BaitlineError::from))
                .collect()
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
