use crate::store::file_stem;
use async_trait::async_trait;
use baitline_core::{BaitlineResult, CallbackRecord};
use parking_lot::Mutex;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

// ---------------------------------------------------------------------------
// CallbackLog trait
// ---------------------------------------------------------------------------

/// Append-only audit trail of dispatch attempts.
#[async_trait]
pub trait CallbackLog: Send + Sync {
    async fn append(&self, record: &CallbackRecord) -> BaitlineResult<()>;
    /// All attempts for one session, oldest first.
    async fn for_session(&self, session_id: &str) -> BaitlineResult<Vec<CallbackRecord>>;
}

// ---------------------------------------------------------------------------
// MemoryCallbackLog
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryCallbackLog {
    records: Mutex<Vec<CallbackRecord>>,
}

impl MemoryCallbackLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<CallbackRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl CallbackLog for MemoryCallbackLog {
    async fn append(&self, record: &CallbackRecord) -> BaitlineResult<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    async fn for_session(&self, session_id: &str) -> BaitlineResult<Vec<CallbackRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// FileCallbackLog
// ---------------------------------------------------------------------------

/// One JSON-lines file per session.
pub struct FileCallbackLog {
    dir: PathBuf,
}

impl FileCallbackLog {
    pub async fn new(dir: PathBuf) -> BaitlineResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn log_path(&self, session_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.callbacks.jsonl", file_stem(session_id)))
    }
}

#[async_trait]
impl CallbackLog for FileCallbackLog {
    async fn append(&self, record: &CallbackRecord) -> BaitlineResult<()> {
        let path = self.log_path(&record.session_id);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn for_session(&self, session_id: &str) -> BaitlineResult<Vec<CallbackRecord>> {
        let path = self.log_path(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let mut records: Vec<CallbackRecord> = data
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by(|a, b| a.sent_time.cmp(&b.sent_time));
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
