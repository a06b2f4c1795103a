//! Session persistence for Baitline.
//!
//! Holds the fast-path [`TtlCache`], the durable [`SessionStore`] backends,
//! the [`ClaimOnce`] guard that makes final-result delivery exactly-once, and
//! the append-only [`CallbackLog`].

pub mod cache;
pub mod callback_log;
pub mod claim;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod store;

pub use cache::{CacheStats, TtlCache};
pub use callback_log::{CallbackLog, FileCallbackLog, MemoryCallbackLog};
pub use claim::{ClaimOnce, ClaimOutcome, LocalClaims, StoreClaims};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteCallbackLog, SqliteSessionStore};
pub use store::{FileSessionStore, MemorySessionStore, SessionFilter, SessionStore};

/// Cache of live sessions keyed by session id.
pub type SessionCache = TtlCache<String, baitline_core::Session>;
