use thiserror::Error;

/// A convenience `Result` alias using [`BaitlineError`].
pub type BaitlineResult<T> = Result<T, BaitlineError>;

/// Top-level error type for the Baitline workspace.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Error, Debug)]
pub enum BaitlineError {
    /// The durable store rejected or failed an operation.
    #[error("Store error: {0}")]
    Store(String),

    /// The durable store could not be reached at all.
    ///
    /// Callers on the claim path treat this as a signal to degrade to
    /// process-local guarding instead of failing.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The final-result callback could not be delivered.
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// An outbound HTTP request failed at the transport level.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A classifier, responder or extractor failed or timed out.
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Configuration parsing or validation failed.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An error from the SQLite backend.
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl BaitlineError {
    /// Returns `true` when the error means the store is unreachable rather
    /// than that it answered with a failure.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BaitlineError::StoreUnavailable(_))
    }
}
