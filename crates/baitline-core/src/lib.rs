//! Core types and error definitions for Baitline.
//!
//! This crate holds the foundational types shared across all Baitline crates:
//! the session model, extracted intelligence, the final-result payload and its
//! audit record, the clock abstraction, and the contracts of the external
//! collaborators (classifier, responder, extractor).
//!
//! # Main types
//!
//! - [`BaitlineError`] — Unified error enum for all Baitline subsystems.
//! - [`BaitlineResult`] — Convenience alias for `Result<T, BaitlineError>`.
//! - [`Session`] — Persistent state of one tracked conversation.
//! - [`Intelligence`] — Monotonically growing, per-category capped findings.
//! - [`CallbackPayload`] / [`CallbackRecord`] — Final result and its audit entry.
//! - [`Clock`] — Injected time source ([`SystemClock`], [`ManualClock`]).

/// Final-result payload and dispatch audit records.
pub mod callback;
/// Injectable time source.
pub mod clock;
/// Classifier, responder and extractor contracts.
pub mod collaborator;
/// Error type shared by every crate.
pub mod error;
/// Extracted intelligence categories and merging.
pub mod intelligence;
/// Session state model.
pub mod session;

pub use callback::{CallbackPayload, CallbackRecord};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborator::{Classification, Classifier, Extractor, Reply, Responder};
pub use error::{BaitlineError, BaitlineResult};
pub use intelligence::{IntelCategory, Intelligence, DEFAULT_PER_CATEGORY_CAP};
pub use session::{
    ChannelMetadata, ConversationMessage, EngagementMetrics, Sender, Session, SessionStatus,
};
