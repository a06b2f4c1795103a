//! Built-in collaborators for Baitline.
//!
//! Deterministic, offline implementations of the three content seams so a
//! deployment works without any model backend.
//!
//! # Main types
//!
//! - [`KeywordClassifier`] — Weighted phrase matcher (English, Hinglish, Gujarati-English).
//! - [`ScriptedResponder`] — Rule-based worried-account-holder persona.
//! - [`RegexExtractor`] — Pulls accounts, UPI ids, links, phones, e-mails and keywords.

/// Keyword-weighted scam classifier.
pub mod classifier;
/// Regex intelligence extractor.
pub mod extractor;
/// Scripted persona replies.
pub mod responder;

pub use classifier::{KeywordClassifier, SCAM_THRESHOLD};
pub use extractor::RegexExtractor;
pub use responder::{ScriptedResponder, DEFAULT_PATIENCE};
