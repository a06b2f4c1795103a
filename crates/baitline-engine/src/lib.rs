//! Session lifecycle engine for Baitline.
//!
//! Decides when a conversation is done, delivers its final result exactly
//! once, and sweeps up conversations that went quiet.
//!
//! # Main types
//!
//! - [`SessionManager`] — Request-path turn processor.
//! - [`SaturationPolicy`] — Pure continue/terminate decision.
//! - [`CallbackDispatcher`] — Claim-guarded webhook delivery of the final result.
//! - [`InactivityMonitor`] — Periodic sweep finalizing idle scam sessions.
//! - [`PendingDispatches`] — Request-path dispatches, drained on shutdown.

/// Final-result delivery.
pub mod dispatcher;
/// Request-path turn processing.
pub mod manager;
/// Inactivity sweep.
pub mod monitor;
/// Dispatches running off the request path.
pub mod pending;
/// Saturation policy and its counters.
pub mod policy;

pub use dispatcher::{CallbackConfig, CallbackDispatcher, Dispatch};
pub use manager::{Collaborators, ManagerConfig, SessionManager, TurnOutcome, TurnRequest};
pub use monitor::{InactivityMonitor, MonitorConfig, MonitorHandle, SweepReport};
pub use pending::PendingDispatches;
pub use policy::{SaturationPolicy, SaturationThresholds, TerminationReason, Verdict};
