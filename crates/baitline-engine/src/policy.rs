use baitline_core::Session;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Named limits used by [`SaturationPolicy::decide`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaturationThresholds {
    /// Terminate once this many messages were exchanged.
    #[serde(default = "default_max_messages")]
    pub max_messages: u32,
    /// Terminate once the engagement lasted this long.
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
    #[serde(default = "default_optimal_min_messages")]
    pub optimal_min_messages: u32,
    /// Strict lower bound: the engagement must be longer than this.
    #[serde(default = "default_optimal_min_duration_secs")]
    pub optimal_min_duration_secs: u64,
    #[serde(default = "default_min_questions")]
    pub min_questions: u32,
    #[serde(default = "default_min_red_flags")]
    pub min_red_flags: u32,
    /// Turns without new intelligence that count as a stall.
    #[serde(default = "default_stall_turns")]
    pub stall_turns: u32,
    /// Force termination on every turn. Testing only.
    #[serde(default)]
    pub force_terminate: bool,
}

fn default_max_messages() -> u32 {
    30
}
fn default_max_duration_secs() -> u64 {
    300
}
fn default_optimal_min_messages() -> u32 {
    16
}
fn default_optimal_min_duration_secs() -> u64 {
    180
}
fn default_min_questions() -> u32 {
    5
}
fn default_min_red_flags() -> u32 {
    5
}
fn default_stall_turns() -> u32 {
    4
}

impl Default for SaturationThresholds {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            max_duration_secs: default_max_duration_secs(),
            optimal_min_messages: default_optimal_min_messages(),
            optimal_min_duration_secs: default_optimal_min_duration_secs(),
            min_questions: default_min_questions(),
            min_red_flags: default_min_red_flags(),
            stall_turns: default_stall_turns(),
            force_terminate: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Why a conversation was ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    HardLimit,
    OptimalSaturation,
    UpstreamSignal,
    TestingOverride,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationReason::HardLimit => "hard limit",
            TerminationReason::OptimalSaturation => "optimal saturation",
            TerminationReason::UpstreamSignal => "upstream signal",
            TerminationReason::TestingOverride => "testing override",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Terminate(TerminationReason),
}

impl Verdict {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Verdict::Terminate(_))
    }
}

// ---------------------------------------------------------------------------
// SaturationPolicy
// ---------------------------------------------------------------------------

/// Decides when a conversation has yielded what it is going to yield.
///
/// `decide` is a pure function of the session: same session, same verdict.
#[derive(Debug, Clone, Default)]
pub struct SaturationPolicy {
    thresholds: SaturationThresholds,
}

impl SaturationPolicy {
    pub fn new(thresholds: SaturationThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &SaturationThresholds {
        &self.thresholds
    }

    /// Reasons are checked in priority order; the first that applies wins.
    pub fn decide(&self, session: &Session) -> Verdict {
        let t = &self.thresholds;
        let metrics = session.compute_metrics();
        let messages = metrics.total_messages_exchanged;
        let duration = metrics.engagement_duration_seconds;

        if messages >= t.max_messages || duration >= t.max_duration_secs {
            return Verdict::Terminate(TerminationReason::HardLimit);
        }

        if messages >= t.optimal_min_messages && duration > t.optimal_min_duration_secs {
            let probed =
                session.questions_asked >= t.min_questions && session.red_flag_count >= t.min_red_flags;
            let stalled =
                session.intel_item_count() > 0 && session.turns_since_last_intel >= t.stall_turns;
            if probed || stalled {
                return Verdict::Terminate(TerminationReason::OptimalSaturation);
            }
        }

        if session.upstream_stop {
            return Verdict::Terminate(TerminationReason::UpstreamSignal);
        }

        if t.force_terminate {
            return Verdict::Terminate(TerminationReason::TestingOverride);
        }

        Verdict::Continue
    }
}

// ---------------------------------------------------------------------------
// Counter maintenance
// ---------------------------------------------------------------------------

/// Count a persona reply toward `questions_asked` if it asks something.
pub fn note_reply(session: &mut Session, reply: &str) {
    if reply.contains('?') {
        session.questions_asked += 1;
    }
}

/// Add this turn's classifier indicators to `red_flag_count`.
pub fn note_red_flags(session: &mut Session, indicators: usize) {
    let n = u32::try_from(indicators).unwrap_or(u32::MAX);
    session.red_flag_count = session.red_flag_count.saturating_add(n);
}

/// Reset the stall counter when intelligence grew this turn, else bump it.
pub fn note_intel_progress(session: &mut Session) {
    let count = u32::try_from(session.intel_item_count()).unwrap_or(u32::MAX);
    if count > session.last_intel_count {
        session.turns_since_last_intel = 0;
    } else {
        session.turns_since_last_intel = session.turns_since_last_intel.saturating_add(1);
    }
    session.last_intel_count = count;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use baitline_core::IntelCategory;
    use chrono::{Duration, Utc};

    fn session(messages: u32, duration_secs: i64) -> Session {
        let start = Utc::now();
        let mut s = Session::new("s", start);
        s.total_messages = messages;
        s.touch(start + Duration::seconds(duration_secs));
        s
    }

    fn policy() -> SaturationPolicy {
        SaturationPolicy::default()
    }

    #[test]
    fn short_conversation_continues() {
        assert_eq!(policy().decide(&session(4, 60)), Verdict::Continue);
    }

    #[test]
    fn message_limit_is_hard() {
        assert_eq!(
            policy().decide(&session(30, 10)),
            Verdict::Terminate(TerminationReason::HardLimit)
        );
    }

    #[test]
    fn duration_limit_is_hard() {
        assert_eq!(
            policy().decide(&session(2, 300)),
            Verdict::Terminate(TerminationReason::HardLimit)
        );
        assert_eq!(policy().decide(&session(2, 299)), Verdict::Continue);
    }

    #[test]
    fn probing_saturation() {
        let mut s = session(16, 181);
        s.questions_asked = 5;
        s.red_flag_count = 5;
        assert_eq!(
            policy().decide(&s),
            Verdict::Terminate(TerminationReason::OptimalSaturation)
        );
    }

    #[test]
    fn sixteen_messages_over_two_hundred_seconds_saturate() {
        let mut s = session(16, 200);
        s.questions_asked = 5;
        s.red_flag_count = 5;
        assert_eq!(
            policy().decide(&s),
            Verdict::Terminate(TerminationReason::OptimalSaturation)
        );
    }

    #[test]
    fn too_few_red_flags_keep_the_conversation_going() {
        let mut s = session(16, 200);
        s.questions_asked = 5;
        s.red_flag_count = 2;
        assert_eq!(policy().decide(&s), Verdict::Continue);
    }

    #[test]
    fn thirty_one_messages_hit_the_hard_limit() {
        assert_eq!(
            policy().decide(&session(31, 10)),
            Verdict::Terminate(TerminationReason::HardLimit)
        );
    }

    #[test]
    fn duration_bound_is_strict() {
        let mut s = session(16, 180);
        s.questions_asked = 5;
        s.red_flag_count = 5;
        assert_eq!(policy().decide(&s), Verdict::Continue);
    }

    #[test]
    fn stalled_intelligence_saturates() {
        let mut s = session(17, 200);
        s.extracted_intelligence
            .insert(IntelCategory::UpiIds, "x@ybl", 20);
        s.turns_since_last_intel = 4;
        assert_eq!(
            policy().decide(&s),
            Verdict::Terminate(TerminationReason::OptimalSaturation)
        );

        // A stall with nothing extracted is not saturation.
        let mut empty = session(17, 200);
        empty.turns_since_last_intel = 10;
        assert_eq!(policy().decide(&empty), Verdict::Continue);
    }

    #[test]
    fn hard_limit_outranks_upstream_signal() {
        let mut s = session(30, 10);
        s.upstream_stop = true;
        assert_eq!(
            policy().decide(&s),
            Verdict::Terminate(TerminationReason::HardLimit)
        );
    }

    #[test]
    fn upstream_signal_and_testing_override() {
        let mut s = session(3, 10);
        s.upstream_stop = true;
        assert_eq!(
            policy().decide(&s),
            Verdict::Terminate(TerminationReason::UpstreamSignal)
        );

        let forced = SaturationPolicy::new(SaturationThresholds {
            force_terminate: true,
            ..Default::default()
        });
        assert_eq!(
            forced.decide(&session(1, 0)),
            Verdict::Terminate(TerminationReason::TestingOverride)
        );
    }

    #[test]
    fn decide_is_idempotent() {
        let mut s = session(16, 200);
        s.questions_asked = 6;
        s.red_flag_count = 2;
        let p = policy();
        let first = p.decide(&s);
        assert_eq!(first, Verdict::Continue);
        for _ in 0..5 {
            assert_eq!(p.decide(&s), first);
        }
    }

    #[test]
    fn thresholds_deserialize_with_defaults() {
        let t: SaturationThresholds = serde_json::from_str(r#"{"max_messages": 10}"#).unwrap();
        assert_eq!(t.max_messages, 10);
        assert_eq!(t.stall_turns, 4);
        assert!(!t.force_terminate);
    }

    #[test]
    fn counters_follow_turns() {
        let mut s = session(0, 0);
        note_reply(&mut s, "Which bank are you calling from?");
        note_reply(&mut s, "Okay.");
        assert_eq!(s.questions_asked, 1);

        note_red_flags(&mut s, 3);
        note_red_flags(&mut s, 2);
        assert_eq!(s.red_flag_count, 5);

        note_intel_progress(&mut s);
        assert_eq!(s.turns_since_last_intel, 1);

        s.extracted_intelligence
            .insert(IntelCategory::PhoneNumbers, "9876543210", 20);
        note_intel_progress(&mut s);
        assert_eq!(s.turns_since_last_intel, 0);
        assert_eq!(s.last_intel_count, 1);

        note_intel_progress(&mut s);
        assert_eq!(s.turns_since_last_intel, 1);
    }
}
