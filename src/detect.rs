//! Completion detection.
//!
//! Classifies each new event record as noise, activity for the bound
//! session, or a turn completion. Two dialects share one detector:
//!
//! - **log-line**: the shared TUI log reports token usage once per finished
//!   turn; `needs_follow_up=false` is the completion signature.
//! - **structured**: rollout records with `"type":"task_complete"` for the
//!   bound session.
//!
//! Once a structured record has been seen for the bound session, the
//! structured dialect is authoritative: a log-line completion arriving in
//! the same window is reported as superseded so the caller can log it
//! rather than silently drop it. The last emitted `(session, turn)` pair is
//! remembered so a marker replayed by a rotation re-tail is never emitted
//! twice.

use regex::Regex;
use serde::Deserialize;

use crate::session::SessionId;
use crate::stream::{EventRecord, StreamKind};

/// Outcome of classifying one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Does not match any completion signature.
    Irrelevant,
    /// Signature line for the bound session that is not a completion
    /// (`needs_follow_up=true`): evidence the session is alive.
    Activity { session: SessionId },
    /// Signal owned by a session other than the bound one (or by any
    /// session while unbound). Feeds deferred auto-selection and idle
    /// rebinding; never triggers delivery.
    OtherSession { session: SessionId },
    /// Turn completed for the bound session.
    Completed { session: SessionId, turn: u64 },
    /// Same marker as the previous emission — suppressed.
    Duplicate { session: SessionId, turn: u64 },
    /// Log-line completion after the structured dialect became
    /// authoritative; caller logs the conflict.
    SupersededDialect { session: SessionId, turn: u64 },
}

/// Structured rollout record, as much of it as classification needs.
#[derive(Debug, Deserialize)]
struct RolloutRecord {
    #[serde(rename = "type")]
    record_type: String,
    session_id: Option<String>,
    turn_id: Option<u64>,
}

pub struct CompletionDetector {
    bound: Option<SessionId>,
    signature: Regex,
    last_emitted: Option<(SessionId, u64)>,
    /// Set once a structured record for the bound session has been observed.
    structured_seen: bool,
    /// Fallback turn counter for structured records without a `turn_id`.
    synthetic_turn: u64,
}

impl CompletionDetector {
    pub fn new(bound: Option<SessionId>) -> Self {
        Self {
            bound,
            // Turn-complete signature emitted by the TUI session loop.
            signature: Regex::new(
                r"session_loop\{thread_id=([0-9a-f\-]+)\}.*post sampling token usage turn_id=([0-9]+).*needs_follow_up=(true|false)",
            )
            .unwrap(),
            last_emitted: None,
            structured_seen: false,
            synthetic_turn: 0,
        }
    }

    pub fn bound(&self) -> Option<&SessionId> {
        self.bound.as_ref()
    }

    /// Bind (or rebind) the detector to a session. The duplicate guard is
    /// kept: after a rebind back to the same session, an already-handled
    /// marker must still be suppressed.
    pub fn bind(&mut self, session: SessionId) {
        if self.bound.as_ref() != Some(&session) {
            self.structured_seen = false;
        }
        self.bound = Some(session);
    }

    /// Seed the duplicate guard from a persisted snapshot so a restarted
    /// watcher does not re-fire on the turn it last delivered for.
    pub fn seed_last_emitted(&mut self, session: SessionId, turn: u64) {
        self.last_emitted = Some((session, turn));
    }

    pub fn classify(&mut self, record: &EventRecord) -> Classification {
        match record.kind {
            StreamKind::LogLine => self.classify_log_line(&record.raw),
            StreamKind::Rollout => self.classify_rollout(&record.raw),
        }
    }

    fn classify_log_line(&mut self, line: &str) -> Classification {
        let Some(caps) = self.signature.captures(line) else {
            return Classification::Irrelevant;
        };
        let Ok(session) = SessionId::parse(&caps[1]) else {
            return Classification::Irrelevant;
        };
        let Ok(turn) = caps[2].parse::<u64>() else {
            return Classification::Irrelevant;
        };
        let completed = &caps[3] == "false";

        match self.bound.as_ref() {
            Some(bound) if *bound == session => {
                if !completed {
                    return Classification::Activity { session };
                }
                if self.structured_seen {
                    return Classification::SupersededDialect { session, turn };
                }
                self.emit(session, turn)
            }
            _ => Classification::OtherSession { session },
        }
    }

    fn classify_rollout(&mut self, line: &str) -> Classification {
        let Ok(record) = serde_json::from_str::<RolloutRecord>(line) else {
            return Classification::Irrelevant;
        };

        let session = match record.session_id.as_deref().map(SessionId::parse) {
            Some(Ok(session)) => Some(session),
            Some(Err(_)) => return Classification::Irrelevant,
            // Rollout files are per-session; records without an explicit
            // owner belong to the session the file was opened for.
            None => self.bound.clone(),
        };
        let Some(session) = session else {
            return Classification::Irrelevant;
        };

        if record.record_type != "task_complete" {
            if self.bound.as_ref() == Some(&session) {
                return Classification::Activity { session };
            }
            return Classification::OtherSession { session };
        }

        match self.bound.as_ref() {
            Some(bound) if *bound == session => {
                let turn = record.turn_id.unwrap_or_else(|| {
                    self.synthetic_turn += 1;
                    self.synthetic_turn
                });
                self.structured_seen = true;
                self.emit(session, turn)
            }
            _ => Classification::OtherSession { session },
        }
    }

    fn emit(&mut self, session: SessionId, turn: u64) -> Classification {
        if self.last_emitted.as_ref() == Some(&(session.clone(), turn)) {
            return Classification::Duplicate { session, turn };
        }
        self.last_emitted = Some((session.clone(), turn));
        Classification::Completed { session, turn }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SID: &str = "019b83f2-8d5c-7b9e-ba1e-43dd527bf4c9";
    const OTHER: &str = "660e8400-e29b-41d4-a716-446655440000";

    fn sid() -> SessionId {
        SessionId::parse(SID).unwrap()
    }

    fn log_record(session: &str, turn: u64, needs_follow_up: bool) -> EventRecord {
        EventRecord {
            kind: StreamKind::LogLine,
            raw: format!(
                "2026-08-06T09:15:30.123Z INFO session_loop{{thread_id={session}}}: \
                 post sampling token usage turn_id={turn} input=941 output=213 needs_follow_up={needs_follow_up}"
            ),
        }
    }

    fn rollout_record(json: &str) -> EventRecord {
        EventRecord {
            kind: StreamKind::Rollout,
            raw: json.to_string(),
        }
    }

    #[test]
    fn noise_is_irrelevant() {
        let mut d = CompletionDetector::new(Some(sid()));
        let rec = EventRecord {
            kind: StreamKind::LogLine,
            raw: "2026-08-06 INFO spawning tool process".to_string(),
        };
        assert_eq!(d.classify(&rec), Classification::Irrelevant);
    }

    #[test]
    fn bound_session_completion_emits_once() {
        let mut d = CompletionDetector::new(Some(sid()));
        assert_eq!(
            d.classify(&log_record(SID, 4, false)),
            Classification::Completed {
                session: sid(),
                turn: 4
            }
        );
        // Same marker read again (rotation re-tail): suppressed.
        assert_eq!(
            d.classify(&log_record(SID, 4, false)),
            Classification::Duplicate {
                session: sid(),
                turn: 4
            }
        );
        // Next turn fires again.
        assert!(matches!(
            d.classify(&log_record(SID, 5, false)),
            Classification::Completed { turn: 5, .. }
        ));
    }

    #[test]
    fn needs_follow_up_true_is_activity() {
        let mut d = CompletionDetector::new(Some(sid()));
        assert_eq!(
            d.classify(&log_record(SID, 4, true)),
            Classification::Activity { session: sid() }
        );
    }

    #[test]
    fn other_session_completion_is_reported_not_emitted() {
        let mut d = CompletionDetector::new(Some(sid()));
        let got = d.classify(&log_record(OTHER, 9, false));
        assert_eq!(
            got,
            Classification::OtherSession {
                session: SessionId::parse(OTHER).unwrap()
            }
        );
    }

    #[test]
    fn unbound_detector_reports_any_signature_for_selection() {
        let mut d = CompletionDetector::new(None);
        assert!(matches!(
            d.classify(&log_record(SID, 1, false)),
            Classification::OtherSession { .. }
        ));
        // Non-completion signature lines also carry an owner worth selecting.
        assert!(matches!(
            d.classify(&log_record(SID, 1, true)),
            Classification::OtherSession { .. }
        ));
    }

    #[test]
    fn structured_task_complete_emits() {
        let mut d = CompletionDetector::new(Some(sid()));
        let rec = rollout_record(&format!(
            r#"{{"type":"task_complete","session_id":"{SID}","turn_id":7}}"#
        ));
        assert_eq!(
            d.classify(&rec),
            Classification::Completed {
                session: sid(),
                turn: 7
            }
        );
    }

    #[test]
    fn structured_without_session_id_belongs_to_bound() {
        let mut d = CompletionDetector::new(Some(sid()));
        let rec = rollout_record(r#"{"type":"task_complete","turn_id":3}"#);
        assert_eq!(
            d.classify(&rec),
            Classification::Completed {
                session: sid(),
                turn: 3
            }
        );
    }

    #[test]
    fn structured_without_turn_id_gets_synthetic_counter() {
        let mut d = CompletionDetector::new(Some(sid()));
        let rec = rollout_record(&format!(r#"{{"type":"task_complete","session_id":"{SID}"}}"#));
        assert_eq!(
            d.classify(&rec),
            Classification::Completed {
                session: sid(),
                turn: 1
            }
        );
        let rec2 = rollout_record(&format!(r#"{{"type":"task_complete","session_id":"{SID}"}}"#));
        assert_eq!(
            d.classify(&rec2),
            Classification::Completed {
                session: sid(),
                turn: 2
            }
        );
    }

    #[test]
    fn structured_non_complete_is_activity() {
        let mut d = CompletionDetector::new(Some(sid()));
        let rec = rollout_record(&format!(
            r#"{{"type":"tool_call","session_id":"{SID}","turn_id":2}}"#
        ));
        assert_eq!(d.classify(&rec), Classification::Activity { session: sid() });
    }

    #[test]
    fn malformed_json_is_irrelevant() {
        let mut d = CompletionDetector::new(Some(sid()));
        assert_eq!(
            d.classify(&rollout_record("{not json")),
            Classification::Irrelevant
        );
        assert_eq!(
            d.classify(&rollout_record(r#"{"no_type_field":1}"#)),
            Classification::Irrelevant
        );
    }

    #[test]
    fn structured_dialect_supersedes_log_line() {
        let mut d = CompletionDetector::new(Some(sid()));
        let structured = rollout_record(&format!(
            r#"{{"type":"task_complete","session_id":"{SID}","turn_id":7}}"#
        ));
        assert!(matches!(
            d.classify(&structured),
            Classification::Completed { .. }
        ));

        // A conflicting log-line completion in the same window is reported,
        // not emitted and not dropped silently.
        assert_eq!(
            d.classify(&log_record(SID, 8, false)),
            Classification::SupersededDialect {
                session: sid(),
                turn: 8
            }
        );
    }

    #[test]
    fn rebinding_to_new_session_resets_dialect_lock() {
        let mut d = CompletionDetector::new(Some(sid()));
        let structured = rollout_record(&format!(
            r#"{{"type":"task_complete","session_id":"{SID}","turn_id":1}}"#
        ));
        d.classify(&structured);

        d.bind(SessionId::parse(OTHER).unwrap());
        // Log-line completions for the new session work again.
        assert!(matches!(
            d.classify(&log_record(OTHER, 1, false)),
            Classification::Completed { .. }
        ));
    }

    #[test]
    fn seeded_guard_suppresses_restart_replay() {
        let mut d = CompletionDetector::new(Some(sid()));
        d.seed_last_emitted(sid(), 4);
        assert!(matches!(
            d.classify(&log_record(SID, 4, false)),
            Classification::Duplicate { .. }
        ));
        assert!(matches!(
            d.classify(&log_record(SID, 5, false)),
            Classification::Completed { .. }
        ));
    }

    proptest::proptest! {
        /// Idempotent re-tail: replaying any completion marker immediately
        /// after its first emission never emits twice.
        #[test]
        fn replayed_marker_never_emits_twice(turn in 0u64..10_000) {
            let mut d = CompletionDetector::new(Some(sid()));
            let rec = log_record(SID, turn, false);
            let first = d.classify(&rec);
            let second = d.classify(&rec);
            proptest::prop_assert!(matches!(first, Classification::Completed { .. }), "first was not Completed");
            proptest::prop_assert!(matches!(second, Classification::Duplicate { .. }), "second was not Duplicate");
        }
    }
}
