//! Rollout file discovery.
//!
//! Per-session event files live under `sessions/YYYY/MM/DD/` and are named
//! `rollout-<YYYY-MM-DDTHH-MM-SS>-<session-id>.jsonl`. The filename is the
//! only index: both the owning session and the session's creation time are
//! recovered from it.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use regex::Regex;

use crate::session::SessionId;

const FILENAME_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

/// One discovered rollout file.
#[derive(Debug, Clone, PartialEq)]
pub struct RolloutFile {
    pub path: PathBuf,
    /// Creation timestamp encoded in the filename (local time, second
    /// precision).
    pub created: NaiveDateTime,
    pub session: SessionId,
}

fn filename_regex() -> Regex {
    Regex::new(
        r"^rollout-(\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2})-([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})\.jsonl$",
    )
    .unwrap()
}

/// Parse a rollout filename into its timestamp and session id.
pub fn parse_filename(name: &str) -> Option<(NaiveDateTime, SessionId)> {
    let re = filename_regex();
    let caps = re.captures(name)?;
    let created = NaiveDateTime::parse_from_str(&caps[1], FILENAME_TIMESTAMP_FORMAT).ok()?;
    let session = SessionId::parse(&caps[2]).ok()?;
    Some((created, session))
}

/// Enumerate every rollout file under the sessions root.
///
/// The root nests three directory levels (year/month/day); anything that does
/// not match the filename convention is skipped. A missing root yields an
/// empty list — sessions may simply not exist yet.
pub fn enumerate(root: &Path) -> Vec<RolloutFile> {
    let mut found = Vec::new();
    collect(root, 0, &mut found);
    found
}

fn collect(dir: &Path, depth: usize, found: &mut Vec<RolloutFile>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            // year/month/day at most; don't walk arbitrarily deep.
            if depth < 3 {
                collect(&path, depth + 1, found);
            }
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some((created, session)) = parse_filename(name) {
            found.push(RolloutFile {
                path,
                created,
                session,
            });
        }
    }
}

/// Find the rollout file belonging to a session, if it exists yet.
///
/// A session normally has exactly one rollout file; if several match (e.g. a
/// resumed session rewritten under a new date directory), the most recently
/// created wins.
pub fn find_for_session(root: &Path, session: &SessionId) -> Option<PathBuf> {
    enumerate(root)
        .into_iter()
        .filter(|f| &f.session == session)
        .max_by_key(|f| f.created)
        .map(|f| f.path)
}

/// Pick the rollout file whose creation time is closest to `target`.
///
/// Returns the file and the absolute distance in seconds. Used by the
/// start-time-proximity locator strategy; the caller applies its acceptance
/// window.
pub fn closest_to(root: &Path, target: NaiveDateTime) -> Option<(RolloutFile, i64)> {
    enumerate(root)
        .into_iter()
        .map(|f| {
            let diff = (f.created - target).num_seconds().abs();
            (f, diff)
        })
        .min_by_key(|(_, diff)| *diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    const SID_A: &str = "019b83f2-8d5c-7b9e-ba1e-43dd527bf4c9";
    const SID_B: &str = "660e8400-e29b-41d4-a716-446655440000";

    #[test]
    fn parses_well_formed_filename() {
        let name = format!("rollout-2026-08-06T09-15-30-{SID_A}.jsonl");
        let (created, session) = parse_filename(&name).unwrap();
        assert_eq!(created, dt(2026, 8, 6, 9, 15, 30));
        assert_eq!(session.as_str(), SID_A);
    }

    #[test]
    fn rejects_malformed_filenames() {
        assert!(parse_filename("rollout-2026-08-06T09-15-30.jsonl").is_none());
        assert!(parse_filename(&format!("rollout-2026-08-06-{SID_A}.jsonl")).is_none());
        assert!(parse_filename(&format!("notes-2026-08-06T09-15-30-{SID_A}.jsonl")).is_none());
        assert!(parse_filename(&format!("rollout-2026-08-06T09-15-30-{SID_A}.json")).is_none());
        // Month 13 survives the shape regex but not the date parse.
        assert!(parse_filename(&format!("rollout-2026-13-06T09-15-30-{SID_A}.jsonl")).is_none());
    }

    #[test]
    fn enumerates_nested_layout_and_skips_noise() {
        let tmp = tempfile::tempdir().unwrap();
        touch(
            tmp.path(),
            &format!("2026/08/06/rollout-2026-08-06T09-15-30-{SID_A}.jsonl"),
        );
        touch(
            tmp.path(),
            &format!("2026/08/05/rollout-2026-08-05T22-00-01-{SID_B}.jsonl"),
        );
        touch(tmp.path(), "2026/08/06/other.txt");

        let files = enumerate(tmp.path());
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn missing_root_enumerates_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let gone = tmp.path().join("no-such-root");
        assert!(enumerate(&gone).is_empty());
        let sid = SessionId::parse(SID_A).unwrap();
        assert!(find_for_session(&gone, &sid).is_none());
    }

    #[test]
    fn find_for_session_prefers_latest() {
        let tmp = tempfile::tempdir().unwrap();
        touch(
            tmp.path(),
            &format!("2026/08/05/rollout-2026-08-05T10-00-00-{SID_A}.jsonl"),
        );
        touch(
            tmp.path(),
            &format!("2026/08/06/rollout-2026-08-06T09-15-30-{SID_A}.jsonl"),
        );

        let sid = SessionId::parse(SID_A).unwrap();
        let path = find_for_session(tmp.path(), &sid).unwrap();
        assert!(
            path.ends_with(format!("2026/08/06/rollout-2026-08-06T09-15-30-{SID_A}.jsonl")),
            "expected latest rollout, got {}",
            path.display()
        );
    }

    #[test]
    fn closest_to_picks_minimum_distance() {
        let tmp = tempfile::tempdir().unwrap();
        touch(
            tmp.path(),
            &format!("2026/08/06/rollout-2026-08-06T09-00-00-{SID_A}.jsonl"),
        );
        touch(
            tmp.path(),
            &format!("2026/08/06/rollout-2026-08-06T12-00-00-{SID_B}.jsonl"),
        );

        let (file, diff) = closest_to(tmp.path(), dt(2026, 8, 6, 11, 58, 0)).unwrap();
        assert_eq!(file.session.as_str(), SID_B);
        assert_eq!(diff, 120);
    }
}
