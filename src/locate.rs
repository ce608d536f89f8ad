//! Session location.
//!
//! Finds the session id bound to a tmux pane. Three strategies run in
//! priority order, first success wins:
//!
//! 1. shell snapshots — `<snapshots>/<session-id>.sh` files record the pane
//!    environment at session start; the newest one mentioning our pane wins;
//! 2. process tree — a `codex ... resume <session-id>` argument on a process
//!    attached to the pane's tty;
//! 3. start-time proximity — the rollout file whose filename timestamp is
//!    closest to a codex process's start time, accepted within 600 seconds.
//!
//! All strategies are read-only inspection. The process-tree side sits
//! behind a trait so non-`ps` platforms (and tests) can substitute their
//! own listing.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use regex::Regex;
use tracing::debug;

use crate::paths::Layout;
use crate::rollout;
use crate::session::SessionId;
use crate::tmux::TmuxPane;

/// Maximum distance between process start and rollout creation for the
/// proximity fallback to accept a match.
const PROXIMITY_WINDOW_SECS: i64 = 600;

/// Name of the assistant executable to look for on the pane's tty.
const ASSISTANT_PROGRAM: &str = "codex";

/// Locate the session bound to a destination pane.
pub trait SessionLocator {
    fn locate(&self, pane: &str) -> Result<Option<SessionId>>;
}

/// One process attached to the destination's tty.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub args: String,
}

/// Process-tree inspection port.
pub trait ProcessQuery {
    /// Processes whose controlling terminal is `tty` (a `/dev/...` path).
    fn processes_on_tty(&self, tty: &str) -> Result<Vec<ProcessInfo>>;
    /// Start time of a process, local wall-clock, second precision.
    fn start_time(&self, pid: u32) -> Result<Option<NaiveDateTime>>;
}

/// `ps`-backed process query.
pub struct PsProcessQuery;

impl ProcessQuery for PsProcessQuery {
    fn processes_on_tty(&self, tty: &str) -> Result<Vec<ProcessInfo>> {
        let tty_for_ps = tty.strip_prefix("/dev/").unwrap_or(tty);
        let output = Command::new("ps")
            .args(["-t", tty_for_ps, "-o", "pid=,args="])
            .output()
            .context("failed to run ps")?;
        // ps exits non-zero when the tty has no processes; treat as empty.
        if !output.status.success() {
            return Ok(Vec::new());
        }
        Ok(parse_ps_listing(&String::from_utf8_lossy(&output.stdout)))
    }

    fn start_time(&self, pid: u32) -> Result<Option<NaiveDateTime>> {
        let output = Command::new("ps")
            .args(["-p", &pid.to_string(), "-o", "lstart="])
            .output()
            .context("failed to run ps for lstart")?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(parse_lstart(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse `ps -o pid=,args=` output.
fn parse_ps_listing(out: &str) -> Vec<ProcessInfo> {
    out.lines()
        .filter_map(|line| {
            let line = line.trim();
            let (pid_str, args) = line.split_once(char::is_whitespace)?;
            let pid = pid_str.parse().ok()?;
            Some(ProcessInfo {
                pid,
                args: args.trim().to_string(),
            })
        })
        .collect()
}

/// Parse a `ps -o lstart=` value, e.g. `Thu Aug  6 09:15:30 2026`.
fn parse_lstart(out: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(out.trim(), "%a %b %e %H:%M:%S %Y").ok()
}

/// Extract the session id from a `... resume <session-id>` argument string.
fn extract_resume_arg(args: &str) -> Option<SessionId> {
    let re = Regex::new(
        r"\bresume\s+([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})(?:\s|$)",
    )
    .unwrap();
    let caps = re.captures(args)?;
    SessionId::parse(&caps[1]).ok()
}

/// Default locator: shell snapshots, then resume argument, then start-time
/// proximity.
pub struct DefaultLocator<Q = PsProcessQuery> {
    layout: Layout,
    process_query: Q,
}

impl DefaultLocator<PsProcessQuery> {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            process_query: PsProcessQuery,
        }
    }
}

impl<Q: ProcessQuery> DefaultLocator<Q> {
    pub fn with_process_query(layout: Layout, process_query: Q) -> Self {
        Self {
            layout,
            process_query,
        }
    }

    /// Strategy 1: newest shell snapshot recording this pane.
    fn from_shell_snapshots(&self, pane: &str) -> Option<SessionId> {
        let root = self.layout.snapshots_root();
        let entries = std::fs::read_dir(&root).ok()?;

        let mut candidates: Vec<_> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("sh") {
                    return None;
                }
                let session = SessionId::parse(path.file_stem()?.to_str()?).ok()?;
                let modified = entry.metadata().ok()?.modified().ok()?;
                Some((modified, path, session))
            })
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        let needle = format!("declare -x TMUX_PANE=\"{pane}\"");
        for (_, path, session) in candidates {
            let Ok(contents) = std::fs::read_to_string(&path) else {
                continue;
            };
            if contents.contains(&needle) {
                debug!(pane, session = %session, snapshot = %path.display(), "located via shell snapshot");
                return Some(session);
            }
        }
        None
    }

    fn assistant_processes(&self, pane: &str) -> Result<Vec<ProcessInfo>> {
        let Some(tty) = TmuxPane::new(pane.to_string()).tty()? else {
            return Ok(Vec::new());
        };
        let procs = self.process_query.processes_on_tty(&tty)?;
        Ok(procs
            .into_iter()
            .filter(|p| p.args.contains(ASSISTANT_PROGRAM))
            .collect())
    }

    /// Strategy 2: explicit `resume <session-id>` argument.
    fn from_resume_arg(&self, procs: &[ProcessInfo]) -> Option<SessionId> {
        procs.iter().find_map(|p| {
            let session = extract_resume_arg(&p.args)?;
            debug!(pid = p.pid, session = %session, "located via resume argument");
            Some(session)
        })
    }

    /// Strategy 3: rollout file closest in time to a process start.
    fn from_start_time(&self, procs: &[ProcessInfo]) -> Option<SessionId> {
        let sessions_root = self.layout.sessions_root();
        let mut best: Option<(SessionId, i64)> = None;

        for proc in procs {
            let Ok(Some(started)) = self.process_query.start_time(proc.pid) else {
                continue;
            };
            let Some((file, diff)) = rollout::closest_to(&sessions_root, started) else {
                continue;
            };
            if best.as_ref().is_none_or(|(_, best_diff)| diff < *best_diff) {
                best = Some((file.session, diff));
            }
        }

        match best {
            Some((session, diff)) if diff <= PROXIMITY_WINDOW_SECS => {
                debug!(session = %session, diff_secs = diff, "located via start-time proximity");
                Some(session)
            }
            _ => None,
        }
    }
}

impl<Q: ProcessQuery> SessionLocator for DefaultLocator<Q> {
    fn locate(&self, pane: &str) -> Result<Option<SessionId>> {
        if let Some(session) = self.from_shell_snapshots(pane) {
            return Ok(Some(session));
        }

        let procs = self.assistant_processes(pane)?;
        if let Some(session) = self.from_resume_arg(&procs) {
            return Ok(Some(session));
        }
        Ok(self.from_start_time(&procs))
    }
}
