//! Filesystem layout: the Codex directories the watcher reads, and the
//! state directory it owns.
//!
//! Watcher state lives under `~/.nudge` regardless of the invoking CWD.
//! Pane ids are tmux-global, so per-project state dirs would fragment:
//! the same pane would get different log/snapshot/pause files depending on
//! which directory the watcher was started from.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::session::SessionId;

/// Resolved directory layout for one watcher process.
#[derive(Debug, Clone)]
pub struct Layout {
    /// Codex home (default `~/.codex`) — read-only from our side.
    pub codex_home: PathBuf,
    /// Watcher-owned state directory (default `~/.nudge`).
    pub state_dir: PathBuf,
}

impl Layout {
    /// Resolve the layout from optional overrides, environment, then home.
    ///
    /// Precedence per root: explicit override (config/CLI) > environment
    /// (`CODEX_HOME` / `NUDGE_STATE_DIR`) > default under `$HOME`.
    pub fn resolve(codex_home: Option<&Path>, state_dir: Option<&Path>) -> Result<Self> {
        let home = dirs::home_dir().context("could not determine home directory")?;

        let codex_home = codex_home
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("CODEX_HOME").map(PathBuf::from))
            .unwrap_or_else(|| home.join(".codex"));

        let state_dir = state_dir
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("NUDGE_STATE_DIR").map(PathBuf::from))
            .unwrap_or_else(|| home.join(".nudge"));

        Ok(Self {
            codex_home,
            state_dir,
        })
    }

    /// Shared assistant TUI log (log-line dialect).
    pub fn tui_log(&self) -> PathBuf {
        self.codex_home.join("log").join("codex-tui.log")
    }

    /// Root of per-session rollout files (`sessions/YYYY/MM/DD/rollout-*.jsonl`).
    pub fn sessions_root(&self) -> PathBuf {
        self.codex_home.join("sessions")
    }

    /// Shell snapshot directory (`<session-id>.sh` files recording pane env).
    pub fn snapshots_root(&self) -> PathBuf {
        self.codex_home.join("shell_snapshots")
    }

    /// Global pause marker: presence pauses every watcher.
    pub fn global_pause_marker(&self) -> PathBuf {
        self.state_dir.join("pause")
    }

    /// Per-pane pause marker.
    pub fn pane_pause_marker(&self, pane: &str) -> PathBuf {
        self.state_dir.join(format!("pause.{}", pane_key(pane)))
    }

    /// Human-readable activity log for one pane's watcher.
    pub fn activity_log(&self, pane: &str) -> PathBuf {
        self.state_dir.join(format!("watch.{}.log", pane_key(pane)))
    }

    /// Health snapshot read by the status display.
    pub fn snapshot(&self, pane: &str) -> PathBuf {
        self.state_dir
            .join(format!("watch.{}.state.json", pane_key(pane)))
    }

    /// Rollout file for a bound session, if one exists yet.
    pub fn rollout_for(&self, session: &SessionId) -> Option<PathBuf> {
        crate::rollout::find_for_session(&self.sessions_root(), session)
    }
}

/// Sanitize a pane id for use in filenames (`%3` -> `_3`).
pub fn pane_key(pane: &str) -> String {
    pane.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Check that a string is a concrete tmux pane id (`%N`).
pub fn is_pane_id(s: &str) -> bool {
    let Some(rest) = s.strip_prefix('%') else {
        return false;
    };
    !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
}
