//! Watcher reporting surface: activity log and health snapshot.
//!
//! The activity log is the append-only, human-readable record the operator
//! tails (`[2026-08-06 09:15:30] continue: sent turn=4 ...`), one line per
//! notable event. The snapshot is the machine-readable contract an external
//! status display renders; it is rewritten whole on every change so readers
//! always see a consistent document.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::session::{HealthState, SessionId};

/// Append-only activity log.
pub struct ActivityLog {
    path: PathBuf,
}

impl ActivityLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line. Log failures are not worth killing the
    /// watch loop over; the caller ignores the result after a warn.
    pub fn append(&self, message: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create log directory: {}", parent.display())
            })?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open activity log: {}", self.path.display()))?;
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(file, "[{stamp}] {message}")
            .with_context(|| format!("failed to write activity log: {}", self.path.display()))?;
        Ok(())
    }
}

/// Per-cycle health snapshot for the status display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub pane: String,
    pub session_id: Option<SessionId>,
    pub health: HealthState,
    /// One-line explanation when health is degraded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_detail: Option<String>,
    /// When the current health state was entered.
    pub health_since: DateTime<Utc>,
    /// Last notable event, pre-formatted for table cells.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_delivery_at: Option<DateTime<Utc>>,
    /// Turn token of the last `ok` delivery; reloaded at startup to keep
    /// delivery idempotent across watcher restarts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_delivered_turn: Option<u64>,
}

impl HealthSnapshot {
    pub fn new(pane: String) -> Self {
        Self {
            pane,
            session_id: None,
            health: HealthState::Warn,
            health_detail: None,
            health_since: Utc::now(),
            last_event: None,
            last_delivery_at: None,
            last_delivered_turn: None,
        }
    }

    /// Load a snapshot if one exists and parses; anything else is `None`
    /// (a corrupt snapshot must not block watcher startup).
    pub fn load(path: &Path) -> Option<Self> {
        let contents = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// Persist the snapshot, replacing the previous document.
    pub fn store(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create state directory: {}", parent.display())
            })?;
        }
        let json =
            serde_json::to_string_pretty(self).context("failed to serialize health snapshot")?;
        // Write-then-rename so a concurrently reading status display never
        // sees a half-written document.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("failed to write snapshot: {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to replace snapshot: {}", path.display()))?;
        Ok(())
    }
}
