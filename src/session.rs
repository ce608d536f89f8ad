//! Session identifiers, the per-pane binding record, and watcher health.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// UUID-shaped token naming one assistant conversation.
///
/// Stored lowercase so ids read from process arguments, filenames, and log
/// lines compare equal regardless of the source's casing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

#[derive(Debug, Error, PartialEq)]
#[error("invalid session id '{0}' (expected 8-4-4-4-12 hex groups)")]
pub struct SessionIdError(String);

impl SessionId {
    /// Parse and normalize a session id. Rejects anything that is not a
    /// plain hyphenated UUID.
    pub fn parse(raw: &str) -> Result<Self, SessionIdError> {
        let candidate = raw.trim();
        let uuid = Uuid::try_parse(candidate).map_err(|_| SessionIdError(candidate.to_string()))?;
        // `try_parse` also accepts braced/simple/urn forms; only the
        // hyphenated shape appears in filenames and resume arguments.
        if candidate.len() != 36 {
            return Err(SessionIdError(candidate.to_string()));
        }
        Ok(Self(uuid.as_hyphenated().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = SessionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Watcher health as exposed to the status display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Stream is actively advancing.
    #[default]
    Ok,
    /// No stream growth within the stale threshold.
    Stale,
    /// No stream file found for the bound session.
    Warn,
    /// Stream permanently unreadable (deleted, or retry budget exhausted).
    Error,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthState::Ok => "ok",
            HealthState::Stale => "stale",
            HealthState::Warn => "warn",
            HealthState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Mutable state tying one watch loop to one upstream session.
///
/// Only bootstrap and the rebinding phase of the loop reassign these fields;
/// every other phase reads them for the duration of one cycle.
#[derive(Debug)]
pub struct SessionBinding {
    /// Resolved tmux pane id (`%N`).
    pub pane: String,
    /// Bound session, or `None` while auto-detection is deferred.
    pub session: Option<SessionId>,
    /// Path of the currently tailed stream file, if one is open.
    pub stream_path: Option<PathBuf>,
    /// Last time the stream was observed growing.
    pub last_growth: Option<Instant>,
    pub health: HealthState,
}

impl SessionBinding {
    pub fn unresolved(pane: String) -> Self {
        Self {
            pane,
            session: None,
            stream_path: None,
            last_growth: None,
            health: HealthState::Warn,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.session.is_some()
    }
}
