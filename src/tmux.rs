//! tmux destination adapter.
//!
//! Wraps the tmux CLI for pane queries and input injection. Text is always
//! sent with `send-keys -l --` so newlines and punctuation land as literal
//! content; the activation Enter is a separate `C-m` send so multi-line
//! messages are never fragmented into premature submissions.

use std::process::{Command, Output};

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::deliver::DeliverError;

/// The watcher's view of the pane it delivers to.
///
/// tmux is the only production implementation; tests substitute fakes to
/// drive the gate and dispatcher without a terminal server.
pub trait Destination {
    /// Stable identifier (`%N` for tmux panes).
    fn id(&self) -> &str;
    /// Whether the destination still resolves to a live target.
    fn reachable(&self) -> bool;
    /// Whether the destination is the active pane of its window.
    fn active(&self) -> bool;
    /// Write raw text into the destination's input, newlines as content.
    fn send_text(&self, text: &str) -> Result<(), DeliverError>;
    /// Send the single activation keystroke that submits buffered input.
    fn send_enter(&self) -> Result<(), DeliverError>;
}

/// A concrete tmux pane addressed by pane id.
#[derive(Debug, Clone)]
pub struct TmuxPane {
    id: String,
}

impl TmuxPane {
    pub fn new(id: String) -> Self {
        Self { id }
    }

    /// The tty device backing this pane (for process-tree inspection).
    pub fn tty(&self) -> Result<Option<String>> {
        match display(&self.id, "#{pane_tty}") {
            Ok(tty) if tty.is_empty() => Ok(None),
            Ok(tty) => Ok(Some(tty)),
            Err(_) => Ok(None), // pane gone; caller treats as unreachable
        }
    }
}

impl Destination for TmuxPane {
    fn id(&self) -> &str {
        &self.id
    }

    fn reachable(&self) -> bool {
        pane_exists(&self.id)
    }

    fn active(&self) -> bool {
        display(&self.id, "#{pane_active}")
            .map(|v| v == "1")
            .unwrap_or(false)
    }

    fn send_text(&self, text: &str) -> Result<(), DeliverError> {
        if text.is_empty() {
            return Ok(());
        }
        let output = run_tmux(["send-keys", "-t", &self.id, "-l", "--", text])
            .map_err(|_| DeliverError::Unreachable)?;
        if !output.status.success() {
            return Err(DeliverError::Unreachable);
        }
        debug!(pane = %self.id, bytes = text.len(), "sent text");
        Ok(())
    }

    fn send_enter(&self) -> Result<(), DeliverError> {
        let output =
            run_tmux(["send-keys", "-t", &self.id, "C-m"]).map_err(|_| DeliverError::Unreachable)?;
        if !output.status.success() {
            return Err(DeliverError::Unreachable);
        }
        debug!(pane = %self.id, "sent enter");
        Ok(())
    }
}

fn run_tmux<I, S>(args: I) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    Command::new("tmux")
        .args(args)
        .output()
        .context("failed to run tmux command")
}

/// Run `tmux display-message -p` for a single format variable.
fn display(target: &str, format: &str) -> Result<String> {
    let output = run_tmux(["display-message", "-p", "-t", target, format])
        .with_context(|| format!("failed to query tmux target '{target}'"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("tmux display-message failed for '{target}': {stderr}");
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Check if a tmux pane target exists.
pub fn pane_exists(target: &str) -> bool {
    run_tmux(["display-message", "-p", "-t", target, "#{pane_id}"])
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Resolve any target tmux understands (`%N`, `session:window`, window index)
/// to a concrete pane id.
///
/// Fancy human-friendly resolution (active-window disambiguation across
/// sessions) belongs to the supervisor layer; here tmux's own target parsing
/// is authoritative.
pub fn resolve_pane(target: &str) -> Result<String> {
    if crate::paths::is_pane_id(target) {
        if !pane_exists(target) {
            bail!("tmux pane not found: {target}");
        }
        return Ok(target.to_string());
    }

    let pane = display(target, "#{pane_id}")
        .with_context(|| format!("could not resolve tmux target '{target}' to a pane"))?;
    if !crate::paths::is_pane_id(&pane) {
        bail!("tmux returned unexpected pane id '{pane}' for target '{target}'");
    }
    Ok(pane)
}

#[cfg(any(test, feature = "integration"))]
pub fn kill_session(session: &str) -> Result<()> {
    let exists = run_tmux(["has-session", "-t", session])
        .map(|o| o.status.success())
        .unwrap_or(false);
    if !exists {
        return Ok(());
    }
    let output = run_tmux(["kill-session", "-t", session])?;
    if !output.status.success() {
        bail!(
            "tmux kill-session failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

#[cfg(any(test, feature = "integration"))]
pub fn create_session(session: &str, program: &str, args: &[String]) -> Result<()> {
    let mut cmd = Command::new("tmux");
    cmd.args(["new-session", "-d", "-s", session, "-x", "200", "-y", "50"]);
    cmd.arg(program);
    for arg in args {
        cmd.arg(arg);
    }
    let output = cmd
        .output()
        .with_context(|| format!("failed to create tmux session '{session}'"))?;
    if !output.status.success() {
        bail!(
            "tmux new-session failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}
