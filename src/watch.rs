//! The watch loop: poll → classify → decide → maybe deliver → maybe rebind.
//!
//! Single-threaded and cooperatively scheduled. All shared mutable state
//! lives in one `SessionBinding` that only bootstrap and the rebinding phase
//! reassign; the other phases read it for the duration of one cycle. The
//! loop exits on the stop flag (supervisor signal) or on a fatal condition:
//! a malformed explicit session id and an unreadable message file are
//! rejected before the loop starts, and a stream that stays broken past the
//! retry budget with no rebinding candidate ends the loop with an error.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::activity::{ActivityLog, HealthSnapshot};
use crate::config::WatchSettings;
use crate::deliver::{DeliverError, Dispatcher};
use crate::detect::{Classification, CompletionDetector};
use crate::gate::{ControlPlane, DeliveryGate, GateReason};
use crate::locate::SessionLocator;
use crate::paths::Layout;
use crate::session::{HealthState, SessionBinding, SessionId};
use crate::stream::{EventRecord, EventSource, StreamKind};
use crate::tmux::Destination;

/// How the session to watch was requested.
#[derive(Debug, Clone)]
pub enum SessionArg {
    /// Locate at startup; defer to first-event selection when that fails,
    /// and rebind when the pane's session moves on.
    Auto,
    Explicit(SessionId),
}

pub struct WatchOptions {
    /// Resolved tmux pane id (`%N`).
    pub pane: String,
    pub session: SessionArg,
    /// Fully loaded follow-up message (file indirection happens upstream).
    pub message: String,
}

pub struct WatchLoop {
    settings: WatchSettings,
    layout: Layout,
    dest: Box<dyn Destination>,
    control: Box<dyn ControlPlane>,
    locator: Box<dyn SessionLocator>,
    dispatcher: Dispatcher,
    gate: DeliveryGate,
    detector: CompletionDetector,
    binding: SessionBinding,
    source: Option<EventSource>,
    activity: ActivityLog,
    snapshot: HealthSnapshot,
    snapshot_path: PathBuf,
    last_stored: Option<HealthSnapshot>,
    message: String,
    auto_mode: bool,
    last_delivery: Option<Instant>,
    last_rebind_check: Instant,
    rebind_due: bool,
    /// Consecutive absent polls after the stream had been open (deletion).
    absent_after_open: u32,
    /// Locate attempts made while health is `error`.
    error_rebind_attempts: u32,
    /// Last time any event owned by the bound session was seen.
    bound_last_event: Option<Instant>,
}

impl std::fmt::Debug for WatchLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchLoop").finish_non_exhaustive()
    }
}

impl WatchLoop {
    pub fn new(
        opts: WatchOptions,
        settings: WatchSettings,
        layout: Layout,
        dest: Box<dyn Destination>,
        control: Box<dyn ControlPlane>,
        locator: Box<dyn SessionLocator>,
    ) -> Result<Self> {
        if opts.message.trim().is_empty() {
            bail!("follow-up message is empty");
        }

        let activity = ActivityLog::new(layout.activity_log(&opts.pane));
        let snapshot_path = layout.snapshot(&opts.pane);

        let mut binding = SessionBinding::unresolved(opts.pane.clone());
        let (session, auto_mode) = match opts.session {
            SessionArg::Explicit(id) => (Some(id), false),
            SessionArg::Auto => (locator.locate(&opts.pane)?, true),
        };
        binding.session = session.clone();

        let mut detector = CompletionDetector::new(session.clone());

        // Reload the duplicate guard so a restart does not re-fire on the
        // turn the previous watcher already delivered for.
        let mut snapshot = HealthSnapshot::new(opts.pane.clone());
        if let Some(previous) = HealthSnapshot::load(&snapshot_path) {
            if previous.session_id.is_some() && previous.session_id == session {
                if let (Some(sid), Some(turn)) =
                    (previous.session_id.clone(), previous.last_delivered_turn)
                {
                    detector.seed_last_emitted(sid, turn);
                }
                snapshot.last_delivery_at = previous.last_delivery_at;
                snapshot.last_delivered_turn = previous.last_delivered_turn;
            }
        }
        snapshot.session_id = session.clone();

        match &session {
            Some(id) => activity.append(&format!(
                "watch: pane={} session={id}",
                binding.pane
            ))?,
            None => activity.append(
                "warn: could not auto-detect session yet; waiting for first event",
            )?,
        }

        Ok(Self {
            gate: DeliveryGate::new(
                Duration::from_secs_f64(settings.cooldown_secs.max(0.0)),
                settings.require_pane_active,
            ),
            dispatcher: Dispatcher::new(
                Duration::from_millis(settings.send_delay_ms),
                Duration::from_millis(settings.enter_delay_ms),
            ),
            settings,
            layout,
            dest,
            control,
            locator,
            detector,
            binding,
            source: None,
            activity,
            snapshot,
            snapshot_path,
            last_stored: None,
            message: opts.message,
            auto_mode,
            last_delivery: None,
            last_rebind_check: Instant::now(),
            rebind_due: false,
            absent_after_open: 0,
            error_rebind_attempts: 0,
            bound_last_event: None,
        })
    }

    pub fn binding(&self) -> &SessionBinding {
        &self.binding
    }

    pub fn snapshot(&self) -> &HealthSnapshot {
        &self.snapshot
    }

    /// Run until the stop flag is set or a fatal condition ends the loop.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        let poll_interval = Duration::from_millis(self.settings.poll_interval_ms.max(50));
        let result = loop {
            if stop.load(Ordering::Relaxed) {
                info!(pane = %self.binding.pane, "stop requested");
                break Ok(());
            }
            if let Err(e) = self.cycle() {
                break Err(e);
            }
            std::thread::sleep(poll_interval);
        };

        // Release the cursor and leave a final snapshot either way.
        self.source = None;
        self.binding.stream_path = None;
        if let Err(e) = &result {
            self.set_health(HealthState::Error, Some(e.to_string()));
            self.note(&format!("error: {e}"));
        }
        self.persist();
        result
    }

    /// One top-level cycle. Public for tests; `run` adds pacing and the
    /// stop flag around it.
    pub fn cycle(&mut self) -> Result<()> {
        self.ensure_source();
        self.poll_phase()?;
        self.stale_phase();
        self.rebind_phase()?;
        self.persist();
        Ok(())
    }

    /// Open or swap the tailed stream to match the current binding.
    fn ensure_source(&mut self) {
        let (kind, path) = self.desired_stream();
        let matches = self
            .source
            .as_ref()
            .is_some_and(|s| s.path() == path.as_path() && s.kind() == kind);
        if matches {
            return;
        }

        // Drop the old cursor before opening a new one.
        let was_open = self.source.take().is_some();
        if was_open {
            self.note(&format!(
                "watch: stream -> {} ({})",
                path.display(),
                kind_label(kind)
            ));
        } else {
            debug!(path = %path.display(), "opening stream");
        }
        self.binding.stream_path = Some(path.clone());
        self.absent_after_open = 0;
        self.source = Some(EventSource::new(kind, path));
    }

    /// Pick the stream for the current binding: the per-session rollout file
    /// once it exists, else the shared TUI log.
    fn desired_stream(&self) -> (StreamKind, PathBuf) {
        if let Some(session) = &self.binding.session {
            if let Some(path) = self.layout.rollout_for(session) {
                return (StreamKind::Rollout, path);
            }
        }
        (StreamKind::LogLine, self.layout.tui_log())
    }

    fn poll_phase(&mut self) -> Result<()> {
        let (result, opened, errors) = {
            let Some(source) = self.source.as_mut() else {
                return Ok(());
            };
            let result = source.poll();
            (result, source.opened(), source.consecutive_errors())
        };

        match result {
            Ok(poll) => {
                if poll.absent {
                    if opened {
                        self.absent_after_open = self.absent_after_open.saturating_add(1);
                        if self.absent_after_open > self.settings.retry_budget {
                            self.set_health(
                                HealthState::Error,
                                Some("stream deleted with no replacement".to_string()),
                            );
                            self.rebind_due = true;
                        }
                    } else {
                        self.set_health(
                            HealthState::Warn,
                            Some("stream file not found".to_string()),
                        );
                    }
                    return Ok(());
                }
                self.absent_after_open = 0;

                // A readable stream clears warn/error; stale clears only on
                // growth below.
                if matches!(self.binding.health, HealthState::Warn | HealthState::Error) {
                    self.set_health(HealthState::Ok, None);
                }

                if poll.rotated {
                    self.note("watch: stream rotated; cursor reset");
                }
                if poll.grew {
                    self.binding.last_growth = Some(Instant::now());
                    if self.binding.health != HealthState::Ok {
                        self.set_health(HealthState::Ok, None);
                    }
                }

                for record in &poll.records {
                    self.handle_record(record);
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, errors, "stream read failed");
                self.set_health(HealthState::Error, Some(e.to_string()));
                if errors == 1 {
                    self.note(&format!("error: read failed: {e}"));
                }
                if errors > self.settings.retry_budget {
                    self.rebind_due = true;
                }
                Ok(())
            }
        }
    }

    fn handle_record(&mut self, record: &EventRecord) {
        match self.detector.classify(record) {
            Classification::Irrelevant => {}
            Classification::Activity { .. } => {
                self.bound_last_event = Some(Instant::now());
            }
            Classification::Completed { session, turn } => {
                self.bound_last_event = Some(Instant::now());
                self.deliver_turn(&session, turn);
            }
            Classification::Duplicate { turn, .. } => {
                self.note(&format!("skip: duplicate marker turn={turn}"));
            }
            Classification::SupersededDialect { turn, .. } => {
                self.note(&format!(
                    "conflict: log-line completion turn={turn} ignored (structured dialect active)"
                ));
            }
            Classification::OtherSession { session } => {
                self.handle_other_session(session, record);
            }
        }
    }

    /// Deferred selection and idle rebinding for auto mode.
    fn handle_other_session(&mut self, session: SessionId, record: &EventRecord) {
        let now = Instant::now();

        if self.binding.session.is_none() {
            self.bind_session(session, "auto-selected");
            self.reclassify_after_bind(record);
            return;
        }

        if !self.auto_mode {
            return;
        }

        let idle = Duration::from_secs_f64(self.settings.idle_rebind_secs.max(0.0));
        let ours_idle = match self.bound_last_event {
            None => true,
            Some(last) => now.duration_since(last) > idle,
        };
        if ours_idle {
            let previous = self.binding.session.clone();
            self.bind_session(session, "auto-rebind");
            if let Some(prev) = previous {
                debug!(previous = %prev, "idle session replaced");
            }
            self.reclassify_after_bind(record);
        }
    }

    /// The record that triggered selection may itself be the completion.
    fn reclassify_after_bind(&mut self, record: &EventRecord) {
        if let Classification::Completed { session, turn } = self.detector.classify(record) {
            self.bound_last_event = Some(Instant::now());
            self.deliver_turn(&session, turn);
        }
    }

    fn bind_session(&mut self, session: SessionId, how: &str) {
        // Invariant: release the old stream cursor before the identifier
        // changes; ensure_source opens the new one next cycle.
        self.source = None;
        self.binding.stream_path = None;

        let from = self
            .binding
            .session
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "none".to_string());
        self.note(&format!("watch: {how} session {from} -> {session}"));

        self.detector.bind(session.clone());
        self.binding.session = Some(session.clone());
        self.snapshot.session_id = Some(session);
        self.bound_last_event = None;
        self.error_rebind_attempts = 0;
        self.absent_after_open = 0;
    }

    fn deliver_turn(&mut self, session: &SessionId, turn: u64) {
        let decision = self.gate.evaluate(
            self.dest.as_ref(),
            self.control.as_ref(),
            self.last_delivery,
            Instant::now(),
        );

        if !decision.allow {
            self.note(&format!("skip: {} turn={turn}", decision.reason));
            self.snapshot.last_event = Some(format!("skip {} turn={turn}", decision.reason));
            if decision.reason == GateReason::DestinationUnreachable {
                self.rebind_due = true;
            }
            return;
        }

        match self.dispatcher.deliver(self.dest.as_ref(), &self.message) {
            Ok(()) => {
                self.last_delivery = Some(Instant::now());
                self.snapshot.last_delivery_at = Some(Utc::now());
                self.snapshot.last_delivered_turn = Some(turn);
                self.snapshot.last_event = Some(format!("continue turn={turn}"));
                self.note(&format!("continue: sent turn={turn} session={session}"));
            }
            Err(DeliverError::Unreachable) => {
                self.snapshot.last_event = Some(format!("send failed turn={turn}"));
                self.note(&format!("error: send failed turn={turn} session={session}"));
                self.rebind_due = true;
            }
        }
    }

    fn stale_phase(&mut self) {
        if self.binding.health != HealthState::Ok {
            return;
        }
        let Some(last) = self.binding.last_growth else {
            return;
        };
        let threshold = Duration::from_secs(self.settings.stale_after_secs);
        if last.elapsed() >= threshold {
            self.set_health(
                HealthState::Stale,
                Some(format!(
                    "no stream growth for {}s",
                    self.settings.stale_after_secs
                )),
            );
        }
    }

    fn rebind_phase(&mut self) -> Result<()> {
        let interval = Duration::from_secs(self.settings.rebind_interval_secs.max(1));
        if !self.rebind_due && self.last_rebind_check.elapsed() < interval {
            return Ok(());
        }
        self.rebind_due = false;
        self.last_rebind_check = Instant::now();

        // Explicit bindings never move to a different session; rebinding for
        // them only re-resolves the stream file (handled by ensure_source).
        if !self.auto_mode {
            return self.check_error_exit();
        }

        match self.locator.locate(&self.binding.pane) {
            Ok(Some(found)) => {
                if self.binding.session.as_ref() != Some(&found) {
                    self.bind_session(found, "rebind");
                } else if self.binding.health == HealthState::Error {
                    // Same session, still broken: burn one attempt.
                    self.error_rebind_attempts += 1;
                }
            }
            Ok(None) => {
                if self.binding.health == HealthState::Error {
                    self.error_rebind_attempts += 1;
                }
            }
            Err(e) => {
                // Process-tree inspection hiccups are transient.
                debug!(error = %e, "locate failed; retrying next interval");
            }
        }

        self.check_error_exit()
    }

    fn check_error_exit(&mut self) -> Result<()> {
        if self.binding.health == HealthState::Error {
            if !self.auto_mode {
                self.error_rebind_attempts += 1;
            }
            if self.error_rebind_attempts > self.settings.max_rebind_attempts {
                bail!(
                    "stream unreadable and no rebinding candidate after {} attempts",
                    self.settings.max_rebind_attempts
                );
            }
        }
        Ok(())
    }

    fn set_health(&mut self, health: HealthState, detail: Option<String>) {
        if self.binding.health == health {
            self.snapshot.health_detail = detail;
            return;
        }
        self.note(&format!(
            "health: {} -> {}{}",
            self.binding.health,
            health,
            detail
                .as_deref()
                .map(|d| format!(" ({d})"))
                .unwrap_or_default()
        ));
        self.binding.health = health;
        self.snapshot.health = health;
        self.snapshot.health_detail = detail;
        self.snapshot.health_since = Utc::now();
        if health != HealthState::Error {
            self.error_rebind_attempts = 0;
        }
    }

    /// Append to the activity log; a failing log never kills the loop.
    fn note(&mut self, message: &str) {
        if let Err(e) = self.activity.append(message) {
            warn!(error = %e, "activity log write failed");
        }
    }

    fn persist(&mut self) {
        if self.last_stored.as_ref() == Some(&self.snapshot) {
            return;
        }
        match self.snapshot.store(&self.snapshot_path) {
            Ok(()) => self.last_stored = Some(self.snapshot.clone()),
            Err(e) => warn!(error = %e, "snapshot write failed"),
        }
    }
}

fn kind_label(kind: StreamKind) -> &'static str {
    match kind {
        StreamKind::LogLine => "log-line",
        StreamKind::Rollout => "rollout",
    }
}
