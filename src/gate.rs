//! Delivery gate.
//!
//! Decides whether a detected completion actually triggers delivery. The
//! pause markers are a read-only control plane: any boolean signal source
//! can stand in for the default file-presence implementation without
//! touching the gate's logic.

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::paths::Layout;
use crate::tmux::Destination;

/// Read-only pause signals, polled each cycle.
pub trait ControlPlane {
    fn paused_globally(&self) -> bool;
    fn paused_for_pane(&self, pane: &str) -> bool;
}

/// File-presence control plane under the watcher state directory.
pub struct FsControlPlane {
    global_marker: PathBuf,
    state_dir: PathBuf,
}

impl FsControlPlane {
    pub fn new(layout: &Layout) -> Self {
        Self {
            global_marker: layout.global_pause_marker(),
            state_dir: layout.state_dir.clone(),
        }
    }
}

impl ControlPlane for FsControlPlane {
    fn paused_globally(&self) -> bool {
        self.global_marker.exists()
    }

    fn paused_for_pane(&self, pane: &str) -> bool {
        self.state_dir
            .join(format!("pause.{}", crate::paths::pane_key(pane)))
            .exists()
    }
}

/// Why the gate allowed or blocked a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GateReason {
    Paused,
    CooldownBlocked,
    DestinationUnreachable,
    /// `require_pane_active` is set and the pane is not its window's active
    /// pane.
    Inactive,
    Ok,
}

impl fmt::Display for GateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GateReason::Paused => "paused",
            GateReason::CooldownBlocked => "cooldown-blocked",
            GateReason::DestinationUnreachable => "destination-unreachable",
            GateReason::Inactive => "inactive",
            GateReason::Ok => "ok",
        };
        f.write_str(s)
    }
}

/// Result of evaluating one completion.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryDecision {
    pub allow: bool,
    pub reason: GateReason,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct DeliveryGate {
    pub cooldown: Duration,
    pub require_pane_active: bool,
}

impl DeliveryGate {
    pub fn new(cooldown: Duration, require_pane_active: bool) -> Self {
        Self {
            cooldown,
            require_pane_active,
        }
    }

    /// Evaluate one detected completion.
    ///
    /// Checks run in a fixed order: pause markers, cooldown, reachability,
    /// then the optional active-pane requirement. The gate itself is
    /// stateless; `last_delivery` is owned by the dispatcher's caller.
    pub fn evaluate(
        &self,
        dest: &dyn Destination,
        control: &dyn ControlPlane,
        last_delivery: Option<Instant>,
        now: Instant,
    ) -> DeliveryDecision {
        let decided = |allow, reason| DeliveryDecision {
            allow,
            reason,
            at: Utc::now(),
        };

        if control.paused_globally() || control.paused_for_pane(dest.id()) {
            return decided(false, GateReason::Paused);
        }

        if let Some(last) = last_delivery {
            if now.duration_since(last) < self.cooldown {
                return decided(false, GateReason::CooldownBlocked);
            }
        }

        if !dest.reachable() {
            return decided(false, GateReason::DestinationUnreachable);
        }

        if self.require_pane_active && !dest.active() {
            return decided(false, GateReason::Inactive);
        }

        decided(true, GateReason::Ok)
    }
}
