//! Shared test doubles.

use std::cell::RefCell;

use anyhow::Result;

use crate::deliver::DeliverError;
use crate::gate::ControlPlane;
use crate::locate::SessionLocator;
use crate::session::SessionId;
use crate::tmux::Destination;

/// Destination fake recording the injection sequence.
pub struct FakePane {
    pub id: String,
    pub reachable: bool,
    pub active: bool,
    pub sent: RefCell<Vec<String>>,
    pub fail_text: bool,
    pub fail_enter: bool,
}

impl FakePane {
    pub fn live(id: &str) -> Self {
        Self {
            id: id.to_string(),
            reachable: true,
            active: true,
            sent: RefCell::new(Vec::new()),
            fail_text: false,
            fail_enter: false,
        }
    }

    pub fn unreachable(id: &str) -> Self {
        let mut pane = Self::live(id);
        pane.reachable = false;
        pane.fail_text = true;
        pane.fail_enter = true;
        pane
    }
}

impl Destination for FakePane {
    fn id(&self) -> &str {
        &self.id
    }

    fn reachable(&self) -> bool {
        self.reachable
    }

    fn active(&self) -> bool {
        self.active
    }

    fn send_text(&self, text: &str) -> Result<(), DeliverError> {
        if self.fail_text {
            return Err(DeliverError::Unreachable);
        }
        self.sent.borrow_mut().push(format!("text:{text}"));
        Ok(())
    }

    fn send_enter(&self) -> Result<(), DeliverError> {
        if self.fail_enter {
            return Err(DeliverError::Unreachable);
        }
        self.sent.borrow_mut().push("enter".to_string());
        Ok(())
    }
}

/// Control plane fake with fixed pause flags.
pub struct FakeControl {
    pub global: bool,
    pub pane: bool,
}

impl FakeControl {
    pub fn open() -> Self {
        Self {
            global: false,
            pane: false,
        }
    }
}

impl ControlPlane for FakeControl {
    fn paused_globally(&self) -> bool {
        self.global
    }

    fn paused_for_pane(&self, _pane: &str) -> bool {
        self.pane
    }
}

/// Locator fake that always returns the same answer.
pub struct FixedLocator {
    result: Option<SessionId>,
}

impl FixedLocator {
    pub fn empty() -> Self {
        Self { result: None }
    }

    pub fn always(session: SessionId) -> Self {
        Self {
            result: Some(session),
        }
    }
}

impl SessionLocator for FixedLocator {
    fn locate(&self, _pane: &str) -> Result<Option<SessionId>> {
        Ok(self.result.clone())
    }
}
