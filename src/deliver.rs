//! Message dispatcher.
//!
//! Delivery is a two-step injection: the payload is written literally into
//! the destination's input buffer, and only after a settle delay is the
//! activation Enter sent. Destinations that submit on newline would
//! otherwise split a multi-line message into several premature turns.

use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::tmux::Destination;

#[derive(Debug, Error, PartialEq)]
pub enum DeliverError {
    /// The destination write failed — the pane is gone or the terminal
    /// server is unreachable. Surfaced to the gate; triggers rebinding.
    #[error("destination unreachable")]
    Unreachable,
}

/// Delivery timing knobs.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    /// Pause before writing the payload, letting the destination's own input
    /// handling settle after the turn-complete repaint.
    pub send_delay: Duration,
    /// Pause between the payload write and the activation Enter.
    pub enter_delay: Duration,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self {
            send_delay: Duration::from_millis(250),
            enter_delay: Duration::from_millis(150),
        }
    }
}

impl Dispatcher {
    pub fn new(send_delay: Duration, enter_delay: Duration) -> Self {
        Self {
            send_delay,
            enter_delay,
        }
    }

    /// Deliver `text` to the destination and submit it with one Enter.
    pub fn deliver(&self, dest: &dyn Destination, text: &str) -> Result<(), DeliverError> {
        if !self.send_delay.is_zero() {
            std::thread::sleep(self.send_delay);
        }
        dest.send_text(text)?;
        if !self.enter_delay.is_zero() {
            std::thread::sleep(self.enter_delay);
        }
        dest.send_enter()?;
        debug!(pane = dest.id(), bytes = text.len(), "delivered");
        Ok(())
    }
}
