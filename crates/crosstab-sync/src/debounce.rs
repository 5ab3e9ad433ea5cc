//! Trailing-edge coalescing of outgoing state updates.

use std::time::Duration;

use crosstab_core::StateValue;
use tokio::time::Instant;

/// Holds back outgoing updates until `window` passes without a newer one.
///
/// Each push replaces the pending value and restarts the window, so only the
/// last value of a burst is sent. A zero window sends immediately.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: Option<(StateValue, Instant)>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
        }
    }

    /// Queue `value`. Returns it back if it should be sent right away.
    pub fn push(&mut self, value: StateValue, now: Instant) -> Option<StateValue> {
        if self.window.is_zero() {
            return Some(value);
        }
        self.pending = Some((value, now + self.window));
        None
    }

    /// When the pending value becomes due.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, deadline)| *deadline)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Take the pending value if its deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> Option<StateValue> {
        match self.deadline() {
            Some(deadline) if deadline <= now => self.pending.take().map(|(value, _)| value),
            _ => None,
        }
    }

    /// Drop the pending value without sending it.
    pub fn cancel(&mut self) -> Option<StateValue> {
        self.pending.take().map(|(value, _)| value)
    }
}
