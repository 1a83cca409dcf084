//! Debounce and throttle helpers for the engine loop.

use std::time::{Duration, Instant};

use crate::panel::state::PanelSide;

/// Trailing-edge debounce for panel refresh requests: multiple change
/// notifications within the window collapse into one refresh.
#[derive(Debug)]
pub struct RefreshDebounce {
    window: Duration,
    pending: [Option<Instant>; 2],
}

impl RefreshDebounce {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: [None, None],
        }
    }

    /// Record a change notification for a panel.
    pub fn request(&mut self, side: PanelSide, now: Instant) {
        self.pending[side.index()] = Some(now);
    }

    /// Panels whose window has elapsed; cleared as they are returned.
    pub fn take_due(&mut self, now: Instant) -> Vec<PanelSide> {
        let mut due = Vec::new();
        for side in [PanelSide::Left, PanelSide::Right] {
            if let Some(stamp) = self.pending[side.index()] {
                if now.duration_since(stamp) >= self.window {
                    self.pending[side.index()] = None;
                    due.push(side);
                }
            }
        }
        due
    }

    /// Earliest instant a pending refresh becomes due.
    pub fn next_due(&self) -> Option<Instant> {
        self.pending
            .iter()
            .flatten()
            .map(|stamp| *stamp + self.window)
            .min()
    }
}

/// Simple rate-limiter for progress publication.
#[derive(Debug)]
pub struct Throttler {
    last: Option<Instant>,
    interval: Duration,
}

impl Throttler {
    pub const fn new(interval: Duration) -> Self {
        Self {
            last: None,
            interval,
        }
    }

    /// Returns true when an operation may run now.
    pub fn should_trigger(&mut self, now: Instant) -> bool {
        match self.last {
            None => {
                self.last = Some(now);
                true
            }
            Some(prev) if now.duration_since(prev) >= self.interval => {
                self.last = Some(now);
                true
            }
            _ => false,
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
