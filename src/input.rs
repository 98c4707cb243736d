//! Proximity taps: raw readings to edges, edges to single and double taps.

use std::time::{Duration, Instant};

use crate::constants::{DOUBLE_TAP_WINDOW, PROXIMITY_NEAR, PROXIMITY_RELEASE, TAP_DEBOUNCE};

/// Turns raw proximity readings into rising edges. A hand must drop below
/// `release` before another edge can fire.
#[derive(Debug, Clone)]
pub struct ProximityDebouncer {
    near: u16,
    release: u16,
    is_near: bool,
}

impl Default for ProximityDebouncer {
    fn default() -> Self {
        Self::new(PROXIMITY_NEAR, PROXIMITY_RELEASE)
    }
}

impl ProximityDebouncer {
    pub fn new(near: u16, release: u16) -> Self {
        Self {
            near,
            release: release.min(near),
            is_near: false,
        }
    }

    /// Returns `true` on the reading that crosses into "near".
    pub fn update(&mut self, value: u16) -> bool {
        if self.is_near {
            if value < self.release {
                self.is_near = false;
            }
            false
        } else if value >= self.near {
            self.is_near = true;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapEvent {
    pub at: Instant,
    pub count: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapAction {
    Single,
    Double,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputState {
    #[default]
    Idle,
    Detected(TapEvent), // A single tap waiting for the window to close
}

#[derive(Debug, Clone)]
pub struct InputMonitor {
    window: Duration,
    debounce: Duration,
    state: InputState,
    last_edge: Option<Instant>,
}

impl Default for InputMonitor {
    fn default() -> Self {
        Self::new(DOUBLE_TAP_WINDOW, TAP_DEBOUNCE)
    }
}

impl InputMonitor {
    pub fn new(window: Duration, debounce: Duration) -> Self {
        Self {
            window,
            debounce,
            state: InputState::Idle,
            last_edge: None,
        }
    }

    pub fn state(&self) -> InputState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, InputState::Detected(_))
    }

    /// Feed one tap edge. Returns an action only when the edge settles one:
    /// a double tap, or a stale single tap that the caller missed polling.
    pub fn on_edge(&mut self, now: Instant) -> Option<TapAction> {
        if let Some(last) = self.last_edge {
            if now.saturating_duration_since(last) < self.debounce {
                return None;
            }
        }
        self.last_edge = Some(now);

        match self.state {
            InputState::Idle => {
                self.state = InputState::Detected(TapEvent { at: now, count: 1 });
                None
            }
            InputState::Detected(tap) if now.saturating_duration_since(tap.at) < self.window => {
                self.state = InputState::Idle;
                Some(TapAction::Double)
            }
            InputState::Detected(_) => {
                self.state = InputState::Detected(TapEvent { at: now, count: 1 });
                Some(TapAction::Single)
            }
        }
    }

    /// Fires the pending single tap once its window has closed.
    pub fn poll(&mut self, now: Instant) -> Option<TapAction> {
        match self.state {
            InputState::Detected(tap) if now.saturating_duration_since(tap.at) >= self.window => {
                self.state = InputState::Idle;
                Some(TapAction::Single)
            }
            _ => None,
        }
    }
}
