//! Error preemption: the synthetic error item and the rotation it displaced.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use embedded_graphics::prelude::Size;

use crate::constants::MAX_MESSAGE_LEN;
use crate::panels::ErrorPanel;
use crate::queue::{DisplayItem, ItemHandle, Priority, RotationMode};
use crate::state::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Shown once as a notice, rotation continues.
    Warning,
    /// Takes over the display until resolved or acknowledged.
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warning" | "warn" => Ok(Severity::Warning),
            "critical" | "error" => Ok(Severity::Critical),
            other => Err(format!("unknown severity `{other}`")),
        }
    }
}

/// Rotation state captured when an error took over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedRotation {
    pub mode: RotationMode,
    pub handle: Option<ItemHandle>,
    /// How long `handle` had already been on screen.
    pub elapsed: Duration,
    pub resume: Phase,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorState {
    pub message: String,
    pub severity: Severity,
    pub since: Instant,
    /// Queue handle of the synthetic error item.
    pub handle: ItemHandle,
    pub saved: SavedRotation,
}

/// Trim, fall back to a placeholder and cap the length of a reported message.
pub fn normalize_message(message: &str) -> String {
    let message = message.trim();
    if message.is_empty() {
        return "unknown error".to_string();
    }
    message.chars().take(MAX_MESSAGE_LEN).collect()
}

/// Holds at most one active critical error.
#[derive(Debug, Default)]
pub struct ErrorOverlay {
    state: Option<ErrorState>,
}

impl ErrorOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unbounded, top-priority item rendering a critical error.
    pub fn error_item(message: &str, size: Size) -> DisplayItem {
        DisplayItem::new(Arc::new(ErrorPanel::new(message, Severity::Critical, size)))
            .unbounded()
            .with_priority(Priority::Critical)
    }

    /// One-shot notice for a warning. It sorts ahead of normal items, so it
    /// is shown once when the rotation next wraps to the front, then dropped.
    pub fn notice_item(message: &str, size: Size) -> DisplayItem {
        DisplayItem::new(Arc::new(ErrorPanel::new(message, Severity::Warning, size)))
            .with_priority(Priority::High)
            .one_shot()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    pub fn state(&self) -> Option<&ErrorState> {
        self.state.as_ref()
    }

    pub fn handle(&self) -> Option<ItemHandle> {
        self.state.as_ref().map(|s| s.handle)
    }

    pub fn message(&self) -> Option<&str> {
        self.state.as_ref().map(|s| s.message.as_str())
    }

    pub fn raise(&mut self, message: String, handle: ItemHandle, saved: SavedRotation, now: Instant) {
        self.state = Some(ErrorState {
            message,
            severity: Severity::Critical,
            since: now,
            handle,
            saved,
        });
    }

    /// Swap in a new message and item for the active error, keeping the saved
    /// rotation. Returns the handle of the item it replaces.
    pub fn update(&mut self, message: String, handle: ItemHandle) -> Option<ItemHandle> {
        let state = self.state.as_mut()?;
        state.message = message;
        Some(std::mem::replace(&mut state.handle, handle))
    }

    /// The mode to restore once the error clears.
    pub fn set_saved_mode(&mut self, mode: RotationMode) -> bool {
        match self.state.as_mut() {
            Some(state) => {
                state.saved.mode = mode;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) -> Option<ErrorState> {
        self.state.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{DisplayQueue, ItemDuration};

    fn saved() -> SavedRotation {
        SavedRotation {
            mode: RotationMode::Auto,
            handle: None,
            elapsed: Duration::from_secs(2),
            resume: Phase::Rotating,
        }
    }

    fn size() -> Size {
        Size::new(160, 80)
    }

    #[test]
    fn test_error_item_is_unbounded_and_critical() {
        let item = ErrorOverlay::error_item("mqtt offline", size());
        assert_eq!(item.duration, ItemDuration::Unbounded);
        assert_eq!(item.priority, Priority::Critical);
        assert_eq!(item.name(), "error");

        let notice = ErrorOverlay::notice_item("disk low", size());
        assert!(!notice.repeat);
        assert_eq!(notice.name(), "warning");
    }

    #[test]
    fn test_notice_is_shown_at_the_next_wrap_then_dropped() {
        let mut queue = DisplayQueue::new();
        let first = queue.enqueue(ErrorOverlay::error_item("x", size()).with_priority(Priority::Normal));
        let second = queue.enqueue(ErrorOverlay::error_item("y", size()).with_priority(Priority::Normal));
        queue.advance();
        assert_eq!(queue.current().map(|(h, _)| h), Some(second));

        let notice = queue.enqueue(ErrorOverlay::notice_item("disk low", size()));
        assert_eq!(queue.handles(), vec![notice, first, second]);
        assert_eq!(queue.current().map(|(h, _)| h), Some(second));

        assert_eq!(queue.advance(), Some(notice));
        assert_eq!(queue.advance(), Some(first));
        assert!(!queue.contains(notice));
    }

    #[test]
    fn test_update_keeps_saved_rotation() {
        let mut queue = DisplayQueue::new();
        let first = queue.enqueue(ErrorOverlay::error_item("a", size()));
        let second = queue.enqueue(ErrorOverlay::error_item("b", size()));

        let mut overlay = ErrorOverlay::new();
        overlay.raise("a".into(), first, saved(), Instant::now());
        assert_eq!(overlay.update("b".into(), second), Some(first));
        assert_eq!(overlay.message(), Some("b"));
        assert_eq!(overlay.state().map(|s| s.saved), Some(saved()));
    }

    #[test]
    fn test_saved_mode_follows_mode_changes() {
        let mut overlay = ErrorOverlay::new();
        assert!(!overlay.set_saved_mode(RotationMode::Manual));
        let handle = DisplayQueue::new().enqueue(ErrorOverlay::error_item("x", size()));
        overlay.raise("x".into(), handle, saved(), Instant::now());
        assert!(overlay.set_saved_mode(RotationMode::Manual));
        let state = overlay.clear().unwrap();
        assert_eq!(state.saved.mode, RotationMode::Manual);
        assert!(!overlay.is_active());
    }

    #[test]
    fn test_message_normalization() {
        assert_eq!(normalize_message("  mqtt offline \n"), "mqtt offline");
        assert_eq!(normalize_message(""), "unknown error");
        assert_eq!(normalize_message(&"x".repeat(1000)).len(), MAX_MESSAGE_LEN);
    }

    #[test]
    fn test_severity_parsing() {
        assert_eq!("CRITICAL".parse::<Severity>(), Ok(Severity::Critical));
        assert_eq!("warn".parse::<Severity>(), Ok(Severity::Warning));
        assert!("meh".parse::<Severity>().is_err());
    }
}
