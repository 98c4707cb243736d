//! Ordered display items and the rotation cursor.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::renderable::Renderable;

/// Identity of an enqueued item, unique for the queue's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemHandle(u64);

impl ItemHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ItemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemDuration {
    /// Use the scheduler's rotation interval.
    #[default]
    Interval,
    Fixed(Duration),
    /// Never expires on its own.
    Unbounded,
}

impl ItemDuration {
    pub fn resolve(self, interval: Duration) -> Option<Duration> {
        match self {
            ItemDuration::Interval => Some(interval),
            ItemDuration::Fixed(d) => Some(d),
            ItemDuration::Unbounded => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationMode {
    /// Display blank, rotation state kept.
    Off,
    #[default]
    Auto,
    /// Advance only on tap or explicit request.
    Manual,
}

impl RotationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RotationMode::Off => "off",
            RotationMode::Auto => "auto",
            RotationMode::Manual => "manual",
        }
    }
}

impl FromStr for RotationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(RotationMode::Off),
            "auto" => Ok(RotationMode::Auto),
            "manual" => Ok(RotationMode::Manual),
            other => Err(format!("unknown mode `{other}` (expected off, auto or manual)")),
        }
    }
}

/// Something to put on screen, with its scheduling metadata.
#[derive(Clone)]
pub struct DisplayItem {
    pub renderable: Arc<dyn Renderable>,
    pub duration: ItemDuration,
    pub priority: Priority,
    /// `false` drops the item after it has been shown once.
    pub repeat: bool,
}

impl DisplayItem {
    pub fn new(renderable: Arc<dyn Renderable>) -> Self {
        Self {
            renderable,
            duration: ItemDuration::Interval,
            priority: Priority::Normal,
            repeat: true,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = ItemDuration::Fixed(duration);
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.duration = ItemDuration::Unbounded;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn one_shot(mut self) -> Self {
        self.repeat = false;
        self
    }

    pub fn name(&self) -> &str {
        self.renderable.name()
    }
}

impl fmt::Debug for DisplayItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayItem")
            .field("renderable", &self.renderable.name())
            .field("duration", &self.duration)
            .field("priority", &self.priority)
            .field("repeat", &self.repeat)
            .finish()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    handle: ItemHandle,
    item: DisplayItem,
}

/// Items ordered by priority (highest first), FIFO within a priority, plus a
/// cursor that is always a valid index unless the queue is empty.
#[derive(Debug, Default)]
pub struct DisplayQueue {
    entries: Vec<Entry>,
    cursor: usize,
    next_handle: u64,
}

impl DisplayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Insert after the last entry of equal or higher priority. The active
    /// entry stays active.
    pub fn enqueue(&mut self, item: DisplayItem) -> ItemHandle {
        let handle = ItemHandle(self.next_handle);
        self.next_handle += 1;

        let pos = self
            .entries
            .iter()
            .rposition(|e| e.item.priority >= item.priority)
            .map_or(0, |i| i + 1);
        let was_empty = self.entries.is_empty();
        self.entries.insert(pos, Entry { handle, item });
        if !was_empty && pos <= self.cursor {
            self.cursor += 1;
        }
        handle
    }

    /// Remove an entry. Removing the active entry makes the next one active.
    pub fn dequeue(&mut self, handle: ItemHandle) -> Option<DisplayItem> {
        let idx = self.position(handle)?;
        let entry = self.entries.remove(idx);
        if idx < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= self.entries.len() {
            self.cursor = 0;
        }
        Some(entry.item)
    }

    pub fn current(&self) -> Option<(ItemHandle, &DisplayItem)> {
        self.entries.get(self.cursor).map(|e| (e.handle, &e.item))
    }

    pub fn get(&self, handle: ItemHandle) -> Option<&DisplayItem> {
        self.entries.iter().find(|e| e.handle == handle).map(|e| &e.item)
    }

    /// Move to the next entry, wrapping to the first. A one-shot entry is
    /// dropped as the cursor leaves it. Returns the new current handle.
    pub fn advance(&mut self) -> Option<ItemHandle> {
        let (handle, repeat) = self.current().map(|(h, item)| (h, item.repeat))?;
        if repeat {
            self.cursor = (self.cursor + 1) % self.entries.len();
        } else {
            self.dequeue(handle);
        }
        self.current().map(|(h, _)| h)
    }

    /// Make `handle` the current entry. Returns `false` if it is not queued.
    pub fn select(&mut self, handle: ItemHandle) -> bool {
        match self.position(handle) {
            Some(idx) => {
                self.cursor = idx;
                true
            }
            None => false,
        }
    }

    pub fn position(&self, handle: ItemHandle) -> Option<usize> {
        self.entries.iter().position(|e| e.handle == handle)
    }

    pub fn contains(&self, handle: ItemHandle) -> bool {
        self.position(handle).is_some()
    }

    /// Handles in rotation order.
    pub fn handles(&self) -> Vec<ItemHandle> {
        self.entries.iter().map(|e| e.handle).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    struct Named(&'static str);

    impl Renderable for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn render(&self) -> anyhow::Result<Frame> {
            Ok(Frame::blank())
        }
    }

    fn item(name: &'static str) -> DisplayItem {
        DisplayItem::new(Arc::new(Named(name)))
    }

    fn names(queue: &DisplayQueue) -> Vec<&str> {
        queue.handles().iter().map(|h| queue.get(*h).unwrap().name()).collect()
    }

    #[test]
    fn test_equal_priority_keeps_insertion_order() {
        let mut queue = DisplayQueue::new();
        queue.enqueue(item("a"));
        queue.enqueue(item("b"));
        queue.enqueue(item("c"));
        assert_eq!(names(&queue), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_priority_orders_before_fifo() {
        let mut queue = DisplayQueue::new();
        queue.enqueue(item("low").with_priority(Priority::Low));
        queue.enqueue(item("a"));
        queue.enqueue(item("hi").with_priority(Priority::High));
        queue.enqueue(item("b"));
        assert_eq!(names(&queue), vec!["hi", "a", "b", "low"]);
    }

    #[test]
    fn test_insert_before_cursor_keeps_active_item() {
        let mut queue = DisplayQueue::new();
        queue.enqueue(item("a"));
        let b = queue.enqueue(item("b"));
        queue.advance();
        assert_eq!(queue.current().map(|(h, _)| h), Some(b));

        queue.enqueue(item("urgent").with_priority(Priority::High));
        assert_eq!(queue.current().map(|(h, _)| h), Some(b));
        assert_eq!(queue.cursor(), 2);
    }

    #[test]
    fn test_advance_wraps() {
        let mut queue = DisplayQueue::new();
        let a = queue.enqueue(item("a"));
        let b = queue.enqueue(item("b"));
        assert_eq!(queue.advance(), Some(b));
        assert_eq!(queue.advance(), Some(a));
    }

    #[test]
    fn test_dequeue_active_moves_to_next_and_wraps() {
        let mut queue = DisplayQueue::new();
        let a = queue.enqueue(item("a"));
        let b = queue.enqueue(item("b"));
        queue.advance();
        assert!(queue.dequeue(b).is_some());
        assert_eq!(queue.current().map(|(h, _)| h), Some(a));

        assert!(queue.dequeue(a).is_some());
        assert!(queue.current().is_none());
        assert_eq!(queue.cursor(), 0);
        assert!(queue.dequeue(a).is_none());
    }

    #[test]
    fn test_dequeue_before_cursor_shifts_it() {
        let mut queue = DisplayQueue::new();
        let a = queue.enqueue(item("a"));
        queue.enqueue(item("b"));
        let c = queue.enqueue(item("c"));
        queue.advance();
        queue.advance();
        queue.dequeue(a);
        assert_eq!(queue.current().map(|(h, _)| h), Some(c));
    }

    #[test]
    fn test_one_shot_dropped_after_showing() {
        let mut queue = DisplayQueue::new();
        let note = queue.enqueue(item("note").one_shot());
        let a = queue.enqueue(item("a"));
        assert_eq!(queue.current().map(|(h, _)| h), Some(note));
        assert_eq!(queue.advance(), Some(a));
        assert!(!queue.contains(note));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_select_and_empty_advance() {
        let mut queue = DisplayQueue::new();
        assert_eq!(queue.advance(), None);
        queue.enqueue(item("a"));
        let b = queue.enqueue(item("b"));
        assert!(queue.select(b));
        assert_eq!(queue.cursor(), 1);
        assert!(!queue.select(ItemHandle(99)));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(" Manual ".parse::<RotationMode>(), Ok(RotationMode::Manual));
        assert!("sideways".parse::<RotationMode>().is_err());
    }

    #[test]
    fn test_duration_resolution() {
        let interval = Duration::from_secs(5);
        assert_eq!(ItemDuration::Interval.resolve(interval), Some(interval));
        assert_eq!(ItemDuration::Fixed(Duration::from_secs(2)).resolve(interval), Some(Duration::from_secs(2)));
        assert_eq!(ItemDuration::Unbounded.resolve(interval), None);
    }
}
