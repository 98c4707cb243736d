//! The display state machine. Pure logic: every operation takes `now` and
//! nothing here renders or touches the sink, so the worker can tick it under
//! the shared lock and do the slow work afterwards.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use embedded_graphics::prelude::Size;
use tracing::{debug, info, trace, warn};

use crate::constants::{
    DOUBLE_TAP_WINDOW, FADE_DURATION, PAUSE_GRACE, PROXIMITY_NEAR, PROXIMITY_RELEASE, ROTATION_INTERVAL,
    TAP_DEBOUNCE, WARMUP_DURATION,
};
use crate::input::{InputMonitor, ProximityDebouncer, TapAction};
use crate::overlay::{ErrorOverlay, SavedRotation, Severity, normalize_message};
use crate::panels::WarmupPanel;
use crate::queue::{DisplayItem, DisplayQueue, ItemHandle, RotationMode};
use crate::renderable::Renderable;
use crate::state::{Phase, StatusSnapshot};
use crate::transition::Transition;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    pub rotation_interval: Duration,
    /// Full fade; each half takes `fade_duration / 2`.
    pub fade_duration: Duration,
    pub warmup: Duration,
    pub pause_grace: Duration,
    pub double_tap_window: Duration,
    pub tap_debounce: Duration,
    pub proximity_near: u16,
    pub proximity_release: u16,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            rotation_interval: ROTATION_INTERVAL,
            fade_duration: FADE_DURATION,
            warmup: WARMUP_DURATION,
            pause_grace: PAUSE_GRACE,
            double_tap_window: DOUBLE_TAP_WINDOW,
            tap_debounce: TAP_DEBOUNCE,
            proximity_near: PROXIMITY_NEAR,
            proximity_release: PROXIMITY_RELEASE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKey {
    Splash(u64),
    Warmup,
    Item(ItemHandle),
    Diagnostics,
}

/// Something the scheduler wants on screen.
#[derive(Clone)]
pub struct Slot {
    pub key: SlotKey,
    pub renderable: Arc<dyn Renderable>,
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("key", &self.key)
            .field("renderable", &self.renderable.name())
            .finish()
    }
}

/// The worker's instructions for one tick.
#[derive(Debug, Clone)]
pub enum Plan {
    /// Nothing to draw; the display is not running.
    Idle,
    Blank,
    Show { slot: Slot, opacity: f32 },
}

impl Plan {
    pub fn key(&self) -> Option<SlotKey> {
        match self {
            Plan::Show { slot, .. } => Some(slot.key),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Active {
    handle: ItemHandle,
    since: Instant,
}

#[derive(Debug, Clone)]
struct Splash {
    slot: Slot,
    generation: u64,
    started: Instant,
    hold: Duration,
    fade: Duration,
}

impl Splash {
    fn hold_until(&self) -> Instant {
        self.started + self.hold
    }

    fn done_at(&self) -> Instant {
        self.started + self.hold + self.fade
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    size: Size,
    phase: Phase,
    mode: RotationMode,
    queue: DisplayQueue,
    active: Option<Active>,
    splash: Option<Splash>,
    splash_generation: u64,
    warmup_until: Instant,
    warmup_slot: Slot,
    pause_until: Option<Instant>,
    overlay: ErrorOverlay,
    input: InputMonitor,
    debouncer: ProximityDebouncer,
    diagnostics: Option<Arc<dyn Renderable>>,
    show_diagnostics: bool,
    shown: Option<Slot>,
    transition: Option<Transition<Slot>>,
}

impl Scheduler {
    /// The warm-up period is measured from `now`.
    pub fn new(config: SchedulerConfig, size: Size, now: Instant) -> Self {
        let warmup_until = now + config.warmup;
        Self {
            size,
            phase: Phase::Init,
            mode: RotationMode::Auto,
            queue: DisplayQueue::new(),
            active: None,
            splash: None,
            splash_generation: 0,
            warmup_until,
            warmup_slot: Slot {
                key: SlotKey::Warmup,
                renderable: Arc::new(WarmupPanel::new(now, warmup_until, size)),
            },
            pause_until: None,
            overlay: ErrorOverlay::new(),
            input: InputMonitor::new(config.double_tap_window, config.tap_debounce),
            debouncer: ProximityDebouncer::new(config.proximity_near, config.proximity_release),
            diagnostics: None,
            show_diagnostics: false,
            shown: None,
            transition: None,
            config,
        }
    }

    pub fn with_diagnostics(mut self, panel: Arc<dyn Renderable>) -> Self {
        self.diagnostics = Some(panel);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn mode(&self) -> RotationMode {
        self.mode
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn queue(&self) -> &DisplayQueue {
        &self.queue
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.overlay.message()
    }

    pub fn is_fading(&self) -> bool {
        self.transition.is_some()
    }

    pub fn diagnostics_visible(&self) -> bool {
        self.show_diagnostics
    }

    /// The item rotation currently points at, or the error item while one is
    /// shown.
    pub fn active_handle(&self) -> Option<ItemHandle> {
        if self.phase == Phase::ErrorOverlay {
            return self.overlay.handle();
        }
        self.active.map(|a| a.handle)
    }

    /// Slot fully on screen once any running transition has finished.
    pub fn shown_key(&self) -> Option<SlotKey> {
        self.shown.as_ref().map(|s| s.key)
    }

    /// Nothing can change on screen until a producer mutates something.
    pub fn is_settled(&self) -> bool {
        self.phase == Phase::Rotating && self.transition.is_none() && self.shown.is_none() && !self.input.is_pending()
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            phase: self.phase,
            mode: self.mode,
            queue_len: self.queue.len(),
            active: self.active_handle(),
            error: self.overlay.message().map(str::to_string),
            fading: self.transition.is_some(),
            ..StatusSnapshot::default()
        }
    }

    /// Leave `Init` once the sink has been probed.
    pub fn start(&mut self, now: Instant, hardware_ok: bool) {
        if self.phase != Phase::Init {
            return;
        }
        if !hardware_ok {
            self.disable();
            return;
        }
        self.phase = if self.overlay.is_active() {
            Phase::ErrorOverlay
        } else if self.splash.is_some() {
            Phase::Splash
        } else {
            self.entry_phase(now)
        };
        info!(phase = self.phase.as_str(), "display started");
    }

    pub fn disable(&mut self) {
        self.phase = Phase::Disabled;
        self.transition = None;
        self.shown = None;
    }

    pub fn begin_shutdown(&mut self) {
        self.phase = Phase::Shutdown;
        self.transition = None;
    }

    pub fn enqueue(&mut self, item: DisplayItem) -> ItemHandle {
        let name = item.name().to_string();
        let handle = self.queue.enqueue(item);
        debug!(%handle, panel = %name, queue_len = self.queue.len(), "enqueued");
        handle
    }

    /// The error item can only leave through [`Scheduler::resolve_error`].
    pub fn dequeue(&mut self, handle: ItemHandle) -> bool {
        if self.overlay.handle() == Some(handle) {
            return false;
        }
        let removed = self.queue.dequeue(handle).is_some();
        if removed && self.active.is_some_and(|a| a.handle == handle) {
            self.active = None;
        }
        removed
    }

    pub fn set_mode(&mut self, mode: RotationMode, now: Instant) {
        if self.overlay.set_saved_mode(mode) {
            debug!(mode = mode.as_str(), "mode stored until the error clears");
            return;
        }
        if self.mode == mode {
            return;
        }
        self.mode = mode;
        if self.phase == Phase::ManualPause && mode != RotationMode::Auto {
            self.phase = Phase::Rotating;
            self.pause_until = None;
        }
        if let Some(active) = self.active.as_mut() {
            active.since = now;
        }
        info!(mode = mode.as_str(), "rotation mode changed");
    }

    pub fn set_rotation_interval(&mut self, interval: Duration) {
        self.config.rotation_interval = interval;
        info!(secs = interval.as_secs_f64(), "rotation interval changed");
    }

    /// Show `renderable` for `hold`, then fade it out over `fade`. Returns
    /// `false` when the display cannot show a splash right now.
    pub fn show_splash(&mut self, renderable: Arc<dyn Renderable>, hold: Duration, fade: Duration, now: Instant) -> bool {
        match self.phase {
            Phase::Shutdown | Phase::Disabled => return false,
            Phase::ErrorOverlay => {
                debug!("splash ignored while an error is shown");
                return false;
            }
            _ => {}
        }
        self.splash_generation += 1;
        self.splash = Some(Splash {
            slot: Slot {
                key: SlotKey::Splash(self.splash_generation),
                renderable,
            },
            generation: self.splash_generation,
            started: now,
            hold,
            fade,
        });
        self.pause_until = None;
        self.show_diagnostics = false;
        if self.phase != Phase::Init {
            self.phase = Phase::Splash;
        }
        true
    }

    /// A warning becomes a one-shot notice in the rotation. A critical error
    /// takes over the display until resolved; a second one only replaces the
    /// message.
    pub fn report_error(&mut self, message: &str, severity: Severity, now: Instant) -> Option<ItemHandle> {
        if self.phase.is_terminal() {
            return None;
        }
        let message = normalize_message(message);
        if severity == Severity::Warning {
            let handle = self.queue.enqueue(ErrorOverlay::notice_item(&message, self.size));
            warn!(%handle, message = %message, "warning reported");
            return Some(handle);
        }

        let handle = self.queue.enqueue(ErrorOverlay::error_item(&message, self.size));
        if let Some(previous) = self.overlay.update(message.clone(), handle) {
            self.queue.dequeue(previous);
            self.queue.select(handle);
            warn!(%handle, message = %message, "error message replaced");
            return Some(handle);
        }
        self.queue.select(handle);

        let saved = SavedRotation {
            mode: self.mode,
            handle: self.active.map(|a| a.handle),
            elapsed: self.active.map(|a| now.saturating_duration_since(a.since)).unwrap_or_default(),
            resume: match self.phase {
                Phase::Rotating | Phase::ManualPause => Phase::Rotating,
                _ => Phase::Warmup,
            },
        };
        self.overlay.raise(message.clone(), handle, saved, now);
        self.splash = None;
        self.pause_until = None;
        self.show_diagnostics = false;
        if self.phase != Phase::Init {
            self.phase = Phase::ErrorOverlay;
        }
        warn!(%handle, message = %message, "error overlay raised");
        Some(handle)
    }

    /// Drop the error item and resume rotation where it stopped, with the
    /// interrupted item keeping its remaining time.
    pub fn resolve_error(&mut self, now: Instant) -> bool {
        let Some(state) = self.overlay.clear() else {
            return false;
        };
        self.queue.dequeue(state.handle);
        self.mode = state.saved.mode;
        self.active = None;
        if let Some(handle) = state.saved.handle {
            if self.queue.select(handle) {
                self.active = Some(Active {
                    handle,
                    since: now.checked_sub(state.saved.elapsed).unwrap_or(now),
                });
            }
        }
        if self.phase == Phase::ErrorOverlay {
            self.phase = state.saved.resume;
        }
        info!(
            message = %state.message,
            shown_for = ?now.saturating_duration_since(state.since),
            "error resolved"
        );
        true
    }

    pub fn trigger_tap(&mut self, now: Instant) {
        if let Some(action) = self.input.on_edge(now) {
            self.apply_tap(action, now);
        }
    }

    /// Returns `true` when the reading produced a tap edge.
    pub fn feed_proximity(&mut self, value: u16, now: Instant) -> bool {
        if self.debouncer.update(value) {
            self.trigger_tap(now);
            return true;
        }
        false
    }

    /// Move rotation on by one item, whatever the mode.
    pub fn advance(&mut self, now: Instant) -> Option<ItemHandle> {
        match self.phase {
            Phase::Rotating => self.step_queue(now),
            Phase::ManualPause => {
                self.step_queue(now);
                self.pause_until = Some(now + self.config.pause_grace);
            }
            _ => return None,
        }
        self.active.map(|a| a.handle)
    }

    /// Returns whether the diagnostics view is now visible.
    pub fn toggle_diagnostics(&mut self, now: Instant) -> bool {
        if self.diagnostics.is_none() {
            return false;
        }
        self.show_diagnostics = !self.show_diagnostics;
        if !self.show_diagnostics {
            if let Some(active) = self.active.as_mut() {
                active.since = now;
            }
        }
        debug!(visible = self.show_diagnostics, "diagnostics toggled");
        self.show_diagnostics
    }

    /// Jump straight to the slot the running fade was heading to.
    pub fn abort_transition(&mut self) {
        if let Some(transition) = self.transition.take() {
            self.shown = transition.abort();
        }
    }

    /// Advance every timer to `now` and decide what to put on screen.
    pub fn tick(&mut self, now: Instant) -> Plan {
        if self.phase == Phase::Init || self.phase.is_terminal() {
            return Plan::Idle;
        }
        if let Some(action) = self.input.poll(now) {
            self.apply_tap(action, now);
        }
        self.advance_timers(now);
        self.reconcile(now);
        self.plan(now)
    }

    fn entry_phase(&self, now: Instant) -> Phase {
        if now < self.warmup_until {
            Phase::Warmup
        } else {
            Phase::Rotating
        }
    }

    fn apply_tap(&mut self, action: TapAction, now: Instant) {
        match action {
            TapAction::Double => {
                if self.overlay.is_active() {
                    self.resolve_error(now);
                } else {
                    self.toggle_diagnostics(now);
                }
            }
            TapAction::Single => match self.phase {
                Phase::Rotating | Phase::ManualPause if self.show_diagnostics => {
                    self.toggle_diagnostics(now);
                }
                Phase::Rotating => match self.mode {
                    RotationMode::Manual => self.step_queue(now),
                    RotationMode::Auto => {
                        self.phase = Phase::ManualPause;
                        self.pause_until = Some(now + self.config.pause_grace);
                        debug!(grace = ?self.config.pause_grace, "rotation paused");
                    }
                    RotationMode::Off => {}
                },
                Phase::ManualPause => {
                    self.step_queue(now);
                    self.pause_until = Some(now + self.config.pause_grace);
                }
                phase => trace!(phase = phase.as_str(), "tap ignored"),
            },
        }
    }

    fn step_queue(&mut self, now: Instant) {
        let next = self.queue.advance();
        self.active = next.map(|handle| Active { handle, since: now });
    }

    fn advance_timers(&mut self, now: Instant) {
        match self.phase {
            Phase::Splash => {
                if self.splash.as_ref().is_none_or(|s| now >= s.done_at()) {
                    self.splash = None;
                    self.active = None;
                    self.phase = self.entry_phase(now);
                    debug!(next = self.phase.as_str(), "splash finished");
                }
            }
            Phase::Warmup if now >= self.warmup_until => {
                self.active = None;
                self.phase = Phase::Rotating;
                debug!("warm-up finished");
            }
            Phase::ManualPause if self.pause_until.is_some_and(|until| now >= until) => {
                self.pause_until = None;
                self.phase = Phase::Rotating;
                self.step_queue(now);
                debug!("rotation resumed");
            }
            _ => {}
        }

        if matches!(self.phase, Phase::Rotating | Phase::ManualPause) {
            self.sync_active(now);
            if self.phase == Phase::Rotating && self.mode == RotationMode::Auto && !self.show_diagnostics {
                self.rotate(now);
            }
        }
    }

    /// Keep `active` pointing at the queue's current entry.
    fn sync_active(&mut self, now: Instant) {
        match (self.active, self.queue.current().map(|(h, _)| h)) {
            (Some(active), Some(current)) if active.handle == current => {}
            (_, Some(current)) => {
                self.active = Some(Active {
                    handle: current,
                    since: now,
                })
            }
            (_, None) => self.active = None,
        }
    }

    fn rotate(&mut self, now: Instant) {
        let Some(active) = self.active else {
            return;
        };
        let Some(limit) = self
            .queue
            .get(active.handle)
            .and_then(|item| item.duration.resolve(self.config.rotation_interval))
        else {
            return;
        };
        if now.saturating_duration_since(active.since) < limit {
            return;
        }

        // Next item starts where this one ended, unless the worker stalled.
        let mut since = active.since + limit;
        if now.saturating_duration_since(since) >= limit {
            since = now;
        }
        let next = self.queue.advance();
        self.active = next.map(|handle| Active { handle, since });
        trace!(from = %active.handle, to = ?next, "rotated");
    }

    fn item_slot(&self, handle: ItemHandle) -> Option<Slot> {
        self.queue.get(handle).map(|item| Slot {
            key: SlotKey::Item(handle),
            renderable: item.renderable.clone(),
        })
    }

    fn desired(&self, now: Instant) -> Option<Slot> {
        match self.phase {
            Phase::Init | Phase::Shutdown | Phase::Disabled => None,
            Phase::Splash => self
                .splash
                .as_ref()
                .filter(|s| now < s.hold_until())
                .map(|s| s.slot.clone()),
            Phase::Warmup => Some(self.warmup_slot.clone()),
            Phase::ErrorOverlay => self.overlay.handle().and_then(|h| self.item_slot(h)),
            Phase::Rotating | Phase::ManualPause => {
                if self.show_diagnostics {
                    if let Some(panel) = &self.diagnostics {
                        return Some(Slot {
                            key: SlotKey::Diagnostics,
                            renderable: panel.clone(),
                        });
                    }
                }
                if self.mode == RotationMode::Off {
                    return None;
                }
                self.active.and_then(|a| self.item_slot(a.handle))
            }
        }
    }

    /// Start, retarget or skip a transition so the screen heads towards the
    /// desired slot. The error overlay swaps in without fading.
    fn reconcile(&mut self, now: Instant) {
        let desired = self.desired(now);
        let desired_key = desired.as_ref().map(|s| s.key);

        if let Some(transition) = &self.transition {
            if transition.target().map(|s| s.key) == desired_key {
                return;
            }
            if self.phase == Phase::ErrorOverlay {
                self.transition = None;
                self.shown = desired;
            } else if let Some(transition) = self.transition.as_mut() {
                transition.retarget(desired, now);
            }
            return;
        }

        if self.shown_key() == desired_key {
            return;
        }
        if self.phase == Phase::ErrorOverlay {
            self.shown = desired;
            return;
        }

        let half = self.config.fade_duration / 2;
        let fade_out = match (self.shown_key(), &self.splash) {
            (Some(SlotKey::Splash(generation)), Some(splash)) if splash.generation == generation => splash.fade,
            _ => half,
        };
        self.transition = Some(Transition::new(self.shown.take(), desired, fade_out, half, now));
    }

    fn plan(&mut self, now: Instant) -> Plan {
        let showing = match self.transition.as_mut() {
            Some(transition) => {
                let step = transition.step(now);
                if step.done {
                    self.shown = step.showing.clone();
                    self.transition = None;
                }
                step.showing.map(|slot| (slot, step.opacity))
            }
            None => self.shown.clone().map(|slot| (slot, 1.0)),
        };
        match showing {
            Some((slot, opacity)) => Plan::Show { slot, opacity },
            None => Plan::Blank,
        }
    }
}
