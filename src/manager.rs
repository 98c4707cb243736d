//! The display manager: a cheap, non-blocking handle for producers and the
//! single worker thread that renders and writes frames.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use embedded_graphics::prelude::Size;
use tracing::{debug, error, info, warn};

use crate::config::DisplayConfig;
use crate::error::DisplayError;
use crate::frame::Frame;
use crate::overlay::Severity;
use crate::panels::DiagnosticsPanel;
use crate::queue::{DisplayItem, ItemHandle, RotationMode};
use crate::renderable::{Renderable, render_checked};
use crate::scheduler::{Plan, Scheduler, Slot, SlotKey};
use crate::sink::{FrameSink, SinkHealth, SinkWriter};
use crate::state::{Phase, StatusSnapshot};

struct SharedState {
    scheduler: Scheduler,
    shutdown: bool,
    dirty: bool,
}

struct Shared {
    state: Mutex<SharedState>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Worker {
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

/// Owns the display subsystem for the life of the process. Every operation
/// returns as soon as the shared state is updated; the worker picks the
/// change up on its next tick.
pub struct DisplayManager {
    shared: Arc<Shared>,
    status: Arc<RwLock<StatusSnapshot>>,
    config: DisplayConfig,
    worker: Mutex<Option<Worker>>,
}

impl DisplayManager {
    /// Start the worker on `sink`. With `config.enabled == false`, or if the
    /// worker cannot be spawned, the manager stays disabled: operations
    /// still succeed but nothing is drawn.
    pub fn start(config: DisplayConfig, sink: Box<dyn FrameSink>) -> Self {
        let now = Instant::now();
        let status = Arc::new(RwLock::new(StatusSnapshot::default()));
        let diagnostics = Arc::new(DiagnosticsPanel::new(status.clone(), config.size()));
        let mut scheduler = Scheduler::new(config.scheduler, config.size(), now).with_diagnostics(diagnostics);
        if !config.enabled {
            info!("display disabled by configuration");
            scheduler.disable();
        }
        publish(&status, scheduler.status(), None);

        let shared = Arc::new(Shared {
            state: Mutex::new(SharedState {
                scheduler,
                shutdown: false,
                dirty: false,
            }),
            wake: Condvar::new(),
        });
        let manager = Self {
            shared,
            status,
            config,
            worker: Mutex::new(None),
        };
        if manager.config.enabled {
            manager.spawn_worker(sink);
        }
        manager
    }

    fn spawn_worker(&self, sink: Box<dyn FrameSink>) {
        let (done_tx, done_rx) = mpsc::channel();
        let shared = self.shared.clone();
        let status = self.status.clone();
        let config = self.config.clone();
        let spawned = thread::Builder::new()
            .name("display-worker".into())
            .spawn(move || run_worker(shared, status, sink, config, done_tx));
        match spawned {
            Ok(handle) => {
                *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(Worker { handle, done: done_rx });
            }
            Err(e) => {
                error!(error = %e, "failed to start display worker, display disabled");
                let mut state = self.shared.lock();
                state.scheduler.disable();
                publish(&self.status, state.scheduler.status(), None);
            }
        }
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut Scheduler, Instant) -> R) -> R {
        let mut state = self.shared.lock();
        let result = f(&mut state.scheduler, Instant::now());
        state.dirty = true;
        drop(state);
        self.shared.wake.notify_one();
        result
    }

    pub fn config(&self) -> &DisplayConfig {
        &self.config
    }

    pub fn size(&self) -> Size {
        self.config.size()
    }

    pub fn enqueue(&self, item: DisplayItem) -> ItemHandle {
        self.mutate(|s, _| s.enqueue(item))
    }

    pub fn dequeue(&self, handle: ItemHandle) -> bool {
        self.mutate(|s, _| s.dequeue(handle))
    }

    pub fn set_mode(&self, mode: RotationMode) {
        self.mutate(|s, now| s.set_mode(mode, now));
    }

    pub fn phase(&self) -> Phase {
        self.shared.lock().scheduler.phase()
    }

    pub fn mode(&self) -> RotationMode {
        self.shared.lock().scheduler.mode()
    }

    pub fn set_rotation_interval(&self, interval: Duration) {
        self.mutate(|s, _| s.set_rotation_interval(interval));
    }

    /// Returns immediately; the splash is shown and faded by the worker.
    pub fn show_splash(&self, renderable: Arc<dyn Renderable>, duration: Duration, fade: Duration) -> bool {
        self.mutate(|s, now| s.show_splash(renderable, duration, fade, now))
    }

    pub fn report_error(&self, message: &str, severity: Severity) -> Option<ItemHandle> {
        self.mutate(|s, now| s.report_error(message, severity, now))
    }

    pub fn resolve_error(&self) -> bool {
        self.mutate(|s, now| s.resolve_error(now))
    }

    pub fn trigger_tap(&self) {
        self.mutate(|s, now| s.trigger_tap(now));
    }

    pub fn feed_proximity(&self, value: u16) -> bool {
        self.mutate(|s, now| s.feed_proximity(value, now))
    }

    pub fn advance(&self) -> Option<ItemHandle> {
        self.mutate(|s, now| s.advance(now))
    }

    pub fn toggle_diagnostics(&self) -> bool {
        self.mutate(|s, now| s.toggle_diagnostics(now))
    }

    /// Scheduler state as of now, sink counters as of the worker's last tick.
    pub fn status(&self) -> StatusSnapshot {
        let mut snapshot = self.shared.lock().scheduler.status();
        let published = self.status.read().unwrap_or_else(PoisonError::into_inner);
        snapshot.sink_available = published.sink_available;
        snapshot.frames_written = published.frames_written;
        snapshot.render_failures = published.render_failures;
        snapshot.write_failures = published.write_failures;
        snapshot
    }

    /// Handles of the rotation in order.
    pub fn handles(&self) -> Vec<ItemHandle> {
        self.shared.lock().scheduler.queue().handles()
    }

    /// Stop the worker and wait for it, at most `shutdown_timeout`. Returns
    /// `false` if the worker did not finish in time.
    pub fn shutdown(&self) -> bool {
        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(worker) = worker else {
            return true;
        };
        self.shared.lock().shutdown = true;
        self.shared.wake.notify_all();

        match worker.done.recv_timeout(self.config.shutdown_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    error!("display worker panicked");
                }
                info!("display stopped");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout = ?self.config.shutdown_timeout, "display worker did not stop in time");
                false
            }
        }
    }
}

impl Drop for DisplayManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct WriterStats {
    sink_available: bool,
    frames_written: u64,
    render_failures: u64,
    write_failures: u64,
}

fn publish(status: &RwLock<StatusSnapshot>, mut snapshot: StatusSnapshot, stats: Option<WriterStats>) {
    if let Some(stats) = stats {
        snapshot.sink_available = stats.sink_available;
        snapshot.frames_written = stats.frames_written;
        snapshot.render_failures = stats.render_failures;
        snapshot.write_failures = stats.write_failures;
    }
    *status.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
}

fn run_worker(
    shared: Arc<Shared>,
    status: Arc<RwLock<StatusSnapshot>>,
    sink: Box<dyn FrameSink>,
    config: DisplayConfig,
    done: Sender<()>,
) {
    let mut writer = FrameWriter::new(&config);
    let mut sink = match SinkWriter::spawn(sink, config.write_timeout) {
        Ok(sink) => Some(sink),
        Err(e) => {
            error!(error = %e, "failed to start display sink thread");
            None
        }
    };
    let hardware_ok = match sink.as_mut().map(|s| (s.probe(), s.name().to_string())) {
        Some((Ok(()), name)) => {
            info!(sink = %name, "display sink ready");
            true
        }
        Some((Err(e), name)) => {
            error!(
                sink = %name,
                error = %DisplayError::HardwareUnavailable(e),
                "display disabled for this run"
            );
            false
        }
        None => false,
    };
    {
        let mut state = shared.lock();
        state.scheduler.start(Instant::now(), hardware_ok);
        writer.stats.sink_available = hardware_ok;
        publish(&status, state.scheduler.status(), Some(writer.stats));
    }
    let Some(mut sink) = sink.filter(|_| hardware_ok) else {
        done.send(()).ok();
        return;
    };

    loop {
        let (plan, fading, wait) = {
            let mut state = shared.lock();
            if state.shutdown {
                state.scheduler.begin_shutdown();
                publish(&status, state.scheduler.status(), Some(writer.stats));
                break;
            }
            let plan = state.scheduler.tick(Instant::now());
            state.dirty = false;
            publish(&status, state.scheduler.status(), Some(writer.stats));
            let wait = if state.scheduler.is_settled() { config.idle_wait } else { config.tick };
            (plan, state.scheduler.is_fading(), wait)
        };

        if let Err(e) = writer.apply(&mut sink, &plan, Instant::now()) {
            if fading && matches!(e, DisplayError::HardwareUnavailable(_)) {
                let failure = DisplayError::TransitionFailure(e.to_string());
                warn!(error = %failure, "jumping to the end of the fade");
                shared.lock().scheduler.abort_transition();
            }
        }

        // Panels that animate ask to be drawn more often than the idle wait.
        let wait = match &plan {
            Plan::Show { slot, .. } => slot.renderable.refresh_interval().map_or(wait, |r| wait.min(r)),
            _ => wait,
        };
        let state = shared.lock();
        if !state.dirty && !state.shutdown {
            let _ = shared
                .wake
                .wait_timeout_while(state, wait, |s| !s.dirty && !s.shutdown)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    writer.write_blank(&mut sink);
    if !sink.close(config.write_timeout) {
        warn!(sink = sink.name(), "display sink did not close in time");
    }
    debug!(frames = writer.stats.frames_written, "display worker exiting");
    done.send(()).ok();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Signature {
    key: Option<SlotKey>,
    generation: u64,
    level: u8,
}

struct Cached {
    key: SlotKey,
    frame: Frame,
    rendered_at: Instant,
    generation: u64,
}

/// Worker-side rendering and writing: caches the current panel's frame,
/// dims it for fades, skips identical writes and tracks sink health.
struct FrameWriter {
    size: Size,
    refresh: Duration,
    blank: Frame,
    health: SinkHealth,
    cache: Option<Cached>,
    generation: u64,
    failed: Option<(SlotKey, Instant)>,
    last_written: Option<Signature>,
    stats: WriterStats,
}

impl FrameWriter {
    fn new(config: &DisplayConfig) -> Self {
        Self {
            size: config.size(),
            refresh: config.refresh_interval,
            blank: Frame::new(config.width, config.height),
            health: SinkHealth::new(config.probe_backoff_initial, config.probe_backoff_max),
            cache: None,
            generation: 0,
            failed: None,
            last_written: None,
            stats: WriterStats::default(),
        }
    }

    /// Current frame for `slot`, rendering again when the slot changed or the
    /// cached frame is older than the refresh interval. `Ok(None)` while a
    /// recently failed slot waits to be retried.
    fn frame_for(&mut self, slot: &Slot, now: Instant) -> Result<Option<u64>, DisplayError> {
        let refresh = slot.renderable.refresh_interval().map_or(self.refresh, |r| r.min(self.refresh));
        let fresh = self
            .cache
            .as_ref()
            .is_some_and(|c| c.key == slot.key && now.saturating_duration_since(c.rendered_at) < refresh);
        if !fresh {
            if let Some((key, at)) = self.failed {
                if key == slot.key && now.saturating_duration_since(at) < refresh {
                    return Ok(None);
                }
            }
            match render_checked(slot.renderable.as_ref(), self.size) {
                Ok(frame) => {
                    self.generation += 1;
                    self.failed = None;
                    self.cache = Some(Cached {
                        key: slot.key,
                        frame,
                        rendered_at: now,
                        generation: self.generation,
                    });
                }
                Err(e) => {
                    self.stats.render_failures += 1;
                    self.failed = Some((slot.key, now));
                    warn!(error = %e, "skipping frame");
                    return Err(e);
                }
            }
        }
        Ok(self.cache.as_ref().map(|c| c.generation))
    }

    fn apply(&mut self, sink: &mut SinkWriter, plan: &Plan, now: Instant) -> Result<(), DisplayError> {
        if matches!(plan, Plan::Idle) {
            return Ok(());
        }
        if !self.health.is_available() {
            if !self.health.probe_due(now) {
                return Ok(());
            }
            if let Err(e) = sink.probe() {
                self.health.mark_failed(now, &e);
                return Err(e.into());
            }
            self.health.mark_recovered();
            self.stats.sink_available = true;
            self.last_written = None;
        }

        let (signature, frame) = match plan {
            Plan::Show { slot, opacity } => {
                let level = (opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
                let Some(generation) = self.frame_for(slot, now)? else {
                    return Ok(());
                };
                let signature = Signature {
                    key: Some(slot.key),
                    generation,
                    level,
                };
                if self.last_written == Some(signature) {
                    return Ok(());
                }
                let Some(cached) = self.cache.as_ref() else {
                    return Ok(());
                };
                let frame = if level == 255 { cached.frame.clone() } else { cached.frame.dimmed(*opacity) };
                (signature, frame)
            }
            _ => {
                let signature = Signature {
                    key: None,
                    generation: 0,
                    level: 0,
                };
                if self.last_written == Some(signature) {
                    return Ok(());
                }
                (signature, self.blank.clone())
            }
        };

        match sink.write(frame) {
            Ok(_) => {
                self.stats.frames_written += 1;
                self.last_written = Some(signature);
                Ok(())
            }
            Err(e) => {
                self.stats.write_failures += 1;
                self.stats.sink_available = false;
                self.last_written = None;
                self.health.mark_failed(now, &e);
                Err(e.into())
            }
        }
    }

    /// Best-effort blank frame on the way out.
    fn write_blank(&mut self, sink: &mut SinkWriter) {
        match sink.write(self.blank.clone()) {
            Ok(_) => self.stats.frames_written += 1,
            Err(e) => debug!(error = %e, "could not blank the display"),
        }
    }
}
