//! Where frames go: the hardware boundary and its health tracking.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info, warn};

use crate::constants::{DISPLAY_HEIGHT, DISPLAY_WIDTH, PROBE_BACKOFF_INITIAL, PROBE_BACKOFF_MAX};
use crate::error::SinkError;
use crate::frame::Frame;

/// A device that accepts whole frames. Owned and driven by the display worker
/// only.
pub trait FrameSink: Send {
    fn name(&self) -> &str;

    /// Check that the device is present and writable.
    fn probe(&mut self) -> Result<(), SinkError>;

    fn write_frame(&mut self, frame: &Frame) -> Result<(), SinkError>;
}

fn check_size(frame: &Frame, width: u32, height: u32) -> Result<(), SinkError> {
    if frame.width() != width || frame.height() != height {
        return Err(SinkError::SizeMismatch {
            got_w: frame.width(),
            got_h: frame.height(),
            want_w: width,
            want_h: height,
        });
    }
    Ok(())
}

enum SinkRequest {
    Probe,
    Write(Frame),
}

/// Runs a [`FrameSink`] on its own `display-sink` thread so that every probe
/// and write can be abandoned after a timeout. A call that timed out leaves
/// the thread busy; further calls fail fast with [`SinkError::Busy`] until
/// its late reply has been collected.
pub struct SinkWriter {
    name: String,
    timeout: Duration,
    requests: Option<Sender<SinkRequest>>,
    replies: Receiver<Result<(), SinkError>>,
    pending: bool,
    handle: Option<JoinHandle<()>>,
}

impl SinkWriter {
    pub fn spawn(mut sink: Box<dyn FrameSink>, timeout: Duration) -> io::Result<Self> {
        let name = sink.name().to_string();
        let (request_tx, request_rx) = mpsc::channel::<SinkRequest>();
        let (reply_tx, reply_rx) = mpsc::channel();
        let handle = thread::Builder::new().name("display-sink".into()).spawn(move || {
            for request in request_rx {
                let result = match request {
                    SinkRequest::Probe => sink.probe(),
                    SinkRequest::Write(frame) => sink.write_frame(&frame),
                };
                if reply_tx.send(result).is_err() {
                    break;
                }
            }
            debug!(sink = sink.name(), "closing display sink");
            // The sink is gone by the time `close` sees the channel disconnect.
            drop(sink);
            drop(reply_tx);
        })?;
        Ok(Self {
            name,
            timeout,
            requests: Some(request_tx),
            replies: reply_rx,
            pending: false,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `true` while a timed-out call is still running on the sink thread.
    pub fn is_busy(&mut self) -> bool {
        if self.pending {
            match self.replies.try_recv() {
                Ok(result) => {
                    self.pending = false;
                    debug!(sink = %self.name, ok = result.is_ok(), "late sink reply collected");
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => self.pending = false,
            }
        }
        self.pending
    }

    pub fn probe(&mut self) -> Result<(), SinkError> {
        self.call(SinkRequest::Probe).map(|_| ())
    }

    /// Write one frame, failing with [`SinkError::Timeout`] if the sink has
    /// not finished within the timeout.
    pub fn write(&mut self, frame: Frame) -> Result<Duration, SinkError> {
        self.call(SinkRequest::Write(frame))
    }

    fn call(&mut self, request: SinkRequest) -> Result<Duration, SinkError> {
        if self.is_busy() {
            return Err(SinkError::Busy);
        }
        let requests = self.requests.as_ref().ok_or(SinkError::Closed)?;
        let start = Instant::now();
        requests.send(request).map_err(|_| SinkError::Closed)?;
        match self.replies.recv_timeout(self.timeout) {
            Ok(result) => result.map(|()| start.elapsed()),
            Err(RecvTimeoutError::Timeout) => {
                self.pending = true;
                Err(SinkError::Timeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(SinkError::Closed),
        }
    }

    /// Stop the sink thread, waiting at most `timeout` for it to finish its
    /// current call and drop the sink. Returns `false` if it was left running.
    pub fn close(&mut self, timeout: Duration) -> bool {
        self.requests = None;
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.replies.recv_timeout(remaining) {
                Ok(_) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    if handle.join().is_err() {
                        warn!(sink = %self.name, "display sink thread panicked");
                    }
                    return true;
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(sink = %self.name, ?timeout, "display sink still busy, leaving it behind");
                    return false;
                }
            }
        }
    }
}

impl Drop for SinkWriter {
    fn drop(&mut self) {
        self.close(self.timeout);
    }
}

/// Linux framebuffer device, e.g. `/dev/fb1` exposed by the fbtft ST7735
/// driver. Frames are written as little-endian RGB565.
pub struct FramebufferSink {
    name: String,
    path: PathBuf,
    width: u32,
    height: u32,
    file: Option<File>,
}

impl FramebufferSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: format!("framebuffer {}", path.display()),
            path,
            width: DISPLAY_WIDTH,
            height: DISPLAY_HEIGHT,
            file: None,
        }
    }

    fn open(&mut self) -> Result<&mut File, SinkError> {
        if self.file.is_none() {
            let file = OpenOptions::new().write(true).open(&self.path)?;
            debug!(path = %self.path.display(), "opened framebuffer");
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| SinkError::Unavailable(format!("{} is not open", self.path.display())))
    }
}

impl FrameSink for FramebufferSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn probe(&mut self) -> Result<(), SinkError> {
        self.file = None;
        self.open().map(|_| ())
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<(), SinkError> {
        check_size(frame, self.width, self.height)?;
        let bytes = frame.to_rgb565_le();
        let result = self.open().and_then(|file| {
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&bytes)?;
            file.flush()?;
            Ok(())
        });
        if result.is_err() {
            // Reopen on the next attempt.
            self.file = None;
        }
        result
    }
}

/// Discards frames. Used when no display is attached.
#[derive(Debug, Default)]
pub struct NullSink {
    frames: u64,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl FrameSink for NullSink {
    fn name(&self) -> &str {
        "null"
    }

    fn probe(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn write_frame(&mut self, _frame: &Frame) -> Result<(), SinkError> {
        self.frames += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    frames: Vec<Frame>,
    fail_writes: bool,
    fail_probe: bool,
    write_delay: Duration,
    probes: usize,
}

/// Keeps every frame in memory. The paired [`MemorySinkHandle`] inspects
/// what was written and injects failures from another thread.
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Clone)]
pub struct MemorySinkHandle {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    pub fn new() -> (Self, MemorySinkHandle) {
        let sink = Self::default();
        let handle = MemorySinkHandle {
            state: sink.state.clone(),
        };
        (sink, handle)
    }
}

impl FrameSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn probe(&mut self) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.probes += 1;
        if state.fail_probe {
            return Err(SinkError::Unavailable("memory sink probe disabled".into()));
        }
        Ok(())
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<(), SinkError> {
        let delay = self.state.lock().unwrap_or_else(PoisonError::into_inner).write_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.fail_writes {
            return Err(SinkError::Unavailable("memory sink writes disabled".into()));
        }
        state.frames.push(frame.clone());
        Ok(())
    }
}

impl MemorySinkHandle {
    fn with<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> R {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn frame_count(&self) -> usize {
        self.with(|s| s.frames.len())
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.with(|s| s.frames.clone())
    }

    pub fn last_frame(&self) -> Option<Frame> {
        self.with(|s| s.frames.last().cloned())
    }

    pub fn probe_count(&self) -> usize {
        self.with(|s| s.probes)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.with(|s| s.fail_writes = fail);
    }

    pub fn set_fail_probe(&self, fail: bool) {
        self.with(|s| s.fail_probe = fail);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.with(|s| s.write_delay = delay);
    }
}

/// Availability of the sink after start-up. A failure suspends writes and
/// schedules probes with jittered exponential backoff.
#[derive(Debug, Clone)]
pub struct SinkHealth {
    available: bool,
    initial: Duration,
    max: Duration,
    backoff: Duration,
    next_probe: Option<Instant>,
    failures: u64,
}

impl Default for SinkHealth {
    fn default() -> Self {
        Self::new(PROBE_BACKOFF_INITIAL, PROBE_BACKOFF_MAX)
    }
}

impl SinkHealth {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            available: true,
            initial,
            max: max.max(initial),
            backoff: initial,
            next_probe: None,
            failures: 0,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn next_probe(&self) -> Option<Instant> {
        self.next_probe
    }

    /// Record a failed write or probe and schedule the next probe.
    pub fn mark_failed(&mut self, now: Instant, error: &SinkError) {
        self.failures += 1;
        if self.available {
            self.available = false;
            self.backoff = self.initial;
            warn!(error = %error, retry_in = ?self.backoff, "display sink unavailable");
        } else {
            self.backoff = (self.backoff * 2).min(self.max);
            debug!(error = %error, retry_in = ?self.backoff, "display sink probe failed");
        }
        let jitter = rand::rng().random_range(0.0..0.1);
        self.next_probe = Some(now + self.backoff.mul_f64(1.0 + jitter));
    }

    pub fn probe_due(&self, now: Instant) -> bool {
        !self.available && self.next_probe.is_some_and(|at| now >= at)
    }

    pub fn mark_recovered(&mut self) {
        if !self.available {
            info!(failures = self.failures, "display sink recovered");
        }
        self.available = true;
        self.backoff = self.initial;
        self.next_probe = None;
    }
}
