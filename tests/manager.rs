use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::RgbColor;

use enviro_display::scheduler::SchedulerConfig;
use enviro_display::sink::{MemorySink, MemorySinkHandle};
use enviro_display::{DisplayConfig, DisplayItem, DisplayManager, Frame, Phase, Renderable, RotationMode, Severity};

struct Solid {
    name: &'static str,
    color: Rgb888,
}

impl Renderable for Solid {
    fn name(&self) -> &str {
        self.name
    }

    fn render(&self) -> anyhow::Result<Frame> {
        Ok(Frame::filled(160, 80, self.color))
    }
}

struct Broken;

impl Renderable for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn render(&self) -> anyhow::Result<Frame> {
        anyhow::bail!("sensor bus gone")
    }
}

/// Counts its renders and asks to be redrawn every 20 ms.
struct Ticker {
    renders: Arc<AtomicUsize>,
}

impl Renderable for Ticker {
    fn name(&self) -> &str {
        "ticker"
    }

    fn render(&self) -> anyhow::Result<Frame> {
        let n = self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(Frame::filled(160, 80, Rgb888::new(0, 0, (n % 200) as u8 + 1)))
    }

    fn refresh_interval(&self) -> Option<Duration> {
        Some(Duration::from_millis(20))
    }
}

fn solid(name: &'static str, color: Rgb888) -> Arc<dyn Renderable> {
    Arc::new(Solid { name, color })
}

fn fast_config() -> DisplayConfig {
    DisplayConfig {
        tick: Duration::from_millis(10),
        idle_wait: Duration::from_millis(20),
        refresh_interval: Duration::from_millis(50),
        probe_backoff_initial: Duration::from_millis(20),
        probe_backoff_max: Duration::from_millis(100),
        shutdown_timeout: Duration::from_secs(2),
        scheduler: SchedulerConfig {
            fade_duration: Duration::ZERO,
            warmup: Duration::ZERO,
            ..SchedulerConfig::default()
        },
        ..DisplayConfig::default()
    }
}

fn start() -> (DisplayManager, MemorySinkHandle) {
    let (sink, handle) = MemorySink::new();
    (DisplayManager::start(fast_config(), Box::new(sink)), handle)
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

fn shows(handle: &MemorySinkHandle, color: Rgb888) -> bool {
    handle.frames().iter().any(|f| f.pixel(0, 0) == Some(color))
}

#[test]
fn test_items_reach_the_sink() {
    let (manager, sink) = start();
    manager.enqueue(DisplayItem::new(solid("red", Rgb888::RED)));
    wait_until("red frame", || shows(&sink, Rgb888::RED));
    assert_eq!(manager.phase(), Phase::Rotating);
    assert!(manager.status().sink_available);
}

#[test]
fn test_show_splash_does_not_wait_for_the_sink() {
    let (manager, sink) = start();
    sink.set_write_delay(Duration::from_millis(200));
    manager.enqueue(DisplayItem::new(solid("red", Rgb888::RED)));
    wait_until("first slow write", || sink.frame_count() > 0);

    let started = Instant::now();
    assert!(manager.show_splash(solid("splash", Rgb888::BLUE), Duration::from_secs(1), Duration::ZERO));
    assert!(started.elapsed() < Duration::from_millis(50));
}

#[test]
fn test_concurrent_enqueue_keeps_every_item() {
    let (manager, _sink) = start();
    let manager = Arc::new(manager);
    let producers: Vec<_> = (0..4)
        .map(|_| {
            let manager = manager.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    manager.enqueue(DisplayItem::new(solid("p", Rgb888::GREEN)));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("producer panicked");
    }

    let handles = manager.handles();
    assert_eq!(handles.len(), 100);
    assert!(handles.windows(2).all(|w| w[0].id() < w[1].id()));
    assert_eq!(manager.status().queue_len, 100);
}

#[test]
fn test_sink_failure_is_absorbed_and_recovers() {
    let (manager, sink) = start();
    manager.enqueue(DisplayItem::new(solid("red", Rgb888::RED)));
    wait_until("first frame", || sink.frame_count() > 0);

    sink.set_fail_writes(true);
    sink.set_fail_probe(true);
    wait_until("write failure", || manager.status().write_failures > 0);
    assert!(!manager.status().sink_available);

    let before = sink.frame_count();
    for _ in 0..5 {
        manager.enqueue(DisplayItem::new(solid("green", Rgb888::GREEN)));
    }
    assert_eq!(manager.status().queue_len, 6);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(sink.frame_count(), before);

    sink.set_fail_writes(false);
    sink.set_fail_probe(false);
    wait_until("writes to resume", || sink.frame_count() > before);
    wait_until("sink to be marked available", || manager.status().sink_available);
}

#[test]
fn test_broken_panel_stays_queued_and_others_render() {
    let (manager, sink) = start();
    let short = Duration::from_millis(40);
    manager.enqueue(DisplayItem::new(Arc::new(Broken)).with_duration(short));
    manager.enqueue(DisplayItem::new(solid("red", Rgb888::RED)).with_duration(short));

    wait_until("render failure", || manager.status().render_failures > 0);
    wait_until("red frame", || shows(&sink, Rgb888::RED));
    assert_eq!(manager.status().queue_len, 2);
}

#[test]
fn test_critical_error_preempts_rotation() {
    let (manager, sink) = start();
    manager.enqueue(DisplayItem::new(solid("red", Rgb888::RED)));
    wait_until("red frame", || shows(&sink, Rgb888::RED));

    let handle = manager.report_error("MQTT broker unreachable", Severity::Critical);
    assert!(handle.is_some());
    let status = manager.status();
    assert_eq!(status.phase, Phase::ErrorOverlay);
    assert_eq!(status.error.as_deref(), Some("MQTT broker unreachable"));

    let before = sink.frame_count();
    wait_until("error frame", || {
        sink.frame_count() > before && sink.last_frame().is_some_and(|f| f.pixel(0, 0) != Some(Rgb888::RED))
    });

    assert!(manager.resolve_error());
    assert_eq!(manager.phase(), Phase::Rotating);
    wait_until("rotation to come back", || sink.last_frame().is_some_and(|f| f.pixel(0, 0) == Some(Rgb888::RED)));
}

#[test]
fn test_shutdown_is_bounded_and_blanks_the_display() {
    let (manager, sink) = start();
    manager.enqueue(DisplayItem::new(solid("red", Rgb888::RED)));
    wait_until("red frame", || shows(&sink, Rgb888::RED));

    let started = Instant::now();
    assert!(manager.shutdown());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(sink.last_frame().is_some_and(|f| f.is_black()));

    // A second call is a no-op.
    assert!(manager.shutdown());
}

#[test]
fn test_disabled_display_never_touches_the_sink() {
    let (sink, handle) = MemorySink::new();
    let config = DisplayConfig {
        enabled: false,
        ..fast_config()
    };
    let manager = DisplayManager::start(config, Box::new(sink));
    manager.enqueue(DisplayItem::new(solid("red", Rgb888::RED)));
    manager.trigger_tap();

    assert_eq!(manager.phase(), Phase::Disabled);
    assert_eq!(manager.status().queue_len, 1);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(handle.probe_count(), 0);
    assert_eq!(handle.frame_count(), 0);
}

#[test]
fn test_failed_probe_at_start_disables_display() {
    let (sink, handle) = MemorySink::new();
    handle.set_fail_probe(true);
    let manager = DisplayManager::start(fast_config(), Box::new(sink));
    wait_until("disabled phase", || manager.phase() == Phase::Disabled);

    manager.enqueue(DisplayItem::new(solid("red", Rgb888::RED)));
    assert_eq!(handle.probe_count(), 1);
    assert_eq!(handle.frame_count(), 0);
    assert!(manager.shutdown());
}

#[test]
fn test_stuck_write_times_out_and_shutdown_stays_bounded() {
    let (sink, handle) = MemorySink::new();
    let config = DisplayConfig {
        write_timeout: Duration::from_millis(100),
        ..fast_config()
    };
    let manager = DisplayManager::start(config, Box::new(sink));
    manager.enqueue(DisplayItem::new(solid("red", Rgb888::RED)));
    wait_until("red frame", || shows(&handle, Rgb888::RED));

    handle.set_write_delay(Duration::from_secs(3));
    manager.report_error("mqtt offline", Severity::Critical);
    wait_until("timed out write to count as a failure", || manager.status().write_failures > 0);
    let status = manager.status();
    assert_eq!(status.phase, Phase::ErrorOverlay);
    assert!(!status.sink_available);

    let started = Instant::now();
    assert!(manager.shutdown());
    assert!(started.elapsed() < Duration::from_secs(1), "shutdown took {:?}", started.elapsed());
}

#[test]
fn test_write_failure_mid_fade_lands_on_the_target_at_full_colour() {
    let (sink, handle) = MemorySink::new();
    let mut config = fast_config();
    config.scheduler.fade_duration = Duration::from_secs(2);
    let manager = DisplayManager::start(config, Box::new(sink));
    manager.set_mode(RotationMode::Manual);
    manager.enqueue(DisplayItem::new(solid("red", Rgb888::RED)));
    manager.enqueue(DisplayItem::new(solid("green", Rgb888::GREEN)));
    wait_until("red at full colour", || shows(&handle, Rgb888::RED));
    wait_until("fade-in to finish", || !manager.status().fading);

    handle.set_fail_writes(true);
    let advanced = Instant::now();
    manager.advance();
    wait_until("fade to be abandoned", || {
        let status = manager.status();
        status.write_failures > 0 && !status.fading
    });
    assert!(advanced.elapsed() < Duration::from_millis(1500), "fade ran its full course");

    let before = handle.frame_count();
    handle.set_fail_writes(false);
    wait_until("writes to resume", || handle.frame_count() > before);
    let after = handle.frames();
    assert!(after[before..].iter().all(|f| f.pixel(0, 0) == Some(Rgb888::GREEN)));
}

#[test]
fn test_animated_panel_is_redrawn_at_its_own_pace() {
    let (sink, _handle) = MemorySink::new();
    let config = DisplayConfig {
        idle_wait: Duration::from_secs(1),
        refresh_interval: Duration::from_secs(1),
        ..fast_config()
    };
    let manager = DisplayManager::start(config, Box::new(sink));
    let renders = Arc::new(AtomicUsize::new(0));
    manager.enqueue(DisplayItem::new(Arc::new(Ticker { renders: renders.clone() })));

    wait_until("first render", || renders.load(Ordering::SeqCst) > 0);
    let first = renders.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(500));
    assert!(renders.load(Ordering::SeqCst) >= first + 5);
}
