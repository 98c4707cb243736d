use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, ValueEnum};
use embedded_graphics::prelude::Size;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use enviro_display::config::rotation_interval;
use enviro_display::constants::*;
use enviro_display::ffmpeg::{FfmpegOutput, FfmpegSink};
use enviro_display::image_loader::load_frame_with_exif_rotation;
use enviro_display::panels::{DashboardPanel, ImagePanel, MessageBoard, MetricGraphPanel, TextPanel};
use enviro_display::scheduler::SchedulerConfig;
use enviro_display::sensors::{Metric, RandomWalkSource, Readings, SensorSource, SharedReadings};
use enviro_display::sink::{FrameSink, FramebufferSink, NullSink};
use enviro_display::{
    CommandHandler, DisplayConfig, DisplayItem, DisplayManager, Renderable, RenderableRegistry, Severity,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SinkKind {
    /// Linux framebuffer (ST7735 via fbtft)
    Framebuffer,
    /// Live ffplay window
    Preview,
    /// Encode to a video file with ffmpeg
    Record,
    /// Discard frames
    Null,
}

#[derive(Parser, Debug)]
#[command(name = "enviro-display")]
#[command(about = "Rotating status panels on the Enviro+ LCD", long_about = None)]
#[command(version)]
struct Args {
    /// Turn the display subsystem on or off
    #[arg(long, env = "DISPLAY_ENABLED", default_value_t = true, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    enabled: bool,

    /// Seconds each panel stays on screen
    #[arg(long, env = "DISPLAY_ROTATION_INTERVAL", default_value_t = ROTATION_INTERVAL.as_secs_f64())]
    rotation_interval: f64,

    /// Seconds for a full fade between panels
    #[arg(long, env = "DISPLAY_FADE_DURATION", default_value_t = FADE_DURATION.as_secs_f64())]
    fade_duration: f64,

    /// Seconds of sensor warm-up before panels rotate
    #[arg(long, env = "DISPLAY_WARMUP_SECONDS", default_value_t = WARMUP_DURATION.as_secs_f64())]
    warmup_seconds: f64,

    /// Splash image; a text banner is used when absent or unreadable
    #[arg(long)]
    splash: Option<PathBuf>,

    #[arg(long, default_value_t = SPLASH_DURATION.as_secs_f64())]
    splash_duration: f64,

    #[arg(long, default_value_t = SPLASH_FADE.as_secs_f64())]
    splash_fade: f64,

    #[arg(long)]
    no_splash: bool,

    /// Directory of images to add as panels
    #[arg(long, env = "DISPLAY_PLUGINS_DIR")]
    plugins: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = SinkKind::Framebuffer)]
    sink: SinkKind,

    /// Framebuffer device for `--sink framebuffer`
    #[arg(long, default_value = "/dev/fb1")]
    device: PathBuf,

    /// Output file for `--sink record`
    #[arg(long, default_value = "enviro-display.mp4")]
    record_to: String,

    /// Generate drifting readings instead of reading them from stdin
    #[arg(long)]
    demo_sensors: bool,

    /// Worker tick in milliseconds
    #[arg(long, default_value_t = TICK.as_millis() as u64)]
    tick_ms: u64,

    /// Longest acceptable frame write in milliseconds
    #[arg(long, default_value_t = WRITE_TIMEOUT.as_millis() as u64)]
    write_timeout_ms: u64,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn seconds(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("--{name} must be a non-negative number of seconds"))
}

impl Args {
    fn display_config(&self) -> Result<DisplayConfig> {
        let interval = rotation_interval(self.rotation_interval)
            .map_err(anyhow::Error::msg)
            .context("invalid --rotation-interval")?;
        let config = DisplayConfig {
            enabled: self.enabled,
            tick: Duration::from_millis(self.tick_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            scheduler: SchedulerConfig {
                rotation_interval: interval,
                fade_duration: seconds("fade-duration", self.fade_duration)?,
                warmup: seconds("warmup-seconds", self.warmup_seconds)?,
                ..SchedulerConfig::default()
            },
            ..DisplayConfig::default()
        };
        config.validate()?;
        Ok(config)
    }

    fn frame_sink(&self) -> Box<dyn FrameSink> {
        match self.sink {
            SinkKind::Framebuffer => Box::new(FramebufferSink::new(&self.device)),
            SinkKind::Preview => Box::new(FfmpegSink::new(FfmpegOutput::Preview, DISPLAY_WIDTH, DISPLAY_HEIGHT, FPS)),
            SinkKind::Record => Box::new(FfmpegSink::new(
                FfmpegOutput::Record(self.record_to.clone()),
                DISPLAY_WIDTH,
                DISPLAY_HEIGHT,
                FPS,
            )),
            SinkKind::Null => Box::new(NullSink::new()),
        }
    }
}

fn splash_panel(path: Option<&Path>, size: Size) -> Arc<dyn Renderable> {
    if let Some(path) = path {
        match load_frame_with_exif_rotation(path, size) {
            Ok(frame) => return Arc::new(ImagePanel::new("splash", frame)),
            Err(e) => warn!(path = %path.display(), error = %format!("{e:#}"), "splash image unusable, using text"),
        }
    }
    Arc::new(
        TextPanel::new("splash", "Enviro+", size)
            .with_line(format!("display v{}", env!("CARGO_PKG_VERSION")))
            .with_line("starting up"),
    )
}

fn builtin_panels(registry: &mut RenderableRegistry, source: Arc<dyn SensorSource>) {
    let size = registry.size();
    let mut panels: Vec<Arc<dyn Renderable>> = vec![Arc::new(DashboardPanel::new(source.clone(), size))];
    for metric in [Metric::Temperature, Metric::Humidity, Metric::Pressure, Metric::Lux] {
        panels.push(Arc::new(MetricGraphPanel::new(metric, source.clone(), size)));
    }
    for panel in panels {
        if let Err(e) = registry.register(panel) {
            warn!(error = %e, "built-in panel skipped");
        }
    }
}

/// One line of the stdin control channel.
#[derive(Debug, Clone, PartialEq)]
enum Control {
    Tap,
    Next,
    Proximity(u16),
    Error(Severity, String),
    Resolve,
    Readings(String),
    Status,
    Quit,
    Command { topic: String, payload: String },
}

fn parse_control(line: &str) -> Option<Control> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    match word {
        "tap" => Some(Control::Tap),
        "next" => Some(Control::Next),
        "resolve" => Some(Control::Resolve),
        "status" => Some(Control::Status),
        "quit" | "exit" => Some(Control::Quit),
        "proximity" => rest.parse().ok().map(Control::Proximity),
        "readings" => Some(Control::Readings(rest.to_string())),
        "error" => {
            let (severity, message) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            let severity = severity.parse().ok()?;
            Some(Control::Error(severity, message.trim().to_string()))
        }
        topic => Some(Control::Command {
            topic: topic.to_string(),
            payload: rest.to_string(),
        }),
    }
}

/// Why the control loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlExit {
    Quit,
    /// End of input, e.g. stdin is `/dev/null` under a service manager.
    Closed,
}

fn run_control(
    input: impl BufRead,
    manager: &DisplayManager,
    commands: &mut CommandHandler,
    readings: &SharedReadings,
) -> Result<ControlExit> {
    for line in input.lines() {
        let line = line.context("failed to read stdin")?;
        let Some(control) = parse_control(&line) else {
            continue;
        };
        match control {
            Control::Tap => manager.trigger_tap(),
            Control::Next => {
                manager.advance();
            }
            Control::Proximity(value) => {
                manager.feed_proximity(value);
            }
            Control::Error(severity, message) => {
                manager.report_error(&message, severity);
            }
            Control::Resolve => {
                manager.resolve_error();
            }
            Control::Readings(json) => match serde_json::from_str::<Readings>(&json) {
                Ok(r) => readings.update(r),
                Err(e) => warn!(error = %e, "ignoring malformed readings"),
            },
            Control::Status => info!(status = ?manager.status(), "display status"),
            Control::Quit => return Ok(ControlExit::Quit),
            Control::Command { topic, payload } => {
                // Rejected payloads are logged by the handler.
                let _ = commands.handle(manager, &topic, &payload);
            }
        }
    }
    Ok(ControlExit::Closed)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    info!("Starting enviro-display v{}", env!("CARGO_PKG_VERSION"));

    let config = args.display_config()?;
    let size = config.size();

    // --- Panels ---
    let readings = Arc::new(SharedReadings::new());
    let source: Arc<dyn SensorSource> = if args.demo_sensors {
        Arc::new(RandomWalkSource::new())
    } else {
        readings.clone()
    };
    let mut registry = RenderableRegistry::new(size);
    builtin_panels(&mut registry, source);
    if let Some(dir) = &args.plugins {
        registry.discover_plugins(dir);
    }
    info!(panels = ?registry.names().collect::<Vec<_>>(), "panels registered");

    // --- Display ---
    let manager = DisplayManager::start(config, args.frame_sink());
    if !args.no_splash {
        let splash = splash_panel(args.splash.as_deref(), size);
        manager.show_splash(
            splash,
            seconds("splash-duration", args.splash_duration)?,
            seconds("splash-fade", args.splash_fade)?,
        );
    }
    for panel in registry.iter() {
        manager.enqueue(DisplayItem::new(panel.clone()));
    }

    // --- Control loop ---
    let mut commands = CommandHandler::new(Arc::new(MessageBoard::new()), size);
    match run_control(io::stdin().lock(), &manager, &mut commands, &readings)? {
        ControlExit::Quit => {}
        ControlExit::Closed => {
            info!("stdin closed, display keeps running until the process is stopped");
            loop {
                thread::park();
            }
        }
    }

    if !manager.shutdown() {
        warn!("display worker still running at exit");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_control_lines() {
        assert_eq!(parse_control("tap"), Some(Control::Tap));
        assert_eq!(parse_control("  proximity 1800 "), Some(Control::Proximity(1800)));
        assert_eq!(parse_control("proximity lots"), None);
        assert_eq!(
            parse_control("error critical mqtt offline"),
            Some(Control::Error(Severity::Critical, "mqtt offline".into()))
        );
        assert_eq!(parse_control("error nonsense boom"), None);
        assert_eq!(
            parse_control("enviroplus/display/mode manual"),
            Some(Control::Command {
                topic: "enviroplus/display/mode".into(),
                payload: "manual".into(),
            })
        );
        assert_eq!(parse_control("# comment"), None);
    }

    fn control(input: &str) -> (ControlExit, DisplayManager) {
        let config = DisplayConfig {
            enabled: false,
            ..DisplayConfig::default()
        };
        let manager = DisplayManager::start(config, Box::new(NullSink::new()));
        let mut commands = CommandHandler::new(Arc::new(MessageBoard::new()), manager.size());
        let readings = SharedReadings::new();
        let exit = run_control(io::Cursor::new(input), &manager, &mut commands, &readings).unwrap();
        (exit, manager)
    }

    #[test]
    fn test_control_stops_only_on_quit() {
        let (exit, manager) = control("display/mode manual\nquit\ndisplay/mode off\n");
        assert_eq!(exit, ControlExit::Quit);
        assert_eq!(manager.mode(), enviro_display::RotationMode::Manual);
    }

    #[test]
    fn test_control_reports_closed_input() {
        assert_eq!(control("").0, ControlExit::Closed);
        assert_eq!(control("tap\n# comment\n").0, ControlExit::Closed);
    }

    #[test]
    fn test_default_args_build_valid_config() {
        let args = Args::parse_from(["enviro-display"]);
        let config = args.display_config().expect("defaults are valid");
        assert_eq!(config.scheduler.rotation_interval, ROTATION_INTERVAL);
        assert!(config.enabled);
    }

    #[test]
    fn test_disabled_flag_accepts_boolish_values() {
        let args = Args::parse_from(["enviro-display", "--enabled", "no"]);
        assert!(!args.enabled);
    }

    #[test]
    fn test_rotation_interval_out_of_range_is_rejected() {
        let args = Args::parse_from(["enviro-display", "--rotation-interval", "0.1"]);
        assert!(args.display_config().is_err());
    }
}
