use std::time::Duration;

pub const DISPLAY_WIDTH: u32 = 160;                                 // ST7735 panel width (rotated 270)
pub const DISPLAY_HEIGHT: u32 = 80;                                 // ST7735 panel height
pub const FPS: u32 = 20;                                            // Preview frame rate for piped sinks

pub const TICK: Duration = Duration::from_millis(50);               // Worker wake-up interval
pub const IDLE_WAIT: Duration = Duration::from_secs(1);             // Worker wait while blank and idle
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(1);      // Re-render period for a steady panel

pub const ROTATION_INTERVAL: Duration = Duration::from_secs(5);     // Default seconds per item
pub const FADE_DURATION: Duration = Duration::from_secs(1);         // Full fade (out + in) between items
pub const WARMUP_DURATION: Duration = Duration::from_secs(10);      // Readings discarded during warm-up
pub const SPLASH_DURATION: Duration = Duration::from_secs(5);       // Splash hold time
pub const SPLASH_FADE: Duration = Duration::from_secs(2);           // Splash fade-out time
pub const PAUSE_GRACE: Duration = Duration::from_secs(10);          // Hold after a tap in auto mode

pub const DOUBLE_TAP_WINDOW: Duration = Duration::from_secs(1);     // Second tap within this is a double tap
pub const TAP_DEBOUNCE: Duration = Duration::from_millis(50);       // Edges closer than this are bounce
pub const PROXIMITY_NEAR: u16 = 1500;                               // Raw proximity reading counted as near
pub const PROXIMITY_RELEASE: u16 = 1000;                            // Reading below which the hand has left

pub const WRITE_TIMEOUT: Duration = Duration::from_millis(500);     // Longest acceptable frame write
pub const PROBE_BACKOFF_INITIAL: Duration = Duration::from_secs(5); // First re-probe after a write failure
pub const PROBE_BACKOFF_MAX: Duration = Duration::from_secs(300);   // Ceiling for re-probe backoff
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);      // Bounded wait for the worker to exit
pub const PIPE_CLOSE_GRACE: Duration = Duration::from_millis(300);  // Time ffmpeg gets to finish a recording

pub const MIN_ROTATION_SECS: f64 = 1.0;                             // display/interval lower bound
pub const MAX_ROTATION_SECS: f64 = 3600.0;                          // display/interval upper bound
pub const MAX_MESSAGE_LEN: usize = 256;                             // display/message length limit
pub const GRAPH_HISTORY: usize = 160;                               // Samples kept by metric graphs
