use crate::queue::{ItemHandle, RotationMode};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum Phase {
    #[default]
    Init,         // Worker not started yet, sink not probed
    Splash,       // One-shot splash on screen
    Warmup,       // Waiting out the sensor warm-up period
    Rotating,     // Normal rotation (auto, manual or off)
    ManualPause,  // Auto rotation held after a tap
    ErrorOverlay, // Critical error owns the display
    Shutdown,     // Worker draining and exiting
    Disabled,     // Display off for the process lifetime
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Splash => "splash",
            Phase::Warmup => "warmup",
            Phase::Rotating => "rotating",
            Phase::ManualPause => "paused",
            Phase::ErrorOverlay => "error",
            Phase::Shutdown => "shutdown",
            Phase::Disabled => "disabled",
        }
    }

    /// No further display activity will happen in this phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Shutdown | Phase::Disabled)
    }
}

/// Point-in-time view of the display subsystem for diagnostics and callers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    pub phase: Phase,
    pub mode: RotationMode,
    pub queue_len: usize,
    pub active: Option<ItemHandle>,
    pub error: Option<String>,
    pub fading: bool,
    pub sink_available: bool,
    pub frames_written: u64,
    pub render_failures: u64,
    pub write_failures: u64,
}
