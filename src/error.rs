use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failures the display subsystem can report. None of them is fatal to the
/// host process; the manager logs and absorbs every one.
#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("display hardware unavailable: {0}")]
    HardwareUnavailable(#[from] SinkError),

    #[error("panel `{panel}` failed to render: {reason}")]
    RenderFailure { panel: String, reason: String },

    #[error("transition aborted: {0}")]
    TransitionFailure(String),

    #[error("invalid payload on `{topic}`: {reason}")]
    ConfigInvalid { topic: String, reason: String },

    #[error("panel `{name}` rejected: {reason}")]
    PluginRejected { name: String, reason: String },
}

impl DisplayError {
    pub fn config(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    pub fn render(panel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RenderFailure {
            panel: panel.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by a [`crate::sink::FrameSink`].
#[derive(Debug, Error)]
pub enum SinkError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("frame write took longer than {0:?}")]
    Timeout(Duration),

    #[error("frame is {got_w}x{got_h}, sink expects {want_w}x{want_h}")]
    SizeMismatch {
        got_w: u32,
        got_h: u32,
        want_w: u32,
        want_h: u32,
    },

    #[error("previous frame write is still in progress")]
    Busy,

    #[error("display sink thread has exited")]
    Closed,

    #[error("{0}")]
    Unavailable(String),
}
