use std::sync::{Arc, PoisonError, RwLock};

use embedded_graphics::mono_font::ascii::FONT_6X10;
use embedded_graphics::pixelcolor::{Rgb888, WebColors};
use embedded_graphics::prelude::*;

use super::draw_text;
use crate::frame::Frame;
use crate::renderable::Renderable;
use crate::state::StatusSnapshot;

/// Toggled by a double tap when no error is active.
pub struct DiagnosticsPanel {
    status: Arc<RwLock<StatusSnapshot>>,
    size: Size,
}

impl DiagnosticsPanel {
    pub fn new(status: Arc<RwLock<StatusSnapshot>>, size: Size) -> Self {
        Self { status, size }
    }

    fn lines(status: &StatusSnapshot) -> [String; 6] {
        [
            format!("state  {}", status.phase.as_str()),
            format!("mode   {}", status.mode.as_str()),
            format!("queue  {}", status.queue_len),
            format!("sink   {}", if status.sink_available { "ok" } else { "down" }),
            format!("frames {}", status.frames_written),
            format!("errors {}r {}w", status.render_failures, status.write_failures),
        ]
    }
}

impl Renderable for DiagnosticsPanel {
    fn name(&self) -> &str {
        "diagnostics"
    }

    fn render(&self) -> anyhow::Result<Frame> {
        let status = self.status.read().unwrap_or_else(PoisonError::into_inner).clone();
        let mut frame = Frame::filled(self.size.width, self.size.height, Rgb888::CSS_MIDNIGHT_BLUE);
        for (i, line) in Self::lines(&status).iter().enumerate() {
            draw_text(&mut frame, line, Point::new(3, 2 + i as i32 * 13), &FONT_6X10, Rgb888::WHITE);
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Phase;

    #[test]
    fn test_lines_reflect_status() {
        let status = StatusSnapshot {
            phase: Phase::Rotating,
            queue_len: 3,
            render_failures: 2,
            ..StatusSnapshot::default()
        };
        let lines = DiagnosticsPanel::lines(&status);
        assert_eq!(lines[0], "state  rotating");
        assert_eq!(lines[2], "queue  3");
        assert_eq!(lines[3], "sink   down");
        assert_eq!(lines[5], "errors 2r 0w");
    }
}
