//! Built-in panels.

mod diagnostics;
mod picture;
mod sensor;
mod text;

pub use diagnostics::DiagnosticsPanel;
pub use picture::ImagePanel;
pub use sensor::{DashboardPanel, MetricGraphPanel};
pub use text::{
    ErrorPanel, MessageBoard, MessageColors, MessagePanel, TextPanel, WarmupPanel, wrap_text,
};

use embedded_graphics::mono_font::{MonoFont, MonoTextStyle};
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::*;
use embedded_graphics::text::{Baseline, Text};

use crate::frame::Frame;

/// Draw one line of text with its top-left corner at `at`.
pub(crate) fn draw_text(frame: &mut Frame, s: &str, at: Point, font: &MonoFont<'_>, color: Rgb888) {
    let style = MonoTextStyle::new(font, color);
    Text::with_baseline(s, at, style, Baseline::Top).draw(frame).ok();
}

/// Width in pixels of `s` set in `font`.
pub(crate) fn text_width(s: &str, font: &MonoFont<'_>) -> u32 {
    let n = s.chars().count() as u32;
    n * (font.character_size.width + font.character_spacing)
}
