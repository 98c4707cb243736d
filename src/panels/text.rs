use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use embedded_graphics::mono_font::ascii::{FONT_6X10, FONT_10X20};
use embedded_graphics::pixelcolor::{Rgb888, WebColors};
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};

use super::{draw_text, text_width};
use crate::constants::FPS;
use crate::frame::Frame;
use crate::overlay::Severity;
use crate::renderable::Renderable;

const SCROLL_PX_PER_SEC: u128 = 40;

/// Greedy word wrap to `cols` characters; words longer than a line are split.
pub fn wrap_text(text: &str, cols: usize) -> Vec<String> {
    let cols = cols.max(1);
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > cols {
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            let rest = word.split_off(cols);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        let needed = if line.is_empty() { word.len() } else { line.chars().count() + 1 + word.len() };
        if needed > cols && !line.is_empty() {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.extend(word);
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

/// A title and a few lines of body text on a solid background.
pub struct TextPanel {
    name: String,
    title: String,
    lines: Vec<String>,
    fg: Rgb888,
    bg: Rgb888,
    size: Size,
}

impl TextPanel {
    pub fn new(name: impl Into<String>, title: impl Into<String>, size: Size) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            lines: Vec::new(),
            fg: Rgb888::WHITE,
            bg: Rgb888::BLACK,
            size,
        }
    }

    pub fn with_line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    pub fn with_colors(mut self, fg: Rgb888, bg: Rgb888) -> Self {
        self.fg = fg;
        self.bg = bg;
        self
    }
}

impl Renderable for TextPanel {
    fn name(&self) -> &str {
        &self.name
    }

    fn render(&self) -> anyhow::Result<Frame> {
        let mut frame = Frame::filled(self.size.width, self.size.height, self.bg);
        draw_text(&mut frame, &self.title, Point::new(4, 4), &FONT_10X20, self.fg);
        for (i, line) in self.lines.iter().enumerate() {
            let y = 28 + i as i32 * 12;
            draw_text(&mut frame, line, Point::new(4, y), &FONT_6X10, self.fg);
        }
        Ok(frame)
    }
}

/// The synthetic panel shown for a reported error.
pub struct ErrorPanel {
    message: String,
    severity: Severity,
    size: Size,
}

impl ErrorPanel {
    pub fn new(message: impl Into<String>, severity: Severity, size: Size) -> Self {
        Self {
            message: message.into(),
            severity,
            size,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Renderable for ErrorPanel {
    fn name(&self) -> &str {
        match self.severity {
            Severity::Warning => "warning",
            Severity::Critical => "error",
        }
    }

    fn render(&self) -> anyhow::Result<Frame> {
        let (bg, title) = match self.severity {
            Severity::Warning => (Rgb888::new(200, 110, 0), "WARNING"),
            Severity::Critical => (Rgb888::new(170, 0, 0), "ERROR"),
        };
        let mut frame = Frame::filled(self.size.width, self.size.height, bg);
        draw_text(&mut frame, title, Point::new(4, 2), &FONT_10X20, Rgb888::WHITE);

        let cols = (self.size.width.saturating_sub(8) / 6) as usize;
        let max_lines = (self.size.height.saturating_sub(26) / 11) as usize;
        for (i, line) in wrap_text(&self.message, cols).iter().take(max_lines).enumerate() {
            let y = 26 + i as i32 * 11;
            draw_text(&mut frame, line, Point::new(4, y), &FONT_6X10, Rgb888::WHITE);
        }
        Ok(frame)
    }
}

/// Countdown shown while early sensor readings are being discarded.
pub struct WarmupPanel {
    started: Instant,
    until: Instant,
    size: Size,
}

impl WarmupPanel {
    pub fn new(started: Instant, until: Instant, size: Size) -> Self {
        Self { started, until, size }
    }
}

impl Renderable for WarmupPanel {
    fn name(&self) -> &str {
        "warmup"
    }

    fn render(&self) -> anyhow::Result<Frame> {
        let now = Instant::now();
        let remaining = self.until.saturating_duration_since(now);
        let total = self.until.saturating_duration_since(self.started);

        let mut frame = Frame::new(self.size.width, self.size.height);
        draw_text(&mut frame, "Warming up", Point::new(4, 4), &FONT_10X20, Rgb888::WHITE);
        let secs = format!("{}s", remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0));
        draw_text(&mut frame, &secs, Point::new(4, 30), &FONT_6X10, Rgb888::CSS_LIGHT_GRAY);

        let done = if total.is_zero() {
            1.0
        } else {
            1.0 - remaining.as_secs_f32() / total.as_secs_f32()
        };
        let bar_w = self.size.width.saturating_sub(8);
        Rectangle::new(Point::new(4, 50), Size::new(bar_w, 10))
            .into_styled(PrimitiveStyle::with_stroke(Rgb888::CSS_GRAY, 1))
            .draw(&mut frame)
            .ok();
        let filled = (bar_w as f32 * done.clamp(0.0, 1.0)) as u32;
        Rectangle::new(Point::new(4, 50), Size::new(filled, 10))
            .into_styled(PrimitiveStyle::with_fill(Rgb888::CSS_SEA_GREEN))
            .draw(&mut frame)
            .ok();
        Ok(frame)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageColors {
    pub fg: Rgb888,
    pub bg: Rgb888,
}

impl Default for MessageColors {
    fn default() -> Self {
        Self {
            fg: Rgb888::WHITE,
            bg: Rgb888::BLACK,
        }
    }
}

#[derive(Debug, Default)]
struct MessageState {
    text: String,
    colors: MessageColors,
}

/// Text and colours of the custom message, written by the command handler
/// and read by [`MessagePanel`].
#[derive(Debug, Default)]
pub struct MessageBoard {
    state: RwLock<MessageState>,
}

impl MessageBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> String {
        self.state.read().unwrap_or_else(PoisonError::into_inner).text.clone()
    }

    pub fn set_text(&self, text: impl Into<String>) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).text = text.into();
    }

    pub fn colors(&self) -> MessageColors {
        self.state.read().unwrap_or_else(PoisonError::into_inner).colors
    }

    pub fn set_colors(&self, colors: MessageColors) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).colors = colors;
    }
}

/// Horizontally scrolling custom message.
pub struct MessagePanel {
    board: Arc<MessageBoard>,
    started: Instant,
    size: Size,
}

impl MessagePanel {
    pub fn new(board: Arc<MessageBoard>, size: Size) -> Self {
        Self {
            board,
            started: Instant::now(),
            size,
        }
    }

    /// Left edge of the text `elapsed_ms` after the panel was created.
    fn scroll_x(&self, text_px: u32, elapsed_ms: u128) -> i32 {
        if text_px <= self.size.width {
            return ((self.size.width - text_px) / 2) as i32;
        }
        let span = u128::from(text_px + self.size.width);
        let offset = (elapsed_ms * SCROLL_PX_PER_SEC / 1000) % span;
        self.size.width as i32 - offset as i32
    }
}

impl Renderable for MessagePanel {
    fn name(&self) -> &str {
        "message"
    }

    fn render(&self) -> anyhow::Result<Frame> {
        let text = self.board.text();
        let colors = self.board.colors();
        let mut frame = Frame::filled(self.size.width, self.size.height, colors.bg);
        if text.is_empty() {
            return Ok(frame);
        }
        let x = self.scroll_x(text_width(&text, &FONT_10X20), self.started.elapsed().as_millis());
        let y = (self.size.height.saturating_sub(20) / 2) as i32;
        draw_text(&mut frame, &text, Point::new(x, y), &FONT_10X20, colors.fg);
        Ok(frame)
    }

    fn refresh_interval(&self) -> Option<Duration> {
        let scrolling = text_width(&self.board.text(), &FONT_10X20) > self.size.width;
        scrolling.then(|| Duration::from_millis(1000 / u64::from(FPS.max(1))))
    }
}
