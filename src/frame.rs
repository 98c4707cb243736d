//! Fixed-size colour image produced by panels and consumed by sinks.

use std::convert::Infallible;

use embedded_graphics::pixelcolor::{IntoStorage, Rgb565, Rgb888};
use embedded_graphics::prelude::*;

use crate::constants::{DISPLAY_HEIGHT, DISPLAY_WIDTH};

/// An RGB888 frame. Panels draw into it through embedded-graphics; sinks
/// convert it to whatever pixel format the hardware wants.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<Rgb888>,
}

impl Frame {
    /// Black frame of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, Rgb888::BLACK)
    }

    pub fn filled(width: u32, height: u32, color: Rgb888) -> Self {
        Self {
            width,
            height,
            pixels: vec![color; (width * height) as usize],
        }
    }

    /// Black frame at the panel resolution.
    pub fn blank() -> Self {
        Self::new(DISPLAY_WIDTH, DISPLAY_HEIGHT)
    }

    pub fn from_pixels(width: u32, height: u32, pixels: Vec<Rgb888>) -> Option<Self> {
        (pixels.len() == (width * height) as usize).then_some(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb888> {
        if x < self.width && y < self.height {
            self.pixels.get((y * self.width + x) as usize).copied()
        } else {
            None
        }
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: Rgb888) {
        if x < self.width && y < self.height {
            if let Some(p) = self.pixels.get_mut((y * self.width + x) as usize) {
                *p = color;
            }
        }
    }

    pub fn fill(&mut self, color: Rgb888) {
        self.pixels.fill(color);
    }

    pub fn is_black(&self) -> bool {
        self.pixels.iter().all(|p| *p == Rgb888::BLACK)
    }

    /// Copy of this frame scaled towards black. `opacity` is clamped to `[0, 1]`.
    pub fn dimmed(&self, opacity: f32) -> Frame {
        let opacity = opacity.clamp(0.0, 1.0);
        if opacity >= 1.0 {
            return self.clone();
        }
        let scale = |c: u8| (f32::from(c) * opacity).round() as u8;
        Frame {
            width: self.width,
            height: self.height,
            pixels: self
                .pixels
                .iter()
                .map(|p| Rgb888::new(scale(p.r()), scale(p.g()), scale(p.b())))
                .collect(),
        }
    }

    /// Packed RGB565, little-endian, row-major (Linux fbdev layout).
    pub fn to_rgb565_le(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|p| Rgb565::from(*p).into_storage().to_le_bytes())
            .collect()
    }

    /// Packed RGB24, row-major.
    pub fn to_rgb24(&self) -> Vec<u8> {
        self.pixels.iter().flat_map(|p| [p.r(), p.g(), p.b()]).collect()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl OriginDimensions for Frame {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for Frame {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x >= 0 && point.y >= 0 {
                self.set_pixel(point.x as u32, point.y as u32, color);
            }
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        self.fill(color);
        Ok(())
    }
}
