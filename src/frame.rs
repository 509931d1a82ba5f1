//! Frames: the pixel grid handed to an LED driver, plus what page it shows.
//!
//! Drawing helpers here are pure: they take data in and return pixels, which
//! keeps the page logic testable without any hardware.

use crate::Color;
use crate::display::Rotation;
use crate::metrics::MetricKind;
use image::{RgbImage, imageops};

/// What a frame depicts, independent of its pixels.
#[derive(Clone, Debug, PartialEq)]
pub enum Page {
    Readout { metric: MetricKind, latest: f64 },
    /// `fraction` is `None` when no upload limit is configured.
    Progress { fraction: Option<f64> },
    Blank,
}

/// A square grid of RGB pixels ready for the LED driver.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    page: Page,
    image: RgbImage,
}

impl Frame {
    /// An all-black frame.
    pub fn blank(size: u32) -> Self {
        Self {
            page: Page::Blank,
            image: RgbImage::new(size, size),
        }
    }

    pub fn new(page: Page, image: RgbImage) -> Self {
        Self { page, image }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn size(&self) -> u32 {
        self.image.width()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Color {
        (*self.image.get_pixel(x, y)).into()
    }

    /// Number of pixels that are not black.
    pub fn lit_count(&self) -> usize {
        self.image.pixels().filter(|p| p.0 != [0, 0, 0]).count()
    }

    pub fn is_dark(&self) -> bool {
        self.lit_count() == 0
    }

    /// Rotate the pixel grid clockwise by `rotation`.
    pub fn rotated(self, rotation: Rotation) -> Self {
        let image = match rotation {
            Rotation::Deg0 => self.image,
            Rotation::Deg90 => imageops::rotate90(&self.image),
            Rotation::Deg180 => imageops::rotate180(&self.image),
            Rotation::Deg270 => imageops::rotate270(&self.image),
        };
        Self {
            page: self.page,
            image,
        }
    }
}

// ── Drawing helpers ──────────────────────────────────────────────────

/// Draw a bar graph of normalized `levels` (newest last) into the top
/// `rows` rows of `image`.
///
/// Each column's bar grows up from row `rows - 1`, with height
/// `floor(level * rows)`. When there are fewer levels than columns the graph
/// is right-aligned, so new samples appear to scroll in from the right.
pub fn draw_graph(image: &mut RgbImage, levels: &[f64], rows: u32) {
    let width = image.width();
    let rows = rows.min(image.height());
    let shown = &levels[levels.len().saturating_sub(width as usize)..];
    let offset = width - shown.len() as u32;

    for (i, &level) in shown.iter().enumerate() {
        let x = offset + i as u32;
        let level = if level.is_nan() { 0.0 } else { level.clamp(0.0, 1.0) };
        let height = (level * rows as f64).floor() as u32;
        let color = Color::from_level(level);
        for y in (rows - height)..rows {
            image.put_pixel(x, y, color.into());
        }
    }
}

/// One-pixel-tall progress bar across row `y`: the leftmost
/// `floor(fraction * width)` pixels are lit.
pub fn draw_progress_row(image: &mut RgbImage, y: u32, fraction: f64) {
    let width = image.width();
    let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
    let lit = (fraction * width as f64).floor() as u32;
    for x in 0..lit {
        image.put_pixel(x, y, Color::CYAN.into());
    }
}

/// Full-grid progress: fill `floor(fraction * pixels)` cells row by row.
pub fn draw_progress_fill(image: &mut RgbImage, fraction: f64) {
    let (width, height) = image.dimensions();
    let total = width * height;
    let lit = (fraction.clamp(0.0, 1.0) * total as f64).floor() as u32;
    for i in 0..lit {
        image.put_pixel(i % width, i / width, Color::CYAN.into());
    }
}

/// Indeterminate progress: diagonal stripes whose phase follows `phase`.
pub fn draw_indeterminate(image: &mut RgbImage, phase: u32) {
    let (width, height) = image.dimensions();
    for y in 0..height {
        for x in 0..width {
            if (x + y + phase) % 4 == 0 {
                image.put_pixel(x, y, Color::CYAN.into());
            }
        }
    }
}
