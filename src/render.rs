//! LED output devices: the Sense HAT framebuffer, a HUB75 matrix, or nothing.
//!
//! Drivers receive finished [`Frame`]s; all page logic lives in
//! [`crate::display`]. Every driver is acquired once at startup and owned by
//! the orchestrator, which clears it on the way out.
//!
//! ## Rust concepts
//! - Trait objects (`Box<dyn LedDriver>`) chosen at runtime from the CLI
//! - `#[cfg(feature = ...)]` to compile hardware code only when asked for
//! - `Write` + `Seek` so the framebuffer driver can be tested on a temp file

use crate::error::DriverError;
use crate::frame::Frame;
use crate::{Color, GRID_SIZE};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Something that can show a frame.
pub trait LedDriver {
    fn set_pixels(&mut self, frame: &Frame) -> Result<(), DriverError>;

    /// Turn every pixel off.
    fn clear(&mut self) -> Result<(), DriverError>;

    fn describe(&self) -> String;
}

impl<D: LedDriver + ?Sized> LedDriver for Box<D> {
    fn set_pixels(&mut self, frame: &Frame) -> Result<(), DriverError> {
        (**self).set_pixels(frame)
    }

    fn clear(&mut self) -> Result<(), DriverError> {
        (**self).clear()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

// ── Headless ─────────────────────────────────────────────────────────

/// No display attached; frames are only traced.
#[derive(Default)]
pub struct HeadlessDriver {
    frames: u64,
}

impl HeadlessDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl LedDriver for HeadlessDriver {
    fn set_pixels(&mut self, frame: &Frame) -> Result<(), DriverError> {
        self.frames += 1;
        tracing::trace!(
            "Frame {}: {:?} ({} lit)",
            self.frames,
            frame.page(),
            frame.lit_count()
        );
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn describe(&self) -> String {
        "headless".to_string()
    }
}

// ── Sense HAT framebuffer ────────────────────────────────────────────

/// Name the Sense HAT LED driver gives its framebuffer.
pub const SENSE_HAT_FB_NAME: &str = "RPi-Sense FB";

/// Find `/dev/fbN` for the Sense HAT by scanning
/// `<sysfs>/class/graphics/fb*/name`.
pub fn find_sense_framebuffer(sysfs: &Path, dev: &Path) -> Option<PathBuf> {
    let graphics = sysfs.join("class").join("graphics");
    let mut candidates: Vec<PathBuf> = fs::read_dir(&graphics)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("fb"))
        })
        .collect();
    candidates.sort();

    candidates.into_iter().find_map(|path| {
        let name = fs::read_to_string(path.join("name")).ok()?;
        if name.trim() == SENSE_HAT_FB_NAME {
            Some(dev.join(path.file_name()?))
        } else {
            None
        }
    })
}

/// Encode a frame as the framebuffer expects: row-major little-endian RGB565.
pub fn encode_rgb565(frame: &Frame) -> Vec<u8> {
    frame
        .image()
        .pixels()
        .flat_map(|p| Color::from(*p).to_rgb565().to_le_bytes())
        .collect()
}

/// The Sense HAT's 8x8 LED matrix, written through its framebuffer device.
pub struct SenseHatFramebuffer<W: Write + Seek = File> {
    device: W,
    path: String,
}

impl SenseHatFramebuffer<File> {
    /// Open the framebuffer at `path` for writing.
    pub fn open(path: &Path) -> Result<Self, DriverError> {
        let device = OpenOptions::new().write(true).open(path)?;
        Ok(Self {
            device,
            path: path.display().to_string(),
        })
    }

    /// Locate and open the Sense HAT framebuffer.
    pub fn discover(sysfs: &Path, dev: &Path) -> Result<Self, DriverError> {
        let path = find_sense_framebuffer(sysfs, dev).ok_or_else(|| {
            DriverError::NotFound(format!("no framebuffer named {SENSE_HAT_FB_NAME:?}"))
        })?;
        Self::open(&path)
    }
}

impl<W: Write + Seek> SenseHatFramebuffer<W> {
    /// Wrap an already-open device (or any seekable writer).
    pub fn from_writer(device: W, label: impl Into<String>) -> Self {
        Self {
            device,
            path: label.into(),
        }
    }

    pub fn into_inner(self) -> W {
        self.device
    }

    fn write_frame(&mut self, bytes: &[u8]) -> Result<(), DriverError> {
        self.device.seek(SeekFrom::Start(0))?;
        self.device.write_all(bytes)?;
        self.device.flush()?;
        Ok(())
    }
}

impl<W: Write + Seek> LedDriver for SenseHatFramebuffer<W> {
    fn set_pixels(&mut self, frame: &Frame) -> Result<(), DriverError> {
        if frame.size() != GRID_SIZE {
            return Err(DriverError::FrameSize {
                expected: GRID_SIZE,
                actual: frame.size(),
            });
        }
        let bytes = encode_rgb565(frame);
        self.write_frame(&bytes)
    }

    fn clear(&mut self) -> Result<(), DriverError> {
        let bytes = vec![0u8; (GRID_SIZE * GRID_SIZE * 2) as usize];
        self.write_frame(&bytes)
    }

    fn describe(&self) -> String {
        format!("Sense HAT framebuffer {}", self.path)
    }
}

// ── HUB75 matrix ─────────────────────────────────────────────────────

#[cfg(feature = "hardware")]
pub use matrix::MatrixDriver;

#[cfg(feature = "hardware")]
mod matrix {
    use super::LedDriver;
    use crate::error::DriverError;
    use crate::frame::Frame;
    use crate::{PanelConfig, create_matrix};
    use rpi_led_matrix::{LedCanvas, LedMatrix};

    /// An RGB LED matrix panel driven by `rpi-led-matrix`. Each logical pixel
    /// is drawn as a square block, centered on the panel.
    pub struct MatrixDriver {
        matrix: LedMatrix,
        canvas: Option<LedCanvas>,
        panel: PanelConfig,
        brightness: u8,
    }

    impl MatrixDriver {
        pub fn new(panel: PanelConfig, brightness: u8) -> Result<Self, DriverError> {
            let matrix =
                create_matrix(panel).map_err(|e| DriverError::Init(e.to_string()))?;
            let canvas = Some(matrix.offscreen_canvas());
            Ok(Self {
                matrix,
                canvas,
                panel,
                brightness: brightness.min(100),
            })
        }

        /// The C library is double-buffered: draw offscreen, then swap.
        fn draw(&mut self, frame: Option<&Frame>) {
            let Some(mut canvas) = self.canvas.take() else {
                return;
            };
            canvas.clear();

            if let Some(frame) = frame {
                let cell = self.panel.cell_size(frame.size()) as i32;
                let x0 = (self.panel.cols as i32 - cell * frame.size() as i32) / 2;
                let y0 = (self.panel.rows as i32 - cell * frame.size() as i32) / 2;

                for (x, y, pixel) in frame.image().enumerate_pixels() {
                    let color = crate::Color::from(*pixel).apply_brightness(self.brightness);
                    if color == crate::Color::BLACK {
                        continue;
                    }
                    let led: rpi_led_matrix::LedColor = color.into();
                    for dy in 0..cell {
                        for dx in 0..cell {
                            canvas.set(x0 + x as i32 * cell + dx, y0 + y as i32 * cell + dy, &led);
                        }
                    }
                }
            }

            self.canvas = Some(self.matrix.swap(canvas));
        }
    }

    impl LedDriver for MatrixDriver {
        fn set_pixels(&mut self, frame: &Frame) -> Result<(), DriverError> {
            self.draw(Some(frame));
            Ok(())
        }

        fn clear(&mut self) -> Result<(), DriverError> {
            self.draw(None);
            Ok(())
        }

        fn describe(&self) -> String {
            format!("HUB75 matrix {}x{}", self.panel.cols, self.panel.rows)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Page;
    use image::RgbImage;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn frame_with(x: u32, y: u32, color: Color) -> Frame {
        let mut image = RgbImage::new(GRID_SIZE, GRID_SIZE);
        image.put_pixel(x, y, color.into());
        Frame::new(Page::Blank, image)
    }

    #[test]
    fn encode_is_row_major_little_endian() {
        let frame = frame_with(1, 0, Color::new(255, 0, 0));
        let bytes = encode_rgb565(&frame);
        assert_eq!(bytes.len(), 128);
        assert_eq!(&bytes[0..2], &[0x00, 0x00]);
        assert_eq!(&bytes[2..4], &[0x00, 0xF8]);
    }

    #[test]
    fn framebuffer_overwrites_from_start() {
        let mut fb = SenseHatFramebuffer::from_writer(Cursor::new(Vec::new()), "test");
        fb.set_pixels(&frame_with(0, 0, Color::WHITE)).unwrap();
        fb.set_pixels(&frame_with(7, 7, Color::WHITE)).unwrap();

        let written = fb.into_inner().into_inner();
        assert_eq!(written.len(), 128);
        assert_eq!(&written[0..2], &[0, 0]);
        assert_eq!(&written[126..128], &[0xFF, 0xFF]);
    }

    #[test]
    fn framebuffer_clear_writes_zeros() {
        let mut fb = SenseHatFramebuffer::from_writer(Cursor::new(vec![0xAA; 128]), "test");
        fb.clear().unwrap();
        assert_eq!(fb.into_inner().into_inner(), vec![0u8; 128]);
    }

    #[test]
    fn framebuffer_rejects_wrong_size() {
        let mut fb = SenseHatFramebuffer::from_writer(Cursor::new(Vec::new()), "test");
        let err = fb.set_pixels(&Frame::blank(16)).unwrap_err();
        assert!(matches!(
            err,
            DriverError::FrameSize {
                expected: 8,
                actual: 16
            }
        ));
    }

    #[test]
    fn find_framebuffer_by_name() {
        let tmp = TempDir::new().unwrap();
        let graphics = tmp.path().join("class").join("graphics");
        for (node, name) in [("fb0", "BCM2708 FB"), ("fb1", SENSE_HAT_FB_NAME)] {
            std::fs::create_dir_all(graphics.join(node)).unwrap();
            std::fs::write(graphics.join(node).join("name"), format!("{name}\n")).unwrap();
        }

        let found = find_sense_framebuffer(tmp.path(), Path::new("/dev"));
        assert_eq!(found, Some(PathBuf::from("/dev/fb1")));
    }

    #[test]
    fn discover_without_framebuffer_fails() {
        let tmp = TempDir::new().unwrap();
        let err = SenseHatFramebuffer::discover(tmp.path(), tmp.path()).err();
        assert!(matches!(err, Some(DriverError::NotFound(_))));
    }

    #[test]
    fn open_real_file_and_write() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fb1");
        std::fs::write(&path, b"").unwrap();

        let mut fb = SenseHatFramebuffer::open(&path).unwrap();
        fb.set_pixels(&frame_with(0, 0, Color::WHITE)).unwrap();
        drop(fb);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..2], &[0xFF, 0xFF]);
    }

    #[test]
    fn headless_counts_frames() {
        let mut driver = HeadlessDriver::new();
        driver.set_pixels(&Frame::blank(GRID_SIZE)).unwrap();
        driver.set_pixels(&Frame::blank(GRID_SIZE)).unwrap();
        driver.clear().unwrap();
        assert_eq!(driver.frames(), 2);
    }
}
