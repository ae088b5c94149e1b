//! Placeholder feed used when no camera can be claimed.

use image::{Rgb, RgbImage};
use tracing::debug;

use super::frame::{PixelFormat, RawFrame};
use super::CaptureDevice;
use crate::error::Result;

pub const SYNTHETIC_WIDTH: u32 = 640;
pub const SYNTHETIC_HEIGHT: u32 = 480;

pub const LABEL: &str = "SIMULATION FEED";

const GLYPH_SCALE: u32 = 4;
const GLYPH_ADVANCE: u32 = 6 * GLYPH_SCALE;
const LABEL_X: u32 = 40;
const LABEL_Y: u32 = 212;

/// Pixel rectangle `(x, y, width, height)` covered by the label.
pub const LABEL_REGION: (u32, u32, u32, u32) = (
    LABEL_X,
    LABEL_Y,
    LABEL.len() as u32 * GLYPH_ADVANCE,
    7 * GLYPH_SCALE,
);

const BAR_Y: u32 = 300;
const BAR_HEIGHT: u32 = 8;
const BAR_WIDTH: u32 = 40;
const BAR_STEPS: u64 = 56;

const FOREGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const BAR: Rgb<u8> = Rgb([96, 96, 96]);

/// Fixed 640x480 generator with a "SIMULATION FEED" label.
///
/// The label never moves; a small bar below it advances every frame so
/// viewers can tell the feed is live.
pub struct SyntheticGenerator {
    template: RgbImage,
    sequence: u64,
}

impl SyntheticGenerator {
    pub fn new() -> Self {
        let mut template = RgbImage::new(SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT);
        draw_text(&mut template, LABEL, LABEL_X, LABEL_Y);
        Self {
            template,
            sequence: 0,
        }
    }

    /// Produce the next placeholder frame. Never fails.
    pub fn next_frame(&mut self) -> RawFrame {
        let mut img = self.template.clone();

        let offset = (self.sequence % BAR_STEPS) as u32 * 10;
        fill_rect(&mut img, LABEL_X + offset, BAR_Y, BAR_WIDTH, BAR_HEIGHT, BAR);
        self.sequence += 1;

        RawFrame::new(
            img.into_raw(),
            SYNTHETIC_WIDTH,
            SYNTHETIC_HEIGHT,
            PixelFormat::Rgb24,
        )
    }
}

impl Default for SyntheticGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureDevice for SyntheticGenerator {
    fn configure(&mut self, width: u32, height: u32) -> Result<()> {
        debug!(
            "Synthetic feed ignores requested {}x{}, fixed at {}x{}",
            width, height, SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT
        );
        Ok(())
    }

    fn read(&mut self) -> Result<RawFrame> {
        Ok(self.next_frame())
    }

    fn release(&mut self) {}
}

fn fill_rect(img: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let x_end = (x + w).min(img.width());
    let y_end = (y + h).min(img.height());
    for py in y..y_end {
        for px in x..x_end {
            img.put_pixel(px, py, color);
        }
    }
}

fn draw_text(img: &mut RgbImage, text: &str, x: u32, y: u32) {
    for (i, ch) in text.chars().enumerate() {
        let origin = x + i as u32 * GLYPH_ADVANCE;
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..5u32 {
                if bits & (0b10000 >> col) != 0 {
                    fill_rect(
                        img,
                        origin + col * GLYPH_SCALE,
                        y + row as u32 * GLYPH_SCALE,
                        GLYPH_SCALE,
                        GLYPH_SCALE,
                        FOREGROUND,
                    );
                }
            }
        }
    }
}

/// 5x7 bitmaps for the characters in [`LABEL`].
fn glyph(ch: char) -> [u8; 7] {
    match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'I' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b11111],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        _ => [0; 7],
    }
}

/// Count of bright pixels inside [`LABEL_REGION`] of an RGB image.
///
/// Used to recognise placeholder frames after a JPEG round trip.
pub fn label_coverage(img: &RgbImage) -> usize {
    let (x, y, w, h) = LABEL_REGION;
    if img.width() < x + w || img.height() < y + h {
        return 0;
    }
    let mut lit = 0;
    for py in y..y + h {
        for px in x..x + w {
            let Rgb([r, g, b]) = *img.get_pixel(px, py);
            if (u32::from(r) + u32::from(g) + u32::from(b)) / 3 > 160 {
                lit += 1;
            }
        }
    }
    lit
}
