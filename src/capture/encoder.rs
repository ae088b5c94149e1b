//! JPEG encoding for the transport side of the pipeline.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, Rgb};

use super::decoder::{decode_frame, jpeg_dimensions};
use super::frame::{PixelFormat, RawFrame};
use crate::error::{Error, Result};

pub const DEFAULT_QUALITY: u8 = 80;

/// Compresses raw frames into JPEG payloads.
///
/// Output is deterministic for identical input. Frames that already arrive
/// as MJPEG are validated and passed through untouched.
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    quality: u8,
}

impl FrameEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn encode(&self, frame: &RawFrame) -> Result<Bytes> {
        match frame.format {
            PixelFormat::Mjpeg => {
                jpeg_dimensions(&frame.data)?;
                Ok(frame.data.clone())
            }
            PixelFormat::Rgb24 | PixelFormat::Yuyv4 => {
                let rgb = decode_frame(frame)?;
                self.encode_rgb(rgb, frame.width, frame.height)
            }
        }
    }

    fn encode_rgb(&self, rgb: Vec<u8>, width: u32, height: u32) -> Result<Bytes> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_raw(width, height, rgb)
            .ok_or_else(|| Error::Encode(format!("buffer does not fit {width}x{height}")))?;

        let mut jpeg = Vec::with_capacity(width as usize * height as usize / 4);
        let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, self.quality);
        encoder
            .encode_image(&img)
            .map_err(|e| Error::Encode(e.to_string()))?;

        Ok(Bytes::from(jpeg))
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_QUALITY)
    }
}
