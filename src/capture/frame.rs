use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Encoded frame ready for transport.
///
/// Cloning is cheap: the JPEG payload is reference counted and never mutated
/// after publish.
#[derive(Debug, Clone)]
pub struct Frame {
    /// JPEG payload
    pub data: Bytes,

    pub sequence: u64,
    pub width: u32,
    pub height: u32,

    /// Which device produced the frame
    pub mode: CaptureMode,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Raw image straight off a capture device, before encoding.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub timestamp: Instant,
}

impl RawFrame {
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            format,
            timestamp: Instant::now(),
        }
    }
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Yuyv4,
    Mjpeg,
}

impl PixelFormat {
    /// Bytes per pixel for uncompressed formats.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Rgb24 => Some(3),
            PixelFormat::Yuyv4 => Some(2),
            PixelFormat::Mjpeg => None,
        }
    }
}

/// Which source the producer is currently reading from.
///
/// `Opening` only lasts until the first device open attempt resolves. After
/// that the transition is a one-way latch: `Hardware` may become `Synthetic`,
/// never the other way round within one producer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    Opening,
    Hardware,
    Synthetic,
}

impl CaptureMode {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            CaptureMode::Opening => 0,
            CaptureMode::Hardware => 1,
            CaptureMode::Synthetic => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => CaptureMode::Opening,
            1 => CaptureMode::Hardware,
            _ => CaptureMode::Synthetic,
        }
    }
}
