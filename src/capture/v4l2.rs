//! V4L2 hardware capture.
//!
//! Only available with the `v4l2` feature. Without it the opener always
//! reports an open failure, which drops the producer into synthetic mode.

use super::{CaptureDevice, DeviceOpener};
use crate::error::Result;

/// Opens `/dev/video{index}` devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct V4l2Opener;

impl DeviceOpener for V4l2Opener {
    fn open(&self, index: usize) -> Result<Box<dyn CaptureDevice>> {
        let capture = HardwareCapture::open(index)?;
        Ok(Box::new(capture))
    }
}

#[cfg(feature = "v4l2")]
pub use device::HardwareCapture;

#[cfg(not(feature = "v4l2"))]
pub use unsupported::HardwareCapture;

#[cfg(feature = "v4l2")]
mod device {
    use std::time::Instant;

    use bytes::Bytes;
    use tracing::{debug, info, instrument};
    use v4l::buffer::Type;
    use v4l::capability::Flags as CapFlags;
    use v4l::io::traits::CaptureStream;
    use v4l::prelude::MmapStream;
    use v4l::video::Capture;
    use v4l::{Device, FourCC};

    use crate::capture::frame::{PixelFormat, RawFrame};
    use crate::capture::CaptureDevice;
    use crate::error::{Error, Result};

    const BUFFER_COUNT: u32 = 4;

    /// Exclusive handle on a V4L2 capture device.
    pub struct HardwareCapture {
        index: usize,
        device: Option<Device>,
        stream: Option<MmapStream<'static>>,
        width: u32,
        height: u32,
        format: PixelFormat,
    }

    impl HardwareCapture {
        pub fn open(index: usize) -> Result<Self> {
            let open_err = |reason: String| Error::DeviceOpen { index, reason };

            let device = Device::new(index).map_err(|e| open_err(e.to_string()))?;
            let caps = device.query_caps().map_err(|e| open_err(e.to_string()))?;
            info!("Device {}: {} ({})", index, caps.card, caps.driver);

            if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
                return Err(open_err("device doesn't support video capture".into()));
            }

            let fmt = device.format().map_err(|e| open_err(e.to_string()))?;
            let format = fourcc_to_format(fmt.fourcc)
                .ok_or_else(|| open_err(format!("unsupported pixel format {}", fmt.fourcc)))?;

            Ok(Self {
                index,
                device: Some(device),
                stream: None,
                width: fmt.width,
                height: fmt.height,
                format,
            })
        }

        fn device(&self) -> Result<&Device> {
            self.device
                .as_ref()
                .ok_or_else(|| Error::DeviceRead("device already released".into()))
        }

        fn start_stream(&mut self) -> Result<()> {
            let device = self.device()?;
            let stream = MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
                .map_err(|e| Error::DeviceRead(e.to_string()))?;
            self.stream = Some(stream);
            info!("Capture stream started with {} buffers", BUFFER_COUNT);
            Ok(())
        }
    }

    impl CaptureDevice for HardwareCapture {
        fn configure(&mut self, width: u32, height: u32) -> Result<()> {
            let index = self.index;
            let device = self.device()?;
            let config_err = |e: std::io::Error| Error::DeviceOpen {
                index,
                reason: e.to_string(),
            };

            // Prefer MJPEG so frames pass straight through the encoder
            let mut fmt = device.format().map_err(config_err)?;
            fmt.width = width;
            fmt.height = height;
            fmt.fourcc = FourCC::new(b"MJPG");
            let mut actual = device.set_format(&fmt).map_err(config_err)?;

            if fourcc_to_format(actual.fourcc).is_none() {
                fmt.fourcc = FourCC::new(b"YUYV");
                actual = device.set_format(&fmt).map_err(config_err)?;
            }

            self.format = fourcc_to_format(actual.fourcc).ok_or_else(|| Error::DeviceOpen {
                index,
                reason: format!("unsupported pixel format {}", actual.fourcc),
            })?;
            self.width = actual.width;
            self.height = actual.height;

            debug!(
                "Configured {}x{} {:?} (requested {}x{})",
                self.width, self.height, self.format, width, height
            );
            Ok(())
        }

        #[instrument(skip(self), fields(index = self.index))]
        fn read(&mut self) -> Result<RawFrame> {
            if self.stream.is_none() {
                self.start_stream()?;
            }
            let timestamp = Instant::now();

            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| Error::DeviceRead("stream not started".into()))?;

            let (buf, meta) = stream
                .next()
                .map_err(|e| Error::DeviceRead(e.to_string()))?;

            let used = (meta.bytesused as usize).min(buf.len());
            if used == 0 {
                return Err(Error::DeviceRead("empty buffer".into()));
            }

            Ok(RawFrame {
                data: Bytes::copy_from_slice(&buf[..used]),
                width: self.width,
                height: self.height,
                format: self.format,
                timestamp,
            })
        }

        fn release(&mut self) {
            // Stream must go before the device it maps
            self.stream.take();
            if self.device.take().is_some() {
                info!("Released capture device {}", self.index);
            }
        }
    }

    impl Drop for HardwareCapture {
        fn drop(&mut self) {
            self.release();
        }
    }

    fn fourcc_to_format(fourcc: FourCC) -> Option<PixelFormat> {
        if fourcc == FourCC::new(b"MJPG") {
            Some(PixelFormat::Mjpeg)
        } else if fourcc == FourCC::new(b"YUYV") {
            Some(PixelFormat::Yuyv4)
        } else if fourcc == FourCC::new(b"RGB3") {
            Some(PixelFormat::Rgb24)
        } else {
            None
        }
    }
}

#[cfg(not(feature = "v4l2"))]
mod unsupported {
    use crate::capture::frame::RawFrame;
    use crate::capture::CaptureDevice;
    use crate::error::{Error, Result};

    /// Placeholder for builds without the `v4l2` feature.
    pub enum HardwareCapture {}

    impl HardwareCapture {
        pub fn open(index: usize) -> Result<Self> {
            Err(Error::DeviceOpen {
                index,
                reason: "built without v4l2 support".into(),
            })
        }
    }

    impl CaptureDevice for HardwareCapture {
        fn configure(&mut self, _width: u32, _height: u32) -> Result<()> {
            match *self {}
        }

        fn read(&mut self) -> Result<RawFrame> {
            match *self {}
        }

        fn release(&mut self) {
            match *self {}
        }
    }
}
