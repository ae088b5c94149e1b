//! Frame sources: physical V4L2 devices and the synthetic placeholder feed.

pub mod decoder;
pub mod encoder;
pub mod frame;
pub mod synthetic;
pub mod v4l2;

pub use encoder::FrameEncoder;
pub use frame::{CaptureMode, Frame, PixelFormat, RawFrame};
pub use synthetic::SyntheticGenerator;
pub use v4l2::{HardwareCapture, V4l2Opener};

use crate::error::Result;

/// A claimed capture resource that yields raw frames on demand.
///
/// Implementations hold whatever OS-level resource backs the device until
/// [`CaptureDevice::release`] is called. Callers must release on every exit
/// path; `release` must tolerate being called on an already released device.
pub trait CaptureDevice: Send {
    /// Request a capture resolution. Devices may settle on something else.
    fn configure(&mut self, width: u32, height: u32) -> Result<()>;

    /// Grab the next frame. A failure means no frame was available this cycle.
    fn read(&mut self) -> Result<RawFrame>;

    fn release(&mut self);
}

/// Claims a capture device by numeric index.
pub trait DeviceOpener: Send {
    fn open(&self, index: usize) -> Result<Box<dyn CaptureDevice>>;
}

/// Ownership of the active capture resource.
///
/// Consumed by [`DeviceSession::release`], so a session cannot be released
/// twice.
pub enum DeviceSession {
    Hardware(Box<dyn CaptureDevice>),
    Synthetic(SyntheticGenerator),
}

impl DeviceSession {
    pub fn mode(&self) -> CaptureMode {
        match self {
            DeviceSession::Hardware(_) => CaptureMode::Hardware,
            DeviceSession::Synthetic(_) => CaptureMode::Synthetic,
        }
    }

    pub fn read(&mut self) -> Result<RawFrame> {
        match self {
            DeviceSession::Hardware(device) => device.read(),
            DeviceSession::Synthetic(generator) => generator.read(),
        }
    }

    pub fn release(self) {
        match self {
            DeviceSession::Hardware(mut device) => device.release(),
            DeviceSession::Synthetic(mut generator) => generator.release(),
        }
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DeviceSession").field(&self.mode()).finish()
    }
}
