pub mod producer;
pub mod slot;

pub use producer::{ModeProbe, ProducerHandle, StopOutcome, DEFAULT_STOP_TIMEOUT};
pub use slot::FrameSlot;
