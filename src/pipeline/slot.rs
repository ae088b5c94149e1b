//! Single-value "latest frame" holder shared between the producer and viewers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;

use crate::capture::Frame;

/// Holds the most recently published frame.
///
/// Publishing swaps an `Arc` pointer, so readers always see a whole frame:
/// either the one before or the one after a concurrent publish. There is no
/// queue behind it; a slow reader just skips intermediate frames.
#[derive(Default)]
pub struct FrameSlot {
    latest: ArcSwapOption<Frame>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    published: AtomicU64,
    reads: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held frame. Visible to every read that starts afterwards.
    pub fn publish(&self, frame: Frame) {
        self.latest.store(Some(Arc::new(frame)));
        self.stats.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Current frame, or `None` before the first publish.
    pub fn read(&self) -> Option<Arc<Frame>> {
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        self.latest.load_full()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.load().is_none()
    }

    pub fn published(&self) -> u64 {
        self.stats.published.load(Ordering::Relaxed)
    }

    pub fn reads(&self) -> u64 {
        self.stats.reads.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for FrameSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSlot")
            .field("has_frame", &!self.is_empty())
            .field("published", &self.published())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureMode;
    use bytes::Bytes;
    use std::time::Instant;

    fn frame(sequence: u64) -> Frame {
        Frame {
            data: Bytes::from(format!("jpeg-{sequence}")),
            sequence,
            width: 1,
            height: 1,
            mode: CaptureMode::Synthetic,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn starts_empty() {
        let slot = FrameSlot::new();
        assert!(slot.is_empty());
        assert!(slot.read().is_none());
        assert_eq!(slot.published(), 0);
    }

    #[test]
    fn holds_the_last_published_frame() {
        let slot = FrameSlot::new();
        for seq in 1..=5 {
            slot.publish(frame(seq));
        }
        let latest = slot.read().unwrap();
        assert_eq!(latest.sequence, 5);
        assert_eq!(latest.data, Bytes::from("jpeg-5"));
        assert_eq!(slot.published(), 5);
    }

    #[test]
    fn repeated_reads_are_identical() {
        let slot = FrameSlot::new();
        slot.publish(frame(7));
        let a = slot.read().unwrap();
        let b = slot.read().unwrap();
        assert_eq!(a.data, b.data);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(slot.reads(), 2);
    }

    #[test]
    fn readers_never_see_torn_frames() {
        let slot = Arc::new(FrameSlot::new());
        let writer = {
            let slot = Arc::clone(&slot);
            std::thread::spawn(move || {
                for seq in 1..=2_000 {
                    slot.publish(frame(seq));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let slot = Arc::clone(&slot);
                std::thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..2_000 {
                        if let Some(f) = slot.read() {
                            assert_eq!(f.data, Bytes::from(format!("jpeg-{}", f.sequence)));
                            assert!(f.sequence >= last, "slot went backwards");
                            last = f.sequence;
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(slot.read().unwrap().sequence, 2_000);
    }
}
