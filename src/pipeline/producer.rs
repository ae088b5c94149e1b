//! Capture loop that keeps the [`FrameSlot`] fresh.
//!
//! The loop runs on its own OS thread so blocking device reads never stall
//! the HTTP runtime. It owns the device session exclusively and drops to the
//! synthetic feed for good the first time the hardware lets it down.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{debug, error, info, warn};

use super::slot::FrameSlot;
use crate::capture::{
    CaptureMode, DeviceOpener, DeviceSession, Frame, FrameEncoder, SyntheticGenerator,
};
use crate::error::{Error, Result};
use crate::CaptureConfig;

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Read-only view of the producer's capture mode, shareable across threads.
#[derive(Debug, Clone)]
pub struct ModeProbe(Arc<AtomicU8>);

impl ModeProbe {
    fn new(mode: CaptureMode) -> Self {
        Self(Arc::new(AtomicU8::new(mode.as_u8())))
    }

    pub fn get(&self) -> CaptureMode {
        CaptureMode::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set_hardware(&self) {
        // Never undo the synthetic latch
        let _ = self.0.compare_exchange(
            CaptureMode::Opening.as_u8(),
            CaptureMode::Hardware.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn latch_synthetic(&self) {
        self.0.store(CaptureMode::Synthetic.as_u8(), Ordering::Release);
    }
}

/// How a call to [`ProducerHandle::stop`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Loop exited and released its device within the timeout
    Stopped,
    /// Loop did not confirm termination in time; the device may leak
    TimedOut,
    /// Loop thread died without signalling completion
    Panicked,
    AlreadyStopped,
}

/// Controller for a running producer loop.
pub struct ProducerHandle {
    stop_tx: Option<Sender<()>>,
    done_rx: Receiver<()>,
    thread: Option<JoinHandle<()>>,
    mode: ModeProbe,
}

impl ProducerHandle {
    /// Spawn the producer thread. Device open happens on that thread; its
    /// failure only switches the loop to synthetic mode.
    pub fn start<O>(config: CaptureConfig, opener: O, slot: Arc<FrameSlot>) -> Result<Self>
    where
        O: DeviceOpener + 'static,
    {
        if !(config.fps.is_finite() && config.fps > 0.0) {
            return Err(Error::Config(format!("fps must be > 0, got {}", config.fps)));
        }

        let (stop_tx, stop_rx) = flume::bounded(1);
        let (done_tx, done_rx) = flume::bounded(1);
        let mode = ModeProbe::new(CaptureMode::Opening);

        let producer = Producer {
            encoder: FrameEncoder::new(config.quality),
            config,
            slot,
            mode: mode.clone(),
            sequence: 0,
            encode_failures: 0,
        };

        let thread = std::thread::Builder::new()
            .name("frame-producer".into())
            .spawn(move || producer.run(opener, stop_rx, done_tx))?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            done_rx,
            thread: Some(thread),
            mode,
        })
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode.get()
    }

    pub fn mode_probe(&self) -> ModeProbe {
        self.mode.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Signal the loop to stop and wait up to `timeout` for it to release
    /// the device and exit.
    pub fn stop(&mut self, timeout: Duration) -> StopOutcome {
        let Some(stop_tx) = self.stop_tx.take() else {
            return StopOutcome::AlreadyStopped;
        };
        let _ = stop_tx.try_send(());

        let outcome = match self.done_rx.recv_timeout(timeout) {
            Ok(()) => {
                if let Some(thread) = self.thread.take() {
                    let _ = thread.join();
                }
                StopOutcome::Stopped
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Producer did not stop within {:?}; capture device may not have been released",
                    timeout
                );
                // Detach; the thread still holds its end of the stop channel
                self.thread.take();
                StopOutcome::TimedOut
            }
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = self.thread.take() {
                    let _ = thread.join();
                }
                error!("Producer thread exited without completing shutdown");
                StopOutcome::Panicked
            }
        };

        info!("Producer stop: {:?}", outcome);
        outcome
    }
}

impl Drop for ProducerHandle {
    fn drop(&mut self) {
        if self.stop_tx.is_some() {
            self.stop(DEFAULT_STOP_TIMEOUT);
        }
    }
}

impl std::fmt::Debug for ProducerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerHandle")
            .field("mode", &self.mode())
            .field("running", &self.stop_tx.is_some())
            .finish()
    }
}

enum Cycle {
    Published,
    EncodeFailed,
    ReadFailed(Error),
}

struct Producer {
    config: CaptureConfig,
    encoder: FrameEncoder,
    slot: Arc<FrameSlot>,
    mode: ModeProbe,
    sequence: u64,
    encode_failures: u64,
}

impl Producer {
    fn run<O: DeviceOpener>(mut self, opener: O, stop_rx: Receiver<()>, done_tx: Sender<()>) {
        if let Some(id) = self.config.pin_core {
            if core_affinity::set_for_current(core_affinity::CoreId { id }) {
                debug!("Producer pinned to core {}", id);
            } else {
                warn!("Failed to pin producer to core {}", id);
            }
        }

        let interval = Duration::from_secs_f64(1.0 / self.config.fps);
        let mut session = self.open_session(&opener);
        info!(
            "Producer running in {:?} mode at {} fps",
            session.mode(),
            self.config.fps
        );

        loop {
            match stop_rx.try_recv() {
                Err(TryRecvError::Empty) => {}
                _ => break,
            }

            match self.cycle(&mut session) {
                Cycle::Published | Cycle::EncodeFailed => {}
                Cycle::ReadFailed(err) => {
                    if session.mode() == CaptureMode::Hardware {
                        session = self.fall_back(session, &err);
                        // Serve the placeholder right away
                        continue;
                    }
                    error!("Synthetic read failed: {}", err);
                }
            }

            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => break,
            }
        }

        let mode = session.mode();
        session.release();
        info!("Producer stopped ({:?} mode, {} frames)", mode, self.sequence);
        let _ = done_tx.send(());
    }

    fn open_session<O: DeviceOpener>(&self, opener: &O) -> DeviceSession {
        let index = self.config.device_index;
        match opener.open(index) {
            Ok(mut device) => {
                if let Err(e) = device.configure(self.config.width, self.config.height) {
                    warn!("Could not configure device {}: {}", index, e);
                }
                info!("Capturing from device {}", index);
                self.mode.set_hardware();
                DeviceSession::Hardware(device)
            }
            Err(e) => {
                warn!("{}; serving simulation feed", e);
                self.mode.latch_synthetic();
                metrics::counter!("skyview_fallback_total").increment(1);
                DeviceSession::Synthetic(SyntheticGenerator::new())
            }
        }
    }

    fn fall_back(&self, session: DeviceSession, cause: &Error) -> DeviceSession {
        warn!("{}; switching to simulation feed permanently", cause);
        session.release();
        self.mode.latch_synthetic();
        metrics::counter!("skyview_fallback_total").increment(1);
        DeviceSession::Synthetic(SyntheticGenerator::new())
    }

    fn cycle(&mut self, session: &mut DeviceSession) -> Cycle {
        let raw = match session.read() {
            Ok(raw) => raw,
            Err(e) => return Cycle::ReadFailed(e),
        };

        let data = match self.encoder.encode(&raw) {
            Ok(data) => data,
            Err(e) => {
                self.encode_failures += 1;
                metrics::counter!("skyview_encode_failures_total").increment(1);
                if self.encode_failures == 1 || self.encode_failures % 100 == 0 {
                    warn!("Dropping frame ({} encode failures): {}", self.encode_failures, e);
                }
                return Cycle::EncodeFailed;
            }
        };

        self.sequence += 1;
        self.slot.publish(Frame {
            data,
            sequence: self.sequence,
            width: raw.width,
            height: raw.height,
            mode: session.mode(),
            timestamp: raw.timestamp,
        });
        metrics::counter!("skyview_frames_published_total").increment(1);
        Cycle::Published
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureDevice, PixelFormat, RawFrame};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Clone, Copy)]
    enum Step {
        Good,
        Corrupt,
        Fail,
    }

    #[derive(Default)]
    struct Counters {
        opens: AtomicUsize,
        reads: AtomicUsize,
        releases: AtomicUsize,
    }

    /// Device whose reads follow a script, then succeed forever.
    struct ScriptedDevice {
        script: VecDeque<Step>,
        counters: Arc<Counters>,
    }

    impl CaptureDevice for ScriptedDevice {
        fn configure(&mut self, _width: u32, _height: u32) -> Result<()> {
            Ok(())
        }

        fn read(&mut self) -> Result<RawFrame> {
            self.counters.reads.fetch_add(1, Ordering::SeqCst);
            match self.script.pop_front().unwrap_or(Step::Good) {
                Step::Good => Ok(RawFrame::new(vec![200u8; 8 * 8 * 3], 8, 8, PixelFormat::Rgb24)),
                Step::Corrupt => Ok(RawFrame::new(vec![0u8; 5], 8, 8, PixelFormat::Rgb24)),
                Step::Fail => Err(Error::DeviceRead("no frame".into())),
            }
        }

        fn release(&mut self) {
            self.counters.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ScriptedOpener {
        script: Mutex<Option<Vec<Step>>>,
        counters: Arc<Counters>,
    }

    impl ScriptedOpener {
        fn new(script: Vec<Step>) -> (Self, Arc<Counters>) {
            let counters = Arc::new(Counters::default());
            let opener = Self {
                script: Mutex::new(Some(script)),
                counters: Arc::clone(&counters),
            };
            (opener, counters)
        }
    }

    impl DeviceOpener for ScriptedOpener {
        fn open(&self, _index: usize) -> Result<Box<dyn CaptureDevice>> {
            self.counters.opens.fetch_add(1, Ordering::SeqCst);
            let script = self.script.lock().unwrap().take().unwrap_or_default();
            Ok(Box::new(ScriptedDevice {
                script: script.into(),
                counters: Arc::clone(&self.counters),
            }))
        }
    }

    struct NoDevice;

    impl DeviceOpener for NoDevice {
        fn open(&self, index: usize) -> Result<Box<dyn CaptureDevice>> {
            Err(Error::DeviceOpen {
                index,
                reason: "not present".into(),
            })
        }
    }

    fn config(fps: f64) -> CaptureConfig {
        CaptureConfig {
            fps,
            ..CaptureConfig::default()
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn rejects_non_positive_fps() {
        let slot = Arc::new(FrameSlot::new());
        assert!(ProducerHandle::start(config(0.0), NoDevice, Arc::clone(&slot)).is_err());
        assert!(ProducerHandle::start(config(f64::NAN), NoDevice, slot).is_err());
    }

    #[test]
    fn mode_stays_opening_until_open_resolves() {
        struct GatedOpener {
            gate: Receiver<()>,
            inner: ScriptedOpener,
        }

        impl DeviceOpener for GatedOpener {
            fn open(&self, index: usize) -> Result<Box<dyn CaptureDevice>> {
                let _ = self.gate.recv();
                self.inner.open(index)
            }
        }

        let (release_open, gate) = flume::bounded(1);
        let (inner, _counters) = ScriptedOpener::new(Vec::new());
        let slot = Arc::new(FrameSlot::new());
        let mut handle =
            ProducerHandle::start(config(20.0), GatedOpener { gate, inner }, Arc::clone(&slot))
                .unwrap();

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(handle.mode(), CaptureMode::Opening);
        assert!(slot.is_empty());

        release_open.send(()).unwrap();
        wait_for(|| handle.mode() == CaptureMode::Hardware);
        wait_for(|| !slot.is_empty());
        assert_eq!(slot.read().unwrap().mode, CaptureMode::Hardware);

        assert_eq!(handle.stop(DEFAULT_STOP_TIMEOUT), StopOutcome::Stopped);
    }

    #[test]
    fn open_failure_serves_synthetic_frames() {
        let slot = Arc::new(FrameSlot::new());
        let mut handle = ProducerHandle::start(config(50.0), NoDevice, Arc::clone(&slot)).unwrap();

        wait_for(|| slot.published() >= 3);
        assert_eq!(handle.mode(), CaptureMode::Synthetic);

        let frame = slot.read().unwrap();
        assert_eq!(frame.mode, CaptureMode::Synthetic);
        assert_eq!((frame.width, frame.height), (640, 480));

        assert_eq!(handle.stop(DEFAULT_STOP_TIMEOUT), StopOutcome::Stopped);
    }

    #[test]
    fn read_failure_latches_synthetic_even_after_recovery() {
        let (opener, counters) = ScriptedOpener::new(vec![Step::Good, Step::Good, Step::Fail]);
        let slot = Arc::new(FrameSlot::new());
        let mut handle = ProducerHandle::start(config(100.0), opener, Arc::clone(&slot)).unwrap();

        wait_for(|| handle.mode() == CaptureMode::Synthetic);
        let reads_at_fallback = counters.reads.load(Ordering::SeqCst);
        wait_for(|| slot.read().map_or(false, |f| f.mode == CaptureMode::Synthetic));

        // The scripted device would succeed again; it must never be asked
        let published = slot.published();
        wait_for(|| slot.published() >= published + 2);
        assert_eq!(counters.reads.load(Ordering::SeqCst), reads_at_fallback);
        assert_eq!(handle.mode(), CaptureMode::Synthetic);
        assert_eq!(slot.read().unwrap().mode, CaptureMode::Synthetic);

        assert_eq!(handle.stop(DEFAULT_STOP_TIMEOUT), StopOutcome::Stopped);
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn encode_failure_skips_one_cycle() {
        let (opener, _counters) = ScriptedOpener::new(vec![Step::Corrupt, Step::Good]);
        let slot = Arc::new(FrameSlot::new());
        let mut handle = ProducerHandle::start(config(5.0), opener, Arc::clone(&slot)).unwrap();

        wait_for(|| !slot.is_empty());
        let frame = slot.read().unwrap();
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.mode, CaptureMode::Hardware);
        assert_eq!(&frame.data[0..2], &[0xFF, 0xD8]);
        assert_eq!(handle.mode(), CaptureMode::Hardware);

        handle.stop(DEFAULT_STOP_TIMEOUT);
    }

    #[test]
    fn stop_releases_hardware_exactly_once() {
        let (opener, counters) = ScriptedOpener::new(Vec::new());
        let slot = Arc::new(FrameSlot::new());
        let mut handle = ProducerHandle::start(config(10.0), opener, Arc::clone(&slot)).unwrap();
        wait_for(|| !slot.is_empty());

        let started = Instant::now();
        assert_eq!(handle.stop(DEFAULT_STOP_TIMEOUT), StopOutcome::Stopped);
        assert!(started.elapsed() < DEFAULT_STOP_TIMEOUT);
        assert!(handle.is_finished());
        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);

        assert_eq!(handle.stop(DEFAULT_STOP_TIMEOUT), StopOutcome::AlreadyStopped);
        drop(handle);
        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_reports_timeout_when_loop_is_stuck() {
        struct StuckDevice;

        impl CaptureDevice for StuckDevice {
            fn configure(&mut self, _width: u32, _height: u32) -> Result<()> {
                Ok(())
            }

            fn read(&mut self) -> Result<RawFrame> {
                std::thread::sleep(Duration::from_millis(500));
                Ok(RawFrame::new(vec![0u8; 3], 1, 1, PixelFormat::Rgb24))
            }

            fn release(&mut self) {}
        }

        struct StuckOpener;

        impl DeviceOpener for StuckOpener {
            fn open(&self, _index: usize) -> Result<Box<dyn CaptureDevice>> {
                Ok(Box::new(StuckDevice))
            }
        }

        let slot = Arc::new(FrameSlot::new());
        let mut handle = ProducerHandle::start(config(10.0), StuckOpener, slot).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(handle.stop(Duration::from_millis(20)), StopOutcome::TimedOut);
    }
}
