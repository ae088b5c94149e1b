use chrono::{SecondsFormat, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

const BASE_LAT: f64 = 4.658;
const BASE_LNG: f64 = -74.093;
const POSITION_JITTER: f64 = 0.0005;

/// Host description sent with the registration request.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub hostname: String,
    pub os: String,
    pub cpu: String,
    pub ram_mb: u64,
}

impl SystemInfo {
    pub fn collect() -> Self {
        let hostname = std::env::var("HOSTNAME")
            .ok()
            .or_else(|| read_trimmed("/etc/hostname"))
            .unwrap_or_else(|| "unknown".into());

        let os = match read_trimmed("/proc/sys/kernel/osrelease") {
            Some(release) => format!("{} {}", std::env::consts::OS, release),
            None => std::env::consts::OS.to_string(),
        };

        let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());

        Self {
            hostname,
            os,
            cpu: format!("{} cpu_count:{}", std::env::consts::ARCH, cpus),
            ram_mb: total_memory_mb().unwrap_or(0),
        }
    }
}

fn read_trimmed(path: &str) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    let trimmed = contents.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn total_memory_mb() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / 1024)
}

/// One telemetry reading.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySample {
    pub lat: f64,
    pub lng: f64,
    pub alt: f64,
    pub speed: f64,
    pub battery: f64,
    pub signal: f64,
    pub heading: f64,
    pub status: &'static str,
    /// RFC 3339, UTC
    pub timestamp: String,
}

/// Random-walk telemetry around a fixed home position with a draining battery.
pub struct TelemetrySimulator {
    rng: StdRng,
    battery: f64,
}

impl TelemetrySimulator {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            battery: 100.0,
        }
    }

    pub fn battery(&self) -> f64 {
        self.battery
    }

    /// Reading for this tick; the battery drains afterwards.
    pub fn next_sample(&mut self) -> TelemetrySample {
        let rng = &mut self.rng;
        let sample = TelemetrySample {
            lat: BASE_LAT + rng.gen_range(-POSITION_JITTER..=POSITION_JITTER),
            lng: BASE_LNG + rng.gen_range(-POSITION_JITTER..=POSITION_JITTER),
            alt: round2(rng.gen_range(80.0..=120.0)),
            speed: round2(rng.gen_range(0.0..=15.0)),
            battery: round2(self.battery),
            signal: round2(rng.gen_range(70.0..=100.0)),
            heading: round2(rng.gen_range(0.0..=360.0)),
            status: "IN_OPERATION",
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
        };

        self.battery = (self.battery - self.rng.gen_range(0.5..=1.5)).max(0.0);
        sample
    }
}

impl Default for TelemetrySimulator {
    fn default() -> Self {
        Self::new()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
