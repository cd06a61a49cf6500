use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{DEFAULT_BASE_PORT, DELAY_CHECK_INTERVAL, MAX_LATENESS};
use crate::packet::SyncPolicy;

/// Elementary stream classification derived from the PMT stream type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Codec {
    H264,
    Mpeg2Video,
    Mpeg2Audio,
    Aac,
    Mp3,
    Mp4Audio,
    Ac3,
}

impl Codec {
    pub const fn from_stream_type(stream_type: u8) -> Option<Self> {
        match stream_type {
            0x02 => Some(Codec::Mpeg2Video),
            0x03 => Some(Codec::Mp3),
            0x04 => Some(Codec::Mpeg2Audio),
            0x0F => Some(Codec::Aac),
            0x11 => Some(Codec::Mp4Audio),
            0x1B => Some(Codec::H264),
            0x81 => Some(Codec::Ac3),
            _ => None,
        }
    }
}

/// One entry of the random-access index.
///
/// Serialized with single-letter keys: `d` duration (ns), `p` PCR (ns),
/// `o` byte offset, `k` keyframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    #[serde(rename = "d")]
    pub duration: i64,
    #[serde(rename = "p")]
    pub pcr: i64,
    #[serde(rename = "o")]
    pub offset: u64,
    #[serde(rename = "k")]
    pub keyframe: bool,
}

/// Clock state after one PCR-bearing packet has been processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    pub offset: u64,
    pub pcr: i64,
    pub duration: i64,
    pub keyframe: bool,
    pub anomaly: bool,
}

impl From<ClockSample> for IndexRecord {
    fn from(s: ClockSample) -> Self {
        IndexRecord {
            duration: s.duration,
            pcr: s.pcr,
            offset: s.offset,
            keyframe: s.keyframe,
        }
    }
}

/// Elementary stream information (public API)
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub pid: u16,
    pub stream_type: u8,
    pub codec: Option<Codec>,
    pub packets: u64,
    pub continuity_errors: u64,
    /// PES units started on this PID
    pub pes_units: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_pts: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub descriptor_tags: Vec<u8>,
}

/// Program information containing all its streams (public API)
#[derive(Debug, Clone, Serialize)]
pub struct ProgramInfo {
    pub program_number: u16,
    pub pmt_pid: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pcr_pid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmt_version: Option<u8>,
    pub streams: Vec<StreamInfo>,
}

/// Clock summary of one demultiplexing pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClockInfo {
    pub pcr_count: u64,
    pub anomalies: u64,
    pub duration_ns: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_pcr_ns: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate_bps: Option<u64>,
}

/// Complete probe report
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub timestamp: String,
    pub bytes: u64,
    pub packets: u64,
    pub sync_errors: u64,
    pub programs: Vec<ProgramInfo>,
    pub clock: ClockInfo,
}

/// Pacing knobs for one delivery session
#[derive(Debug, Clone, Copy)]
pub struct DeliveryConfig {
    /// Chunks between two wall/stream comparisons
    pub check_interval: u64,
    /// Wall-ahead-of-stream bound before the epoch is reset
    pub max_lateness: Duration,
    /// Stop once this much stream time has been delivered
    pub max_duration: Option<Duration>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            check_interval: DELAY_CHECK_INTERVAL,
            max_lateness: MAX_LATENESS,
            max_duration: None,
        }
    }
}

impl DeliveryConfig {
    /// `0` means unbounded, as on the command line.
    pub fn with_max_duration_secs(mut self, secs: u64) -> Self {
        self.max_duration = (secs > 0).then(|| Duration::from_secs(secs));
        self
    }
}

/// Options for `index` / `probe`
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub sync_policy: SyncPolicy,
}

/// Options for paced playback with optional fan-out
#[derive(Debug, Clone)]
pub struct PlayOptions {
    /// Path without extension; `<base>.ts` and `<base>.aux` are opened
    pub base_path: PathBuf,
    /// Destination host for fan-out sessions
    pub host: std::net::IpAddr,
    pub base_port: u16,
    /// Sessions launched in addition to the monitor session
    pub concurrency: u16,
    pub monitor: SocketAddr,
    pub delivery: DeliveryConfig,
    pub multicast_ttl: u32,
}

impl PlayOptions {
    pub fn new(base_path: PathBuf, monitor: SocketAddr) -> Self {
        Self {
            base_path,
            host: monitor.ip(),
            base_port: DEFAULT_BASE_PORT,
            concurrency: 0,
            monitor,
            delivery: DeliveryConfig::default(),
            multicast_ttl: 1,
        }
    }

    /// Destinations of every session, monitor last.
    pub fn destinations(&self) -> Vec<SocketAddr> {
        let mut out: Vec<SocketAddr> = (0..self.concurrency)
            .map(|i| SocketAddr::new(self.host, self.base_port.wrapping_add(i)))
            .collect();
        out.push(self.monitor);
        out
    }
}

/// Options for the UDP relay
#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub source: SocketAddr,
    pub destination: SocketAddr,
}

/// Options for the control listener
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub listen: SocketAddr,
    /// Directory that request URIs are resolved against
    pub media_root: PathBuf,
    pub delivery: DeliveryConfig,
}
