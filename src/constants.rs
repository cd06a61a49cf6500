//! Constants for MPEG-TS framing, clock arithmetic and paced delivery

use std::time::Duration;

/// MPEG-TS packet constants
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_SYNC_BYTE: u8 = 0x47;
pub const PAT_PID: u16 = 0x0000;
pub const NULL_PID: u16 = 0x1FFF;

/// Adaptation field flags
pub const AF_DISCONTINUITY: u8 = 0x80;
pub const AF_RANDOM_ACCESS: u8 = 0x40;
pub const AF_PCR_FLAG: u8 = 0x10;

/// PES packet constants
pub const PES_START_CODE: [u8; 3] = [0x00, 0x00, 0x01];
pub const PES_FIXED_HEADER: usize = 9;

/// PSI section constants
pub const MAX_SECTION_SIZE: usize = 4096;
pub const SECTION_HEADER_SIZE: usize = 8;
pub const CRC_SIZE: usize = 4;
pub const TABLE_ID_PAT: u8 = 0x00;
pub const TABLE_ID_PMT: u8 = 0x02;

/// PCR constants
pub const PCR_CLOCK_HZ: u64 = 27_000_000; // 27 MHz
/// Largest PCR step still trusted as continuous, in nanoseconds (500 ms)
pub const MAX_PCR_INTERVAL_NS: i64 = 500_000_000;

/// Delivery constants
pub const CHUNK_PACKETS: usize = 7;
pub const CHUNK_SIZE: usize = TS_PACKET_SIZE * CHUNK_PACKETS; // 1316
pub const READ_AHEAD_CHUNKS: usize = 128;
pub const READ_AHEAD_SIZE: usize = CHUNK_SIZE * READ_AHEAD_CHUNKS;
/// Receive buffer of the relay; holds any UDP payload
pub const MAX_DATAGRAM_SIZE: usize = 65_536;
pub const TIMESTAMP_SIZE: usize = 8;
pub const DELAY_CHECK_INTERVAL: u64 = 10;
pub const MAX_LATENESS: Duration = Duration::from_secs(1);

/// Fan-out sessions use consecutive ports from here unless configured otherwise
pub const DEFAULT_BASE_PORT: u16 = 10_000;

/// Converts 27 MHz ticks to nanoseconds, truncating.
pub const fn ticks_to_ns(ticks: u64) -> i64 {
    ((ticks as u128 * 1000) / 27) as i64
}
