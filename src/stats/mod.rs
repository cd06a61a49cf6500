//! Per-PID packet statistics

use std::collections::HashMap;

use log::debug;

use crate::constants::{NULL_PID, TS_PACKET_SIZE};
use crate::packet::TsPacket;

/// Counters for one PID
#[derive(Debug, Default, Clone)]
pub struct PidStats {
    pub packets: u64,
    pub bytes: u64,
    /// Continuity counter gaps, reported only
    pub continuity_errors: u64,
    pub transport_errors: u64,
    last_cc: Option<u8>,
}

/// Manages per-PID statistics for one demultiplexing pass
#[derive(Default)]
pub struct StatsManager {
    pid_stats: HashMap<u16, PidStats>,
}

impl StatsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a packet and checks its continuity counter
    pub fn record(&mut self, pkt: &TsPacket) {
        let pid = pkt.pid();
        let stats = self.pid_stats.entry(pid).or_default();
        stats.packets += 1;
        stats.bytes += TS_PACKET_SIZE as u64;
        if pkt.transport_error() {
            stats.transport_errors += 1;
        }

        let cc = pkt.continuity_counter();
        if let Some(prev) = stats.last_cc.replace(cc) {
            let discontinuity = pkt.adaptation_field().is_some_and(|af| af.discontinuity());
            if pid != NULL_PID && pkt.has_payload() && !discontinuity && ((prev + 1) & 0x0F) != cc {
                stats.continuity_errors += 1;
                debug!("PID 0x{pid:04X}: continuity counter {prev} -> {cc}");
            }
        }
    }

    pub fn get(&self, pid: u16) -> Option<&PidStats> {
        self.pid_stats.get(&pid)
    }

    pub fn total_packets(&self) -> u64 {
        self.pid_stats.values().map(|s| s.packets).sum()
    }
}
