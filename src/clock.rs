//! Presentation clock reconstructed from successive PCR samples.
//!
//! The cumulative duration only ever grows: a step that runs backwards or
//! jumps further than [`MAX_PCR_INTERVAL_NS`] is replaced by the last trusted
//! step, keeping the slope of a constant-bitrate stream.

use log::{debug, warn};

use crate::constants::{MAX_PCR_INTERVAL_NS, TS_PACKET_SIZE};

/// Result of feeding one PCR to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockUpdate {
    /// Delta that was actually applied, in ns
    pub applied_delta: i64,
    /// Cumulative presentation duration, in ns
    pub duration: i64,
    pub anomaly: bool,
}

#[derive(Debug, Default)]
pub struct ClockTracker {
    first_pcr: Option<i64>,
    last_pcr: i64,
    last_offset: u64,
    last_trusted_delta: i64,
    duration: i64,
    samples: u64,
    anomalies: u64,
    bitrate: Option<u64>,
}

impl ClockTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a PCR (ns) found in the packet starting at `offset`.
    pub fn update(&mut self, pcr: i64, offset: u64) -> ClockUpdate {
        let mut update = ClockUpdate {
            applied_delta: 0,
            duration: self.duration,
            anomaly: false,
        };

        if self.first_pcr.is_none() {
            self.first_pcr = Some(pcr);
        } else {
            let delta = pcr - self.last_pcr;
            let applied = if !(0..=MAX_PCR_INTERVAL_NS).contains(&delta) {
                self.anomalies += 1;
                update.anomaly = true;
                warn!(
                    "PCR discontinuity at offset {offset}: {} -> {pcr} ns (delta {delta} ns), keeping slope {} ns",
                    self.last_pcr, self.last_trusted_delta
                );
                self.last_trusted_delta
            } else {
                self.last_trusted_delta = delta;
                delta
            };
            self.duration += applied;
            update.applied_delta = applied;
            update.duration = self.duration;

            if applied > 0 && offset > self.last_offset {
                let bits = (offset - self.last_offset) as u128 * 8;
                let bps = (bits * 1_000_000_000 / applied as u128) as u64;
                self.bitrate = Some(bps);
                debug!(
                    "bitrate: {bps} b/s over {} packets, delta {applied} ns, since first {} ns",
                    (offset - self.last_offset) / TS_PACKET_SIZE as u64,
                    pcr - self.first_pcr.unwrap_or(pcr)
                );
            }
        }

        self.last_pcr = pcr;
        self.last_offset = offset;
        self.samples += 1;
        update
    }

    pub fn duration(&self) -> i64 {
        self.duration
    }

    pub fn first_pcr(&self) -> Option<i64> {
        self.first_pcr
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn anomalies(&self) -> u64 {
        self.anomalies
    }

    /// Latest instantaneous bitrate estimate in bits per second
    pub fn bitrate(&self) -> Option<u64> {
        self.bitrate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    const MS: i64 = 1_000_000;

    #[test]
    fn first_pcr_sets_epoch() {
        let mut c = ClockTracker::new();
        let u = c.update(5_000 * MS, 0);
        assert_eq!(u, ClockUpdate { applied_delta: 0, duration: 0, anomaly: false });
        assert_eq!(c.first_pcr(), Some(5_000 * MS));
    }

    #[test]
    fn negative_delta_repeats_last_trusted() {
        let mut c = ClockTracker::new();
        c.update(1_000 * MS, 0);
        c.update(1_040 * MS, 188 * 10);
        let u = c.update(10 * MS, 188 * 20);
        assert!(u.anomaly);
        assert_eq!(u.applied_delta, 40 * MS);
        assert_eq!(u.duration, 80 * MS);
        // next valid delta is measured from the new position
        let u = c.update(50 * MS, 188 * 30);
        assert_eq!(u.duration, 120 * MS);
        assert_eq!(c.anomalies(), 1);
    }

    #[test]
    fn jump_past_ceiling_is_anomalous() {
        let mut c = ClockTracker::new();
        c.update(0, 0);
        c.update(20 * MS, 188);
        let u = c.update(20 * MS + MAX_PCR_INTERVAL_NS + 1, 376);
        assert!(u.anomaly);
        assert_eq!(u.duration, 40 * MS);
        // exactly at the ceiling is still trusted
        let u = c.update(20 * MS + 2 * MAX_PCR_INTERVAL_NS + 1, 564);
        assert!(!u.anomaly);
    }

    #[test]
    fn bitrate_from_byte_distance() {
        let mut c = ClockTracker::new();
        c.update(0, 0);
        // 1000 bytes over 1 ms -> 8 Mb/s
        c.update(MS, 1000);
        assert_eq!(c.bitrate(), Some(8_000_000));
    }

    #[quickcheck]
    fn duration_never_decreases_and_sums_valid_deltas(steps: Vec<u16>, bad_at: usize, backwards: bool) -> bool {
        if steps.len() < 2 {
            return true;
        }
        // at least one trusted delta precedes the anomaly
        let bad_at = 1 + bad_at % (steps.len() - 1);
        let mut c = ClockTracker::new();
        let mut pcr = 1_000_000 * MS;
        c.update(pcr, 0);

        let mut expected = 0i64;
        let mut last_valid = 0i64;
        let mut prev_duration = 0i64;
        for (i, step) in steps.iter().enumerate() {
            let delta = *step as i64 * 1_000; // up to ~65 ms
            if i == bad_at {
                pcr = if backwards { pcr - 100 * MS } else { pcr + 600 * MS };
                expected += last_valid;
            } else {
                pcr += delta;
                expected += delta;
                last_valid = delta;
            }
            let u = c.update(pcr, (i as u64 + 1) * 188);
            if u.duration < prev_duration {
                return false;
            }
            prev_duration = u.duration;
        }
        c.duration() == expected && c.anomalies() == 1
    }
}
