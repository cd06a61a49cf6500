//! Main packet processing logic: PID filters, PAT/PMT dispatch and the
//! presentation clock.

use std::collections::HashMap;
use std::io::Read;

use log::{debug, info, warn};

use crate::clock::ClockTracker;
use crate::constants::*;
use crate::error::Result;
use crate::packet::{PacketReader, TsPacket};
use crate::pes::PesState;
use crate::psi::{PatSection, PmtSection, SectionFilter, parse_pat, parse_pmt};
use crate::stats::StatsManager;
use crate::types::{ClockSample, Codec};

/// State owned for one PID
#[derive(Debug, Default)]
pub struct PidFilter {
    pub section: SectionFilter,
    pub pes: PesState,
    pub stream_type: Option<u8>,
    pub codec: Option<Codec>,
}

pub struct PacketProcessor {
    filters: HashMap<u16, PidFilter>,
    pat: Option<PatSection>,
    pmt_pid: Option<u16>,
    pmt: Option<PmtSection>,
    pcr_pid: Option<u16>,
    clock: ClockTracker,
    stats: StatsManager,
    bytes: u64,
}

impl Default for PacketProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketProcessor {
    pub fn new() -> Self {
        Self {
            filters: HashMap::new(),
            pat: None,
            pmt_pid: None,
            pmt: None,
            pcr_pid: None,
            clock: ClockTracker::new(),
            stats: StatsManager::new(),
            bytes: 0,
        }
    }

    /// Process a single TS packet starting at `offset`.
    ///
    /// Returns the clock state when the packet carried a PCR, whatever its PID.
    pub fn process_packet(&mut self, offset: u64, pkt: &TsPacket) -> Option<ClockSample> {
        let pid = pkt.pid();
        self.stats.record(pkt);
        self.bytes = offset + TS_PACKET_SIZE as u64;

        if !self.filters.contains_key(&pid) {
            debug!("new PID 0x{pid:04X} at offset {offset}");
            self.filters.insert(pid, PidFilter::default());
        }

        let sample = pkt.adaptation_field().and_then(|af| {
            let pcr = af.pcr()?;
            self.note_pcr_pid(pid);
            let update = self.clock.update(pcr.nanos(), offset);
            Some(ClockSample {
                offset,
                pcr: pcr.nanos(),
                duration: update.duration,
                keyframe: af.random_access(),
                anomaly: update.anomaly,
            })
        });

        let Some(payload) = pkt.payload() else {
            return sample;
        };

        if pid == PAT_PID || Some(pid) == self.pmt_pid {
            let sections = match self.filters.get_mut(&pid) {
                Some(f) => f.section.push(pid, pkt.payload_unit_start(), payload),
                None => Vec::new(),
            };
            for section in sections {
                self.dispatch_section(pid, &section);
            }
        } else if let Some(f) = self.filters.get_mut(&pid) {
            if f.codec.is_some() {
                let was_complete = f.pes.is_complete();
                if f.pes.push(pkt.payload_unit_start(), payload) {
                    if let Some(h) = f.pes.header {
                        debug!("PID 0x{pid:04X}: PES stream 0x{:02X} pts {:?}", h.stream_id, h.pts);
                    }
                } else if !was_complete && f.pes.is_complete() {
                    debug!("PID 0x{pid:04X}: PES unit {} complete", f.pes.units);
                }
            }
        }

        sample
    }

    /// Runs the whole source through the processor.
    pub fn run<R: Read>(
        &mut self,
        reader: &mut PacketReader<R>,
        mut on_sample: impl FnMut(ClockSample) -> Result<()>,
    ) -> Result<()> {
        while let Some((offset, pkt)) = reader.next_packet()? {
            if let Some(sample) = self.process_packet(offset, &pkt) {
                on_sample(sample)?;
            }
        }
        Ok(())
    }

    /// Every PCR feeds the clock; a PCR on a PID other than the current
    /// PCR PID is logged and that PID becomes the PCR PID.
    fn note_pcr_pid(&mut self, pid: u16) {
        match self.pcr_pid {
            Some(p) if p == pid => {}
            Some(p) => {
                warn!("PCR PID changed: 0x{p:04X} -> 0x{pid:04X}");
                self.pcr_pid = Some(pid);
            }
            None => {
                info!("PCR found on PID 0x{pid:04X}");
                self.pcr_pid = Some(pid);
            }
        }
    }

    fn dispatch_section(&mut self, pid: u16, section: &[u8]) {
        if pid == PAT_PID {
            match parse_pat(section) {
                Ok(pat) => {
                    let pmt_pid = pat.pmt_pid();
                    if pmt_pid != self.pmt_pid {
                        info!("PAT: PMT PID {:?} (version {})", pmt_pid, pat.version);
                        self.pmt_pid = pmt_pid;
                    }
                    self.pat = Some(pat);
                }
                Err(e) => warn!("PAT: {e}"),
            }
            return;
        }

        let pmt = match parse_pmt(section) {
            Ok(pmt) => pmt,
            Err(e) => {
                warn!("PMT on PID 0x{pid:04X}: {e}");
                return;
            }
        };

        if pmt.pcr_pid != NULL_PID && self.pcr_pid != Some(pmt.pcr_pid) {
            if let Some(old) = self.pcr_pid {
                warn!("PCR PID changed: 0x{old:04X} -> 0x{:04X}", pmt.pcr_pid);
            }
            self.pcr_pid = Some(pmt.pcr_pid);
        }

        for s in &pmt.streams {
            let filter = self.filters.entry(s.elementary_pid).or_default();
            filter.stream_type = Some(s.stream_type);
            match Codec::from_stream_type(s.stream_type) {
                Some(codec) => {
                    if filter.codec != Some(codec) {
                        info!("PMT: PID 0x{:04X} is {codec:?}", s.elementary_pid);
                    }
                    filter.codec = Some(codec);
                }
                None => warn!(
                    "unsupported stream type 0x{:02X} on PID 0x{:04X}",
                    s.stream_type, s.elementary_pid
                ),
            }
        }
        self.pmt = Some(pmt);
    }

    /// Clears a PID's section state, re-enabling a filter disabled by an oversized section.
    pub fn reset_filter(&mut self, pid: u16) {
        if let Some(f) = self.filters.get_mut(&pid) {
            f.section.reset();
        }
    }

    pub fn filter(&self, pid: u16) -> Option<&PidFilter> {
        self.filters.get(&pid)
    }

    pub fn codec(&self, pid: u16) -> Option<Codec> {
        self.filters.get(&pid).and_then(|f| f.codec)
    }

    pub fn pat(&self) -> Option<&PatSection> {
        self.pat.as_ref()
    }

    pub fn pmt(&self) -> Option<&PmtSection> {
        self.pmt.as_ref()
    }

    pub fn pmt_pid(&self) -> Option<u16> {
        self.pmt_pid
    }

    pub fn pcr_pid(&self) -> Option<u16> {
        self.pcr_pid
    }

    pub fn clock(&self) -> &ClockTracker {
        &self.clock
    }

    pub fn stats(&self) -> &StatsManager {
        &self.stats
    }

    /// Bytes consumed so far
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::packet::tests::{build_packet, pcr_packet};
    use crate::psi::pat::tests::pat_section;
    use crate::psi::pmt::tests::pmt_section;
    use pretty_assertions::assert_eq;

    pub(crate) fn section_packet(pid: u16, section: &[u8]) -> Vec<u8> {
        let mut payload = vec![0u8];
        payload.extend_from_slice(section);
        payload.resize(184, 0xFF);
        build_packet(pid, true, 0, None, &payload)
    }

    fn feed(p: &mut PacketProcessor, packets: &[Vec<u8>]) -> Vec<ClockSample> {
        packets
            .iter()
            .enumerate()
            .filter_map(|(i, raw)| {
                let offset = (i * TS_PACKET_SIZE) as u64;
                p.process_packet(offset, &TsPacket::new(raw, offset).unwrap())
            })
            .collect()
    }

    #[test]
    fn pat_selects_nonzero_program() {
        let mut p = PacketProcessor::new();
        feed(&mut p, &[section_packet(0, &pat_section(&[(0, 0x0010), (7, 0x0042)]))]);
        assert_eq!(p.pmt_pid(), Some(0x0042));
    }

    #[test]
    fn pmt_assigns_codecs() {
        let mut p = PacketProcessor::new();
        feed(
            &mut p,
            &[
                section_packet(0, &pat_section(&[(1, 0x1000)])),
                section_packet(0x1000, &pmt_section(1, 256, &[(0x1B, 256, &[]), (0x99, 300, &[]), (0x81, 301, &[])])),
            ],
        );
        assert_eq!(p.codec(256), Some(Codec::H264));
        assert_eq!(p.codec(300), None);
        assert_eq!(p.filter(300).unwrap().stream_type, Some(0x99));
        assert_eq!(p.codec(301), Some(Codec::Ac3));
        assert_eq!(p.pcr_pid(), Some(256));
    }

    #[test]
    fn pes_unit_runs_to_completion() {
        // PTS-only header, 14 bytes; 300 elementary bytes expected
        let mut start = vec![0x00, 0x00, 0x01, 0xE0, 0x01, 0x34, 0x80, 0x80, 0x05];
        start.extend_from_slice(&[0x21, 0x00, 0x01, 0x00, 0x01]);
        start.resize(184, 0xAA);

        let mut p = PacketProcessor::new();
        feed(
            &mut p,
            &[
                section_packet(0, &pat_section(&[(1, 0x1000)])),
                section_packet(0x1000, &pmt_section(1, 256, &[(0x1B, 256, &[])])),
                build_packet(256, true, 0, None, &start),
            ],
        );
        let pes = &p.filter(256).unwrap().pes;
        assert_eq!(pes.units, 1);
        assert_eq!(pes.last_pts, Some(0));
        assert!(!pes.is_complete());

        feed(&mut p, &[build_packet(256, false, 1, None, &[0xBB; 184])]);
        assert!(p.filter(256).unwrap().pes.is_complete());
    }

    #[test]
    fn pcr_samples_carry_offset_and_keyframe() {
        let mut p = PacketProcessor::new();
        let samples = feed(
            &mut p,
            &[
                section_packet(0, &pat_section(&[(1, 0x1000)])),
                section_packet(0x1000, &pmt_section(1, 256, &[(0x1B, 256, &[])])),
                pcr_packet(256, 0, AF_RANDOM_ACCESS, 90_000, 0),
                pcr_packet(256, 1, 0, 90_000 + 3_600, 0),
            ],
        );
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].offset, 2 * 188);
        assert!(samples[0].keyframe);
        assert_eq!(samples[0].pcr, 1_000_000_000);
        assert_eq!(samples[1].offset, 3 * 188);
        assert_eq!(samples[1].duration, 40_000_000);
        assert!(!samples[1].keyframe);
    }

    #[test]
    fn pcr_on_another_pid_is_still_tracked() {
        let mut p = PacketProcessor::new();
        let samples = feed(
            &mut p,
            &[
                pcr_packet(0x100, 0, 0, 90_000, 0),
                pcr_packet(0x200, 0, 0, 90_000 + 3_600, 0),
                pcr_packet(0x100, 1, 0, 90_000 + 7_200, 0),
            ],
        );
        let offsets: Vec<u64> = samples.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![0, 188, 2 * 188]);
        assert_eq!(samples[2].duration, 80_000_000);
        assert_eq!(p.pcr_pid(), Some(0x100));
        assert_eq!(p.clock().samples(), 3);
    }

    #[test]
    fn oversized_pmt_section_drops_pid_until_reset() {
        let mut p = PacketProcessor::new();
        let mut huge = vec![0u8, 0x02, 0xBF, 0xFF];
        huge.resize(184, 0);
        feed(
            &mut p,
            &[
                section_packet(0, &pat_section(&[(1, 0x1000)])),
                build_packet(0x1000, true, 0, None, &huge),
                build_packet(0x1000, false, 1, None, &[0xFF; 184]),
                section_packet(0x1000, &pmt_section(1, 256, &[(0x1B, 256, &[])])),
            ],
        );
        assert!(p.filter(0x1000).unwrap().section.is_invalid());
        assert_eq!(p.codec(256), None);

        p.reset_filter(0x1000);
        let raw = section_packet(0x1000, &pmt_section(1, 256, &[(0x1B, 256, &[])]));
        p.process_packet(188 * 4, &TsPacket::new(&raw, 0).unwrap());
        assert_eq!(p.codec(256), Some(Codec::H264));
    }
}
