//! Report generation for a demultiplexing pass

use std::io::Read;

use crate::error::Result;
use crate::packet::{PacketReader, SyncPolicy};
use crate::processor::PacketProcessor;
use crate::types::{ClockInfo, ProbeReport, ProgramInfo, StreamInfo};

/// Report generator for probe results
pub struct Reporter;

impl Reporter {
    /// Generate a structured ProbeReport for API consumers
    pub fn create_report(processor: &PacketProcessor, sync_errors: u64) -> ProbeReport {
        let mut programs = Vec::new();

        if let (Some(pat), Some(pmt)) = (processor.pat(), processor.pmt()) {
            let pmt_pid = processor.pmt_pid().unwrap_or_default();
            let streams = pmt
                .streams
                .iter()
                .map(|s| {
                    let stats = processor.stats().get(s.elementary_pid).cloned().unwrap_or_default();
                    StreamInfo {
                        pid: s.elementary_pid,
                        stream_type: s.stream_type,
                        codec: processor.codec(s.elementary_pid),
                        packets: stats.packets,
                        continuity_errors: stats.continuity_errors,
                        pes_units: processor.filter(s.elementary_pid).map_or(0, |f| f.pes.units),
                        last_pts: processor.filter(s.elementary_pid).and_then(|f| f.pes.last_pts),
                        descriptor_tags: s.descriptor_tags(),
                    }
                })
                .collect();

            programs.push(ProgramInfo {
                program_number: pat.program_for(pmt_pid).unwrap_or(pmt.program_number),
                pmt_pid,
                pcr_pid: processor.pcr_pid(),
                pmt_version: Some(pmt.version),
                streams,
            });
        }

        let clock = processor.clock();
        ProbeReport {
            timestamp: chrono::Utc::now().to_rfc3339(),
            bytes: processor.bytes(),
            packets: processor.stats().total_packets(),
            sync_errors,
            programs,
            clock: ClockInfo {
                pcr_count: clock.samples(),
                anomalies: clock.anomalies(),
                duration_ns: clock.duration(),
                first_pcr_ns: clock.first_pcr(),
                bitrate_bps: clock.bitrate(),
            },
        }
    }

    /// Generate pretty-printed JSON string for CLI output
    pub fn generate_json_report(report: &ProbeReport) -> String {
        serde_json::to_string_pretty(report)
            .unwrap_or_else(|_| "{\"error\": \"JSON serialization failed\"}".to_string())
    }
}

/// Demultiplexes a whole source and reports what was found.
pub fn probe<R: Read>(reader: R, policy: SyncPolicy) -> Result<ProbeReport> {
    let mut packets = PacketReader::new(reader, policy);
    let mut processor = PacketProcessor::new();
    processor.run(&mut packets, |_| Ok(()))?;
    Ok(Reporter::create_report(&processor, packets.sync_errors()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::AF_RANDOM_ACCESS;
    use crate::packet::tests::pcr_packet;
    use crate::processor::tests::section_packet;
    use crate::psi::pat::tests::pat_section;
    use crate::psi::pmt::tests::pmt_section;
    use crate::types::Codec;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    #[test]
    fn probe_reports_program_and_clock() {
        let mut ts = Vec::new();
        ts.extend(section_packet(0, &pat_section(&[(0, 0x10), (3, 0x1000)])));
        ts.extend(section_packet(0x1000, &pmt_section(3, 0x100, &[(0x1B, 0x100, &[0x28, 0x00]), (0x0F, 0x101, &[])])));
        ts.extend(pcr_packet(0x100, 0, AF_RANDOM_ACCESS, 0, 0));
        ts.extend(pcr_packet(0x100, 1, 0, 9_000, 0));

        let report = probe(Cursor::new(ts), SyncPolicy::Skip).unwrap();
        assert_eq!(report.bytes, 4 * 188);
        assert_eq!(report.packets, 4);
        assert_eq!(report.programs.len(), 1);
        let program = &report.programs[0];
        assert_eq!(program.program_number, 3);
        assert_eq!(program.pmt_pid, 0x1000);
        assert_eq!(program.pcr_pid, Some(0x100));
        let codecs: Vec<Option<Codec>> = program.streams.iter().map(|s| s.codec).collect();
        assert_eq!(codecs, vec![Some(Codec::H264), Some(Codec::Aac)]);
        assert_eq!(program.streams[0].descriptor_tags, vec![0x28]);
        assert!(program.streams[1].descriptor_tags.is_empty());
        assert_eq!(report.clock.pcr_count, 2);
        assert_eq!(report.clock.duration_ns, 100_000_000);

        let json = Reporter::generate_json_report(&report);
        assert!(json.contains("\"pcr_pid\": 256"));
    }
}
