//! Random-access index: one record per PCR-bearing packet, written as
//! newline-delimited JSON.

use std::io::{BufRead, Read, Write};

use log::info;

use crate::error::Result;
use crate::packet::{PacketReader, SyncPolicy};
use crate::processor::PacketProcessor;
use crate::types::{ClockSample, IndexRecord};

/// Serializes index records in stream order.
pub struct IndexBuilder<W: Write> {
    writer: W,
    records: u64,
    last_offset: Option<u64>,
}

impl<W: Write> IndexBuilder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, records: 0, last_offset: None }
    }

    pub fn push(&mut self, sample: ClockSample) -> Result<()> {
        debug_assert!(self.last_offset.is_none_or(|o| o < sample.offset));
        let record = IndexRecord::from(sample);
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        self.records += 1;
        self.last_offset = Some(sample.offset);
        Ok(())
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Outcome of an indexing pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSummary {
    pub records: u64,
    pub duration: i64,
    pub anomalies: u64,
    pub bytes: u64,
}

/// Reads a whole transport stream and writes its index.
pub fn build_index<R: Read, W: Write>(reader: R, writer: W, policy: SyncPolicy) -> Result<IndexSummary> {
    let mut packets = PacketReader::new(reader, policy);
    let mut processor = PacketProcessor::new();
    let mut builder = IndexBuilder::new(writer);

    processor.run(&mut packets, |sample| builder.push(sample))?;

    let summary = IndexSummary {
        records: builder.records(),
        duration: processor.clock().duration(),
        anomalies: processor.clock().anomalies(),
        bytes: packets.offset(),
    };
    builder.finish()?;
    info!(
        "indexed {} bytes: {} records, duration {} ns, {} clock anomalies",
        summary.bytes, summary.records, summary.duration, summary.anomalies
    );
    Ok(summary)
}

/// A loaded index, answering seek queries.
#[derive(Debug, Default, Clone)]
pub struct Index {
    records: Vec<IndexRecord>,
}

impl Index {
    /// Loads newline-delimited records; blank lines are skipped.
    pub fn load<R: BufRead>(reader: R) -> Result<Self> {
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(Self { records })
    }

    pub fn records(&self) -> &[IndexRecord] {
        &self.records
    }

    pub fn duration(&self) -> i64 {
        self.records.last().map_or(0, |r| r.duration)
    }

    /// Last record at or before `duration` ns of presentation time.
    pub fn seek(&self, duration: i64) -> Option<&IndexRecord> {
        let idx = self.records.partition_point(|r| r.duration <= duration);
        idx.checked_sub(1).map(|i| &self.records[i])
    }

    /// Like [`Index::seek`] but only lands on records flagged as keyframes.
    pub fn seek_keyframe(&self, duration: i64) -> Option<&IndexRecord> {
        let idx = self.records.partition_point(|r| r.duration <= duration);
        self.records[..idx].iter().rev().find(|r| r.keyframe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::AF_RANDOM_ACCESS;
    use crate::packet::tests::pcr_packet;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    #[test]
    fn one_json_object_per_line() {
        let mut b = IndexBuilder::new(Vec::new());
        b.push(ClockSample { offset: 0, pcr: 10, duration: 0, keyframe: true, anomaly: false }).unwrap();
        b.push(ClockSample { offset: 188, pcr: 20, duration: 10, keyframe: false, anomaly: false }).unwrap();
        let out = String::from_utf8(b.finish().unwrap()).unwrap();
        assert_eq!(
            out,
            "{\"d\":0,\"p\":10,\"o\":0,\"k\":true}\n{\"d\":10,\"p\":20,\"o\":188,\"k\":false}\n"
        );
    }

    #[test]
    fn build_and_seek() {
        let mut ts = Vec::new();
        for i in 0..5u64 {
            let flags = if i % 2 == 0 { AF_RANDOM_ACCESS } else { 0 };
            ts.extend(pcr_packet(0x100, i as u8, flags, i * 3_600, 0)); // 40 ms apart
        }
        let mut out = Vec::new();
        let summary = build_index(Cursor::new(ts), &mut out, SyncPolicy::Skip).unwrap();
        assert_eq!(summary.records, 5);
        assert_eq!(summary.duration, 160_000_000);
        assert_eq!(summary.bytes, 5 * 188);

        let index = Index::load(Cursor::new(out)).unwrap();
        let offsets: Vec<u64> = index.records().iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![0, 188, 376, 564, 752]);
        assert_eq!(index.seek(-1), None);
        assert_eq!(index.seek(100_000_000).unwrap().offset, 376);
        assert_eq!(index.seek_keyframe(130_000_000).unwrap().offset, 376);
        assert_eq!(index.seek_keyframe(119_999_999).unwrap().offset, 376);
        assert_eq!(index.seek(i64::MAX).unwrap().offset, 752);
    }
}
