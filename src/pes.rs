//! PES framing tracker: follows unit boundaries and timestamps on an
//! elementary PID without copying the elementary-stream bytes.

use bitstream_io::{BigEndian, BitRead, BitReader};

use crate::constants::{PES_FIXED_HEADER, PES_START_CODE};

/// Parsed PES header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PesHeader {
    pub stream_id: u8,
    /// PES_packet_length; 0 means unbounded (video)
    pub packet_length: u16,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    /// Bytes before the elementary payload
    pub header_len: usize,
}

impl PesHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < PES_FIXED_HEADER || data[..3] != PES_START_CODE {
            return None;
        }
        let stream_id = data[3];
        let packet_length = u16::from_be_bytes([data[4], data[5]]);
        let flags = (data[7] & 0xC0) >> 6;
        let header_len = PES_FIXED_HEADER + data[8] as usize;

        let pts = if flags & 0b10 != 0 { parse_timestamp(data.get(9..14)?) } else { None };
        let dts = if flags == 0b11 { parse_timestamp(data.get(14..19)?) } else { None };

        Some(Self { stream_id, packet_length, pts, dts, header_len })
    }
}

/// 33-bit 90 kHz timestamp spread over 5 bytes with marker bits
fn parse_timestamp(p: &[u8]) -> Option<u64> {
    let mut br = BitReader::endian(p, BigEndian);
    br.skip(4).ok()?; // '0010' / '0011' prefix
    let hi = br.read::<3, u64>().ok()?;
    br.skip(1).ok()?;
    let mid = br.read::<15, u64>().ok()?;
    br.skip(1).ok()?;
    let lo = br.read::<15, u64>().ok()?;
    Some((hi << 30) | (mid << 15) | lo)
}

/// Per-PID PES unit state
#[derive(Debug, Default)]
pub struct PesState {
    pub header: Option<PesHeader>,
    /// Elementary bytes seen in the current unit
    pub pos: usize,
    /// Expected elementary bytes in the current unit; 0 while unbounded
    pub size: usize,
    pub units: u64,
    pub last_pts: Option<u64>,
}

impl PesState {
    /// Feeds one payload; returns true when a new unit started.
    pub fn push(&mut self, payload_unit_start: bool, payload: &[u8]) -> bool {
        if payload_unit_start {
            if let Some(h) = PesHeader::parse(payload) {
                self.size = (h.packet_length as usize + 6).saturating_sub(h.header_len);
                if h.packet_length == 0 {
                    self.size = 0;
                }
                self.pos = payload.len().saturating_sub(h.header_len);
                if h.pts.is_some() {
                    self.last_pts = h.pts;
                }
                self.header = Some(h);
                self.units += 1;
                return true;
            }
            self.header = None;
            self.pos = 0;
            self.size = 0;
            return false;
        }
        if self.header.is_some() {
            self.pos += payload.len();
        }
        false
    }

    /// True once a bounded unit has received all its bytes.
    pub fn is_complete(&self) -> bool {
        self.size > 0 && self.pos >= self.size
    }
}
