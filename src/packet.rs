//! Transport packet framing: fixed 188-byte stride, header fields and the
//! adaptation-field PCR.

use std::io::{BufReader, ErrorKind, Read};

use bitstream_io::{BigEndian, BitRead, BitReader};
use log::{info, warn};

use crate::constants::*;
use crate::error::{PacerError, Result};

/// Program clock reference as carried in the adaptation field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pcr {
    /// 33-bit, 90 kHz
    pub base: u64,
    /// 9-bit, 27 MHz
    pub extension: u16,
}

impl Pcr {
    /// 42-bit counter in the 27 MHz domain.
    pub fn ticks(&self) -> u64 {
        self.base * 300 + self.extension as u64
    }

    pub fn nanos(&self) -> i64 {
        ticks_to_ns(self.ticks())
    }

    /// Decodes the 6 PCR bytes that follow the adaptation flags.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 6 {
            return None;
        }
        let mut br = BitReader::endian(&bytes[..6], BigEndian);
        let base = br.read::<33, u64>().ok()?;
        br.skip(6).ok()?; // reserved
        let extension = br.read::<9, u16>().ok()?;
        Some(Self { base, extension })
    }
}

/// Borrowed view over the adaptation field (without its length byte).
#[derive(Debug, Clone, Copy)]
pub struct AdaptationField<'a> {
    data: &'a [u8],
}

impl<'a> AdaptationField<'a> {
    pub fn flags(&self) -> u8 {
        self.data.first().copied().unwrap_or(0)
    }

    pub fn discontinuity(&self) -> bool {
        self.flags() & AF_DISCONTINUITY != 0
    }

    pub fn random_access(&self) -> bool {
        self.flags() & AF_RANDOM_ACCESS != 0
    }

    pub fn pcr(&self) -> Option<Pcr> {
        if self.flags() & AF_PCR_FLAG == 0 {
            return None;
        }
        Pcr::parse(self.data.get(1..)?)
    }
}

/// A single 188-byte transport packet.
#[derive(Clone)]
pub struct TsPacket {
    data: [u8; TS_PACKET_SIZE],
}

impl TsPacket {
    /// Copies one packet out of `bytes`, checking length and sync byte.
    pub fn new(bytes: &[u8], offset: u64) -> Result<Self> {
        let data: [u8; TS_PACKET_SIZE] = bytes
            .get(..TS_PACKET_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| PacerError::InvalidData(format!("short packet at offset {offset}")))?;
        if data[0] != TS_SYNC_BYTE {
            return Err(PacerError::Sync { offset, found: data[0] });
        }
        Ok(Self { data })
    }

    pub fn pid(&self) -> u16 {
        (((self.data[1] & 0x1F) as u16) << 8) | (self.data[2] as u16)
    }

    pub fn transport_error(&self) -> bool {
        self.data[1] & 0x80 != 0
    }

    pub fn payload_unit_start(&self) -> bool {
        self.data[1] & 0x40 != 0
    }

    pub fn has_adaptation(&self) -> bool {
        self.data[3] & 0x20 != 0
    }

    pub fn has_payload(&self) -> bool {
        self.data[3] & 0x10 != 0
    }

    pub fn continuity_counter(&self) -> u8 {
        self.data[3] & 0x0F
    }

    fn adaptation_len(&self) -> usize {
        if self.has_adaptation() { 1 + self.data[4] as usize } else { 0 }
    }

    pub fn adaptation_field(&self) -> Option<AdaptationField<'_>> {
        if !self.has_adaptation() {
            return None;
        }
        let len = self.data[4] as usize;
        if len == 0 || 5 + len > TS_PACKET_SIZE {
            return None;
        }
        Some(AdaptationField { data: &self.data[5..5 + len] })
    }

    pub fn pcr(&self) -> Option<Pcr> {
        self.adaptation_field()?.pcr()
    }

    pub fn payload(&self) -> Option<&[u8]> {
        if !self.has_payload() {
            return None;
        }
        let start = 4 + self.adaptation_len();
        if start >= TS_PACKET_SIZE {
            return None;
        }
        Some(&self.data[start..])
    }
}

/// What to do with a packet whose sync byte is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    #[default]
    Skip,
    Abort,
}

/// Reads packets from a byte source by fixed stride.
pub struct PacketReader<R: Read> {
    inner: BufReader<R>,
    offset: u64,
    policy: SyncPolicy,
    sync_errors: u64,
}

impl<R: Read> PacketReader<R> {
    pub fn new(reader: R, policy: SyncPolicy) -> Self {
        Self {
            inner: BufReader::with_capacity(READ_AHEAD_SIZE, reader),
            offset: 0,
            policy,
            sync_errors: 0,
        }
    }

    /// Byte offset of the next packet to be read.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn sync_errors(&self) -> u64 {
        self.sync_errors
    }

    /// Returns the next packet and its starting offset, or `None` at end of stream.
    pub fn next_packet(&mut self) -> Result<Option<(u64, TsPacket)>> {
        let mut buf = [0u8; TS_PACKET_SIZE];
        loop {
            let filled = self.fill(&mut buf)?;
            if filled == 0 {
                info!("read finished at offset {}", self.offset);
                return Ok(None);
            }
            if filled < TS_PACKET_SIZE {
                warn!("dropping {filled} trailing bytes at offset {}", self.offset);
                self.offset += filled as u64;
                return Ok(None);
            }

            let offset = self.offset;
            self.offset += TS_PACKET_SIZE as u64;
            match TsPacket::new(&buf, offset) {
                Ok(pkt) => return Ok(Some((offset, pkt))),
                Err(e @ PacerError::Sync { .. }) => {
                    self.sync_errors += 1;
                    warn!("{e}");
                    if self.policy == SyncPolicy::Abort {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> Iterator for PacketReader<R> {
    type Item = Result<(u64, TsPacket)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_packet().transpose()
    }
}
