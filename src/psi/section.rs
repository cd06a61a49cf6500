// psi/section.rs
//! PSI section reassembly across packets and the generic section header
//! reader with CRC-32 (MPEG-2) validation.

use crc::{CRC_32_MPEG_2, Crc};
use log::warn;

use crate::constants::{CRC_SIZE, MAX_SECTION_SIZE, SECTION_HEADER_SIZE};
use crate::error::{PacerError, Result};

const CRC_MPEG: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// Returned by [`SectionReader::new`].
pub struct SectionReader<'a> {
    pub table_id: u8,
    pub version: u8,
    pub current_next: bool,
    pub section_number: u8,
    pub last_section: u8,
    /// transport_stream_id for a PAT, program_number for a PMT
    pub table_id_extension: u16,
    pub body: &'a [u8], // bytes between fixed header & CRC
}

impl<'a> SectionReader<'a> {
    /// Takes one complete section starting at `table_id`; validates length and CRC-32.
    pub fn new(section: &'a [u8]) -> Result<Self> {
        if section.len() < SECTION_HEADER_SIZE + CRC_SIZE {
            return Err(PacerError::InvalidData("short section".into()));
        }
        let sec_len = (((section[1] & 0x0F) as usize) << 8) | section[2] as usize;
        let end = 3 + sec_len;
        if sec_len < 5 + CRC_SIZE || end > section.len() {
            return Err(PacerError::InvalidData(format!("invalid section_length {sec_len}")));
        }

        let crc_calc = CRC_MPEG.checksum(&section[..end - CRC_SIZE]);
        let crc_pkt = u32::from_be_bytes([
            section[end - 4],
            section[end - 3],
            section[end - 2],
            section[end - 1],
        ]);
        if crc_calc != crc_pkt {
            return Err(PacerError::InvalidData(format!(
                "CRC-32 mismatch (0x{crc_pkt:08X} != 0x{crc_calc:08X})"
            )));
        }

        Ok(Self {
            table_id: section[0],
            table_id_extension: u16::from_be_bytes([section[3], section[4]]),
            version: (section[5] & 0x3E) >> 1,
            current_next: section[5] & 0x01 != 0,
            section_number: section[6],
            last_section: section[7],
            body: &section[SECTION_HEADER_SIZE..end - CRC_SIZE],
        })
    }
}

/// Accumulates one PID's section bytes until a whole section is available.
#[derive(Debug, Default)]
pub struct SectionFilter {
    data: Vec<u8>,
    /// declared section size incl. 3-byte header; 0 while unknown
    size: usize,
    invalid: bool,
}

impl SectionFilter {
    pub fn is_invalid(&self) -> bool {
        self.invalid
    }

    /// Clears buffered bytes and the invalid mark.
    pub fn reset(&mut self) {
        self.data.clear();
        self.size = 0;
        self.invalid = false;
    }

    /// Feeds one packet payload and returns the sections it completed.
    pub fn push(&mut self, pid: u16, payload_unit_start: bool, payload: &[u8]) -> Vec<Vec<u8>> {
        let mut done = Vec::new();
        if self.invalid {
            return done;
        }

        let mut rest = payload;
        if payload_unit_start {
            let Some((&pointer, after)) = payload.split_first() else {
                return done;
            };
            let pointer = pointer as usize;
            if pointer > after.len() {
                return done;
            }
            // bytes ahead of the pointer close the section in progress
            if !self.data.is_empty() {
                if let Some(section) = self.append(pid, &after[..pointer]) {
                    done.push(section);
                }
            }
            if self.invalid {
                return done;
            }
            self.data.clear();
            self.size = 0;
            rest = &after[pointer..];
        } else if self.data.is_empty() {
            // continuation without a start: nothing to attach to
            return done;
        }

        if let Some(section) = self.append(pid, rest) {
            done.push(section);
        }
        done
    }

    fn append(&mut self, pid: u16, bytes: &[u8]) -> Option<Vec<u8>> {
        self.data.extend_from_slice(bytes);
        if self.size == 0 && self.data.len() >= 3 {
            let size = ((((self.data[1] & 0x0F) as usize) << 8) | self.data[2] as usize) + 3;
            if size > MAX_SECTION_SIZE {
                warn!("PID 0x{pid:04X}: section size {size} exceeds {MAX_SECTION_SIZE}, filter disabled");
                self.data = Vec::new();
                self.invalid = true;
                return None;
            }
            self.size = size;
        }
        if self.size > 0 && self.data.len() >= self.size {
            let mut section = std::mem::take(&mut self.data);
            section.truncate(self.size);
            self.size = 0;
            return Some(section);
        }
        None
    }
}
