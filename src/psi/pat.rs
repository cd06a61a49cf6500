use crate::constants::TABLE_ID_PAT;
use crate::error::{PacerError, Result};
use crate::psi::section::SectionReader;

/// ─────────── PAT ───────────
#[derive(Debug, Clone)]
pub struct PatSection {
    pub transport_stream_id: u16,
    pub version: u8,
    pub current_next: bool,
    pub programs: Vec<PatEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    pub program_number: u16,
    pub pmt_pid: u16,
}

impl PatSection {
    /// PMT PID of the first program; program 0 (network PID) never appears here.
    pub fn pmt_pid(&self) -> Option<u16> {
        self.programs.first().map(|e| e.pmt_pid)
    }

    pub fn program_for(&self, pmt_pid: u16) -> Option<u16> {
        self.programs
            .iter()
            .find(|e| e.pmt_pid == pmt_pid)
            .map(|e| e.program_number)
    }
}

pub fn parse_pat(section: &[u8]) -> Result<PatSection> {
    let sec = SectionReader::new(section)?;
    if sec.table_id != TABLE_ID_PAT {
        return Err(PacerError::InvalidData(format!("not PAT (table id 0x{:02X})", sec.table_id)));
    }

    let programs = sec
        .body
        .chunks_exact(4)
        .map(|e| PatEntry {
            program_number: u16::from_be_bytes([e[0], e[1]]),
            pmt_pid: (((e[2] & 0x1F) as u16) << 8) | (e[3] as u16),
        })
        .filter(|e| e.program_number != 0)
        .collect();

    Ok(PatSection {
        transport_stream_id: sec.table_id_extension,
        version: sec.version,
        current_next: sec.current_next,
        programs,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::psi::section::tests::build_section;
    use pretty_assertions::assert_eq;

    pub(crate) fn pat_section(entries: &[(u16, u16)]) -> Vec<u8> {
        let mut body = Vec::new();
        for &(program, pid) in entries {
            body.extend_from_slice(&program.to_be_bytes());
            body.push(0xE0 | (pid >> 8) as u8);
            body.push(pid as u8);
        }
        build_section(TABLE_ID_PAT, 1, 0, &body)
    }

    #[test]
    fn network_entry_is_ignored() {
        let pat = parse_pat(&pat_section(&[(0, 0x0010), (7, 0x1000)])).unwrap();
        assert_eq!(pat.programs, vec![PatEntry { program_number: 7, pmt_pid: 0x1000 }]);
        assert_eq!(pat.pmt_pid(), Some(0x1000));
        assert_eq!(pat.program_for(0x1000), Some(7));
    }

    #[test]
    fn wrong_table_id() {
        let s = build_section(0x02, 1, 0, &[0, 1, 0xE1, 0x00]);
        assert!(parse_pat(&s).is_err());
    }
}
