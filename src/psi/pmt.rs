use crate::constants::TABLE_ID_PMT;
use crate::error::{PacerError, Result};
use crate::psi::section::SectionReader;

/// Program map of one program
#[derive(Debug, Clone)]
pub struct PmtSection {
    pub version: u8,
    pub program_number: u16,
    pub pcr_pid: u16,
    /// Raw program-level descriptor loop
    pub program_info: Vec<u8>,
    pub streams: Vec<PmtStream>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmtStream {
    pub stream_type: u8,
    pub elementary_pid: u16,
    /// Raw ES descriptor loop
    pub descriptors: Vec<u8>,
}

impl PmtStream {
    /// Tags of the descriptors in the ES loop, in order. A descriptor whose
    /// length runs past the loop ends the walk.
    pub fn descriptor_tags(&self) -> Vec<u8> {
        let mut tags = Vec::new();
        let mut rest = self.descriptors.as_slice();
        while let [tag, len, tail @ ..] = rest {
            let Some(next) = tail.get(*len as usize..) else { break };
            tags.push(*tag);
            rest = next;
        }
        tags
    }
}

fn pid13(hi: u8, lo: u8) -> u16 {
    u16::from_be_bytes([hi & 0x1F, lo])
}

fn len12(hi: u8, lo: u8) -> usize {
    usize::from(u16::from_be_bytes([hi & 0x0F, lo]))
}

/// Splits `len` bytes off the front of `buf`, failing with `what` when short.
fn take<'a>(buf: &mut &'a [u8], len: usize, what: &str) -> Result<&'a [u8]> {
    if buf.len() < len {
        return Err(PacerError::InvalidData(format!(
            "PMT {what} needs {len} bytes, {} left",
            buf.len()
        )));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

pub fn parse_pmt(section: &[u8]) -> Result<PmtSection> {
    let sec = SectionReader::new(section)?;
    if sec.table_id != TABLE_ID_PMT {
        return Err(PacerError::InvalidData(format!("not PMT (table id 0x{:02X})", sec.table_id)));
    }

    let mut rest = sec.body;
    let head = take(&mut rest, 4, "header")?;
    let pcr_pid = pid13(head[0], head[1]);
    let program_info = take(&mut rest, len12(head[2], head[3]), "program info")?.to_vec();

    let mut streams = Vec::new();
    while !rest.is_empty() {
        let entry = take(&mut rest, 5, "ES entry")?;
        let descriptors = take(&mut rest, len12(entry[3], entry[4]), "ES descriptors")?.to_vec();
        streams.push(PmtStream {
            stream_type: entry[0],
            elementary_pid: pid13(entry[1], entry[2]),
            descriptors,
        });
    }

    Ok(PmtSection {
        version: sec.version,
        program_number: sec.table_id_extension,
        pcr_pid,
        program_info,
        streams,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::psi::section::tests::build_section;
    use pretty_assertions::assert_eq;

    /// `streams` are (stream_type, pid, descriptor bytes)
    pub(crate) fn pmt_section(program: u16, pcr_pid: u16, streams: &[(u8, u16, &[u8])]) -> Vec<u8> {
        let mut body = vec![0xE0 | (pcr_pid >> 8) as u8, pcr_pid as u8, 0xF0, 0x00];
        for &(stype, pid, desc) in streams {
            body.push(stype);
            body.push(0xE0 | (pid >> 8) as u8);
            body.push(pid as u8);
            body.push(0xF0 | (desc.len() >> 8) as u8);
            body.push(desc.len() as u8);
            body.extend_from_slice(desc);
        }
        build_section(TABLE_ID_PMT, program, 0, &body)
    }

    #[test]
    fn streams_and_pcr_pid() {
        let s = pmt_section(7, 256, &[(0x1B, 256, &[0x28, 0x00]), (0x0F, 257, &[])]);
        let pmt = parse_pmt(&s).unwrap();
        assert_eq!(pmt.program_number, 7);
        assert_eq!(pmt.pcr_pid, 256);
        assert!(pmt.program_info.is_empty());
        assert_eq!(
            pmt.streams,
            vec![
                PmtStream { stream_type: 0x1B, elementary_pid: 256, descriptors: vec![0x28, 0x00] },
                PmtStream { stream_type: 0x0F, elementary_pid: 257, descriptors: vec![] },
            ]
        );
    }

    #[test]
    fn program_info_is_kept_apart_from_streams() {
        let body = [
            0xE1, 0x00, 0xF0, 0x06, // PCR PID 0x100, 6 bytes of program info
            0x09, 0x04, 0x0B, 0x00, 0xE2, 0x00, // CA descriptor
            0x02, 0xE1, 0x00, 0xF0, 0x03, // MPEG-2 video on 0x100
            0x52, 0x01, 0x07, // stream identifier
        ];
        let pmt = parse_pmt(&build_section(TABLE_ID_PMT, 3, 0, &body)).unwrap();
        assert_eq!(pmt.program_info, vec![0x09, 0x04, 0x0B, 0x00, 0xE2, 0x00]);
        assert_eq!(pmt.streams.len(), 1);
        assert_eq!(pmt.streams[0].elementary_pid, 0x100);
        assert_eq!(pmt.streams[0].descriptor_tags(), vec![0x52]);
    }

    #[test]
    fn descriptor_tags_stop_at_overrun() {
        let stream = PmtStream {
            stream_type: 0x1B,
            elementary_pid: 256,
            descriptors: vec![0x28, 0x00, 0x2A, 0x01, 0x00, 0x0A, 0x09, 0x65],
        };
        assert_eq!(stream.descriptor_tags(), vec![0x28, 0x2A]);
    }

    #[test]
    fn truncated_descriptor_loop_is_rejected() {
        // descriptor length points past the end of the body
        let s = pmt_section(1, 256, &[(0x1B, 256, &[]), (0x0F, 257, &[])]);
        let mut body = SectionReader::new(&s).unwrap().body.to_vec();
        body[4 + 4] = 0x20;
        let s = build_section(TABLE_ID_PMT, 1, 0, &body);
        assert!(matches!(parse_pmt(&s), Err(PacerError::InvalidData(_))));
    }

    #[test]
    fn dangling_es_entry_is_rejected() {
        let s = pmt_section(1, 256, &[(0x1B, 256, &[])]);
        let mut body = SectionReader::new(&s).unwrap().body.to_vec();
        body.extend_from_slice(&[0x0F, 0xE1]);
        let s = build_section(TABLE_ID_PMT, 1, 0, &body);
        assert!(matches!(parse_pmt(&s), Err(PacerError::InvalidData(_))));
    }

    #[test]
    fn program_info_overrun_is_rejected() {
        let body = [0xE1, 0x00, 0xF0, 0x10, 0x09, 0x04];
        assert!(parse_pmt(&build_section(TABLE_ID_PMT, 1, 0, &body)).is_err());
    }
}
