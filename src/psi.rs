//! PSI section reassembly, limited to the stream-type identification the core needs (PAT/PMT):
//! full PSI/SI semantic decoding is out of this crate's scope (see spec §1 Non-goals).

use crate::{read_bitfield, Error, Result, SliceReader};
use crc::{Crc, CRC_32_MPEG_2};
use modular_bitfield_msb::prelude::*;
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};

const CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// Fixed PSI section header (3 bytes, always present).
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct PsiHeader {
    /// Table identifier (`0x00` = PAT, `0x02` = PMT, others uninterpreted by this crate).
    pub table_id: B8,
    pub section_syntax_indicator: bool,
    pub private_bit: bool,
    pub reserved_bits: B2,
    #[skip]
    pub(crate) unused_bits: B2,
    /// Length of everything following this field, including the trailing CRC.
    pub section_length: B10,
}

/// Extended PSI syntax header (5 bytes), present whenever `section_syntax_indicator` is set.
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct PsiTableSyntax {
    pub table_id_extension: B16,
    pub reserved_bits: B2,
    pub version: B5,
    pub current_next_indicator: bool,
    pub section_num: B8,
    pub last_section_num: B8,
}

/// One PAT entry: a program number mapped to either the NIT PID (`program_num == 0`) or a PMT
/// PID.
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct PatEntry {
    pub program_num: B16,
    pub reserved: B3,
    pub program_map_pid: B13,
}

/// A descriptor TLV as found in PMT program-info and elementary-stream-info loops.
#[derive(Debug, Clone)]
pub struct Descriptor {
    /// Descriptor tag byte.
    pub tag: u8,
    /// Descriptor payload.
    pub data: SmallVec<[u8; 8]>,
}

impl Descriptor {
    fn read(reader: &mut SliceReader) -> Result<Self> {
        let tag = reader.read_u8()?;
        let len = reader.read_u8()? as usize;
        let mut data = SmallVec::<[u8; 8]>::new();
        data.extend_from_slice(reader.read(len)?);
        Ok(Self { tag, data })
    }
}

/// Fixed portion of a PMT section.
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct PmtHeader {
    pub reserved: B3,
    /// PID carrying this program's PCR.
    pub pcr_pid: B13,
    pub reserved2: B4,
    #[skip]
    pub(crate) unused_bits: B2,
    pub program_info_length: B10,
}

/// Fixed portion of one elementary-stream-info entry within a PMT.
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct ElementaryStreamInfoHeader {
    /// Stream type (e.g. `0x02` MPEG-2 video, `0x1B` H.264, `0x24` H.265).
    pub stream_type: B8,
    pub reserved: B3,
    pub elementary_pid: B13,
    pub reserved2: B4,
    #[skip]
    pub(crate) unused_bits: B2,
    pub es_info_length: B10,
}

/// One elementary stream entry in a PMT.
#[derive(Debug, Clone)]
pub struct ElementaryStreamInfo {
    /// Fixed fields.
    pub header: ElementaryStreamInfoHeader,
    /// Per-stream descriptors.
    pub es_descriptors: SmallVec<[Descriptor; 4]>,
}

/// Fully parsed PMT.
#[derive(Debug, Clone)]
pub struct Pmt {
    /// Fixed fields.
    pub header: PmtHeader,
    /// Program-level descriptors.
    pub program_descriptors: Vec<Descriptor>,
    /// One entry per elementary stream carried by this program.
    pub es_infos: Vec<ElementaryStreamInfo>,
}

/// Decoded PSI payload, by table type this crate understands.
#[derive(Debug, Clone)]
pub enum PsiData {
    /// Table id not specifically decoded; raw section payload (post-header, pre-CRC).
    Raw(Vec<u8>),
    /// Program Association Table entries.
    Pat(Vec<PatEntry>),
    /// Program Map Table.
    Pmt(Pmt),
}

/// One fully reassembled and CRC-checked PSI section.
#[derive(Debug, Clone)]
pub struct Psi {
    /// Fixed header.
    pub header: PsiHeader,
    /// Extended syntax header, if `header.section_syntax_indicator()`.
    pub table_syntax: Option<PsiTableSyntax>,
    /// Decoded payload.
    pub data: PsiData,
}

enum State {
    Idle,
    Accumulating {
        header: PsiHeader,
        table_syntax: Option<PsiTableSyntax>,
        data: Vec<u8>,
        expected_len: usize,
    },
}

/// Per-PID PSI section reassembly state machine.
pub struct PsiAssembler {
    state: State,
}

impl Default for PsiAssembler {
    fn default() -> Self {
        Self { state: State::Idle }
    }
}

impl PsiAssembler {
    /// Creates an assembler in the `Idle` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets to `Idle`, discarding any partially assembled section.
    pub fn reset(&mut self) {
        self.state = State::Idle;
    }

    /// Feeds one TS packet's payload. `pusi` is the packet's payload-unit-start flag; on a
    /// unit-start packet the first byte is the `pointer_field` (bytes to skip before the section
    /// starts), per ISO/IEC 13818-1.
    ///
    /// Returns `Ok(Some(psi))` once a section has been fully reassembled and its CRC verified.
    pub fn feed(&mut self, pusi: bool, payload: &[u8]) -> Result<Option<Psi>> {
        if pusi {
            let mut reader = SliceReader::new(payload);
            if reader.remaining_len() < 1 {
                return Err(Error::Protocol("short read of PSI pointer field".into()));
            }
            let pointer_field = reader.read_u8()?;
            reader.skip(pointer_field as usize)?;
            self.begin(&mut reader)?;
        } else if let State::Accumulating { .. } = &self.state {
            let mut reader = SliceReader::new(payload);
            self.append(&mut reader);
        }
        self.maybe_complete()
    }

    fn begin(&mut self, reader: &mut SliceReader) -> Result<()> {
        if reader.remaining_len() < 3 {
            self.state = State::Idle;
            return Err(Error::Protocol("short read of PSI header".into()));
        }
        let header: PsiHeader = read_bitfield!(reader, PsiHeader);
        let section_length = header.section_length() as usize;

        let table_syntax = if section_length > 0 && reader.remaining_len() >= 5 {
            Some(read_bitfield!(reader, PsiTableSyntax))
        } else {
            None
        };

        let mut data = Vec::with_capacity(section_length);
        data.extend_from_slice(reader.read_to_end().unwrap_or(&[]));
        self.state = State::Accumulating {
            header,
            table_syntax,
            data,
            expected_len: section_length,
        };
        Ok(())
    }

    fn append(&mut self, reader: &mut SliceReader) {
        if let State::Accumulating { data, .. } = &mut self.state {
            data.extend_from_slice(reader.read_to_end().unwrap_or(&[]));
        }
    }

    fn maybe_complete(&mut self) -> Result<Option<Psi>> {
        let ready = matches!(&self.state,
            State::Accumulating { data, table_syntax, expected_len, .. }
                if data.len() >= expected_len.saturating_sub(if table_syntax.is_some() { 5 } else { 0 }));
        if !ready {
            return Ok(None);
        }
        let (header, table_syntax, mut data) = match std::mem::replace(&mut self.state, State::Idle) {
            State::Accumulating {
                header,
                table_syntax,
                data,
                ..
            } => (header, table_syntax, data),
            State::Idle => unreachable!(),
        };

        if data.len() < 4 {
            return Err(Error::Protocol("PSI section shorter than its CRC".into()));
        }
        let len_minus_crc = data.len() - 4;
        let mut digest = CRC.digest();
        let header_bytes = header.into_bytes();
        digest.update(&header_bytes);
        if let Some(ts) = &table_syntax {
            digest.update(&ts.into_bytes());
        }
        digest.update(&data[..len_minus_crc]);
        let expected = digest.finalize();
        let actual = u32::from_be_bytes(data[len_minus_crc..].try_into().unwrap());
        if expected != actual {
            return Err(Error::Protocol("PSI CRC mismatch".into()));
        }
        data.truncate(len_minus_crc);

        let parsed = decode_table(&header, &data)?;
        Ok(Some(Psi {
            header,
            table_syntax,
            data: parsed,
        }))
    }
}

fn decode_table(header: &PsiHeader, data: &[u8]) -> Result<PsiData> {
    match header.table_id() {
        0x00 => {
            let mut reader = SliceReader::new(data);
            let mut entries = Vec::with_capacity(reader.remaining_len() / 4);
            while reader.remaining_len() >= 4 {
                entries.push(read_bitfield!(reader, PatEntry));
            }
            Ok(PsiData::Pat(entries))
        }
        0x02 => {
            let mut reader = SliceReader::new(data);
            let header = read_bitfield!(reader, PmtHeader);
            let mut pmt = Pmt {
                header,
                program_descriptors: Vec::new(),
                es_infos: Vec::new(),
            };
            let mut info_reader = reader.new_sub_reader(pmt.header.program_info_length() as usize)?;
            while info_reader.remaining_len() > 0 {
                pmt.program_descriptors.push(Descriptor::read(&mut info_reader)?);
            }
            while reader.remaining_len() > 0 {
                let es_header: ElementaryStreamInfoHeader = read_bitfield!(reader, ElementaryStreamInfoHeader);
                let mut es_info = ElementaryStreamInfo {
                    header: es_header,
                    es_descriptors: SmallVec::new(),
                };
                let mut es_reader = reader.new_sub_reader(es_info.header.es_info_length() as usize)?;
                while es_reader.remaining_len() > 0 {
                    es_info.es_descriptors.push(Descriptor::read(&mut es_reader)?);
                }
                pmt.es_infos.push(es_info);
            }
            Ok(PsiData::Pmt(pmt))
        }
        _ => Ok(PsiData::Raw(data.to_vec())),
    }
}

/// Tracks PAT-learned PMT PIDs across a transport stream so PMT sections can be routed to the
/// right assembler without the caller maintaining that bookkeeping itself.
#[derive(Default)]
pub struct PsiDemux {
    assemblers: HashMap<u16, PsiAssembler>,
    known_pmt_pids: HashSet<u16>,
}

impl PsiDemux {
    /// Creates a demultiplexer with no PIDs registered yet (PID 0, the PAT, is always accepted).
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if `pid` is PID 0 (PAT) or a PID this demux has learned is a PMT.
    pub fn is_psi_pid(&self, pid: u16) -> bool {
        pid == 0 || self.known_pmt_pids.contains(&pid)
    }

    /// Feeds one packet's payload for `pid`. Learns PMT PIDs from PAT sections as they complete.
    pub fn feed(&mut self, pid: u16, pusi: bool, payload: &[u8]) -> Result<Option<Psi>> {
        let assembler = self.assemblers.entry(pid).or_insert_with(PsiAssembler::new);
        let psi = assembler.feed(pusi, payload)?;
        if let Some(Psi {
            data: PsiData::Pat(entries),
            ..
        }) = &psi
        {
            self.known_pmt_pids.clear();
            for entry in entries {
                if entry.program_num() != 0 {
                    self.known_pmt_pids.insert(entry.program_map_pid());
                }
            }
        }
        Ok(psi)
    }
}
