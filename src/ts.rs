//! MPEG-2 Transport Stream packet parsing (ISO/IEC 13818-1): the 188-byte link-layer header,
//! optional adaptation field, and payload slice.
//!
//! This is a single-packet parser: it does not reassemble PSI sections or PES packets (see
//! [`crate::pes`] and [`crate::epg`]'s sibling [`crate::video`] consumers for that), it only
//! decodes the fixed header fields and hands back a borrowed view of the payload.

use crate::SliceReader;
use crate::{read_bitfield, Error, Result};
use modular_bitfield_msb::prelude::*;

/// Size in bytes of one MPEG-2 TS packet.
pub const PACKET_SIZE: usize = 188;

/// PID value reserved for null (stuffing) packets.
pub const PID_NULL: u16 = 0x1FFF;

/// Scrambling-control field of a TS packet.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, BitfieldSpecifier)]
#[bits = 2]
pub enum TransportScramblingControl {
    /// Not scrambled.
    NotScrambled,
    /// Reserved value; do not use.
    Reserved,
    /// Scrambled with the even key.
    ScrambledEvenKey,
    /// Scrambled with the odd key.
    ScrambledOddKey,
}

impl TransportScramblingControl {
    /// `true` unless the packet is [`TransportScramblingControl::NotScrambled`].
    pub fn is_scrambled(self) -> bool {
        !matches!(self, TransportScramblingControl::NotScrambled)
    }
}

/// Link-layer header found at the start of every 188-byte TS packet.
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct PacketHeader {
    /// Must equal `0x47`; anything else indicates loss of sync.
    pub sync_byte: B8,
    /// Transport error indicator.
    pub tei: bool,
    /// Payload-unit-start indicator: this packet contains the first byte of a new PSI section or
    /// PES packet.
    pub pusi: bool,
    /// Transport priority.
    pub priority: bool,
    /// 13-bit packet identifier.
    pub pid: B13,
    /// Scrambling control.
    pub tsc: TransportScramblingControl,
    pub(crate) has_adaptation_field: bool,
    pub(crate) has_payload: bool,
    /// 4-bit continuity counter, incrementing per PID on packets carrying a payload.
    pub continuity_counter: B4,
}

/// Header of the optional adaptation field.
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct AdaptationFieldHeader {
    /// Number of bytes following this field, `0..=182`. Note this length byte itself is not
    /// included.
    pub length: B8,
    pub discontinuity: bool,
    pub random_access: bool,
    pub priority: bool,
    pub(crate) has_pcr: bool,
    pub(crate) has_opcr: bool,
    pub has_splice_countdown: bool,
    pub has_transport_private_data: bool,
    pub has_adaptation_field_extension: bool,
}

/// A 42-bit Program Clock Reference: a 33-bit 90kHz base plus a 9-bit 27MHz extension.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PcrTimestamp {
    /// 33-bit base, a 90kHz clock. Format with [`crate::pts_format_args`].
    pub base: u64,
    /// 9-bit extension, rolling over every 300 counts to the base.
    pub extension: u16,
}

fn parse_pcr(b: &[u8; 6]) -> PcrTimestamp {
    let mut base: u64 = (b[0] as u64) << 25;
    base |= (b[1] as u64) << 17;
    base |= (b[2] as u64) << 9;
    base |= (b[3] as u64) << 1;
    base |= (b[4] as u64) >> 7;
    let mut extension: u16 = ((b[4] & 0x1) as u16) << 8;
    extension |= b[5] as u16;
    PcrTimestamp { base, extension }
}

/// Non-payload packet metadata.
#[derive(Debug, Clone)]
pub struct AdaptationField {
    /// Header describing which optional fields are present.
    pub header: AdaptationFieldHeader,
    /// Program Clock Reference, if present.
    pub pcr: Option<PcrTimestamp>,
    /// Original Program Clock Reference, if present.
    pub opcr: Option<PcrTimestamp>,
}

/// Fully parsed view of one TS packet, borrowing its payload from the source buffer.
#[derive(Debug, Clone)]
pub struct Packet<'a> {
    /// Link-layer header.
    pub header: PacketHeader,
    /// Adaptation field, if `header.has_adaptation_field()`.
    pub adaptation_field: Option<AdaptationField>,
    /// Payload slice, if `header.has_payload()` and the payload is non-empty.
    pub payload: Option<&'a [u8]>,
}

impl<'a> Packet<'a> {
    /// 13-bit PID of this packet.
    pub fn pid(&self) -> u16 {
        self.header.pid()
    }

    /// `true` if this is a stuffing (null) packet.
    pub fn is_null(&self) -> bool {
        self.pid() == PID_NULL
    }

    /// `true` if the payload is scrambled (not usable without descrambling, out of this crate's
    /// scope).
    pub fn is_scrambled(&self) -> bool {
        self.header.tsc().is_scrambled()
    }
}

/// Stateless parser for single 188-byte TS packets.
#[derive(Debug, Default, Clone, Copy)]
pub struct MpegTsParser;

impl MpegTsParser {
    /// Creates a parser. Carries no state of its own (continuity/loss accounting is the
    /// caller's concern, see [`crate::filter`]'s recorder statistics).
    pub fn new() -> Self {
        Self
    }

    fn read_adaptation_field<'a>(
        &self,
        reader: &mut SliceReader<'a>,
    ) -> Result<AdaptationField> {
        let header: AdaptationFieldHeader = read_bitfield!(reader, AdaptationFieldHeader);
        let length = header.length() as usize;
        if length == 0 {
            return Ok(AdaptationField {
                header,
                pcr: None,
                opcr: None,
            });
        }
        let mut sub = reader.new_sub_reader(length)?;
        let mut out = AdaptationField {
            header,
            pcr: None,
            opcr: None,
        };
        if out.header.has_pcr() {
            if sub.remaining_len() < 6 {
                return Err(sub.make_error("short read of PCR"));
            }
            out.pcr = Some(parse_pcr(sub.read_array_ref::<6>()?));
        }
        if out.header.has_opcr() {
            if sub.remaining_len() < 6 {
                return Err(sub.make_error("short read of OPCR"));
            }
            out.opcr = Some(parse_pcr(sub.read_array_ref::<6>()?));
        }
        Ok(out)
    }

    /// Parses exactly one 188-byte TS packet.
    pub fn parse<'a>(&self, packet: &'a [u8; PACKET_SIZE]) -> Result<Packet<'a>> {
        let mut reader = SliceReader::new(packet);
        let header: PacketHeader = read_bitfield!(reader, PacketHeader);
        if header.sync_byte() != 0x47 {
            return Err(Error::Protocol("lost TS sync byte".into()));
        }

        let mut out = Packet {
            header,
            adaptation_field: None,
            payload: None,
        };

        if out.pid() == PID_NULL {
            return Ok(out);
        }

        if header.has_adaptation_field() {
            out.adaptation_field = Some(self.read_adaptation_field(&mut reader)?);
        }

        if header.has_payload() && reader.remaining_len() > 0 {
            out.payload = Some(reader.read_to_end()?);
        }

        Ok(out)
    }
}

/// Per-PID continuity-counter and scrambling loss accounting, as used by the `tspidinfo` demo.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContinuityTracker {
    last_cc: Option<u8>,
    pub(crate) input_count: u64,
    pub(crate) error_count: u64,
    pub(crate) scrambled_count: u64,
}

impl ContinuityTracker {
    /// Creates a tracker with no prior state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one packet's header, updating counters. Only packets that carry a payload
    /// participate in continuity counting, matching ISO/IEC 13818-1.
    pub fn observe(&mut self, header: &PacketHeader) {
        self.input_count += 1;
        if header.tsc().is_scrambled() {
            self.scrambled_count += 1;
        }
        if header.has_payload() {
            let cc = header.continuity_counter();
            if let Some(last) = self.last_cc {
                let expected = (last + 1) & 0xF;
                // A repeated packet (duplicate, same CC) is not an error; ISO/IEC 13818-1
                // allows the sender to repeat the last packet on no new data.
                if cc != expected && cc != last {
                    self.error_count += 1;
                }
            }
            self.last_cc = Some(cc);
        }
    }

    /// Total packets observed for this PID.
    pub fn input_count(&self) -> u64 {
        self.input_count
    }

    /// Continuity errors detected for this PID.
    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Scrambled packets observed for this PID.
    pub fn scrambled_count(&self) -> u64 {
        self.scrambled_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_packet(pid: u16, pusi: bool, cc: u8, payload: &[u8]) -> [u8; PACKET_SIZE] {
        let mut pkt = [0xFFu8; PACKET_SIZE];
        let header = PacketHeader::new()
            .with_sync_byte(0x47)
            .with_tei(false)
            .with_pusi(pusi)
            .with_priority(false)
            .with_pid(pid)
            .with_tsc(TransportScramblingControl::NotScrambled)
            .with_has_adaptation_field(false)
            .with_has_payload(true)
            .with_continuity_counter(cc);
        pkt[0..4].copy_from_slice(&header.into_bytes());
        pkt[4..4 + payload.len()].copy_from_slice(payload);
        pkt
    }

    #[test]
    fn parses_header_fields_and_payload() {
        let pkt = build_packet(0x100, true, 3, b"hello");
        let parser = MpegTsParser::new();
        let parsed = parser.parse(&pkt).unwrap();
        assert_eq!(parsed.pid(), 0x100);
        assert!(parsed.header.pusi());
        assert_eq!(parsed.header.continuity_counter(), 3);
        assert_eq!(&parsed.payload.unwrap()[..5], b"hello");
    }

    #[test]
    fn null_packets_are_not_parsed_further() {
        let pkt = build_packet(PID_NULL, false, 0, b"");
        let parsed = MpegTsParser::new().parse(&pkt).unwrap();
        assert!(parsed.is_null());
        assert!(parsed.payload.is_none());
    }

    #[test]
    fn lost_sync_is_an_error() {
        let mut pkt = build_packet(0x100, false, 0, b"");
        pkt[0] = 0x00;
        assert!(MpegTsParser::new().parse(&pkt).is_err());
    }

    #[test]
    fn continuity_gap_is_flagged() {
        let mut tracker = ContinuityTracker::new();
        let p0 = MpegTsParser::new()
            .parse(&build_packet(0x100, true, 0, b""))
            .unwrap();
        tracker.observe(&p0.header);
        let p1 = MpegTsParser::new()
            .parse(&build_packet(0x100, false, 2, b""))
            .unwrap();
        tracker.observe(&p1.header);
        assert_eq!(tracker.error_count(), 1);
    }

    #[test]
    fn repeated_packet_is_not_an_error() {
        let mut tracker = ContinuityTracker::new();
        let p0 = MpegTsParser::new()
            .parse(&build_packet(0x100, true, 5, b""))
            .unwrap();
        tracker.observe(&p0.header);
        tracker.observe(&p0.header);
        assert_eq!(tracker.error_count(), 0);
    }
}
