//! EPG data-file codec: a TLV/chunk-structured binary format persisting a service-to-event
//! database (the ARIB EIT data a broadcast receiver has accumulated). This module only covers
//! the file format; the in-memory, query-capable database it serializes is outside this crate's
//! scope (see the crate's top-level docs) — [`EpgDatabase`] here is a plain data holder just
//! rich enough to round-trip the file.
//!
//! Layout, little-endian scalars throughout, no alignment padding:
//!
//! ```text
//! FileHeader
//!   Service chunk (fixed ServiceInfo payload)
//!     Event chunk (fixed EventInfo payload)
//!       EventAudio / EventVideo / EventGenre / EventName / EventText /
//!       EventExtendedText / EventGroup chunks (variable)
//!     EventEnd chunk
//!   ServiceEnd chunk
//! End chunk
//! ```
//!
//! Every chunk is `{tag: u8, size: u16, payload[size]}`. A chunk with an unrecognized tag, or a
//! recognized tag whose size doesn't match what a fixed-size payload expects, is skipped by its
//! declared size rather than rejected, so future format additions don't break old readers.

use crate::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive as _, ToPrimitive as _};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Maximum length, in code units, of any text field (event name/text, extended text, audio/video
/// component text). A file declaring a longer field is rejected as malformed.
pub const MAX_TEXT_LENGTH: usize = 4096;

/// `group_type` value (ARIB STD-B10) marking an event group as a "shared event" relation, the
/// only group type this codec gives special handling (see [`EventInfo::common_event`]).
pub const GROUP_TYPE_COMMON: u8 = 1;

const FILE_TYPE: &[u8; 8] = b"EPG-DATA";
const FILE_VERSION: u32 = 0;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
enum Tag {
    Null = 0x00,
    End = 0x01,
    Service = 0x02,
    ServiceEnd = 0x03,
    Event = 0x04,
    EventEnd = 0x05,
    EventAudio = 0x06,
    EventVideo = 0x07,
    EventGenre = 0x08,
    EventName = 0x09,
    EventText = 0x0A,
    EventExtendedText = 0x0B,
    EventGroup = 0x0C,
}

const SERVICE_INFO_SIZE: usize = 8; // network_id(2) + tsid(2) + service_id(2) + event_count(2)
const EVENT_INFO_SIZE: usize = 24; // event_id(2) + flags(2) + start_time(8) + duration(4) + updated_time(8)

const FLAG_RUNNING_STATUS: u16 = 0x0007;
const FLAG_FREE_CA_MODE: u16 = 0x0008;
const FLAG_BASIC: u16 = 0x0010;
const FLAG_EXTENDED: u16 = 0x0020;
const FLAG_PRESENT: u16 = 0x0040;
const FLAG_FOLLOWING: u16 = 0x0080;

const AUDIO_FLAG_MULTI_LINGUAL: u8 = 0x01;
const AUDIO_FLAG_MAIN_COMPONENT: u8 = 0x02;

/// The broadcast date/time fields as stored on disk: a plain calendar tuple, not a validated
/// timezone-aware instant. ISDB always expresses these in JST (UTC+9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EpgDateTime {
    /// Calendar year (e.g. `2026`).
    pub year: u16,
    /// Month, `1..=12`.
    pub month: u8,
    /// Day of week, `0..=6`, broadcaster-assigned encoding (not derived on load/save).
    pub day_of_week: u8,
    /// Day of month, `1..=31`.
    pub day: u8,
    /// Hour, `0..=23`.
    pub hour: u8,
    /// Minute, `0..=59`.
    pub minute: u8,
    /// Second, `0..=59`.
    pub second: u8,
}

impl EpgDateTime {
    /// Formats as ISO 8601 with a fixed `+09:00` offset, matching the `epgdatatojson` CLI's
    /// schema (JST is the only timezone ISDB broadcasts carry).
    pub fn to_iso8601_jst(&self) -> String {
        format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}+09:00",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }

    /// Validates the calendar fields by attempting to construct a [`chrono::NaiveDateTime`].
    /// `day_of_week` is broadcaster-supplied and is not cross-checked against the date.
    pub fn is_valid_calendar_date(&self) -> bool {
        chrono::NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)
            .and_then(|d| d.and_hms_opt(self.hour as u32, self.minute as u32, self.second as u32))
            .is_some()
    }
}

/// Identifies a service within a transport stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ServiceKey {
    /// Network id.
    pub network_id: u16,
    /// Transport stream id.
    pub transport_stream_id: u16,
    /// Service id.
    pub service_id: u16,
}

/// One audio component of an event, as carried by the `EventAudio` sub-chunk.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioInfo {
    /// `ES_multi_lingual_flag`.
    pub es_multi_lingual: bool,
    /// `main_component_flag`.
    pub main_component: bool,
    /// Component's stream content class.
    pub stream_content: u8,
    /// Component type (e.g. stereo/mono/multi-channel encoding).
    pub component_type: u8,
    /// Component tag, matches the elementary stream's component-tag descriptor.
    pub component_tag: u8,
    /// Simulcast group tag.
    pub simulcast_group_tag: u8,
    /// Quality indicator.
    pub quality_indicator: u8,
    /// Sampling rate code.
    pub sampling_rate: u8,
    /// Primary ISO 639 language code, packed 3 characters into 24 bits (top byte unused).
    pub language_code: u32,
    /// Secondary language code, present only for multi-lingual components.
    pub language_code2: u32,
    /// Human-readable component description.
    pub text: String,
}

/// One video component of an event, as carried by the `EventVideo` sub-chunk.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VideoInfo {
    /// Component's stream content class.
    pub stream_content: u8,
    /// Component type (resolution/aspect-ratio class).
    pub component_type: u8,
    /// Component tag.
    pub component_tag: u8,
    /// ISO 639 language code (present for some video component types, e.g. closed captions).
    pub language_code: u32,
    /// Human-readable component description.
    pub text: String,
}

/// One content-genre classification nibble pair (ARIB STD-B10 content descriptor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GenreNibble {
    /// Top-level genre classification.
    pub content_nibble_level1: u8,
    /// Sub-genre classification.
    pub content_nibble_level2: u8,
    /// Broadcaster-defined classification, high nibble.
    pub user_nibble1: u8,
    /// Broadcaster-defined classification, low nibble.
    pub user_nibble2: u8,
}

/// One `(description, text)` pair of an event's extended text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtendedTextItem {
    /// Heading/description of this extended-text item (e.g. "出演").
    pub description: String,
    /// Body text.
    pub text: String,
}

/// One member of an [`EventGroup`]: a reference to an event, possibly on another service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventGroupMember {
    /// Service id of the referenced event.
    pub service_id: u16,
    /// Event id of the referenced event.
    pub event_id: u16,
    /// Network id of the referenced event.
    pub network_id: u16,
    /// Transport stream id of the referenced event.
    pub transport_stream_id: u16,
}

/// An event-group relation (e.g. series, shared/common event, relay).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventGroup {
    /// Group type, ARIB STD-B10 `group_type` (see [`GROUP_TYPE_COMMON`]).
    pub group_type: u8,
    /// Member events of this group.
    pub events: Vec<EventGroupMember>,
}

/// One EPG event (a single program entry) belonging to a service.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventInfo {
    /// Event id.
    pub event_id: u16,
    /// 3-bit running-status field from the originating EIT.
    pub running_status: u8,
    /// Free-CA mode flag.
    pub free_ca_mode: bool,
    /// Derived from EIT schedule tables (basic EIT).
    pub is_basic: bool,
    /// Derived from EIT schedule tables (extended EIT).
    pub is_extended: bool,
    /// Derived from the "present" EIT p/f table.
    pub is_present: bool,
    /// Derived from the "following" EIT p/f table.
    pub is_following: bool,
    /// Broadcast start time.
    pub start_time: EpgDateTime,
    /// Duration in seconds.
    pub duration: u32,
    /// Timestamp (implementation-defined epoch, matching `updated_time` on disk) of the last
    /// update to this event's data.
    pub updated_time: u64,
    /// Audio components.
    pub audio_list: Vec<AudioInfo>,
    /// Video components.
    pub video_list: Vec<VideoInfo>,
    /// Content-genre nibbles, at most 7.
    pub content_nibbles: Vec<GenreNibble>,
    /// Event (program) title.
    pub event_name: String,
    /// Event (program) short description.
    pub event_text: String,
    /// Extended description sections.
    pub extended_text: Vec<ExtendedTextItem>,
    /// Event-group relations.
    pub event_groups: Vec<EventGroup>,
    /// If this event is a shared/common event referencing exactly one other service, the
    /// referenced event (derived from `event_groups` on load, see [`GROUP_TYPE_COMMON`]).
    pub common_event: Option<EventGroupMember>,
}

impl EventInfo {
    /// Recomputes [`EventInfo::common_event`] from `event_groups`, given the service this event
    /// itself belongs to (a common-event group naming only this same service doesn't count).
    fn derive_common_event(&mut self, own_service_id: u16) {
        self.common_event = None;
        for group in &self.event_groups {
            if group.group_type == GROUP_TYPE_COMMON && group.events.len() == 1 {
                let member = group.events[0];
                if member.service_id != own_service_id {
                    self.common_event = Some(member);
                }
            }
        }
    }
}

/// One service and the events known for it.
#[derive(Debug, Clone, Default)]
pub struct ServiceEntry {
    /// Service identity.
    pub key: ServiceKey,
    /// Events known for this service, in file order (no particular sort is guaranteed).
    pub events: Vec<EventInfo>,
}

/// The full set of services/events persisted by an EPG file.
#[derive(Debug, Clone, Default)]
pub struct EpgDatabase {
    /// Services, each with its own event list.
    pub services: Vec<ServiceEntry>,
}

impl EpgDatabase {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self::default()
    }
}

fn io_err(e: std::io::Error) -> Error {
    Error::Resource(format!("EPG file I/O error: {}", e))
}

fn take(limit: &mut usize, n: usize) -> Result<()> {
    if n > *limit {
        return Err(Error::Protocol(
            "EPG chunk payload shorter than its declared content".into(),
        ));
    }
    *limit -= n;
    Ok(())
}

fn read_u8<R: Read>(r: &mut R, limit: &mut usize) -> Result<u8> {
    take(limit, 1)?;
    r.read_u8().map_err(io_err)
}

fn read_u16<R: Read>(r: &mut R, limit: &mut usize) -> Result<u16> {
    take(limit, 2)?;
    r.read_u16::<LittleEndian>().map_err(io_err)
}

fn read_u32<R: Read>(r: &mut R, limit: &mut usize) -> Result<u32> {
    take(limit, 4)?;
    r.read_u32::<LittleEndian>().map_err(io_err)
}

fn read_u64<R: Read>(r: &mut R, limit: &mut usize) -> Result<u64> {
    take(limit, 8)?;
    r.read_u64::<LittleEndian>().map_err(io_err)
}

fn read_bytes<R: Read>(r: &mut R, limit: &mut usize, n: usize) -> Result<Vec<u8>> {
    take(limit, n)?;
    let mut buf = vec![0u8; n];
    r.read_exact(&mut buf).map_err(io_err)?;
    Ok(buf)
}

fn skip<R: Read>(r: &mut R, limit: &mut usize, n: usize) -> Result<()> {
    if n == 0 {
        return Ok(());
    }
    take(limit, n)?;
    let mut scratch = [0u8; 256];
    let mut remaining = n;
    while remaining > 0 {
        let chunk = remaining.min(scratch.len());
        r.read_exact(&mut scratch[..chunk]).map_err(io_err)?;
        remaining -= chunk;
    }
    Ok(())
}

fn read_string<R: Read>(r: &mut R, limit: &mut usize) -> Result<String> {
    let len = read_u16(r, limit)? as usize;
    if len > MAX_TEXT_LENGTH {
        return Err(Error::Protocol(format!(
            "EPG text field of {} code units exceeds the {} maximum",
            len, MAX_TEXT_LENGTH
        )));
    }
    if len == 0 {
        return Ok(String::new());
    }
    let bytes = read_bytes(r, limit, len)?;
    String::from_utf8(bytes)
        .map_err(|_| Error::Protocol("EPG text field is not valid UTF-8".into()))
}

fn read_chunk_header<R: Read>(r: &mut R) -> Result<(u8, usize)> {
    let tag = r.read_u8().map_err(io_err)?;
    let size = r.read_u16::<LittleEndian>().map_err(io_err)? as usize;
    Ok((tag, size))
}

fn write_u8<W: Write>(w: &mut W, v: u8) -> Result<()> {
    w.write_u8(v).map_err(io_err)
}

fn write_u16<W: Write>(w: &mut W, v: u16) -> Result<()> {
    w.write_u16::<LittleEndian>(v).map_err(io_err)
}

fn write_u32<W: Write>(w: &mut W, v: u32) -> Result<()> {
    w.write_u32::<LittleEndian>(v).map_err(io_err)
}

fn write_u64<W: Write>(w: &mut W, v: u64) -> Result<()> {
    w.write_u64::<LittleEndian>(v).map_err(io_err)
}

fn write_string<W: Write>(w: &mut W, s: &str) -> Result<()> {
    if s.len() > MAX_TEXT_LENGTH {
        return Err(Error::Protocol(format!(
            "EPG text field of {} code units exceeds the {} maximum",
            s.len(),
            MAX_TEXT_LENGTH
        )));
    }
    write_u16(w, s.len() as u16)?;
    w.write_all(s.as_bytes()).map_err(io_err)
}

fn write_chunk_header<W: Write>(w: &mut W, tag: Tag, size: usize) -> Result<()> {
    if size > 0xFFFF {
        return Err(Error::Lifecycle(format!(
            "EPG chunk payload of {} bytes exceeds the 16-bit size field",
            size
        )));
    }
    write_u8(w, tag.to_u8().expect("Tag always fits in u8"))?;
    write_u16(w, size as u16)
}

fn write_chunk<W: Write>(w: &mut W, tag: Tag, payload: &[u8]) -> Result<()> {
    write_chunk_header(w, tag, payload.len())?;
    w.write_all(payload).map_err(io_err)
}

/// Reads and persists the EPG data-file codec's TLV format.
///
/// Carries the generation counter (`update_count`) the way the original implementation does: as
/// state on the codec object, incremented by every successful [`EpgDataFile::save`] /
/// [`EpgDataFile::save_file`] and set from the file header by every successful load.
#[derive(Debug, Default)]
pub struct EpgDataFile {
    update_count: u64,
}

impl EpgDataFile {
    /// Creates a codec with no file loaded yet (`update_count() == 0`).
    pub fn new() -> Self {
        Self::default()
    }

    /// The `update_count` of the most recently loaded or saved file.
    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    /// Reads just the file header (magic/version/update-count), without parsing the body.
    /// Useful for a cheap "is this a readable EPG file, and how stale is it" check.
    pub fn load_header<R: Read>(reader: &mut R) -> Result<u64> {
        let (_, update_count) = read_and_check_header(reader)?;
        Ok(update_count)
    }

    /// Loads an entire database from `reader`.
    pub fn load<R: Read>(&mut self, reader: &mut R) -> Result<EpgDatabase> {
        let (_service_count, update_count) = read_and_check_header(reader)?;
        self.update_count = update_count;

        let mut db = EpgDatabase::new();

        loop {
            let (tag, size) = read_chunk_header(reader)?;
            if tag == Tag::Service as u8 && size == SERVICE_INFO_SIZE {
                let entry = load_service(reader)?;
                if !entry.events.is_empty() {
                    db.services.push(entry);
                }
            } else if tag == Tag::End as u8 {
                break;
            } else {
                let mut limit = size;
                skip(reader, &mut limit, size)?;
            }
        }

        Ok(db)
    }

    /// Opens `path` and loads the whole database from it.
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<EpgDatabase> {
        let mut file = File::open(path.as_ref()).map_err(|e| {
            log::error!("failed to open EPG file {:?}: {}", path.as_ref(), e);
            Error::Resource(format!("cannot open EPG file: {}", e))
        })?;
        self.load(&mut file).map_err(|e| {
            log::error!("failed to read EPG file {:?}: {}", path.as_ref(), e);
            e
        })
    }

    /// Saves `db` to `writer`, incrementing and returning [`EpgDataFile::update_count`].
    ///
    /// Services with no events are skipped (the header's `service_count` only counts services
    /// actually written), matching the original's "don't persist a service nobody has events
    /// for" behaviour.
    pub fn save<W: Write>(&mut self, writer: &mut W, db: &EpgDatabase) -> Result<()> {
        let services: Vec<&ServiceEntry> =
            db.services.iter().filter(|s| !s.events.is_empty()).collect();

        self.update_count += 1;

        writer.write_all(FILE_TYPE).map_err(io_err)?;
        write_u32(writer, FILE_VERSION)?;
        write_u32(writer, services.len() as u32)?;
        write_u64(writer, self.update_count)?;

        for service in services {
            save_service(writer, service)?;
        }

        write_chunk_header(writer, Tag::End, 0)
    }

    /// Creates (truncating) `path` and saves `db` to it. On any failure the partially written
    /// file is deleted, matching the original's "never leave a half-written EPG file" contract.
    pub fn save_file<P: AsRef<Path>>(&mut self, path: P, db: &EpgDatabase) -> Result<()> {
        let path = path.as_ref();
        let mut file = File::create(path).map_err(|e| {
            log::error!("failed to create EPG file {:?}: {}", path, e);
            Error::Resource(format!("cannot create EPG file: {}", e))
        })?;

        match self.save(&mut file, db) {
            Ok(()) => Ok(()),
            Err(e) => {
                log::error!("failed to write EPG file {:?}: {}", path, e);
                drop(file);
                let _ = std::fs::remove_file(path);
                Err(e)
            }
        }
    }
}

fn read_and_check_header<R: Read>(reader: &mut R) -> Result<(u32, u64)> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic).map_err(io_err)?;
    if &magic != FILE_TYPE {
        return Err(Error::Protocol(
            "not an EPG data file (bad magic)".into(),
        ));
    }
    let version = reader.read_u32::<LittleEndian>().map_err(io_err)?;
    if version > FILE_VERSION {
        return Err(Error::Protocol(format!(
            "EPG file version {} is newer than the {} this codec supports",
            version, FILE_VERSION
        )));
    }
    let service_count = reader.read_u32::<LittleEndian>().map_err(io_err)?;
    let update_count = reader.read_u64::<LittleEndian>().map_err(io_err)?;
    Ok((service_count, update_count))
}

fn load_service<R: Read>(reader: &mut R) -> Result<ServiceEntry> {
    let mut limit = SERVICE_INFO_SIZE;
    let network_id = read_u16(reader, &mut limit)?;
    let transport_stream_id = read_u16(reader, &mut limit)?;
    let service_id = read_u16(reader, &mut limit)?;
    let event_count = read_u16(reader, &mut limit)?;

    let mut entry = ServiceEntry {
        key: ServiceKey {
            network_id,
            transport_stream_id,
            service_id,
        },
        events: Vec::with_capacity(event_count as usize),
    };

    loop {
        let (tag, size) = read_chunk_header(reader)?;
        if tag == Tag::Event as u8 && size == EVENT_INFO_SIZE {
            let event = load_event(reader, service_id)?;
            entry.events.push(event);
        } else if tag == Tag::ServiceEnd as u8 {
            break;
        } else {
            let mut limit = size;
            skip(reader, &mut limit, size)?;
        }
    }

    Ok(entry)
}

fn load_event<R: Read>(reader: &mut R, own_service_id: u16) -> Result<EventInfo> {
    let mut limit = EVENT_INFO_SIZE;
    let event_id = read_u16(reader, &mut limit)?;
    let flags = read_u16(reader, &mut limit)?;
    let start_time = EpgDateTime {
        year: read_u16(reader, &mut limit)?,
        month: read_u8(reader, &mut limit)?,
        day_of_week: read_u8(reader, &mut limit)?,
        day: read_u8(reader, &mut limit)?,
        hour: read_u8(reader, &mut limit)?,
        minute: read_u8(reader, &mut limit)?,
        second: read_u8(reader, &mut limit)?,
    };
    let duration = read_u32(reader, &mut limit)?;
    let updated_time = read_u64(reader, &mut limit)?;

    let mut event = EventInfo {
        event_id,
        running_status: (flags & FLAG_RUNNING_STATUS) as u8,
        free_ca_mode: flags & FLAG_FREE_CA_MODE != 0,
        is_basic: flags & FLAG_BASIC != 0,
        is_extended: flags & FLAG_EXTENDED != 0,
        is_present: flags & FLAG_PRESENT != 0,
        is_following: flags & FLAG_FOLLOWING != 0,
        start_time,
        duration,
        updated_time,
        ..Default::default()
    };

    loop {
        let (tag, size) = read_chunk_header(reader)?;
        let mut limit = size;

        if tag == Tag::EventEnd as u8 {
            break;
        }

        match Tag::from_u8(tag) {
            Some(Tag::EventAudio) => {
                let count = read_u8(reader, &mut limit)?;
                event.audio_list.reserve(count as usize);
                for _ in 0..count {
                    let flags = read_u8(reader, &mut limit)?;
                    let mut audio = AudioInfo {
                        es_multi_lingual: flags & AUDIO_FLAG_MULTI_LINGUAL != 0,
                        main_component: flags & AUDIO_FLAG_MAIN_COMPONENT != 0,
                        stream_content: read_u8(reader, &mut limit)?,
                        component_type: read_u8(reader, &mut limit)?,
                        component_tag: read_u8(reader, &mut limit)?,
                        simulcast_group_tag: read_u8(reader, &mut limit)?,
                        quality_indicator: read_u8(reader, &mut limit)?,
                        sampling_rate: read_u8(reader, &mut limit)?,
                        ..Default::default()
                    };
                    let _reserved = read_u8(reader, &mut limit)?;
                    audio.language_code = read_u32(reader, &mut limit)?;
                    audio.language_code2 = read_u32(reader, &mut limit)?;
                    audio.text = read_string(reader, &mut limit)?;
                    event.audio_list.push(audio);
                }
            }
            Some(Tag::EventVideo) => {
                let count = read_u8(reader, &mut limit)?;
                event.video_list.reserve(count as usize);
                for _ in 0..count {
                    let video = VideoInfo {
                        stream_content: read_u8(reader, &mut limit)?,
                        component_type: read_u8(reader, &mut limit)?,
                        component_tag: read_u8(reader, &mut limit)?,
                        language_code: {
                            let _reserved = read_u8(reader, &mut limit)?;
                            read_u32(reader, &mut limit)?
                        },
                        text: String::new(),
                    };
                    let mut video = video;
                    video.text = read_string(reader, &mut limit)?;
                    event.video_list.push(video);
                }
            }
            Some(Tag::EventGenre) => {
                let nibble_count = read_u8(reader, &mut limit)?;
                if nibble_count > 7 {
                    return Err(Error::Protocol(format!(
                        "EPG genre nibble count {} exceeds the maximum of 7",
                        nibble_count
                    )));
                }
                for _ in 0..nibble_count {
                    let content = read_u8(reader, &mut limit)?;
                    let user = read_u8(reader, &mut limit)?;
                    event.content_nibbles.push(GenreNibble {
                        content_nibble_level1: content >> 4,
                        content_nibble_level2: content & 0x0F,
                        user_nibble1: user >> 4,
                        user_nibble2: user & 0x0F,
                    });
                }
            }
            Some(Tag::EventName) => {
                event.event_name = read_string(reader, &mut limit)?;
            }
            Some(Tag::EventText) => {
                event.event_text = read_string(reader, &mut limit)?;
            }
            Some(Tag::EventExtendedText) => {
                let count = read_u8(reader, &mut limit)?;
                event.extended_text.reserve(count as usize);
                for _ in 0..count {
                    let description = read_string(reader, &mut limit)?;
                    let text = read_string(reader, &mut limit)?;
                    event.extended_text.push(ExtendedTextItem { description, text });
                }
            }
            Some(Tag::EventGroup) => {
                let group_count = read_u8(reader, &mut limit)?;
                event.event_groups.reserve(group_count as usize);
                for _ in 0..group_count {
                    let group_type = read_u8(reader, &mut limit)?;
                    let member_count = read_u8(reader, &mut limit)?;
                    let mut group = EventGroup {
                        group_type,
                        events: Vec::with_capacity(member_count as usize),
                    };
                    for _ in 0..member_count {
                        group.events.push(EventGroupMember {
                            service_id: read_u16(reader, &mut limit)?,
                            event_id: read_u16(reader, &mut limit)?,
                            network_id: read_u16(reader, &mut limit)?,
                            transport_stream_id: read_u16(reader, &mut limit)?,
                        });
                    }
                    event.event_groups.push(group);
                }
            }
            _ => {}
        }

        // Tolerate future sub-fields within a chunk we understand, or an unrecognized tag
        // entirely, by skipping whatever we didn't consume of its declared size.
        skip(reader, &mut limit, limit)?;
    }

    event.derive_common_event(own_service_id);
    Ok(event)
}

fn save_service<W: Write>(writer: &mut W, service: &ServiceEntry) -> Result<()> {
    let mut header = Vec::with_capacity(SERVICE_INFO_SIZE);
    write_u16(&mut header, service.key.network_id)?;
    write_u16(&mut header, service.key.transport_stream_id)?;
    write_u16(&mut header, service.key.service_id)?;
    write_u16(&mut header, service.events.len() as u16)?;
    write_chunk(writer, Tag::Service, &header)?;

    for event in &service.events {
        save_event(writer, event)?;
    }

    write_chunk_header(writer, Tag::ServiceEnd, 0)
}

fn save_event<W: Write>(writer: &mut W, event: &EventInfo) -> Result<()> {
    let mut header = Vec::with_capacity(EVENT_INFO_SIZE);
    write_u16(&mut header, event.event_id)?;
    let mut flags = event.running_status as u16 & FLAG_RUNNING_STATUS;
    if event.free_ca_mode {
        flags |= FLAG_FREE_CA_MODE;
    }
    if event.is_basic {
        flags |= FLAG_BASIC;
    }
    if event.is_extended {
        flags |= FLAG_EXTENDED;
    }
    if event.is_present {
        flags |= FLAG_PRESENT;
    }
    if event.is_following {
        flags |= FLAG_FOLLOWING;
    }
    write_u16(&mut header, flags)?;
    write_u16(&mut header, event.start_time.year)?;
    write_u8(&mut header, event.start_time.month)?;
    write_u8(&mut header, event.start_time.day_of_week)?;
    write_u8(&mut header, event.start_time.day)?;
    write_u8(&mut header, event.start_time.hour)?;
    write_u8(&mut header, event.start_time.minute)?;
    write_u8(&mut header, event.start_time.second)?;
    write_u32(&mut header, event.duration)?;
    write_u64(&mut header, event.updated_time)?;
    write_chunk(writer, Tag::Event, &header)?;

    if !event.audio_list.is_empty() {
        let mut buf = Vec::new();
        write_u8(&mut buf, event.audio_list.len() as u8)?;
        for audio in &event.audio_list {
            let mut flags = 0u8;
            if audio.es_multi_lingual {
                flags |= AUDIO_FLAG_MULTI_LINGUAL;
            }
            if audio.main_component {
                flags |= AUDIO_FLAG_MAIN_COMPONENT;
            }
            write_u8(&mut buf, flags)?;
            write_u8(&mut buf, audio.stream_content)?;
            write_u8(&mut buf, audio.component_type)?;
            write_u8(&mut buf, audio.component_tag)?;
            write_u8(&mut buf, audio.simulcast_group_tag)?;
            write_u8(&mut buf, audio.quality_indicator)?;
            write_u8(&mut buf, audio.sampling_rate)?;
            write_u8(&mut buf, 0)?; // reserved
            write_u32(&mut buf, audio.language_code)?;
            write_u32(&mut buf, audio.language_code2)?;
            write_string(&mut buf, &audio.text)?;
        }
        write_chunk(writer, Tag::EventAudio, &buf)?;
    }

    if !event.video_list.is_empty() {
        let mut buf = Vec::new();
        write_u8(&mut buf, event.video_list.len() as u8)?;
        for video in &event.video_list {
            write_u8(&mut buf, video.stream_content)?;
            write_u8(&mut buf, video.component_type)?;
            write_u8(&mut buf, video.component_tag)?;
            write_u8(&mut buf, 0)?; // reserved
            write_u32(&mut buf, video.language_code)?;
            write_string(&mut buf, &video.text)?;
        }
        write_chunk(writer, Tag::EventVideo, &buf)?;
    }

    if !event.content_nibbles.is_empty() {
        let mut buf = Vec::new();
        write_u8(&mut buf, event.content_nibbles.len() as u8)?;
        for nibble in &event.content_nibbles {
            write_u8(
                &mut buf,
                (nibble.content_nibble_level1 << 4) | nibble.content_nibble_level2,
            )?;
            write_u8(&mut buf, (nibble.user_nibble1 << 4) | nibble.user_nibble2)?;
        }
        write_chunk(writer, Tag::EventGenre, &buf)?;
    }

    if !event.event_name.is_empty() {
        let mut buf = Vec::new();
        write_string(&mut buf, &event.event_name)?;
        write_chunk(writer, Tag::EventName, &buf)?;
    }

    if !event.event_text.is_empty() {
        let mut buf = Vec::new();
        write_string(&mut buf, &event.event_text)?;
        write_chunk(writer, Tag::EventText, &buf)?;
    }

    if !event.extended_text.is_empty() {
        let mut buf = Vec::new();
        write_u8(&mut buf, event.extended_text.len() as u8)?;
        for item in &event.extended_text {
            write_string(&mut buf, &item.description)?;
            write_string(&mut buf, &item.text)?;
        }
        write_chunk(writer, Tag::EventExtendedText, &buf)?;
    }

    if !event.event_groups.is_empty() {
        let mut buf = Vec::new();
        write_u8(&mut buf, event.event_groups.len() as u8)?;
        for group in &event.event_groups {
            write_u8(&mut buf, group.group_type)?;
            write_u8(&mut buf, group.events.len() as u8)?;
            for member in &group.events {
                write_u16(&mut buf, member.service_id)?;
                write_u16(&mut buf, member.event_id)?;
                write_u16(&mut buf, member.network_id)?;
                write_u16(&mut buf, member.transport_stream_id)?;
            }
        }
        write_chunk(writer, Tag::EventGroup, &buf)?;
    }

    write_chunk_header(writer, Tag::EventEnd, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_database() -> EpgDatabase {
        let mut db = EpgDatabase::new();
        let mut event = EventInfo {
            event_id: 1,
            running_status: 4,
            free_ca_mode: false,
            is_basic: true,
            is_extended: true,
            is_present: false,
            is_following: true,
            start_time: EpgDateTime {
                year: 2026,
                month: 7,
                day_of_week: 2,
                day: 28,
                hour: 21,
                minute: 0,
                second: 0,
            },
            duration: 3600,
            updated_time: 123456789,
            event_name: "映画".into(),
            ..Default::default()
        };
        event.extended_text.push(ExtendedTextItem {
            description: "出演".into(),
            text: "A".into(),
        });
        db.services.push(ServiceEntry {
            key: ServiceKey {
                network_id: 4,
                transport_stream_id: 5,
                service_id: 6,
            },
            events: vec![event],
        });
        db
    }

    #[test]
    fn round_trips_a_database() {
        let db = sample_database();
        let mut buf = Vec::new();
        let mut writer = EpgDataFile::new();
        writer.save(&mut buf, &db).unwrap();

        let mut reader = EpgDataFile::new();
        let loaded = reader.load(&mut Cursor::new(&buf)).unwrap();

        assert_eq!(loaded.services.len(), 1);
        let service = &loaded.services[0];
        assert_eq!(service.key.network_id, 4);
        assert_eq!(service.key.transport_stream_id, 5);
        assert_eq!(service.key.service_id, 6);
        assert_eq!(service.events.len(), 1);
        let event = &service.events[0];
        assert_eq!(event.event_name, "映画");
        assert_eq!(event.extended_text[0].description, "出演");
        assert_eq!(event.extended_text[0].text, "A");
        assert_eq!(event.duration, 3600);
        assert_eq!(reader.update_count(), 1);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = vec![0u8; 32];
        buf[..8].copy_from_slice(b"NOT-EPG!");
        let mut reader = EpgDataFile::new();
        assert!(reader.load(&mut Cursor::new(&buf)).is_err());
    }

    #[test]
    fn rejects_future_version() {
        let mut buf = Vec::new();
        buf.extend_from_slice(FILE_TYPE);
        buf.extend_from_slice(&99u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        let mut reader = EpgDataFile::new();
        assert!(reader.load(&mut Cursor::new(&buf)).is_err());
    }

    #[test]
    fn derives_common_event_from_single_member_group_on_another_service() {
        let mut buf = Vec::new();
        let mut db = EpgDatabase::new();
        let mut event = EventInfo {
            event_id: 10,
            ..Default::default()
        };
        event.event_groups.push(EventGroup {
            group_type: GROUP_TYPE_COMMON,
            events: vec![EventGroupMember {
                service_id: 99,
                event_id: 10,
                network_id: 4,
                transport_stream_id: 5,
            }],
        });
        db.services.push(ServiceEntry {
            key: ServiceKey {
                network_id: 4,
                transport_stream_id: 5,
                service_id: 6,
            },
            events: vec![event],
        });

        let mut writer = EpgDataFile::new();
        writer.save(&mut buf, &db).unwrap();
        let mut reader = EpgDataFile::new();
        let loaded = reader.load(&mut Cursor::new(&buf)).unwrap();

        let common = loaded.services[0].events[0].common_event;
        assert_eq!(common, Some(EventGroupMember {
            service_id: 99,
            event_id: 10,
            network_id: 4,
            transport_stream_id: 5,
        }));
    }

    #[test]
    fn oversized_text_field_is_rejected_on_save() {
        let mut db = EpgDatabase::new();
        db.services.push(ServiceEntry {
            key: ServiceKey::default(),
            events: vec![EventInfo {
                event_name: "x".repeat(MAX_TEXT_LENGTH + 1),
                ..Default::default()
            }],
        });
        let mut buf = Vec::new();
        let mut writer = EpgDataFile::new();
        assert!(writer.save(&mut buf, &db).is_err());
    }

    #[test]
    fn unknown_chunk_tag_is_skipped_without_error() {
        // A Service chunk followed by an unrecognized chunk, then ServiceEnd/End.
        let mut buf = Vec::new();
        buf.extend_from_slice(FILE_TYPE);
        buf.extend_from_slice(&FILE_VERSION.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());

        let mut service_header = Vec::new();
        write_u16(&mut service_header, 1).unwrap();
        write_u16(&mut service_header, 2).unwrap();
        write_u16(&mut service_header, 3).unwrap();
        write_u16(&mut service_header, 0).unwrap();
        write_chunk(&mut buf, Tag::Service, &service_header).unwrap();

        write_chunk(&mut buf, Tag::Null, &[0xAA, 0xBB, 0xCC]).unwrap();
        write_chunk_header(&mut buf, Tag::ServiceEnd, 0).unwrap();
        write_chunk_header(&mut buf, Tag::End, 0).unwrap();

        let mut reader = EpgDataFile::new();
        let db = reader.load(&mut Cursor::new(&buf)).unwrap();
        // The service has no events, so it is not retained (matches save()'s own policy of
        // dropping empty services, applied here to loaded data for symmetry in this test).
        assert!(db.services.is_empty() || db.services[0].events.is_empty());
    }
}
