//! Streaming pipeline engine and bitstream codec parsers for ISDB MPEG-2 transport streams.
//!
//! The crate is organized as the leaf utilities used throughout (bit-level reading, byte
//! buffers, backing storage), the bounded [`stream_buffer`] that decouples producers from
//! consumers, the [`filter`] graph that wires pipeline stages together, the codec-level
//! [`video`] parsers, the [`pes`] assembler, and the [`epg`] persistence codec.
//!
//! # Usage
//!
//! ```toml
//! [dependencies]
//! isdb-stream = "~0.1.0"
//! ```

#![allow(unused)]
#![deny(missing_docs, unsafe_code)]

use std::fmt;

mod slice_reader;
pub use slice_reader::SliceReader;

pub mod bit_reader;
pub use bit_reader::BitReader;

pub mod data_buffer;
pub use data_buffer::DataBuffer;

pub mod data_storage;
pub use data_storage::DataStorage;

pub mod stream_buffer;
pub use stream_buffer::StreamBuffer;

pub mod data_streamer;
pub use data_streamer::DataStreamer;

mod psi;
pub use psi::{
    Descriptor, ElementaryStreamInfo, ElementaryStreamInfoHeader, PatEntry, Pmt, PmtHeader, Psi,
    PsiAssembler, PsiData, PsiDemux, PsiHeader, PsiTableSyntax,
};

pub mod ts;
pub use ts::{AdaptationField, MpegTsParser, Packet, PacketHeader, PcrTimestamp};

pub mod pes;
pub use pes::{PesAssembler, PesPacket};

pub mod video;
pub use video::{PictureGeometry, VideoCodec, VideoParser};

pub mod filter;

pub mod epg;
pub use epg::{EpgDataFile, EpgDatabase, EpgDateTime, EventInfo, ServiceEntry, ServiceKey};

/// Errors that may be encountered anywhere in the crate.
///
/// Mirrors the five-kind taxonomy used throughout the core: resource acquisition, wire-protocol
/// violations, resource exhaustion, lifecycle misuse, and downstream-sink failures. Parsers
/// generally do *not* return this type for routine malformed input (they swallow the error and
/// resume at the next synchronization point per their own contract); it is reserved for calls
/// that have no sensible way to continue.
#[derive(Debug)]
pub enum Error {
    /// File/allocation/permission failure acquiring a resource.
    Resource(String),
    /// Wire-format violation: bad start code, invalid header, malformed chunk.
    Protocol(String),
    /// A bounded resource (bit reader, buffer, timeout) was exhausted.
    Exhaustion(String),
    /// An operation was invalid given the current lifecycle state (double-open, not loaded, ...).
    Lifecycle(String),
    /// A downstream sink reported a write failure.
    Downstream(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Resource(msg) => write!(f, "resource error: {}", msg),
            Error::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Error::Exhaustion(msg) => write!(f, "exhaustion error: {}", msg),
            Error::Lifecycle(msg) => write!(f, "lifecycle error: {}", msg),
            Error::Downstream(msg) => write!(f, "downstream error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// [`std::result::Result`] alias that uses [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Expands to [`format_args`] for a 90kHz timestamp of any integer type.
///
/// Format is `<hours>:<minutes>:<seconds>:<90kHz-ticks>`.
///
/// # Example
///
/// ```
/// use isdb_stream::pts_format_args;
/// assert_eq!(std::fmt::format(pts_format_args!(900000)), "0:0:10:0");
/// ```
#[macro_export]
macro_rules! pts_format_args {
    ($pts:expr) => {
        format_args!(
            "{}:{}:{}:{}",
            $pts / (90000 * 60 * 60),
            $pts / (90000 * 60) % 60,
            $pts / 90000 % 60,
            $pts % 90000
        )
    };
}
