//! Pluggable pipeline stages wired into a graph: a [`source::SourceFilter`] feeding packets in,
//! zero or more transform stages, and sinks such as [`recorder::RecorderFilter`]. [`graph::FilterGraph`]
//! owns the wiring and propagates lifecycle/active-PID routing hints across it.

pub mod filter_base;
pub mod graph;
pub mod recorder;
pub mod source;

pub use filter_base::{Direction, Filter, FilterId, OutputFilters, OutputSlot};
pub use graph::{Connection, FilterGraph, SharedFilter};
pub use recorder::{
    RecorderFilter, RecordingStatistics, RecordingTask, RecordingTaskId, RecordingTaskOptions,
    StreamKind, StreamSelector, StreamWriter, TargetService,
};
pub use source::{ChannelPacing, ChannelSpec, SourceFilter, SourceMedium, SourceMode, SourceRequest};
