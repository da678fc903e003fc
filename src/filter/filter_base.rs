//! Shared contract implemented by every node in a [`crate::filter::FilterGraph`].

/// Registration id handed out by [`crate::filter::FilterGraph::register_filter`]. `0` is never a
/// valid id; it is reserved as a "no filter" sentinel, e.g. the return value when registering an
/// already-registered filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterId(pub(crate) u32);

impl FilterId {
    /// The `0` sentinel returned in place of a real id when an operation is a no-op.
    pub const NONE: FilterId = FilterId(0);

    /// `true` for any id other than the sentinel.
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// One filter's output pointed at a downstream filter's input sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSlot {
    /// Downstream filter this output feeds.
    pub filter: FilterId,
    /// Index of the downstream filter's input sink that receives this output.
    pub sink_index: usize,
}

/// Which side of a filter's wiring an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The filter's outputs (edges where this filter is the upstream).
    Upstream,
    /// The filter's inputs (edges where this filter is the downstream).
    Downstream,
}

/// The contract every graph node implements: lifecycle, streaming state, routing hints, and
/// output wiring. Input delivery (`process_data`) is intentionally left out of the trait object
/// surface — concrete filters expose a typed method (`SourceFilter::push`,
/// `RecorderFilter::process_packet`) since the shape of "a packet" differs by stage; the graph
/// only needs to reason about the parts common to every node.
pub trait Filter: Send {
    /// Name used in diagnostics and logging.
    fn name(&self) -> &str;

    /// One-time setup before the filter can stream. Default: no-op.
    fn initialize(&mut self) -> crate::Result<()> {
        Ok(())
    }

    /// Releases resources acquired by `initialize`. Default: no-op.
    fn finalize(&mut self) -> crate::Result<()> {
        Ok(())
    }

    /// Flushes any buffered state without leaving the graph.
    fn reset(&mut self) {}

    /// Called when the whole graph resets (e.g. after a channel change); defaults to `reset`.
    fn reset_graph(&mut self) {
        self.reset();
    }

    /// Enables data forwarding. Returns `false` if the filter could not start.
    fn start_streaming(&mut self) -> bool {
        true
    }

    /// Disables data forwarding.
    fn stop_streaming(&mut self) {}

    /// Routing hint: the service the engine currently considers active.
    fn set_active_service_id(&mut self, _service_id: u16) {}

    /// Routing hint: the video PID currently selected; `changed` is `true` the first call after
    /// an actual change (as opposed to a redundant re-assertion).
    fn set_active_video_pid(&mut self, _pid: u16, _changed: bool) {}

    /// Routing hint: the audio PID currently selected.
    fn set_active_audio_pid(&mut self, _pid: u16, _changed: bool) {}

    /// Number of named input sinks this filter exposes.
    fn input_sink_count(&self) -> usize {
        1
    }

    /// Number of output slots this filter exposes.
    fn output_count(&self) -> usize {
        1
    }

    /// Points `output_index` at `slot`, replacing any existing wiring there.
    fn set_output_filter(&mut self, output_index: usize, slot: Option<OutputSlot>);

    /// Current wiring of `output_index`, if any.
    fn output_filter(&self, output_index: usize) -> Option<OutputSlot>;

    /// Clears every output slot.
    fn reset_output_filters(&mut self) {
        for i in 0..self.output_count() {
            self.set_output_filter(i, None);
        }
    }
}

/// Reusable output-slot storage most single/few-output filters can embed rather than
/// reimplementing the `Vec<Option<OutputSlot>>` bookkeeping.
#[derive(Debug, Default, Clone)]
pub struct OutputFilters(Vec<Option<OutputSlot>>);

impl OutputFilters {
    /// Creates storage for `count` output slots, all initially unset.
    pub fn new(count: usize) -> Self {
        Self(vec![None; count])
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` if there are no slots at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sets or clears `output_index`.
    pub fn set(&mut self, output_index: usize, slot: Option<OutputSlot>) {
        if let Some(entry) = self.0.get_mut(output_index) {
            *entry = slot;
        }
    }

    /// Current value of `output_index`.
    pub fn get(&self, output_index: usize) -> Option<OutputSlot> {
        self.0.get(output_index).copied().flatten()
    }

    /// Iterates `(output_index, slot)` pairs that are currently set, in index order.
    pub fn iter_set(&self) -> impl Iterator<Item = (usize, OutputSlot)> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.map(|slot| (i, slot)))
    }
}
