//! Registers filters, validates and applies their wiring, and walks the resulting graph.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::filter::filter_base::{Direction, Filter, FilterId, OutputSlot};
use crate::{Error, Result};

/// One edge: `upstream`'s `output_index`'th output feeds `downstream`'s `sink_index`'th input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    /// Source side of the edge.
    pub upstream: FilterId,
    /// Destination side of the edge.
    pub downstream: FilterId,
    /// Input sink on `downstream` that receives the data.
    pub sink_index: usize,
    /// Output slot on `upstream` that produces the data.
    pub output_index: usize,
}

/// A shared handle to a registered filter, as stored and looked up by the graph.
pub type SharedFilter = Arc<Mutex<dyn Filter>>;

/// Owns the registered filters and the connection list wiring them together.
#[derive(Default)]
pub struct FilterGraph {
    filters: HashMap<FilterId, SharedFilter>,
    registration_order: Vec<FilterId>,
    connections: Vec<Connection>,
    next_id: u32,
}

impl FilterGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `filter`, returning a fresh id starting at 1. Registering a filter that is
    /// already present (by `Arc` identity) is a no-op that returns [`FilterId::NONE`].
    pub fn register_filter(&mut self, filter: SharedFilter) -> FilterId {
        if self
            .filters
            .values()
            .any(|existing| Arc::ptr_eq(existing, &filter))
        {
            return FilterId::NONE;
        }
        self.next_id += 1;
        let id = FilterId(self.next_id);
        self.filters.insert(id, filter);
        self.registration_order.push(id);
        id
    }

    /// Removes a filter from the registry and drops any connections touching it. Does not call
    /// `finalize` — callers are expected to do that before unregistering.
    pub fn unregister_filter(&mut self, id: FilterId) {
        self.filters.remove(&id);
        self.registration_order.retain(|&x| x != id);
        self.connections
            .retain(|c| c.upstream != id && c.downstream != id);
    }

    /// Looks up a registered filter by id.
    pub fn get_filter(&self, id: FilterId) -> Option<SharedFilter> {
        self.filters.get(&id).cloned()
    }

    /// Iterates registered ids in registration order.
    pub fn enum_filters(&self) -> impl Iterator<Item = FilterId> + '_ {
        self.registration_order.iter().copied()
    }

    /// Validates every connection in `connections` (registered endpoints, in-range sink index)
    /// before wiring any of them; on the first failure, none are applied.
    pub fn connect(&mut self, connections: &[Connection]) -> Result<()> {
        for c in connections {
            let downstream = self
                .filters
                .get(&c.downstream)
                .ok_or_else(|| Error::Protocol(format!("unregistered downstream filter {:?}", c.downstream)))?;
            self.filters
                .get(&c.upstream)
                .ok_or_else(|| Error::Protocol(format!("unregistered upstream filter {:?}", c.upstream)))?;
            let sink_count = downstream.lock().unwrap().input_sink_count();
            if c.sink_index >= sink_count {
                return Err(Error::Protocol(format!(
                    "sink index {} out of range (filter has {} sinks)",
                    c.sink_index, sink_count
                )));
            }
        }
        for c in connections {
            self.connections.push(*c);
        }
        for c in connections {
            self.apply_connection(c);
        }
        Ok(())
    }

    fn apply_connection(&self, c: &Connection) {
        if let Some(upstream) = self.filters.get(&c.upstream) {
            upstream.lock().unwrap().set_output_filter(
                c.output_index,
                Some(OutputSlot {
                    filter: c.downstream,
                    sink_index: c.sink_index,
                }),
            );
        }
    }

    /// Removes every connection touching `id` on the given `direction` from the recorded
    /// connection list and clears the corresponding wiring on the live filters.
    pub fn disconnect(&mut self, id: FilterId, direction: Direction) {
        let (keep, removed): (Vec<_>, Vec<_>) = self.connections.drain(..).partition(|c| match direction {
            Direction::Upstream => c.upstream != id,
            Direction::Downstream => c.downstream != id,
        });
        self.connections = keep;
        for c in &removed {
            if let Some(upstream) = self.filters.get(&c.upstream) {
                upstream.lock().unwrap().set_output_filter(c.output_index, None);
            }
        }
    }

    /// Re-applies the already-recorded connections touching `id` on `direction` to the live
    /// filter without touching the connection list — used to hot-swap a filter back into an
    /// already-wired graph (e.g. after replacing it post-`reset`).
    pub fn connect_filter(&self, id: FilterId, direction: Direction) {
        for c in &self.connections {
            let matches = match direction {
                Direction::Upstream => c.upstream == id,
                Direction::Downstream => c.downstream == id,
            };
            if matches {
                self.apply_connection(c);
            }
        }
    }

    /// Clears the live wiring touching `id` on `direction` without forgetting the recorded
    /// connections (so a later `connect_filter` can restore it).
    pub fn disconnect_filter(&self, id: FilterId, direction: Direction) {
        for c in &self.connections {
            let matches = match direction {
                Direction::Upstream => c.upstream == id,
                Direction::Downstream => c.downstream == id,
            };
            if matches {
                if let Some(upstream) = self.filters.get(&c.upstream) {
                    upstream.lock().unwrap().set_output_filter(c.output_index, None);
                }
            }
        }
    }

    /// The filter referenced as `upstream` by some connection but never as `downstream` by any
    /// connection. `None` if there are no connections or every upstream also appears downstream.
    pub fn get_root_filter(&self) -> Option<FilterId> {
        if self.connections.is_empty() {
            return None;
        }
        let downstreams: std::collections::HashSet<_> = self.connections.iter().map(|c| c.downstream).collect();
        self.registration_order
            .iter()
            .copied()
            .find(|id| self.connections.iter().any(|c| c.upstream == *id) && !downstreams.contains(id))
    }

    /// Pre-order depth-first walk starting at `root` (or [`FilterGraph::get_root_filter`] if
    /// `None`), following each filter's output edges in output-index order. Each filter is
    /// visited at most once even if reachable by more than one path.
    pub fn walk_graph(&self, root: Option<FilterId>, mut visit: impl FnMut(FilterId)) {
        let start = match root.or_else(|| self.get_root_filter()) {
            Some(id) => id,
            None => return,
        };
        let mut visited = std::collections::HashSet::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            visit(id);
            let Some(filter) = self.filters.get(&id) else {
                continue;
            };
            let guard = filter.lock().unwrap();
            let mut next: Vec<FilterId> = (0..guard.output_count())
                .rev()
                .filter_map(|i| guard.output_filter(i).map(|s| s.filter))
                .collect();
            drop(guard);
            stack.append(&mut next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::filter_base::OutputFilters;

    struct StubFilter {
        name: &'static str,
        outputs: OutputFilters,
        sinks: usize,
    }

    impl StubFilter {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                outputs: OutputFilters::new(1),
                sinks: 1,
            }
        }
    }

    impl Filter for StubFilter {
        fn name(&self) -> &str {
            self.name
        }
        fn input_sink_count(&self) -> usize {
            self.sinks
        }
        fn set_output_filter(&mut self, output_index: usize, slot: Option<OutputSlot>) {
            self.outputs.set(output_index, slot);
        }
        fn output_filter(&self, output_index: usize) -> Option<OutputSlot> {
            self.outputs.get(output_index)
        }
    }

    fn stub(name: &'static str) -> SharedFilter {
        Arc::new(Mutex::new(StubFilter::new(name)))
    }

    #[test]
    fn register_assigns_monotonic_ids_starting_at_one() {
        let mut graph = FilterGraph::new();
        let a = graph.register_filter(stub("a"));
        let b = graph.register_filter(stub("b"));
        assert_eq!(a, FilterId(1));
        assert_eq!(b, FilterId(2));
    }

    #[test]
    fn registering_same_filter_twice_returns_sentinel() {
        let mut graph = FilterGraph::new();
        let filter = stub("a");
        graph.register_filter(filter.clone());
        assert_eq!(graph.register_filter(filter), FilterId::NONE);
    }

    #[test]
    fn connect_validates_all_before_applying_any() {
        let mut graph = FilterGraph::new();
        let a = graph.register_filter(stub("a"));
        let b = graph.register_filter(stub("b"));
        let bogus = FilterId(999);

        let result = graph.connect(&[
            Connection {
                upstream: a,
                downstream: b,
                sink_index: 0,
                output_index: 0,
            },
            Connection {
                upstream: b,
                downstream: bogus,
                sink_index: 0,
                output_index: 0,
            },
        ]);
        assert!(result.is_err());
        // Neither connection should have been applied.
        let a_filter = graph.get_filter(a).unwrap();
        assert!(a_filter.lock().unwrap().output_filter(0).is_none());
    }

    #[test]
    fn walk_graph_visits_in_output_order_without_revisiting() {
        let mut graph = FilterGraph::new();
        let a = graph.register_filter(stub("a"));
        let b = graph.register_filter(stub("b"));
        let c = graph.register_filter(stub("c"));

        graph
            .connect(&[
                Connection {
                    upstream: a,
                    downstream: b,
                    sink_index: 0,
                    output_index: 0,
                },
                Connection {
                    upstream: b,
                    downstream: c,
                    sink_index: 0,
                    output_index: 0,
                },
            ])
            .unwrap();

        assert_eq!(graph.get_root_filter(), Some(a));

        let mut visited = Vec::new();
        graph.walk_graph(None, |id| visited.push(id));
        assert_eq!(visited, vec![a, b, c]);
    }

    #[test]
    fn get_root_filter_is_none_without_connections() {
        let mut graph = FilterGraph::new();
        graph.register_filter(stub("a"));
        assert_eq!(graph.get_root_filter(), None);
    }
}
