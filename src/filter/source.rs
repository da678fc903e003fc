//! Push/pull source filter: the entry point that feeds transport-stream bytes into a graph.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::filter::filter_base::{Filter, OutputFilters, OutputSlot};

/// Which mode a [`SourceFilter`] was constructed in; fixed for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// A background worker thread reads from the medium and pushes into the downstream chain.
    Push,
    /// The downstream actively calls [`SourceFilter::fetch_source`].
    Pull,
}

/// A channel-set request payload; opaque to the worker beyond pacing purposes.
#[derive(Debug, Clone, Default)]
pub struct ChannelSpec {
    /// Tuning space/network identifier.
    pub space: u32,
    /// Channel number within `space`.
    pub channel: u32,
}

/// One request posted to a push source's worker queue.
#[derive(Debug, Clone)]
pub enum SourceRequest {
    /// Begin forwarding data downstream.
    Start,
    /// Stop forwarding data downstream.
    Stop,
    /// Clear downstream filter state before the next data push resumes.
    Reset,
    /// Discard any buffered downstream data without a channel change.
    PurgeStream,
    /// Tune to a new channel, honoring the configured pacing delay.
    SetChannel(ChannelSpec),
    /// Terminate the worker thread.
    End,
}

/// Supplies bytes to the worker thread (push mode) or to `fetch_source` (pull mode). Implemented
/// by whatever owns the actual tuner/file/socket; kept separate from [`SourceFilter`] so the
/// filter itself stays agnostic to the medium.
pub trait SourceMedium: Send {
    /// Reads up to `buf.len()` bytes, returning the number read (`0` at end of stream).
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Applies a channel change; `true` on success.
    fn set_channel(&mut self, spec: &ChannelSpec) -> bool;
}

struct RequestQueue {
    queue: VecDeque<SourceRequest>,
    stopped: bool,
}

/// Pacing knobs for channel-set requests, applied by the worker before issuing the downstream
/// call.
#[derive(Debug, Clone, Copy)]
pub struct ChannelPacing {
    /// Delay applied before the first channel set after open.
    pub first_channel_set_delay: Duration,
    /// Minimum spacing enforced between successive channel sets.
    pub min_channel_change_interval: Duration,
}

impl Default for ChannelPacing {
    fn default() -> Self {
        Self {
            first_channel_set_delay: Duration::ZERO,
            min_channel_change_interval: Duration::ZERO,
        }
    }
}

/// Push/pull transport-stream source.
pub struct SourceFilter {
    mode: SourceMode,
    outputs: OutputFilters,
    name: String,
    open: bool,
    opening: bool,
    streaming: bool,
    pacing: ChannelPacing,
    queue: Arc<(Mutex<RequestQueue>, Condvar, Condvar)>,
    worker: Option<JoinHandle<()>>,
}

impl SourceFilter {
    /// Creates a source in the given mode with default (zero) channel pacing.
    pub fn new(mode: SourceMode) -> Self {
        Self {
            mode,
            outputs: OutputFilters::new(1),
            name: "SourceFilter".to_string(),
            open: false,
            opening: false,
            streaming: false,
            pacing: ChannelPacing::default(),
            queue: Arc::new((Mutex::new(RequestQueue { queue: VecDeque::new(), stopped: true }), Condvar::new(), Condvar::new())),
            worker: None,
        }
    }

    /// Overrides the channel-set pacing knobs.
    pub fn set_pacing(&mut self, pacing: ChannelPacing) {
        self.pacing = pacing;
    }

    /// `true` while a push-mode source has an active worker.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Opens the source. Idempotent on an already-open source: returns `false` ("in progress")
    /// without side effects. In push mode, spawns the worker thread that drains the request
    /// queue; in pull mode, only flips the open flag.
    pub fn open(&mut self, medium: Box<dyn SourceMedium>, mut on_data: impl FnMut(&[u8]) + Send + 'static) -> bool {
        if self.open || self.opening {
            return false;
        }
        self.opening = true;
        self.open = true;

        if self.mode == SourceMode::Push {
            {
                let (lock, _, _) = &*self.queue;
                let mut state = lock.lock().unwrap();
                state.stopped = false;
                state.queue.clear();
            }
            let queue = self.queue.clone();
            let pacing = self.pacing;
            let mut medium = medium;
            self.worker = Some(std::thread::spawn(move || {
                run_worker(&queue, &mut *medium, pacing, &mut on_data);
            }));
        }

        self.opening = false;
        true
    }

    /// Closes the source. No-op if already closed.
    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        self.post(SourceRequest::End);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.open = false;
    }

    /// Posts a request to the worker queue (push mode only; ignored in pull mode).
    pub fn post(&self, request: SourceRequest) {
        if self.mode != SourceMode::Push {
            return;
        }
        let (lock, queued_cv, _) = &*self.queue;
        let mut state = lock.lock().unwrap();
        state.queue.push_back(request);
        queued_cv.notify_one();
    }

    /// Blocks until the request queue has drained or `timeout` elapses. Returns `true` if the
    /// queue drained, `false` on timeout.
    pub fn wait_all_requests(&self, timeout: Duration) -> bool {
        let (lock, _, processed_cv) = &*self.queue;
        let state = lock.lock().unwrap();
        let (_, result) = processed_cv
            .wait_timeout_while(state, timeout, |s| !s.queue.is_empty())
            .unwrap();
        !result.timed_out()
    }

    /// Pull-mode read: synchronously returns up to `buf.len()` bytes from `medium`.
    pub fn fetch_source(&self, medium: &mut dyn SourceMedium, buf: &mut [u8]) -> usize {
        if self.mode != SourceMode::Pull || !self.open {
            return 0;
        }
        medium.read(buf)
    }
}

fn run_worker(
    queue: &Arc<(Mutex<RequestQueue>, Condvar, Condvar)>,
    medium: &mut dyn SourceMedium,
    pacing: ChannelPacing,
    on_data: &mut dyn FnMut(&[u8]),
) {
    let (lock, queued_cv, processed_cv) = &**queue;
    let mut last_channel_set: Option<Instant> = None;
    let mut first_set = true;
    let mut streaming = false;
    let mut buf = [0u8; 4096];

    loop {
        let request = {
            let mut state = lock.lock().unwrap();
            loop {
                if let Some(req) = state.queue.pop_front() {
                    break req;
                }
                if streaming {
                    drop(state);
                    let n = medium.read(&mut buf);
                    if n > 0 {
                        on_data(&buf[..n]);
                    }
                    state = lock.lock().unwrap();
                    if state.queue.is_empty() {
                        continue;
                    }
                } else {
                    let (guard, _) = queued_cv.wait_timeout(state, Duration::from_millis(50)).unwrap();
                    state = guard;
                }
            }
        };

        let is_end = matches!(request, SourceRequest::End);
        match request {
            SourceRequest::Start => streaming = true,
            SourceRequest::Stop => streaming = false,
            SourceRequest::Reset => {}
            SourceRequest::PurgeStream => {}
            SourceRequest::SetChannel(spec) => {
                let delay = if first_set {
                    pacing.first_channel_set_delay
                } else {
                    let elapsed = last_channel_set.map(|t| t.elapsed()).unwrap_or(pacing.min_channel_change_interval);
                    pacing.min_channel_change_interval.saturating_sub(elapsed)
                };
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                medium.set_channel(&spec);
                last_channel_set = Some(Instant::now());
                first_set = false;
            }
            SourceRequest::End => {}
        }

        let mut state = lock.lock().unwrap();
        if state.queue.is_empty() {
            processed_cv.notify_all();
        }
        if is_end {
            state.stopped = true;
            processed_cv.notify_all();
            break;
        }
    }
}

impl Filter for SourceFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_streaming(&mut self) -> bool {
        self.post(SourceRequest::Start);
        self.streaming = true;
        true
    }

    fn stop_streaming(&mut self) {
        self.post(SourceRequest::Stop);
        self.streaming = false;
    }

    fn reset(&mut self) {
        self.post(SourceRequest::Reset);
    }

    fn input_sink_count(&self) -> usize {
        0
    }

    fn output_count(&self) -> usize {
        1
    }

    fn set_output_filter(&mut self, output_index: usize, slot: Option<OutputSlot>) {
        self.outputs.set(output_index, slot);
    }

    fn output_filter(&self, output_index: usize) -> Option<OutputSlot> {
        self.outputs.get(output_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    struct FixedMedium {
        chunks: Vec<Vec<u8>>,
        channel_sets: Arc<Mutex<Vec<ChannelSpec>>>,
    }

    impl SourceMedium for FixedMedium {
        fn read(&mut self, buf: &mut [u8]) -> usize {
            if let Some(chunk) = self.chunks.pop() {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                n
            } else {
                std::thread::sleep(Duration::from_millis(5));
                0
            }
        }
        fn set_channel(&mut self, spec: &ChannelSpec) -> bool {
            self.channel_sets.lock().unwrap().push(spec.clone());
            true
        }
    }

    #[test]
    fn open_is_idempotent_while_already_open() {
        let mut source = SourceFilter::new(SourceMode::Push);
        let medium = Box::new(FixedMedium {
            chunks: vec![],
            channel_sets: Arc::new(Mutex::new(Vec::new())),
        });
        assert!(source.open(medium, |_| {}));
        let medium2 = Box::new(FixedMedium {
            chunks: vec![],
            channel_sets: Arc::new(Mutex::new(Vec::new())),
        });
        assert!(!source.open(medium2, |_| {}));
        source.close();
    }

    #[test]
    fn push_worker_delivers_data_after_start() {
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let mut source = SourceFilter::new(SourceMode::Push);
        let medium = Box::new(FixedMedium {
            chunks: vec![vec![1, 2, 3]],
            channel_sets: Arc::new(Mutex::new(Vec::new())),
        });
        source.open(medium, move |data| {
            let _ = tx.send(data.to_vec());
        });
        source.post(SourceRequest::Start);
        let received = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(received, vec![1, 2, 3]);
        source.close();
    }

    #[test]
    fn wait_all_requests_returns_true_once_drained() {
        let mut source = SourceFilter::new(SourceMode::Push);
        let medium = Box::new(FixedMedium {
            chunks: vec![],
            channel_sets: Arc::new(Mutex::new(Vec::new())),
        });
        source.open(medium, |_| {});
        source.post(SourceRequest::SetChannel(ChannelSpec { space: 0, channel: 1 }));
        assert!(source.wait_all_requests(Duration::from_secs(2)));
        source.close();
    }
}
