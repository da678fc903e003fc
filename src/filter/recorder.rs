//! Recorder filter: multiplexes N concurrent recording tasks against one incoming packet stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::data_streamer::StreamerOutput;
use crate::filter::filter_base::{Filter, OutputFilters, OutputSlot};
use crate::{DataStreamer, StreamBuffer};

/// Kind of elementary content a packet carries, used by a task's [`StreamSelector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Video elementary stream data.
    Video,
    /// Audio elementary stream data.
    Audio,
    /// Caption/subtitle elementary stream data.
    Caption,
    /// Any other (data carousel, etc.) elementary stream data.
    Data,
}

/// Which elementary-stream kinds a task admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSelector {
    /// Admit video packets.
    pub video: bool,
    /// Admit audio packets.
    pub audio: bool,
    /// Admit caption packets.
    pub caption: bool,
    /// Admit data-carousel packets.
    pub data: bool,
}

impl StreamSelector {
    /// A selector that admits every kind.
    pub fn all() -> Self {
        Self {
            video: true,
            audio: true,
            caption: true,
            data: true,
        }
    }

    /// `true` if this selector admits `kind`.
    pub fn admits(&self, kind: StreamKind) -> bool {
        match kind {
            StreamKind::Video => self.video,
            StreamKind::Audio => self.audio,
            StreamKind::Caption => self.caption,
            StreamKind::Data => self.data,
        }
    }
}

/// Which service a task records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetService {
    /// A fixed service id.
    Id(u16),
    /// Whatever service the recorder's `set_active_service_id` last reported.
    FollowActive,
}

/// Sink a recording task writes decoded bytes to; implemented by whatever owns the destination
/// file/socket.
pub trait StreamWriter: Send {
    /// Writes `bytes`, returning the number actually written.
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize>;
    /// Total bytes written so far, if the writer can report one.
    fn written_size(&self) -> Option<u64> {
        None
    }
}

struct WriterOutput {
    writer: Box<dyn StreamWriter>,
    write_error_count: u64,
    last_write_failed: bool,
}

impl WriterOutput {
    fn new(writer: Box<dyn StreamWriter>) -> Self {
        Self {
            writer,
            write_error_count: 0,
            last_write_failed: false,
        }
    }
}

impl StreamerOutput for WriterOutput {
    fn output_data(&mut self, bytes: &[u8]) -> usize {
        match self.writer.write(bytes) {
            Ok(n) => {
                self.last_write_failed = false;
                n
            }
            Err(_) => {
                if !self.last_write_failed {
                    self.write_error_count += 1;
                    self.last_write_failed = true;
                }
                0
            }
        }
    }
}

/// Snapshot of one task's counters. `write_bytes` uses `u64::MAX` to mean "the writer can't
/// report a size".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordingStatistics {
    /// Bytes accepted from the packet-dispatch path.
    pub input_bytes: u64,
    /// Bytes handed to the writer.
    pub output_bytes: u64,
    /// Number of writer invocations.
    pub output_count: u64,
    /// Total bytes the writer reports having written, or `u64::MAX` if unknown.
    pub write_bytes: u64,
    /// Number of write-error transitions observed.
    pub write_error_count: u64,
}

/// Construction-time configuration for a recording task.
pub struct RecordingTaskOptions {
    /// Which service's packets this task records.
    pub target_service: TargetService,
    /// Which elementary-stream kinds this task admits.
    pub selector: StreamSelector,
    /// Size of the pending [`StreamBuffer`], in bytes, or `None` to write directly without
    /// buffering (blocks the dispatch call on the writer).
    pub max_pending_size: Option<usize>,
    /// Write-cache size in bytes; enforced to be at least 1 KiB.
    pub write_cache_size: usize,
    /// Whether a service change drops whatever is currently pending rather than draining it.
    pub clear_pending_on_service_changed: bool,
}

const PENDING_BLOCK_SIZE: u64 = 1024 * 1024;
const MIN_WRITE_CACHE_SIZE: usize = 1024;

struct TaskState {
    target_service: TargetService,
    selector: StreamSelector,
    paused: bool,
    clear_pending_on_service_changed: bool,
    pending: Option<Arc<StreamBuffer>>,
    streamer: DataStreamer<WriterOutput>,
    pending_swap: Option<(Box<dyn StreamWriter>, bool)>,
}

impl TaskState {
    fn targets(&self, active_service_id: Option<u16>, packet_service_id: u16) -> bool {
        match self.target_service {
            TargetService::Id(id) => id == packet_service_id,
            TargetService::FollowActive => active_service_id == Some(packet_service_id),
        }
    }

    fn maybe_apply_pending_swap(&mut self) {
        if let Some((_, accept_loss)) = &self.pending_swap {
            if *accept_loss || self.streamer.is_idle() {
                let (writer, _) = self.pending_swap.take().unwrap();
                *self.streamer.output_mut() = WriterOutput::new(writer);
            }
        }
    }

    fn tick(&mut self) {
        self.streamer.tick();
        self.maybe_apply_pending_swap();
    }

    fn statistics(&self) -> RecordingStatistics {
        let s = self.streamer.statistics();
        RecordingStatistics {
            input_bytes: s.input_bytes,
            output_bytes: s.output_bytes,
            output_count: s.output_count,
            write_bytes: self.streamer.output().writer.written_size().unwrap_or(u64::MAX),
            write_error_count: self.streamer.output().write_error_count,
        }
    }
}

/// A single active recording, draining a pending buffer (if configured) through an owned worker
/// thread into its [`StreamWriter`].
pub struct RecordingTask {
    state: Arc<Mutex<TaskState>>,
    stop: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl RecordingTask {
    fn new(writer: Box<dyn StreamWriter>, options: RecordingTaskOptions) -> Self {
        let cache_size = options.write_cache_size.max(MIN_WRITE_CACHE_SIZE);
        let mut streamer = DataStreamer::new(WriterOutput::new(writer), cache_size);
        let pending = options.max_pending_size.map(|size| {
            let blocks = ((size as u64) / PENDING_BLOCK_SIZE).max(1) as usize;
            let buffer = Arc::new(StreamBuffer::new(PENDING_BLOCK_SIZE, 1, blocks));
            streamer.set_input_buffer(buffer.clone());
            buffer
        });
        let state = Arc::new(Mutex::new(TaskState {
            target_service: options.target_service,
            selector: options.selector,
            paused: false,
            clear_pending_on_service_changed: options.clear_pending_on_service_changed,
            pending,
            streamer,
            pending_swap: None,
        }));
        let stop = Arc::new(AtomicBool::new(false));
        let worker = {
            let state = state.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    {
                        let mut guard = state.lock().unwrap();
                        guard.tick();
                    }
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
            })
        };
        Self {
            state,
            stop,
            worker: Some(worker),
        }
    }

    /// Pauses packet admission without tearing down buffered-but-undrained data.
    pub fn set_paused(&self, paused: bool) {
        self.state.lock().unwrap().paused = paused;
    }

    /// `true` if this task is currently paused.
    pub fn is_paused(&self) -> bool {
        self.state.lock().unwrap().paused
    }

    /// Current counters.
    pub fn statistics(&self) -> RecordingStatistics {
        self.state.lock().unwrap().statistics()
    }

    /// Swaps the underlying writer. The new writer takes effect only after the currently
    /// buffered bytes are flushed, unless `accept_loss` is set.
    pub fn reopen(&self, writer: Box<dyn StreamWriter>, accept_loss: bool) {
        let mut guard = self.state.lock().unwrap();
        guard.pending_swap = Some((writer, accept_loss));
        guard.maybe_apply_pending_swap();
    }

    fn stop_worker(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RecordingTask {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

/// Opaque handle to a task registered with a [`RecorderFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordingTaskId(u64);

/// Multiplexes recording tasks against one incoming packet stream and broadcasts routing/error
/// events to them.
pub struct RecorderFilter {
    name: String,
    outputs: OutputFilters,
    tasks: HashMap<RecordingTaskId, RecordingTask>,
    next_task_id: u64,
    active_service_id: Option<u16>,
    write_error_listeners: Vec<Box<dyn Fn(RecordingTaskId) + Send>>,
}

impl Default for RecorderFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl RecorderFilter {
    /// Creates a recorder with no tasks.
    pub fn new() -> Self {
        Self {
            name: "RecorderFilter".to_string(),
            outputs: OutputFilters::new(1),
            tasks: HashMap::new(),
            next_task_id: 0,
            active_service_id: None,
            write_error_listeners: Vec::new(),
        }
    }

    /// Registers a listener invoked (once per write-error transition) when any task's writer
    /// starts failing.
    pub fn add_write_error_listener(&mut self, listener: impl Fn(RecordingTaskId) + Send + 'static) {
        self.write_error_listeners.push(Box::new(listener));
    }

    /// Creates a new recording task, returning a handle.
    pub fn create_task(&mut self, writer: Box<dyn StreamWriter>, options: RecordingTaskOptions) -> RecordingTaskId {
        self.next_task_id += 1;
        let id = RecordingTaskId(self.next_task_id);
        self.tasks.insert(id, RecordingTask::new(writer, options));
        id
    }

    /// Tears down a task, stopping its worker first.
    pub fn delete_task(&mut self, id: RecordingTaskId) {
        self.tasks.remove(&id);
    }

    /// Tears down every task.
    pub fn delete_all_tasks(&mut self) {
        self.tasks.clear();
    }

    /// `true` if `id` refers to a currently-registered task.
    pub fn is_task_valid(&self, id: RecordingTaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Looks up a task by handle.
    pub fn task(&self, id: RecordingTaskId) -> Option<&RecordingTask> {
        self.tasks.get(&id)
    }

    /// Broadcasts the currently active service id to every `FollowActive` task.
    pub fn set_active_service_id(&mut self, service_id: u16) {
        let changed = self.active_service_id != Some(service_id);
        self.active_service_id = Some(service_id);
        if changed {
            for task in self.tasks.values() {
                let mut guard = task.state.lock().unwrap();
                let should_clear = guard.clear_pending_on_service_changed
                    && matches!(guard.target_service, TargetService::FollowActive);
                if should_clear {
                    if let Some(pending) = guard.pending.clone() {
                        // Re-attaching at the tail discards whatever was queued but not yet
                        // drained, per the task's `clear_pending_on_service_changed` policy.
                        guard.streamer.detach_input();
                        guard.streamer.reattach_input_at_tail(pending);
                    }
                }
            }
        }
    }

    /// Dispatches one input packet to every task: a non-paused task whose target service
    /// matches and whose selector admits `kind` either enqueues into its pending buffer or, if
    /// unbuffered, writes directly (bumping the listener list on a write-error transition).
    pub fn process_packet(&mut self, packet_service_id: u16, kind: StreamKind, data: &[u8]) {
        let active = self.active_service_id;
        for (&id, task) in self.tasks.iter() {
            let mut guard = task.state.lock().unwrap();
            if guard.paused {
                continue;
            }
            if !guard.targets(active, packet_service_id) {
                continue;
            }
            if !guard.selector.admits(kind) {
                continue;
            }
            let errors_before = guard.streamer.output().write_error_count;
            match guard.pending.clone() {
                Some(buffer) => {
                    buffer.push_back(data);
                }
                None => {
                    guard.streamer.input_data(data);
                }
            }
            let errors_after = guard.streamer.output().write_error_count;
            drop(guard);
            if errors_after > errors_before {
                for listener in &self.write_error_listeners {
                    listener(id);
                }
            }
        }
    }
}

impl Filter for RecorderFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_sink_count(&self) -> usize {
        1
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
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct VecWriter(Arc<StdMutex<Vec<u8>>>);

    impl StreamWriter for VecWriter {
        fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(bytes);
            Ok(bytes.len())
        }
        fn written_size(&self) -> Option<u64> {
            Some(self.0.lock().unwrap().len() as u64)
        }
    }

    struct FailingWriter;
    impl StreamWriter for FailingWriter {
        fn write(&mut self, _bytes: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn unbuffered_task_writes_admitted_packets_directly() {
        let mut recorder = RecorderFilter::new();
        let sink = Arc::new(StdMutex::new(Vec::new()));
        let id = recorder.create_task(
            Box::new(VecWriter(sink.clone())),
            RecordingTaskOptions {
                target_service: TargetService::Id(1),
                selector: StreamSelector::all(),
                max_pending_size: None,
                write_cache_size: 4096,
                clear_pending_on_service_changed: false,
            },
        );
        recorder.process_packet(1, StreamKind::Video, b"video-bytes");
        recorder.process_packet(2, StreamKind::Video, b"other-service");
        assert!(recorder.is_task_valid(id));
        assert_eq!(&sink.lock().unwrap()[..], b"video-bytes");
    }

    #[test]
    fn buffered_task_drains_asynchronously() {
        let mut recorder = RecorderFilter::new();
        let sink = Arc::new(StdMutex::new(Vec::new()));
        recorder.create_task(
            Box::new(VecWriter(sink.clone())),
            RecordingTaskOptions {
                target_service: TargetService::Id(7),
                selector: StreamSelector::all(),
                max_pending_size: Some(1024 * 1024),
                write_cache_size: 4096,
                clear_pending_on_service_changed: false,
            },
        );
        recorder.process_packet(7, StreamKind::Audio, b"audio-bytes");
        assert!(wait_until(|| sink.lock().unwrap().as_slice() == b"audio-bytes", Duration::from_secs(2)));
    }

    #[test]
    fn write_error_counts_and_notifies_listener() {
        let notified = Arc::new(StdMutex::new(Vec::new()));
        let notified_clone = notified.clone();
        let mut recorder = RecorderFilter::new();
        recorder.add_write_error_listener(move |id| notified_clone.lock().unwrap().push(id));
        let id = recorder.create_task(
            Box::new(FailingWriter),
            RecordingTaskOptions {
                target_service: TargetService::Id(1),
                selector: StreamSelector::all(),
                max_pending_size: None,
                write_cache_size: 4096,
                clear_pending_on_service_changed: false,
            },
        );
        recorder.process_packet(1, StreamKind::Data, b"x");
        assert_eq!(notified.lock().unwrap().as_slice(), &[id]);
        assert!(recorder.task(id).unwrap().statistics().write_error_count >= 1);
    }
}
