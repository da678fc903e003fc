//! Single-threaded cooperative worker pumping a [`StreamBuffer`] into a sink, through a
//! write-cache, with back-pressure accounting.

use crate::data_storage::DataStorageOps;
use crate::stream_buffer::ReaderHandle;
use crate::{DataBuffer, StreamBuffer};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sink consumed by a [`DataStreamer`].
///
/// Implementors model the teacher's `output_data`/`is_output_valid` pair: `output_data` may
/// accept fewer bytes than offered (a short write), in which case the streamer shifts the
/// remainder to the front of its cache and counts an output error.
pub trait StreamerOutput {
    /// Writes as much of `bytes` as the sink will currently accept, returning the count.
    fn output_data(&mut self, bytes: &[u8]) -> usize;
    /// `true` while the sink is able to accept further data.
    fn is_output_valid(&self) -> bool {
        true
    }
}

/// Running counters maintained by a [`DataStreamer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamerStatistics {
    /// Bytes pulled from the input buffer.
    pub input_bytes: u64,
    /// Bytes accepted by the output sink.
    pub output_bytes: u64,
    /// Number of times `output_data` was invoked.
    pub output_count: u64,
    /// Number of short/failed writes.
    pub output_errors: u64,
}

/// Pumps an input [`StreamBuffer`] through a write cache into an [`StreamerOutput`] sink.
///
/// With no input buffer attached, `input_data` writes straight through to the sink, bypassing
/// the cache entirely (the mode used by non-buffered recording tasks).
pub struct DataStreamer<O: StreamerOutput> {
    output: O,
    cache: DataBuffer,
    cache_pos: usize,
    input: Option<(Arc<StreamBuffer>, ReaderHandle)>,
    stats: StreamerStatistics,
    in_error: bool,
}

impl<O: StreamerOutput> DataStreamer<O> {
    /// Creates a streamer with a write cache of `cache_size` bytes and no input buffer attached
    /// (direct passthrough mode).
    pub fn new(output: O, cache_size: usize) -> Self {
        Self {
            output,
            cache: DataBuffer::with_capacity(cache_size.max(1)),
            cache_pos: 0,
            input: None,
            stats: StreamerStatistics::default(),
            in_error: false,
        }
    }

    /// Attaches an input buffer, opening a fresh reader positioned at the oldest available data.
    pub fn set_input_buffer(&mut self, buffer: Arc<StreamBuffer>) {
        let handle = buffer.open_reader();
        self.input = Some((buffer, handle));
    }

    /// Drops the input reader without closing the streamer; the buffer keeps accumulating
    /// subject to its own block limits. Used for pause.
    pub fn detach_input(&mut self) {
        if let Some((buffer, handle)) = self.input.take() {
            buffer.close_reader(handle);
        }
    }

    /// Re-opens a reader positioned at the current write head (only new data from here on).
    /// Used for resume.
    pub fn reattach_input_at_tail(&mut self, buffer: Arc<StreamBuffer>) {
        let handle = buffer.open_reader();
        buffer.set_reader_pos(handle, buffer.write_serial() as i64);
        self.input = Some((buffer, handle));
    }

    /// Current counters.
    pub fn statistics(&self) -> StreamerStatistics {
        self.stats
    }

    /// Mutable access to the underlying sink (e.g. to swap a recording task's writer).
    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    /// Read-only access to the underlying sink.
    pub fn output(&self) -> &O {
        &self.output
    }

    /// `true` once the write cache is empty and (if an input buffer is attached) the reader has
    /// caught up to the current write head. Used to gate a pending writer swap on "no buffered
    /// bytes would be lost".
    pub fn is_idle(&self) -> bool {
        if self.cache.size() > self.cache_pos {
            return false;
        }
        match &self.input {
            Some((buffer, handle)) => {
                let pos = buffer.reader_pos(*handle);
                pos >= 0 && pos as u64 >= buffer.write_serial()
            }
            None => true,
        }
    }

    fn fill_cache_from_input(&mut self) -> bool {
        let (buffer, handle) = match &self.input {
            Some(pair) => pair,
            None => return false,
        };
        let free = self.cache.capacity() - self.cache.size();
        if free == 0 {
            return false;
        }
        let mut scratch = vec![0u8; free];
        let mut pos = buffer.reader_pos(*handle);
        let n = buffer.read(&mut pos, &mut scratch);
        if n > 0 {
            buffer.set_reader_pos(*handle, pos);
            self.cache.append(&scratch[..n]);
            self.stats.input_bytes += n as u64;
        }
        n > 0
    }

    fn drain_cache_to_output(&mut self) {
        if self.cache_pos >= self.cache.size() {
            self.cache.clear();
            self.cache_pos = 0;
            return;
        }
        let pending = &self.cache.as_slice()[self.cache_pos..];
        let written = self.output.output_data(pending);
        self.stats.output_count += 1;
        self.stats.output_bytes += written as u64;
        if written < pending.len() {
            if !self.in_error {
                self.in_error = true;
            }
            self.stats.output_errors += 1;
            self.cache_pos += written;
        } else {
            self.in_error = false;
            self.cache.clear();
            self.cache_pos = 0;
        }
    }

    /// Runs one iteration: fill the cache from the input (if attached and the cache has room),
    /// then drain whatever the cache holds to the output.
    pub fn tick(&mut self) {
        if self.cache.size() < self.cache.capacity() {
            self.fill_cache_from_input();
        }
        if self.cache.size() > self.cache_pos {
            self.drain_cache_to_output();
        }
    }

    /// Writes `bytes` directly, bypassing any attached input buffer. If no input buffer is
    /// attached this passes straight through to the sink; otherwise it is queued through the
    /// cache exactly as buffered input would be.
    pub fn input_data(&mut self, bytes: &[u8]) -> usize {
        if self.input.is_none() {
            let written = self.output.output_data(bytes);
            self.stats.input_bytes += bytes.len() as u64;
            self.stats.output_bytes += written as u64;
            self.stats.output_count += 1;
            if written < bytes.len() {
                self.stats.output_errors += 1;
            }
            written
        } else {
            self.cache.append(bytes);
            self.stats.input_bytes += bytes.len() as u64;
            self.drain_cache_to_output();
            bytes.len()
        }
    }

    /// Drives the loop until the input is empty or `timeout` elapses. Returns `false` on
    /// timeout; never drops unread input bytes.
    pub fn flush(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let had_input = self.fill_cache_from_input();
            if self.cache.size() > self.cache_pos {
                self.drain_cache_to_output();
            }
            let input_empty = match &self.input {
                Some((buffer, handle)) => {
                    let pos = buffer.reader_pos(*handle);
                    pos >= 0 && pos as u64 >= buffer.write_serial()
                }
                None => true,
            };
            if input_empty && self.cache.size() <= self.cache_pos {
                return true;
            }
            if Instant::now() >= deadline {
                log::warn!("DataStreamer::flush timed out with data still pending");
                return false;
            }
            if !had_input {
                std::thread::yield_now();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecOutput {
        data: Vec<u8>,
        cap_per_call: usize,
    }

    impl StreamerOutput for VecOutput {
        fn output_data(&mut self, bytes: &[u8]) -> usize {
            let n = bytes.len().min(self.cap_per_call);
            self.data.extend_from_slice(&bytes[..n]);
            n
        }
    }

    #[test]
    fn passthrough_without_input_buffer() {
        let mut streamer = DataStreamer::new(
            VecOutput {
                data: Vec::new(),
                cap_per_call: 100,
            },
            16,
        );
        streamer.input_data(b"hello");
        assert_eq!(streamer.output_mut().data, b"hello");
        assert_eq!(streamer.statistics().output_bytes, 5);
    }

    #[test]
    fn short_write_shifts_remainder_and_counts_error() {
        let mut streamer = DataStreamer::new(
            VecOutput {
                data: Vec::new(),
                cap_per_call: 3,
            },
            16,
        );
        let buf = Arc::new(StreamBuffer::new(16, 1, 4));
        buf.push_back(b"0123456789");
        streamer.set_input_buffer(buf);
        for _ in 0..6 {
            streamer.tick();
        }
        assert_eq!(streamer.output_mut().data, b"0123456789");
        assert!(streamer.statistics().output_errors > 0);
    }

    #[test]
    fn flush_drains_all_pending_input() {
        let mut streamer = DataStreamer::new(
            VecOutput {
                data: Vec::new(),
                cap_per_call: 1000,
            },
            4,
        );
        let buf = Arc::new(StreamBuffer::new(4, 1, 4));
        buf.push_back(b"abcdefgh");
        streamer.set_input_buffer(buf);
        assert!(streamer.flush(Duration::from_millis(200)));
        assert_eq!(streamer.output_mut().data, b"abcdefgh");
    }
}
