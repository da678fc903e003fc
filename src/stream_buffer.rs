//! Bounded, block-based stream buffer decoupling producers from consumers.
//!
//! A [`StreamBuffer`] is a queue of [`DataStorage`] blocks, each tagged with the serial byte
//! offset of its first byte in the buffer's write history. Any number of readers may hold a
//! position into that history; a block is evicted only once no registered reader position falls
//! within its range.

use crate::data_storage::DataStorageOps;
use crate::DataStorage;
use std::collections::HashMap;
use std::sync::Mutex;

/// Sentinel reader position meaning "the oldest available data".
pub const POS_BEGIN: i64 = -1;
/// Sentinel reader position meaning "no position set".
pub const POS_INVALID: i64 = -2;

/// Opaque handle identifying a registered reader position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReaderHandle(u64);

struct Block {
    storage: DataStorage,
    serial: u64,
}

impl Block {
    fn used_size(&self) -> u64 {
        self.storage.data_size()
    }

    fn capacity(&self) -> u64 {
        self.storage.capacity()
    }

    fn contains(&self, pos: u64) -> bool {
        pos >= self.serial && pos < self.serial + self.capacity()
    }
}

struct Inner {
    blocks: Vec<Block>,
    block_size: u64,
    min_blocks: usize,
    max_blocks: usize,
    write_serial: u64,
    readers: HashMap<u64, i64>,
    next_handle: u64,
    dropped_bytes: u64,
}

impl Inner {
    fn tail_serial_end(&self) -> u64 {
        self.blocks
            .last()
            .map(|b| b.serial + b.used_size())
            .unwrap_or(self.write_serial)
    }

    fn is_locked(&self, block: &Block) -> bool {
        let lo = block.serial;
        let hi = block.serial + block.capacity();
        self.readers.values().any(|&p| {
            if p < 0 {
                // POS_BEGIN resolves to the oldest block and always locks it.
                self.blocks.first().map(|f| f.serial) == Some(lo)
            } else {
                (p as u64) >= lo && (p as u64) < hi
            }
        })
    }

    /// Evicts blocks from the front while above `min_blocks` and the front block is unlocked.
    fn reclaim(&mut self) {
        while self.blocks.len() > self.min_blocks {
            let locked = match self.blocks.first() {
                Some(b) => self.is_locked(b),
                None => break,
            };
            if locked {
                break;
            }
            self.blocks.remove(0);
        }
    }

    fn push_back(&mut self, mut bytes: &[u8]) -> usize {
        let mut accepted = 0usize;
        // Fill the tail block first, if it has room.
        if let Some(tail) = self.blocks.last_mut() {
            if !tail.storage.is_full() {
                let pos = tail.used_size();
                tail.storage.set_pos(pos);
                let n = tail.storage.write(bytes);
                accepted += n;
                bytes = &bytes[n..];
                self.write_serial = tail.serial + tail.storage.data_size();
            }
        }

        while !bytes.is_empty() {
            let new_block = if self.blocks.len() < self.max_blocks {
                true
            } else {
                // Reuse the front block if it is unlocked.
                let front_locked = self
                    .blocks
                    .first()
                    .map(|b| self.is_locked(b))
                    .unwrap_or(true);
                if front_locked {
                    break;
                }
                false
            };

            let mut block = if new_block {
                let mut storage = DataStorage::new_memory();
                storage.allocate(self.block_size);
                Block {
                    storage,
                    serial: self.write_serial,
                }
            } else {
                let mut block = self.blocks.remove(0);
                block.storage.free();
                block.storage.allocate(self.block_size);
                block.serial = self.write_serial;
                block
            };

            let n = block.storage.write(bytes);
            accepted += n;
            bytes = &bytes[n..];
            self.write_serial = block.serial + block.storage.data_size();
            let block_still_has_room = !block.storage.is_full();
            self.blocks.push(block);
            if block_still_has_room {
                // Source exhausted before filling this block; nothing more to give it.
                break;
            }
        }

        accepted
    }

    fn block_index_for(&self, pos: u64) -> Option<usize> {
        self.blocks
            .iter()
            .position(|b| pos >= b.serial && pos < b.serial + b.used_size())
    }

    fn read(&mut self, pos: &mut i64, out: &mut [u8]) -> usize {
        let oldest = match self.blocks.first() {
            Some(b) => b.serial,
            None => return 0,
        };
        let mut p = if *pos < 0 { oldest } else { (*pos as u64).max(oldest) };
        if p >= self.tail_serial_end() {
            *pos = p as i64;
            return 0;
        }

        let mut written = 0usize;
        while written < out.len() {
            let idx = match self.block_index_for(p) {
                Some(i) => i,
                None => break,
            };
            let block = &mut self.blocks[idx];
            let offset = (p - block.serial) as usize;
            let available = block.used_size() as usize - offset;
            let want = (out.len() - written).min(available);
            block.storage.set_pos(offset as u64);
            let n = block.storage.read(&mut out[written..written + want]);
            written += n;
            p += n as u64;
            if n == 0 || n < want {
                break;
            }
        }
        *pos = p as i64;
        written
    }

    fn set_reader_pos(&mut self, handle: u64, pos: i64) {
        self.readers.insert(handle, pos);
        self.reclaim();
    }

    fn remove_reader(&mut self, handle: u64) {
        self.readers.remove(&handle);
        self.reclaim();
    }

    fn set_size(&mut self, block_size: u64, min_blocks: usize, max_blocks: usize, discard: bool) {
        if block_size != self.block_size {
            let keep_total = (max_blocks as u64).saturating_mul(block_size);
            let mut kept: Vec<u8> = Vec::new();
            for block in self.blocks.iter_mut().rev() {
                if kept.len() as u64 >= keep_total {
                    break;
                }
                let size = block.used_size() as usize;
                let mut buf = vec![0u8; size];
                block.storage.set_pos(0);
                block.storage.read(&mut buf);
                buf.extend_from_slice(&kept);
                kept = buf;
                if kept.len() as u64 > keep_total {
                    let drop = kept.len() as u64 - keep_total;
                    kept.drain(0..drop as usize);
                }
            }
            self.block_size = block_size;
            self.min_blocks = min_blocks;
            self.max_blocks = max_blocks;
            self.blocks.clear();
            self.readers.clear();
            self.write_serial = 0;
            self.push_back(&kept);
        } else if max_blocks < self.max_blocks && discard {
            self.max_blocks = max_blocks;
            while self.blocks.len() > max_blocks {
                self.blocks.remove(0);
            }
            self.min_blocks = min_blocks.min(max_blocks);
        } else {
            self.min_blocks = min_blocks;
            self.max_blocks = max_blocks;
            self.reclaim();
        }
    }
}

/// A block queue of [`DataStorage`] cells, addressed by monotonically increasing serial
/// position, safe for any number of concurrent readers.
///
/// All public operations take a single internal lock (`Mutex`); no reader-position hand-out
/// leaks the lock, so two threads may write and read concurrently, serialized only briefly on
/// the lock itself.
pub struct StreamBuffer {
    inner: Mutex<Inner>,
}

impl StreamBuffer {
    /// Creates a buffer. Rejects `block_size == 0`, `max_blocks == 0`, or `min_blocks >
    /// max_blocks` by clamping `min_blocks` to `max_blocks` and `max_blocks`/`block_size` to 1
    /// (the original's `IsFull` treats `max_blocks == 0` as always-full; callers should not rely
    /// on that and this constructor simply refuses to construct a degenerate buffer).
    pub fn new(block_size: u64, min_blocks: usize, max_blocks: usize) -> Self {
        let block_size = block_size.max(1);
        let max_blocks = max_blocks.max(1);
        let min_blocks = min_blocks.min(max_blocks);
        Self {
            inner: Mutex::new(Inner {
                blocks: Vec::new(),
                block_size,
                min_blocks,
                max_blocks,
                write_serial: 0,
                readers: HashMap::new(),
                next_handle: 1,
                dropped_bytes: 0,
            }),
        }
    }

    /// Appends `bytes`, returning the number of bytes actually accepted. Fewer than
    /// `bytes.len()` bytes are accepted when `max_blocks` is reached and the oldest block cannot
    /// be evicted (a live reader still references it).
    pub fn push_back(&self, bytes: &[u8]) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let accepted = inner.push_back(bytes);
        if accepted < bytes.len() {
            inner.dropped_bytes += (bytes.len() - accepted) as u64;
        }
        accepted
    }

    /// Copies bytes starting at `*pos` into `out`, advancing `*pos` past the last byte copied.
    /// Returns the number of bytes copied; never blocks. A `*pos` before the oldest block is
    /// clamped forward; a `*pos` at or past the write head returns 0.
    pub fn read(&self, pos: &mut i64, out: &mut [u8]) -> usize {
        self.inner.lock().unwrap().read(pos, out)
    }

    /// Registers a new reader handle at [`POS_BEGIN`] (resolves to the oldest available byte).
    pub fn open_reader(&self) -> ReaderHandle {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_handle;
        inner.next_handle += 1;
        inner.set_reader_pos(id, POS_BEGIN);
        ReaderHandle(id)
    }

    /// Updates a reader's position, re-evaluating block eviction.
    pub fn set_reader_pos(&self, handle: ReaderHandle, pos: i64) {
        self.inner.lock().unwrap().set_reader_pos(handle.0, pos);
    }

    /// Current position of a reader, or [`POS_INVALID`] if the handle is unknown.
    pub fn reader_pos(&self, handle: ReaderHandle) -> i64 {
        self.inner
            .lock()
            .unwrap()
            .readers
            .get(&handle.0)
            .copied()
            .unwrap_or(POS_INVALID)
    }

    /// Unregisters a reader, re-evaluating block eviction.
    pub fn close_reader(&self, handle: ReaderHandle) {
        self.inner.lock().unwrap().remove_reader(handle.0);
    }

    /// Reconfigures block size/count. See [`crate::stream_buffer`] module docs for the resize
    /// semantics: a `block_size` change drains and repacks retained data (newest-first, up to the
    /// new total capacity); a `max_blocks`-only shrink with `discard == true` pops from the front
    /// even if that evicts a locked block.
    pub fn set_size(&self, block_size: u64, min_blocks: usize, max_blocks: usize, discard: bool) {
        let block_size = block_size.max(1);
        let max_blocks = max_blocks.max(1);
        let min_blocks = min_blocks.min(max_blocks);
        self.inner
            .lock()
            .unwrap()
            .set_size(block_size, min_blocks, max_blocks, discard);
    }

    /// Total bytes currently buffered across all blocks.
    pub fn buffered_size(&self) -> u64 {
        let inner = self.inner.lock().unwrap();
        inner.blocks.iter().map(|b| b.used_size()).sum()
    }

    /// Number of blocks currently queued.
    pub fn block_count(&self) -> usize {
        self.inner.lock().unwrap().blocks.len()
    }

    /// Bytes dropped by `push_back` because no block could be evicted to make room.
    pub fn dropped_bytes(&self) -> u64 {
        self.inner.lock().unwrap().dropped_bytes
    }

    /// Serial position one past the last byte ever written.
    pub fn write_serial(&self) -> u64 {
        self.inner.lock().unwrap().write_serial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_preserved_across_reads() {
        let buf = StreamBuffer::new(4, 1, 4);
        buf.push_back(b"hello world!");
        let mut pos = POS_BEGIN;
        let mut out = vec![0u8; 12];
        let n = buf.read(&mut pos, &mut out);
        assert_eq!(n, 12);
        assert_eq!(&out[..n], b"hello world!");
    }

    #[test]
    fn reader_registration_locks_its_block() {
        let buf = StreamBuffer::new(4, 1, 2);
        buf.push_back(b"AAAA");
        buf.push_back(b"BBBB");
        let reader = buf.open_reader();
        buf.set_reader_pos(reader, 0);

        // Buffer is at max_blocks=2; pushing more can't evict the locked oldest block.
        let accepted = buf.push_back(b"CCCC");
        assert_eq!(accepted, 0);
        assert_eq!(buf.block_count(), 2);

        // Advancing the reader past block 0 allows eviction.
        buf.set_reader_pos(reader, 4);
        let accepted = buf.push_back(b"CCCC");
        assert_eq!(accepted, 4);
        assert_eq!(buf.block_count(), 2);

        let mut pos = 4i64;
        let mut out = [0u8; 8];
        let n = buf.read(&mut pos, &mut out);
        assert_eq!(&out[..n], b"BBBBCCCC");
    }

    #[test]
    fn lagging_reader_clamps_forward_on_eviction() {
        let buf = StreamBuffer::new(4, 1, 1);
        buf.push_back(b"AAAA");
        // No reader registered: min_blocks=1 keeps exactly one block, so the next full block
        // evicts the first.
        buf.push_back(b"BBBB");
        let mut pos = POS_BEGIN;
        let mut out = [0u8; 4];
        let n = buf.read(&mut pos, &mut out);
        assert_eq!(&out[..n], b"BBBB");
    }
}
