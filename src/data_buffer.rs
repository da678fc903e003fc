//! Owned, resizable byte container used for PES/ES assembly and as the backing store of
//! in-memory [`crate::DataStorage`].

/// An owned byte container with a distinction between allocated capacity and used size.
///
/// `append` grows capacity as needed (like [`Vec::extend_from_slice`]); `set_size` may only
/// shrink or hold steady (it never allocates); `trim_tail` removes bytes from the end without
/// touching capacity. There is no hidden sharing: every [`DataBuffer`] exclusively owns its
/// storage.
#[derive(Debug, Clone, Default)]
pub struct DataBuffer {
    data: Vec<u8>,
}

impl DataBuffer {
    /// Creates an empty buffer with no allocated storage.
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Creates an empty buffer that has pre-allocated `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    /// Bytes the buffer can hold before it must reallocate.
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Bytes currently holding valid data.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// `true` if the buffer holds no data.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrowed view of the valid data.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutable borrowed view of the valid data.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Appends `bytes` to the end, growing capacity if needed.
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Sets the used size. `size` must not exceed the current capacity; growth beyond capacity
    /// is rejected (use [`DataBuffer::append`] to grow). Shrinking truncates; holding steady is a
    /// no-op. New bytes exposed by growth-within-capacity (when `size` was previously smaller but
    /// the vector already had the capacity from a prior `append`) are zero-filled.
    pub fn set_size(&mut self, size: usize) -> bool {
        if size > self.data.capacity() {
            return false;
        }
        if size <= self.data.len() {
            self.data.truncate(size);
        } else {
            self.data.resize(size, 0);
        }
        true
    }

    /// Removes `n` bytes from the end of the used data. Clamps to the current size.
    pub fn trim_tail(&mut self, n: usize) {
        let new_len = self.data.len().saturating_sub(n);
        self.data.truncate(new_len);
    }

    /// Empties the buffer without releasing its allocation.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Releases the buffer's allocation entirely.
    pub fn free(&mut self) {
        self.data = Vec::new();
    }
}

impl From<Vec<u8>> for DataBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl AsRef<[u8]> for DataBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_grows_capacity() {
        let mut b = DataBuffer::new();
        b.append(&[1, 2, 3]);
        assert_eq!(b.size(), 3);
        assert_eq!(b.as_slice(), &[1, 2, 3]);
        assert!(b.capacity() >= 3);
    }

    #[test]
    fn set_size_only_shrinks_or_holds() {
        let mut b = DataBuffer::with_capacity(8);
        b.append(&[1, 2, 3, 4]);
        assert!(b.set_size(2));
        assert_eq!(b.as_slice(), &[1, 2]);
        assert!(!b.set_size(100));
    }

    #[test]
    fn trim_tail_reduces_size_not_capacity() {
        let mut b = DataBuffer::new();
        b.append(&[1, 2, 3, 4, 5]);
        let cap = b.capacity();
        b.trim_tail(2);
        assert_eq!(b.as_slice(), &[1, 2, 3]);
        assert_eq!(b.capacity(), cap);
    }
}
