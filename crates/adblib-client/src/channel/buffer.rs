//! Growable byte buffer used by in-memory channels and `read_remaining`

const INITIAL_CAPACITY: usize = 256;

/// Byte buffer whose capacity doubles on overflow, keeping written bytes
#[derive(Debug, Clone, Default)]
pub struct ResizableBuffer {
    bytes: Vec<u8>,
    len: usize,
}

impl ResizableBuffer {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: vec![0; capacity],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn append(&mut self, data: &[u8]) {
        self.ensure_spare(data.len());
        self.bytes[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
    }

    /// Grow geometrically until at least `additional` bytes follow the content
    pub fn ensure_spare(&mut self, additional: usize) {
        let required = self.len + additional;
        if required <= self.bytes.len() {
            return;
        }
        let mut capacity = self.bytes.len().max(1);
        while capacity < required {
            capacity = capacity.saturating_mul(2);
        }
        self.bytes.resize(capacity, 0);
    }

    /// Writable space after the content; commit with [`advance`](Self::advance)
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[self.len..]
    }

    pub fn advance(&mut self, count: usize) {
        self.len = (self.len + count).min(self.bytes.len());
    }

    pub fn into_vec(mut self) -> Vec<u8> {
        self.bytes.truncate(self.len);
        self.bytes
    }
}
