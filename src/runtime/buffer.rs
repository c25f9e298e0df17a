//! Fixed-capacity line buffer.
//!
//! Bytes read from a descriptor are accumulated here until a newline is
//! seen, then handed out one line at a time. The buffer never grows: when it
//! fills up without a newline, the whole chunk is handed out as-is so that a
//! line of exactly the maximum length passes through untouched.

/// Maximum number of bytes delivered by a single line read (1023 data bytes
/// plus the terminator).
pub const MAX_LINE_LEN: usize = 1024;

/// Accumulates raw bytes and splits them into newline-terminated lines.
pub struct LineBuffer {
    /// Backing storage.
    data: Box<[u8]>,
    /// Number of valid bytes at the front of `data`.
    filled: usize,
}

impl LineBuffer {
    /// Create a buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "line buffer needs room for one byte");
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            filled: 0,
        }
    }

    /// Unfilled tail of the buffer, for the next read.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.filled..]
    }

    /// Mark `n` bytes of the spare region as filled.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.filled + n <= self.data.len(), "commit past capacity");
        self.filled += n;
    }

    /// Whether no more bytes can be read into the buffer.
    pub fn is_full(&self) -> bool {
        self.filled == self.data.len()
    }

    /// Whether the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Move the next complete line (including its `\n`) into `out`.
    ///
    /// A full buffer with no newline counts as a complete line. Returns
    /// `false` and leaves `out` untouched when no line is available yet.
    pub fn take_line(&mut self, out: &mut Vec<u8>) -> bool {
        let end = match self.data[..self.filled].iter().position(|&b| b == b'\n') {
            Some(pos) => pos + 1,
            None if self.is_full() => self.filled,
            None => return false,
        };
        self.take(end, out);
        true
    }

    /// Move every buffered byte into `out`, newline or not.
    ///
    /// Returns `false` when the buffer was already empty.
    pub fn take_rest(&mut self, out: &mut Vec<u8>) -> bool {
        if self.is_empty() {
            return false;
        }
        self.take(self.filled, out);
        true
    }

    fn take(&mut self, end: usize, out: &mut Vec<u8>) {
        out.clear();
        out.extend_from_slice(&self.data[..end]);
        self.data.copy_within(end..self.filled, 0);
        self.filled -= end;
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(MAX_LINE_LEN)
    }
}
