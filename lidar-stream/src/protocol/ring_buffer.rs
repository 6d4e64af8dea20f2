//! Fixed-capacity byte ring for stream reassembly
//!
//! Provides O(1) consume operations instead of O(n) Vec::drain().

/// Fixed-capacity ring buffer with O(1) advance
///
/// Generic const parameter `N` sets buffer capacity.
pub struct RingBuffer<const N: usize> {
    data: [u8; N],
    head: usize, // Write position (next empty slot)
    tail: usize, // Read position (first valid byte)
    len: usize,  // Number of bytes available
}

impl<const N: usize> RingBuffer<N> {
    pub const fn new() -> Self {
        Self {
            data: [0u8; N],
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    /// Append as many bytes as fit, returning how many were taken
    #[inline]
    pub fn extend(&mut self, bytes: &[u8]) -> usize {
        let take = bytes.len().min(N - self.len);
        for &b in &bytes[..take] {
            self.data[self.head] = b;
            self.head = (self.head + 1) % N;
        }
        self.len += take;
        take
    }

    /// Consume n bytes from the front
    #[inline]
    pub fn advance(&mut self, n: usize) {
        let n = n.min(self.len);
        self.tail = (self.tail + n) % N;
        self.len -= n;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Room left before `extend` starts refusing bytes
    #[inline]
    pub fn free(&self) -> usize {
        N - self.len
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.len = 0;
    }

    /// Read byte at logical index (handles wraparound)
    #[inline]
    pub fn get(&self, index: usize) -> Option<u8> {
        if index < self.len {
            Some(self.data[(self.tail + index) % N])
        } else {
            None
        }
    }

    /// Big-endian u32 at logical index
    pub fn get_u32(&self, index: usize) -> Option<u32> {
        let mut bytes = [0u8; 4];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = self.get(index + i)?;
        }
        Some(u32::from_be_bytes(bytes))
    }

    /// True if `pattern` sits at logical index `start`
    pub fn matches_at(&self, start: usize, pattern: &[u8]) -> bool {
        start + pattern.len() <= self.len
            && pattern
                .iter()
                .enumerate()
                .all(|(i, &b)| self.data[(self.tail + start + i) % N] == b)
    }

    /// Copy `dst.len()` bytes starting at logical index `start`
    ///
    /// Returns false (copying nothing) if not enough bytes are buffered.
    pub fn copy_out(&self, start: usize, dst: &mut [u8]) -> bool {
        if start + dst.len() > self.len {
            return false;
        }
        let real_start = (self.tail + start) % N;
        let first = dst.len().min(N - real_start);
        dst[..first].copy_from_slice(&self.data[real_start..real_start + first]);
        let rest = dst.len() - first;
        dst[first..].copy_from_slice(&self.data[..rest]);
        true
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operations() {
        let mut rb: RingBuffer<16> = RingBuffer::new();
        assert!(rb.is_empty());

        assert_eq!(rb.extend(&[1, 2, 3, 4, 5]), 5);
        assert_eq!(rb.len(), 5);
        assert_eq!(rb.get(0), Some(1));
        assert_eq!(rb.get(4), Some(5));
        assert_eq!(rb.get(5), None);
    }

    #[test]
    fn test_extend_stops_when_full() {
        let mut rb: RingBuffer<4> = RingBuffer::new();
        assert_eq!(rb.extend(&[1, 2, 3, 4, 5, 6]), 4);
        assert_eq!(rb.free(), 0);
        rb.advance(1);
        assert_eq!(rb.extend(&[7]), 1);
        assert_eq!(rb.get(3), Some(7));
    }

    #[test]
    fn test_wraparound_copy() {
        let mut rb: RingBuffer<8> = RingBuffer::new();

        rb.extend(&[1, 2, 3, 4, 5, 6]);
        rb.advance(5); // tail=5, head=6, len=1
        rb.extend(&[7, 8, 9]); // head wraps to 1

        // Logical view: [6, 7, 8, 9]
        assert_eq!(rb.len(), 4);
        let mut out = [0u8; 4];
        assert!(rb.copy_out(0, &mut out));
        assert_eq!(out, [6, 7, 8, 9]);

        let mut too_long = [0u8; 5];
        assert!(!rb.copy_out(0, &mut too_long));
    }

    #[test]
    fn test_pattern_and_u32() {
        let mut rb: RingBuffer<8> = RingBuffer::new();
        rb.extend(&[0, 0, 0, 0, 0, 0]);
        rb.advance(6);
        rb.extend(&[0x00, 0x00, 0x02, 0xC2, b'L', b'D']);

        assert_eq!(rb.get_u32(0), Some(706));
        assert!(rb.matches_at(4, b"LD"));
        assert!(!rb.matches_at(4, b"LDS"));
        assert_eq!(rb.get_u32(3), None);
    }
}
