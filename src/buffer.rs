// src/buffer.rs
//
// A growable byte queue used for every socket's input and output side.
// Head bytes are drained by advancing an offset rather than memmove; the
// backing allocation is only shifted down when growth would otherwise
// require a fresh allocation and the wasted head space makes that
// avoidable.

use crate::syscalls;
use std::os::unix::io::RawFd;

const MIN_CAPACITY: usize = 256;

/// A contiguous, owned byte buffer with amortised O(1) head consumption
/// and doubling tail growth.
pub struct ByteBuffer {
    data: Vec<u8>,
    misalign: usize,
    length: usize,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            misalign: 0,
            length: 0,
        }
    }

    pub fn from_text(s: &str) -> Self {
        let mut buf = Self::new();
        buf.push_str(s);
        buf
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            misalign: 0,
            length: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn clear(&mut self) {
        self.misalign = 0;
        self.length = 0;
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.misalign..self.misalign + self.length]
    }

    /// Ensure there is room for `need` more bytes at the tail, realigning
    /// (a single memmove) in preference to growing when the head padding
    /// alone covers the request, otherwise doubling capacity.
    fn reserve(&mut self, need: usize) {
        let have_tail = self.data.capacity().saturating_sub(self.misalign + self.length);
        if have_tail >= need {
            return;
        }

        if self.misalign >= need || self.misalign >= self.length {
            // Cheaper to slide the valid region down than to grow.
            self.data.copy_within(self.misalign..self.misalign + self.length, 0);
            self.misalign = 0;
            if self.data.capacity().saturating_sub(self.length) >= need {
                return;
            }
        }

        let required = self.misalign + self.length + need;
        let mut new_cap = self.data.capacity().max(MIN_CAPACITY);
        while new_cap < required {
            new_cap *= 2;
        }
        let additional = new_cap.saturating_sub(self.data.capacity());
        self.data.reserve(additional);
    }

    fn tail_spare_mut(&mut self, need: usize) -> &mut [u8] {
        self.reserve(need);
        let start = self.misalign + self.length;
        if self.data.len() < start + need {
            self.data.resize(start + need, 0);
        }
        &mut self.data[start..start + need]
    }

    pub fn push(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let dst = self.tail_spare_mut(bytes.len());
        dst.copy_from_slice(bytes);
        self.length += bytes.len();
    }

    pub fn push_str(&mut self, s: &str) {
        self.push(s.as_bytes());
    }

    /// Move up to `len` bytes from the head of `other` onto the tail of
    /// `self`, draining `other` by the amount actually moved.
    pub fn push_from(&mut self, other: &mut ByteBuffer, len: usize) {
        let n = len.min(other.length);
        if n == 0 {
            return;
        }
        let src_start = other.misalign;
        let dst = self.tail_spare_mut(n);
        dst.copy_from_slice(&other.data[src_start..src_start + n]);
        self.length += n;
        other.drain(n);
    }

    /// Move the entire contents of `other` onto the tail of `self`.
    pub fn push_all_from(&mut self, other: &mut ByteBuffer) {
        let n = other.length;
        self.push_from(other, n);
    }

    /// Discard `n` head bytes without copying them anywhere (e.g. a
    /// chunk's trailing CRLF).
    pub fn discard(&mut self, n: usize) {
        self.drain(n);
    }

    fn drain(&mut self, n: usize) {
        let n = n.min(self.length);
        self.misalign += n;
        self.length -= n;
        if self.length == 0 {
            self.misalign = 0;
        }
    }

    /// Copy up to `len` head bytes into `dst`, draining them. Returns the
    /// number of bytes copied.
    pub fn pop(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.length);
        dst[..n].copy_from_slice(&self.data[self.misalign..self.misalign + n]);
        self.drain(n);
        n
    }

    /// Pop a whole copy of the current contents and clear.
    pub fn take_all(&mut self) -> Vec<u8> {
        let out = self.as_slice().to_vec();
        self.clear();
        out
    }

    /// Pop the next line, terminated by any of CR, LF, CRLF, or LFCR. The
    /// terminator is consumed but not included in the returned bytes.
    ///
    /// Returns `None` when no terminator is present yet (the caller should
    /// wait for more data) and `Some(vec![])` for a genuine zero-length
    /// line, e.g. the blank line ending an HTTP header block. These two
    /// cases are distinguishable here, unlike the C original which returns
    /// the same empty string for both and relies on the caller already
    /// knowing a line boundary exists.
    pub fn pop_line(&mut self) -> Option<Vec<u8>> {
        let slice = self.as_slice();
        let idx = slice.iter().position(|&b| b == b'\r' || b == b'\n')?;

        let term_len = if idx + 1 < slice.len() {
            let (b0, b1) = (slice[idx], slice[idx + 1]);
            if (b0 == b'\r' && b1 == b'\n') || (b0 == b'\n' && b1 == b'\r') {
                2
            } else {
                1
            }
        } else {
            // The terminator byte is the last byte currently buffered; a
            // second byte could still arrive and turn a lone CR/LF into a
            // two-byte terminator. Wait for it rather than guess.
            return None;
        };

        let line = slice[..idx].to_vec();
        self.drain(idx + term_len);
        Some(line)
    }

    /// Two-pass memchr+memcmp search for `needle`, returning its offset if
    /// present.
    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        if needle.is_empty() || needle.len() > self.length {
            return None;
        }
        let hay = self.as_slice();
        memchr::memmem::find(hay, needle)
    }

    /// Read up to 4096 bytes from `fd` directly into the tail, growing as
    /// needed. Returns `None` on a transient error (try again later),
    /// `Some(0)` on peer EOF, `Some(n)` for `n` bytes read.
    pub fn read_from(&mut self, fd: RawFd) -> crate::error::Result<Option<usize>> {
        const CHUNK: usize = 4096;
        let dst = self.tail_spare_mut(CHUNK);
        match syscalls::read_nonblocking(fd, dst)? {
            None => {
                // Undo the speculative tail reservation; nothing was written.
                Ok(None)
            }
            Some(0) => Ok(Some(0)),
            Some(n) => {
                self.length += n;
                Ok(Some(n))
            }
        }
    }

    /// Write the entire valid region to `fd` in one syscall, draining by
    /// however much was actually accepted.
    pub fn write_to(&mut self, fd: RawFd) -> crate::error::Result<Option<usize>> {
        if self.is_empty() {
            return Ok(Some(0));
        }
        match syscalls::write_nonblocking(fd, self.as_slice())? {
            None => Ok(None),
            Some(n) => {
                self.drain(n);
                Ok(Some(n))
            }
        }
    }
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_arbitrary_partitioning() {
        let s = b"the quick brown fox jumps over the lazy dog";
        let mut buf = ByteBuffer::new();
        for chunk in s.chunks(3) {
            buf.push(chunk);
        }
        let mut out = vec![0u8; s.len()];
        let n = buf.pop(&mut out);
        assert_eq!(n, s.len());
        assert_eq!(&out[..], &s[..]);
        assert!(buf.is_empty());
    }

    #[test]
    fn pop_line_recognises_all_terminators() {
        for term in ["\r\n", "\n\r", "\r", "\n"] {
            let mut buf = ByteBuffer::new();
            buf.push_str("hello");
            buf.push_str(term);
            buf.push_str("rest");
            let line = buf.pop_line().unwrap();
            assert_eq!(line, b"hello");
            assert_eq!(buf.as_slice(), b"rest");
        }
    }

    #[test]
    fn pop_line_blank_line_is_distinct_from_need_more() {
        let mut buf = ByteBuffer::new();
        buf.push_str("\r\n");
        let line = buf.pop_line().unwrap();
        assert_eq!(line, Vec::<u8>::new());

        let mut buf2 = ByteBuffer::new();
        buf2.push_str("no terminator here");
        assert!(buf2.pop_line().is_none());
    }

    #[test]
    fn pop_line_waits_on_ambiguous_trailing_cr() {
        let mut buf = ByteBuffer::new();
        buf.push_str("head\r");
        // A lone CR at the very tail could still become CRLF; must wait.
        assert!(buf.pop_line().is_none());
        buf.push_str("\ntail");
        let line = buf.pop_line().unwrap();
        assert_eq!(line, b"head");
        assert_eq!(buf.as_slice(), b"tail");
    }

    #[test]
    fn find_locates_substring() {
        let mut buf = ByteBuffer::new();
        buf.push_str("GET /foo HTTP/1.1\r\nHost: x\r\n\r\n");
        let idx = buf.find(b"\r\n\r\n").unwrap();
        assert_eq!(&buf.as_slice()[idx..idx + 4], b"\r\n\r\n");
    }

    #[test]
    fn reserve_realigns_before_growing() {
        let mut buf = ByteBuffer::new();
        buf.push_str(&"x".repeat(200));
        let mut out = [0u8; 190];
        buf.pop(&mut out);
        let cap_before = buf.capacity();
        // Remaining 10 bytes plus head padding of 190 should satisfy a
        // modest push without reallocating.
        buf.push_str(&"y".repeat(100));
        assert_eq!(buf.capacity(), cap_before);
    }
}
