//! Byte accumulator for the shadow decoders
//!
//! Bytes accumulate in a `BytesMut` until a whole message header is present.
//! Payloads the decoders do not need (pixel data, cut text) are skipped by
//! length: whatever is buffered is dropped now, and the rest is discarded as
//! it arrives, so large rectangles are never held in memory.

use bytes::{Buf, Bytes, BytesMut};

#[derive(Debug, Default)]
pub struct ByteQueue {
    buf: BytesMut,
    skip: usize,
}

impl ByteQueue {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            skip: 0,
        }
    }

    pub fn extend(&mut self, mut data: &[u8]) {
        if self.skip > 0 {
            let n = self.skip.min(data.len());
            self.skip -= n;
            data = &data[n..];
        }
        if !data.is_empty() {
            self.buf.extend_from_slice(data);
        }
    }

    /// Buffered bytes (excluding anything still to be skipped)
    pub fn len(&self) -> usize {
        if self.skip > 0 {
            0
        } else {
            self.buf.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes still to be discarded from future input
    pub fn pending_skip(&self) -> usize {
        self.skip
    }

    /// First `n` buffered bytes, if that many are available
    pub fn peek(&self, n: usize) -> Option<&[u8]> {
        if self.skip == 0 && self.buf.len() >= n {
            Some(&self.buf[..n])
        } else {
            None
        }
    }

    pub fn take(&mut self, n: usize) -> Option<Bytes> {
        if self.skip == 0 && self.buf.len() >= n {
            Some(self.buf.split_to(n).freeze())
        } else {
            None
        }
    }

    /// Discard `n` bytes, including ones not received yet
    pub fn skip(&mut self, n: usize) {
        if n <= self.buf.len() {
            self.buf.advance(n);
        } else {
            self.skip += n - self.buf.len();
            self.buf.clear();
        }
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.skip = 0;
    }
}
