//! Growable byte buffer with separate read and write cursors.
//!
//! The backing store is one contiguous allocation; `read_pos <= write_pos <=
//! capacity` at all times. Ingress uses a vectored read with a 64 KiB stack
//! scratch area so a single syscall can drain a full TCP window even when the
//! buffer tail is undersized; the backing store then grows exactly once to
//! absorb the spill.

use std::io::{IoSlice, IoSliceMut, Read, Write};

const INITIAL_SIZE: usize = 1024;
const SCRATCH_SIZE: usize = 65536;

pub struct Buffer {
    store: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::with_capacity(INITIAL_SIZE)
    }
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            store: vec![0; capacity],
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Bytes available to read.
    pub fn readable(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Bytes writable at the tail without growing or compacting.
    pub fn writable(&self) -> usize {
        self.store.len() - self.write_pos
    }

    pub fn is_empty(&self) -> bool {
        self.readable() == 0
    }

    /// The readable region, without consuming it.
    pub fn peek(&self) -> &[u8] {
        &self.store[self.read_pos..self.write_pos]
    }

    /// Advances the read cursor by `n` consumed bytes.
    pub fn retrieve(&mut self, n: usize) {
        debug_assert!(n <= self.readable());
        self.read_pos += n.min(self.readable());
        if self.read_pos == self.write_pos {
            self.read_pos = 0;
            self.write_pos = 0;
        }
    }

    pub fn retrieve_all(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    pub fn append(&mut self, data: &[u8]) {
        self.ensure_writable(data.len());
        self.store[self.write_pos..self.write_pos + data.len()].copy_from_slice(data);
        self.write_pos += data.len();
    }

    /// Makes room for `need` bytes at the tail.
    ///
    /// When even reclaiming the consumed head would not fit, the store is
    /// resized to `write_pos + need + 1`; otherwise the unread region is moved
    /// to offset 0.
    fn ensure_writable(&mut self, need: usize) {
        if self.writable() >= need {
            return;
        }
        if self.writable() + self.read_pos < need {
            self.store.resize(self.write_pos + need + 1, 0);
        } else {
            self.store.copy_within(self.read_pos..self.write_pos, 0);
            self.write_pos -= self.read_pos;
            self.read_pos = 0;
        }
    }

    /// Scatter-reads from `io` into the buffer tail plus a stack scratch area.
    ///
    /// Returns the number of bytes ingested (0 means EOF). Bytes that landed
    /// in the scratch area are appended after the fact, growing the backing
    /// store at most once.
    pub fn read_from<R: Read>(&mut self, io: &mut R) -> std::io::Result<usize> {
        let mut scratch = [0u8; SCRATCH_SIZE];
        let writable = self.writable();
        let (_, tail) = self.store.split_at_mut(self.write_pos);
        let mut iov = [IoSliceMut::new(tail), IoSliceMut::new(&mut scratch)];
        let n = io.read_vectored(&mut iov)?;
        if n <= writable {
            self.write_pos += n;
        } else {
            self.write_pos = self.store.len();
            self.append(&scratch[..n - writable]);
        }
        Ok(n)
    }

    /// Writes the readable region to `io`, consuming what was accepted.
    pub fn write_to<W: Write>(&mut self, io: &mut W) -> std::io::Result<usize> {
        let n = io.write(self.peek())?;
        self.retrieve(n);
        Ok(n)
    }

    /// Writes the readable region and an extra trailing slice in one vectored
    /// call. Returns bytes accepted; the caller advances its own cursor for
    /// whatever part of `extra` was written.
    pub fn write_to_with<W: Write>(&mut self, io: &mut W, extra: &[u8]) -> std::io::Result<usize> {
        let iov = [IoSlice::new(self.peek()), IoSlice::new(extra)];
        let n = io.write_vectored(&iov)?;
        let from_buf = n.min(self.readable());
        self.retrieve(from_buf);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn append_retrieve_tracks_net_bytes() {
        let mut buf = Buffer::new();
        assert_eq!(buf.readable(), 0);

        buf.append(b"hello ");
        buf.append(b"world");
        assert_eq!(buf.readable(), 11);
        assert_eq!(buf.peek(), b"hello world");

        buf.retrieve(6);
        assert_eq!(buf.readable(), 5);
        assert_eq!(buf.peek(), b"world");

        buf.retrieve(5);
        assert_eq!(buf.readable(), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn append_past_capacity_grows() {
        let mut buf = Buffer::with_capacity(8);
        let data: Vec<u8> = (0..100u8).collect();
        buf.append(&data);
        assert_eq!(buf.peek(), &data[..]);
    }

    #[test]
    fn compaction_reclaims_consumed_head() {
        let mut buf = Buffer::with_capacity(16);
        buf.append(&[1u8; 12]);
        buf.retrieve(10);
        // 4 writable at the tail, 10 reclaimable at the head: 12 fits after a move.
        buf.append(&[2u8; 12]);
        assert_eq!(buf.readable(), 14);
        assert_eq!(&buf.peek()[..2], &[1, 1]);
        assert_eq!(&buf.peek()[2..], &[2u8; 12][..]);
    }

    #[test]
    fn interleaved_sequence_preserves_content() {
        let mut buf = Buffer::with_capacity(4);
        let mut expected: Vec<u8> = Vec::new();
        for round in 0u8..50 {
            let chunk: Vec<u8> = (0..7).map(|i| round.wrapping_mul(7).wrapping_add(i)).collect();
            buf.append(&chunk);
            expected.extend_from_slice(&chunk);
            if round % 3 == 0 {
                let n = expected.len().min(5);
                buf.retrieve(n);
                expected.drain(..n);
            }
            assert_eq!(buf.peek(), &expected[..]);
            assert_eq!(buf.readable(), expected.len());
        }
    }

    #[test]
    fn scatter_read_spills_into_scratch() {
        let data: Vec<u8> = (0..3000u16).map(|v| (v % 251) as u8).collect();
        let mut src = Cursor::new(data.clone());
        let mut buf = Buffer::with_capacity(64);

        let n = buf.read_from(&mut src).unwrap();
        assert_eq!(n, 3000);
        assert_eq!(buf.readable(), 3000);
        assert_eq!(buf.peek(), &data[..]);
    }

    #[test]
    fn scatter_read_eof_returns_zero() {
        let mut src = Cursor::new(Vec::<u8>::new());
        let mut buf = Buffer::new();
        assert_eq!(buf.read_from(&mut src).unwrap(), 0);
    }

    #[test]
    fn write_to_drains_readable() {
        let mut buf = Buffer::new();
        buf.append(b"drain me");
        let mut out = Vec::new();
        let n = buf.write_to(&mut out).unwrap();
        assert_eq!(n, 8);
        assert_eq!(out, b"drain me");
        assert!(buf.is_empty());
    }

    #[test]
    fn vectored_write_covers_extra_region() {
        let mut buf = Buffer::new();
        buf.append(b"headers");
        let mut out = Vec::new();
        let n = buf.write_to_with(&mut out, b" + body").unwrap();
        assert_eq!(n, 14);
        assert_eq!(out, b"headers + body");
        assert!(buf.is_empty());
    }
}
