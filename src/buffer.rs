//! Byte buffer for non-blocking socket I/O
//!
//! [`ByteBuffer`] keeps a readable window `[read_pos, write_pos)` over a
//! growable byte vector. Incoming data is absorbed with a scatter read
//! (`readv` into the buffer's writable tail plus a 64 KiB stack scratch
//! region), which bounds the per-connection resident size while still
//! accepting large bursts in a single syscall.

use std::io;
use std::os::fd::RawFd;

/// Initial capacity of a fresh buffer.
pub const INITIAL_SIZE: usize = 1024;

/// Size of the stack scratch region used by the scatter read.
const SCRATCH_LEN: usize = 65536;

/// Growable read/write byte buffer.
///
/// Invariant: `read_pos <= write_pos <= capacity`. The readable region is
/// `[read_pos, write_pos)`, the writable region `[write_pos, capacity)` and
/// the prependable region `[0, read_pos)`. Consuming everything resets both
/// cursors to zero.
///
/// Instances are single-owner; there is no internal synchronization.
#[derive(Debug)]
pub struct ByteBuffer {
    buf: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_SIZE)
    }

    pub fn with_capacity(cap: usize) -> Self {
        ByteBuffer {
            buf: vec![0; cap],
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Number of readable bytes.
    pub fn readable(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Number of bytes that can be written without growing.
    pub fn writable(&self) -> usize {
        self.buf.len() - self.write_pos
    }

    /// Bytes already consumed at the front, reusable by compaction.
    pub fn prependable(&self) -> usize {
        self.read_pos
    }

    /// The readable region. Invalidated by [`ensure_writable`](Self::ensure_writable).
    pub fn peek(&self) -> &[u8] {
        &self.buf[self.read_pos..self.write_pos]
    }

    /// Make room for at least `len` more bytes: compact first, grow if the
    /// reclaimed front space is still not enough.
    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable() < len {
            self.make_space(len);
        }
        assert!(self.writable() >= len);
    }

    /// Mark `len` bytes of the writable region as written.
    pub fn advance_write(&mut self, len: usize) {
        assert!(len <= self.writable());
        self.write_pos += len;
    }

    /// Discard `len` readable bytes. A full consume resets both cursors.
    pub fn consume(&mut self, len: usize) {
        assert!(len <= self.readable());
        self.read_pos += len;
        if self.read_pos == self.write_pos {
            self.read_pos = 0;
            self.write_pos = 0;
        }
    }

    /// Discard readable bytes up to `end`, an offset into [`peek`](Self::peek).
    pub fn consume_until(&mut self, end: usize) {
        assert!(end <= self.readable());
        self.consume(end);
    }

    /// Discard everything readable.
    pub fn consume_all(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Copy out the readable region as a string and clear the buffer.
    pub fn take_string(&mut self) -> String {
        let s = String::from_utf8_lossy(self.peek()).into_owned();
        self.consume_all();
        s
    }

    /// Append bytes, growing as needed.
    pub fn append(&mut self, data: &[u8]) {
        self.ensure_writable(data.len());
        let start = self.write_pos;
        self.buf[start..start + data.len()].copy_from_slice(data);
        self.advance_write(data.len());
    }

    /// Scatter-read from `fd` into the writable tail and a stack scratch
    /// region. Overflow beyond the tail is appended from the scratch, so a
    /// burst larger than the current capacity is absorbed in one syscall.
    pub fn read_from_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        let mut scratch = [0u8; SCRATCH_LEN];
        let writable = self.writable();
        let iov = [
            libc::iovec {
                iov_base: unsafe { self.buf.as_mut_ptr().add(self.write_pos) as *mut libc::c_void },
                iov_len: writable,
            },
            libc::iovec {
                iov_base: scratch.as_mut_ptr() as *mut libc::c_void,
                iov_len: SCRATCH_LEN,
            },
        ];
        let n = unsafe { libc::readv(fd, iov.as_ptr(), 2) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        let n = n as usize;
        if n <= writable {
            self.write_pos += n;
        } else {
            self.write_pos = self.buf.len();
            self.append(&scratch[..n - writable]);
        }
        Ok(n)
    }

    /// Write the readable region to `fd` and consume whatever was accepted.
    pub fn write_to_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        let readable = self.readable();
        let n = unsafe {
            libc::write(
                fd,
                self.buf.as_ptr().add(self.read_pos) as *const libc::c_void,
                readable,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        self.consume(n as usize);
        Ok(n as usize)
    }

    fn make_space(&mut self, len: usize) {
        if self.writable() + self.prependable() < len {
            self.buf.resize(self.write_pos + len + 1, 0);
        } else {
            let readable = self.readable();
            self.buf.copy_within(self.read_pos..self.write_pos, 0);
            self.read_pos = 0;
            self.write_pos = readable;
        }
    }
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}
