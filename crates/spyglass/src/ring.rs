//! Bounded byte FIFO between the receiver task and the IQ consumer.
//!
//! Single producer (the receiver task appends each IQ body), single consumer
//! (whoever awaits the pull API). The buffer is a fixed-capacity byte array
//! with head/tail indices and wrap-around; readable length is tracked
//! explicitly so a full buffer and an empty buffer are never confused.
//!
//! When a write exceeds the free space, the oldest unread bytes are
//! discarded -- the tail snaps forward past the overwritten region and the
//! number of dropped bytes is reported to the caller. As long as every write
//! is a whole number of samples, a reader can observe a phase discontinuity
//! after overflow but never a torn sample.
//!
//! Consumers park on a [`watch`] wakeup channel; `close()` wakes every
//! waiter so teardown cannot strand a consumer on an empty buffer.

use std::sync::Mutex;

use tokio::sync::watch;

use crate::error::{Error, Result};

/// Bounded SPSC byte ring with an async blocking read side.
#[derive(Debug)]
pub struct SampleRing {
    /// Ring state. Guarded by a std mutex: critical sections are short
    /// memcpys and the lock is never held across an await.
    state: Mutex<RingState>,
    /// Bumped after every write and on close to wake parked readers.
    wakeup: watch::Sender<u64>,
}

#[derive(Debug)]
struct RingState {
    buf: Box<[u8]>,
    /// Next index to write.
    head: usize,
    /// Next index to read.
    tail: usize,
    /// Readable bytes; `0 <= len <= buf.len()`.
    len: usize,
    closed: bool,
}

impl SampleRing {
    /// Create a ring with the given capacity in bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        let (wakeup, _) = watch::channel(0);
        SampleRing {
            state: Mutex::new(RingState {
                buf: vec![0u8; capacity].into_boxed_slice(),
                head: 0,
                tail: 0,
                len: 0,
                closed: false,
            }),
            wakeup,
        }
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.state.lock().expect("ring lock poisoned").buf.len()
    }

    /// Bytes currently readable.
    pub fn readable(&self) -> usize {
        self.state.lock().expect("ring lock poisoned").len
    }

    /// Bytes currently writable without overflow.
    pub fn free(&self) -> usize {
        let state = self.state.lock().expect("ring lock poisoned");
        state.buf.len() - state.len
    }

    /// Append `data`, overwriting the oldest unread bytes if it does not fit.
    ///
    /// Returns the number of bytes discarded to make room (0 in the normal
    /// case). Writes to a closed ring are dropped entirely.
    pub fn write(&self, data: &[u8]) -> u64 {
        let dropped = {
            let mut state = self.state.lock().expect("ring lock poisoned");
            if state.closed {
                return 0;
            }
            state.push(data)
        };
        self.wakeup.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
        dropped
    }

    /// Try to fill `out` from the front of the ring without waiting.
    ///
    /// All-or-nothing: `Ok(true)` and `out` is filled, or `Ok(false)` when
    /// fewer than `out.len()` bytes are readable. Once the ring is closed
    /// and cannot satisfy the request, returns [`Error::StreamClosed`] --
    /// data already buffered at close time is still served first.
    pub fn try_read(&self, out: &mut [u8]) -> Result<bool> {
        let mut state = self.state.lock().expect("ring lock poisoned");
        if state.len >= out.len() {
            state.pop(out);
            Ok(true)
        } else if state.closed {
            Err(Error::StreamClosed)
        } else {
            Ok(false)
        }
    }

    /// Fill `out` completely, waiting for the producer as needed.
    pub async fn read_exact(&self, out: &mut [u8]) -> Result<()> {
        let mut wakeup = self.wakeup.subscribe();
        loop {
            if self.try_read(out)? {
                return Ok(());
            }
            if wakeup.changed().await.is_err() {
                return Err(Error::StreamClosed);
            }
        }
    }

    /// Close the ring and wake every parked reader.
    pub fn close(&self) {
        self.state.lock().expect("ring lock poisoned").closed = true;
        self.wakeup.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("ring lock poisoned").closed
    }
}

impl RingState {
    /// Copy `data` in at `head`, splitting at the wrap point, discarding the
    /// oldest bytes on overflow. Returns the count of discarded bytes.
    fn push(&mut self, data: &[u8]) -> u64 {
        let cap = self.buf.len();
        let n = data.len();

        if n >= cap {
            // The write alone overwrites the whole ring: everything readable
            // is lost along with the leading part of `data` itself.
            let dropped = (self.len + n - cap) as u64;
            self.buf.copy_from_slice(&data[n - cap..]);
            self.head = 0;
            self.tail = 0;
            self.len = cap;
            return dropped;
        }

        let mut dropped = 0u64;
        let free = cap - self.len;
        if n > free {
            // Snap the tail forward past the region the write is about to
            // overwrite, so readers never see a mix of old and new bytes.
            let overflow = n - free;
            self.tail = (self.tail + overflow) % cap;
            self.len -= overflow;
            dropped = overflow as u64;
        }

        let first = (cap - self.head).min(n);
        self.buf[self.head..self.head + first].copy_from_slice(&data[..first]);
        if first < n {
            self.buf[..n - first].copy_from_slice(&data[first..]);
        }
        self.head = (self.head + n) % cap;
        self.len += n;
        dropped
    }

    /// Copy `out.len()` bytes out from `tail`, splitting at the wrap point.
    /// Caller has verified `len >= out.len()`.
    fn pop(&mut self, out: &mut [u8]) {
        let cap = self.buf.len();
        let n = out.len();
        let first = (cap - self.tail).min(n);
        out[..first].copy_from_slice(&self.buf[self.tail..self.tail + first]);
        if first < n {
            out[first..].copy_from_slice(&self.buf[..n - first]);
        }
        self.tail = (self.tail + n) % cap;
        self.len -= n;
    }
}
