//! FFT power accumulation between consumer drains.
//!
//! Each `UINT8_FFT` frame carries one log-power byte per display bin. The
//! accumulator keeps a running per-bin sum plus a count of accumulated
//! frames (integration periods); the consumer drains both atomically and
//! divides sums by periods for a mean spectrum. Draining resets the
//! accumulator, so each drain covers exactly the frames since the last one.

use std::sync::Mutex;

use tokio::sync::watch;

use crate::error::{Error, Result};

/// One drained integration window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FftFrame {
    /// Per-bin sums of the accumulated frames.
    pub sums: Vec<u32>,
    /// How many frames were accumulated into `sums`.
    pub periods: u32,
}

/// Per-bin running sums with blocking drain semantics.
#[derive(Debug)]
pub struct FftAccumulator {
    /// Guarded by a std mutex; critical sections are short and never held
    /// across an await.
    state: Mutex<AccumState>,
    /// Bumped after every accumulated frame and on close.
    wakeup: watch::Sender<u64>,
}

#[derive(Debug)]
struct AccumState {
    sums: Vec<u32>,
    periods: u32,
    closed: bool,
}

impl FftAccumulator {
    /// Create an accumulator for `bins` display bins.
    ///
    /// # Panics
    ///
    /// Panics if `bins` is zero.
    pub fn new(bins: usize) -> Self {
        assert!(bins > 0, "FFT accumulator needs at least one bin");
        let (wakeup, _) = watch::channel(0);
        FftAccumulator {
            state: Mutex::new(AccumState {
                sums: vec![0; bins],
                periods: 0,
                closed: false,
            }),
            wakeup,
        }
    }

    /// Number of configured bins.
    pub fn bins(&self) -> usize {
        self.state.lock().expect("fft lock poisoned").sums.len()
    }

    /// Fold one FFT frame body into the running sums.
    ///
    /// A body longer than the configured bin count is clamped (the server is
    /// sending more display pixels than requested); a shorter body updates
    /// only the leading bins. Frames arriving after close are dropped.
    pub fn accumulate(&self, body: &[u8]) {
        {
            let mut state = self.state.lock().expect("fft lock poisoned");
            if state.closed {
                return;
            }
            let bins = state.sums.len();
            if body.len() > bins {
                tracing::warn!(
                    body_len = body.len(),
                    bins,
                    "FFT frame has more bins than configured, clamping"
                );
            }
            let n = body.len().min(bins);
            for (sum, &value) in state.sums.iter_mut().zip(&body[..n]) {
                *sum += u32::from(value);
            }
            state.periods += 1;
        }
        self.wakeup.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
    }

    /// Take the accumulated window if at least one frame has arrived.
    ///
    /// Returns `Ok(None)` when nothing has accumulated yet, and
    /// [`Error::StreamClosed`] once the accumulator is closed and empty --
    /// a window pending at close time is still served first.
    pub fn try_drain(&self) -> Result<Option<FftFrame>> {
        let mut state = self.state.lock().expect("fft lock poisoned");
        if state.periods > 0 {
            let bins = state.sums.len();
            let sums = std::mem::replace(&mut state.sums, vec![0; bins]);
            let periods = state.periods;
            state.periods = 0;
            Ok(Some(FftFrame { sums, periods }))
        } else if state.closed {
            Err(Error::StreamClosed)
        } else {
            Ok(None)
        }
    }

    /// Drain the accumulated window, waiting for the first frame if needed.
    pub async fn drain(&self) -> Result<FftFrame> {
        let mut wakeup = self.wakeup.subscribe();
        loop {
            if let Some(frame) = self.try_drain()? {
                return Ok(frame);
            }
            if wakeup.changed().await.is_err() {
                return Err(Error::StreamClosed);
            }
        }
    }

    /// Close the accumulator and wake every parked consumer.
    pub fn close(&self) {
        self.state.lock().expect("fft lock poisoned").closed = true;
        self.wakeup.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
    }
}
