//! Diagnostic events emitted by a session.
//!
//! Events are delivered through a bounded [`tokio::sync::broadcast`] channel
//! on a best-effort basis; slow subscribers may miss events under load.
//! They carry the transient notices that do not fail any call: connection
//! lifecycle, ring overflow, and server-side frame loss.

/// A diagnostic event from a SpyServer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    /// The session completed its handshake and is usable.
    Connected,

    /// The receiver task exited; the session is no longer usable.
    Disconnected,

    /// The IQ ring buffer overflowed; the oldest unread bytes were
    /// discarded. The IQ stream continues with a phase discontinuity.
    RingOverflow {
        /// How many buffered bytes were lost.
        bytes_dropped: u64,
    },

    /// The server skipped sequence numbers in the IQ stream, meaning frames
    /// were dropped before they reached this client.
    FramesDropped {
        /// How many frames the gap spans.
        count: u32,
    },
}
