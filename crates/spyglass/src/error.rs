//! Error types for the SpyServer client.
//!
//! All fallible operations return [`Result<T>`], which uses [`Error`] as the
//! error type. Transport-layer, protocol-layer, and session-layer failures
//! are all captured here.

/// The error type for all client operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (TCP connect or socket I/O wrapped with context).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (malformed frame, undecodable payload,
    /// incompatible server version).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server accepted the connection but never completed the
    /// capability/synchronization handshake within the deadline.
    #[error("server didn't send the device capability and synchronization info")]
    HandshakeTimeout,

    /// The server is up but reports no usable device.
    #[error("server is up but no device is available")]
    NoDevice,

    /// Timed out waiting for the server.
    #[error("timeout waiting for the server")]
    Timeout,

    /// The requested operation is not supported by this session or server.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// An invalid parameter was passed to a control method.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No connection to the server has been established, or the session has
    /// already been torn down.
    #[error("not connected")]
    NotConnected,

    /// The connection to the server was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// A sample or FFT stream was closed while a consumer was waiting on it.
    ///
    /// Raised by the blocking pull APIs when the session terminates, so
    /// consumers parked on an empty buffer observe cancellation instead of
    /// deadlocking.
    #[error("stream closed")]
    StreamClosed,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
