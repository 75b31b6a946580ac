//! spyglass: an async client for the SpyServer SDR streaming protocol.
//!
//! SpyServer streams IQ samples and FFT power snapshots from a remote
//! software-defined radio over a framed binary TCP protocol. This crate
//! provides:
//!
//! - **Session client** ([`client`]) -- connection handshake, background
//!   receive loop, and the tuning/gain/decimation control surface.
//! - **Wire codec** ([`protocol`], [`codec`]) -- protocol constants plus
//!   explicit little-endian encoders and decoders for command and message
//!   records.
//! - **Framing** ([`framing`]) -- a segmentation-tolerant two-phase decoder
//!   splitting the TCP byte stream into messages, and IQ sequence-gap
//!   tracking.
//! - **IQ ring** ([`ring`]) -- the bounded byte FIFO between the receiver
//!   task and the sample consumer, with overflow recovery.
//! - **FFT accumulator** ([`fft`]) -- per-bin power sums with
//!   integration-period drain semantics.
//! - **Events** ([`events`]) -- best-effort diagnostics (overflow, upstream
//!   frame loss, lifecycle) over a broadcast channel.
//!
//! # Example
//!
//! ```no_run
//! use spyglass::{ClientOptions, SampleFormat, SpyServerClient};
//!
//! # async fn example() -> spyglass::Result<()> {
//! let client = SpyServerClient::connect_with_options(
//!     "10.0.0.5",
//!     5555,
//!     ClientOptions::iq_only(SampleFormat::Int16),
//! )
//! .await?;
//!
//! client.set_center_freq(403_000_000).await?;
//! client.set_sample_rate(2_500_000).await?;
//! client.start().await?;
//!
//! let mut samples = vec![0i16; 32_768 * 2];
//! let delivered = client.read_iq_i16(&mut samples).await?;
//! println!("got {delivered} IQ samples");
//!
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod events;
pub mod fft;
pub mod framing;
pub mod protocol;
pub mod ring;
pub mod state;

// Re-export the primary API at the crate root.
pub use client::{ClientOptions, SpyServerClient};
pub use codec::{ClientSync, DeviceInfo};
pub use error::{Error, Result};
pub use events::ClientEvent;
pub use fft::FftFrame;
pub use protocol::{DeviceType, SampleFormat};
pub use state::{SampleRateEntry, SampleRateTable, SessionState};
