//! Session state machine types and cached tuning state.
//!
//! The receiver task publishes [`SessionState`] transitions through a
//! [`tokio::sync::watch`] channel; the constructor awaits `Ready` with a
//! bounded timeout and any caller can observe the session's lifecycle
//! without polling. Cached device capabilities and tuner state are latched
//! from the handshake messages and updated by later sync messages.

use crate::codec::DeviceInfo;

/// Lifecycle of a SpyServer session.
///
/// ```text
/// Disconnected -> Greeting -> AwaitingDeviceInfo -> AwaitingSync -> Ready
///                                    |                               ^  |
///                                    v                        stop() |  | start()
///                                 NoDevice                           Streaming
/// any state -> Terminated  (disconnect, transport loss, fatal protocol error)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No TCP connection yet.
    Disconnected,
    /// TCP established, HELLO being sent.
    Greeting,
    /// Waiting for the server's device capability announcement.
    AwaitingDeviceInfo,
    /// Device info received, waiting for the first client sync.
    AwaitingSync,
    /// Handshake complete; configuration accepted, streaming stopped.
    Ready,
    /// Sample delivery enabled.
    Streaming,
    /// The server reported no usable device. Terminal.
    NoDevice,
    /// The session has been torn down. Terminal.
    Terminated,
}

impl SessionState {
    /// Whether this state can never be left.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::NoDevice | SessionState::Terminated)
    }
}

/// One supported sample rate and the decimation stage that produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRateEntry {
    /// Output rate in hertz.
    pub rate_hz: u32,
    /// Decimation stage: the device's maximum rate divided by `2^stage`.
    pub stage: u32,
}

/// The rates a device supports, derived from its capability announcement.
///
/// One entry per decimation stage from `minimum_iq_decimation` through
/// `decimation_stage_count`, sorted ascending by rate. Rates are distinct
/// by construction (each stage halves the previous rate).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleRateTable {
    entries: Vec<SampleRateEntry>,
}

impl SampleRateTable {
    /// Build the table for a device.
    pub fn from_device_info(info: &DeviceInfo) -> Self {
        let mut entries: Vec<SampleRateEntry> = (info.minimum_iq_decimation
            ..=info.decimation_stage_count)
            .map(|stage| SampleRateEntry {
                rate_hz: info.maximum_sample_rate >> stage,
                stage,
            })
            .collect();
        entries.sort_by_key(|e| e.rate_hz);
        SampleRateTable { entries }
    }

    /// All supported rates, ascending.
    pub fn entries(&self) -> &[SampleRateEntry] {
        &self.entries
    }

    /// The decimation stage producing exactly `rate_hz`, if supported.
    pub fn stage_for_rate(&self, rate_hz: u32) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.rate_hz == rate_hz)
            .map(|e| e.stage)
    }

    /// Whether `stage` is one of the table's decimation stages.
    pub fn contains_stage(&self, stage: u32) -> bool {
        self.entries.iter().any(|e| e.stage == stage)
    }

    /// The rate produced by `stage`, if supported.
    pub fn rate_for_stage(&self, stage: u32) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.stage == stage)
            .map(|e| e.rate_hz)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Tuning state latched from client-sync messages and control calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct TunerState {
    /// Whether the server allows this client to change device settings.
    pub can_control: bool,
    /// Current LNA gain index.
    pub gain: u32,
    /// Hardware center frequency of the device.
    pub device_center_frequency: u32,
    /// Center frequency of the IQ channel.
    pub iq_center_frequency: u32,
    /// Center frequency of the FFT channel.
    pub fft_center_frequency: u32,
    /// Lowest center frequency tunable in the session's stream mode.
    pub minimum_tunable_frequency: u32,
    /// Highest center frequency tunable in the session's stream mode.
    pub maximum_tunable_frequency: u32,
}
