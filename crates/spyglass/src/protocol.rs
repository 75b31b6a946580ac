//! SpyServer wire-protocol constants.
//!
//! The SpyServer protocol is a framed binary protocol over TCP, little-endian
//! throughout. The client sends command frames (`CommandHeader` + body) and
//! the server streams message frames (`MessageHeader` + body) back. This
//! module defines the protocol vocabulary; the encoders and decoders that
//! operate on it live in [`crate::codec`].

/// Compiled-in protocol version: major 2, minor 0, build 1700.
///
/// The high 16 bits (major.minor) are the compatibility gate: a server whose
/// `protocol_id` differs in those bits is rejected. The build number in the
/// low 16 bits is informational only.
pub const PROTOCOL_VERSION: u32 = (2 << 24) | (0 << 16) | 1700;

/// Upper bound on a message body declared by a server header.
///
/// A header announcing a larger body is treated as a fatal protocol error
/// before any body byte is consumed.
pub const MAX_MESSAGE_BODY_SIZE: u32 = 1 << 20;

/// Size of a server-to-client message header on the wire (five u32 fields).
pub const MESSAGE_HEADER_SIZE: usize = 20;

/// Size of a client-to-server command header on the wire (two u32 fields).
pub const COMMAND_HEADER_SIZE: usize = 8;

/// Default SpyServer TCP port.
pub const DEFAULT_PORT: u16 = 5555;

/// Stream type bit for IQ data.
pub const STREAM_TYPE_IQ: u32 = 1;
/// Stream type bit for demodulated audio (not consumed by this client).
pub const STREAM_TYPE_AF: u32 = 2;
/// Stream type bit for FFT data.
pub const STREAM_TYPE_FFT: u32 = 4;

/// Streaming mode: IQ only.
pub const STREAM_MODE_IQ_ONLY: u32 = STREAM_TYPE_IQ;
/// Streaming mode: FFT only.
pub const STREAM_MODE_FFT_ONLY: u32 = STREAM_TYPE_FFT;
/// Streaming mode: FFT and IQ together.
pub const STREAM_MODE_FFT_IQ: u32 = STREAM_TYPE_FFT | STREAM_TYPE_IQ;

/// Client-to-server command types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CommandType {
    /// Session greeting: protocol version plus a client name string.
    Hello = 0,
    /// Read a setting back from the server (unused by this client).
    GetSetting = 1,
    /// Write a setting; body is a setting type followed by u32 parameters.
    SetSetting = 2,
    /// Keep-alive (unused by this client).
    Ping = 3,
}

impl CommandType {
    /// The wire value of this command type.
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Setting identifiers accepted by `CMD_SET_SETTING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Setting {
    StreamingMode = 0,
    StreamingEnabled = 1,
    Gain = 2,
    IqFormat = 100,
    IqFrequency = 101,
    IqDecimation = 102,
    IqDigitalGain = 103,
    FftFormat = 200,
    FftFrequency = 201,
    FftDecimation = 202,
    FftDbOffset = 203,
    FftDbRange = 204,
    FftDisplayPixels = 205,
}

impl Setting {
    /// The wire value of this setting.
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Sample formats for the IQ and FFT streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SampleFormat {
    Uint8 = 1,
    Int16 = 2,
    Int24 = 3,
    Float = 4,
}

impl SampleFormat {
    /// The wire value of this format.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Bytes occupied by a single I or Q component in this format.
    pub fn bytes_per_component(self) -> usize {
        match self {
            SampleFormat::Uint8 => 1,
            SampleFormat::Int16 => 2,
            SampleFormat::Int24 => 3,
            SampleFormat::Float => 4,
        }
    }
}

/// Server-to-client message types, identified by the low 16 bits of the
/// header's message-type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Device capability announcement, first message of the handshake.
    DeviceInfo,
    /// Tuning-state synchronization, second message of the handshake and
    /// re-sent by the server after configuration changes.
    ClientSync,
    /// Reply to `CMD_PING` (never solicited by this client).
    Pong,
    /// Reply to `CMD_GET_SETTING` (never solicited by this client).
    ReadSetting,
    /// IQ frame, unsigned 8-bit components.
    Uint8Iq,
    /// IQ frame, signed 16-bit little-endian components.
    Int16Iq,
    /// IQ frame, signed 24-bit components (recognized, discarded).
    Int24Iq,
    /// IQ frame, 32-bit float components (recognized, discarded).
    FloatIq,
    /// FFT frame: one u8 log-power value per bin.
    Uint8Fft,
    /// Anything else the server might send.
    Unknown(u16),
}

impl MessageType {
    /// Map a masked wire value to a message type.
    pub fn from_wire(value: u16) -> Self {
        match value {
            0 => MessageType::DeviceInfo,
            1 => MessageType::ClientSync,
            2 => MessageType::Pong,
            3 => MessageType::ReadSetting,
            100 => MessageType::Uint8Iq,
            101 => MessageType::Int16Iq,
            102 => MessageType::Int24Iq,
            103 => MessageType::FloatIq,
            301 => MessageType::Uint8Fft,
            other => MessageType::Unknown(other),
        }
    }

    /// Whether this message belongs to the IQ family, whose members share
    /// one sequence-number counter.
    pub fn is_iq(self) -> bool {
        matches!(
            self,
            MessageType::Uint8Iq
                | MessageType::Int16Iq
                | MessageType::Int24Iq
                | MessageType::FloatIq
        )
    }
}

/// Device kinds reported in the device-info message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// The server is up but has no usable device attached.
    #[default]
    Invalid,
    AirspyOne,
    AirspyHf,
    RtlSdr,
    Unknown(u32),
}

impl DeviceType {
    /// The wire value of this device type.
    pub fn as_u32(self) -> u32 {
        match self {
            DeviceType::Invalid => 0,
            DeviceType::AirspyOne => 1,
            DeviceType::AirspyHf => 2,
            DeviceType::RtlSdr => 3,
            DeviceType::Unknown(value) => value,
        }
    }

    /// Map a wire value to a device type.
    pub fn from_wire(value: u32) -> Self {
        match value {
            0 => DeviceType::Invalid,
            1 => DeviceType::AirspyOne,
            2 => DeviceType::AirspyHf,
            3 => DeviceType::RtlSdr,
            other => DeviceType::Unknown(other),
        }
    }
}

/// True when the server's protocol id is compatible with this client:
/// the major.minor halves must match exactly.
pub fn version_compatible(protocol_id: u32) -> bool {
    protocol_id >> 16 == PROTOCOL_VERSION >> 16
}
