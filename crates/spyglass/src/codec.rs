//! Encoders and decoders for SpyServer wire records.
//!
//! Everything on the wire is little-endian. Client-to-server command frames
//! are built with [`encode_command`] and friends; server-to-client payloads
//! ([`DeviceInfo`], [`ClientSync`]) are decoded field-by-field with explicit
//! little-endian readers rather than by casting struct layouts onto buffers,
//! so the decoders are independent of host endianness and padding.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::{
    CommandType, DeviceType, Setting, COMMAND_HEADER_SIZE, MESSAGE_HEADER_SIZE, PROTOCOL_VERSION,
};

/// Wire size of a [`DeviceInfo`] payload (twelve u32 fields).
pub const DEVICE_INFO_SIZE: usize = 48;

/// Wire size of a [`ClientSync`] payload (nine u32 fields).
pub const CLIENT_SYNC_SIZE: usize = 36;

/// A server-to-client message header.
///
/// `message_type` is stored already masked to its low 16 bits; the upper
/// bits of the wire field carry flags this client does not interpret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Server protocol id; the high 16 bits are major.minor.
    pub protocol_id: u32,
    /// Message type, masked to 16 bits.
    pub message_type: u16,
    /// Stream type bits the message belongs to.
    pub stream_type: u32,
    /// Per-stream monotonic sequence number.
    pub sequence_number: u32,
    /// Length of the body that follows the header.
    pub body_size: u32,
}

impl MessageHeader {
    /// Decode a header from exactly [`MESSAGE_HEADER_SIZE`] bytes.
    pub fn decode(buf: &[u8; MESSAGE_HEADER_SIZE]) -> Self {
        let mut buf = &buf[..];
        MessageHeader {
            protocol_id: buf.get_u32_le(),
            message_type: (buf.get_u32_le() & 0xFFFF) as u16,
            stream_type: buf.get_u32_le(),
            sequence_number: buf.get_u32_le(),
            body_size: buf.get_u32_le(),
        }
    }
}

/// Device capabilities announced by the server during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_type: DeviceType,
    pub device_serial: u32,
    pub maximum_sample_rate: u32,
    pub maximum_bandwidth: u32,
    pub decimation_stage_count: u32,
    pub gain_stage_count: u32,
    pub maximum_gain_index: u32,
    pub minimum_frequency: u32,
    pub maximum_frequency: u32,
    pub resolution: u32,
    pub minimum_iq_decimation: u32,
    pub forced_iq_format: u32,
}

impl DeviceInfo {
    /// Decode a device-info payload.
    pub fn decode(body: &[u8]) -> Result<Self> {
        if body.len() < DEVICE_INFO_SIZE {
            return Err(Error::Protocol(format!(
                "device info body is {} bytes, expected at least {}",
                body.len(),
                DEVICE_INFO_SIZE
            )));
        }
        let mut buf = body;
        Ok(DeviceInfo {
            device_type: DeviceType::from_wire(buf.get_u32_le()),
            device_serial: buf.get_u32_le(),
            maximum_sample_rate: buf.get_u32_le(),
            maximum_bandwidth: buf.get_u32_le(),
            decimation_stage_count: buf.get_u32_le(),
            gain_stage_count: buf.get_u32_le(),
            maximum_gain_index: buf.get_u32_le(),
            minimum_frequency: buf.get_u32_le(),
            maximum_frequency: buf.get_u32_le(),
            resolution: buf.get_u32_le(),
            minimum_iq_decimation: buf.get_u32_le(),
            forced_iq_format: buf.get_u32_le(),
        })
    }
}

/// Tuning-state synchronization pushed by the server after the handshake and
/// whenever configuration changes take effect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientSync {
    pub can_control: u32,
    pub gain: u32,
    pub device_center_frequency: u32,
    pub iq_center_frequency: u32,
    pub fft_center_frequency: u32,
    pub minimum_iq_center_frequency: u32,
    pub maximum_iq_center_frequency: u32,
    pub minimum_fft_center_frequency: u32,
    pub maximum_fft_center_frequency: u32,
}

impl ClientSync {
    /// Decode a client-sync payload.
    pub fn decode(body: &[u8]) -> Result<Self> {
        if body.len() < CLIENT_SYNC_SIZE {
            return Err(Error::Protocol(format!(
                "client sync body is {} bytes, expected at least {}",
                body.len(),
                CLIENT_SYNC_SIZE
            )));
        }
        let mut buf = body;
        Ok(ClientSync {
            can_control: buf.get_u32_le(),
            gain: buf.get_u32_le(),
            device_center_frequency: buf.get_u32_le(),
            iq_center_frequency: buf.get_u32_le(),
            fft_center_frequency: buf.get_u32_le(),
            minimum_iq_center_frequency: buf.get_u32_le(),
            maximum_iq_center_frequency: buf.get_u32_le(),
            minimum_fft_center_frequency: buf.get_u32_le(),
            maximum_fft_center_frequency: buf.get_u32_le(),
        })
    }
}

/// Encode a complete command frame: `CommandHeader` followed by the body.
pub fn encode_command(command: CommandType, body: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(COMMAND_HEADER_SIZE + body.len());
    buf.put_u32_le(command.as_u32());
    buf.put_u32_le(body.len() as u32);
    buf.put_slice(body);
    buf.to_vec()
}

/// Encode the `HELLO` frame: protocol version followed by the client name.
pub fn encode_hello(client_name: &str) -> Vec<u8> {
    let mut body = BytesMut::with_capacity(4 + client_name.len());
    body.put_u32_le(PROTOCOL_VERSION);
    body.put_slice(client_name.as_bytes());
    encode_command(CommandType::Hello, &body)
}

/// Encode a `SET_SETTING` frame: the setting type followed by its u32
/// parameters.
pub fn encode_set_setting(setting: Setting, params: &[u32]) -> Vec<u8> {
    let mut body = BytesMut::with_capacity(4 + params.len() * 4);
    body.put_u32_le(setting.as_u32());
    for &p in params {
        body.put_u32_le(p);
    }
    encode_command(CommandType::SetSetting, &body)
}

/// A decoded client-to-server command, as seen by a server.
///
/// The client never receives commands; this exists for scripted test servers
/// that need to observe what the client sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The raw command type value.
    pub command_type: u32,
    /// The command body.
    pub body: Vec<u8>,
}

impl Command {
    /// Interpret this command as `SET_SETTING`, returning the setting type
    /// and its u32 parameters. Returns `None` for other commands or a
    /// malformed body.
    pub fn as_set_setting(&self) -> Option<(u32, Vec<u32>)> {
        if self.command_type != CommandType::SetSetting.as_u32() {
            return None;
        }
        if self.body.len() < 4 || self.body.len() % 4 != 0 {
            return None;
        }
        let mut buf = &self.body[..];
        let setting = buf.get_u32_le();
        let mut params = Vec::with_capacity(buf.remaining() / 4);
        while buf.has_remaining() {
            params.push(buf.get_u32_le());
        }
        Some((setting, params))
    }
}

/// Result of attempting to decode one command frame from a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandDecode {
    /// A complete command was decoded; `consumed` bytes should be discarded
    /// from the front of the buffer.
    Command {
        command: Command,
        consumed: usize,
    },
    /// The buffer does not yet hold a complete frame.
    Incomplete,
}

/// Attempt to decode one command frame from the front of `buf`.
pub fn decode_command(buf: &[u8]) -> CommandDecode {
    if buf.len() < COMMAND_HEADER_SIZE {
        return CommandDecode::Incomplete;
    }
    let mut header = &buf[..COMMAND_HEADER_SIZE];
    let command_type = header.get_u32_le();
    let body_size = header.get_u32_le() as usize;
    if buf.len() < COMMAND_HEADER_SIZE + body_size {
        return CommandDecode::Incomplete;
    }
    let body = buf[COMMAND_HEADER_SIZE..COMMAND_HEADER_SIZE + body_size].to_vec();
    CommandDecode::Command {
        command: Command { command_type, body },
        consumed: COMMAND_HEADER_SIZE + body_size,
    }
}
