//! Builders for server-to-client wire frames.
//!
//! Everything is little-endian, matching the SpyServer protocol. These run
//! on the "server side" of a test, so they complement (rather than reuse)
//! the client's decoders.

use bytes::{BufMut, BytesMut};

use spyglass::codec::{ClientSync, DeviceInfo};
use spyglass::protocol::{
    SampleFormat, MESSAGE_HEADER_SIZE, PROTOCOL_VERSION, STREAM_TYPE_FFT, STREAM_TYPE_IQ,
};

/// Message type value of a device-info frame.
pub const MSG_DEVICE_INFO: u32 = 0;
/// Message type value of a client-sync frame.
pub const MSG_CLIENT_SYNC: u32 = 1;
/// Message type value of a u8 FFT frame.
pub const MSG_UINT8_FFT: u32 = 301;

/// Build a complete message frame with the compiled-in protocol version.
pub fn message_frame(message_type: u32, stream_type: u32, sequence: u32, body: &[u8]) -> Vec<u8> {
    message_frame_with_protocol(PROTOCOL_VERSION, message_type, stream_type, sequence, body)
}

/// Build a complete message frame with an arbitrary protocol id, for
/// exercising the client's version gate.
pub fn message_frame_with_protocol(
    protocol_id: u32,
    message_type: u32,
    stream_type: u32,
    sequence: u32,
    body: &[u8],
) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_SIZE + body.len());
    buf.put_u32_le(protocol_id);
    buf.put_u32_le(message_type);
    buf.put_u32_le(stream_type);
    buf.put_u32_le(sequence);
    buf.put_u32_le(body.len() as u32);
    buf.put_slice(body);
    buf.to_vec()
}

/// Encode a device-info announcement.
pub fn device_info_frame(info: &DeviceInfo) -> Vec<u8> {
    let mut body = BytesMut::with_capacity(48);
    body.put_u32_le(info.device_type.as_u32());
    body.put_u32_le(info.device_serial);
    body.put_u32_le(info.maximum_sample_rate);
    body.put_u32_le(info.maximum_bandwidth);
    body.put_u32_le(info.decimation_stage_count);
    body.put_u32_le(info.gain_stage_count);
    body.put_u32_le(info.maximum_gain_index);
    body.put_u32_le(info.minimum_frequency);
    body.put_u32_le(info.maximum_frequency);
    body.put_u32_le(info.resolution);
    body.put_u32_le(info.minimum_iq_decimation);
    body.put_u32_le(info.forced_iq_format);
    message_frame(MSG_DEVICE_INFO, 0, 0, &body)
}

/// Encode a client-sync message.
pub fn client_sync_frame(sync: &ClientSync) -> Vec<u8> {
    let mut body = BytesMut::with_capacity(36);
    body.put_u32_le(sync.can_control);
    body.put_u32_le(sync.gain);
    body.put_u32_le(sync.device_center_frequency);
    body.put_u32_le(sync.iq_center_frequency);
    body.put_u32_le(sync.fft_center_frequency);
    body.put_u32_le(sync.minimum_iq_center_frequency);
    body.put_u32_le(sync.maximum_iq_center_frequency);
    body.put_u32_le(sync.minimum_fft_center_frequency);
    body.put_u32_le(sync.maximum_fft_center_frequency);
    message_frame(MSG_CLIENT_SYNC, 0, 0, &body)
}

/// Encode an IQ data frame in the given sample format.
pub fn iq_frame(format: SampleFormat, sequence: u32, body: &[u8]) -> Vec<u8> {
    let message_type = match format {
        SampleFormat::Uint8 => 100,
        SampleFormat::Int16 => 101,
        SampleFormat::Int24 => 102,
        SampleFormat::Float => 103,
    };
    message_frame(message_type, STREAM_TYPE_IQ, sequence, body)
}

/// Encode a u8 FFT frame, one byte per bin.
pub fn fft_frame(sequence: u32, body: &[u8]) -> Vec<u8> {
    message_frame(MSG_UINT8_FFT, STREAM_TYPE_FFT, sequence, body)
}
