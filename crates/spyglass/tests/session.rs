//! End-to-end session tests against a scripted mock SpyServer.

use std::sync::Arc;
use std::time::Duration;

use spyglass::protocol::Setting;
use spyglass::{
    ClientEvent, ClientOptions, DeviceType, Error, SampleFormat, SampleRateEntry, SessionState,
    SpyServerClient,
};
use spyglass_test_harness::{default_client_sync, default_device_info, MockSpyServer, ServerBehavior};

/// Options with a short command grace so tests run quickly.
fn fast(mut options: ClientOptions) -> ClientOptions {
    options.command_grace = Duration::from_millis(1);
    options
}

async fn connect(server: &MockSpyServer, options: ClientOptions) -> SpyServerClient {
    SpyServerClient::connect_with_options(server.host(), server.port(), options)
        .await
        .expect("connect should succeed")
}

/// Wait for the four connect-time settings to land at the mock, then forget
/// them, so assertions see only what the test itself triggers.
async fn settle(server: &MockSpyServer) {
    server.await_settings(4, Duration::from_secs(2)).await;
    server.clear_commands();
}

/// Wait until the client observes a terminal session state.
async fn await_termination(client: &SpyServerClient) {
    let mut state = client.watch_state();
    tokio::time::timeout(Duration::from_secs(2), async {
        while !state.borrow_and_update().is_terminal() {
            state.changed().await.expect("state channel closed");
        }
    })
    .await
    .expect("session should reach a terminal state");
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

#[tokio::test]
async fn handshake_completes_and_caches_device_info() {
    let server = MockSpyServer::spawn().await;
    let client = connect(&server, fast(ClientOptions::default())).await;

    assert!(client.is_connected());
    assert_eq!(client.session_state(), SessionState::Ready);

    let info = client.device_info();
    assert_eq!(info.device_type, DeviceType::AirspyOne);
    assert_eq!(client.sampling_info(), (10_000_000, 3));
    assert_eq!(client.bandwidth(), 8_000_000);
    assert!(client.can_control());
    assert_eq!(client.gain(), 10);
    assert_eq!(client.center_freq(), 403_000_000);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn sample_rate_table_is_derived_from_device_info() {
    let server = MockSpyServer::spawn().await;
    let client = connect(&server, fast(ClientOptions::default())).await;

    // 10 MHz max rate, stages 0..=3, ascending by rate.
    assert_eq!(
        client.sample_rates().entries(),
        &[
            SampleRateEntry { rate_hz: 1_250_000, stage: 3 },
            SampleRateEntry { rate_hz: 2_500_000, stage: 2 },
            SampleRateEntry { rate_hz: 5_000_000, stage: 1 },
            SampleRateEntry { rate_hz: 10_000_000, stage: 0 },
        ]
    );

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn initial_settings_are_pushed_in_order() {
    let server = MockSpyServer::spawn().await;
    let client = connect(
        &server,
        fast(ClientOptions::iq_only(SampleFormat::Int16)),
    )
    .await;

    let settings = server.await_settings(4, Duration::from_secs(2)).await;
    assert_eq!(
        settings[..4],
        [
            (Setting::StreamingMode.as_u32(), vec![1]),
            (Setting::IqFormat.as_u32(), vec![SampleFormat::Int16.as_u32()]),
            (Setting::FftFormat.as_u32(), vec![SampleFormat::Uint8.as_u32()]),
            (Setting::FftDisplayPixels.as_u32(), vec![32_767]),
        ]
    );

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn fft_session_requests_fft_iq_mode() {
    let server = MockSpyServer::spawn().await;
    let client = connect(&server, fast(ClientOptions::fft_only(1024))).await;

    let settings = server.await_settings(4, Duration::from_secs(2)).await;
    // FFT-only still rides the FFT+IQ stream mode; the server will not
    // deliver FFT frames otherwise.
    assert_eq!(settings[0], (Setting::StreamingMode.as_u32(), vec![5]));
    assert_eq!(settings[3], (Setting::FftDisplayPixels.as_u32(), vec![1024]));

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn missing_client_sync_times_out_handshake() {
    let server = MockSpyServer::spawn_with(ServerBehavior {
        client_sync: None,
        ..ServerBehavior::default()
    })
    .await;

    let mut options = fast(ClientOptions::default());
    options.handshake_timeout = Duration::from_millis(200);

    let started = std::time::Instant::now();
    let err = SpyServerClient::connect_with_options(server.host(), server.port(), options)
        .await
        .expect_err("handshake should time out");
    assert!(matches!(err, Error::HandshakeTimeout), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn missing_device_info_times_out_handshake() {
    let server = MockSpyServer::spawn_with(ServerBehavior {
        device_info: None,
        client_sync: None,
    })
    .await;

    let mut options = fast(ClientOptions::default());
    options.handshake_timeout = Duration::from_millis(200);

    let err = SpyServerClient::connect_with_options(server.host(), server.port(), options)
        .await
        .expect_err("handshake should time out");
    assert!(matches!(err, Error::HandshakeTimeout));
}

#[tokio::test]
async fn invalid_device_fails_construction() {
    let mut info = default_device_info();
    info.device_type = DeviceType::Invalid;
    let server = MockSpyServer::spawn_with(ServerBehavior {
        device_info: Some(info),
        client_sync: Some(default_client_sync()),
    })
    .await;

    let err =
        SpyServerClient::connect_with_options(server.host(), server.port(), fast(ClientOptions::default()))
            .await
            .expect_err("construction should fail");
    assert!(matches!(err, Error::NoDevice), "got {err:?}");
}

// ---------------------------------------------------------------------------
// Control surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn set_center_freq_emits_the_retune_sequence() {
    let server = MockSpyServer::spawn().await;
    let client = connect(&server, fast(ClientOptions::iq_only(SampleFormat::Int16))).await;
    settle(&server).await;

    let committed = client.set_center_freq(403_000_000).await.unwrap();
    assert_eq!(committed, 403_000_000);
    assert_eq!(client.center_freq(), 403_000_000);

    let settings = server.await_settings(4, Duration::from_secs(2)).await;
    assert_eq!(
        settings,
        vec![
            (Setting::StreamingMode.as_u32(), vec![5]),
            (Setting::IqFrequency.as_u32(), vec![403_000_000]),
            (Setting::FftFrequency.as_u32(), vec![403_000_000]),
            // The session's own mode (IQ only) is restored afterwards.
            (Setting::StreamingMode.as_u32(), vec![1]),
        ]
    );

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn center_freq_beyond_u32_is_rejected_without_commands() {
    let server = MockSpyServer::spawn().await;
    let client = connect(&server, fast(ClientOptions::default())).await;
    settle(&server).await;

    let err = client.set_center_freq(u64::from(u32::MAX) + 1).await.unwrap_err();
    assert!(matches!(err, Error::InvalidParameter(_)));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(server.settings().is_empty());

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn set_sample_rate_pushes_both_decimations() {
    let server = MockSpyServer::spawn().await;
    let client = connect(&server, fast(ClientOptions::default())).await;
    settle(&server).await;

    let committed = client.set_sample_rate(2_500_000).await.unwrap();
    assert_eq!(committed, 2_500_000);
    assert_eq!(client.sample_rate(), 2_500_000);

    let settings = server.await_settings(3, Duration::from_secs(2)).await;
    assert_eq!(
        settings,
        vec![
            (Setting::IqDecimation.as_u32(), vec![2]),
            (Setting::FftDecimation.as_u32(), vec![2]),
            (Setting::FftDisplayPixels.as_u32(), vec![32_767]),
        ]
    );

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn unsupported_sample_rate_is_refused() {
    let server = MockSpyServer::spawn().await;
    let client = connect(&server, fast(ClientOptions::default())).await;
    settle(&server).await;

    let err = client.set_sample_rate(3_000_000).await.unwrap_err();
    match err {
        Error::Unsupported(message) => {
            assert!(message.contains("3000000"), "message: {message}");
        }
        other => panic!("expected Unsupported, got {other:?}"),
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(server.settings().is_empty());

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn gain_is_pushed_when_the_server_allows_control() {
    let server = MockSpyServer::spawn().await;
    let client = connect(&server, fast(ClientOptions::default())).await;
    settle(&server).await;

    assert_eq!(client.gain_names(), vec!["LNA", "Digital"]);
    let committed = client.set_gain(14).await.unwrap();
    assert_eq!(committed, 14);

    let settings = server.await_settings(1, Duration::from_secs(2)).await;
    assert_eq!(settings, vec![(Setting::Gain.as_u32(), vec![14])]);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn gain_is_withheld_when_control_is_denied() {
    let mut sync = default_client_sync();
    sync.can_control = 0;
    let server = MockSpyServer::spawn_with(ServerBehavior {
        client_sync: Some(sync),
        ..ServerBehavior::default()
    })
    .await;
    let client = connect(&server, fast(ClientOptions::default())).await;
    settle(&server).await;

    assert_eq!(client.gain_names(), vec!["Digital"]);
    // The current gain comes back unchanged and nothing hits the wire.
    assert_eq!(client.set_gain(14).await.unwrap(), 10);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(server.settings().is_empty());

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn digital_gain_is_scaled_to_fixed_point() {
    let server = MockSpyServer::spawn().await;
    let client = connect(&server, fast(ClientOptions::default())).await;
    settle(&server).await;

    client.set_digital_gain(0.5).await.unwrap();
    assert_eq!(client.digital_gain(), 0.5);

    let settings = server.await_settings(1, Duration::from_secs(2)).await;
    let expected = (0.5 * f64::from(u32::MAX)) as u32;
    assert_eq!(settings, vec![(Setting::IqDigitalGain.as_u32(), vec![expected])]);

    let err = client.set_digital_gain(1.5).await.unwrap_err();
    assert!(matches!(err, Error::InvalidParameter(_)));

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn start_and_stop_toggle_streaming() {
    let server = MockSpyServer::spawn().await;
    let client = connect(&server, fast(ClientOptions::default())).await;
    settle(&server).await;

    assert!(!client.is_streaming());
    client.start().await.unwrap();
    assert!(client.is_streaming());
    assert_eq!(client.session_state(), SessionState::Streaming);

    // Starting twice sends nothing new.
    client.start().await.unwrap();

    client.stop().await.unwrap();
    assert!(!client.is_streaming());
    assert_eq!(client.session_state(), SessionState::Ready);

    let settings = server.await_settings(2, Duration::from_secs(2)).await;
    assert_eq!(
        settings,
        vec![
            (Setting::StreamingEnabled.as_u32(), vec![1]),
            (Setting::StreamingEnabled.as_u32(), vec![0]),
        ]
    );

    client.disconnect().await.unwrap();
}

// ---------------------------------------------------------------------------
// IQ delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn int16_iq_frame_is_delivered_verbatim() {
    let server = MockSpyServer::spawn().await;
    let client = connect(&server, fast(ClientOptions::iq_only(SampleFormat::Int16))).await;
    client.start().await.unwrap();

    // 4096 bytes: 1024 samples of interleaved 16-bit I/Q.
    let mut body = Vec::with_capacity(4096);
    for i in 0..2048i16 {
        body.extend_from_slice(&i.to_le_bytes());
    }
    server.send_iq(SampleFormat::Int16, 0, &body);

    let mut out = vec![0i16; 2048];
    let delivered = tokio::time::timeout(Duration::from_secs(2), client.read_iq_i16(&mut out))
        .await
        .expect("read should complete")
        .unwrap();
    assert_eq!(delivered, 1024);
    for (i, &value) in out.iter().enumerate() {
        assert_eq!(value, i as i16, "component {i}");
    }

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn uint8_iq_frames_concatenate_in_order() {
    let server = MockSpyServer::spawn().await;
    let client = connect(&server, fast(ClientOptions::iq_only(SampleFormat::Uint8))).await;
    client.start().await.unwrap();

    server.send_iq(SampleFormat::Uint8, 0, &[1, 2, 3, 4]);
    server.send_iq(SampleFormat::Uint8, 1, &[5, 6, 7, 8]);

    let mut out = [0u8; 8];
    let delivered = tokio::time::timeout(Duration::from_secs(2), client.read_iq_u8(&mut out))
        .await
        .expect("read should complete")
        .unwrap();
    assert_eq!(delivered, 4);
    assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn read_before_start_returns_zero_samples() {
    let server = MockSpyServer::spawn().await;
    let client = connect(&server, fast(ClientOptions::iq_only(SampleFormat::Int16))).await;

    let mut out = [0i16; 8];
    assert_eq!(client.read_iq_i16(&mut out).await.unwrap(), 0);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn mismatched_pull_width_is_refused() {
    let server = MockSpyServer::spawn().await;
    let client = connect(&server, fast(ClientOptions::iq_only(SampleFormat::Int16))).await;
    client.start().await.unwrap();

    let mut out = [0u8; 8];
    let err = client.read_iq_u8(&mut out).await.unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn fft_only_session_has_no_iq_pull() {
    let server = MockSpyServer::spawn().await;
    let client = connect(&server, fast(ClientOptions::fft_only(64))).await;

    let mut out = [0i16; 8];
    let err = client.read_iq_i16(&mut out).await.unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn sequence_gaps_count_dropped_frames() {
    let server = MockSpyServer::spawn().await;
    let client = connect(&server, fast(ClientOptions::iq_only(SampleFormat::Int16))).await;
    client.start().await.unwrap();

    for sequence in [0u32, 1, 3, 4] {
        server.send_iq(SampleFormat::Int16, sequence, &[0u8; 8]);
    }

    // Reading everything guarantees all four frames were dispatched.
    let mut out = [0i16; 16];
    tokio::time::timeout(Duration::from_secs(2), client.read_iq_i16(&mut out))
        .await
        .expect("read should complete")
        .unwrap();
    assert_eq!(client.dropped_frames(), 1);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn float_iq_frames_are_discarded() {
    let server = MockSpyServer::spawn().await;
    let client = connect(&server, fast(ClientOptions::iq_only(SampleFormat::Int16))).await;
    client.start().await.unwrap();

    server.send_iq(SampleFormat::Float, 0, &[0xFF; 32]);
    server.send_iq(SampleFormat::Int16, 1, &[1, 0, 2, 0]);

    let mut out = [0i16; 2];
    tokio::time::timeout(Duration::from_secs(2), client.read_iq_i16(&mut out))
        .await
        .expect("read should complete")
        .unwrap();
    // Only the int16 body reached the ring.
    assert_eq!(out, [1, 2]);
    assert_eq!(client.dropped_frames(), 0);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn ring_overflow_is_reported_and_recovered() {
    let server = MockSpyServer::spawn().await;
    let mut options = fast(ClientOptions::iq_only(SampleFormat::Uint8));
    options.ring_capacity = 16;
    let client = connect(&server, options).await;
    let mut events = client.subscribe();
    client.start().await.unwrap();

    server.send_iq(SampleFormat::Uint8, 0, &[1u8; 12]);
    server.send_iq(SampleFormat::Uint8, 1, &[2u8; 12]);

    // 24 bytes into a 16-byte ring: 8 oldest bytes must go.
    let overflow = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(ClientEvent::RingOverflow { bytes_dropped }) = events.recv().await {
                return bytes_dropped;
            }
        }
    })
    .await
    .expect("overflow event should be emitted");
    assert_eq!(overflow, 8);
    assert_eq!(client.overflow_bytes(), 8);

    let mut out = [0u8; 16];
    tokio::time::timeout(Duration::from_secs(2), client.read_iq_u8(&mut out))
        .await
        .expect("read should complete")
        .unwrap();
    assert_eq!(&out[..4], &[1, 1, 1, 1]);
    assert_eq!(&out[4..], &[2u8; 12]);

    client.disconnect().await.unwrap();
}

// ---------------------------------------------------------------------------
// FFT delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fft_frames_accumulate_until_drained() {
    let server = MockSpyServer::spawn().await;
    let client = connect(&server, fast(ClientOptions::fft_only(8))).await;
    client.start().await.unwrap();

    server.send_fft(0, &[1, 2, 3, 4, 5, 6, 7, 8]);
    server.send_fft(1, &[1, 1, 1, 1, 1, 1, 1, 1]);
    server.send_fft(2, &[0, 0, 0, 0, 0, 0, 0, 0]);

    // Drains may observe the three frames in one window or several; the
    // accumulated totals are what is specified.
    let mut sums = vec![0u32; 8];
    let mut periods = 0;
    while periods < 3 {
        let frame = tokio::time::timeout(Duration::from_secs(2), client.read_fft())
            .await
            .expect("drain should complete")
            .unwrap();
        for (total, bin) in sums.iter_mut().zip(&frame.sums) {
            *total += bin;
        }
        periods += frame.periods;
    }
    assert_eq!(periods, 3);
    assert_eq!(sums, vec![2, 3, 4, 5, 6, 7, 8, 9]);

    client.disconnect().await.unwrap();
}

// ---------------------------------------------------------------------------
// Teardown and failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_unblocks_a_parked_iq_reader() {
    let server = MockSpyServer::spawn().await;
    let client = Arc::new(
        connect(&server, fast(ClientOptions::iq_only(SampleFormat::Int16))).await,
    );
    client.start().await.unwrap();

    let reader = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            let mut out = vec![0i16; 4096];
            client.read_iq_i16(&mut out).await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    client.disconnect().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), reader)
        .await
        .expect("reader must be unblocked by disconnect")
        .unwrap();
    assert!(matches!(result, Err(Error::StreamClosed)), "got {result:?}");
    assert!(!client.is_connected());
}

#[tokio::test]
async fn disconnect_unblocks_a_parked_fft_consumer() {
    let server = MockSpyServer::spawn().await;
    let client = Arc::new(connect(&server, fast(ClientOptions::fft_only(32))).await);

    let consumer = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.read_fft().await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    client.disconnect().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), consumer)
        .await
        .expect("consumer must be unblocked by disconnect")
        .unwrap();
    assert!(matches!(result, Err(Error::StreamClosed)));
}

#[tokio::test]
async fn server_disconnect_terminates_the_session() {
    let server = MockSpyServer::spawn().await;
    let client = connect(&server, fast(ClientOptions::iq_only(SampleFormat::Int16))).await;
    let mut events = client.subscribe();

    server.abort();
    await_termination(&client).await;

    assert!(!client.is_connected());
    let err = client.set_center_freq(100_000_000).await.unwrap_err();
    assert!(matches!(err, Error::NotConnected));

    let disconnected = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(ClientEvent::Disconnected) = events.recv().await {
                return true;
            }
        }
    })
    .await
    .expect("a Disconnected event should be emitted");
    assert!(disconnected);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn incompatible_protocol_version_kills_the_session() {
    use spyglass_test_harness::frames;

    let server = MockSpyServer::spawn().await;
    let client = connect(&server, fast(ClientOptions::iq_only(SampleFormat::Int16))).await;
    client.start().await.unwrap();

    let bad_version = (3 << 24) | 1700;
    server.send_frame(frames::message_frame_with_protocol(
        bad_version,
        101,
        1,
        0,
        &[0u8; 4],
    ));

    await_termination(&client).await;
    assert!(!client.is_connected());

    let mut out = [0i16; 2];
    let err = client.read_iq_i16(&mut out).await.unwrap_err();
    assert!(matches!(err, Error::StreamClosed));

    client.disconnect().await.unwrap();
}
