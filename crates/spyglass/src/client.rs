//! SpyServer TCP session: handshake, receiver task, and control surface.
//!
//! [`SpyServerClient`] owns the TCP connection to a SpyServer. Construction
//! performs the greeting and capability handshake; afterwards one background
//! receiver task reads the socket for the session's lifetime, feeding the
//! frame decoder and dispatching decoded messages into the IQ ring, the FFT
//! accumulator, and the cached session state. Control methods run on the
//! caller's task and write command frames directly.
//!
//! The receiver task never holds a reference to the client itself -- it works
//! against shared interior state and is joined on teardown, so dropping the
//! client cannot leak the task or deadlock a consumer.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::{self, ClientSync, DeviceInfo, MessageHeader};
use crate::error::{Error, Result};
use crate::events::ClientEvent;
use crate::fft::{FftAccumulator, FftFrame};
use crate::framing::{FrameDecoder, SequenceTracker};
use crate::protocol::{
    DeviceType, MessageType, SampleFormat, Setting, STREAM_MODE_FFT_IQ, STREAM_TYPE_FFT,
    STREAM_TYPE_IQ,
};
use crate::ring::SampleRing;
use crate::state::{SampleRateTable, SessionState, TunerState};

/// TCP connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default deadline for the device-info/client-sync handshake.
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default settle time after each command. The server applies commands
/// asynchronously; back-to-back configuration changes must not race.
const DEFAULT_COMMAND_GRACE: Duration = Duration::from_millis(100);

/// Default IQ ring capacity (10 MiB).
const DEFAULT_RING_CAPACITY: usize = 10 * 1024 * 1024;

/// Default FFT bin count requested from the server.
const DEFAULT_FFT_BINS: u32 = 32_767;

/// Broadcast capacity for [`ClientEvent`] subscribers.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Socket read buffer size for the receiver task.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Options for opening a SpyServer session.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Consume the IQ stream.
    pub iq: bool,
    /// Consume the FFT stream. The server will not deliver FFT frames in
    /// FFT-only mode, so this also requests the IQ stream on the wire.
    pub fft: bool,
    /// FFT display bin count requested from the server.
    pub fft_bins: u32,
    /// IQ sample format; only [`SampleFormat::Uint8`] and
    /// [`SampleFormat::Int16`] are accepted.
    pub sample_format: SampleFormat,
    /// IQ ring buffer capacity in bytes.
    pub ring_capacity: usize,
    /// Deadline for the capability/synchronization handshake.
    pub handshake_timeout: Duration,
    /// Settle time after each command frame.
    pub command_grace: Duration,
    /// Client name sent in the HELLO greeting.
    pub client_name: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            iq: true,
            fft: false,
            fft_bins: DEFAULT_FFT_BINS,
            sample_format: SampleFormat::Int16,
            ring_capacity: DEFAULT_RING_CAPACITY,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            command_grace: DEFAULT_COMMAND_GRACE,
            client_name: "spyglass".to_string(),
        }
    }
}

impl ClientOptions {
    /// Options for an IQ-only session in the given sample format.
    pub fn iq_only(sample_format: SampleFormat) -> Self {
        ClientOptions {
            iq: true,
            fft: false,
            sample_format,
            ..ClientOptions::default()
        }
    }

    /// Options for an FFT-only session with the given bin count.
    pub fn fft_only(fft_bins: u32) -> Self {
        ClientOptions {
            iq: false,
            fft: true,
            fft_bins,
            ..ClientOptions::default()
        }
    }
}

/// State shared between the client handle and the receiver task.
#[derive(Debug)]
struct SharedState {
    /// Session lifecycle, published by the receiver task and the control
    /// surface; doubles as the handshake latch.
    state_tx: watch::Sender<SessionState>,
    /// Whether sample delivery is enabled.
    streaming: AtomicBool,
    /// Whether the server lets this client change device settings.
    can_control: AtomicBool,
    /// IQ frames lost upstream, counted from sequence-number gaps.
    dropped_frames: AtomicU64,
    /// IQ bytes lost locally to ring overflow.
    overflow_bytes: AtomicU64,
    /// Currently configured IQ sample rate in Hz.
    iq_sample_rate: AtomicU32,
    /// Device capabilities latched from the handshake.
    device_info: StdMutex<DeviceInfo>,
    /// Tuning state latched from sync messages and control calls.
    tuner: StdMutex<TunerState>,
    /// Sample-rate table built once the handshake completes.
    sample_rates: StdMutex<SampleRateTable>,
    /// Stream mode bits requested at connect time.
    streaming_mode: u32,
}

impl SharedState {
    fn device_info(&self) -> DeviceInfo {
        self.device_info.lock().expect("device info lock poisoned").clone()
    }

    fn tuner(&self) -> TunerState {
        *self.tuner.lock().expect("tuner lock poisoned")
    }

    fn sample_rates(&self) -> SampleRateTable {
        self.sample_rates
            .lock()
            .expect("sample rate lock poisoned")
            .clone()
    }
}

/// A connected SpyServer session.
///
/// All methods take `&self`; the client can be shared across tasks behind an
/// [`Arc`]. The IQ pull and FFT drain APIs assume a single consumer each.
#[derive(Debug)]
pub struct SpyServerClient {
    /// Write half of the TCP stream, `None` once torn down.
    writer: Arc<Mutex<Option<WriteHalf<TcpStream>>>>,
    shared: Arc<SharedState>,
    /// IQ byte FIFO; present only when the session consumes IQ.
    ring: Option<Arc<SampleRing>>,
    /// FFT accumulator; present only when the session consumes FFT.
    fft: Option<Arc<FftAccumulator>>,
    state_rx: watch::Receiver<SessionState>,
    event_tx: broadcast::Sender<ClientEvent>,
    cancel: CancellationToken,
    read_task: Mutex<Option<JoinHandle<()>>>,
    command_grace: Duration,
    sample_format: SampleFormat,
    fft_bins: u32,
    digital_gain: StdMutex<f64>,
}

impl SpyServerClient {
    /// Connect with default options (16-bit IQ only).
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        Self::connect_with_options(host, port, ClientOptions::default()).await
    }

    /// Connect, greet the server, and complete the capability handshake.
    ///
    /// On success the session is `Ready`: the initial stream mode, sample
    /// formats, and FFT pixel count have been pushed and the sample-rate
    /// table is built. Fails with [`Error::NoDevice`] when the server has no
    /// usable device and [`Error::HandshakeTimeout`] when it never sends its
    /// capability and synchronization messages.
    pub async fn connect_with_options(
        host: &str,
        port: u16,
        options: ClientOptions,
    ) -> Result<Self> {
        validate_options(&options)?;

        let addr = format!("{host}:{port}");
        tracing::debug!(addr = %addr, "connecting to SpyServer");

        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|e| Error::Transport(format!("TCP connect to {addr} failed: {e}")))?;

        // Small command frames are latency-sensitive.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(error = %e, "failed to set TCP_NODELAY (continuing anyway)");
        }

        let (reader, writer_half) = tokio::io::split(stream);

        let mut streaming_mode = 0u32;
        if options.iq {
            streaming_mode |= STREAM_TYPE_IQ;
        }
        if options.fft {
            // The server does not honor FFT-only mode with a usable FFT
            // stream, so an FFT session requests FFT+IQ and pays for the IQ
            // channel as well.
            streaming_mode |= STREAM_MODE_FFT_IQ;
        }

        let (state_tx, state_rx) = watch::channel(SessionState::Greeting);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let shared = Arc::new(SharedState {
            state_tx,
            streaming: AtomicBool::new(false),
            can_control: AtomicBool::new(false),
            dropped_frames: AtomicU64::new(0),
            overflow_bytes: AtomicU64::new(0),
            iq_sample_rate: AtomicU32::new(0),
            device_info: StdMutex::new(DeviceInfo::default()),
            tuner: StdMutex::new(TunerState::default()),
            sample_rates: StdMutex::new(SampleRateTable::default()),
            streaming_mode,
        });

        let ring = options
            .iq
            .then(|| Arc::new(SampleRing::new(options.ring_capacity)));
        let fft = options
            .fft
            .then(|| Arc::new(FftAccumulator::new(options.fft_bins as usize)));

        let writer = Arc::new(Mutex::new(Some(writer_half)));
        let cancel = CancellationToken::new();

        // Greeting must be on the wire before the server will say anything.
        send_frame(
            &writer,
            &codec::encode_hello(&options.client_name),
            options.command_grace,
        )
        .await?;
        shared.state_tx.send_replace(SessionState::AwaitingDeviceInfo);

        let read_task = {
            let dispatcher = Dispatcher {
                shared: Arc::clone(&shared),
                ring: ring.clone(),
                fft: fft.clone(),
                event_tx: event_tx.clone(),
                sequence: SequenceTracker::new(),
            };
            let cancel = cancel.clone();
            tokio::spawn(read_loop(reader, dispatcher, cancel))
        };

        let client = SpyServerClient {
            writer,
            shared,
            ring,
            fft,
            state_rx,
            event_tx,
            cancel,
            read_task: Mutex::new(Some(read_task)),
            command_grace: options.command_grace,
            sample_format: options.sample_format,
            fft_bins: options.fft_bins,
            digital_gain: StdMutex::new(0.0),
        };

        if let Err(e) = client.await_handshake(options.handshake_timeout).await {
            client.teardown().await;
            return Err(e);
        }
        if let Err(e) = client.push_initial_settings().await {
            client.teardown().await;
            return Err(e);
        }

        let _ = client.event_tx.send(ClientEvent::Connected);
        tracing::debug!(addr = %addr, "SpyServer session ready");
        Ok(client)
    }

    /// Wait for the receiver task to drive the handshake to `Ready`.
    async fn await_handshake(&self, deadline: Duration) -> Result<()> {
        let mut rx = self.state_rx.clone();
        let wait = async {
            loop {
                match *rx.borrow_and_update() {
                    SessionState::Ready => return Ok(()),
                    SessionState::NoDevice => return Err(Error::NoDevice),
                    SessionState::Terminated => return Err(Error::ConnectionLost),
                    _ => {}
                }
                if rx.changed().await.is_err() {
                    return Err(Error::ConnectionLost);
                }
            }
        };
        match tokio::time::timeout(deadline, wait).await {
            Ok(result) => result,
            Err(_) => Err(Error::HandshakeTimeout),
        }
    }

    /// Push the session's initial configuration and build the rate table.
    async fn push_initial_settings(&self) -> Result<()> {
        self.set_setting(Setting::StreamingMode, &[self.shared.streaming_mode])
            .await?;
        self.set_setting(Setting::IqFormat, &[self.sample_format.as_u32()])
            .await?;
        self.set_setting(Setting::FftFormat, &[SampleFormat::Uint8.as_u32()])
            .await?;
        self.set_setting(Setting::FftDisplayPixels, &[self.fft_bins])
            .await?;

        let info = self.shared.device_info();
        let table = SampleRateTable::from_device_info(&info);
        tracing::debug!(
            max_sample_rate = info.maximum_sample_rate,
            rates = table.len(),
            "sample rate table built"
        );
        for entry in table.entries() {
            tracing::debug!(rate_hz = entry.rate_hz, stage = entry.stage, "supported sample rate");
        }
        *self
            .shared
            .sample_rates
            .lock()
            .expect("sample rate lock poisoned") = table;
        Ok(())
    }

    /// Encode and send one `SET_SETTING` frame.
    async fn set_setting(&self, setting: Setting, params: &[u32]) -> Result<()> {
        if self.session_state().is_terminal() {
            return Err(Error::NotConnected);
        }
        tracing::trace!(?setting, ?params, "sending setting");
        send_frame(
            &self.writer,
            &codec::encode_set_setting(setting, params),
            self.command_grace,
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Control surface
    // -----------------------------------------------------------------------

    /// Tune both channels to `hz` and return the committed frequency.
    ///
    /// The server only retunes reliably while FFT+IQ mode is selected, so
    /// the mode is switched for the retune and restored afterwards.
    pub async fn set_center_freq(&self, hz: u64) -> Result<u32> {
        let hz = u32::try_from(hz).map_err(|_| {
            Error::InvalidParameter(format!(
                "center frequency {hz} Hz is beyond the protocol's 32-bit range"
            ))
        })?;

        self.set_setting(Setting::StreamingMode, &[STREAM_MODE_FFT_IQ])
            .await?;
        self.set_setting(Setting::IqFrequency, &[hz]).await?;
        self.set_setting(Setting::FftFrequency, &[hz]).await?;
        self.set_setting(Setting::StreamingMode, &[self.shared.streaming_mode])
            .await?;

        {
            let mut tuner = self.shared.tuner.lock().expect("tuner lock poisoned");
            tuner.iq_center_frequency = hz;
            tuner.fft_center_frequency = hz;
        }
        tracing::debug!(hz, "center frequency set");
        Ok(hz)
    }

    /// Set the LNA gain index and return the committed value.
    ///
    /// When the server denies control, the request is not sent and the
    /// current gain is returned unchanged.
    pub async fn set_gain(&self, gain: u32) -> Result<u32> {
        if !self.shared.can_control.load(Ordering::SeqCst) {
            tracing::warn!("the server does not allow gain changes");
            return Ok(self.shared.tuner().gain);
        }
        self.set_setting(Setting::Gain, &[gain]).await?;
        self.shared
            .tuner
            .lock()
            .expect("tuner lock poisoned")
            .gain = gain;
        Ok(gain)
    }

    /// Set the digital (post-ADC) gain, `0.0..=1.0`, scaled onto the wire as
    /// 32-bit fixed point.
    pub async fn set_digital_gain(&self, gain: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&gain) {
            return Err(Error::InvalidParameter(format!(
                "digital gain {gain} is outside 0.0..=1.0"
            )));
        }
        let fixed = (gain * f64::from(u32::MAX)) as u32;
        self.set_setting(Setting::IqDigitalGain, &[fixed]).await?;
        *self
            .digital_gain
            .lock()
            .expect("digital gain lock poisoned") = gain;
        Ok(())
    }

    /// Select the sample rate by value; it must be one of the table entries
    /// reported by [`sample_rates`](Self::sample_rates).
    pub async fn set_sample_rate(&self, rate_hz: u32) -> Result<u32> {
        let table = self.shared.sample_rates();
        let Some(stage) = table.stage_for_rate(rate_hz) else {
            let supported: Vec<u32> = table.entries().iter().map(|e| e.rate_hz).collect();
            return Err(Error::Unsupported(format!(
                "sample rate {rate_hz} Hz is not supported (supported: {supported:?})"
            )));
        };
        self.set_decimation_stage(stage).await?;
        Ok(rate_hz)
    }

    /// Select the sample rate by decimation stage.
    pub async fn set_decimation_stage(&self, stage: u32) -> Result<()> {
        let table = self.shared.sample_rates();
        let Some(rate) = table.rate_for_stage(stage) else {
            return Err(Error::Unsupported(format!(
                "decimation stage {stage} is not supported by this device"
            )));
        };

        // Even an FFT-only session pushes the IQ decimation: the server does
        // not decimate the two channels independently, so FFT at this rate
        // costs IQ at this rate too.
        self.set_setting(Setting::IqDecimation, &[stage]).await?;
        self.set_setting(Setting::FftDecimation, &[stage]).await?;
        self.set_setting(Setting::FftDisplayPixels, &[self.fft_bins])
            .await?;

        self.shared.iq_sample_rate.store(rate, Ordering::SeqCst);
        tracing::debug!(rate_hz = rate, stage, "sample rate configured");
        Ok(())
    }

    /// Enable sample delivery. No-op when already streaming.
    pub async fn start(&self) -> Result<()> {
        if self.shared.streaming.load(Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!("starting streaming");
        self.set_setting(Setting::StreamingEnabled, &[1]).await?;
        self.shared.streaming.store(true, Ordering::SeqCst);
        self.shared.state_tx.send_if_modified(|state| {
            if *state == SessionState::Ready {
                *state = SessionState::Streaming;
                true
            } else {
                false
            }
        });
        Ok(())
    }

    /// Disable sample delivery. No-op when already stopped.
    pub async fn stop(&self) -> Result<()> {
        if !self.shared.streaming.load(Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!("stopping streaming");
        self.set_setting(Setting::StreamingEnabled, &[0]).await?;
        self.shared.streaming.store(false, Ordering::SeqCst);
        self.shared.state_tx.send_if_modified(|state| {
            if *state == SessionState::Streaming {
                *state = SessionState::Ready;
                true
            } else {
                false
            }
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Stream consumption
    // -----------------------------------------------------------------------

    /// Pull 8-bit IQ samples, filling `out` completely.
    ///
    /// `out` holds interleaved I/Q components, so `out.len() / 2` samples
    /// are delivered; that count is returned. Returns 0 without waiting when
    /// streaming is stopped, and [`Error::StreamClosed`] once the session
    /// has terminated and the ring is drained.
    pub async fn read_iq_u8(&self, out: &mut [u8]) -> Result<usize> {
        let ring = self.iq_ring(SampleFormat::Uint8)?;
        if !self.is_streaming() {
            if self.session_state().is_terminal() {
                return Err(Error::StreamClosed);
            }
            return Ok(0);
        }
        let batch = out.len() / 2;
        ring.read_exact(&mut out[..batch * 2]).await?;
        Ok(batch)
    }

    /// Pull 16-bit IQ samples, filling `out` completely.
    ///
    /// Semantics match [`read_iq_u8`](Self::read_iq_u8); components are
    /// decoded from the wire's little-endian order.
    pub async fn read_iq_i16(&self, out: &mut [i16]) -> Result<usize> {
        let ring = self.iq_ring(SampleFormat::Int16)?;
        if !self.is_streaming() {
            if self.session_state().is_terminal() {
                return Err(Error::StreamClosed);
            }
            return Ok(0);
        }
        let batch = out.len() / 2;
        let mut raw = vec![0u8; batch * 2 * 2];
        ring.read_exact(&mut raw).await?;
        for (value, bytes) in out[..batch * 2].iter_mut().zip(raw.chunks_exact(2)) {
            *value = i16::from_le_bytes([bytes[0], bytes[1]]);
        }
        Ok(batch)
    }

    /// Drain the FFT window accumulated since the last call: per-bin sums
    /// plus the number of integration periods they cover. Waits for the
    /// first frame when the window is empty.
    pub async fn read_fft(&self) -> Result<FftFrame> {
        let fft = self.fft.as_ref().ok_or_else(|| {
            Error::Unsupported("this session was opened without the FFT stream".into())
        })?;
        fft.drain().await
    }

    fn iq_ring(&self, format: SampleFormat) -> Result<&Arc<SampleRing>> {
        let ring = self.ring.as_ref().ok_or_else(|| {
            Error::Unsupported("this session was opened without the IQ stream".into())
        })?;
        if self.sample_format != format {
            return Err(Error::Unsupported(format!(
                "this session streams {:?} samples, not {:?}",
                self.sample_format, format
            )));
        }
        Ok(ring)
    }

    // -----------------------------------------------------------------------
    // Observers
    // -----------------------------------------------------------------------

    /// Current lifecycle state.
    pub fn session_state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// A watch receiver observing lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Whether the session is usable (not terminated).
    pub fn is_connected(&self) -> bool {
        !self.session_state().is_terminal()
    }

    /// Whether sample delivery is enabled.
    pub fn is_streaming(&self) -> bool {
        self.shared.streaming.load(Ordering::SeqCst)
    }

    /// Subscribe to diagnostic events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.event_tx.subscribe()
    }

    /// Device capabilities from the handshake.
    pub fn device_info(&self) -> DeviceInfo {
        self.shared.device_info()
    }

    /// `(maximum_sample_rate, decimation_stage_count)` from the device.
    pub fn sampling_info(&self) -> (u32, u32) {
        let info = self.shared.device_info();
        (info.maximum_sample_rate, info.decimation_stage_count)
    }

    /// The device's maximum usable bandwidth in Hz.
    pub fn bandwidth(&self) -> u32 {
        self.shared.device_info().maximum_bandwidth
    }

    /// The rates this device supports, ascending.
    pub fn sample_rates(&self) -> SampleRateTable {
        self.shared.sample_rates()
    }

    /// The currently configured IQ sample rate (0 before any selection).
    pub fn sample_rate(&self) -> u32 {
        self.shared.iq_sample_rate.load(Ordering::SeqCst)
    }

    /// The committed center frequency in Hz.
    pub fn center_freq(&self) -> u32 {
        self.shared.tuner().iq_center_frequency
    }

    /// The current LNA gain index.
    pub fn gain(&self) -> u32 {
        self.shared.tuner().gain
    }

    /// The last digital gain set on this session.
    pub fn digital_gain(&self) -> f64 {
        *self
            .digital_gain
            .lock()
            .expect("digital gain lock poisoned")
    }

    /// Tunable center-frequency bounds for the session's stream mode.
    pub fn tunable_range(&self) -> (u32, u32) {
        let tuner = self.shared.tuner();
        (
            tuner.minimum_tunable_frequency,
            tuner.maximum_tunable_frequency,
        )
    }

    /// Whether the server lets this client change device settings.
    pub fn can_control(&self) -> bool {
        self.shared.can_control.load(Ordering::SeqCst)
    }

    /// Names of the adjustable gain stages.
    pub fn gain_names(&self) -> Vec<&'static str> {
        if self.can_control() {
            vec!["LNA", "Digital"]
        } else {
            vec!["Digital"]
        }
    }

    /// IQ frames lost upstream, from sequence-number gaps.
    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped_frames.load(Ordering::SeqCst)
    }

    /// IQ bytes lost locally to ring overflow.
    pub fn overflow_bytes(&self) -> u64 {
        self.shared.overflow_bytes.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Tear the session down: stop the receiver task, close the socket, and
    /// wake every consumer parked on the IQ or FFT buffers. Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        tracing::debug!("disconnecting SpyServer session");
        self.teardown().await;
        Ok(())
    }

    async fn teardown(&self) {
        self.cancel.cancel();
        {
            let mut writer = self.writer.lock().await;
            if let Some(mut w) = writer.take() {
                let _ = w.shutdown().await;
            }
        }
        let task = self.read_task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "receiver task ended abnormally");
                }
            }
        }
    }
}

impl Drop for SpyServerClient {
    fn drop(&mut self) {
        // The receiver task holds no reference back to the client; cancel it
        // here so an un-disconnected session still winds down. Its cleanup
        // closes both buffers and publishes the terminal state.
        self.cancel.cancel();
    }
}

fn validate_options(options: &ClientOptions) -> Result<()> {
    if !options.iq && !options.fft {
        return Err(Error::InvalidParameter(
            "a session needs at least one of the IQ and FFT streams".into(),
        ));
    }
    match options.sample_format {
        SampleFormat::Uint8 | SampleFormat::Int16 => {}
        other => {
            return Err(Error::InvalidParameter(format!(
                "IQ sample format {other:?} is not supported"
            )));
        }
    }
    if options.fft && options.fft_bins == 0 {
        return Err(Error::InvalidParameter(
            "an FFT session needs a non-zero bin count".into(),
        ));
    }
    if options.iq && options.ring_capacity == 0 {
        return Err(Error::InvalidParameter(
            "an IQ session needs a non-zero ring capacity".into(),
        ));
    }
    Ok(())
}

/// Write one command frame and let the server settle.
async fn send_frame(
    writer: &Arc<Mutex<Option<WriteHalf<TcpStream>>>>,
    frame: &[u8],
    grace: Duration,
) -> Result<()> {
    {
        let mut guard = writer.lock().await;
        let w = guard.as_mut().ok_or(Error::NotConnected)?;
        w.write_all(frame)
            .await
            .map_err(|e| Error::Transport(format!("failed to send command: {e}")))?;
        w.flush()
            .await
            .map_err(|e| Error::Transport(format!("failed to flush command: {e}")))?;
    }
    tokio::time::sleep(grace).await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Receiver task
// ---------------------------------------------------------------------------

/// Message router for the receiver task.
struct Dispatcher {
    shared: Arc<SharedState>,
    ring: Option<Arc<SampleRing>>,
    fft: Option<Arc<FftAccumulator>>,
    event_tx: broadcast::Sender<ClientEvent>,
    sequence: SequenceTracker,
}

impl Dispatcher {
    fn dispatch(&mut self, header: &MessageHeader, body: &[u8]) -> Result<()> {
        let message = MessageType::from_wire(header.message_type);

        if message.is_iq() {
            let gap = self.sequence.observe(header.sequence_number);
            if gap > 0 {
                self.shared
                    .dropped_frames
                    .fetch_add(u64::from(gap), Ordering::SeqCst);
                tracing::warn!(lost = gap, "lost IQ frames from the server");
                let _ = self.event_tx.send(ClientEvent::FramesDropped { count: gap });
            }
        }

        match message {
            MessageType::DeviceInfo => self.on_device_info(body)?,
            MessageType::ClientSync => self.on_client_sync(body)?,
            MessageType::Uint8Iq | MessageType::Int16Iq => self.on_iq_body(body),
            MessageType::Int24Iq | MessageType::FloatIq => {
                tracing::trace!(
                    message_type = header.message_type,
                    len = body.len(),
                    "discarding IQ frame in an unconsumed format"
                );
            }
            MessageType::Uint8Fft => {
                if let Some(fft) = &self.fft {
                    fft.accumulate(body);
                }
            }
            MessageType::Pong | MessageType::ReadSetting => {
                tracing::trace!(
                    message_type = header.message_type,
                    "ignoring unsolicited reply"
                );
            }
            MessageType::Unknown(value) => {
                tracing::warn!(message_type = value, "bad message type");
            }
        }
        Ok(())
    }

    fn on_iq_body(&self, body: &[u8]) {
        let Some(ring) = &self.ring else {
            return;
        };
        let dropped = ring.write(body);
        if dropped > 0 {
            self.shared
                .overflow_bytes
                .fetch_add(dropped, Ordering::SeqCst);
            tracing::warn!(bytes = dropped, "IQ ring overflow, oldest samples discarded");
            let _ = self.event_tx.send(ClientEvent::RingOverflow {
                bytes_dropped: dropped,
            });
        }
    }

    fn on_device_info(&self, body: &[u8]) -> Result<()> {
        let info = DeviceInfo::decode(body)?;
        tracing::debug!(
            device_type = ?info.device_type,
            serial = info.device_serial,
            max_sample_rate = info.maximum_sample_rate,
            max_bandwidth = info.maximum_bandwidth,
            decimation_stages = info.decimation_stage_count,
            gain_stages = info.gain_stage_count,
            min_iq_decimation = info.minimum_iq_decimation,
            "device info received"
        );

        {
            let mut tuner = self.shared.tuner.lock().expect("tuner lock poisoned");
            tuner.minimum_tunable_frequency = info.minimum_frequency;
            tuner.maximum_tunable_frequency = info.maximum_frequency;
        }
        let next = if info.device_type == DeviceType::Invalid {
            SessionState::NoDevice
        } else {
            SessionState::AwaitingSync
        };
        *self
            .shared
            .device_info
            .lock()
            .expect("device info lock poisoned") = info;

        self.shared.state_tx.send_if_modified(|state| {
            if *state == SessionState::AwaitingDeviceInfo {
                *state = next;
                true
            } else {
                false
            }
        });
        Ok(())
    }

    fn on_client_sync(&self, body: &[u8]) -> Result<()> {
        let sync = ClientSync::decode(body)?;
        tracing::debug!(
            can_control = sync.can_control,
            gain = sync.gain,
            device_center = sync.device_center_frequency,
            iq_center = sync.iq_center_frequency,
            fft_center = sync.fft_center_frequency,
            "client sync received"
        );

        self.shared
            .can_control
            .store(sync.can_control != 0, Ordering::SeqCst);
        {
            let mut tuner = self.shared.tuner.lock().expect("tuner lock poisoned");
            tuner.can_control = sync.can_control != 0;
            tuner.gain = sync.gain;
            tuner.device_center_frequency = sync.device_center_frequency;
            tuner.iq_center_frequency = sync.iq_center_frequency;
            tuner.fft_center_frequency = sync.fft_center_frequency;
            // Tunable bounds follow the stream mode: any FFT mode is limited
            // by the FFT channel, IQ-only by the IQ channel.
            if self.shared.streaming_mode & STREAM_TYPE_FFT != 0 {
                tuner.minimum_tunable_frequency = sync.minimum_fft_center_frequency;
                tuner.maximum_tunable_frequency = sync.maximum_fft_center_frequency;
            } else {
                tuner.minimum_tunable_frequency = sync.minimum_iq_center_frequency;
                tuner.maximum_tunable_frequency = sync.maximum_iq_center_frequency;
            }
        }

        self.shared.state_tx.send_if_modified(|state| {
            if *state == SessionState::AwaitingSync {
                *state = SessionState::Ready;
                true
            } else {
                false
            }
        });
        Ok(())
    }

    /// Receiver cleanup: close both buffers so parked consumers observe the
    /// termination, then publish the terminal state.
    fn finish(&self) {
        if let Some(ring) = &self.ring {
            ring.close();
        }
        if let Some(fft) = &self.fft {
            fft.close();
        }
        self.shared.streaming.store(false, Ordering::SeqCst);
        self.shared.state_tx.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = SessionState::Terminated;
                true
            }
        });
        let _ = self.event_tx.send(ClientEvent::Disconnected);
        tracing::debug!("receiver task finished");
    }
}

/// Socket-read loop owned by the receiver task.
async fn read_loop(
    mut reader: ReadHalf<TcpStream>,
    mut dispatcher: Dispatcher,
    cancel: CancellationToken,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("receiver task cancelled");
                break;
            }
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    tracing::debug!("connection closed by the server");
                    break;
                }
                Ok(n) => {
                    let result =
                        decoder.feed(&buf[..n], |header, body| dispatcher.dispatch(header, body));
                    if let Err(e) = result {
                        tracing::error!(error = %e, "fatal error in the receive path");
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "socket read error");
                    break;
                }
            }
        }
    }

    dispatcher.finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = ClientOptions::default();
        assert!(options.iq);
        assert!(!options.fft);
        assert_eq!(options.sample_format, SampleFormat::Int16);
        assert_eq!(options.ring_capacity, 10 * 1024 * 1024);
        assert_eq!(options.handshake_timeout, Duration::from_secs(1));
        assert_eq!(options.command_grace, Duration::from_millis(100));
        assert_eq!(options.client_name, "spyglass");
    }

    #[test]
    fn fft_only_options_still_default_bins_elsewhere() {
        let options = ClientOptions::fft_only(4096);
        assert!(!options.iq);
        assert!(options.fft);
        assert_eq!(options.fft_bins, 4096);
    }

    #[test]
    fn options_need_at_least_one_stream() {
        let options = ClientOptions {
            iq: false,
            fft: false,
            ..ClientOptions::default()
        };
        assert!(matches!(
            validate_options(&options),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn options_reject_undecodable_iq_formats() {
        for format in [SampleFormat::Float, SampleFormat::Int24] {
            let options = ClientOptions {
                sample_format: format,
                ..ClientOptions::default()
            };
            assert!(matches!(
                validate_options(&options),
                Err(Error::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn options_reject_zero_sized_buffers() {
        let options = ClientOptions {
            ring_capacity: 0,
            ..ClientOptions::default()
        };
        assert!(validate_options(&options).is_err());

        let options = ClientOptions::fft_only(0);
        assert!(validate_options(&options).is_err());
    }
}
