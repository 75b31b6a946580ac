//! Scripted mock SpyServer.
//!
//! The mock accepts a single client connection, decodes command frames from
//! it, and records them for assertions. When the client's HELLO arrives it
//! replies with the configured device-info and client-sync frames -- or
//! withholds either, for handshake-failure tests. Data frames queued with
//! [`MockSpyServer::send_frame`] are pushed to the client from the same
//! task, so command reads and frame writes never interleave mid-frame.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use spyglass::codec::{decode_command, ClientSync, Command, CommandDecode, DeviceInfo};
use spyglass::protocol::{CommandType, DeviceType};

use crate::frames;

/// A device-info payload for a plausible Airspy-like device.
///
/// `decimation_stage_count = 3` with a 10 MHz maximum rate gives the
/// four-entry sample-rate table 10 M / 5 M / 2.5 M / 1.25 M.
pub fn default_device_info() -> DeviceInfo {
    DeviceInfo {
        device_type: DeviceType::AirspyOne,
        device_serial: 0x5EED_CAFE,
        maximum_sample_rate: 10_000_000,
        maximum_bandwidth: 8_000_000,
        decimation_stage_count: 3,
        gain_stage_count: 22,
        maximum_gain_index: 21,
        minimum_frequency: 24_000_000,
        maximum_frequency: 1_750_000_000,
        resolution: 12,
        minimum_iq_decimation: 0,
        forced_iq_format: 0,
    }
}

/// A client-sync payload matching [`default_device_info`], with control
/// allowed.
pub fn default_client_sync() -> ClientSync {
    ClientSync {
        can_control: 1,
        gain: 10,
        device_center_frequency: 403_000_000,
        iq_center_frequency: 403_000_000,
        fft_center_frequency: 403_000_000,
        minimum_iq_center_frequency: 24_000_000,
        maximum_iq_center_frequency: 1_750_000_000,
        minimum_fft_center_frequency: 24_000_000,
        maximum_fft_center_frequency: 1_750_000_000,
    }
}

/// What the mock sends back when the client's HELLO arrives.
#[derive(Debug, Clone)]
pub struct ServerBehavior {
    /// Device-info frame to send; `None` withholds it (the client's
    /// handshake must then time out).
    pub device_info: Option<DeviceInfo>,
    /// Client-sync frame to send; `None` withholds it.
    pub client_sync: Option<ClientSync>,
}

impl Default for ServerBehavior {
    fn default() -> Self {
        ServerBehavior {
            device_info: Some(default_device_info()),
            client_sync: Some(default_client_sync()),
        }
    }
}

/// A scripted SpyServer on a random localhost port.
pub struct MockSpyServer {
    host: String,
    port: u16,
    commands: Arc<Mutex<Vec<Command>>>,
    frame_tx: mpsc::UnboundedSender<Vec<u8>>,
    task: JoinHandle<()>,
}

impl MockSpyServer {
    /// Spawn a mock with the default handshake behavior.
    pub async fn spawn() -> Self {
        Self::spawn_with(ServerBehavior::default()).await
    }

    /// Spawn a mock with custom handshake behavior.
    ///
    /// # Panics
    ///
    /// Panics when the listener cannot be bound; this is test
    /// infrastructure, not production code.
    pub async fn spawn_with(behavior: ServerBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock SpyServer");
        let addr = listener.local_addr().expect("mock has no local addr");

        let commands = Arc::new(Mutex::new(Vec::new()));
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(serve(listener, behavior, Arc::clone(&commands), frame_rx));

        MockSpyServer {
            host: addr.ip().to_string(),
            port: addr.port(),
            commands,
            frame_tx,
            task,
        }
    }

    /// Host address to connect the client to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port to connect the client to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Queue one wire frame for delivery to the client.
    pub fn send_frame(&self, frame: Vec<u8>) {
        let _ = self.frame_tx.send(frame);
    }

    /// Queue an IQ data frame.
    pub fn send_iq(&self, format: spyglass::SampleFormat, sequence: u32, body: &[u8]) {
        self.send_frame(frames::iq_frame(format, sequence, body));
    }

    /// Queue an FFT data frame.
    pub fn send_fft(&self, sequence: u32, body: &[u8]) {
        self.send_frame(frames::fft_frame(sequence, body));
    }

    /// Snapshot of every command received so far (HELLO included).
    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().expect("command log poisoned").clone()
    }

    /// Snapshot of the `SET_SETTING` commands received so far, as
    /// `(setting, params)` pairs.
    pub fn settings(&self) -> Vec<(u32, Vec<u32>)> {
        self.commands()
            .iter()
            .filter_map(Command::as_set_setting)
            .collect()
    }

    /// Forget every recorded command; later assertions then see only what
    /// the test itself triggers.
    pub fn clear_commands(&self) {
        self.commands.lock().expect("command log poisoned").clear();
    }

    /// Wait until at least `count` `SET_SETTING` commands have been
    /// recorded, or panic after `deadline`.
    pub async fn await_settings(&self, count: usize, deadline: Duration) -> Vec<(u32, Vec<u32>)> {
        let poll = async {
            loop {
                let settings = self.settings();
                if settings.len() >= count {
                    return settings;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        match tokio::time::timeout(deadline, poll).await {
            Ok(settings) => settings,
            Err(_) => panic!(
                "mock server saw {} SET_SETTING commands, expected {count}",
                self.settings().len()
            ),
        }
    }

    /// Drop the client connection by ending the server task.
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for MockSpyServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Accept one client and serve it until it disconnects.
async fn serve(
    listener: TcpListener,
    behavior: ServerBehavior,
    commands: Arc<Mutex<Vec<Command>>>,
    mut frame_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let (mut stream, peer) = match listener.accept().await {
        Ok(accepted) => accepted,
        Err(e) => {
            tracing::error!(error = %e, "mock SpyServer accept failed");
            return;
        }
    };
    tracing::debug!(peer = %peer, "mock SpyServer accepted a client");

    let mut pending = BytesMut::new();
    let mut buf = [0u8; 8192];

    loop {
        tokio::select! {
            read = stream.read(&mut buf) => match read {
                Ok(0) | Err(_) => {
                    tracing::debug!("mock SpyServer: client went away");
                    return;
                }
                Ok(n) => {
                    pending.extend_from_slice(&buf[..n]);
                    while let CommandDecode::Command { command, consumed } =
                        decode_command(&pending)
                    {
                        let _ = pending.split_to(consumed);
                        let is_hello = command.command_type == CommandType::Hello.as_u32();
                        commands
                            .lock()
                            .expect("command log poisoned")
                            .push(command);

                        if is_hello {
                            if !greet(&mut stream, &behavior).await {
                                return;
                            }
                        }
                    }
                }
            },
            frame = frame_rx.recv() => match frame {
                Some(frame) => {
                    if stream.write_all(&frame).await.is_err() {
                        return;
                    }
                    let _ = stream.flush().await;
                }
                None => return,
            },
        }
    }
}

/// Send the configured handshake frames. Returns false on a write error.
async fn greet(stream: &mut tokio::net::TcpStream, behavior: &ServerBehavior) -> bool {
    if let Some(info) = &behavior.device_info {
        if stream
            .write_all(&frames::device_info_frame(info))
            .await
            .is_err()
        {
            return false;
        }
    }
    if let Some(sync) = &behavior.client_sync {
        if stream
            .write_all(&frames::client_sync_frame(sync))
            .await
            .is_err()
        {
            return false;
        }
    }
    stream.flush().await.is_ok()
}
