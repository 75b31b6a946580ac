//! Capture raw IQ samples from a SpyServer to a file.
//!
//! Connects to a SpyServer, tunes it, and writes a fixed number of 16-bit
//! IQ samples to `capture.iq` as raw interleaved little-endian I/Q pairs.
//!
//! # Usage
//!
//! ```sh
//! cargo run -p spyglass --example iq_capture -- [host] [port]
//! ```

use std::io::Write;

use spyglass::protocol::DEFAULT_PORT;
use spyglass::{ClientOptions, SampleFormat, SpyServerClient};

const CENTER_FREQ: u64 = 403_000_000; // 403 MHz
const SAMPLE_RATE: u32 = 2_500_000; // 2.5 Msps
const TOTAL_SAMPLES: usize = 1_000_000;
const BATCH: usize = 32_768;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spyglass=debug".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = args
        .next()
        .map(|p| p.parse())
        .transpose()?
        .unwrap_or(DEFAULT_PORT);

    println!("Connecting to SpyServer at {host}:{port}...");
    let client = SpyServerClient::connect_with_options(
        &host,
        port,
        ClientOptions::iq_only(SampleFormat::Int16),
    )
    .await?;

    let (max_rate, stages) = client.sampling_info();
    println!("Device: {:?}", client.device_info().device_type);
    println!("  max sample rate: {max_rate} Hz ({stages} decimation stages)");
    println!("  bandwidth:       {} Hz", client.bandwidth());

    client.set_center_freq(CENTER_FREQ).await?;
    client.set_sample_rate(SAMPLE_RATE).await?;
    client.start().await?;

    let mut file = std::fs::File::create("capture.iq")?;
    let mut batch = vec![0i16; BATCH * 2];
    let mut captured = 0usize;
    let started = std::time::Instant::now();

    while captured < TOTAL_SAMPLES {
        let delivered = client.read_iq_i16(&mut batch).await?;
        let mut bytes = Vec::with_capacity(delivered * 4);
        for value in &batch[..delivered * 2] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        file.write_all(&bytes)?;
        captured += delivered;
    }

    let elapsed = started.elapsed().as_secs_f64();
    println!(
        "Captured {captured} samples in {elapsed:.2} s ({:.0} samp/s), {} frames dropped",
        captured as f64 / elapsed,
        client.dropped_frames()
    );

    client.stop().await?;
    client.disconnect().await?;
    Ok(())
}
