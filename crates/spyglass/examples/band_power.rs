//! Periodic averaged spectrum snapshots from a SpyServer FFT stream.
//!
//! Accumulates FFT windows for a few seconds at a time and prints the
//! integrated mean power per coarse band segment, similar to an
//! `rtl_power`-style survey.
//!
//! # Usage
//!
//! ```sh
//! cargo run -p spyglass --example band_power -- [host] [port]
//! ```

use std::time::{Duration, Instant};

use spyglass::protocol::DEFAULT_PORT;
use spyglass::{ClientOptions, SpyServerClient};

const CENTER_FREQ: u64 = 403_000_000;
const FFT_BINS: u32 = 1024;
const INTEGRATION: Duration = Duration::from_secs(5);
const SEGMENTS: usize = 16;

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

    let client =
        SpyServerClient::connect_with_options(&host, port, ClientOptions::fft_only(FFT_BINS))
            .await?;

    client.set_center_freq(CENTER_FREQ).await?;
    client.start().await?;

    let mut sums = vec![0u64; FFT_BINS as usize];
    let mut periods = 0u64;
    let mut window_start = Instant::now();

    loop {
        let frame = client.read_fft().await?;
        for (total, bin) in sums.iter_mut().zip(&frame.sums) {
            *total += u64::from(*bin);
        }
        periods += u64::from(frame.periods);

        if window_start.elapsed() >= INTEGRATION && periods > 0 {
            // Collapse the bins into a handful of segments for the terminal.
            let per_segment = sums.len() / SEGMENTS;
            print!("{periods:>5} periods |");
            for segment in sums.chunks(per_segment).take(SEGMENTS) {
                let mean =
                    segment.iter().sum::<u64>() as f64 / (segment.len() as u64 * periods) as f64;
                let bar_len = (mean / 16.0).min(8.0) as usize;
                print!(" {:<8}", "#".repeat(bar_len.max(1)));
            }
            println!();

            sums.iter_mut().for_each(|s| *s = 0);
            periods = 0;
            window_start = Instant::now();
        }
    }
}
