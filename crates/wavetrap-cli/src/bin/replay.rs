//! HackRF replay of a C16 recording.
//!
//! Loads the metadata and IQ files the recorder produced, normalizes the
//! peak to 0.95 (capped at 8×), pads 100 ms of zeros on both sides and
//! streams the result once. Exit codes: 1 input parse/open, 2 device open,
//! 3 stream fault.

use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use wavetrap_core::recording::{prepare_replay, read_c16, RecorderMeta};
use wavetrap_sdr::device::SdrError;
use wavetrap_sdr::soapy;

const EXIT_INPUT: u8 = 1;
const EXIT_DEVICE_OPEN: u8 = 2;
const EXIT_STREAM: u8 = 3;

/// Minimum practical HackRF baseband filter bandwidth.
const MIN_TX_BW_HZ: f64 = 1_750_000.0;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Replay a C16 recording through a HackRF", long_about = None)]
struct Args {
    /// Metadata file (`center_frequency=`/`sample_rate=`)
    #[clap(default_value = "BBD_0001.TXT")]
    cfg: PathBuf,
    /// IQ data file (interleaved LE i16)
    #[clap(default_value = "BBD_0001.C16")]
    c16: PathBuf,
    /// TX VGA gain in dB
    #[clap(long, default_value_t = 15.0)]
    gain: f64,
    #[clap(flatten)]
    verbose: clap_verbosity_flag::Verbosity,
}

fn main() -> ExitCode {
    let args = Args::parse();
    wavetrap_cli::init_logging(args.verbose.log_level_filter());

    let meta = match RecorderMeta::load(&args.cfg) {
        Ok(meta) => meta,
        Err(e) => {
            tracing::error!(error = %e, path = %args.cfg.display(), "failed to parse metadata");
            return ExitCode::from(EXIT_INPUT);
        }
    };
    let samples = match File::open(&args.c16).and_then(read_c16) {
        Ok(samples) if !samples.is_empty() => samples,
        Ok(_) => {
            tracing::error!(path = %args.c16.display(), "empty IQ file");
            return ExitCode::from(EXIT_INPUT);
        }
        Err(e) => {
            tracing::error!(error = %e, path = %args.c16.display(), "failed to read IQ file");
            return ExitCode::from(EXIT_INPUT);
        }
    };

    let rate = meta.sample_rate_hz as f64;
    let wave = prepare_replay(&samples, rate);
    tracing::info!(
        center_hz = meta.center_frequency_hz,
        rate,
        samples = wave.len(),
        seconds = wave.len() as f64 / rate,
        "replaying"
    );

    let mut opener = soapy::hackrf_opener();
    let mut dev = match opener() {
        Ok(dev) => dev,
        Err(e) => {
            tracing::error!(error = %e, "failed to open transmitter");
            return ExitCode::from(EXIT_DEVICE_OPEN);
        }
    };
    if let Err(e) = dev.tune(meta.center_frequency_hz as f64, rate) {
        tracing::error!(error = %e, "tx tuning failed");
        return ExitCode::from(EXIT_STREAM);
    }
    if let Err(e) = dev.set_bandwidth(rate.max(MIN_TX_BW_HZ)) {
        tracing::warn!(error = %e, "tx bandwidth not applied");
    }
    if let Err(e) = dev.set_vga_gain(args.gain) {
        tracing::warn!(error = %e, "tx vga not applied");
    }
    if let Err(e) = dev.set_amp_enabled(true) {
        tracing::warn!(error = %e, "tx amp not enabled");
    }

    let mut written = 0usize;
    while written < wave.len() {
        match dev.write(&wave[written..], Duration::from_millis(200)) {
            Ok(n) if n > 0 => written += n,
            Ok(_) => std::thread::sleep(Duration::from_micros(500)),
            Err(SdrError::Timeout(_)) => std::thread::sleep(Duration::from_micros(500)),
            Err(e) => {
                tracing::error!(error = %e, "tx stream fault");
                return ExitCode::from(EXIT_STREAM);
            }
        }
    }

    tracing::info!(samples = written, "replay done");
    ExitCode::SUCCESS
}
