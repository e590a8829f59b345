//! RTL-SDR recorder: C16 IQ plus TXT metadata.
//!
//! Captures a fixed duration of baseband into the interleaved LE i16
//! format used by the replay tool, and writes the `key=value` sidecar the
//! replay tool parses. Exit codes are categorized: 2 device open, 3 stream
//! setup/fault, 4 output open.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use wavetrap_core::recording::{write_c16, RecorderMeta};
use wavetrap_core::types::IQSample;
use wavetrap_sdr::device::SdrError;
use wavetrap_sdr::soapy;

const EXIT_DEVICE_OPEN: u8 = 2;
const EXIT_STREAM: u8 = 3;
const EXIT_OUTPUT: u8 = 4;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Record RTL-SDR baseband to C16 + TXT metadata", long_about = None)]
struct Args {
    /// Center frequency in Hz
    #[clap(long, default_value_t = 433.81e6)]
    freq: f64,
    /// Sample rate in Hz
    #[clap(long, default_value_t = 1.0e6)]
    rate: f64,
    /// Recording duration in seconds
    #[clap(long, default_value_t = 3.0)]
    sec: f64,
    /// Metadata output path
    #[clap(long, default_value = "BBD_0001.TXT")]
    cfg: PathBuf,
    /// IQ output path
    #[clap(long, default_value = "BBD_0001.C16")]
    c16: PathBuf,
    /// Manual tuner gain in dB (default 30 when AGC is off)
    #[clap(long)]
    gain: Option<f64>,
    /// Use hardware AGC instead of manual gain
    #[clap(long)]
    agc: bool,
    /// Analog bandwidth in Hz (0 = automatic)
    #[clap(long)]
    bw: Option<f64>,
    /// Local-oscillator offset in Hz (0 = direct tune)
    #[clap(long)]
    offset: Option<f64>,
    /// Frequency correction in ppm
    #[clap(long)]
    ppm: Option<f64>,
    /// Disable hardware DC offset removal
    #[clap(long)]
    no_dcblock: bool,
    /// Extra SoapySDR device kwargs, `k=v[,k=v]`
    #[clap(long)]
    device: Option<String>,
    #[clap(flatten)]
    verbose: clap_verbosity_flag::Verbosity,
}

fn main() -> ExitCode {
    let args = Args::parse();
    wavetrap_cli::init_logging(args.verbose.log_level_filter());

    let mut opener = match &args.device {
        Some(kwargs) => soapy::rx_opener_with_args(kwargs.clone()),
        None => soapy::rtlsdr_opener(),
    };
    let mut dev = match opener() {
        Ok(dev) => dev,
        Err(e) => {
            tracing::error!(error = %e, "failed to open receiver");
            return ExitCode::from(EXIT_DEVICE_OPEN);
        }
    };

    // LO offset must be in place before tuning.
    if let Some(offset) = args.offset {
        if let Err(e) = dev.set_lo_offset_hz(offset) {
            tracing::warn!(error = %e, "lo offset not applied");
        }
    }
    if let Err(e) = dev.tune(args.freq, args.rate) {
        tracing::error!(error = %e, "tuning failed");
        return ExitCode::from(EXIT_STREAM);
    }
    if let Some(ppm) = args.ppm {
        if let Err(e) = dev.set_freq_correction_ppm(ppm) {
            tracing::warn!(error = %e, "ppm correction not applied");
        }
    }
    if let Some(bw) = args.bw {
        if bw > 0.0 {
            if let Err(e) = dev.set_bandwidth(bw) {
                tracing::warn!(error = %e, "bandwidth not applied");
            }
        }
    }
    if args.agc {
        if let Err(e) = dev.set_agc(true) {
            tracing::warn!(error = %e, "agc not available");
        }
    } else {
        let _ = dev.set_agc(false);
        if let Err(e) = dev.set_gain_db(args.gain.unwrap_or(30.0)) {
            tracing::warn!(error = %e, "gain not applied");
        }
    }
    if let Err(e) = dev.set_dc_offset_mode(!args.no_dcblock) {
        tracing::debug!(error = %e, "dc offset mode not available");
    }

    let out = match File::create(&args.c16) {
        Ok(file) => file,
        Err(e) => {
            tracing::error!(error = %e, path = %args.c16.display(), "cannot open IQ output");
            return ExitCode::from(EXIT_OUTPUT);
        }
    };
    let mut writer = BufWriter::new(out);

    let total = (args.rate * args.sec) as usize;
    let mut remaining = total;
    let mut buf = vec![IQSample::new(0.0, 0.0); 8192];
    tracing::info!(
        freq = args.freq,
        rate = args.rate,
        seconds = args.sec,
        samples = total,
        "recording"
    );
    while remaining > 0 {
        let want = remaining.min(buf.len());
        match dev.read(&mut buf[..want], Duration::from_millis(100)) {
            Ok(got) if got > 0 => {
                if let Err(e) = write_c16(&mut writer, &buf[..got]) {
                    tracing::error!(error = %e, "IQ write failed");
                    return ExitCode::from(EXIT_OUTPUT);
                }
                remaining -= got;
            }
            Ok(_) => {}
            Err(SdrError::Timeout(_)) => {}
            Err(e) => {
                tracing::error!(error = %e, "stream fault");
                return ExitCode::from(EXIT_STREAM);
            }
        }
    }
    if let Err(e) = std::io::Write::flush(&mut writer) {
        tracing::error!(error = %e, "IQ flush failed");
        return ExitCode::from(EXIT_OUTPUT);
    }

    let meta = RecorderMeta {
        center_frequency_hz: args.freq as u64,
        sample_rate_hz: args.rate as u32,
    };
    if let Err(e) = meta.save(&args.cfg) {
        tracing::error!(error = %e, path = %args.cfg.display(), "metadata write failed");
        return ExitCode::from(EXIT_OUTPUT);
    }

    tracing::info!(
        c16 = %args.c16.display(),
        cfg = %args.cfg.display(),
        "recording complete"
    );
    ExitCode::SUCCESS
}
