//! Headless wavetrap console.
//!
//! Clears the capture directory (the process's only persisted state), polls
//! device presence every 2 s, brings the pipelines up once both radios are
//! present, and prints pipeline events as they arrive.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;

use wavetrap_core::config::{RxConfig, TxConfig};
use wavetrap_sdr::capture_sink::CaptureSink;
use wavetrap_sdr::control::{ControlPlane, PipelineEvent};
use wavetrap_sdr::monitor::DeviceMonitor;
use wavetrap_sdr::soapy;

/// Device presence polling cadence.
const PRESENCE_POLL: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// RX center frequency in MHz
    #[clap(long, default_value_t = 433.81)]
    rx_freq: f64,
    /// TX center frequency in MHz
    #[clap(long, default_value_t = 433.95)]
    tx_freq: f64,
    /// Sample rate in Hz for both pipelines
    #[clap(long, default_value_t = 2_600_000.0)]
    rate: f64,
    /// Trigger threshold in dBFS
    #[clap(long, default_value_t = -30.0, allow_negative_numbers = true)]
    threshold: f64,
    /// Capture directory (cleared at startup)
    #[clap(long, default_value = "captures")]
    captures: PathBuf,
    /// Arm a triggered capture immediately with these pre/post seconds
    #[clap(long, num_args = 2, value_names = ["PRE", "POST"])]
    arm: Option<Vec<f64>>,
    /// Also start the noise transmitter when both radios are present
    #[clap(long)]
    tx: bool,
    #[clap(flatten)]
    verbose: clap_verbosity_flag::Verbosity,
}

fn main() -> ExitCode {
    let args = Args::parse();
    wavetrap_cli::init_logging(args.verbose.log_level_filter());

    // The capture directory is authoritative process state; start clean.
    if let Err(e) = CaptureSink::reset_dir(&args.captures) {
        tracing::error!(error = %e, dir = %args.captures.display(), "cannot reset capture dir");
        return ExitCode::FAILURE;
    }

    let rx_cfg = RxConfig {
        center_hz: args.rx_freq * 1e6,
        sample_rate_hz: args.rate,
        threshold_db: args.threshold,
        ..Default::default()
    };
    let tx_cfg = TxConfig {
        center_hz: args.tx_freq * 1e6,
        sample_rate_hz: args.rate,
        ..Default::default()
    };
    let mut plane = match ControlPlane::new(rx_cfg, tx_cfg) {
        Ok(plane) => plane.with_capture_dir(&args.captures),
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let mut monitor = DeviceMonitor::new(soapy::enumerate_devices);
    let mut next_poll = Instant::now();
    tracing::info!("console up; waiting for radios");

    loop {
        if Instant::now() >= next_poll {
            next_poll = Instant::now() + PRESENCE_POLL;
            if let Some(presence) = monitor.poll() {
                plane.publish(PipelineEvent::PresenceChanged {
                    rtlsdr: presence.rtlsdr,
                    hackrf: presence.hackrf,
                });
            }
            if monitor.both_ready() && !plane.is_rx_running() {
                tracing::info!("both radios present; starting pipelines");
                if let Err(e) = plane.start_rx(soapy::rtlsdr_opener()) {
                    tracing::error!(error = %e, "rx pipeline failed to start");
                }
                if args.tx {
                    if let Err(e) = plane.start_tx(soapy::hackrf_opener()) {
                        tracing::error!(error = %e, "tx pipeline failed to start");
                    }
                }
                if let Some(windows) = &args.arm {
                    if let Err(e) = plane.arm(windows[0], windows[1]) {
                        tracing::error!(error = %e, "arm rejected");
                    }
                }
            }
        }

        while let Some(event) = plane.poll_event() {
            match event {
                PipelineEvent::CaptureStarted => tracing::info!("capture started"),
                PipelineEvent::CaptureComplete(path) => {
                    tracing::info!(path = %path.display(), "capture complete");
                }
                PipelineEvent::CaptureFailed(reason) => {
                    tracing::warn!(reason = %reason, "capture failed");
                }
                PipelineEvent::PresenceChanged { rtlsdr, hackrf } => {
                    tracing::info!(rtlsdr, hackrf, "device presence");
                }
            }
        }

        if let Some(status) = plane.latest_status() {
            tracing::debug!(
                armed = status.armed,
                capturing = status.capturing,
                center_db = status.center_db,
                above = status.above,
                "trigger status"
            );
        }

        std::thread::sleep(Duration::from_millis(100));
    }
}
