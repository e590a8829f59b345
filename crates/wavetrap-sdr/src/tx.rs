//! Transmit pipeline
//!
//! Worker thread that streams the cyclic noise waveform to the transmitter.
//! The waveform itself is rebuilt only when the (rate, half-span)
//! fingerprint drifts; level changes are a per-frame multiply, so moving
//! the dBFS slider never interrupts the stream. The analog baseband filter
//! tracks `max(2000, 2·half_span)` with 1 Hz hysteresis.
//!
//! Writes block for at most 200 ms; transient errors yield briefly and
//! retry the same samples — nothing is dropped except on an explicit stop.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use wavetrap_core::config::{
    MAX_TARGET_DBFS, MIN_TARGET_DBFS, TX_MAX_HALF_SPAN_FRACTION, TX_MIN_HALF_SPAN_HZ,
};
use wavetrap_core::noise_synth::NoiseSynth;
use wavetrap_core::types::{db_to_amp, IQSample};

use crate::control::TxShared;
use crate::device::{SdrResult, TxDevice, TxOpener};

/// Device open retry interval.
pub const OPEN_RETRY: Duration = Duration::from_millis(200);
/// Bounded device write timeout.
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(200);
/// Samples per transmit frame.
pub const FRAME_LEN: usize = 4096;
/// Yield between write retries.
const RETRY_YIELD: Duration = Duration::from_micros(500);
/// How long `stop` waits for a clean worker exit before detaching.
pub const STOP_GRACE: Duration = Duration::from_secs(3);

/// Smallest analog baseband filter bandwidth ever requested.
const MIN_BASEBAND_BW_HZ: f64 = 2_000.0;
/// Filter setpoint drift that forces a re-apply.
const BW_REAPPLY_TOL_HZ: f64 = 1.0;

/// Handle to the TX worker thread.
pub struct TxPipeline {
    handle: Option<JoinHandle<()>>,
    shared: Arc<TxShared>,
}

impl TxPipeline {
    pub(crate) fn start(opener: TxOpener, shared: Arc<TxShared>) -> SdrResult<Self> {
        shared.stop.store(false, std::sync::atomic::Ordering::Release);
        let worker_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("wavetrap-tx".to_string())
            .spawn(move || worker(opener, worker_shared))?;
        Ok(Self {
            handle: Some(handle),
            shared,
        })
    }

    /// Request shutdown and wait up to [`STOP_GRACE`] for a clean exit.
    pub fn stop(&mut self) {
        self.shared
            .stop
            .store(true, std::sync::atomic::Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let deadline = Instant::now() + STOP_GRACE;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                tracing::warn!("tx worker did not stop within grace period; detaching");
            }
        }
    }
}

impl Drop for TxPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker(mut opener: TxOpener, shared: Arc<TxShared>) {
    use std::sync::atomic::Ordering;

    tracing::info!("tx worker started");
    let mut device: Option<Box<dyn TxDevice>> = None;
    let mut synth = NoiseSynth::new();
    let mut frame = vec![IQSample::new(0.0, 0.0); FRAME_LEN];
    let mut tuned: Option<(f64, f64)> = None;
    let mut last_bw_hz = 0.0_f64;
    let mut last_vga_db = f64::NAN;

    'run: while !shared.stop.load(Ordering::Acquire) {
        let params = shared.snapshot();

        if device.is_none() {
            match opener() {
                Ok(mut dev) => {
                    // Amp on up front so the digital level sits above LO
                    // leakage; failures are tolerated like any gain quirk.
                    if let Err(e) = dev.set_amp_enabled(true) {
                        tracing::warn!(error = %e, "enabling tx amp failed");
                    }
                    tracing::info!("transmitter opened");
                    device = Some(dev);
                    tuned = None;
                    last_bw_hz = 0.0;
                    last_vga_db = f64::NAN;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "transmitter open failed; retrying");
                    thread::sleep(OPEN_RETRY);
                    continue;
                }
            }
        }
        let Some(dev) = device.as_mut() else {
            continue;
        };

        let want = (params.center_hz, params.sample_rate_hz);
        if tuned != Some(want) {
            match dev.tune(params.center_hz, params.sample_rate_hz) {
                Ok(()) => {
                    tracing::info!(
                        center_mhz = params.center_hz / 1e6,
                        sample_rate = params.sample_rate_hz,
                        "tx tuning applied"
                    );
                    tuned = Some(want);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "tx tuning failed; reopening device");
                    device = None;
                    thread::sleep(OPEN_RETRY);
                    continue;
                }
            }
        }

        if last_vga_db != params.gain_db {
            let vga = params.gain_db.clamp(0.0, 47.0);
            if let Err(e) = dev.set_vga_gain(vga) {
                tracing::warn!(error = %e, "tx vga set failed");
            }
            last_vga_db = params.gain_db;
        }

        let fs = params.sample_rate_hz;
        let half_span = params
            .half_span_hz
            .clamp(TX_MIN_HALF_SPAN_HZ, TX_MAX_HALF_SPAN_FRACTION * fs);

        // Keep the analog filter in sync with the occupied span.
        let bw_wanted = (2.0 * half_span).max(MIN_BASEBAND_BW_HZ);
        if (bw_wanted - last_bw_hz).abs() > BW_REAPPLY_TOL_HZ {
            match dev.set_bandwidth(bw_wanted) {
                Ok(()) => {
                    tracing::info!(bandwidth_hz = bw_wanted, "tx baseband filter set");
                    last_bw_hz = bw_wanted;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "tx bandwidth set failed");
                }
            }
        }

        synth.ensure(fs, half_span);

        let dbfs = params.target_dbfs.clamp(MIN_TARGET_DBFS, MAX_TARGET_DBFS);
        let target_rms = db_to_amp(dbfs as f32);
        synth.fill(&mut frame, target_rms);

        let mut written = 0usize;
        while written < frame.len() {
            if shared.stop.load(Ordering::Acquire) {
                break 'run;
            }
            match dev.write(&frame[written..], WRITE_TIMEOUT) {
                Ok(n) if n > 0 => written += n,
                // Transient stall or error: yield briefly and retry the
                // same samples; continuity beats latency here.
                Ok(_) => thread::sleep(RETRY_YIELD),
                Err(e) => {
                    tracing::trace!(error = %e, "tx write stalled; retrying");
                    thread::sleep(RETRY_YIELD);
                }
            }
        }
    }

    tracing::info!("tx worker stopped");
}
