//! Receive pipeline
//!
//! One dedicated worker thread drives the whole RX chain:
//!
//! ```text
//! device read ─ SpectrumEngine ─ TriggerMachine ─ CaptureSink
//!      │              │               │
//!      └── inbox ─────┴── status/frame slots ── event queue
//! ```
//!
//! The loop never dies on stream trouble: a failed open retries every
//! 200 ms, a failed tune or read drops the device handle and re-opens, and
//! short reads simply skip the FFT. Commands (arm/cancel/manual record) and
//! parameter changes take effect at block boundaries.

use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use wavetrap_core::recording::write_cf32;
use wavetrap_core::spectrum::{clamp_fft_size, SpectrumEngine};
use wavetrap_core::trigger::{TriggerEvent, TriggerMachine};
use wavetrap_core::types::IQSample;

use crate::capture_sink::CaptureSink;
use crate::control::{PipelineEvent, RxOutbox, RxShared, SpectrumFrame};
use crate::device::{RxDevice, RxOpener, SdrError, SdrResult};

/// Device open retry interval.
pub const OPEN_RETRY: Duration = Duration::from_millis(200);
/// Bounded device read timeout.
pub const READ_TIMEOUT: Duration = Duration::from_millis(10);
/// How long `stop` waits for the worker before detaching it.
pub const JOIN_GRACE: Duration = Duration::from_secs(5);

/// Handle to the RX worker thread.
pub struct RxPipeline {
    handle: Option<JoinHandle<()>>,
    shared: Arc<RxShared>,
}

impl RxPipeline {
    pub(crate) fn start(
        opener: RxOpener,
        shared: Arc<RxShared>,
        outbox: RxOutbox,
        capture_dir: PathBuf,
    ) -> SdrResult<Self> {
        shared.stop.store(false, std::sync::atomic::Ordering::Release);
        let worker_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("wavetrap-rx".to_string())
            .spawn(move || worker(opener, worker_shared, outbox, capture_dir))?;
        Ok(Self {
            handle: Some(handle),
            shared,
        })
    }

    /// Request shutdown and wait up to [`JOIN_GRACE`]; a worker stuck in a
    /// device call past that is detached rather than blocking the caller.
    pub fn stop(&mut self) {
        self.shared
            .stop
            .store(true, std::sync::atomic::Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let deadline = Instant::now() + JOIN_GRACE;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                tracing::warn!("rx worker did not stop within grace period; detaching");
            }
        }
    }
}

impl Drop for RxPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ManualRecord {
    writer: BufWriter<File>,
    path: PathBuf,
}

fn worker(mut opener: RxOpener, shared: Arc<RxShared>, outbox: RxOutbox, capture_dir: PathBuf) {
    use std::sync::atomic::Ordering;

    tracing::info!("rx worker started");
    let mut device: Option<Box<dyn RxDevice>> = None;
    let mut engine = SpectrumEngine::new(shared.snapshot().fft_size);
    let mut trigger = TriggerMachine::new();
    let mut sink = CaptureSink::new(capture_dir);
    let mut buf: Vec<IQSample> = Vec::new();
    let mut tuned: Option<(f64, f64, f64)> = None;
    let mut manual: Option<ManualRecord> = None;
    let mut arm_time: DateTime<Utc> = Utc::now();
    // Start at zero so commands issued before the worker came up are
    // executed at the first block boundary.
    let mut arm_seen = 0u64;
    let mut cancel_seen = 0u64;
    let mut record_seen = 0u64;

    while !shared.stop.load(Ordering::Acquire) {
        let params = shared.snapshot();

        // Commands first: arm, then cancel, so a cancel racing an arm wins.
        let arm_seq = shared.arm_seq.load(Ordering::Acquire);
        if arm_seq != arm_seen {
            arm_seen = arm_seq;
            trigger.arm(params.pre_s, params.post_s, params.sample_rate_hz);
            arm_time = Utc::now();
            sink.open_spool(arm_time, params.center_hz / 1e6);
        }
        let cancel_seq = shared.cancel_seq.load(Ordering::Acquire);
        if cancel_seq != cancel_seen {
            cancel_seen = cancel_seq;
            trigger.cancel();
            sink.discard_spool();
        }
        let record_seq = shared.record_seq.load(Ordering::Acquire);
        if record_seq != record_seen {
            record_seen = record_seq;
            manual = None;
            let requested = shared.record_path.lock().unwrap().clone();
            if let Some(path) = requested {
                match File::create(&path) {
                    Ok(file) => {
                        tracing::info!(path = %path.display(), "manual record started");
                        manual = Some(ManualRecord {
                            writer: BufWriter::new(file),
                            path,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, path = %path.display(), "manual record open failed");
                    }
                }
            } else {
                tracing::info!("manual record stopped");
            }
        }

        // Lazy device open with bounded retry.
        if device.is_none() {
            match opener() {
                Ok(dev) => {
                    tracing::info!("receiver opened");
                    device = Some(dev);
                    tuned = None;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "receiver open failed; retrying");
                    thread::sleep(OPEN_RETRY);
                    continue;
                }
            }
        }
        let Some(dev) = device.as_mut() else {
            continue;
        };

        // Re-tune when the requested (center, rate, gain) changed.
        let want = (params.center_hz, params.sample_rate_hz, params.gain_db);
        if tuned != Some(want) {
            let applied = dev
                .tune(params.center_hz, params.sample_rate_hz)
                .and_then(|()| dev.set_gain_db(params.gain_db));
            match applied {
                Ok(()) => {
                    tracing::info!(
                        center_mhz = params.center_hz / 1e6,
                        sample_rate = params.sample_rate_hz,
                        gain_db = params.gain_db,
                        "tuning applied"
                    );
                    tuned = Some(want);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "tuning failed; reopening device");
                    device = None;
                    thread::sleep(OPEN_RETRY);
                    continue;
                }
            }
        }

        if engine.size() != clamp_fft_size(params.fft_size) {
            engine.configure(params.fft_size);
        }
        let n = engine.size();
        buf.resize(n, IQSample::new(0.0, 0.0));

        let got = match dev.read(&mut buf, READ_TIMEOUT) {
            Ok(got) => got,
            Err(SdrError::Timeout(_)) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "read failed; reopening device");
                device = None;
                continue;
            }
        };
        if got != n {
            // Short read: no FFT, keep the loop responsive.
            continue;
        }

        if let Some(record) = manual.as_mut() {
            if let Err(e) = write_cf32(&mut record.writer, &buf) {
                tracing::warn!(error = %e, path = %record.path.display(), "manual record write failed; stopping");
                manual = None;
            }
        }

        let block = engine.process(&buf, params.half_span_hz, params.sample_rate_hz);

        if trigger.is_active() {
            sink.append_spool(&buf);
            if let Some((status, event)) =
                trigger.process_block(&buf, block.center_peak_lin, &params.detector_params())
            {
                // Status goes out before the frame so a frame for this
                // block is never observable ahead of its trigger state.
                outbox.status.publish(status);
                match event {
                    Some(TriggerEvent::CaptureStarted) => {
                        let _ = outbox.events.send(PipelineEvent::CaptureStarted);
                    }
                    Some(TriggerEvent::CaptureFinished(samples)) => {
                        match sink.finalize(
                            &samples,
                            arm_time,
                            params.center_hz / 1e6,
                            params.threshold_db,
                        ) {
                            Ok(path) => {
                                let _ = outbox
                                    .events
                                    .send(PipelineEvent::CaptureComplete(path));
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "capture finalize failed");
                                let _ = outbox
                                    .events
                                    .send(PipelineEvent::CaptureFailed(e.to_string()));
                            }
                        }
                    }
                    None => {}
                }
            }
        }

        outbox.frame.publish(SpectrumFrame { amps: block.amps });
    }

    // Bounded cleanup: no orphan spool, flushed manual file.
    trigger.cancel();
    sink.discard_spool();
    if let Some(mut record) = manual.take() {
        let _ = record.writer.flush();
    }
    tracing::info!("rx worker stopped");
}
