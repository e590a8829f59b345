//! Control plane
//!
//! The only piece shared between threads. Every tunable scalar lives in its
//! own atomic slot; the workers read all of them into a local snapshot at
//! each block boundary so the numbers inside one block are consistent.
//! Setters validate synchronously and never block — a rejected value leaves
//! the previous one in effect.
//!
//! Worker → UI traffic comes in two shapes:
//!
//! - high-rate per-block values (the spectrum frame and the trigger status)
//!   go through newest-wins slots — the UI reads the latest and stale values
//!   are simply overwritten;
//! - discrete lifecycle events (capture started/complete/failed, device
//!   presence edges) go through an mpsc queue and are never dropped.
//!
//! Arm/cancel/record are sequence-numbered commands: bumping the counter
//! makes the worker execute the command at its next block boundary.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use wavetrap_core::config::{ConfigError, RxConfig, TxConfig};
use wavetrap_core::trigger::{DetectorMode, DetectorParams, TriggerStatus};

use crate::capture_sink::DEFAULT_CAPTURE_DIR;
use crate::device::{RxOpener, SdrResult, TxOpener};
use crate::rx::RxPipeline;
use crate::tx::TxPipeline;

/// f64 stored as raw bits in an `AtomicU64`.
pub(crate) struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// Newest-wins single-value slot.
pub struct Slot<T>(Mutex<Option<T>>);

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self(Mutex::new(None))
    }

    /// Replace whatever is stored; the previous value is dropped.
    pub fn publish(&self, value: T) {
        *self.0.lock().unwrap() = Some(value);
    }

    /// Take the latest value, leaving the slot empty.
    pub fn take(&self) -> Option<T> {
        self.0.lock().unwrap().take()
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// One spectrum for display: shifted magnitudes, bin 0 = −Fs/2.
#[derive(Debug, Clone)]
pub struct SpectrumFrame {
    pub amps: Vec<f32>,
}

/// Discrete worker events.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// The trigger condition was met; a capture is accumulating.
    CaptureStarted,
    /// A capture file was written and fsynced at this path.
    CaptureComplete(PathBuf),
    /// Finalization failed; the pipeline stays healthy and the next arm is
    /// accepted.
    CaptureFailed(String),
    /// Device presence edge from the monitor.
    PresenceChanged { rtlsdr: bool, hackrf: bool },
}

const DETECTOR_AVERAGED: u8 = 0;
const DETECTOR_PEAK: u8 = 1;

fn encode_detector(mode: DetectorMode) -> u8 {
    match mode {
        DetectorMode::Averaged => DETECTOR_AVERAGED,
        DetectorMode::Peak => DETECTOR_PEAK,
    }
}

fn decode_detector(raw: u8) -> DetectorMode {
    if raw == DETECTOR_PEAK {
        DetectorMode::Peak
    } else {
        DetectorMode::Averaged
    }
}

/// RX worker inbox: parameters plus sequence-numbered commands.
pub(crate) struct RxShared {
    center_hz: AtomicF64,
    sample_rate_hz: AtomicF64,
    gain_db: AtomicF64,
    fft_size: AtomicUsize,
    detector: AtomicU8,
    threshold_db: AtomicF64,
    half_span_hz: AtomicF64,
    dwell_s: AtomicF64,
    avg_tau_s: AtomicF64,
    pre_s: AtomicF64,
    post_s: AtomicF64,
    pub arm_seq: AtomicU64,
    pub cancel_seq: AtomicU64,
    pub record_seq: AtomicU64,
    pub record_path: Mutex<Option<PathBuf>>,
    pub stop: AtomicBool,
}

impl RxShared {
    fn new(cfg: &RxConfig) -> Self {
        Self {
            center_hz: AtomicF64::new(cfg.center_hz),
            sample_rate_hz: AtomicF64::new(cfg.sample_rate_hz),
            gain_db: AtomicF64::new(cfg.gain_db),
            fft_size: AtomicUsize::new(cfg.fft_size),
            detector: AtomicU8::new(encode_detector(cfg.detector)),
            threshold_db: AtomicF64::new(cfg.threshold_db),
            half_span_hz: AtomicF64::new(cfg.half_span_hz),
            dwell_s: AtomicF64::new(cfg.dwell_s),
            avg_tau_s: AtomicF64::new(cfg.avg_tau_s),
            pre_s: AtomicF64::new(cfg.pre_s),
            post_s: AtomicF64::new(cfg.post_s),
            arm_seq: AtomicU64::new(0),
            cancel_seq: AtomicU64::new(0),
            record_seq: AtomicU64::new(0),
            record_path: Mutex::new(None),
            stop: AtomicBool::new(false),
        }
    }

    fn store_config(&self, cfg: &RxConfig) {
        self.center_hz.store(cfg.center_hz);
        self.sample_rate_hz.store(cfg.sample_rate_hz);
        self.gain_db.store(cfg.gain_db);
        self.fft_size.store(cfg.fft_size, Ordering::Release);
        self.detector
            .store(encode_detector(cfg.detector), Ordering::Release);
        self.threshold_db.store(cfg.threshold_db);
        self.half_span_hz.store(cfg.half_span_hz);
        self.dwell_s.store(cfg.dwell_s);
        self.avg_tau_s.store(cfg.avg_tau_s);
        self.pre_s.store(cfg.pre_s);
        self.post_s.store(cfg.post_s);
    }

    /// Consistent per-block view of all RX parameters.
    pub fn snapshot(&self) -> RxParams {
        RxParams {
            center_hz: self.center_hz.load(),
            sample_rate_hz: self.sample_rate_hz.load(),
            gain_db: self.gain_db.load(),
            fft_size: self.fft_size.load(Ordering::Acquire),
            detector: decode_detector(self.detector.load(Ordering::Acquire)),
            threshold_db: self.threshold_db.load(),
            half_span_hz: self.half_span_hz.load(),
            dwell_s: self.dwell_s.load(),
            avg_tau_s: self.avg_tau_s.load(),
            pre_s: self.pre_s.load(),
            post_s: self.post_s.load(),
        }
    }
}

/// Snapshot of the RX parameter slots.
#[derive(Debug, Clone, Copy)]
pub struct RxParams {
    pub center_hz: f64,
    pub sample_rate_hz: f64,
    pub gain_db: f64,
    pub fft_size: usize,
    pub detector: DetectorMode,
    pub threshold_db: f64,
    pub half_span_hz: f64,
    pub dwell_s: f64,
    pub avg_tau_s: f64,
    pub pre_s: f64,
    pub post_s: f64,
}

impl RxParams {
    pub(crate) fn detector_params(&self) -> DetectorParams {
        DetectorParams {
            sample_rate: self.sample_rate_hz,
            threshold_db: self.threshold_db,
            dwell_s: self.dwell_s,
            avg_tau_s: self.avg_tau_s,
            detector: self.detector,
        }
    }

    fn to_config(self) -> RxConfig {
        RxConfig {
            center_hz: self.center_hz,
            sample_rate_hz: self.sample_rate_hz,
            gain_db: self.gain_db,
            fft_size: self.fft_size,
            detector: self.detector,
            threshold_db: self.threshold_db,
            half_span_hz: self.half_span_hz,
            dwell_s: self.dwell_s,
            avg_tau_s: self.avg_tau_s,
            pre_s: self.pre_s,
            post_s: self.post_s,
        }
    }
}

/// TX worker inbox.
pub(crate) struct TxShared {
    center_hz: AtomicF64,
    sample_rate_hz: AtomicF64,
    target_dbfs: AtomicF64,
    half_span_hz: AtomicF64,
    gain_db: AtomicF64,
    pub stop: AtomicBool,
}

impl TxShared {
    fn new(cfg: &TxConfig) -> Self {
        Self {
            center_hz: AtomicF64::new(cfg.center_hz),
            sample_rate_hz: AtomicF64::new(cfg.sample_rate_hz),
            target_dbfs: AtomicF64::new(cfg.target_dbfs),
            half_span_hz: AtomicF64::new(cfg.half_span_hz),
            gain_db: AtomicF64::new(cfg.gain_db),
            stop: AtomicBool::new(false),
        }
    }

    fn store_config(&self, cfg: &TxConfig) {
        self.center_hz.store(cfg.center_hz);
        self.sample_rate_hz.store(cfg.sample_rate_hz);
        self.target_dbfs.store(cfg.target_dbfs);
        self.half_span_hz.store(cfg.half_span_hz);
        self.gain_db.store(cfg.gain_db);
    }

    pub fn snapshot(&self) -> TxParams {
        TxParams {
            center_hz: self.center_hz.load(),
            sample_rate_hz: self.sample_rate_hz.load(),
            target_dbfs: self.target_dbfs.load(),
            half_span_hz: self.half_span_hz.load(),
            gain_db: self.gain_db.load(),
        }
    }
}

/// Snapshot of the TX parameter slots.
#[derive(Debug, Clone, Copy)]
pub struct TxParams {
    pub center_hz: f64,
    pub sample_rate_hz: f64,
    pub target_dbfs: f64,
    pub half_span_hz: f64,
    pub gain_db: f64,
}

impl TxParams {
    fn to_config(self) -> TxConfig {
        TxConfig {
            center_hz: self.center_hz,
            sample_rate_hz: self.sample_rate_hz,
            target_dbfs: self.target_dbfs,
            half_span_hz: self.half_span_hz,
            gain_db: self.gain_db,
        }
    }
}

/// Handles the RX worker publishes through.
pub(crate) struct RxOutbox {
    pub frame: Arc<Slot<SpectrumFrame>>,
    pub status: Arc<Slot<TriggerStatus>>,
    pub events: Sender<PipelineEvent>,
}

/// Thread-safe parameter hand-off, event surface and pipeline lifecycle.
pub struct ControlPlane {
    rx: Arc<RxShared>,
    tx: Arc<TxShared>,
    frame_slot: Arc<Slot<SpectrumFrame>>,
    status_slot: Arc<Slot<TriggerStatus>>,
    events_tx: Sender<PipelineEvent>,
    events_rx: Mutex<Receiver<PipelineEvent>>,
    capture_dir: PathBuf,
    rx_pipeline: Option<RxPipeline>,
    tx_pipeline: Option<TxPipeline>,
}

impl ControlPlane {
    /// Build a control plane from validated initial configurations.
    pub fn new(rx_cfg: RxConfig, tx_cfg: TxConfig) -> Result<Self, ConfigError> {
        rx_cfg.validate()?;
        tx_cfg.validate()?;
        let (events_tx, events_rx) = mpsc::channel();
        Ok(Self {
            rx: Arc::new(RxShared::new(&rx_cfg)),
            tx: Arc::new(TxShared::new(&tx_cfg)),
            frame_slot: Arc::new(Slot::new()),
            status_slot: Arc::new(Slot::new()),
            events_tx,
            events_rx: Mutex::new(events_rx),
            capture_dir: PathBuf::from(DEFAULT_CAPTURE_DIR),
            rx_pipeline: None,
            tx_pipeline: None,
        })
    }

    /// Use a different capture directory (the default is `captures/`).
    pub fn with_capture_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.capture_dir = dir.into();
        self
    }

    pub fn capture_dir(&self) -> &std::path::Path {
        &self.capture_dir
    }

    // ---- configuration ------------------------------------------------

    /// Current RX configuration as seen by the worker.
    pub fn rx_config(&self) -> RxConfig {
        self.rx.snapshot().to_config()
    }

    /// Current TX configuration as seen by the worker.
    pub fn tx_config(&self) -> TxConfig {
        self.tx.snapshot().to_config()
    }

    /// Replace the whole RX configuration. Rejected values keep the
    /// previous configuration untouched.
    pub fn set_rx_config(&self, cfg: RxConfig) -> Result<(), ConfigError> {
        cfg.validate()?;
        self.rx.store_config(&cfg);
        Ok(())
    }

    /// Replace the whole TX configuration.
    pub fn set_tx_config(&self, cfg: TxConfig) -> Result<(), ConfigError> {
        cfg.validate()?;
        self.tx.store_config(&cfg);
        Ok(())
    }

    pub fn set_rx_tuning(&self, center_hz: f64, sample_rate_hz: f64) -> Result<(), ConfigError> {
        let cfg = RxConfig {
            center_hz,
            sample_rate_hz,
            ..self.rx_config()
        };
        cfg.validate()?;
        self.rx.center_hz.store(center_hz);
        self.rx.sample_rate_hz.store(sample_rate_hz);
        Ok(())
    }

    pub fn set_rx_gain_db(&self, gain_db: f64) -> Result<(), ConfigError> {
        let cfg = RxConfig {
            gain_db,
            ..self.rx_config()
        };
        cfg.validate()?;
        self.rx.gain_db.store(gain_db);
        Ok(())
    }

    /// Request a new FFT size. The worker clamps it into [512, 8192].
    pub fn set_fft_size(&self, fft_size: usize) {
        self.rx.fft_size.store(fft_size, Ordering::Release);
    }

    pub fn set_detector(&self, detector: DetectorMode) {
        self.rx
            .detector
            .store(encode_detector(detector), Ordering::Release);
        tracing::info!(?detector, "detector mode set");
    }

    pub fn set_threshold_db(&self, threshold_db: f64) -> Result<(), ConfigError> {
        if !threshold_db.is_finite() {
            return Err(ConfigError::new("threshold_db", threshold_db, "finite"));
        }
        self.rx.threshold_db.store(threshold_db);
        tracing::info!(threshold_db, "trigger threshold set");
        Ok(())
    }

    /// Detection half-span around center. Non-positive values fall back to
    /// the 100 kHz default at the point of use.
    pub fn set_half_span_hz(&self, half_span_hz: f64) {
        self.rx.half_span_hz.store(half_span_hz.max(0.0));
    }

    pub fn set_dwell_s(&self, dwell_s: f64) -> Result<(), ConfigError> {
        if !(dwell_s >= 0.0) {
            return Err(ConfigError::new("dwell_s", dwell_s, ">= 0"));
        }
        self.rx.dwell_s.store(dwell_s);
        Ok(())
    }

    pub fn set_avg_tau_s(&self, avg_tau_s: f64) -> Result<(), ConfigError> {
        if !(avg_tau_s >= 0.0) {
            return Err(ConfigError::new("avg_tau_s", avg_tau_s, ">= 0"));
        }
        self.rx.avg_tau_s.store(avg_tau_s);
        Ok(())
    }

    pub fn set_tx_tuning(&self, center_hz: f64, sample_rate_hz: f64) -> Result<(), ConfigError> {
        let cfg = TxConfig {
            center_hz,
            sample_rate_hz,
            ..self.tx_config()
        };
        cfg.validate()?;
        self.tx.center_hz.store(center_hz);
        self.tx.sample_rate_hz.store(sample_rate_hz);
        Ok(())
    }

    pub fn set_target_dbfs(&self, target_dbfs: f64) -> Result<(), ConfigError> {
        let cfg = TxConfig {
            target_dbfs,
            ..self.tx_config()
        };
        cfg.validate()?;
        self.tx.target_dbfs.store(target_dbfs);
        Ok(())
    }

    pub fn set_tx_half_span_hz(&self, half_span_hz: f64) -> Result<(), ConfigError> {
        let cfg = TxConfig {
            half_span_hz,
            ..self.tx_config()
        };
        cfg.validate()?;
        self.tx.half_span_hz.store(half_span_hz);
        Ok(())
    }

    pub fn set_tx_gain_db(&self, gain_db: f64) -> Result<(), ConfigError> {
        let cfg = TxConfig {
            gain_db,
            ..self.tx_config()
        };
        cfg.validate()?;
        self.tx.gain_db.store(gain_db);
        Ok(())
    }

    // ---- commands -----------------------------------------------------

    /// Arm a triggered capture with the given pre/post windows.
    pub fn arm(&self, pre_s: f64, post_s: f64) -> Result<(), ConfigError> {
        if !(pre_s >= 0.0) {
            return Err(ConfigError::new("pre_s", pre_s, ">= 0"));
        }
        if !(post_s >= 0.0) {
            return Err(ConfigError::new("post_s", post_s, ">= 0"));
        }
        self.rx.pre_s.store(pre_s);
        self.rx.post_s.store(post_s);
        self.rx.arm_seq.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Abort the current session; observed at the next block boundary.
    pub fn cancel(&self) {
        self.rx.cancel_seq.fetch_add(1, Ordering::Release);
    }

    /// Start appending every received block to `path` (raw cf32),
    /// independent of the trigger machinery.
    pub fn start_manual_record<P: Into<PathBuf>>(&self, path: P) {
        *self.rx.record_path.lock().unwrap() = Some(path.into());
        self.rx.record_seq.fetch_add(1, Ordering::Release);
    }

    /// Stop manual recording.
    pub fn stop_manual_record(&self) {
        *self.rx.record_path.lock().unwrap() = None;
        self.rx.record_seq.fetch_add(1, Ordering::Release);
    }

    // ---- event surface ------------------------------------------------

    /// Latest spectrum frame, if one arrived since the last call.
    pub fn latest_frame(&self) -> Option<SpectrumFrame> {
        self.frame_slot.take()
    }

    /// Latest trigger status, if one arrived since the last call.
    pub fn latest_status(&self) -> Option<TriggerStatus> {
        self.status_slot.take()
    }

    /// Next queued discrete event, non-blocking.
    pub fn poll_event(&self) -> Option<PipelineEvent> {
        self.events_rx.lock().unwrap().try_recv().ok()
    }

    /// Push an event onto the queue (used by the presence monitor glue).
    pub fn publish(&self, event: PipelineEvent) {
        let _ = self.events_tx.send(event);
    }

    // ---- lifecycle ----------------------------------------------------

    /// Start the RX worker; no-op if it is already running.
    pub fn start_rx(&mut self, opener: RxOpener) -> SdrResult<()> {
        if self.rx_pipeline.is_some() {
            return Ok(());
        }
        let outbox = RxOutbox {
            frame: self.frame_slot.clone(),
            status: self.status_slot.clone(),
            events: self.events_tx.clone(),
        };
        let pipeline =
            RxPipeline::start(opener, self.rx.clone(), outbox, self.capture_dir.clone())?;
        self.rx_pipeline = Some(pipeline);
        Ok(())
    }

    /// Stop the RX worker, waiting up to the shutdown grace period.
    pub fn stop_rx(&mut self) {
        if let Some(mut pipeline) = self.rx_pipeline.take() {
            pipeline.stop();
        }
    }

    pub fn is_rx_running(&self) -> bool {
        self.rx_pipeline.is_some()
    }

    /// Start the TX worker; no-op if it is already running.
    pub fn start_tx(&mut self, opener: TxOpener) -> SdrResult<()> {
        if self.tx_pipeline.is_some() {
            return Ok(());
        }
        let pipeline = TxPipeline::start(opener, self.tx.clone())?;
        self.tx_pipeline = Some(pipeline);
        Ok(())
    }

    /// Stop the TX worker, waiting up to the clean-stop grace period.
    pub fn stop_tx(&mut self) {
        if let Some(mut pipeline) = self.tx_pipeline.take() {
            pipeline.stop();
        }
    }

    pub fn is_tx_running(&self) -> bool {
        self.tx_pipeline.is_some()
    }
}

impl Drop for ControlPlane {
    fn drop(&mut self) {
        self.stop_rx();
        self.stop_tx();
    }
}
