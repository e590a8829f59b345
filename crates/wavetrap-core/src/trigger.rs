//! Event trigger state machine
//!
//! Watches the center-band energy produced by the spectrum engine and turns
//! it into trimmed captures:
//!
//! ```text
//!        arm(pre, post)            streak ≥ need              quiet ≥ post
//! Idle ────────────────▶ Armed ────────────────▶ Capturing ────────────────▶ Idle
//!   ▲                      │                        │        (finished)
//!   └────── cancel() ──────┴────────────────────────┘
//! ```
//!
//! While armed, every block lands in a pre-trigger ring sized to
//! `round(rate · pre_s)`. On trigger the ring is drained chronologically to
//! seed the capture buffer, so the capture includes history preceding the
//! event. Capturing ends after `round(rate · post_s)` consecutive samples
//! below threshold; the accumulated buffer is handed back to the caller.
//!
//! Detection runs on a per-block snapshot of the tunable parameters so the
//! numbers inside one block are always consistent.

use serde::{Deserialize, Serialize};

use crate::ring_buffer::RingBuffer;
use crate::types::IQSample;

/// Linear floor for the detector's dB readout; an all-zero band reads
/// exactly 20·log10(1e-6) = −120 dB.
pub const DETECTOR_FLOOR: f64 = 1e-6;

/// Armed-state debug heartbeat period, in seconds of samples.
const HEARTBEAT_SECONDS: f64 = 0.5;

/// How the center-band energy is judged against the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DetectorMode {
    /// EMA of the center peak with time constant `avg_tau_s`; requires
    /// `dwell_s` of continuous above-threshold time to trigger.
    #[default]
    Averaged,
    /// Instantaneous center peak; a single block above threshold triggers.
    Peak,
}

/// Per-block snapshot of the detection parameters.
#[derive(Debug, Clone, Copy)]
pub struct DetectorParams {
    pub sample_rate: f64,
    pub threshold_db: f64,
    pub dwell_s: f64,
    pub avg_tau_s: f64,
    pub detector: DetectorMode,
}

/// Trigger machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerState {
    #[default]
    Idle,
    Armed,
    Capturing,
}

/// Per-block status, suitable for direct display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerStatus {
    pub armed: bool,
    pub capturing: bool,
    pub center_db: f64,
    pub threshold_db: f64,
    pub above: bool,
}

/// State transition produced by a block.
#[derive(Debug)]
pub enum TriggerEvent {
    /// Threshold condition met; the capture buffer now holds the pre-trigger
    /// history plus the triggering block.
    CaptureStarted,
    /// Post-trigger quiet period elapsed; the machine is back to Idle and
    /// the full chronological capture is handed over.
    CaptureFinished(Vec<IQSample>),
}

/// Threshold trigger with pre/post buffering and dwell accounting.
#[derive(Debug)]
pub struct TriggerMachine {
    state: TriggerState,
    ring: RingBuffer,
    capture: Vec<IQSample>,
    post_s: f64,
    /// EMA of the center peak (Averaged mode), linear.
    center_avg_lin: f64,
    above_streak: u64,
    below_streak: u64,
    total_since_arm: u64,
    last_above: bool,
    last_detector: DetectorMode,
    heartbeat_accum: u64,
}

impl TriggerMachine {
    pub fn new() -> Self {
        Self {
            state: TriggerState::Idle,
            ring: RingBuffer::new(0),
            capture: Vec::new(),
            post_s: 0.0,
            center_avg_lin: 0.0,
            above_streak: 0,
            below_streak: 0,
            total_since_arm: 0,
            last_above: false,
            last_detector: DetectorMode::default(),
            heartbeat_accum: 0,
        }
    }

    /// Arm the trigger. Sizes the pre-trigger ring to `round(rate · pre_s)`
    /// and clears all counters and smoothing state.
    pub fn arm(&mut self, pre_s: f64, post_s: f64, sample_rate: f64) {
        let pre_s = pre_s.max(0.0);
        self.post_s = post_s.max(0.0);
        let capacity = (sample_rate * pre_s).round().max(0.0) as usize;
        self.ring = RingBuffer::new(capacity);
        self.capture.clear();
        self.center_avg_lin = 0.0;
        self.above_streak = 0;
        self.below_streak = 0;
        self.total_since_arm = 0;
        self.last_above = false;
        self.heartbeat_accum = 0;
        self.state = TriggerState::Armed;
        tracing::info!(
            pre_s,
            post_s = self.post_s,
            sample_rate,
            ring_capacity = capacity,
            "trigger armed"
        );
    }

    /// Abort the session and discard all buffered samples.
    pub fn cancel(&mut self) {
        if self.state != TriggerState::Idle {
            tracing::info!("trigger cancelled");
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.state = TriggerState::Idle;
        self.ring = RingBuffer::new(0);
        self.capture = Vec::new();
        self.center_avg_lin = 0.0;
        self.above_streak = 0;
        self.below_streak = 0;
        self.total_since_arm = 0;
        self.last_above = false;
        self.heartbeat_accum = 0;
    }

    /// Feed one block. Returns `None` while Idle; otherwise the block's
    /// status and, on a state transition, the corresponding event.
    ///
    /// The status reflects the state at block entry, so the block that
    /// completes a capture still reports `capturing = true`.
    pub fn process_block(
        &mut self,
        samples: &[IQSample],
        center_peak_lin: f32,
        params: &DetectorParams,
    ) -> Option<(TriggerStatus, Option<TriggerEvent>)> {
        if self.state == TriggerState::Idle {
            return None;
        }
        let m = samples.len() as u64;

        // Switching detector modes must not carry smoothing state over.
        if params.detector != self.last_detector {
            self.center_avg_lin = 0.0;
            self.last_detector = params.detector;
        }

        self.ring.push_many(samples);
        self.total_since_arm += m;

        let x = match params.detector {
            DetectorMode::Averaged => {
                let dt = if params.sample_rate > 0.0 {
                    m as f64 / params.sample_rate
                } else {
                    0.0
                };
                let alpha = if dt > 0.0 && params.avg_tau_s > 0.0 {
                    1.0 - (-dt / params.avg_tau_s).exp()
                } else {
                    0.0
                };
                self.center_avg_lin =
                    (1.0 - alpha) * self.center_avg_lin + alpha * center_peak_lin as f64;
                self.center_avg_lin
            }
            DetectorMode::Peak => center_peak_lin as f64,
        };
        let center_db = 20.0 * x.max(DETECTOR_FLOOR).log10();
        let above = center_db >= params.threshold_db;

        if above != self.last_above {
            self.last_above = above;
            tracing::info!(
                above,
                center_db,
                threshold_db = params.threshold_db,
                "trigger level crossing"
            );
        }
        if above {
            self.above_streak += m;
        } else {
            self.above_streak = 0;
        }

        self.heartbeat_accum += m;
        let heartbeat_every =
            ((params.sample_rate * HEARTBEAT_SECONDS).round() as u64).max(1);
        if self.heartbeat_accum >= heartbeat_every {
            self.heartbeat_accum = 0;
            tracing::debug!(
                center_db,
                threshold_db = params.threshold_db,
                above,
                capturing = self.state == TriggerState::Capturing,
                "armed heartbeat"
            );
        }

        let status = TriggerStatus {
            armed: true,
            capturing: self.state == TriggerState::Capturing,
            center_db,
            threshold_db: params.threshold_db,
            above,
        };

        let event = match self.state {
            TriggerState::Armed => {
                let need_above = match params.detector {
                    DetectorMode::Peak => m.max(1),
                    DetectorMode::Averaged => {
                        ((params.sample_rate * params.dwell_s).round() as u64).max(1)
                    }
                };
                if self.above_streak >= need_above {
                    self.state = TriggerState::Capturing;
                    self.capture = self.ring.drain_chronological();
                    self.capture.extend_from_slice(samples);
                    self.below_streak = 0;
                    tracing::info!(
                        pre_samples = self.capture.len() - samples.len(),
                        "capture start"
                    );
                    Some(TriggerEvent::CaptureStarted)
                } else {
                    None
                }
            }
            TriggerState::Capturing => {
                self.capture.extend_from_slice(samples);
                if above {
                    self.below_streak = 0;
                    None
                } else {
                    self.below_streak += m;
                    let need_post =
                        (params.sample_rate * self.post_s).round().max(0.0) as u64;
                    if self.below_streak >= need_post {
                        let buffer = std::mem::take(&mut self.capture);
                        tracing::info!(samples = buffer.len(), "capture complete");
                        self.reset();
                        Some(TriggerEvent::CaptureFinished(buffer))
                    } else {
                        None
                    }
                }
            }
            TriggerState::Idle => unreachable!("handled above"),
        };

        Some((status, event))
    }

    pub fn state(&self) -> TriggerState {
        self.state
    }

    /// True while Armed or Capturing.
    pub fn is_active(&self) -> bool {
        self.state != TriggerState::Idle
    }

    pub fn is_capturing(&self) -> bool {
        self.state == TriggerState::Capturing
    }

    /// Samples seen since the last arm.
    pub fn total_since_arm(&self) -> u64 {
        self.total_since_arm
    }

    /// Current pre-trigger ring fill.
    pub fn ring_len(&self) -> usize {
        self.ring.len()
    }

    /// Current linear EMA of the center peak.
    pub fn center_avg_lin(&self) -> f64 {
        self.center_avg_lin
    }
}

impl Default for TriggerMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: f64 = 1_000_000.0;
    const BLOCK: usize = 1000;

    fn params(detector: DetectorMode, threshold_db: f64) -> DetectorParams {
        DetectorParams {
            sample_rate: RATE,
            threshold_db,
            dwell_s: 0.01,
            avg_tau_s: 0.05,
            detector,
        }
    }

    fn block(level: f32) -> Vec<IQSample> {
        vec![IQSample::new(level, 0.0); BLOCK]
    }

    #[test]
    fn test_idle_ignores_blocks() {
        let mut machine = TriggerMachine::new();
        assert!(machine
            .process_block(&block(1.0), 1.0, &params(DetectorMode::Peak, -20.0))
            .is_none());
    }

    #[test]
    fn test_arm_then_cancel_matches_fresh_instance() {
        let mut machine = TriggerMachine::new();
        machine.arm(0.1, 0.1, RATE);
        machine.cancel();
        assert_eq!(machine.state(), TriggerState::Idle);
        assert_eq!(machine.total_since_arm(), 0);
        assert_eq!(machine.ring_len(), 0);
        assert_eq!(machine.center_avg_lin(), 0.0);
    }

    #[test]
    fn test_peak_triggers_on_single_block() {
        let mut machine = TriggerMachine::new();
        machine.arm(0.0, 0.001, RATE);
        let p = params(DetectorMode::Peak, -20.0);

        // Quiet block: armed, not above.
        let (status, event) = machine.process_block(&block(1e-4), 1e-4, &p).unwrap();
        assert!(status.armed && !status.capturing && !status.above);
        assert!(event.is_none());

        // Loud block: capture starts immediately.
        let (_, event) = machine.process_block(&block(0.5), 0.5, &p).unwrap();
        assert!(matches!(event, Some(TriggerEvent::CaptureStarted)));
        assert!(machine.is_capturing());
    }

    #[test]
    fn test_peak_capture_runs_to_completion() {
        let mut machine = TriggerMachine::new();
        // pre = 2 blocks, post = 3 blocks.
        machine.arm(0.002, 0.003, RATE);
        let p = params(DetectorMode::Peak, -20.0);

        for _ in 0..4 {
            let (_, event) = machine.process_block(&block(1e-4), 1e-4, &p).unwrap();
            assert!(event.is_none());
        }
        let (_, event) = machine.process_block(&block(0.5), 0.5, &p).unwrap();
        assert!(matches!(event, Some(TriggerEvent::CaptureStarted)));

        // Quiet again: 3 blocks of post-roll then finish.
        let mut finished = None;
        for _ in 0..3 {
            let (status, event) = machine.process_block(&block(1e-4), 1e-4, &p).unwrap();
            assert!(status.capturing);
            if let Some(TriggerEvent::CaptureFinished(buf)) = event {
                finished = Some(buf);
            }
        }
        let buf = finished.expect("capture should finish after post quiet");
        // pre ring (2 blocks, includes the trigger block pushed before drain)
        // + the trigger block appended + 3 post blocks.
        assert_eq!(buf.len(), 2 * BLOCK + BLOCK + 3 * BLOCK);
        assert_eq!(machine.state(), TriggerState::Idle);

        // Chronological: the loud block sits right after the quiet prefix.
        assert!(buf[..BLOCK].iter().all(|s| s.re < 0.01));
        assert!(buf[2 * BLOCK..3 * BLOCK].iter().all(|s| s.re > 0.4));
    }

    #[test]
    fn test_pre_shorter_than_ring_uses_fill() {
        let mut machine = TriggerMachine::new();
        // Ring would hold 10 blocks but only 1 quiet block arrives before
        // the trigger: the capture prefix is just what was filled.
        machine.arm(0.010, 0.001, RATE);
        let p = params(DetectorMode::Peak, -20.0);
        let _ = machine.process_block(&block(1e-4), 1e-4, &p).unwrap();
        let _ = machine.process_block(&block(0.5), 0.5, &p).unwrap();
        let (_, event) = machine.process_block(&block(1e-4), 1e-4, &p).unwrap();
        let buf = match event {
            Some(TriggerEvent::CaptureFinished(buf)) => buf,
            other => panic!("expected finish, got {other:?}"),
        };
        // fill(2 blocks) + trigger block + 1 post block
        assert_eq!(buf.len(), 4 * BLOCK);
    }

    #[test]
    fn test_averaged_dwell_rejects_short_pulse() {
        let mut machine = TriggerMachine::new();
        machine.arm(0.01, 0.01, RATE);
        // dwell 10 ms = 10 blocks; a single loud block cannot trigger.
        let p = params(DetectorMode::Averaged, -20.0);
        let _ = machine.process_block(&block(1e-4), 1e-4, &p).unwrap();
        let (_, event) = machine.process_block(&block(1.0), 1.0, &p).unwrap();
        assert!(event.is_none());
        for _ in 0..20 {
            let (_, event) = machine.process_block(&block(1e-4), 1e-4, &p).unwrap();
            assert!(event.is_none());
        }
        assert_eq!(machine.state(), TriggerState::Armed);
    }

    #[test]
    fn test_averaged_sustained_signal_triggers() {
        let mut machine = TriggerMachine::new();
        machine.arm(0.001, 0.001, RATE);
        let p = params(DetectorMode::Averaged, -20.0);
        let mut started = false;
        // Sustained strong signal: EMA climbs above threshold, dwell accrues.
        for _ in 0..40 {
            let (_, event) = machine.process_block(&block(1.0), 1.0, &p).unwrap();
            if matches!(event, Some(TriggerEvent::CaptureStarted)) {
                started = true;
                break;
            }
        }
        assert!(started, "sustained signal must trigger in Averaged mode");
    }

    #[test]
    fn test_detector_switch_resets_ema() {
        let mut machine = TriggerMachine::new();
        machine.arm(0.001, 0.001, RATE);
        let avg = params(DetectorMode::Averaged, -10.0);
        for _ in 0..10 {
            let _ = machine.process_block(&block(1.0), 1.0, &avg).unwrap();
        }
        assert!(machine.center_avg_lin() > 0.0);
        // One block in Peak mode wipes the EMA before judging.
        let peak = params(DetectorMode::Peak, 10.0);
        let _ = machine.process_block(&block(1e-4), 1e-4, &peak).unwrap();
        // Back to Averaged: state restarts from zero, as if freshly armed.
        let _ = machine.process_block(&block(1e-4), 1e-4, &avg).unwrap();
        assert!(machine.center_avg_lin() < 1e-2);
    }

    #[test]
    fn test_zero_band_reads_minus_120_db() {
        let mut machine = TriggerMachine::new();
        machine.arm(0.001, 0.001, RATE);
        let (status, _) = machine
            .process_block(&block(0.0), 0.0, &params(DetectorMode::Peak, -20.0))
            .unwrap();
        assert!((status.center_db + 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_above_resets_below_streak() {
        let mut machine = TriggerMachine::new();
        machine.arm(0.001, 0.003, RATE);
        let p = params(DetectorMode::Peak, -20.0);
        let _ = machine.process_block(&block(0.5), 0.5, &p).unwrap();
        assert!(machine.is_capturing());
        // Two quiet blocks, then a loud one: the post countdown restarts.
        let _ = machine.process_block(&block(1e-4), 1e-4, &p).unwrap();
        let _ = machine.process_block(&block(1e-4), 1e-4, &p).unwrap();
        let _ = machine.process_block(&block(0.5), 0.5, &p).unwrap();
        let _ = machine.process_block(&block(1e-4), 1e-4, &p).unwrap();
        let (_, event) = machine.process_block(&block(1e-4), 1e-4, &p).unwrap();
        assert!(event.is_none(), "post quiet must be consecutive");
        assert!(machine.is_capturing());
    }

    #[test]
    fn test_rate_change_does_not_resize_ring_mid_armed() {
        let mut machine = TriggerMachine::new();
        machine.arm(0.002, 0.001, RATE); // 2000-sample ring
        let mut p = params(DetectorMode::Peak, -20.0);
        // A faster rate arriving mid-session must not touch the ring;
        // sizing belongs to the next arm.
        p.sample_rate = RATE * 4.0;
        for _ in 0..10 {
            let _ = machine.process_block(&block(1e-4), 1e-4, &p).unwrap();
        }
        assert_eq!(machine.ring_len(), 2000);
    }

    #[test]
    fn test_cancel_mid_capture_discards() {
        let mut machine = TriggerMachine::new();
        machine.arm(0.001, 0.1, RATE);
        let p = params(DetectorMode::Peak, -20.0);
        let _ = machine.process_block(&block(0.5), 0.5, &p).unwrap();
        assert!(machine.is_capturing());
        machine.cancel();
        assert_eq!(machine.state(), TriggerState::Idle);
        assert_eq!(machine.total_since_arm(), 0);
    }
}
