//! Spectrum engine
//!
//! Turns blocks of baseband samples into frequency-ordered magnitude
//! spectra at interactive rates:
//!
//! ```text
//! input ─ Hann ─ FFT ─ |X|/(n·G) ─ per-bin EMA ─ clip ─ FFT-shift ─ amps
//!                                                          │
//!                                                          └─ center-band peak
//! ```
//!
//! Amplitudes are normalized by the FFT size and the window's coherent gain
//! `G = Σw/n`, so a full-scale tone sitting exactly on a bin reads 1.0
//! regardless of the configured size. The engine owns its FFT plan, window
//! and smoothing state; reconfiguring the size rebuilds all three.

use rustfft::{Fft, FftPlanner};
use std::fmt;
use std::sync::Arc;

use crate::types::IQSample;

/// Smallest accepted FFT size.
pub const MIN_FFT_SIZE: usize = 512;
/// Largest accepted FFT size.
pub const MAX_FFT_SIZE: usize = 8192;

/// Per-bin temporal smoothing factor (lower = more smoothing).
const SMOOTHING_ALPHA: f32 = 0.4;
/// Output magnitudes are clipped here to contain driver glitches.
const AMP_CLIP: f32 = 1.5;
/// Center-band half-width used when the configured span is not positive.
pub const DEFAULT_HALF_SPAN_HZ: f64 = 100_000.0;

/// Clamp a requested FFT size into the supported range.
#[inline]
pub fn clamp_fft_size(n: usize) -> usize {
    n.clamp(MIN_FFT_SIZE, MAX_FFT_SIZE)
}

/// One processed block: shifted magnitudes plus the center-band peak.
#[derive(Debug, Clone)]
pub struct SpectrumBlock {
    /// Smoothed magnitudes, FFT-shifted so bin 0 is −Fs/2 and bin n/2 is DC.
    pub amps: Vec<f32>,
    /// Largest linear magnitude within the center detection window.
    pub center_peak_lin: f32,
}

/// Windowed-FFT magnitude analyzer with temporal smoothing.
pub struct SpectrumEngine {
    size: usize,
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<IQSample>,
    window: Vec<f32>,
    coherent_gain: f32,
    /// Per-bin EMA state, in natural (unshifted) bin order.
    smoothed: Vec<f32>,
    /// In-place FFT work buffer.
    work: Vec<IQSample>,
}

impl fmt::Debug for SpectrumEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumEngine")
            .field("size", &self.size)
            .field("coherent_gain", &self.coherent_gain)
            .finish()
    }
}

impl SpectrumEngine {
    /// Create an engine for the given FFT size (clamped to the valid range).
    pub fn new(fft_size: usize) -> Self {
        let mut engine = Self {
            size: 0,
            fft: FftPlanner::new().plan_fft_forward(MIN_FFT_SIZE),
            scratch: Vec::new(),
            window: Vec::new(),
            coherent_gain: 1.0,
            smoothed: Vec::new(),
            work: Vec::new(),
        };
        engine.configure(fft_size);
        engine
    }

    /// Current FFT size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Coherent gain of the current window.
    pub fn coherent_gain(&self) -> f32 {
        self.coherent_gain
    }

    /// Rebuild window, FFT plan and smoothing state for a new size.
    ///
    /// The requested size is clamped to `[512, 8192]`; resizing resets the
    /// temporal smoothing state.
    pub fn configure(&mut self, fft_size: usize) {
        let n = clamp_fft_size(fft_size);
        let mut planner = FftPlanner::new();
        self.fft = planner.plan_fft_forward(n);
        self.scratch = vec![IQSample::new(0.0, 0.0); self.fft.get_inplace_scratch_len()];

        // Hann window and its coherent gain, accumulated in f64.
        let mut sum_w = 0.0_f64;
        self.window = (0..n)
            .map(|i| {
                let w = 0.5
                    * (1.0
                        - (2.0 * std::f32::consts::PI * i as f32 / (n - 1) as f32).cos());
                sum_w += w as f64;
                w
            })
            .collect();
        self.coherent_gain = (sum_w / n as f64) as f32;

        self.smoothed = vec![0.0; n];
        self.work = vec![IQSample::new(0.0, 0.0); n];
        self.size = n;
    }

    /// Process one block of exactly `size()` samples.
    ///
    /// Returns the shifted magnitude vector and the linear peak within
    /// `±max(2, ⌈half_span/(Fs/n)⌉)` bins of the center. A non-positive
    /// `half_span_hz` falls back to [`DEFAULT_HALF_SPAN_HZ`].
    pub fn process(
        &mut self,
        input: &[IQSample],
        half_span_hz: f64,
        sample_rate: f64,
    ) -> SpectrumBlock {
        let n = self.size;
        debug_assert_eq!(input.len(), n, "block length must equal the FFT size");

        for (dst, (&x, &w)) in self.work.iter_mut().zip(input.iter().zip(&self.window)) {
            *dst = x * w;
        }
        self.fft.process_with_scratch(&mut self.work, &mut self.scratch);

        let scale = 1.0 / (n as f32 * self.coherent_gain.max(1e-9));
        for (s, x) in self.smoothed.iter_mut().zip(&self.work) {
            let a = x.norm() * scale;
            *s = SMOOTHING_ALPHA * a + (1.0 - SMOOTHING_ALPHA) * *s;
        }

        // Shift so bin 0 is −Fs/2; clip output only, the EMA state stays raw.
        let half = n / 2;
        let amps: Vec<f32> = (0..n)
            .map(|i| self.smoothed[(i + half) % n].min(AMP_CLIP))
            .collect();

        let center_peak_lin = center_band_peak(&amps, half_span_hz, sample_rate);
        SpectrumBlock {
            amps,
            center_peak_lin,
        }
    }
}

/// Peak magnitude over the detection window around the center bin of a
/// shifted spectrum.
pub fn center_band_peak(shifted: &[f32], half_span_hz: f64, sample_rate: f64) -> f32 {
    let n = shifted.len();
    if n == 0 {
        return 0.0;
    }
    let half = n / 2;
    let bin_hz = sample_rate / n as f64;

    let mut win_bins = 2usize;
    if bin_hz > 0.0 {
        let span = if half_span_hz > 0.0 {
            half_span_hz
        } else {
            DEFAULT_HALF_SPAN_HZ
        };
        win_bins = ((span / bin_hz).ceil() as usize).max(2);
        win_bins = win_bins.min(half.saturating_sub(1));
    }

    let start = half.saturating_sub(win_bins);
    let end = (half + win_bins).min(n - 1);
    shifted[start..=end].iter().fold(0.0_f32, |m, &a| m.max(a))
}
