//! Band-limited noise synthesis
//!
//! Builds a long cyclic waveform of band-limited complex Gaussian noise by
//! spectral construction: fill the occupied bins of a 2^18-point frequency
//! buffer with i.i.d. standard complex Gaussians, leave a narrow notch
//! around DC, inverse-transform and normalize to RMS 1. The TX pipeline then
//! plays the waveform cyclically and scales each frame to the requested dBFS
//! level, so level changes never require a rebuild.
//!
//! The PRNG is seeded with a fixed constant so the waveform is reproducible
//! across runs and in tests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rustfft::FftPlanner;

use crate::types::IQSample;

/// Cyclic waveform length (~0.1 s at 2.6 Msps).
pub const WAVE_LEN: usize = 1 << 18;

/// Fixed PRNG seed for reproducible waveforms.
pub const NOISE_SEED: u64 = 123_456_789;

/// Width of the spectral notch left empty around DC, in Hz per side.
const NOTCH_HZ: f64 = 1_500.0;

/// Half-span drift that forces a waveform rebuild.
pub const SPAN_REBUILD_TOL_HZ: f64 = 500.0;
/// Sample-rate drift that forces a waveform rebuild.
pub const RATE_REBUILD_TOL_HZ: f64 = 1.0;

/// Cyclic band-limited noise source.
#[derive(Debug)]
pub struct NoiseSynth {
    wave: Vec<IQSample>,
    pos: usize,
    sample_rate: f64,
    half_span_hz: f64,
}

impl NoiseSynth {
    /// Create an empty synthesizer; the first [`ensure`](Self::ensure) call
    /// builds the waveform.
    pub fn new() -> Self {
        Self {
            wave: Vec::new(),
            pos: 0,
            sample_rate: 0.0,
            half_span_hz: 0.0,
        }
    }

    /// True once a waveform has been built.
    pub fn is_built(&self) -> bool {
        !self.wave.is_empty()
    }

    /// Waveform length in samples (0 before the first build).
    pub fn len(&self) -> usize {
        self.wave.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wave.is_empty()
    }

    /// Rebuild the waveform if `(sample_rate, half_span)` drifted beyond
    /// tolerance. Returns true when a rebuild happened.
    pub fn ensure(&mut self, sample_rate: f64, half_span_hz: f64) -> bool {
        if self.is_built()
            && (self.half_span_hz - half_span_hz).abs() <= SPAN_REBUILD_TOL_HZ
            && (self.sample_rate - sample_rate).abs() <= RATE_REBUILD_TOL_HZ
        {
            return false;
        }
        self.rebuild(sample_rate, half_span_hz);
        true
    }

    fn rebuild(&mut self, sample_rate: f64, half_span_hz: f64) {
        let n = WAVE_LEN;
        let bin_hz = sample_rate / n as f64;
        let half_bins = ((half_span_hz / bin_hz).floor() as i64)
            .clamp(1, (n / 2 - 1) as i64) as usize;
        let notch_bins = ((NOTCH_HZ / bin_hz).round().max(0.0)) as usize;

        let mut rng = StdRng::seed_from_u64(NOISE_SEED);
        let mut bins = vec![IQSample::new(0.0, 0.0); n];

        // Positive frequencies [1, half_bins], skipping the DC notch.
        for k in 1..=half_bins {
            if k <= notch_bins {
                continue;
            }
            let re: f32 = rng.sample(StandardNormal);
            let im: f32 = rng.sample(StandardNormal);
            bins[k] = IQSample::new(re, im);
        }
        // Negative frequencies [n − half_bins, n − 1], mirrored notch
        // around DC (bin k sits at −(n − k) bins).
        for k in (n - half_bins)..n {
            if n - k <= notch_bins {
                continue;
            }
            let re: f32 = rng.sample(StandardNormal);
            let im: f32 = rng.sample(StandardNormal);
            bins[k] = IQSample::new(re, im);
        }

        let ifft = FftPlanner::<f32>::new().plan_fft_inverse(n);
        ifft.process(&mut bins);

        // rustfft leaves the inverse unscaled; fold in 1/N and measure power.
        let inv_n = 1.0 / n as f32;
        let mut acc = 0.0_f64;
        for s in bins.iter_mut() {
            *s *= inv_n;
            acc += s.re as f64 * s.re as f64 + s.im as f64 * s.im as f64;
        }
        let rms = (acc / n as f64).sqrt();
        let scale = if rms > 1e-12 { (1.0 / rms) as f32 } else { 1.0 };
        for s in bins.iter_mut() {
            *s *= scale;
        }

        self.wave = bins;
        self.pos = 0;
        self.sample_rate = sample_rate;
        self.half_span_hz = half_span_hz;
        tracing::info!(
            len = n,
            half_span_hz,
            sample_rate,
            occupied_bins = 2 * half_bins.saturating_sub(notch_bins),
            "noise waveform rebuilt"
        );
    }

    /// Copy the next `out.len()` samples from the cyclic waveform, scaled.
    ///
    /// The wrap position persists across calls so playback is continuous.
    pub fn fill(&mut self, out: &mut [IQSample], scale: f32) {
        debug_assert!(self.is_built(), "fill before ensure");
        if self.wave.is_empty() {
            out.fill(IQSample::new(0.0, 0.0));
            return;
        }
        for slot in out.iter_mut() {
            *slot = self.wave[self.pos] * scale;
            self.pos = (self.pos + 1) % self.wave.len();
        }
    }

    /// Sample rate the waveform was built for.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Half-span the waveform was built for.
    pub fn half_span_hz(&self) -> f64 {
        self.half_span_hz
    }
}

impl Default for NoiseSynth {
    fn default() -> Self {
        Self::new()
    }
}
