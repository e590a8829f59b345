//! Core sample types and amplitude helpers
//!
//! Wavetrap represents baseband signals as complex I/Q samples:
//!
//! - **I (in-phase)**: the real component
//! - **Q (quadrature)**: the imaginary component, 90° out of phase
//!
//! All DSP runs in single precision. This matches the on-disk `cf32`
//! capture format (interleaved little-endian f32 pairs) so samples move
//! between the pipeline, files and the transmitter without conversion.

use num_complex::Complex;

/// A single complex baseband sample, single precision.
pub type IQSample = Complex<f32>;

/// A buffer of I/Q samples.
pub type IQBuffer = Vec<IQSample>;

/// Floor applied to linear amplitudes before `log10` so dB values stay finite.
pub const AMP_FLOOR: f32 = 1e-9;

/// Convert a linear full-scale amplitude to dBFS.
///
/// The input is floored at [`AMP_FLOOR`] to bound the result below;
/// 0 dBFS corresponds to unity magnitude.
#[inline]
pub fn amp_to_db(amp: f32) -> f32 {
    20.0 * amp.max(AMP_FLOOR).log10()
}

/// Convert a dBFS level to a linear amplitude.
#[inline]
pub fn db_to_amp(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// RMS magnitude of a block of samples.
pub fn rms(samples: &[IQSample]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    // Accumulate in f64: blocks can be long and f32 sums drift.
    let acc: f64 = samples
        .iter()
        .map(|s| s.re as f64 * s.re as f64 + s.im as f64 * s.im as f64)
        .sum();
    (acc / samples.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_db_round_trip() {
        for db in [-80.0_f32, -30.0, -6.0, 0.0] {
            assert_relative_eq!(amp_to_db(db_to_amp(db)), db, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_unity_is_zero_dbfs() {
        assert_relative_eq!(amp_to_db(1.0), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_amp_floor_bounds_db() {
        let db = amp_to_db(0.0);
        assert!(db.is_finite());
        assert_relative_eq!(db, -180.0, epsilon = 1e-3);
    }

    #[test]
    fn test_rms_unit_circle() {
        let samples: Vec<IQSample> = (0..1000)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / 100.0;
                IQSample::new(phase.cos(), phase.sin())
            })
            .collect();
        assert_relative_eq!(rms(&samples), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_rms_empty() {
        assert_eq!(rms(&[]), 0.0);
    }
}
