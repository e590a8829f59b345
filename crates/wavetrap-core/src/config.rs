//! Pipeline configuration
//!
//! Plain parameter structs for the receive and transmit pipelines. Defaults
//! match the console's stock 433 MHz setup. Validation happens at the
//! setters (the control plane rejects a bad value and keeps the previous
//! one), so these structs themselves always hold what the caller asked for.

use serde::{Deserialize, Serialize};

use crate::trigger::DetectorMode;

/// Lowest accepted TX level.
pub const MIN_TARGET_DBFS: f64 = -80.0;
/// Highest accepted TX level (full scale).
pub const MAX_TARGET_DBFS: f64 = 0.0;
/// TX VGA gain range in dB.
pub const TX_GAIN_RANGE_DB: (f64, f64) = (0.0, 47.0);
/// Smallest accepted TX noise half-span.
pub const TX_MIN_HALF_SPAN_HZ: f64 = 100.0;
/// Largest accepted TX half-span as a fraction of the sample rate.
pub const TX_MAX_HALF_SPAN_FRACTION: f64 = 0.45;

/// A rejected configuration value. The previous value stays in effect.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("`{field}` out of range: {value} (allowed {allowed})")]
pub struct ConfigError {
    pub field: &'static str,
    pub value: f64,
    pub allowed: &'static str,
}

impl ConfigError {
    pub fn new(field: &'static str, value: f64, allowed: &'static str) -> Self {
        Self {
            field,
            value,
            allowed,
        }
    }
}

/// Receive pipeline parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RxConfig {
    /// RF center frequency in Hz.
    pub center_hz: f64,
    /// Sample rate in Hz.
    pub sample_rate_hz: f64,
    /// Tuner gain in dB (AGC stays off).
    pub gain_db: f64,
    /// FFT size; clamped into [512, 8192] by the spectrum engine.
    pub fft_size: usize,
    /// Detector mode for the trigger.
    pub detector: DetectorMode,
    /// Trigger threshold in dBFS.
    pub threshold_db: f64,
    /// Detection half-span around center in Hz (≤ 0 means the 100 kHz default).
    pub half_span_hz: f64,
    /// Required continuous above-threshold time in Averaged mode, seconds.
    pub dwell_s: f64,
    /// EMA time constant of the averaged detector, seconds.
    pub avg_tau_s: f64,
    /// Pre-trigger history retained while armed, seconds.
    pub pre_s: f64,
    /// Post-trigger quiet period that finalizes a capture, seconds.
    pub post_s: f64,
}

impl Default for RxConfig {
    fn default() -> Self {
        Self {
            center_hz: 433.81e6,
            sample_rate_hz: 2.6e6,
            gain_db: 40.0,
            fft_size: 4096,
            detector: DetectorMode::Averaged,
            threshold_db: -30.0,
            half_span_hz: 100_000.0,
            dwell_s: 0.02,
            avg_tau_s: 0.20,
            pre_s: 0.2,
            post_s: 0.2,
        }
    }
}

impl RxConfig {
    /// Check ranges that the device or trigger machinery cannot absorb.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.center_hz > 0.0) {
            return Err(ConfigError::new("center_hz", self.center_hz, "> 0"));
        }
        if !(self.sample_rate_hz > 0.0) {
            return Err(ConfigError::new(
                "sample_rate_hz",
                self.sample_rate_hz,
                "> 0",
            ));
        }
        if !(self.gain_db >= 0.0) {
            return Err(ConfigError::new("gain_db", self.gain_db, ">= 0"));
        }
        for (field, value) in [
            ("dwell_s", self.dwell_s),
            ("avg_tau_s", self.avg_tau_s),
            ("pre_s", self.pre_s),
            ("post_s", self.post_s),
        ] {
            if !(value >= 0.0) {
                return Err(ConfigError::new(field, value, ">= 0"));
            }
        }
        if !self.threshold_db.is_finite() {
            return Err(ConfigError::new("threshold_db", self.threshold_db, "finite"));
        }
        Ok(())
    }
}

/// Transmit pipeline parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TxConfig {
    /// RF center frequency in Hz.
    pub center_hz: f64,
    /// Sample rate in Hz.
    pub sample_rate_hz: f64,
    /// Digital noise level in dBFS, within [−80, 0].
    pub target_dbfs: f64,
    /// Noise half-span in Hz, within [100, 0.45·Fs].
    pub half_span_hz: f64,
    /// TX VGA gain in dB, within [0, 47].
    pub gain_db: f64,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            center_hz: 433.95e6,
            sample_rate_hz: 2.6e6,
            target_dbfs: -30.0,
            half_span_hz: 100_000.0,
            gain_db: 25.0,
        }
    }
}

impl TxConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.center_hz > 0.0) {
            return Err(ConfigError::new("center_hz", self.center_hz, "> 0"));
        }
        if !(self.sample_rate_hz > 0.0) {
            return Err(ConfigError::new(
                "sample_rate_hz",
                self.sample_rate_hz,
                "> 0",
            ));
        }
        if !(MIN_TARGET_DBFS..=MAX_TARGET_DBFS).contains(&self.target_dbfs) {
            return Err(ConfigError::new(
                "target_dbfs",
                self.target_dbfs,
                "[-80, 0]",
            ));
        }
        let max_span = TX_MAX_HALF_SPAN_FRACTION * self.sample_rate_hz;
        if !(self.half_span_hz >= TX_MIN_HALF_SPAN_HZ && self.half_span_hz <= max_span) {
            return Err(ConfigError::new(
                "half_span_hz",
                self.half_span_hz,
                "[100, 0.45 * sample_rate]",
            ));
        }
        if !(self.gain_db >= TX_GAIN_RANGE_DB.0 && self.gain_db <= TX_GAIN_RANGE_DB.1) {
            return Err(ConfigError::new("gain_db", self.gain_db, "[0, 47]"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        RxConfig::default().validate().unwrap();
        TxConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rx_rejects_nonpositive_rate() {
        let cfg = RxConfig {
            sample_rate_hz: 0.0,
            ..Default::default()
        };
        assert_eq!(cfg.validate().unwrap_err().field, "sample_rate_hz");
    }

    #[test]
    fn test_rx_rejects_negative_times() {
        let cfg = RxConfig {
            pre_s: -0.1,
            ..Default::default()
        };
        assert_eq!(cfg.validate().unwrap_err().field, "pre_s");
    }

    #[test]
    fn test_tx_dbfs_bounds() {
        for (dbfs, ok) in [(-80.0, true), (0.0, true), (-80.1, false), (0.1, false)] {
            let cfg = TxConfig {
                target_dbfs: dbfs,
                ..Default::default()
            };
            assert_eq!(cfg.validate().is_ok(), ok, "dbfs = {dbfs}");
        }
    }

    #[test]
    fn test_tx_half_span_bounds() {
        let base = TxConfig::default();
        let too_small = TxConfig {
            half_span_hz: 50.0,
            ..base
        };
        assert!(too_small.validate().is_err());
        let too_large = TxConfig {
            half_span_hz: 0.5 * base.sample_rate_hz,
            ..base
        };
        assert!(too_large.validate().is_err());
        let at_max = TxConfig {
            half_span_hz: 0.45 * base.sample_rate_hz,
            ..base
        };
        assert!(at_max.validate().is_ok());
    }

    #[test]
    fn test_tx_gain_bounds() {
        let cfg = TxConfig {
            gain_db: 47.5,
            ..Default::default()
        };
        assert_eq!(cfg.validate().unwrap_err().field, "gain_db");
    }
}
