//! SDR device abstraction
//!
//! Narrow trait seams between the pipelines and the hardware. The pipelines
//! only ever see `RxDevice`/`TxDevice`; the vendor integration lives behind
//! these traits (see the `soapy` module) and tests substitute simulation
//! devices. Openers are injected so a pipeline can retry device bring-up
//! without knowing what it is opening.

use std::time::Duration;

use wavetrap_core::types::IQSample;

/// Result type for device operations.
pub type SdrResult<T> = Result<T, SdrError>;

/// Errors that can occur at the device boundary.
#[derive(Debug, thiserror::Error)]
pub enum SdrError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("hardware error: {0}")]
    HardwareError(String),

    #[error("timeout waiting for {0}")]
    Timeout(&'static str),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Driver identifier of the receive radio.
pub const RTLSDR_DRIVER: &str = "rtlsdr";
/// Driver identifier of the transmit radio.
pub const HACKRF_DRIVER: &str = "hackrf";

/// One enumerated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Driver name (e.g. "rtlsdr", "hackrf").
    pub driver: String,
    /// Device serial number, possibly empty.
    pub serial: String,
    /// Human-readable label.
    pub label: String,
}

/// A receive stream with tuner control.
pub trait RxDevice: Send {
    /// Tune center frequency and sample rate.
    fn tune(&mut self, center_hz: f64, sample_rate_hz: f64) -> SdrResult<()>;

    /// Apply manual gain; implementations keep AGC off.
    fn set_gain_db(&mut self, gain_db: f64) -> SdrResult<()>;

    /// Read samples into `buf`, waiting at most `timeout`.
    ///
    /// Returns the number of samples delivered, which may be short.
    /// A timeout with no data is `Err(SdrError::Timeout)`.
    fn read(&mut self, buf: &mut [IQSample], timeout: Duration) -> SdrResult<usize>;

    // Optional capabilities, used by the recorder tool. Devices that do
    // not implement them report `Unsupported`.

    /// Switch hardware AGC on or off.
    fn set_agc(&mut self, enabled: bool) -> SdrResult<()> {
        let _ = enabled;
        Err(SdrError::Unsupported("agc".to_string()))
    }

    /// Set the analog RX filter bandwidth.
    fn set_bandwidth(&mut self, bandwidth_hz: f64) -> SdrResult<()> {
        let _ = bandwidth_hz;
        Err(SdrError::Unsupported("rx bandwidth".to_string()))
    }

    /// Apply a frequency correction in parts per million.
    fn set_freq_correction_ppm(&mut self, ppm: f64) -> SdrResult<()> {
        let _ = ppm;
        Err(SdrError::Unsupported("frequency correction".to_string()))
    }

    /// Enable or disable automatic DC offset removal.
    fn set_dc_offset_mode(&mut self, automatic: bool) -> SdrResult<()> {
        let _ = automatic;
        Err(SdrError::Unsupported("dc offset mode".to_string()))
    }

    /// Tune with a local-oscillator offset on subsequent `tune` calls.
    fn set_lo_offset_hz(&mut self, offset_hz: f64) -> SdrResult<()> {
        let _ = offset_hz;
        Err(SdrError::Unsupported("lo offset".to_string()))
    }
}

/// A transmit stream with tuner, filter and gain control.
pub trait TxDevice: Send {
    /// Tune center frequency and sample rate.
    fn tune(&mut self, center_hz: f64, sample_rate_hz: f64) -> SdrResult<()>;

    /// Set the analog baseband filter bandwidth.
    fn set_bandwidth(&mut self, bandwidth_hz: f64) -> SdrResult<()>;

    /// Enable or disable the output amplifier.
    fn set_amp_enabled(&mut self, enabled: bool) -> SdrResult<()>;

    /// Set the TX VGA gain in dB.
    fn set_vga_gain(&mut self, gain_db: f64) -> SdrResult<()>;

    /// Write samples, waiting at most `timeout` for buffer space.
    ///
    /// Returns the number of samples accepted.
    fn write(&mut self, buf: &[IQSample], timeout: Duration) -> SdrResult<usize>;
}

/// Factory closure handed to a pipeline; called until it yields a device.
pub type RxOpener = Box<dyn FnMut() -> SdrResult<Box<dyn RxDevice>> + Send>;
/// Factory closure for the transmit side.
pub type TxOpener = Box<dyn FnMut() -> SdrResult<Box<dyn TxDevice>> + Send>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SdrError::DeviceNotFound("rtlsdr".to_string());
        assert_eq!(err.to_string(), "device not found: rtlsdr");
        let err = SdrError::Timeout("rx stream");
        assert_eq!(err.to_string(), "timeout waiting for rx stream");
    }
}
