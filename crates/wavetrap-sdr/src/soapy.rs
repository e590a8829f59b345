//! SoapySDR-backed devices
//!
//! The vendor integration: an RTL-SDR receive stream and a HackRF transmit
//! stream, both reached through SoapySDR. This module is the only place
//! vendor errors exist; everything is converted to [`SdrError`] at the
//! boundary.
//!
//! Compiled only with the `soapy` feature. Without it the openers return
//! `DeviceNotFound` and enumeration sees nothing, so the rest of the stack
//! (and every test) runs with no system libraries installed.
//!
//! Per-element gain handling mirrors the quirks of real driver stacks: AGC
//! is switched off through both the gain mode and the `rtl_agc`/`tuner_agc`
//! settings, then gain is applied best-effort to the `LNA` and `TUNER`
//! elements and finally to the aggregate — whichever of those the driver
//! actually implements wins.

use crate::device::{DeviceInfo, RxOpener, SdrResult, TxOpener};

#[cfg(feature = "soapy")]
mod hw {
    use std::time::Duration;

    use soapysdr::Direction;
    use wavetrap_core::types::IQSample;

    use crate::device::{
        DeviceInfo, RxDevice, SdrError, SdrResult, TxDevice, HACKRF_DRIVER, RTLSDR_DRIVER,
    };

    fn to_sdr_error(e: soapysdr::Error) -> SdrError {
        match e.code {
            soapysdr::ErrorCode::Timeout => SdrError::Timeout("soapy stream"),
            _ => SdrError::HardwareError(e.to_string()),
        }
    }

    /// Enumerate all SoapySDR-visible devices.
    pub fn enumerate_devices() -> Vec<DeviceInfo> {
        match soapysdr::enumerate("") {
            Ok(found) => found
                .into_iter()
                .map(|args| DeviceInfo {
                    driver: args.get("driver").unwrap_or_default().to_string(),
                    serial: args.get("serial").unwrap_or_default().to_string(),
                    label: args.get("label").unwrap_or_default().to_string(),
                })
                .collect(),
            Err(e) => {
                // Enumeration trouble means "no devices", never a fault.
                tracing::debug!(error = %e, "soapy enumeration failed");
                Vec::new()
            }
        }
    }

    pub struct SoapyRxDevice {
        dev: soapysdr::Device,
        stream: soapysdr::RxStream<IQSample>,
        lo_offset_hz: f64,
    }

    impl SoapyRxDevice {
        pub fn open() -> SdrResult<Self> {
            Self::open_with_args(&format!("driver={RTLSDR_DRIVER}"))
        }

        /// Open with explicit SoapySDR kwargs (`driver=rtlsdr,serial=...`).
        pub fn open_with_args(args: &str) -> SdrResult<Self> {
            let dev = soapysdr::Device::new(args)
                .map_err(|e| SdrError::DeviceNotFound(e.to_string()))?;
            let mut stream = dev
                .rx_stream::<IQSample>(&[0])
                .map_err(to_sdr_error)?;
            stream.activate(None).map_err(to_sdr_error)?;
            tracing::info!(args, "rx device opened, stream active");
            Ok(Self {
                dev,
                stream,
                lo_offset_hz: 0.0,
            })
        }
    }

    impl RxDevice for SoapyRxDevice {
        fn tune(&mut self, center_hz: f64, sample_rate_hz: f64) -> SdrResult<()> {
            self.dev
                .set_sample_rate(Direction::Rx, 0, sample_rate_hz)
                .map_err(to_sdr_error)?;
            if self.lo_offset_hz.abs() > 0.0 {
                let args = format!("OFFSET={}", self.lo_offset_hz as i64);
                self.dev
                    .set_frequency(Direction::Rx, 0, center_hz, args.as_str())
                    .map_err(to_sdr_error)?;
            } else {
                self.dev
                    .set_frequency(Direction::Rx, 0, center_hz, ())
                    .map_err(to_sdr_error)?;
            }
            Ok(())
        }

        fn set_gain_db(&mut self, gain_db: f64) -> SdrResult<()> {
            // Manual mode, with the RTL-specific AGC knobs off too.
            let _ = self.dev.set_gain_mode(Direction::Rx, 0, false);
            let _ = self.dev.write_setting("rtl_agc", "false");
            let _ = self.dev.write_setting("tuner_agc", "false");
            // Named elements first, aggregate as the fallback; each is
            // best-effort because drivers disagree on what exists.
            let _ = self.dev.set_gain_element(Direction::Rx, 0, "LNA", gain_db);
            let _ = self
                .dev
                .set_gain_element(Direction::Rx, 0, "TUNER", gain_db);
            let _ = self.dev.set_gain(Direction::Rx, 0, gain_db);
            Ok(())
        }

        fn read(&mut self, buf: &mut [IQSample], timeout: Duration) -> SdrResult<usize> {
            self.stream
                .read(&mut [buf], timeout.as_micros() as i64)
                .map_err(to_sdr_error)
        }

        fn set_agc(&mut self, enabled: bool) -> SdrResult<()> {
            self.dev
                .set_gain_mode(Direction::Rx, 0, enabled)
                .map_err(to_sdr_error)?;
            let _ = self
                .dev
                .write_setting("rtl_agc", if enabled { "true" } else { "false" });
            Ok(())
        }

        fn set_bandwidth(&mut self, bandwidth_hz: f64) -> SdrResult<()> {
            self.dev
                .set_bandwidth(Direction::Rx, 0, bandwidth_hz)
                .map_err(to_sdr_error)
        }

        fn set_freq_correction_ppm(&mut self, ppm: f64) -> SdrResult<()> {
            self.dev
                .set_frequency_correction(Direction::Rx, 0, ppm)
                .map_err(to_sdr_error)
        }

        fn set_dc_offset_mode(&mut self, automatic: bool) -> SdrResult<()> {
            self.dev
                .set_dc_offset_mode(Direction::Rx, 0, automatic)
                .map_err(to_sdr_error)
        }

        fn set_lo_offset_hz(&mut self, offset_hz: f64) -> SdrResult<()> {
            self.lo_offset_hz = offset_hz;
            Ok(())
        }
    }

    pub struct SoapyTxDevice {
        dev: soapysdr::Device,
        stream: soapysdr::TxStream<IQSample>,
    }

    impl SoapyTxDevice {
        pub fn open() -> SdrResult<Self> {
            let dev = soapysdr::Device::new(format!("driver={HACKRF_DRIVER}").as_str())
                .map_err(|e| SdrError::DeviceNotFound(e.to_string()))?;
            let mut stream = dev
                .tx_stream::<IQSample>(&[0])
                .map_err(to_sdr_error)?;
            stream.activate(None).map_err(to_sdr_error)?;
            tracing::info!("hackrf opened, tx stream active");
            Ok(Self { dev, stream })
        }
    }

    impl TxDevice for SoapyTxDevice {
        fn tune(&mut self, center_hz: f64, sample_rate_hz: f64) -> SdrResult<()> {
            self.dev
                .set_sample_rate(Direction::Tx, 0, sample_rate_hz)
                .map_err(to_sdr_error)?;
            self.dev
                .set_frequency(Direction::Tx, 0, center_hz, ())
                .map_err(to_sdr_error)?;
            Ok(())
        }

        fn set_bandwidth(&mut self, bandwidth_hz: f64) -> SdrResult<()> {
            self.dev
                .set_bandwidth(Direction::Tx, 0, bandwidth_hz)
                .map_err(to_sdr_error)
        }

        fn set_amp_enabled(&mut self, enabled: bool) -> SdrResult<()> {
            let level = if enabled { 1.0 } else { 0.0 };
            // HackRF builds disagree on the element name.
            if self
                .dev
                .set_gain_element(Direction::Tx, 0, "AMP", level)
                .is_err()
            {
                let _ = self.dev.set_gain_element(Direction::Tx, 0, "PA", level);
            }
            Ok(())
        }

        fn set_vga_gain(&mut self, gain_db: f64) -> SdrResult<()> {
            self.dev
                .set_gain_element(Direction::Tx, 0, "VGA", gain_db)
                .map_err(to_sdr_error)
        }

        fn write(&mut self, buf: &[IQSample], timeout: Duration) -> SdrResult<usize> {
            self.stream
                .write(&[buf], None, false, timeout.as_micros() as i64)
                .map_err(to_sdr_error)
        }
    }
}

/// Enumerate SoapySDR devices; empty without the `soapy` feature.
pub fn enumerate_devices() -> Vec<DeviceInfo> {
    #[cfg(feature = "soapy")]
    {
        hw::enumerate_devices()
    }
    #[cfg(not(feature = "soapy"))]
    {
        Vec::new()
    }
}

/// Opener for the RTL-SDR receive device.
pub fn rtlsdr_opener() -> RxOpener {
    Box::new(|| -> SdrResult<Box<dyn crate::device::RxDevice>> {
        #[cfg(feature = "soapy")]
        {
            Ok(Box::new(hw::SoapyRxDevice::open()?))
        }
        #[cfg(not(feature = "soapy"))]
        {
            Err(crate::device::SdrError::DeviceNotFound(
                "SoapySDR support not compiled in; enable the `soapy` feature".to_string(),
            ))
        }
    })
}

/// Opener for a receive device selected by explicit SoapySDR kwargs
/// (`k=v[,k=v]`; `driver=rtlsdr` is assumed when absent).
pub fn rx_opener_with_args(kwargs: String) -> RxOpener {
    Box::new(move || -> SdrResult<Box<dyn crate::device::RxDevice>> {
        #[cfg(feature = "soapy")]
        {
            let args = if kwargs.contains("driver=") {
                kwargs.clone()
            } else if kwargs.is_empty() {
                "driver=rtlsdr".to_string()
            } else {
                format!("driver=rtlsdr,{kwargs}")
            };
            Ok(Box::new(hw::SoapyRxDevice::open_with_args(&args)?))
        }
        #[cfg(not(feature = "soapy"))]
        {
            let _ = &kwargs;
            Err(crate::device::SdrError::DeviceNotFound(
                "SoapySDR support not compiled in; enable the `soapy` feature".to_string(),
            ))
        }
    })
}

/// Opener for the HackRF transmit device.
pub fn hackrf_opener() -> TxOpener {
    Box::new(|| -> SdrResult<Box<dyn crate::device::TxDevice>> {
        #[cfg(feature = "soapy")]
        {
            Ok(Box::new(hw::SoapyTxDevice::open()?))
        }
        #[cfg(not(feature = "soapy"))]
        {
            Err(crate::device::SdrError::DeviceNotFound(
                "SoapySDR support not compiled in; enable the `soapy` feature".to_string(),
            ))
        }
    })
}
