//! Simulation devices
//!
//! Software stand-ins for the radios, used by the integration tests and as
//! a hardware-free backend. The RX side reads from a [`SampleFeed`] the test
//! refills at its own pace; the TX side collects everything written so the
//! transmitted waveform can be inspected.
//!
//! The RX feed only hands out whole blocks: a partial block would be
//! consumed-but-discarded by the pipeline (short reads skip the FFT), which
//! would make tests nondeterministic.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wavetrap_core::types::IQSample;

use crate::device::{RxDevice, SdrError, SdrResult, TxDevice};

/// Shared sample source for [`SimRxDevice`].
#[derive(Debug, Default)]
pub struct SampleFeed {
    queue: Mutex<VecDeque<IQSample>>,
}

impl SampleFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append samples for the receiver to consume.
    pub fn push(&self, samples: &[IQSample]) {
        self.queue.lock().unwrap().extend(samples.iter().copied());
    }

    /// Samples currently queued.
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pop_block(&self, buf: &mut [IQSample]) -> bool {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() < buf.len() {
            return false;
        }
        for slot in buf.iter_mut() {
            *slot = queue.pop_front().unwrap();
        }
        true
    }
}

/// Receive device fed from a [`SampleFeed`].
pub struct SimRxDevice {
    feed: Arc<SampleFeed>,
    tuned: Option<(f64, f64)>,
    gain_db: Option<f64>,
}

impl SimRxDevice {
    pub fn new(feed: Arc<SampleFeed>) -> Self {
        Self {
            feed,
            tuned: None,
            gain_db: None,
        }
    }

    /// Last applied (center, rate), if any.
    pub fn tuned(&self) -> Option<(f64, f64)> {
        self.tuned
    }
}

impl RxDevice for SimRxDevice {
    fn tune(&mut self, center_hz: f64, sample_rate_hz: f64) -> SdrResult<()> {
        self.tuned = Some((center_hz, sample_rate_hz));
        Ok(())
    }

    fn set_gain_db(&mut self, gain_db: f64) -> SdrResult<()> {
        self.gain_db = Some(gain_db);
        Ok(())
    }

    fn read(&mut self, buf: &mut [IQSample], _timeout: Duration) -> SdrResult<usize> {
        if self.feed.pop_block(buf) {
            Ok(buf.len())
        } else {
            // Starved: pace the caller like a real blocking read would.
            std::thread::sleep(Duration::from_millis(1));
            Err(SdrError::Timeout("rx samples"))
        }
    }
}

/// Everything a [`SimTxDevice`] was asked to do.
#[derive(Debug, Default)]
pub struct TxLog {
    pub tuned: Option<(f64, f64)>,
    pub bandwidth_hz: Option<f64>,
    pub amp_enabled: Option<bool>,
    pub vga_gain_db: Option<f64>,
    pub written: Vec<IQSample>,
}

/// Transmit device that records writes into a shared log.
pub struct SimTxDevice {
    log: Arc<Mutex<TxLog>>,
}

impl SimTxDevice {
    /// Create a device and the log handle for inspecting it.
    pub fn new() -> (Self, Arc<Mutex<TxLog>>) {
        let log = Arc::new(Mutex::new(TxLog::default()));
        (Self { log: log.clone() }, log)
    }

    pub fn with_log(log: Arc<Mutex<TxLog>>) -> Self {
        Self { log }
    }
}

impl TxDevice for SimTxDevice {
    fn tune(&mut self, center_hz: f64, sample_rate_hz: f64) -> SdrResult<()> {
        self.log.lock().unwrap().tuned = Some((center_hz, sample_rate_hz));
        Ok(())
    }

    fn set_bandwidth(&mut self, bandwidth_hz: f64) -> SdrResult<()> {
        self.log.lock().unwrap().bandwidth_hz = Some(bandwidth_hz);
        Ok(())
    }

    fn set_amp_enabled(&mut self, enabled: bool) -> SdrResult<()> {
        self.log.lock().unwrap().amp_enabled = Some(enabled);
        Ok(())
    }

    fn set_vga_gain(&mut self, gain_db: f64) -> SdrResult<()> {
        self.log.lock().unwrap().vga_gain_db = Some(gain_db);
        Ok(())
    }

    fn write(&mut self, buf: &[IQSample], _timeout: Duration) -> SdrResult<usize> {
        let mut log = self.log.lock().unwrap();
        log.written.extend_from_slice(buf);
        // Pace the writer so a test doesn't accumulate samples unboundedly.
        drop(log);
        std::thread::sleep(Duration::from_micros(200));
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_delivers_whole_blocks_only() {
        let feed = SampleFeed::new();
        let mut dev = SimRxDevice::new(feed.clone());
        let mut buf = vec![IQSample::new(0.0, 0.0); 8];

        feed.push(&vec![IQSample::new(1.0, 0.0); 5]);
        assert!(matches!(
            dev.read(&mut buf, Duration::from_millis(1)),
            Err(SdrError::Timeout(_))
        ));

        feed.push(&vec![IQSample::new(1.0, 0.0); 3]);
        assert_eq!(dev.read(&mut buf, Duration::from_millis(1)).unwrap(), 8);
        assert!(feed.is_empty());
    }

    #[test]
    fn test_tx_log_records_everything() {
        let (mut dev, log) = SimTxDevice::new();
        dev.tune(434e6, 2.6e6).unwrap();
        dev.set_bandwidth(200_000.0).unwrap();
        dev.set_amp_enabled(true).unwrap();
        dev.set_vga_gain(25.0).unwrap();
        dev.write(&[IQSample::new(0.5, -0.5)], Duration::from_millis(1))
            .unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.tuned, Some((434e6, 2.6e6)));
        assert_eq!(log.bandwidth_hz, Some(200_000.0));
        assert_eq!(log.amp_enabled, Some(true));
        assert_eq!(log.vga_gain_db, Some(25.0));
        assert_eq!(log.written.len(), 1);
    }
}
