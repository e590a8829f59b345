//! Device presence monitor
//!
//! Polls a device enumeration function and reports when the two radios the
//! console needs (an RTL-SDR receiver and a HackRF transmitter) appear or
//! disappear. Only edge transitions produce output, so a steady state never
//! spams the log or the event stream. Polling cadence is the caller's
//! business; the console uses 2 s.

use crate::device::{DeviceInfo, HACKRF_DRIVER, RTLSDR_DRIVER};

/// Presence of the two required radios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DevicePresence {
    pub rtlsdr: bool,
    pub hackrf: bool,
}

impl DevicePresence {
    /// Both radios present; the console may open the main pipelines.
    pub fn both_ready(&self) -> bool {
        self.rtlsdr && self.hackrf
    }
}

/// Debounced presence watcher over a pluggable enumerator.
///
/// The enumerator returns whatever devices are visible right now; an
/// enumeration failure is expressed as an empty list and is never fatal.
pub struct DeviceMonitor<F> {
    enumerate: F,
    last: DevicePresence,
}

impl<F> DeviceMonitor<F>
where
    F: FnMut() -> Vec<DeviceInfo>,
{
    /// Create a monitor starting from "nothing present".
    pub fn new(enumerate: F) -> Self {
        Self {
            enumerate,
            last: DevicePresence::default(),
        }
    }

    /// Enumerate once. Returns the new presence pair only on an edge.
    pub fn poll(&mut self) -> Option<DevicePresence> {
        let devices = (self.enumerate)();
        let current = DevicePresence {
            rtlsdr: devices.iter().any(|d| d.driver == RTLSDR_DRIVER),
            hackrf: devices.iter().any(|d| d.driver == HACKRF_DRIVER),
        };
        if current != self.last {
            self.last = current;
            tracing::info!(
                rtlsdr = current.rtlsdr,
                hackrf = current.hackrf,
                "device presence changed"
            );
            Some(current)
        } else {
            None
        }
    }

    /// Last reported presence pair.
    pub fn presence(&self) -> DevicePresence {
        self.last
    }

    /// True when both radios were present at the last poll.
    pub fn both_ready(&self) -> bool {
        self.last.both_ready()
    }
}
