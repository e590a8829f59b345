//! # Wavetrap device layer and pipelines
//!
//! Everything between the DSP core and the radios:
//!
//! - **Device abstraction**: `RxDevice`/`TxDevice` trait seams with a
//!   SoapySDR-backed implementation behind the `soapy` feature and
//!   simulation devices for tests
//! - **Presence monitor**: debounced rtlsdr/hackrf detection with edge
//!   events
//! - **Capture sink**: spool and final capture file ownership, atomic
//!   finalization
//! - **Control plane**: lock-free parameter inbox, newest-wins frame/status
//!   slots, discrete event queue, pipeline lifecycle
//! - **RX/TX pipelines**: the two long-lived worker threads
//!
//! ## Concurrency model
//!
//! Two workers plus the caller's thread. Each worker exclusively owns its
//! device handle, FFT state, ring and files; all cross-thread state lives
//! in the control plane as independent atomic scalars or queues. Workers
//! block only on bounded device reads/writes.

pub mod capture_sink;
pub mod control;
pub mod device;
pub mod monitor;
pub mod rx;
pub mod sim;
pub mod soapy;
pub mod tx;

pub use capture_sink::{CaptureSink, DEFAULT_CAPTURE_DIR};
pub use control::{ControlPlane, PipelineEvent, RxParams, SpectrumFrame, TxParams};
pub use device::{
    DeviceInfo, RxDevice, RxOpener, SdrError, SdrResult, TxDevice, TxOpener, HACKRF_DRIVER,
    RTLSDR_DRIVER,
};
pub use monitor::{DeviceMonitor, DevicePresence};
pub use rx::RxPipeline;
pub use tx::TxPipeline;
