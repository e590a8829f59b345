//! # Wavetrap DSP core
//!
//! Device-independent building blocks for the wavetrap SDR console:
//!
//! - **Spectrum analysis**: Hann-windowed FFT magnitudes with coherent-gain
//!   normalization, temporal smoothing and center-band energy extraction
//! - **Event triggering**: an Idle → Armed → Capturing state machine with
//!   averaged/peak detectors, dwell accounting and pre/post buffering
//! - **Noise synthesis**: cyclic band-limited complex Gaussian waveforms
//!   for the transmit pipeline
//! - **Recorder formats**: the cf32/C16/metadata artifacts shared with the
//!   external record and replay tools
//!
//! ## Signal Flow
//!
//! ```text
//! RX: device → window+FFT → (amps, center energy) → trigger → ring/capture
//! TX: noise synth (cyclic) → per-frame dBFS scaling → device
//! ```
//!
//! Everything here is thread-confined: the pipelines in `wavetrap-sdr` own
//! one instance of each engine per worker thread.

pub mod config;
pub mod noise_synth;
pub mod recording;
pub mod ring_buffer;
pub mod spectrum;
pub mod trigger;
pub mod types;

pub use config::{ConfigError, RxConfig, TxConfig};
pub use noise_synth::NoiseSynth;
pub use ring_buffer::RingBuffer;
pub use spectrum::{SpectrumBlock, SpectrumEngine};
pub use trigger::{DetectorMode, TriggerEvent, TriggerMachine, TriggerState, TriggerStatus};
pub use types::{IQBuffer, IQSample};
