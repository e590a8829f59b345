//! Recorder and replay file formats
//!
//! Three on-disk artifacts are shared with the external record/replay tools:
//!
//! - `*.cf32` — interleaved little-endian f32 (I, Q), no header;
//! - `*.C16` — interleaved little-endian i16 (I, Q); conversion to float
//!   divides by 32768;
//! - metadata — UTF-8 `key=value` lines (LF), recognizing
//!   `center_frequency` and `sample_rate` in integer Hz. Unknown keys are
//!   ignored; a missing required key fails the load.
//!
//! Replay preparation scales the recording's magnitude peak to 0.95 (factor
//! capped at 8×) and pads 100 ms of zeros on both sides so the transmitter
//! ramps cleanly.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::path::Path;

use crate::types::IQSample;

/// Full scale of the C16 integer format.
pub const C16_FULL_SCALE: f32 = 32768.0;

/// Replay peak magnitude target.
pub const REPLAY_PEAK_TARGET: f32 = 0.95;
/// Upper bound on the replay scaling factor.
pub const REPLAY_MAX_SCALE: f32 = 8.0;
/// Zero padding prepended and appended for replay, in seconds.
pub const REPLAY_PAD_SECONDS: f64 = 0.1;

/// Errors from loading or storing recorder artifacts.
#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("metadata is missing required key `{0}`")]
    MissingKey(&'static str),

    #[error("metadata value for `{key}` is invalid: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Recorder sidecar metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecorderMeta {
    /// RF center frequency in Hz.
    pub center_frequency_hz: u64,
    /// Sample rate in Hz.
    pub sample_rate_hz: u32,
}

impl RecorderMeta {
    /// Parse `key=value` metadata text.
    pub fn parse(text: &str) -> Result<Self, RecordingError> {
        let mut center: Option<u64> = None;
        let mut rate: Option<u32> = None;
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key.trim() {
                "center_frequency" => {
                    center = Some(value.trim().parse().map_err(|_| {
                        RecordingError::InvalidValue {
                            key: "center_frequency",
                            value: value.trim().to_string(),
                        }
                    })?);
                }
                "sample_rate" => {
                    rate = Some(value.trim().parse().map_err(|_| {
                        RecordingError::InvalidValue {
                            key: "sample_rate",
                            value: value.trim().to_string(),
                        }
                    })?);
                }
                // Unknown keys are ignored on purpose.
                _ => {}
            }
        }
        let center_frequency_hz =
            center.ok_or(RecordingError::MissingKey("center_frequency"))?;
        let sample_rate_hz = rate.ok_or(RecordingError::MissingKey("sample_rate"))?;
        if center_frequency_hz == 0 {
            return Err(RecordingError::InvalidValue {
                key: "center_frequency",
                value: "0".to_string(),
            });
        }
        if sample_rate_hz == 0 {
            return Err(RecordingError::InvalidValue {
                key: "sample_rate",
                value: "0".to_string(),
            });
        }
        Ok(Self {
            center_frequency_hz,
            sample_rate_hz,
        })
    }

    /// Load metadata from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RecordingError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Write metadata in the canonical `key=value` form.
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writeln!(writer, "center_frequency={}", self.center_frequency_hz)?;
        writeln!(writer, "sample_rate={}", self.sample_rate_hz)?;
        Ok(())
    }

    /// Save metadata to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = std::fs::File::create(path)?;
        self.write(io::BufWriter::new(file))
    }
}

/// Read interleaved LE i16 I/Q samples to the end of the stream.
pub fn read_c16<R: Read>(mut reader: R) -> io::Result<Vec<IQSample>> {
    let mut samples = Vec::new();
    loop {
        let i = match reader.read_i16::<LittleEndian>() {
            Ok(v) => v,
            Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };
        let q = match reader.read_i16::<LittleEndian>() {
            Ok(v) => v,
            Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };
        samples.push(IQSample::new(
            i as f32 / C16_FULL_SCALE,
            q as f32 / C16_FULL_SCALE,
        ));
    }
    Ok(samples)
}

/// Write samples as interleaved LE i16, clamped to the integer range.
pub fn write_c16<W: Write>(mut writer: W, samples: &[IQSample]) -> io::Result<()> {
    for s in samples {
        let i = (s.re * (C16_FULL_SCALE - 1.0)).clamp(i16::MIN as f32, i16::MAX as f32);
        let q = (s.im * (C16_FULL_SCALE - 1.0)).clamp(i16::MIN as f32, i16::MAX as f32);
        writer.write_i16::<LittleEndian>(i as i16)?;
        writer.write_i16::<LittleEndian>(q as i16)?;
    }
    Ok(())
}

/// Read interleaved LE f32 I/Q samples to the end of the stream.
pub fn read_cf32<R: Read>(mut reader: R) -> io::Result<Vec<IQSample>> {
    let mut samples = Vec::new();
    loop {
        let i = match reader.read_f32::<LittleEndian>() {
            Ok(v) => v,
            Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };
        let q = match reader.read_f32::<LittleEndian>() {
            Ok(v) => v,
            Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };
        samples.push(IQSample::new(i, q));
    }
    Ok(samples)
}

/// Write samples as interleaved LE f32.
pub fn write_cf32<W: Write>(mut writer: W, samples: &[IQSample]) -> io::Result<()> {
    for s in samples {
        writer.write_f32::<LittleEndian>(s.re)?;
        writer.write_f32::<LittleEndian>(s.im)?;
    }
    Ok(())
}

/// Prepare a recording for replay: normalize the magnitude peak to 0.95
/// (scale capped at 8×) and pad 100 ms of zeros at both ends.
pub fn prepare_replay(samples: &[IQSample], sample_rate: f64) -> Vec<IQSample> {
    let peak = samples
        .iter()
        .map(|s| s.norm())
        .fold(0.0_f32, f32::max);
    let mut scale = if peak > 0.0 {
        REPLAY_PEAK_TARGET / peak
    } else {
        1.0
    };
    if scale > REPLAY_MAX_SCALE {
        scale = REPLAY_MAX_SCALE;
    }

    let pad = (sample_rate * REPLAY_PAD_SECONDS) as usize;
    let mut out = Vec::with_capacity(samples.len() + 2 * pad);
    out.resize(pad, IQSample::new(0.0, 0.0));
    out.extend(samples.iter().map(|s| *s * scale));
    out.resize(out.len() + pad, IQSample::new(0.0, 0.0));
    out
}
