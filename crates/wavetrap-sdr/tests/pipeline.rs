//! End-to-end pipeline scenarios over simulation devices.
//!
//! The RX worker consumes a [`SampleFeed`] the test refills, so every
//! scenario drives real thread + trigger + sink machinery and then inspects
//! the capture directory and the event stream.

use std::fs::File;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use wavetrap_core::config::{RxConfig, TxConfig};
use wavetrap_core::recording::read_cf32;
use wavetrap_core::trigger::DetectorMode;
use wavetrap_core::types::IQSample;
use wavetrap_sdr::control::{ControlPlane, PipelineEvent};
use wavetrap_sdr::device::{RxDevice, SdrError, TxDevice};
use wavetrap_sdr::sim::{SampleFeed, SimRxDevice, SimTxDevice};

const RATE: f64 = 1_000_000.0;
const FFT: usize = 1024;
const QUIET: f32 = 1e-3; // −60 dBFS
const TONE: f32 = 0.9;

fn rx_config(detector: DetectorMode, threshold_db: f64) -> RxConfig {
    RxConfig {
        sample_rate_hz: RATE,
        fft_size: FFT,
        detector,
        threshold_db,
        half_span_hz: 100_000.0,
        ..Default::default()
    }
}

fn blocks(count: usize, level: f32) -> Vec<IQSample> {
    vec![IQSample::new(level, 0.0); count * FFT]
}

/// Control plane wired to a feed-backed simulated receiver.
fn rx_plane(dir: &TempDir, cfg: RxConfig) -> (ControlPlane, Arc<SampleFeed>) {
    let mut plane = ControlPlane::new(cfg, TxConfig::default())
        .unwrap()
        .with_capture_dir(dir.path());
    let feed = SampleFeed::new();
    let opener_feed = feed.clone();
    plane
        .start_rx(Box::new(move || {
            Ok(Box::new(SimRxDevice::new(opener_feed.clone())) as Box<dyn RxDevice>)
        }))
        .unwrap();
    (plane, feed)
}

fn wait_event(plane: &ControlPlane, timeout: Duration) -> Option<PipelineEvent> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(event) = plane.poll_event() {
            return Some(event);
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    None
}

fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

fn dir_names(dir: &TempDir) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_quiet_arm_then_cancel_leaves_no_files() {
    let dir = TempDir::new().unwrap();
    let (mut plane, feed) = rx_plane(&dir, rx_config(DetectorMode::Averaged, -30.0));

    plane.arm(0.05, 0.05).unwrap();
    feed.push(&blocks(20, QUIET));

    // Armed status must be observable, and the spool must appear on disk.
    assert!(wait_for(
        || matches!(plane.latest_status(), Some(s) if s.armed && !s.above),
        Duration::from_secs(2)
    ));
    assert!(wait_for(
        || dir_names(&dir).iter().any(|n| n.ends_with(".cf32.part")),
        Duration::from_secs(2)
    ));

    plane.cancel();
    assert!(wait_for(
        || dir_names(&dir).is_empty(),
        Duration::from_secs(2)
    ));
    plane.stop_rx();
    assert!(dir_names(&dir).is_empty(), "cancel must leave no session files");
}

#[test]
fn test_single_peak_trigger_captures_once() {
    let dir = TempDir::new().unwrap();
    let (mut plane, feed) = rx_plane(&dir, rx_config(DetectorMode::Peak, -10.0));

    // pre = post = 10 ms = 10_000 samples at 1 Msps.
    plane.arm(0.01, 0.01).unwrap();
    feed.push(&blocks(20, QUIET));
    feed.push(&blocks(5, TONE));
    feed.push(&blocks(14, QUIET));

    assert_eq!(
        wait_event(&plane, Duration::from_secs(3)),
        Some(PipelineEvent::CaptureStarted)
    );
    let complete = wait_event(&plane, Duration::from_secs(3));
    let path = match complete {
        Some(PipelineEvent::CaptureComplete(path)) => path,
        other => panic!("expected CaptureComplete, got {other:?}"),
    };

    // Exactly one capture: more quiet input must not produce further events.
    feed.push(&blocks(5, QUIET));
    assert_eq!(wait_event(&plane, Duration::from_millis(300)), None);
    plane.stop_rx();

    // One final file, spool gone.
    let names = dir_names(&dir);
    assert_eq!(names.len(), 1, "{names:?}");
    assert!(names[0].ends_with(".cf32"));
    assert!(names[0].contains("_RX433.810_thr-10"));

    // Chronology: quiet prefix, tone run, quiet tail; size is pre-ring fill
    // (10_000, which swallowed the trigger block) + trigger block + 4 tone
    // blocks + 1 above-tail block + 10 quiet blocks of post roll.
    let samples = read_cf32(File::open(&path).unwrap()).unwrap();
    assert_eq!(samples.len(), 10_000 + FFT + 4 * FFT + FFT + 10 * FFT);
    let first_tone = samples.iter().position(|s| s.re > 0.4).unwrap();
    assert_eq!(first_tone, 10_000 - FFT);
    let tone_total = samples.iter().filter(|s| s.re > 0.4).count();
    assert_eq!(tone_total, 6 * FFT);
    assert!(samples[..first_tone].iter().all(|s| s.re < 0.01));
    assert!(samples[samples.len() - 10 * FFT..]
        .iter()
        .all(|s| s.re < 0.01));
}

#[test]
fn test_averaged_dwell_rejects_short_pulse() {
    let dir = TempDir::new().unwrap();
    let cfg = RxConfig {
        dwell_s: 0.1,
        avg_tau_s: 0.2,
        ..rx_config(DetectorMode::Averaged, -10.0)
    };
    let (mut plane, feed) = rx_plane(&dir, cfg);

    plane.arm(0.01, 0.01).unwrap();
    // 50 ms pulse at full scale: with τ = 0.2 s the averaged level peaks
    // near −13 dB and never reaches the −10 dB threshold.
    feed.push(&blocks(20, QUIET));
    feed.push(&blocks(49, 1.0));
    feed.push(&blocks(100, QUIET));

    assert!(wait_for(|| feed.is_empty(), Duration::from_secs(5)));
    assert_eq!(wait_event(&plane, Duration::from_millis(500)), None);

    plane.cancel();
    assert!(wait_for(
        || dir_names(&dir).is_empty(),
        Duration::from_secs(2)
    ));
    plane.stop_rx();
}

#[test]
fn test_sequential_double_capture() {
    let dir = TempDir::new().unwrap();
    let (mut plane, feed) = rx_plane(&dir, rx_config(DetectorMode::Peak, -10.0));

    let expected_len = 5_000 + FFT + 2 * FFT + FFT + 5 * FFT;

    // First burst.
    plane.arm(0.005, 0.005).unwrap();
    feed.push(&blocks(10, QUIET));
    feed.push(&blocks(3, TONE));
    feed.push(&blocks(10, QUIET));
    assert_eq!(
        wait_event(&plane, Duration::from_secs(3)),
        Some(PipelineEvent::CaptureStarted)
    );
    let first = match wait_event(&plane, Duration::from_secs(3)) {
        Some(PipelineEvent::CaptureComplete(path)) => path,
        other => panic!("expected first CaptureComplete, got {other:?}"),
    };

    // Capture names carry the arm time at whole-second resolution; space
    // the sessions out so the two files cannot collide.
    std::thread::sleep(Duration::from_millis(1100));
    plane.arm(0.005, 0.005).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    feed.push(&blocks(10, QUIET));
    feed.push(&blocks(3, TONE));
    feed.push(&blocks(10, QUIET));
    assert_eq!(
        wait_event(&plane, Duration::from_secs(3)),
        Some(PipelineEvent::CaptureStarted)
    );
    let second = match wait_event(&plane, Duration::from_secs(3)) {
        Some(PipelineEvent::CaptureComplete(path)) => path,
        other => panic!("expected second CaptureComplete, got {other:?}"),
    };
    plane.stop_rx();

    assert_ne!(first, second);
    let first_samples = read_cf32(File::open(&first).unwrap()).unwrap();
    let second_samples = read_cf32(File::open(&second).unwrap()).unwrap();
    assert_eq!(first_samples.len(), expected_len);
    assert_eq!(second_samples.len(), expected_len);

    let finals = dir_names(&dir)
        .iter()
        .filter(|n| n.ends_with(".cf32"))
        .count();
    assert_eq!(finals, 2);
}

#[test]
fn test_tx_noise_level_calibration() {
    let mut plane = ControlPlane::new(RxConfig::default(), TxConfig::default()).unwrap();
    plane.set_target_dbfs(-30.0).unwrap();

    let (device, log) = SimTxDevice::new();
    let mut device = Some(device);
    plane
        .start_tx(Box::new(move || match device.take() {
            Some(dev) => Ok(Box::new(dev) as Box<dyn TxDevice>),
            None => Err(SdrError::DeviceNotFound("sim tx already taken".to_string())),
        }))
        .unwrap();

    // ≥ 0.1 s of samples at 2.6 Msps.
    let needed = 262_144;
    assert!(wait_for(
        || log.lock().unwrap().written.len() >= needed,
        Duration::from_secs(10)
    ));
    plane.stop_tx();

    let log = log.lock().unwrap();
    assert_eq!(log.amp_enabled, Some(true));
    assert_eq!(log.vga_gain_db, Some(25.0));
    assert_eq!(log.tuned, Some((433.95e6, 2.6e6)));
    // Baseband filter tracks max(2000, 2 * half_span).
    assert_eq!(log.bandwidth_hz, Some(200_000.0));

    let tail = &log.written[log.written.len() - needed..];
    let rms = wavetrap_core::types::rms(tail);
    let level_db = 20.0 * rms.log10();
    assert!(
        (level_db - (-30.0)).abs() < 0.5,
        "measured {level_db:.2} dBFS, requested -30"
    );
}

#[test]
fn test_device_absence_then_recovery() {
    let dir = TempDir::new().unwrap();
    let mut plane = ControlPlane::new(rx_config(DetectorMode::Peak, -10.0), TxConfig::default())
        .unwrap()
        .with_capture_dir(dir.path());

    let feed = SampleFeed::new();
    feed.push(&blocks(5, QUIET));

    let attempts = Arc::new(AtomicUsize::new(0));
    let opener_attempts = attempts.clone();
    let opener_feed = feed.clone();
    plane
        .start_rx(Box::new(move || {
            // The first polls find nothing plugged in.
            if opener_attempts.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(SdrError::DeviceNotFound("no rtlsdr yet".to_string()))
            } else {
                Ok(Box::new(SimRxDevice::new(opener_feed.clone())) as Box<dyn RxDevice>)
            }
        }))
        .unwrap();

    // No crash while absent, and a frame arrives shortly after "presence"
    // (3 failed opens × 200 ms retry, then the first processed block).
    assert!(wait_for(
        || plane.latest_frame().is_some(),
        Duration::from_secs(2)
    ));
    assert!(attempts.load(Ordering::SeqCst) >= 3);
    plane.stop_rx();
}

#[test]
fn test_manual_record_appends_every_block() {
    let dir = TempDir::new().unwrap();
    let (mut plane, feed) = rx_plane(&dir, rx_config(DetectorMode::Peak, -10.0));
    let record_path = dir.path().join("manual.cf32");

    plane.start_manual_record(&record_path);
    std::thread::sleep(Duration::from_millis(50));
    feed.push(&blocks(5, QUIET));
    assert!(wait_for(|| feed.is_empty(), Duration::from_secs(2)));
    plane.stop_manual_record();

    assert!(wait_for(
        || {
            std::fs::metadata(&record_path)
                .map(|m| m.len() == (5 * FFT * 8) as u64)
                .unwrap_or(false)
        },
        Duration::from_secs(2)
    ));
    plane.stop_rx();

    let samples = read_cf32(File::open(&record_path).unwrap()).unwrap();
    assert_eq!(samples.len(), 5 * FFT);
    assert!(samples.iter().all(|s| (s.re - QUIET).abs() < 1e-6));
}
