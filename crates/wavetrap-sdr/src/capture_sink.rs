//! Capture file ownership
//!
//! Single owner of everything the RX pipeline puts on disk:
//!
//! - the **spool** — `in_progress_<ts>_RX<mhz>.cf32.part`, written while a
//!   session is armed so the user sees a file immediately. It is never
//!   renamed into a capture: it is deleted on every terminal transition.
//! - the **final capture** — `<ts>_RX<mhz>_thr<db>.cf32`, written from the
//!   in-memory capture buffer, fsynced and renamed into place so a crash
//!   can never leave a partial final file.
//!
//! Timestamps are the arm time in UTC. The `captures/` directory is the
//! process's only persisted state; `reset_dir` clears and recreates it at
//! startup.

use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use wavetrap_core::recording::write_cf32;
use wavetrap_core::types::IQSample;

/// Default capture directory, relative to the working directory.
pub const DEFAULT_CAPTURE_DIR: &str = "captures";

struct Spool {
    writer: BufWriter<File>,
    path: PathBuf,
}

/// Owner of the spool and final capture files for one RX pipeline.
pub struct CaptureSink {
    dir: PathBuf,
    spool: Option<Spool>,
    spool_warned: bool,
}

impl CaptureSink {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            spool: None,
            spool_warned: false,
        }
    }

    /// Clear and recreate the capture directory. The directory contents are
    /// authoritative process state, so startup wipes whatever is there.
    pub fn reset_dir<P: AsRef<Path>>(dir: P) -> io::Result<()> {
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        fs::create_dir_all(&dir)
    }

    fn timestamp(time: DateTime<Utc>) -> String {
        time.format("%Y%m%d_%H%M%S").to_string()
    }

    /// Open the spool file for a new armed session. Best-effort: on failure
    /// the session continues from memory and the failure is logged once.
    pub fn open_spool(&mut self, arm_time: DateTime<Utc>, rx_mhz: f64) {
        self.discard_spool();
        if let Err(e) = fs::create_dir_all(&self.dir) {
            if !self.spool_warned {
                self.spool_warned = true;
                tracing::warn!(error = %e, dir = %self.dir.display(), "cannot create capture dir; spooling disabled");
            }
            return;
        }
        let path = self.dir.join(format!(
            "in_progress_{}_RX{:.3}.cf32.part",
            Self::timestamp(arm_time),
            rx_mhz
        ));
        match File::create(&path) {
            Ok(file) => {
                tracing::info!(path = %path.display(), "spooling");
                self.spool = Some(Spool {
                    writer: BufWriter::new(file),
                    path,
                });
            }
            Err(e) => {
                if !self.spool_warned {
                    self.spool_warned = true;
                    tracing::warn!(error = %e, path = %path.display(), "spool open failed; capturing from memory only");
                }
            }
        }
    }

    /// Append raw samples to the spool, if one is open.
    pub fn append_spool(&mut self, samples: &[IQSample]) {
        if let Some(spool) = self.spool.as_mut() {
            if let Err(e) = write_cf32(&mut spool.writer, samples) {
                tracing::warn!(error = %e, "spool write failed; dropping spool");
                let path = spool.path.clone();
                self.spool = None;
                let _ = fs::remove_file(path);
            }
        }
    }

    /// Close and delete the spool, if any.
    pub fn discard_spool(&mut self) {
        if let Some(spool) = self.spool.take() {
            drop(spool.writer);
            if let Err(e) = fs::remove_file(&spool.path) {
                tracing::warn!(error = %e, path = %spool.path.display(), "failed to remove spool");
            }
        }
    }

    /// True while a spool file is open.
    pub fn has_spool(&self) -> bool {
        self.spool.is_some()
    }

    /// Write the completed capture and return its final path.
    ///
    /// The data goes to a `.tmp` sibling first, is fsynced, then renamed to
    /// `<ts>_RX<mhz.fff>_thr<db.0>.cf32`. The spool is deleted whether or
    /// not the write succeeds; on failure no final file exists.
    pub fn finalize(
        &mut self,
        samples: &[IQSample],
        arm_time: DateTime<Utc>,
        rx_mhz: f64,
        threshold_db: f64,
    ) -> io::Result<PathBuf> {
        let result = self.write_final(samples, arm_time, rx_mhz, threshold_db);
        self.discard_spool();
        result
    }

    fn write_final(
        &mut self,
        samples: &[IQSample],
        arm_time: DateTime<Utc>,
        rx_mhz: f64,
        threshold_db: f64,
    ) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let final_path = self.dir.join(format!(
            "{}_RX{:.3}_thr{:.0}.cf32",
            Self::timestamp(arm_time),
            rx_mhz,
            threshold_db
        ));
        let tmp_path = final_path.with_extension("cf32.tmp");

        let write = (|| -> io::Result<()> {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            write_cf32(&mut writer, samples)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            Ok(())
        })();
        if let Err(e) = write {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        fs::rename(&tmp_path, &final_path)?;
        tracing::info!(
            path = %final_path.display(),
            samples = samples.len(),
            "capture written"
        );
        Ok(final_path)
    }
}

impl Drop for CaptureSink {
    fn drop(&mut self) {
        // A clean shutdown must not leave an orphan .part behind.
        self.discard_spool();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn arm_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 30, 5).unwrap()
    }

    fn samples(n: usize) -> Vec<IQSample> {
        (0..n).map(|i| IQSample::new(i as f32, -(i as f32))).collect()
    }

    #[test]
    fn test_final_name_is_bit_exact() {
        let dir = TempDir::new().unwrap();
        let mut sink = CaptureSink::new(dir.path());
        let path = sink
            .finalize(&samples(16), arm_time(), 433.81, -30.0)
            .unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "20240309_143005_RX433.810_thr-30.cf32"
        );
        assert_eq!(fs::metadata(&path).unwrap().len(), 16 * 8);
    }

    #[test]
    fn test_spool_name_and_cleanup_on_finalize() {
        let dir = TempDir::new().unwrap();
        let mut sink = CaptureSink::new(dir.path());
        sink.open_spool(arm_time(), 433.81);
        assert!(sink.has_spool());
        let spool_path = dir.path().join("in_progress_20240309_143005_RX433.810.cf32.part");
        assert!(spool_path.exists());

        sink.append_spool(&samples(100));
        let _ = sink.finalize(&samples(100), arm_time(), 433.81, -30.0).unwrap();
        assert!(!spool_path.exists());
        assert!(!sink.has_spool());
    }

    #[test]
    fn test_discard_spool_removes_file() {
        let dir = TempDir::new().unwrap();
        let mut sink = CaptureSink::new(dir.path());
        sink.open_spool(arm_time(), 434.0);
        sink.append_spool(&samples(10));
        sink.discard_spool();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_drop_removes_spool() {
        let dir = TempDir::new().unwrap();
        {
            let mut sink = CaptureSink::new(dir.path());
            sink.open_spool(arm_time(), 434.0);
        }
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_finalize_round_trips_samples() {
        let dir = TempDir::new().unwrap();
        let mut sink = CaptureSink::new(dir.path());
        let data = samples(1024);
        let path = sink.finalize(&data, arm_time(), 433.81, -25.0).unwrap();
        let back =
            wavetrap_core::recording::read_cf32(File::open(&path).unwrap()).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_no_tmp_left_behind() {
        let dir = TempDir::new().unwrap();
        let mut sink = CaptureSink::new(dir.path());
        let _ = sink.finalize(&samples(8), arm_time(), 433.81, -30.0).unwrap();
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| !n.ends_with(".tmp")), "{names:?}");
    }

    #[test]
    fn test_reset_dir_clears_state() {
        let dir = TempDir::new().unwrap();
        let capture_dir = dir.path().join("captures");
        fs::create_dir_all(&capture_dir).unwrap();
        fs::write(capture_dir.join("stale.cf32"), b"junk").unwrap();
        CaptureSink::reset_dir(&capture_dir).unwrap();
        assert!(capture_dir.exists());
        assert_eq!(fs::read_dir(&capture_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_spool_failure_is_tolerated() {
        // Point the sink at a path that cannot be a directory.
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocked");
        fs::write(&blocker, b"file, not dir").unwrap();
        let mut sink = CaptureSink::new(blocker.join("captures"));
        sink.open_spool(arm_time(), 433.81);
        assert!(!sink.has_spool());
        // Appending with no spool is a no-op.
        sink.append_spool(&samples(4));
    }
}
