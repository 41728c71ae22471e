use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use log::{info, warn};
use thiserror::Error;

use crate::sensor::SensorLink;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("could not create data directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not move {} into place: {source}", .path.display())]
    Rename {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One record per timer tick. Immutable once appended.
#[derive(Clone, Copy, Debug)]
pub struct Sample {
    pub elapsed_seconds: f64,
    pub force: f64,
    /// NaN when the belt reported no rate this tick.
    pub respiration: f64,
    pub wall_timestamp: f64,
}

/// What a single timer tick did to the session buffer.
#[derive(Debug)]
pub enum TickOutcome {
    /// The device had nothing ready; nothing was appended.
    Skipped,
    Appended,
    /// The auto-export threshold was crossed; the buffer was written to this
    /// file and cleared.
    Exported(PathBuf),
    /// The threshold was crossed but the write failed. The buffer is cleared
    /// anyway and the session keeps going; that window of data is gone.
    ExportFailed(ExportError),
}

/// Append-only sample buffer for one recording session, with periodic CSV
/// export once enough samples have accumulated.
///
/// Exactly one owner mutates this, on the UI thread, so there is no locking.
pub struct SessionRecorder {
    samples: Vec<Sample>,
    start_time: f64,
    export_threshold: usize,
    data_dir: PathBuf,
}

impl SessionRecorder {
    pub fn new(
        read_interval_seconds: f64,
        auto_export_interval_minutes: f64,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        let export_threshold =
            (auto_export_interval_minutes * 60.0 / read_interval_seconds).round() as usize;
        Self {
            // Reserve the whole window up front so appends never reallocate
            // mid-session.
            samples: Vec::with_capacity(export_threshold.min(1 << 20)),
            start_time: 0.0,
            export_threshold,
            data_dir: data_dir.into(),
        }
    }

    /// Arms a new session: clears the log and pins elapsed time to `now`
    /// (unix seconds).
    pub fn begin_session(&mut self, now: f64) {
        self.start_time = now;
        self.reset();
    }

    /// Clears the log. Capacity is kept.
    pub fn reset(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn export_threshold(&self) -> usize {
        self.export_threshold
    }

    /// Polls the sensor once and appends the result. A read miss or a failed
    /// read skips the tick without touching the buffer; the loop never stops
    /// over a single bad poll.
    pub fn ingest_tick(&mut self, sensor: &mut dyn SensorLink, now: f64) -> TickOutcome {
        let reading = match sensor.read() {
            Ok(Some(reading)) => reading,
            Ok(None) => return TickOutcome::Skipped,
            Err(err) => {
                warn!("sensor read failed: {err:#}");
                return TickOutcome::Skipped;
            }
        };
        self.samples.push(Sample {
            elapsed_seconds: now - self.start_time,
            force: reading.force,
            respiration: reading.respiration,
            wall_timestamp: now,
        });
        self.maybe_auto_export()
    }

    fn maybe_auto_export(&mut self) -> TickOutcome {
        if self.samples.len() < self.export_threshold {
            return TickOutcome::Appended;
        }
        match self.export_and_reset() {
            Ok(Some(path)) => TickOutcome::Exported(path),
            Ok(None) => TickOutcome::Appended,
            Err(err) => TickOutcome::ExportFailed(err),
        }
    }

    /// Exports then clears, success or not. A failed write drops the buffered
    /// window so the session can keep going; forward progress wins over
    /// durability here.
    pub fn export_and_reset(&mut self) -> Result<Option<PathBuf>, ExportError> {
        let result = self.export();
        self.reset();
        result
    }

    /// All-or-nothing CSV write of the current buffer: the rows go to a temp
    /// file in the data directory which is then renamed, so a half-written
    /// file never lands under the final name. An empty buffer writes nothing
    /// and reports `Ok(None)`.
    pub fn export(&self) -> Result<Option<PathBuf>, ExportError> {
        if self.samples.is_empty() {
            return Ok(None);
        }
        fs::create_dir_all(&self.data_dir).map_err(|source| ExportError::CreateDir {
            path: self.data_dir.clone(),
            source,
        })?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let final_path = self.data_dir.join(format!("{stamp}_gt.csv"));
        let tmp_path = self.data_dir.join(format!(".{stamp}_gt.csv.tmp"));
        self.write_csv(&tmp_path)
            .map_err(|source| ExportError::Write {
                path: tmp_path.clone(),
                source,
            })?;
        fs::rename(&tmp_path, &final_path).map_err(|source| ExportError::Rename {
            path: final_path.clone(),
            source,
        })?;
        info!(
            "exported {} samples to {}",
            self.samples.len(),
            final_path.display()
        );
        Ok(Some(final_path))
    }

    fn write_csv(&self, path: &Path) -> std::io::Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "Time,Force_N,Respiration_Rate_bpm,Timestamp")?;
        for s in &self.samples {
            if s.respiration.is_nan() {
                writeln!(
                    w,
                    "{},{},,{:.4}",
                    s.elapsed_seconds, s.force, s.wall_timestamp
                )?;
            } else {
                writeln!(
                    w,
                    "{},{},{},{:.4}",
                    s.elapsed_seconds, s.force, s.respiration, s.wall_timestamp
                )?;
            }
        }
        w.flush()
    }

    /// Plot-ready series. Force keeps every point (egui_plot renders NaNs as
    /// gaps); respiration drops NaN rows entirely, so the line connects only
    /// real rate measurements.
    pub fn series(&self) -> (Vec<[f64; 2]>, Vec<[f64; 2]>) {
        let force = self
            .samples
            .iter()
            .map(|s| [s.elapsed_seconds, s.force])
            .collect();
        let respiration = self
            .samples
            .iter()
            .filter(|s| !s.respiration.is_nan())
            .map(|s| [s.elapsed_seconds, s.respiration])
            .collect();
        (force, respiration)
    }

    #[cfg(test)]
    fn samples(&self) -> &[Sample] {
        &self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{ManualSensor, Reading};

    fn reading(force: f64, respiration: f64) -> Option<Reading> {
        Some(Reading { force, respiration })
    }

    fn temp_data_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("sensorlog_{}_{}", tag, std::process::id()))
    }

    #[test]
    fn elapsed_time_is_monotonic_and_append_only() {
        let mut sensor = ManualSensor::new(vec![
            reading(1.0, 10.0),
            reading(2.0, f64::NAN),
            reading(3.0, 11.0),
        ]);
        let mut rec = SessionRecorder::new(0.1, 20.0, "unused");
        rec.begin_session(100.0);
        rec.ingest_tick(&mut sensor, 100.0);
        rec.ingest_tick(&mut sensor, 100.1);
        rec.ingest_tick(&mut sensor, 100.2);
        let samples = rec.samples();
        assert_eq!(samples.len(), 3);
        for pair in samples.windows(2) {
            assert!(pair[0].elapsed_seconds <= pair[1].elapsed_seconds);
        }
        let forces: Vec<f64> = samples.iter().map(|s| s.force).collect();
        assert_eq!(forces, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn nan_filter_applies_to_respiration_only() {
        let mut sensor = ManualSensor::new(vec![
            reading(1.0, f64::NAN),
            reading(2.0, 5.0),
            reading(3.0, f64::NAN),
        ]);
        let mut rec = SessionRecorder::new(0.1, 20.0, "unused");
        rec.begin_session(0.0);
        rec.ingest_tick(&mut sensor, 0.0);
        rec.ingest_tick(&mut sensor, 1.0);
        rec.ingest_tick(&mut sensor, 2.0);
        let (force, respiration) = rec.series();
        assert_eq!(force, vec![[0.0, 1.0], [1.0, 2.0], [2.0, 3.0]]);
        assert_eq!(respiration, vec![[1.0, 5.0]]);
    }

    #[test]
    fn reset_clears_log_and_series() {
        let mut sensor = ManualSensor::new(vec![reading(1.0, 10.0)]);
        let mut rec = SessionRecorder::new(0.1, 20.0, "unused");
        rec.begin_session(0.0);
        rec.ingest_tick(&mut sensor, 0.0);
        assert_eq!(rec.len(), 1);
        rec.reset();
        assert_eq!(rec.len(), 0);
        let (force, respiration) = rec.series();
        assert!(force.is_empty());
        assert!(respiration.is_empty());
    }

    #[test]
    fn auto_export_triggers_exactly_at_threshold() {
        let dir = temp_data_dir("threshold");
        let _ = fs::remove_dir_all(&dir);
        // 20 min at 10 Hz -> 12000 samples.
        let mut rec = SessionRecorder::new(0.1, 20.0, &dir);
        assert_eq!(rec.export_threshold(), 12000);
        rec.begin_session(0.0);
        for i in 0..11999 {
            let mut sensor = ManualSensor::new(vec![reading(i as f64, f64::NAN)]);
            match rec.ingest_tick(&mut sensor, i as f64 * 0.1) {
                TickOutcome::Appended => {}
                other => panic!("unexpected outcome before threshold: {other:?}"),
            }
        }
        assert!(!dir.exists(), "no export may happen before the threshold");
        let mut sensor = ManualSensor::new(vec![reading(0.5, 14.0)]);
        let path = match rec.ingest_tick(&mut sensor, 1200.0) {
            TickOutcome::Exported(path) => path,
            other => panic!("12000th sample must export, got {other:?}"),
        };
        assert!(path.exists());
        assert_eq!(rec.len(), 0, "export clears the buffer");
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 12001); // header + 12000 rows
        assert!(contents.starts_with("Time,Force_N,Respiration_Rate_bpm,Timestamp"));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn skipped_ticks_do_not_count_toward_threshold() {
        // 5 s at 1 Hz -> threshold of 5.
        let dir = temp_data_dir("skips");
        let _ = fs::remove_dir_all(&dir);
        let mut rec = SessionRecorder::new(1.0, 5.0 / 60.0, &dir);
        assert_eq!(rec.export_threshold(), 5);
        rec.begin_session(0.0);
        let mut sensor = ManualSensor::new(vec![
            reading(1.0, 10.0),
            None,
            reading(2.0, 10.0),
            None,
            None,
            reading(3.0, 10.0),
            reading(4.0, 10.0),
        ]);
        let mut appended = 0;
        for i in 0..7 {
            match rec.ingest_tick(&mut sensor, i as f64) {
                TickOutcome::Appended => appended += 1,
                TickOutcome::Skipped => {}
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        assert_eq!(appended, 4);
        assert_eq!(rec.len(), 4);
        assert!(
            !dir.exists(),
            "skips must not push the log over the threshold"
        );
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn export_failure_still_resets_and_recovery_works() {
        // Point the data dir at a plain file so create_dir_all fails.
        let blocker =
            std::env::temp_dir().join(format!("sensorlog_blocker_{}", std::process::id()));
        fs::write(&blocker, b"not a directory").unwrap();
        let mut rec = SessionRecorder::new(1.0, 2.0 / 60.0, &blocker);
        assert_eq!(rec.export_threshold(), 2);
        rec.begin_session(0.0);
        let mut sensor = ManualSensor::new(vec![
            reading(1.0, 10.0),
            reading(2.0, 10.0),
            reading(3.0, 10.0),
        ]);
        assert!(matches!(
            rec.ingest_tick(&mut sensor, 0.0),
            TickOutcome::Appended
        ));
        assert!(matches!(
            rec.ingest_tick(&mut sensor, 1.0),
            TickOutcome::ExportFailed(ExportError::CreateDir { .. })
        ));
        assert_eq!(rec.len(), 0, "the buffer is dropped even on a failed write");
        assert!(matches!(
            rec.ingest_tick(&mut sensor, 2.0),
            TickOutcome::Appended
        ));
        fs::remove_file(&blocker).ok();
    }

    #[test]
    fn empty_buffer_export_skips_the_write() {
        let dir = temp_data_dir("empty");
        let _ = fs::remove_dir_all(&dir);
        let mut rec = SessionRecorder::new(0.1, 20.0, &dir);
        rec.begin_session(0.0);
        // Start/stop round trip with zero ticks: the one export call must not
        // error and must not leave a file behind.
        assert!(matches!(rec.export_and_reset(), Ok(None)));
        assert!(!dir.exists());
    }

    #[test]
    fn csv_rows_match_buffer_contents() {
        let dir = temp_data_dir("csv");
        let _ = fs::remove_dir_all(&dir);
        let mut rec = SessionRecorder::new(0.1, 20.0, &dir);
        rec.begin_session(1000.0);
        let mut sensor =
            ManualSensor::new(vec![reading(1.5, f64::NAN), reading(2.25, 16.0)]);
        rec.ingest_tick(&mut sensor, 1000.0);
        rec.ingest_tick(&mut sensor, 1000.1);
        let path = rec.export_and_reset().unwrap().expect("file written");
        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "Time,Force_N,Respiration_Rate_bpm,Timestamp");
        assert_eq!(lines[1], "0,1.5,,1000.0000");
        assert!(lines[2].starts_with("0.1"));
        assert!(lines[2].contains(",2.25,16,"));
        assert!(
            !fs::read_dir(&dir)
                .unwrap()
                .any(|e| e.unwrap().file_name().to_string_lossy().ends_with(".tmp")),
            "no temp file may survive an export"
        );
        fs::remove_dir_all(&dir).ok();
    }
}
