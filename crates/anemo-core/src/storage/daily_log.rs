//! Per-day CSV logs on the storage volume.
//!
//! One file per local calendar day, named `YYYYMMDD.csv`, one row per sealed
//! bucket. Columns follow the compact bucket order so a log can be read back
//! into buckets on boot.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write;

use chrono::{Datelike, NaiveDate};
use log::{debug, info, warn};

use super::volume::{FileEntry, StorageError, Volume, join_path};
use super::{Bucket, MetricStats};
use crate::config::{LogConfig, SensorConfig};
use crate::sampling::Metric;
use crate::time::days_between;

pub const CSV_HEADER: &str = "epoch,avgWind,maxWind,samples,tempC,humRH,pressHpa,pm1,pm25,pm10\n";

/// `YYYYMMDD.csv`
pub type LogName = heapless::String<12>;

const READ_CHUNK: usize = 512;
const MAX_LINE: usize = 256;

pub fn log_name(date: NaiveDate) -> LogName {
    let mut name = LogName::new();
    let _ = write!(
        name,
        "{:04}{:02}{:02}.csv",
        date.year(),
        date.month(),
        date.day()
    );
    name
}

/// Date encoded in a log file name, or `None` for anything that is not a log.
pub fn parse_log_name(name: &str) -> Option<NaiveDate> {
    let stem = name.strip_suffix(".csv")?;
    if stem.len() != 8 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year = stem[0..4].parse().ok()?;
    let month = stem[4..6].parse().ok()?;
    let day = stem[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn push_cell(row: &mut String, value: Option<f32>, precision: usize) {
    row.push(',');
    if let Some(v) = value {
        let _ = write!(row, "{:.*}", precision, v);
    }
}

/// Render one bucket as a CSV row (with trailing newline).
pub fn format_row(bucket: &Bucket) -> String {
    let mut row = String::with_capacity(96);
    let _ = write!(row, "{}", bucket.start_epoch);
    push_cell(&mut row, bucket.wind_avg(), 2);
    push_cell(&mut row, bucket.wind_max(), 2);
    let _ = write!(row, ",{}", bucket.wind_samples());
    push_cell(&mut row, bucket.average(Metric::Temperature), 2);
    push_cell(&mut row, bucket.average(Metric::Humidity), 1);
    push_cell(&mut row, bucket.average(Metric::Pressure), 2);
    push_cell(&mut row, bucket.average(Metric::Pm1), 1);
    push_cell(&mut row, bucket.average(Metric::Pm25), 1);
    push_cell(&mut row, bucket.average(Metric::Pm10), 1);
    row.push('\n');
    row
}

fn parse_cell(cell: &str) -> Result<Option<f32>, ()> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(None);
    }
    cell.parse::<f32>().map(Some).map_err(|_| ())
}

/// Sample counts given to restored averages that the log stores without one.
///
/// A live bucket holds one reading per poll, so a restored cell is worth as
/// many samples as there are polls in a bucket. Restored and live buckets
/// then carry the same weight in the day rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowWeights {
    pub environment: u32,
    pub particulate: u32,
}

impl RowWeights {
    pub fn new(log: &LogConfig, sensors: &SensorConfig) -> Self {
        let bucket_ms = u64::from(log.bucket_seconds) * 1000;
        let polls = |poll_ms: u64| (bucket_ms / poll_ms.max(1)).clamp(1, u64::from(u32::MAX)) as u32;
        Self {
            environment: polls(sensors.environment_poll_ms),
            particulate: polls(sensors.particulate_poll_ms),
        }
    }

    fn for_metric(&self, metric: Metric) -> u32 {
        match metric {
            Metric::Wind => 1,
            Metric::Temperature | Metric::Humidity | Metric::Pressure => self.environment,
            Metric::Pm1 | Metric::Pm25 | Metric::Pm10 => self.particulate,
        }
    }
}

impl Default for RowWeights {
    fn default() -> Self {
        Self::new(&LogConfig::default(), &SensorConfig::default())
    }
}

/// Parse one CSV row back into a bucket.
///
/// The log only keeps averages, the wind maximum and the wind sample count.
/// Environmental and particulate averages come back with the sample counts in
/// `weights`, and the restored wind minimum is the bucket average.
pub fn parse_row(line: &str, weights: &RowWeights) -> Option<Bucket> {
    let mut cells = line.trim_end_matches(['\r', '\n']).split(',');
    let epoch: i64 = cells.next()?.trim().parse().ok()?;
    let wind_avg = parse_cell(cells.next()?).ok()?;
    let wind_max = parse_cell(cells.next()?).ok()?;
    let samples: u32 = cells.next()?.trim().parse().ok()?;

    let mut bucket = Bucket::new(epoch);
    if let Some(avg) = wind_avg {
        let max = wind_max.unwrap_or(avg);
        bucket.stats[Metric::Wind.index()] = MetricStats::from_summary(avg, samples, avg, max);
    }

    for metric in &Metric::ALL[1..] {
        if let Some(value) = parse_cell(cells.next()?).ok()? {
            let count = weights.for_metric(*metric);
            bucket.stats[metric.index()] = MetricStats::from_summary(value, count, value, value);
        }
    }

    if cells.next().is_some() {
        return None;
    }
    Some(bucket)
}

/// The set of daily logs under one directory.
#[derive(Debug, Clone)]
pub struct DailyLog {
    dir: String,
    retention_days: u32,
    weights: RowWeights,
}

impl DailyLog {
    pub fn new(dir: &str, retention_days: u32) -> Self {
        Self {
            dir: String::from(dir.trim_matches('/')),
            retention_days,
            weights: RowWeights::default(),
        }
    }

    pub fn with_weights(mut self, weights: RowWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    pub fn path_for(&self, name: &str) -> String {
        join_path(&self.dir, name)
    }

    /// Accept `YYYYMMDD.csv`, `data/YYYYMMDD.csv` or `/data/YYYYMMDD.csv`.
    pub fn resolve_name(&self, requested: &str) -> Option<LogName> {
        let trimmed = requested.trim().trim_start_matches('/');
        let name = trimmed
            .strip_prefix(self.dir.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(trimmed);
        parse_log_name(name).map(log_name)
    }

    /// Append one bucket row to the log for `date`, writing the header first
    /// when the file is new.
    pub fn append<V: Volume>(
        &self,
        volume: &mut V,
        date: NaiveDate,
        bucket: &Bucket,
    ) -> Result<(), StorageError> {
        let path = self.path_for(&log_name(date));
        let row = format_row(bucket);

        match volume.size(&path) {
            Ok(_) => volume.append(&path, row.as_bytes()),
            Err(StorageError::NotFound(_)) => {
                info!("Starting daily log {}", path);
                let mut data = String::with_capacity(CSV_HEADER.len() + row.len());
                data.push_str(CSV_HEADER);
                data.push_str(&row);
                volume.append(&path, data.as_bytes())
            }
            Err(e) => Err(e),
        }
    }

    /// Log files, newest first. Non-log files in the directory are ignored.
    pub fn list<V: Volume>(&self, volume: &mut V) -> Result<Vec<FileEntry>, StorageError> {
        let mut logs: Vec<FileEntry> = volume
            .list(&self.dir)?
            .into_iter()
            .filter(|entry| parse_log_name(&entry.name).is_some())
            .collect();
        // YYYYMMDD sorts chronologically
        logs.sort_by(|a, b| b.name.cmp(&a.name));
        Ok(logs)
    }

    /// Remove every log older than the retention period relative to `today`.
    ///
    /// Returns the number of files removed. A retention of 0 keeps everything.
    pub fn enforce_retention<V: Volume>(
        &self,
        volume: &mut V,
        today: NaiveDate,
    ) -> Result<usize, StorageError> {
        if self.retention_days == 0 {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in self.list(volume)? {
            let Some(date) = parse_log_name(&entry.name) else {
                continue;
            };
            let age = days_between(date, today);
            if age > i64::from(self.retention_days) {
                volume.remove(&self.path_for(&entry.name))?;
                info!("Retention removed {} ({} days old)", entry.name, age);
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn delete<V: Volume>(&self, volume: &mut V, requested: &str) -> Result<LogName, StorageError> {
        let name = self
            .resolve_name(requested)
            .ok_or_else(|| StorageError::InvalidPath(String::from(requested)))?;
        volume.remove(&self.path_for(&name))?;
        info!("Deleted log {}", name);
        Ok(name)
    }

    pub fn clear_all<V: Volume>(&self, volume: &mut V) -> Result<usize, StorageError> {
        let logs = self.list(volume)?;
        for entry in &logs {
            volume.remove(&self.path_for(&entry.name))?;
        }
        info!("Cleared {} daily logs", logs.len());
        Ok(logs.len())
    }

    /// Feed every parseable row of a log to `f`, reading in small chunks.
    pub fn for_each_row<V: Volume, F: FnMut(Bucket)>(
        &self,
        volume: &mut V,
        name: &str,
        mut f: F,
    ) -> Result<(), StorageError> {
        let path = self.path_for(name);
        let mut chunk = [0u8; READ_CHUNK];
        let mut line: Vec<u8> = Vec::with_capacity(MAX_LINE);
        let mut offset = 0u64;
        let mut skipped = 0usize;
        let weights = self.weights;

        let mut finish_line = |line: &mut Vec<u8>| {
            if !line.is_empty() {
                match core::str::from_utf8(line).ok().and_then(|row| parse_row(row, &weights)) {
                    Some(bucket) => f(bucket),
                    None => skipped += 1,
                }
                line.clear();
            }
        };

        loop {
            let n = volume.read_at(&path, offset, &mut chunk)?;
            if n == 0 {
                break;
            }
            offset += n as u64;
            for &byte in &chunk[..n] {
                if byte == b'\n' {
                    finish_line(&mut line);
                } else if line.len() < MAX_LINE {
                    line.push(byte);
                }
            }
        }
        finish_line(&mut line);

        // The header line always lands here
        if skipped > 1 {
            warn!("Skipped {} unreadable rows in {}", skipped - 1, name);
        } else {
            debug!("Read back {}", name);
        }
        Ok(())
    }
}
