//! JSON documents and incremental encoders.
//!
//! Small documents are built as serde structs and rendered in one go. The
//! bucket history can hold a full day of buckets, so [`BucketStream`] renders it
//! a bounded number of records at a time, remembering its position as a ring
//! sequence number between calls.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write;

use log::warn;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::sampling::{METRIC_COUNT, Metric};
use crate::storage::{Bucket, DayRollup, FileEntry, HistoryRing, StorageError, Volume};

/// Current readings, flags and derived indices (`/api/now`).
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub epoch: Option<i64>,
    pub local_time: Option<String>,
    pub wind_pps: Option<f32>,
    pub wind_ms: Option<f32>,
    pub bme280_ok: bool,
    pub temp_c: Option<f32>,
    pub hum_rh: Option<f32>,
    pub press_hpa: Option<f32>,
    pub pms5003_ok: bool,
    pub pm1: Option<f32>,
    pub pm25: Option<f32>,
    pub pm10: Option<f32>,
    pub aqi_pm25: Option<u16>,
    pub aqi_pm25_category: Option<&'static str>,
    pub aqi_pm10: Option<u16>,
    pub aqi_pm10_category: Option<&'static str>,
    pub sd_ok: bool,
    pub cpu_temp_c: Option<f32>,
    pub uptime_s: u64,
    pub retention_days: u32,
    pub wifi_rssi: Option<i32>,
    pub free_heap: Option<u32>,
    pub heap_size: Option<u32>,
}

/// One bucket with descriptive keys (`/api/buckets`).
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketRecord {
    pub timestamp: i64,
    pub wind_avg: Option<f32>,
    pub wind_max: Option<f32>,
    pub wind_sample_count: u32,
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
    pub pressure: Option<f32>,
    pub pm1: Option<f32>,
    pub pm25: Option<f32>,
    pub pm10: Option<f32>,
}

impl From<&Bucket> for BucketRecord {
    fn from(bucket: &Bucket) -> Self {
        Self {
            timestamp: bucket.start_epoch,
            wind_avg: bucket.wind_avg(),
            wind_max: bucket.wind_max(),
            wind_sample_count: bucket.wind_samples(),
            temperature: bucket.average(Metric::Temperature),
            humidity: bucket.average(Metric::Humidity),
            pressure: bucket.average(Metric::Pressure),
            pm1: bucket.average(Metric::Pm1),
            pm25: bucket.average(Metric::Pm25),
            pm10: bucket.average(Metric::Pm10),
        }
    }
}

/// `[epoch, avgWind, maxWind, samples, tempC, humRH, pressHpa, pm1, pm25, pm10]`
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CompactBucket(
    pub i64,
    pub Option<f32>,
    pub Option<f32>,
    pub u32,
    pub Option<f32>,
    pub Option<f32>,
    pub Option<f32>,
    pub Option<f32>,
    pub Option<f32>,
    pub Option<f32>,
);

impl From<&Bucket> for CompactBucket {
    fn from(bucket: &Bucket) -> Self {
        Self(
            bucket.start_epoch,
            bucket.wind_avg(),
            bucket.wind_max(),
            bucket.wind_samples(),
            bucket.average(Metric::Temperature),
            bucket.average(Metric::Humidity),
            bucket.average(Metric::Pressure),
            bucket.average(Metric::Pm1),
            bucket.average(Metric::Pm25),
            bucket.average(Metric::Pm10),
        )
    }
}

// (avg, min, max) keys per metric, in Metric::ALL order
const DAY_KEYS: [(&str, &str, &str); METRIC_COUNT] = [
    ("avgWind", "minWind", "maxWind"),
    ("avgTemp", "minTemp", "maxTemp"),
    ("avgHum", "minHum", "maxHum"),
    ("avgPress", "minPress", "maxPress"),
    ("avgPM1", "minPM1", "maxPM1"),
    ("avgPM25", "minPM25", "maxPM25"),
    ("avgPM10", "minPM10", "maxPM10"),
];

/// One daily summary (`/api/days`).
pub struct DayRecord<'a>(pub &'a DayRollup);

impl Serialize for DayRecord<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let day = self.0;
        let mut state = serializer.serialize_struct("Day", 2 + 3 * METRIC_COUNT)?;
        state.serialize_field("dayStartEpoch", &day.day_start_epoch)?;
        state.serialize_field("dayStartLocal", day.day_start_local.as_str())?;
        for (metric, (avg, min, max)) in Metric::ALL.iter().zip(DAY_KEYS) {
            let stats = day.stats(*metric);
            state.serialize_field(avg, &stats.average())?;
            state.serialize_field(min, &stats.minimum())?;
            state.serialize_field(max, &stats.maximum())?;
        }
        state.end()
    }
}

pub struct DaysDocument<'a>(pub &'a HistoryRing<DayRollup>);

impl Serialize for DaysDocument<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Days", 1)?;
        state.serialize_field("days", &DayList(self.0))?;
        state.end()
    }
}

struct DayList<'a>(&'a HistoryRing<DayRollup>);

impl Serialize for DayList<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().map(DayRecord))
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub path: String,
    pub size: u64,
}

/// `/api/files`
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FileListing {
    pub ok: bool,
    pub dir: String,
    pub files: Vec<FileRecord>,
}

impl FileListing {
    pub fn new(dir: &str, entries: Vec<FileEntry>) -> Self {
        Self {
            ok: true,
            dir: String::from(dir),
            files: entries
                .into_iter()
                .map(|entry| FileRecord {
                    path: entry.name,
                    size: entry.size,
                })
                .collect(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UiFileRecord {
    pub file: String,
    pub size: u64,
    /// Unix epoch, 0 when the volume keeps no timestamps
    pub last_modified: i64,
}

/// `/api/ui_files`
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct UiFileListing {
    pub ok: bool,
    pub files: Vec<UiFileRecord>,
}

impl UiFileListing {
    pub fn new(entries: Vec<FileEntry>) -> Self {
        Self {
            ok: true,
            files: entries
                .into_iter()
                .map(|entry| UiFileRecord {
                    file: entry.name,
                    size: entry.size,
                    last_modified: entry.modified.unwrap_or(0),
                })
                .collect(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct UploadReceipt {
    pub ok: bool,
    pub bytes: usize,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ClearReceipt {
    pub ok: bool,
    pub deleted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketFormat {
    Verbose,
    Compact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamPhase {
    Open,
    Records,
    Close,
    Done,
}

/// Incremental encoder for the last 24 hours of buckets.
///
/// The range of ring sequence numbers is fixed when the stream is created:
/// buckets sealed afterwards are not included, and buckets evicted while the
/// stream is in flight are skipped. A separator is only written in front of a
/// record that is actually emitted, so the output is always valid JSON.
#[derive(Debug, Clone)]
pub struct BucketStream {
    format: BucketFormat,
    now_epoch: i64,
    bucket_seconds: u32,
    next_seq: u64,
    end_seq: u64,
    emitted: usize,
    phase: StreamPhase,
}

impl BucketStream {
    /// Records rendered per call to [`BucketStream::fill`].
    pub const RECORDS_PER_CHUNK: usize = 32;

    pub fn new(
        format: BucketFormat,
        ring: &HistoryRing<Bucket>,
        since: i64,
        now_epoch: i64,
        bucket_seconds: u32,
    ) -> Self {
        Self {
            format,
            now_epoch,
            bucket_seconds,
            next_seq: ring.seq_since(since),
            end_seq: ring.write_seq(),
            emitted: 0,
            phase: StreamPhase::Open,
        }
    }

    pub fn is_done(&self) -> bool {
        self.phase == StreamPhase::Done
    }

    /// Records written so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Render the next piece of the document into `out`.
    pub fn fill(&mut self, ring: &HistoryRing<Bucket>, out: &mut Vec<u8>) {
        match self.phase {
            StreamPhase::Open => {
                let mut head = String::with_capacity(64);
                let _ = write!(
                    head,
                    r#"{{"now_epoch":{},"bucket_seconds":{},"buckets":["#,
                    self.now_epoch, self.bucket_seconds
                );
                out.extend_from_slice(head.as_bytes());
                self.phase = StreamPhase::Records;
            }
            StreamPhase::Records => {
                let mut written = 0;
                while written < Self::RECORDS_PER_CHUNK && self.next_seq < self.end_seq {
                    let seq = self.next_seq;
                    self.next_seq += 1;
                    let Some(bucket) = ring.get_seq(seq) else {
                        continue;
                    };
                    let encoded = match self.format {
                        BucketFormat::Verbose => serde_json::to_vec(&BucketRecord::from(bucket)),
                        BucketFormat::Compact => serde_json::to_vec(&CompactBucket::from(bucket)),
                    };
                    match encoded {
                        Ok(bytes) => {
                            if self.emitted > 0 {
                                out.push(b',');
                            }
                            out.extend_from_slice(&bytes);
                            self.emitted += 1;
                            written += 1;
                        }
                        Err(e) => warn!("Skipping bucket {}: {}", bucket.start_epoch, e),
                    }
                }
                if self.next_seq >= self.end_seq {
                    self.phase = StreamPhase::Close;
                }
            }
            StreamPhase::Close => {
                out.extend_from_slice(b"]}");
                self.phase = StreamPhase::Done;
            }
            StreamPhase::Done => {}
        }
    }
}

/// Chunked read of one file from the volume.
#[derive(Debug, Clone)]
pub struct FileStream {
    path: String,
    offset: u64,
    done: bool,
}

impl FileStream {
    pub const CHUNK: usize = 1024;

    pub fn new(path: String) -> Self {
        Self {
            path,
            offset: 0,
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn fill<V: Volume>(&mut self, volume: &mut V, out: &mut Vec<u8>) -> Result<(), StorageError> {
        let start = out.len();
        out.resize(start + Self::CHUNK, 0);
        let n = match volume.read_at(&self.path, self.offset, &mut out[start..]) {
            Ok(n) => n,
            Err(e) => {
                out.truncate(start);
                return Err(e);
            }
        };
        out.truncate(start + n);
        self.offset += n as u64;
        if n == 0 {
            self.done = true;
        }
        Ok(())
    }
}
