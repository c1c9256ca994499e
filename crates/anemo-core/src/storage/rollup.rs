//! Aggregate records for the in-memory histories.
//!
//! - [`MetricStats`]: running sum/count/min/max for one metric
//! - [`Bucket`]: one fixed-duration window of all metrics
//! - [`DayAccumulator`] / [`DayRollup`]: buckets folded into one local calendar day

use chrono::NaiveDate;

use crate::sampling::{METRIC_COUNT, Metric};
use crate::time::{LocalLabel, day_label};

/// Running statistics for one metric.
///
/// The sum is kept in `f64` so folding a full day of buckets does not drift.
/// Every accessor returns `None` when nothing was recorded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricStats {
    pub sum: f64,
    pub count: u32,
    pub min: f32,
    pub max: f32,
}

impl Default for MetricStats {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl MetricStats {
    pub const EMPTY: Self = Self {
        sum: 0.0,
        count: 0,
        min: f32::INFINITY,
        max: f32::NEG_INFINITY,
    };

    /// Rebuild statistics from a stored summary (average over `count` samples).
    pub fn from_summary(average: f32, count: u32, min: f32, max: f32) -> Self {
        if count == 0 {
            return Self::EMPTY;
        }
        Self {
            sum: f64::from(average) * f64::from(count),
            count,
            min,
            max,
        }
    }

    pub fn record(&mut self, value: f32) {
        self.sum += f64::from(value);
        self.count = self.count.saturating_add(1);
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    /// Fold another set of statistics into this one.
    ///
    /// Summing sums and counts is what makes the merged average weighted by
    /// sample count rather than by number of merged records.
    pub fn merge(&mut self, other: &MetricStats) {
        if other.count == 0 {
            return;
        }
        self.sum += other.sum;
        self.count = self.count.saturating_add(other.count);
        if other.min < self.min {
            self.min = other.min;
        }
        if other.max > self.max {
            self.max = other.max;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn average(&self) -> Option<f32> {
        if self.count == 0 {
            None
        } else {
            Some((self.sum / f64::from(self.count)) as f32)
        }
    }

    pub fn minimum(&self) -> Option<f32> {
        (self.count > 0).then_some(self.min)
    }

    pub fn maximum(&self) -> Option<f32> {
        (self.count > 0).then_some(self.max)
    }
}

/// One fixed-duration aggregation window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    /// Window start, a multiple of the bucket length (Unix seconds)
    pub start_epoch: i64,
    /// Per-metric statistics indexed by [`Metric::index`]
    pub stats: [MetricStats; METRIC_COUNT],
}

impl Bucket {
    pub fn new(start_epoch: i64) -> Self {
        Self {
            start_epoch,
            stats: [MetricStats::EMPTY; METRIC_COUNT],
        }
    }

    pub fn record(&mut self, metric: Metric, value: f32) {
        self.stats[metric.index()].record(value);
    }

    pub fn stats(&self, metric: Metric) -> &MetricStats {
        &self.stats[metric.index()]
    }

    pub fn average(&self, metric: Metric) -> Option<f32> {
        self.stats(metric).average()
    }

    pub fn wind_avg(&self) -> Option<f32> {
        self.average(Metric::Wind)
    }

    /// Highest instantaneous wind rate seen in the window.
    pub fn wind_max(&self) -> Option<f32> {
        self.stats(Metric::Wind).maximum()
    }

    pub fn wind_samples(&self) -> u32 {
        self.stats(Metric::Wind).count
    }
}

/// Daily summary sealed at local midnight.
#[derive(Debug, Clone, PartialEq)]
pub struct DayRollup {
    pub day_start_epoch: i64,
    /// `YYYY-MM-DD 00:00`
    pub day_start_local: LocalLabel,
    pub stats: [MetricStats; METRIC_COUNT],
}

impl DayRollup {
    pub fn stats(&self, metric: Metric) -> &MetricStats {
        &self.stats[metric.index()]
    }
}

/// The day currently being folded from sealed buckets.
#[derive(Debug, Clone, PartialEq)]
pub struct DayAccumulator {
    date: NaiveDate,
    start_epoch: i64,
    buckets: u32,
    stats: [MetricStats; METRIC_COUNT],
}

impl DayAccumulator {
    pub fn new(date: NaiveDate, start_epoch: i64) -> Self {
        Self {
            date,
            start_epoch,
            buckets: 0,
            stats: [MetricStats::EMPTY; METRIC_COUNT],
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn start_epoch(&self) -> i64 {
        self.start_epoch
    }

    pub fn bucket_count(&self) -> u32 {
        self.buckets
    }

    pub fn stats(&self, metric: Metric) -> &MetricStats {
        &self.stats[metric.index()]
    }

    pub fn fold(&mut self, bucket: &Bucket) {
        for (day, other) in self.stats.iter_mut().zip(bucket.stats.iter()) {
            day.merge(other);
        }
        self.buckets += 1;
    }

    /// Produce the immutable summary for this day.
    pub fn seal(&self) -> DayRollup {
        DayRollup {
            day_start_epoch: self.start_epoch,
            day_start_local: day_label(self.date),
            stats: self.stats,
        }
    }
}
