use log::{debug, warn};

use super::Bucket;
use crate::sampling::Sample;

/// Folds samples into the currently open fixed-duration bucket.
///
/// The aggregator only ever holds one open bucket. A sample whose timestamp
/// falls past the end of that bucket seals it and opens the bucket that
/// contains the new timestamp; the sealed bucket is handed back to the caller,
/// which routes it to the histories and the durable log.
///
/// ## Gaps
///
/// Buckets are opened lazily by the first sample that lands in them. A pause
/// in sampling therefore produces either a bucket with fewer samples or no
/// bucket at all for the silent windows, never a bucket filled with zeros.
///
/// ## Usage
///
/// ```rust,ignore
/// let mut aggregator = BucketAggregator::new(60);
///
/// if let Some(sealed) = aggregator.ingest(Sample::new(Metric::Wind, 3.2, now)) {
///     storage.process_bucket(sealed);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct BucketAggregator {
    bucket_seconds: i64,
    open: Option<Bucket>,
}

impl BucketAggregator {
    pub fn new(bucket_seconds: u32) -> Self {
        Self {
            bucket_seconds: i64::from(bucket_seconds.max(1)),
            open: None,
        }
    }

    pub fn bucket_seconds(&self) -> i64 {
        self.bucket_seconds
    }

    /// Start of the bucket containing `epoch`.
    pub fn bucket_start(&self, epoch: i64) -> i64 {
        epoch.div_euclid(self.bucket_seconds) * self.bucket_seconds
    }

    /// The bucket still accepting samples, if any.
    pub fn open_bucket(&self) -> Option<&Bucket> {
        self.open.as_ref()
    }

    /// Fold one sample, returning the bucket it sealed (if any).
    ///
    /// Invalid or non-finite samples still advance time but are not counted.
    /// Samples older than the open bucket are discarded.
    pub fn ingest(&mut self, sample: Sample) -> Option<Bucket> {
        let start = self.bucket_start(sample.timestamp);

        if let Some(open) = &self.open {
            if start < open.start_epoch {
                warn!(
                    "Discarding {} sample at {} older than open bucket {}",
                    sample.metric.label(),
                    sample.timestamp,
                    open.start_epoch
                );
                return None;
            }
        }

        let sealed = self.roll_to(sample.timestamp);
        let bucket = self.open.get_or_insert_with(|| Bucket::new(start));

        if sample.is_usable() {
            bucket.record(sample.metric, sample.value);
        }

        sealed
    }

    /// Seal the open bucket if `now` lies past its end.
    ///
    /// Lets the loop close a window on time even when no sample arrives.
    pub fn roll_to(&mut self, now: i64) -> Option<Bucket> {
        let open = self.open.as_ref()?;
        if now < open.start_epoch + self.bucket_seconds {
            return None;
        }
        let sealed = self.open.take()?;
        debug!(
            "Sealed bucket {} ({} wind samples)",
            sealed.start_epoch,
            sealed.wind_samples()
        );
        Some(sealed)
    }
}
