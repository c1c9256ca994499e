use alloc::vec::Vec;

use chrono::{FixedOffset, NaiveDate};
use log::{debug, error, info, warn};

use super::daily_log::{DailyLog, LogName, RowWeights, parse_log_name};
use super::volume::{FileEntry, StorageError, Volume};
use super::{Bucket, DayAccumulator, DayRollup, HistoryRing};
use crate::config::{LogConfig, SECONDS_PER_DAY};
use crate::time::{LocalZone, date_start_epoch, local_date, local_midnight};

/// Storage manager that keeps the history rings in RAM and mirrors every sealed
/// bucket to the daily log on the volume.
///
/// Sealed buckets from the aggregator go through [`process_bucket`]:
/// 1. Pushed into the 24-hour bucket ring
/// 2. Folded into the open day (sealing the previous day at local midnight)
/// 3. Appended as one row to that day's CSV log
///
/// Day boundaries follow the local zone `Z`, which may observe daylight saving.
///
/// The volume may disappear at any time. Appends then become no-ops, the RAM
/// histories keep filling, and [`is_available`] reports the outage.
///
/// ## Memory Usage
///
/// - Buckets: 1,440 × ~120 bytes = ~170 KB at one-minute buckets
/// - Days: 30 × ~140 bytes = ~4 KB
///
/// [`process_bucket`]: StorageManager::process_bucket
/// [`is_available`]: StorageManager::is_available
pub struct StorageManager<V: Volume, Z: LocalZone = FixedOffset> {
    volume: V,
    log: DailyLog,
    zone: Z,
    buckets: HistoryRing<Bucket>,
    days: HistoryRing<DayRollup>,
    open_day: Option<DayAccumulator>,
    available: bool,
}

impl<V: Volume, Z: LocalZone> StorageManager<V, Z> {
    pub fn new(mut volume: V, config: &LogConfig, zone: Z) -> Self {
        let available = volume.is_ready();
        if !available {
            warn!("Storage volume not ready, history will be kept in RAM only");
        }
        Self {
            volume,
            log: DailyLog::new(&config.data_dir, config.retention_days),
            zone,
            buckets: HistoryRing::new(config.buckets_per_day()),
            days: HistoryRing::new(config.days_history),
            open_day: None,
            available,
        }
    }

    /// Sample counts given to restored log cells, see [`RowWeights`].
    pub fn with_row_weights(mut self, weights: RowWeights) -> Self {
        self.log = self.log.with_weights(weights);
        self
    }

    /// Rebuild the RAM histories from the logs already on the volume.
    ///
    /// Rows from the last 24 hours refill the bucket ring, today's rows seed
    /// the open day and older logs become day rollups.
    pub fn restore(&mut self, now_epoch: i64) {
        if !self.refresh_status() {
            return;
        }
        let Some(today) = local_date(&self.zone, now_epoch) else {
            return;
        };

        let logs = match self.log.list(&mut self.volume) {
            Ok(logs) => logs,
            Err(e) => {
                error!("Failed to list daily logs for restore: {}", e);
                return;
            }
        };

        let cutoff = now_epoch - i64::from(SECONDS_PER_DAY);
        let depth = self.days.capacity() + 1;
        let mut restored = 0usize;

        for entry in logs.iter().take(depth).rev() {
            let Some(date) = parse_log_name(&entry.name) else {
                continue;
            };
            if date > today {
                warn!("Ignoring log {} dated in the future", entry.name);
                continue;
            }

            let mut day = DayAccumulator::new(date, date_start_epoch(&self.zone, date));
            let buckets = &mut self.buckets;
            let result = self.log.for_each_row(&mut self.volume, &entry.name, |bucket| {
                if bucket.start_epoch > now_epoch {
                    return;
                }
                if bucket.start_epoch >= cutoff && buckets.push(bucket).is_ok() {
                    restored += 1;
                }
                day.fold(&bucket);
            });
            if let Err(e) = result {
                error!("Failed to read {}: {}", entry.name, e);
                continue;
            }

            if date == today {
                self.open_day = Some(day);
            } else if day.bucket_count() > 0 {
                if let Err(e) = self.days.push(day.seal()) {
                    debug!("Skipping restored day {}: {}", entry.name, e);
                }
            }
        }

        info!(
            "Restored {} buckets and {} days from {} logs",
            restored,
            self.days.len(),
            logs.len().min(depth)
        );
        self.enforce_retention(today);
    }

    /// Route one sealed bucket into the histories and the daily log.
    pub fn process_bucket(&mut self, bucket: Bucket) {
        let Some(date) = local_date(&self.zone, bucket.start_epoch) else {
            warn!("Bucket {} has no calendar date, dropping", bucket.start_epoch);
            return;
        };

        if let Err(e) = self.buckets.push(bucket) {
            warn!("Dropping bucket: {}", e);
            return;
        }

        self.roll_day(date, bucket.start_epoch);
        if let Some(day) = self.open_day.as_mut() {
            day.fold(&bucket);
        }

        self.persist(date, &bucket);
    }

    /// Seal the open day if `date` starts a new one.
    fn roll_day(&mut self, date: NaiveDate, epoch: i64) {
        if let Some(day) = &self.open_day {
            if day.date() == date {
                return;
            }
            let sealed = day.seal();
            info!(
                "Sealed day {} from {} buckets",
                sealed.day_start_local,
                day.bucket_count()
            );
            if let Err(e) = self.days.push(sealed) {
                warn!("Dropping day rollup: {}", e);
            }
        }

        let start = local_midnight(&self.zone, epoch).unwrap_or(epoch);
        self.open_day = Some(DayAccumulator::new(date, start));
        self.enforce_retention(date);
    }

    fn persist(&mut self, date: NaiveDate, bucket: &Bucket) {
        if !self.refresh_status() {
            return;
        }
        if let Err(e) = self.log.append(&mut self.volume, date, bucket) {
            error!("Failed to write bucket {} to log: {}", bucket.start_epoch, e);
            self.set_available(false);
        }
    }

    fn enforce_retention(&mut self, today: NaiveDate) {
        if !self.available {
            return;
        }
        match self.log.enforce_retention(&mut self.volume, today) {
            Ok(0) => {}
            Ok(n) => info!("Retention removed {} logs", n),
            Err(e) => error!("Retention pass failed: {}", e),
        }
    }

    /// Poll the volume and log availability transitions once.
    pub fn refresh_status(&mut self) -> bool {
        let ready = self.volume.is_ready();
        self.set_available(ready);
        ready
    }

    fn set_available(&mut self, available: bool) {
        if available == self.available {
            return;
        }
        if available {
            info!("Storage volume available, resuming log writes");
        } else {
            warn!("Storage volume unavailable, history kept in RAM only");
        }
        self.available = available;
    }

    fn require_volume(&mut self) -> Result<(), StorageError> {
        if self.refresh_status() {
            Ok(())
        } else {
            Err(StorageError::Unavailable)
        }
    }

    /// Daily logs on the volume, newest first.
    pub fn list_files(&mut self) -> Result<Vec<FileEntry>, StorageError> {
        self.require_volume()?;
        self.log.list(&mut self.volume)
    }

    /// Every plain file under `dir`, sorted by name.
    pub fn list_dir(&mut self, dir: &str) -> Result<Vec<FileEntry>, StorageError> {
        self.require_volume()?;
        let mut files = self.volume.list(dir)?;
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// The `n` most recent daily logs, newest first.
    pub fn recent_logs(&mut self, n: usize) -> Result<Vec<FileEntry>, StorageError> {
        let mut logs = self.list_files()?;
        logs.truncate(n);
        Ok(logs)
    }

    pub fn delete_file(&mut self, requested: &str) -> Result<LogName, StorageError> {
        self.require_volume()?;
        self.log.delete(&mut self.volume, requested)
    }

    /// Remove every daily log. The RAM histories are kept.
    pub fn clear_all(&mut self) -> Result<usize, StorageError> {
        self.require_volume()?;
        self.log.clear_all(&mut self.volume)
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn buckets(&self) -> &HistoryRing<Bucket> {
        &self.buckets
    }

    pub fn days(&self) -> &HistoryRing<DayRollup> {
        &self.days
    }

    pub fn open_day(&self) -> Option<&DayAccumulator> {
        self.open_day.as_ref()
    }

    pub fn daily_log(&self) -> &DailyLog {
        &self.log
    }

    pub fn zone(&self) -> &Z {
        &self.zone
    }

    pub fn volume(&self) -> &V {
        &self.volume
    }

    pub fn volume_mut(&mut self) -> &mut V {
        &mut self.volume
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::Metric;
    use crate::storage::MemoryVolume;
    use crate::time::{PosixZone, fixed_zone};

    // 2025-12-18 00:00:00 UTC
    const MIDNIGHT: i64 = 1_766_016_000;

    fn bucket(epoch: i64, temp: f32) -> Bucket {
        let mut b = Bucket::new(epoch);
        b.record(Metric::Temperature, temp);
        b.record(Metric::Wind, 2.0);
        b
    }

    /// A bucket as a live station fills it: one temperature reading per poll.
    fn polled_bucket(epoch: i64, temp: f32) -> Bucket {
        let mut b = Bucket::new(epoch);
        for _ in 0..30 {
            b.record(Metric::Temperature, temp);
        }
        b.record(Metric::Wind, 2.0);
        b
    }

    fn manager(retention_days: u32) -> StorageManager<MemoryVolume> {
        let config = LogConfig {
            retention_days,
            ..LogConfig::default()
        };
        StorageManager::new(MemoryVolume::new(), &config, fixed_zone(0))
    }

    #[test]
    fn test_midnight_seals_previous_day() {
        let mut storage = manager(0);
        storage.process_bucket(bucket(MIDNIGHT - 120, 10.0));
        storage.process_bucket(bucket(MIDNIGHT - 60, 14.0));
        assert!(storage.days().is_empty());

        storage.process_bucket(bucket(MIDNIGHT, 20.0));
        assert_eq!(storage.days().len(), 1);
        let day = storage.days().newest().unwrap();
        assert_eq!(day.day_start_local.as_str(), "2025-12-17 00:00");
        assert_eq!(day.day_start_epoch, MIDNIGHT - 86_400);
        assert_eq!(day.stats(Metric::Temperature).average(), Some(12.0));

        let open = storage.open_day().unwrap();
        assert_eq!(open.start_epoch(), MIDNIGHT);
        assert_eq!(open.bucket_count(), 1);
        assert_eq!(storage.buckets().len(), 3);
    }

    #[test]
    fn test_rows_land_in_per_day_files() {
        let mut storage = manager(0);
        storage.process_bucket(bucket(MIDNIGHT - 60, 10.0));
        storage.process_bucket(bucket(MIDNIGHT, 11.0));
        let names: Vec<_> = storage
            .list_files()
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["20251218.csv", "20251217.csv"]);
    }

    #[test]
    fn test_unavailable_volume_keeps_ram_history() {
        let mut storage = manager(0);
        storage.volume_mut().set_available(false);
        storage.process_bucket(bucket(MIDNIGHT, 10.0));
        assert!(!storage.is_available());
        assert_eq!(storage.buckets().len(), 1);
        assert_eq!(storage.list_files(), Err(StorageError::Unavailable));

        storage.volume_mut().set_available(true);
        storage.process_bucket(bucket(MIDNIGHT + 60, 10.0));
        assert!(storage.is_available());
        let log = storage.volume().contents("data/20251218.csv").unwrap();
        // Header plus the one row written after recovery
        assert_eq!(core::str::from_utf8(log).unwrap().lines().count(), 2);
    }

    #[test]
    fn test_retention_runs_on_rollover() {
        let mut storage = manager(3);
        for age in [5i64, 2, 1] {
            let epoch = MIDNIGHT - age * 86_400;
            storage.process_bucket(bucket(epoch, 1.0));
        }
        storage.process_bucket(bucket(MIDNIGHT, 1.0));
        let names: Vec<_> = storage
            .list_files()
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["20251218.csv", "20251217.csv", "20251216.csv"]);
    }

    #[test]
    fn test_duplicate_bucket_is_dropped() {
        let mut storage = manager(0);
        storage.process_bucket(bucket(MIDNIGHT, 10.0));
        storage.process_bucket(bucket(MIDNIGHT, 30.0));
        assert_eq!(storage.buckets().len(), 1);
        assert_eq!(
            storage.open_day().unwrap().stats(Metric::Temperature).average(),
            Some(10.0)
        );
    }

    #[test]
    fn test_restore_rebuilds_histories() {
        let mut storage = manager(0);
        // Three days of logs, two buckets each
        for day in (0..3i64).rev() {
            let start = MIDNIGHT - day * 86_400;
            storage.process_bucket(bucket(start + 3600, 10.0));
            storage.process_bucket(bucket(start + 7200, 20.0));
        }
        let volume = storage.volume().clone();

        let config = LogConfig::default();
        let mut rebooted = StorageManager::new(volume, &config, fixed_zone(0));
        let now = MIDNIGHT + 8000;
        rebooted.restore(now);

        // Yesterday's rows fall outside the last 24 hours
        let restored: Vec<_> = rebooted.buckets().iter().map(|b| b.start_epoch).collect();
        assert_eq!(restored, vec![MIDNIGHT + 3600, MIDNIGHT + 7200]);
        assert_eq!(rebooted.days().len(), 2);
        let today = rebooted.open_day().unwrap();
        assert_eq!(today.bucket_count(), 2);
        assert_eq!(today.stats(Metric::Temperature).average(), Some(15.0));
        assert_eq!(
            rebooted.days().newest().unwrap().day_start_local.as_str(),
            "2025-12-17 00:00"
        );
    }

    #[test]
    fn test_reboot_mid_day_keeps_sample_weighting() {
        let mut storage = manager(0);
        let morning = MIDNIGHT - 86_400 + 3600;
        storage.process_bucket(polled_bucket(morning, 10.0));
        storage.process_bucket(polled_bucket(morning + 60, 10.0));
        let volume = storage.volume().clone();

        let mut rebooted = StorageManager::new(volume, &LogConfig::default(), fixed_zone(0))
            .with_row_weights(RowWeights::default());
        rebooted.restore(morning + 600);
        rebooted.process_bucket(polled_bucket(morning + 660, 20.0));
        rebooted.process_bucket(polled_bucket(morning + 720, 20.0));
        rebooted.process_bucket(polled_bucket(MIDNIGHT, 20.0));

        let day = rebooted.days().newest().unwrap();
        assert_eq!(day.day_start_epoch, MIDNIGHT - 86_400);
        assert_eq!(day.stats(Metric::Temperature).count, 120);
        assert_eq!(day.stats(Metric::Temperature).average(), Some(15.0));
    }

    #[test]
    fn test_daylight_saving_day_seals_at_local_midnight() {
        let zone = PosixZone::parse("AEST-10AEDT-11,M10.1.0/02:00:00,M4.1.0/03:00:00").unwrap();
        let mut storage = StorageManager::new(MemoryVolume::new(), &LogConfig::default(), zone);
        // 2025-04-06 00:00 AEDT, a 25 hour day ending at 00:00 AEST
        let day_start = 1_743_858_000;
        let next_day = day_start + 25 * 3600;

        storage.process_bucket(bucket(day_start, 10.0));
        storage.process_bucket(bucket(next_day - 60, 20.0));
        assert!(storage.days().is_empty());
        storage.process_bucket(bucket(next_day, 30.0));

        let day = storage.days().newest().unwrap();
        assert_eq!(day.day_start_epoch, day_start);
        assert_eq!(day.day_start_local.as_str(), "2025-04-06 00:00");
        assert_eq!(day.stats(Metric::Temperature).average(), Some(15.0));
        assert_eq!(storage.open_day().unwrap().start_epoch(), next_day);

        let names: Vec<_> = storage
            .list_files()
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["20250407.csv", "20250406.csv"]);
    }

    #[test]
    fn test_list_dir_reports_any_directory() {
        let mut storage = manager(0);
        storage.volume_mut().write("web/style.css", b"body{}").unwrap();
        storage.volume_mut().write("web/index.html", b"<html>").unwrap();
        storage.process_bucket(bucket(MIDNIGHT, 10.0));

        let names: Vec<_> = storage
            .list_dir("web")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["index.html", "style.css"]);
        assert_eq!(storage.list_dir("data").unwrap().len(), 1);

        storage.volume_mut().set_available(false);
        assert_eq!(storage.list_dir("web"), Err(StorageError::Unavailable));
    }
}
