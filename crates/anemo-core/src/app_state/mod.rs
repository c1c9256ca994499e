//! Station state and the cooperative control loop step

mod polling;

pub use polling::*;

use embassy_time::{Duration, Instant};
use log::{info, warn};
use thiserror_no_std::Error;

use crate::archive::ArchiveBuilder;
use crate::auth::AuthGuard;
use crate::config::{ConfigError, StationConfig};
use crate::sampling::{LatestReadings, Metric, Sample};
use crate::sensors::{
    EnvironmentReadings, ParticulateReadings, PulseCounter, Sensor, SensorError, SensorReadings,
    SensorSet, WindSampler,
};
use crate::storage::{BucketAggregator, RowWeights, StorageManager, Volume};
use crate::time::StationZone;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppRunState {
    /// Sampling, but the wall clock is unknown so nothing is aggregated
    WaitingForTime,
    Running,
    /// A restart was acknowledged; the loop should exit
    Restarting,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("Invalid configuration: {0}")]
    Config(ConfigError),
}

/// Figures reported by the platform (chip temperature, radio, heap).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlatformStats {
    pub cpu_temp_c: Option<f32>,
    pub wifi_rssi: Option<i32>,
    pub free_heap: Option<u32>,
    pub heap_size: Option<u32>,
}

/// Everything the control loop owns.
///
/// One loop iteration calls [`Station::tick`] and then serves any pending
/// requests through [`Station::handle`]; both run on the same task, so no
/// state here needs locking. The only state shared with an interrupt is the
/// [`PulseCounter`], which is borrowed.
pub struct Station<'a, V: Volume> {
    pub(crate) config: StationConfig,
    pub(crate) zone: StationZone,
    pulses: &'a PulseCounter,
    wind: WindSampler,
    aggregator: BucketAggregator,
    pub(crate) storage: StorageManager<V, StationZone>,
    pub(crate) auth: AuthGuard,
    pub(crate) archive: ArchiveBuilder,
    pub(crate) latest: LatestReadings,
    pub(crate) platform: PlatformStats,
    pub(crate) boot: Instant,
    pub(crate) epoch: Option<i64>,
    environment_poll: PollTimer,
    particulate_poll: PollTimer,
    restored: bool,
    run_state: AppRunState,
}

impl<'a, V: Volume> Station<'a, V> {
    pub fn new(
        config: StationConfig,
        pulses: &'a PulseCounter,
        volume: V,
        boot: Instant,
    ) -> Result<Self, AppError> {
        config.validate().map_err(AppError::Config)?;

        let zone = StationZone::from_config(&config.time)
            .map_err(|e| AppError::Config(ConfigError::TimeZone(e)))?;
        let storage = StorageManager::new(volume, &config.log, zone)
            .with_row_weights(RowWeights::new(&config.log, &config.sensors));
        info!(
            "Station starting: {} s buckets, {} days in RAM, retention {} days",
            config.log.bucket_seconds, config.log.days_history, config.log.retention_days
        );

        Ok(Self {
            zone,
            pulses,
            wind: WindSampler::new(&config.wind),
            aggregator: BucketAggregator::new(config.log.bucket_seconds),
            storage,
            auth: AuthGuard::new(&config.api_password, &config.auth),
            archive: ArchiveBuilder::new(&config.archive),
            latest: LatestReadings::default(),
            platform: PlatformStats::default(),
            boot,
            epoch: None,
            environment_poll: PollTimer::new(Duration::from_millis(
                config.sensors.environment_poll_ms,
            )),
            particulate_poll: PollTimer::new(Duration::from_millis(
                config.sensors.particulate_poll_ms,
            )),
            restored: false,
            run_state: AppRunState::WaitingForTime,
            config,
        })
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    pub fn run_state(&self) -> AppRunState {
        self.run_state
    }

    pub fn restart_requested(&self) -> bool {
        self.run_state == AppRunState::Restarting
    }

    pub(crate) fn request_restart(&mut self) {
        info!("Restart requested");
        self.run_state = AppRunState::Restarting;
    }

    pub fn latest(&self) -> LatestReadings {
        self.latest
    }

    pub fn storage(&self) -> &StorageManager<V, StationZone> {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut StorageManager<V, StationZone> {
        &mut self.storage
    }

    pub fn aggregator(&self) -> &BucketAggregator {
        &self.aggregator
    }

    pub fn set_platform_stats(&mut self, stats: PlatformStats) {
        self.platform = stats;
    }

    /// One pass of the control loop.
    ///
    /// `epoch` is the synchronised wall clock, `None` until time sync
    /// succeeds. Readings always refresh the snapshot; they are aggregated and
    /// persisted only once the clock is known.
    pub async fn tick<E, P>(&mut self, now: Instant, epoch: Option<i64>, sensors: &mut SensorSet<E, P>)
    where
        E: Sensor<3, Readings = EnvironmentReadings>,
        P: Sensor<3, Readings = ParticulateReadings>,
    {
        self.update_clock(epoch);

        if let Some(reading) = self.wind.poll(self.pulses, now) {
            self.latest.wind_pps = Some(reading.pulses_per_second);
            self.latest.wind_ms = Some(reading.speed_ms);
            self.ingest_at(|ts| Sample::new(Metric::Wind, reading.speed_ms, ts));
        }

        if self.config.sensors.environment_enabled && self.environment_poll.due(now) {
            let result = match sensors.environment.as_mut() {
                Some(sensor) => Some(sensor.read().await),
                None => None,
            };
            self.record_environment(result);
        }

        if self.config.sensors.particulate_enabled && self.particulate_poll.due(now) {
            let result = match sensors.particulate.as_mut() {
                Some(sensor) => Some(sensor.read().await),
                None => None,
            };
            self.record_particulate(result);
        }

        if let Some(epoch) = self.epoch {
            if let Some(sealed) = self.aggregator.roll_to(epoch) {
                self.storage.process_bucket(sealed);
            }
        }
    }

    fn update_clock(&mut self, epoch: Option<i64>) {
        self.epoch = epoch;
        if self.run_state == AppRunState::Restarting {
            return;
        }
        match epoch {
            Some(epoch) => {
                if !self.restored {
                    info!("Wall clock known ({}), restoring history", epoch);
                    self.storage.restore(epoch);
                    self.restored = true;
                }
                self.run_state = AppRunState::Running;
            }
            None => self.run_state = AppRunState::WaitingForTime,
        }
    }

    fn ingest_at(&mut self, sample: impl FnOnce(i64) -> Sample) {
        let Some(epoch) = self.epoch else {
            return;
        };
        if let Some(sealed) = self.aggregator.ingest(sample(epoch)) {
            self.storage.process_bucket(sealed);
        }
    }

    fn ingest_readings<const N: usize, R: SensorReadings<N>>(&mut self, readings: Option<&R>) {
        let Some(epoch) = self.epoch else {
            return;
        };
        let samples = match readings {
            Some(r) => r.to_samples(epoch),
            None => R::METRICS.map(|metric| Sample::invalid(metric, epoch)),
        };
        for sample in samples {
            if let Some(sealed) = self.aggregator.ingest(sample) {
                self.storage.process_bucket(sealed);
            }
        }
    }

    fn record_environment(
        &mut self,
        result: Option<Result<EnvironmentReadings, SensorError>>,
    ) {
        match result {
            Some(Ok(r)) => {
                self.latest.environment_ok = true;
                self.latest.temperature_c = Some(r.temperature_c);
                self.latest.humidity_rh = Some(r.humidity_rh);
                self.latest.pressure_hpa = Some(r.pressure_hpa);
                self.ingest_readings::<3, _>(Some(&r));
            }
            failure => {
                if let Some(Err(e)) = failure {
                    if self.latest.environment_ok {
                        warn!("Environment sensor failed: {}", e);
                    }
                }
                self.latest.environment_ok = false;
                self.latest.temperature_c = None;
                self.latest.humidity_rh = None;
                self.latest.pressure_hpa = None;
                self.ingest_readings::<3, EnvironmentReadings>(None);
            }
        }
    }

    fn record_particulate(
        &mut self,
        result: Option<Result<ParticulateReadings, SensorError>>,
    ) {
        match result {
            Some(Ok(r)) => {
                self.latest.particulate_ok = true;
                self.latest.pm1 = Some(r.pm1);
                self.latest.pm25 = Some(r.pm25);
                self.latest.pm10 = Some(r.pm10);
                self.ingest_readings::<3, _>(Some(&r));
            }
            failure => {
                if let Some(Err(e)) = failure {
                    if self.latest.particulate_ok {
                        warn!("Particulate sensor failed: {}", e);
                    }
                }
                self.latest.particulate_ok = false;
                self.latest.pm1 = None;
                self.latest.pm25 = None;
                self.latest.pm10 = None;
                self.ingest_readings::<3, ParticulateReadings>(None);
            }
        }
    }
}
