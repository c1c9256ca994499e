//! Desktop simulator for the anemo-rs weather station.
//!
//! Runs the anemo-core control loop against a directory on disk (standing in
//! for the SD card) with synthetic sensors and a background thread that
//! produces anemometer pulses. Requests given on the command line are served
//! through the same handlers the device uses once the run finishes.
//!
//! ```text
//! anemo-simulator --root ./sim --minutes 5 --request /api/now --request "/download_zip?days=2"
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration as StdDuration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use embassy_futures::block_on;
use embassy_time::Instant;
use log::{error, info, warn};

use anemo_core::api::{ApiRequest, ApiResponse, Endpoint};
use anemo_core::app_state::{AppRunState, PlatformStats, Station};
use anemo_core::config::StationConfig;
use anemo_core::sensors::{
    EnvironmentReadings, ParticulateReadings, PulseCounter, Sensor, SensorError, SensorSet,
};
use anemo_core::storage::{FileEntry, StorageError, Volume};

#[derive(Parser, Debug)]
#[command(name = "anemo-simulator", about = "Run the weather station core on the desktop")]
struct Args {
    /// Directory that plays the role of the SD card
    #[arg(long, default_value = "sim-volume")]
    root: PathBuf,

    /// JSON station configuration; missing keys take their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Simulated minutes to run the control loop for
    #[arg(long, default_value_t = 3)]
    minutes: u64,

    /// Simulated seconds per loop iteration
    #[arg(long, default_value_t = 1)]
    step_secs: u64,

    /// Seconds of simulated time before the wall clock becomes known
    #[arg(long, default_value_t = 0)]
    time_sync_after: u64,

    /// Mean anemometer pulse rate
    #[arg(long, default_value_t = 20.0)]
    pulse_hz: f64,

    /// Make the particulate sensor fail every read
    #[arg(long)]
    no_particulate: bool,

    /// Request path (with query) to serve after the run, repeatable
    #[arg(long = "request")]
    requests: Vec<String>,

    /// Where streamed responses (CSV, ZIP) are written
    #[arg(long, default_value = "sim-out")]
    out: PathBuf,
}

// ---------------------------------------------------------------------------
// Volume backed by a host directory
// ---------------------------------------------------------------------------

struct FsVolume {
    root: PathBuf,
}

impl FsVolume {
    fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        if path.split('/').any(|segment| segment == "..") {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(path.trim_start_matches('/')))
    }

    fn io_error(operation: &'static str, path: &Path, e: std::io::Error) -> StorageError {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(path.display().to_string())
        } else {
            StorageError::Io {
                operation,
                details: e.to_string(),
            }
        }
    }

    fn ensure_parent(path: &Path) -> Result<(), StorageError> {
        match path.parent() {
            Some(parent) => {
                fs::create_dir_all(parent).map_err(|e| Self::io_error("mkdir", parent, e))
            }
            None => Ok(()),
        }
    }
}

impl Volume for FsVolume {
    fn is_ready(&mut self) -> bool {
        fs::create_dir_all(&self.root).is_ok()
    }

    fn append(&mut self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.resolve(path)?;
        Self::ensure_parent(&path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Self::io_error("open", &path, e))?;
        file.write_all(data)
            .map_err(|e| Self::io_error("append", &path, e))?;
        file.sync_all().map_err(|e| Self::io_error("sync", &path, e))
    }

    fn write(&mut self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.resolve(path)?;
        Self::ensure_parent(&path)?;
        fs::write(&path, data).map_err(|e| Self::io_error("write", &path, e))
    }

    fn read_at(&mut self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError> {
        use std::io::{Read, Seek, SeekFrom};

        let path = self.resolve(path)?;
        let mut file = fs::File::open(&path).map_err(|e| Self::io_error("open", &path, e))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| Self::io_error("seek", &path, e))?;
        file.read(buf).map_err(|e| Self::io_error("read", &path, e))
    }

    fn size(&mut self, path: &str) -> Result<u64, StorageError> {
        let path = self.resolve(path)?;
        fs::metadata(&path)
            .map(|meta| meta.len())
            .map_err(|e| Self::io_error("stat", &path, e))
    }

    fn list(&mut self, dir: &str) -> Result<Vec<FileEntry>, StorageError> {
        let path = self.resolve(dir)?;
        let entries = match fs::read_dir(&path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_error("list", &path, e)),
        };

        let mut files = Vec::new();
        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                let modified = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .and_then(|d| i64::try_from(d.as_secs()).ok());
                files.push(FileEntry {
                    name: name.to_string(),
                    size: meta.len(),
                    modified,
                });
            }
        }
        Ok(files)
    }

    fn remove(&mut self, path: &str) -> Result<(), StorageError> {
        let path = self.resolve(path)?;
        fs::remove_file(&path).map_err(|e| Self::io_error("remove", &path, e))
    }
}

// ---------------------------------------------------------------------------
// Synthetic sensors
// ---------------------------------------------------------------------------

/// Generates environmental readings that drift slowly with simulated time.
struct MockEnvironment {
    t: f64,
}

impl Sensor<3> for MockEnvironment {
    type Readings = EnvironmentReadings;
    const NAME: &'static str = "mock-environment";

    async fn read(&mut self) -> Result<EnvironmentReadings, SensorError> {
        self.t += 2.0;
        let t = self.t;
        Ok(EnvironmentReadings {
            // 12–18 °C with a slow cycle
            temperature_c: (15.0 + 3.0 * (t / 600.0).sin()) as f32,
            humidity_rh: (65.0 + 10.0 * (t / 900.0).cos()) as f32,
            pressure_hpa: (1013.0 + 2.0 * (t / 1800.0).sin()) as f32,
        })
    }
}

struct MockParticulate {
    t: f64,
    broken: bool,
}

impl Sensor<3> for MockParticulate {
    type Readings = ParticulateReadings;
    const NAME: &'static str = "mock-particulate";

    async fn read(&mut self) -> Result<ParticulateReadings, SensorError> {
        if self.broken {
            return Err(SensorError::NotResponding { sensor: Self::NAME });
        }
        self.t += 2.0;
        let base = 12.0 + 6.0 * (self.t / 300.0).sin();
        Ok(ParticulateReadings {
            pm1: (base * 0.6) as f32,
            pm25: base as f32,
            pm10: (base * 1.8) as f32,
        })
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Split `/path?a=1&b=2` into the route and its fields.
fn parse_request(raw: &str) -> Option<(Endpoint, Vec<(String, String)>)> {
    let endpoint = Endpoint::from_path(raw)?;
    let fields = raw
        .split_once('?')
        .map(|(_, query)| {
            query
                .split('&')
                .filter(|pair| !pair.is_empty())
                .map(|pair| match pair.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (pair.to_string(), String::new()),
                })
                .collect()
        })
        .unwrap_or_default();
    Some((endpoint, fields))
}

fn serve<V: Volume>(station: &mut Station<'_, V>, raw: &str, out_dir: &Path) {
    let Some((endpoint, owned)) = parse_request(raw) else {
        warn!("Unknown route {}", raw);
        return;
    };
    let fields: Vec<(&str, &str)> = owned.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    let request = ApiRequest::new(endpoint, &fields);

    match station.handle(&request, Instant::now()) {
        ApiResponse::Json { status, body } => {
            println!("{} {} {}", status, raw, String::from_utf8_lossy(&body));
        }
        ApiResponse::Stream {
            content_type,
            attachment,
            mut stream,
        } => {
            let mut body = Vec::new();
            loop {
                match station.next_chunk(&mut stream, &mut body) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        error!("{} aborted: {}", raw, e);
                        return;
                    }
                }
            }

            match attachment {
                Some(name) => {
                    let target = out_dir.join(&name);
                    if let Err(e) = fs::create_dir_all(out_dir).and_then(|_| fs::write(&target, &body)) {
                        error!("Failed to save {}: {}", target.display(), e);
                    } else {
                        println!("200 {} -> {} ({}, {} bytes)", raw, target.display(), content_type, body.len());
                    }
                }
                None => println!("200 {} {}", raw, String::from_utf8_lossy(&body)),
            }
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<StationConfig, String> {
    let Some(path) = path else {
        return Ok(StationConfig::default());
    };
    let text = fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("{}: {}", path.display(), e))
}

/// Emit edges at roughly `hz` until `stop` is set, like the anemometer reed switch.
fn spawn_pulses(counter: Arc<PulseCounter>, hz: f64, stop: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        if hz <= 0.0 {
            return;
        }
        let period = StdDuration::from_secs_f64(1.0 / hz);
        while !stop.load(Ordering::Relaxed) {
            counter.on_pulse(Instant::now());
            thread::sleep(period);
        }
    })
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    let pulses = Arc::new(PulseCounter::from_config(&config.wind));
    let volume = FsVolume::new(args.root.clone());
    let mut station = match Station::new(config, &pulses, volume, Instant::now()) {
        Ok(station) => station,
        Err(e) => {
            error!("Station rejected configuration: {}", e);
            std::process::exit(2);
        }
    };
    station.set_platform_stats(PlatformStats {
        cpu_temp_c: Some(41.0),
        wifi_rssi: Some(-61),
        free_heap: None,
        heap_size: None,
    });

    let mut sensors = SensorSet::new(
        Some(MockEnvironment { t: 0.0 }),
        Some(MockParticulate {
            t: 0.0,
            broken: args.no_particulate,
        }),
    );

    let stop = Arc::new(AtomicBool::new(false));
    let pulse_thread = spawn_pulses(Arc::clone(&pulses), args.pulse_hz, Arc::clone(&stop));

    // Simulated wall clock starts now and advances `step_secs` per iteration
    let wall_start = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();
    let step = args.step_secs.max(1);
    let steps = args.minutes * 60 / step;
    info!(
        "Simulating {} steps of {} s into {}",
        steps,
        step,
        args.root.display()
    );

    for i in 0..steps {
        let elapsed = i * step;
        let epoch = (elapsed >= args.time_sync_after).then(|| wall_start + elapsed as i64);
        let now = Instant::now();

        block_on(station.tick(now, epoch, &mut sensors));

        if station.restart_requested() {
            break;
        }
        if elapsed % 60 == 0 && station.run_state() == AppRunState::Running {
            let latest = station.latest();
            info!(
                "t+{}s wind {:?} m/s, {:?} °C, pm2.5 {:?}",
                elapsed, latest.wind_ms, latest.temperature_c, latest.pm25
            );
        }
        // Real time only needs to pass for the pulse window
        thread::sleep(StdDuration::from_millis(50));
    }

    stop.store(true, Ordering::Relaxed);
    let _ = pulse_thread.join();

    for raw in &args.requests {
        serve(&mut station, raw, &args.out);
        if station.restart_requested() {
            info!("Restart requested, exiting");
            break;
        }
    }

    info!("Simulator exiting");
}
