use alloc::string::String;
use alloc::vec::Vec;

use embassy_time::Instant;
use log::{debug, info};

use super::{
    ApiError, ApiRequest, ApiResponse, BucketFormat, BucketStream, ClearReceipt, DaysDocument,
    Endpoint, FileListing, FileStream, ResponseStream, Snapshot, UiFileListing, UploadReceipt,
};
use crate::app_state::Station;
use crate::archive::{self, Stored};
use crate::auth::{AuthOutcome, OperationClass};
use crate::config::SECONDS_PER_DAY;
use crate::metrics::Pollutant;
use crate::storage::Volume;
use crate::storage::volume::join_path;
use crate::time::{local_date, local_label};

/// Bytes of archive data produced per chunk.
const ARCHIVE_CHUNK: usize = 1024;

impl<V: Volume> Station<'_, V> {
    /// Answer one request. Errors come back as structured JSON bodies.
    pub fn handle(&mut self, request: &ApiRequest<'_>, now: Instant) -> ApiResponse {
        match self.dispatch(request, now) {
            Ok(response) => response,
            Err(e) => {
                debug!("{} -> {} ({})", request.endpoint.path(), e.status(), e);
                ApiResponse::error(&e)
            }
        }
    }

    /// Render the next piece of a streamed response into `out`.
    ///
    /// Returns `Ok(false)` once the stream has nothing more to send.
    pub fn next_chunk(&mut self, stream: &mut ResponseStream, out: &mut Vec<u8>) -> Result<bool, ApiError> {
        match stream {
            ResponseStream::Buckets(buckets) => {
                buckets.fill(self.storage.buckets(), out);
                Ok(!buckets.is_done())
            }
            ResponseStream::File(file) => {
                file.fill(self.storage.volume_mut(), out)?;
                Ok(!file.is_done())
            }
            ResponseStream::Archive(zip) => {
                zip.fill(self.storage.volume_mut(), out, ARCHIVE_CHUNK)?;
                Ok(!zip.is_done())
            }
        }
    }

    /// Consistent copy of the latest readings and status flags.
    pub fn snapshot(&self, now: Instant) -> Snapshot {
        let latest = self.latest;
        let aqi_pm25 = latest.pm25.and_then(|pm| Pollutant::Pm25.aqi(pm));
        let aqi_pm10 = latest.pm10.and_then(|pm| Pollutant::Pm10.aqi(pm));

        Snapshot {
            epoch: self.epoch,
            local_time: self
                .epoch
                .map(|epoch| String::from(local_label(&self.zone, epoch).as_str())),
            wind_pps: latest.wind_pps,
            wind_ms: latest.wind_ms,
            bme280_ok: latest.environment_ok,
            temp_c: latest.temperature_c,
            hum_rh: latest.humidity_rh,
            press_hpa: latest.pressure_hpa,
            pms5003_ok: latest.particulate_ok,
            pm1: latest.pm1,
            pm25: latest.pm25,
            pm10: latest.pm10,
            aqi_pm25: aqi_pm25.map(|a| a.index),
            aqi_pm25_category: aqi_pm25.map(|a| a.category.label()),
            aqi_pm10: aqi_pm10.map(|a| a.index),
            aqi_pm10_category: aqi_pm10.map(|a| a.category.label()),
            sd_ok: self.storage.is_available(),
            cpu_temp_c: self.platform.cpu_temp_c,
            uptime_s: now.saturating_duration_since(self.boot).as_secs(),
            retention_days: self.config.log.retention_days,
            wifi_rssi: self.platform.wifi_rssi,
            free_heap: self.platform.free_heap,
            heap_size: self.platform.heap_size,
        }
    }

    fn dispatch(&mut self, request: &ApiRequest<'_>, now: Instant) -> Result<ApiResponse, ApiError> {
        match request.endpoint {
            Endpoint::Now => Ok(ApiResponse::json(&self.snapshot(now))),
            Endpoint::Buckets => Ok(self.bucket_stream(BucketFormat::Verbose)),
            Endpoint::BucketsCompact => Ok(self.bucket_stream(BucketFormat::Compact)),
            Endpoint::Days => Ok(ApiResponse::json(&DaysDocument(self.storage.days()))),
            Endpoint::Files => self.file_listing(request.field("dir")),
            Endpoint::UiFiles => {
                let files = self.storage.list_dir(self.config.ui.ui_dir.trim_matches('/'))?;
                Ok(ApiResponse::json(&UiFileListing::new(files)))
            }
            Endpoint::Download => self.download(request),
            Endpoint::DownloadZip => self.download_zip(request),
            Endpoint::ClearData => {
                self.authorize(request, OperationClass::ClearData, now)?;
                let deleted = self.storage.clear_all()?;
                Ok(ApiResponse::json(&ClearReceipt { ok: true, deleted }))
            }
            Endpoint::Delete => {
                self.authorize(request, OperationClass::DeleteFile, now)?;
                let filename = request
                    .field("filename")
                    .ok_or(ApiError::InvalidRequest("missing filename"))?;
                self.storage.delete_file(filename)?;
                Ok(ApiResponse::ok())
            }
            Endpoint::Reboot => {
                self.authorize(request, OperationClass::Reboot, now)?;
                self.request_restart();
                Ok(ApiResponse::ok())
            }
            Endpoint::Upload => {
                self.authorize(request, OperationClass::Upload, now)?;
                let path = self.upload_path(request.field("path"))?;
                self.storage.volume_mut().write(&path, request.body)?;
                info!("Uploaded {} ({} bytes)", path, request.body.len());
                Ok(ApiResponse::json(&UploadReceipt {
                    ok: true,
                    bytes: request.body.len(),
                }))
            }
        }
    }

    fn authorize(
        &mut self,
        request: &ApiRequest<'_>,
        class: OperationClass,
        now: Instant,
    ) -> Result<(), ApiError> {
        let password = request
            .field("pw")
            .ok_or(ApiError::InvalidRequest("missing pw"))?;
        match self.auth.check(password, class, now) {
            AuthOutcome::Authorized => Ok(()),
            AuthOutcome::Unauthorized => Err(ApiError::AuthFailed),
            AuthOutcome::RateLimited => Err(ApiError::RateLimited),
        }
    }

    /// `/api/files` for the log directory (the default) or the UI directory.
    fn file_listing(&mut self, dir: Option<&str>) -> Result<ApiResponse, ApiError> {
        let data_dir = String::from(self.storage.daily_log().dir());
        let requested = dir
            .map(|d| d.trim().trim_matches('/'))
            .filter(|d| !d.is_empty())
            .unwrap_or(data_dir.as_str());

        if requested == data_dir {
            let files = self.storage.list_files()?;
            return Ok(ApiResponse::json(&FileListing::new(&data_dir, files)));
        }
        let ui_dir = self.config.ui.ui_dir.trim_matches('/');
        if requested == ui_dir {
            let files = self.storage.list_dir(ui_dir)?;
            return Ok(ApiResponse::json(&FileListing::new(ui_dir, files)));
        }
        Err(ApiError::InvalidRequest("unknown directory"))
    }

    fn bucket_stream(&self, format: BucketFormat) -> ApiResponse {
        let now_epoch = self.epoch.unwrap_or(0);
        let since = match self.epoch {
            Some(epoch) => epoch - i64::from(SECONDS_PER_DAY),
            None => i64::MIN,
        };
        let stream = BucketStream::new(
            format,
            self.storage.buckets(),
            since,
            now_epoch,
            self.config.log.bucket_seconds,
        );
        ApiResponse::Stream {
            content_type: "application/json",
            attachment: None,
            stream: ResponseStream::Buckets(stream),
        }
    }

    fn download(&mut self, request: &ApiRequest<'_>) -> Result<ApiResponse, ApiError> {
        let requested = request
            .field("filename")
            .ok_or(ApiError::InvalidRequest("missing filename"))?;
        let name = self
            .storage
            .daily_log()
            .resolve_name(requested)
            .ok_or(ApiError::InvalidRequest("invalid filename"))?;
        let path = self.storage.daily_log().path_for(&name);
        self.storage.volume_mut().size(&path)?;

        Ok(ApiResponse::Stream {
            content_type: "text/csv",
            attachment: Some(String::from(name.as_str())),
            stream: ResponseStream::File(FileStream::new(path)),
        })
    }

    fn download_zip(&mut self, request: &ApiRequest<'_>) -> Result<ApiResponse, ApiError> {
        let days = self.archive.days_for(request.field("days"));
        let stream = self.archive.build(&mut self.storage, days, Stored)?;
        let today = self.epoch.and_then(|epoch| local_date(&self.zone, epoch));

        Ok(ApiResponse::Stream {
            content_type: "application/zip",
            attachment: Some(archive::archive_name(today, days)),
            stream: ResponseStream::Archive(stream),
        })
    }

    /// Destination for an uploaded UI asset, always inside the UI directory.
    fn upload_path(&self, requested: Option<&str>) -> Result<String, ApiError> {
        let requested = requested
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(ApiError::InvalidRequest("missing path"))?;
        let relative = requested.trim_start_matches('/');

        if relative.contains('\\')
            || relative
                .split('/')
                .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(ApiError::InvalidRequest("invalid path"));
        }

        let data_dir = self.storage.daily_log().dir();
        if relative.split('/').next() == Some(data_dir) {
            return Err(ApiError::InvalidRequest("data directory is read-only"));
        }

        let ui_dir = self.config.ui.ui_dir.trim_matches('/');
        let inside = match relative.strip_prefix(ui_dir) {
            Some(rest) if rest.starts_with('/') => &rest[1..],
            _ => relative,
        };
        Ok(join_path(ui_dir, inside))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StationConfig;
    use crate::sampling::Metric;
    use crate::sensors::PulseCounter;
    use crate::storage::{Bucket, MemoryVolume};
    use embassy_time::Duration;

    // 2025-12-18 00:00:00 UTC
    const MIDNIGHT: i64 = 1_766_016_000;

    fn json_of(response: ApiResponse) -> (u16, serde_json::Value) {
        match response {
            ApiResponse::Json { status, body } => (status, serde_json::from_slice(&body).unwrap()),
            ApiResponse::Stream { .. } => panic!("expected a JSON body"),
        }
    }

    fn station(pulses: &PulseCounter) -> Station<'_, MemoryVolume> {
        Station::new(StationConfig::default(), pulses, MemoryVolume::new(), Instant::from_secs(0))
            .unwrap()
    }

    #[test]
    fn test_snapshot_before_time_sync() {
        let pulses = PulseCounter::new(Duration::from_micros(2000));
        let mut station = station(&pulses);
        station.latest.pm25 = Some(15.07);
        station.latest.particulate_ok = true;

        let request = ApiRequest::new(Endpoint::Now, &[]);
        let (status, now) = json_of(station.handle(&request, Instant::from_secs(42)));
        assert_eq!(status, 200);
        assert!(now["epoch"].is_null());
        assert!(now["local_time"].is_null());
        assert_eq!(now["uptime_s"], 42);
        assert_eq!(now["aqi_pm25"], 57);
        assert_eq!(now["aqi_pm25_category"], "Moderate");
        assert!(now["aqi_pm10"].is_null());
        assert_eq!(now["sd_ok"], true);
        assert_eq!(now["retention_days"], 0);
    }

    #[test]
    fn test_privileged_endpoints_check_password() {
        let pulses = PulseCounter::new(Duration::from_micros(2000));
        let mut station = station(&pulses);

        let bad = [("pw", "nope")];
        let request = ApiRequest::new(Endpoint::Reboot, &bad);
        let (status, body) = json_of(station.handle(&request, Instant::from_secs(1)));
        assert_eq!(status, 401);
        assert_eq!(body["ok"], false);
        assert!(!station.restart_requested());

        let good = [("pw", "ChangeMe")];
        let request = ApiRequest::new(Endpoint::Reboot, &good);
        let (status, body) = json_of(station.handle(&request, Instant::from_secs(2)));
        assert_eq!(status, 200);
        assert_eq!(body["ok"], true);
        assert!(station.restart_requested());
    }

    #[test]
    fn test_missing_password_is_a_bad_request() {
        let pulses = PulseCounter::new(Duration::from_micros(2000));
        let mut station = station(&pulses);

        let (status, body) = json_of(station.handle(
            &ApiRequest::new(Endpoint::Reboot, &[]),
            Instant::from_secs(1),
        ));
        assert_eq!(status, 400);
        assert_eq!(body["error"], "invalid_request");
        assert_eq!(station.auth.state(OperationClass::Reboot).failed_attempts, 0);
        assert!(!station.restart_requested());

        // An empty password is still a wrong one
        let empty = [("pw", "")];
        let (status, _) = json_of(station.handle(
            &ApiRequest::new(Endpoint::Reboot, &empty),
            Instant::from_secs(2),
        ));
        assert_eq!(status, 401);
        assert_eq!(station.auth.state(OperationClass::Reboot).failed_attempts, 1);
    }

    #[test]
    fn test_failure_counter_ignores_reads_and_other_classes() {
        let pulses = PulseCounter::new(Duration::from_micros(2000));
        let mut station = station(&pulses);
        let bad = [("pw", "nope")];
        let upload = [("pw", "ChangeMe"), ("path", "app.js")];
        let delete = [("pw", "ChangeMe"), ("filename", "20200101.csv")];

        for round in 0..3u64 {
            let now = Instant::from_secs(round * 10);
            let (status, _) = json_of(station.handle(&ApiRequest::new(Endpoint::Reboot, &bad), now));
            assert_eq!(status, 401);

            for endpoint in [Endpoint::Now, Endpoint::Files, Endpoint::UiFiles, Endpoint::Days] {
                let (status, _) = json_of(station.handle(&ApiRequest::new(endpoint, &[]), now));
                assert_eq!(status, 200);
            }
            let _ = station.handle(&ApiRequest::new(Endpoint::Buckets, &[]), now);

            let request = ApiRequest::new(Endpoint::Upload, &upload).with_body(b"x");
            assert_eq!(json_of(station.handle(&request, now)).0, 200);
            // Authorized, then the file is missing
            let request = ApiRequest::new(Endpoint::Delete, &delete);
            assert_eq!(json_of(station.handle(&request, now)).0, 404);
        }

        assert_eq!(station.auth.state(OperationClass::Reboot).failed_attempts, 3);
        for class in [
            OperationClass::ClearData,
            OperationClass::DeleteFile,
            OperationClass::Upload,
        ] {
            assert_eq!(station.auth.state(class).failed_attempts, 0);
        }
        assert!(!station.restart_requested());
    }

    #[test]
    fn test_file_listings_follow_dir() {
        let pulses = PulseCounter::new(Duration::from_micros(2000));
        let mut station = station(&pulses);
        station.storage_mut().volume_mut().set_clock(MIDNIGHT);
        station.storage_mut().volume_mut().write("web/index.html", b"<html>").unwrap();
        station.storage_mut().volume_mut().write("web/app.js", b"1;").unwrap();
        let mut bucket = Bucket::new(MIDNIGHT);
        bucket.record(Metric::Wind, 1.0);
        station.storage_mut().process_bucket(bucket);

        let mut listing = |fields: &[(&str, &str)]| {
            json_of(station.handle(&ApiRequest::new(Endpoint::Files, fields), Instant::from_secs(1)))
        };
        let paths = |doc: &serde_json::Value| -> Vec<String> {
            doc["files"]
                .as_array()
                .unwrap()
                .iter()
                .map(|f| String::from(f["path"].as_str().unwrap()))
                .collect()
        };

        let (status, logs) = listing(&[]);
        assert_eq!(status, 200);
        assert_eq!(logs["dir"], "data");
        assert_eq!(paths(&logs), vec!["20251218.csv"]);
        assert_eq!(listing(&[("dir", "data")]).1, logs);

        let (status, ui) = listing(&[("dir", "/web/")]);
        assert_eq!(status, 200);
        assert_eq!(ui["dir"], "web");
        assert_eq!(paths(&ui), vec!["app.js", "index.html"]);

        assert_eq!(listing(&[("dir", "config")]).0, 400);
        assert_eq!(listing(&[("dir", "../data")]).0, 400);

        let (status, ui) = json_of(station.handle(
            &ApiRequest::new(Endpoint::UiFiles, &[]),
            Instant::from_secs(1),
        ));
        assert_eq!(status, 200);
        assert_eq!(ui["ok"], true);
        assert_eq!(ui["files"][1]["file"], "index.html");
        assert_eq!(ui["files"][1]["size"], 6);
        assert_eq!(ui["files"][1]["lastModified"], MIDNIGHT);
    }

    #[test]
    fn test_upload_stays_inside_ui_dir() {
        let pulses = PulseCounter::new(Duration::from_micros(2000));
        let mut station = station(&pulses);
        assert_eq!(station.upload_path(Some("/web/index.html")).unwrap(), "web/index.html");
        assert_eq!(station.upload_path(Some("app.js")).unwrap(), "web/app.js");
        assert_eq!(station.upload_path(Some("css/site.css")).unwrap(), "web/css/site.css");
        assert!(station.upload_path(Some("/web/../data/x.csv")).is_err());
        assert!(station.upload_path(Some("/data/20251218.csv")).is_err());
        assert!(station.upload_path(Some("")).is_err());
        assert!(station.upload_path(None).is_err());

        let fields = [("pw", "ChangeMe"), ("path", "/web/index.html")];
        let request = ApiRequest::new(Endpoint::Upload, &fields).with_body(b"<html></html>");
        let (status, body) = json_of(station.handle(&request, Instant::from_secs(1)));
        assert_eq!(status, 200);
        assert_eq!(body["bytes"], 13);
        assert_eq!(
            station.storage().volume().contents("web/index.html"),
            Some(&b"<html></html>"[..])
        );
    }

    #[test]
    fn test_download_validates_names() {
        let pulses = PulseCounter::new(Duration::from_micros(2000));
        let mut station = station(&pulses);
        let mut bucket = Bucket::new(MIDNIGHT);
        bucket.record(Metric::Wind, 1.0);
        station.storage_mut().process_bucket(bucket);

        let missing = [("filename", "20200101.csv")];
        let (status, _) = json_of(station.handle(
            &ApiRequest::new(Endpoint::Download, &missing),
            Instant::from_secs(1),
        ));
        assert_eq!(status, 404);

        let sneaky = [("filename", "../config.json")];
        let (status, _) = json_of(station.handle(
            &ApiRequest::new(Endpoint::Download, &sneaky),
            Instant::from_secs(1),
        ));
        assert_eq!(status, 400);

        let good = [("filename", "20251218.csv")];
        let response = station.handle(&ApiRequest::new(Endpoint::Download, &good), Instant::from_secs(1));
        let ApiResponse::Stream {
            attachment,
            mut stream,
            ..
        } = response
        else {
            panic!("expected a stream");
        };
        assert_eq!(attachment.as_deref(), Some("20251218.csv"));
        let mut out = Vec::new();
        while station.next_chunk(&mut stream, &mut out).unwrap() {}
        assert!(out.starts_with(b"epoch,avgWind"));
    }

    #[test]
    fn test_storage_outage_reports_503() {
        let pulses = PulseCounter::new(Duration::from_micros(2000));
        let mut station = station(&pulses);
        station.storage_mut().volume_mut().set_available(false);
        let (status, body) = json_of(station.handle(
            &ApiRequest::new(Endpoint::Files, &[]),
            Instant::from_secs(1),
        ));
        assert_eq!(status, 503);
        assert_eq!(body["error"], "storage_unavailable");
    }

    struct SteadyEnvironment;

    impl crate::sensors::Sensor<3> for SteadyEnvironment {
        type Readings = crate::sensors::EnvironmentReadings;
        const NAME: &'static str = "steady";

        async fn read(&mut self) -> Result<Self::Readings, crate::sensors::SensorError> {
            Ok(crate::sensors::EnvironmentReadings {
                temperature_c: 21.5,
                humidity_rh: 48.0,
                pressure_hpa: 1012.0,
            })
        }
    }

    struct Absent;

    impl crate::sensors::Sensor<3> for Absent {
        type Readings = crate::sensors::ParticulateReadings;
        const NAME: &'static str = "absent";

        async fn read(&mut self) -> Result<Self::Readings, crate::sensors::SensorError> {
            Err(crate::sensors::SensorError::NotResponding { sensor: Self::NAME })
        }
    }

    fn drain(station: &mut Station<'_, MemoryVolume>, response: ApiResponse) -> (Option<String>, Vec<u8>) {
        let ApiResponse::Stream {
            attachment,
            mut stream,
            ..
        } = response
        else {
            panic!("expected a stream");
        };
        let mut out = Vec::new();
        while station.next_chunk(&mut stream, &mut out).unwrap() {}
        (attachment, out)
    }

    #[test]
    fn test_samples_flow_to_every_endpoint() {
        let pulses = PulseCounter::new(Duration::from_micros(2000));
        let mut station = station(&pulses);
        let mut sensors = crate::sensors::SensorSet::new(Some(SteadyEnvironment), None::<Absent>);

        // Three minutes before midnight through two minutes after, one tick per 10 s
        let start = MIDNIGHT - 180;
        for step in 0..30i64 {
            let now = Instant::from_secs(step as u64 * 10);
            embassy_futures::block_on(station.tick(now, Some(start + step * 10), &mut sensors));
        }

        let response = station_buckets(&mut station, Endpoint::Buckets);
        let (_, body) = drain(&mut station, response);
        let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc["bucket_seconds"], 60);
        let buckets = doc["buckets"].as_array().unwrap();
        assert_eq!(buckets.len(), 4);
        assert_eq!(buckets[0]["timestamp"], start);
        assert_eq!(buckets[0]["temperature"], 21.5);

        let response = station_buckets(&mut station, Endpoint::BucketsCompact);
        let (_, body) = drain(&mut station, response);
        let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc["buckets"][0][0], start);

        // The previous day was sealed when the first post-midnight bucket closed
        let (_, days) = json_of(station.handle(&ApiRequest::new(Endpoint::Days, &[]), Instant::from_secs(300)));
        assert_eq!(days["days"].as_array().unwrap().len(), 1);

        let (_, files) = json_of(station.handle(&ApiRequest::new(Endpoint::Files, &[]), Instant::from_secs(300)));
        let names: Vec<&str> = files["files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["path"].as_str().unwrap())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names[0].ends_with("20251218.csv"));

        let fields = [("days", "2")];
        let response = station.handle(&ApiRequest::new(Endpoint::DownloadZip, &fields), Instant::from_secs(300));
        let (attachment, zip) = drain(&mut station, response);
        assert_eq!(attachment.as_deref(), Some("weather_20251218_2d.zip"));
        assert_eq!(&zip[..4], b"PK\x03\x04");

        let clear = [("pw", "ChangeMe")];
        let (status, receipt) = json_of(station.handle(&ApiRequest::new(Endpoint::ClearData, &clear), Instant::from_secs(301)));
        assert_eq!(status, 200);
        assert_eq!(receipt["deleted"], 2);
        // RAM history survives clearing the logs
        assert!(!station.storage().buckets().is_empty());
    }

    fn station_buckets(station: &mut Station<'_, MemoryVolume>, endpoint: Endpoint) -> ApiResponse {
        station.handle(&ApiRequest::new(endpoint, &[]), Instant::from_secs(300))
    }
}
