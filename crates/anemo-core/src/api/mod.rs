//! Request handling for the station's HTTP surface.
//!
//! The transport (an HTTP server on the device, or the simulator's request
//! loop) parses a request into an [`ApiRequest`] and hands it to
//! [`Station::handle`](crate::app_state::Station::handle). Small answers come
//! back as complete JSON bodies; bucket histories, file downloads and archives
//! come back as a [`ResponseStream`] that the transport drains chunk by chunk
//! across loop iterations.

mod encode;
mod handlers;

pub use encode::*;

use alloc::string::String;
use alloc::vec::Vec;

use serde::Serialize;
use thiserror_no_std::Error;

use crate::archive::ArchiveStream;
use crate::storage::StorageError;

/// Every route the station answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Now,
    Buckets,
    BucketsCompact,
    Days,
    Files,
    UiFiles,
    Download,
    DownloadZip,
    ClearData,
    Delete,
    Reboot,
    Upload,
}

impl Endpoint {
    pub fn from_path(path: &str) -> Option<Self> {
        let path = path.split('?').next().unwrap_or(path);
        let endpoint = match path.trim_end_matches('/') {
            "/api/now" => Self::Now,
            "/api/buckets" => Self::Buckets,
            "/api/buckets_compact" => Self::BucketsCompact,
            "/api/days" => Self::Days,
            "/api/files" => Self::Files,
            "/api/ui_files" => Self::UiFiles,
            "/download" => Self::Download,
            "/download_zip" => Self::DownloadZip,
            "/api/clear_data" => Self::ClearData,
            "/api/delete" => Self::Delete,
            "/api/reboot" => Self::Reboot,
            "/upload" => Self::Upload,
            _ => return None,
        };
        Some(endpoint)
    }

    pub const fn path(self) -> &'static str {
        match self {
            Self::Now => "/api/now",
            Self::Buckets => "/api/buckets",
            Self::BucketsCompact => "/api/buckets_compact",
            Self::Days => "/api/days",
            Self::Files => "/api/files",
            Self::UiFiles => "/api/ui_files",
            Self::Download => "/download",
            Self::DownloadZip => "/download_zip",
            Self::ClearData => "/api/clear_data",
            Self::Delete => "/api/delete",
            Self::Reboot => "/api/reboot",
            Self::Upload => "/upload",
        }
    }
}

/// A parsed request: the route, its query/form fields and the raw body.
///
/// For `/upload` the body carries the file content.
#[derive(Debug, Clone, Copy)]
pub struct ApiRequest<'a> {
    pub endpoint: Endpoint,
    pub fields: &'a [(&'a str, &'a str)],
    pub body: &'a [u8],
}

impl<'a> ApiRequest<'a> {
    pub fn new(endpoint: Endpoint, fields: &'a [(&'a str, &'a str)]) -> Self {
        Self {
            endpoint,
            fields,
            body: &[],
        }
    }

    pub fn with_body(mut self, body: &'a [u8]) -> Self {
        self.body = body;
        self
    }

    pub fn field(&self, name: &str) -> Option<&'a str> {
        self.fields
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    AuthFailed,
    #[error("too many attempts")]
    RateLimited,
    #[error("storage unavailable")]
    Storage,
}

impl ApiError {
    pub const fn status(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) => 400,
            Self::AuthFailed => 401,
            Self::NotFound => 404,
            Self::RateLimited => 429,
            Self::Storage => 503,
        }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::AuthFailed => "unauthorized",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::Storage => "storage_unavailable",
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::NotFound(_) => Self::NotFound,
            StorageError::InvalidPath(_) => Self::InvalidRequest("invalid path"),
            StorageError::Unavailable | StorageError::Io { .. } => Self::Storage,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    ok: bool,
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a str>,
}

/// Bodies that can be streamed across several loop iterations.
pub enum ResponseStream {
    Buckets(BucketStream),
    File(FileStream),
    Archive(ArchiveStream),
}

pub enum ApiResponse {
    Json {
        status: u16,
        body: Vec<u8>,
    },
    Stream {
        content_type: &'static str,
        /// Suggested download file name
        attachment: Option<String>,
        stream: ResponseStream,
    },
}

impl ApiResponse {
    pub fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::Json { status: 200, body },
            Err(_) => Self::error(&ApiError::InvalidRequest("unencodable response")),
        }
    }

    pub fn ok() -> Self {
        Self::Json {
            status: 200,
            body: Vec::from(&br#"{"ok":true}"#[..]),
        }
    }

    pub fn error(error: &ApiError) -> Self {
        let detail = match error {
            ApiError::InvalidRequest(reason) => Some(*reason),
            _ => None,
        };
        let body = serde_json::to_vec(&ErrorBody {
            ok: false,
            error: error.code(),
            detail,
        })
        .unwrap_or_default();
        Self::Json {
            status: error.status(),
            body,
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            Self::Json { status, .. } => *status,
            Self::Stream { .. } => 200,
        }
    }
}
