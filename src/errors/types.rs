//! Error type definitions for iptv-sieve
//!
//! Only `AppError` ever reaches the binary. The other enums are returned by
//! individual operations and are handled where they occur: a bad URL drops a
//! line, a failed sample counts against one server, a failed lookup is
//! treated as "unknown", a failed append is logged and the run continues.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Blacklist store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// File system errors outside the blacklist store
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// HTTP client construction errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization errors (run report)
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Wrap an I/O error together with the path it happened on
    pub fn io<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Reasons a stream URL or `host:port` string was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UrlParseError {
    #[error("missing scheme separator")]
    MissingScheme,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("user info is not allowed in stream authorities")]
    UserInfo,

    #[error("invalid host: {0:?}")]
    InvalidHost(String),

    #[error("missing port")]
    MissingPort,

    #[error("invalid port: {0:?}")]
    InvalidPort(String),
}

/// Blacklist store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Reading the blacklist resource failed
    #[error("failed to read blacklist {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Appending to the blacklist resource failed
    #[error("failed to append to blacklist {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A line handed to the backend would break the one-entry-per-line format
    #[error("refusing to append multi-line entry: {0:?}")]
    InvalidLine(String),
}

/// Why a single probe sample did not produce data
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SampleFailure {
    /// The sample did not finish within the per-sample timeout
    #[error("timed out")]
    Timeout,

    /// TCP connect / request send failure
    #[error("connection failed: {0}")]
    Connect(String),

    /// Non-success HTTP status
    #[error("HTTP status {0}")]
    Status(u16),

    /// The body stream broke before any usable data arrived
    #[error("body read failed: {0}")]
    Body(String),

    /// The response ended without a single byte
    #[error("empty body")]
    EmptyBody,

    /// ffprobe could not be run or reported no stream with a codec
    #[error("ffprobe: {0}")]
    Ffprobe(String),
}

impl SampleFailure {
    /// Short machine-friendly tag used in logs and reports
    pub fn kind(&self) -> &'static str {
        match self {
            SampleFailure::Timeout => "timeout",
            SampleFailure::Connect(_) => "connect",
            SampleFailure::Status(_) => "status",
            SampleFailure::Body(_) => "body",
            SampleFailure::EmptyBody => "empty_body",
            SampleFailure::Ffprobe(_) => "ffprobe",
        }
    }
}

impl From<reqwest::Error> for SampleFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SampleFailure::Timeout
        } else if let Some(status) = err.status() {
            SampleFailure::Status(status.as_u16())
        } else if err.is_body() || err.is_decode() {
            SampleFailure::Body(err.to_string())
        } else {
            SampleFailure::Connect(err.to_string())
        }
    }
}

/// Why a geo/ISP lookup produced no answer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LookupFailure {
    #[error("could not resolve {0} to an IPv4 address")]
    Resolve(String),

    #[error("lookup request failed: {0}")]
    Network(String),

    #[error("lookup service returned HTTP {0}")]
    Status(u16),

    #[error("lookup service rejected the query: {0}")]
    Rejected(String),

    #[error("lookup response could not be decoded: {0}")]
    Decode(String),
}
