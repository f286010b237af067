//! Shared helpers

pub mod human_format;
pub mod url;

pub use human_format::{format_bytes, format_elapsed, format_throughput};
pub use url::StreamUrl;
