//! Centralized error handling for iptv-sieve
//!
//! Errors are split by the layer that produces them so callers can
//! pattern-match on the kind instead of inspecting strings.
//!
//! # Error Categories
//!
//! - **URL parse errors**: malformed channel URLs, recovered by skipping the line
//! - **Store errors**: blacklist resource I/O failures
//! - **Sample failures**: a single probe sample that did not produce data
//! - **Lookup failures**: geo/ISP lookups that returned nothing usable
//! - **Application errors**: configuration and run-level failures
//!
//! # Usage
//!
//! ```rust
//! use iptv_sieve::errors::{AppError, AppResult};
//!
//! fn example_function() -> AppResult<String> {
//!     Err(AppError::configuration("probe.workers must be at least 1"))
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for blacklist store results
pub type StoreResult<T> = Result<T, StoreError>;
