use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};

pub mod defaults;
pub mod duration_serde;

use defaults::*;

/// Environment variable prefix, e.g. `IPTV_SIEVE_PROBE__WORKERS=8`
pub const ENV_PREFIX: &str = "IPTV_SIEVE_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub inputs: InputConfig,
    #[serde(default)]
    pub blacklist: BlacklistConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Channel-list resources, read in order
    #[serde(default = "default_channel_lists")]
    pub channel_lists: Vec<PathBuf>,
    /// Category for data lines that appear before any category marker
    #[serde(default = "default_category")]
    pub default_category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistConfig {
    #[serde(default = "default_blacklist_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_path")]
    pub path: PathBuf,
    /// Optional JSON run report
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_path: Option<PathBuf>,
}

/// How a single sample is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMethod {
    /// Stream the first chunk of the body over HTTP
    #[default]
    Http,
    /// Ask ffprobe whether the URL carries a stream with a codec
    Ffprobe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// URLs sampled per server
    #[serde(default = "default_sample_count")]
    pub sample_count: usize,
    /// Hard timeout for one sample
    #[serde(default = "default_sample_timeout", with = "duration_serde::duration")]
    pub sample_timeout: Duration,
    /// Bytes read per sample
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Peak throughput (MiB/s) a server needs to qualify
    #[serde(default = "default_min_throughput")]
    pub min_throughput: f64,
    /// Worker pool width
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub method: ProbeMethod,
    #[serde(default = "default_ffprobe_command")]
    pub ffprobe_command: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// TCP connect check before any sample
    #[serde(default = "default_connect_precheck")]
    pub connect_precheck: bool,
    #[serde(default = "default_connect_timeout", with = "duration_serde::duration")]
    pub connect_timeout: Duration,
}

/// A (region, operator) pair that excludes a server without probing
///
/// The region is compared case-insensitively; the operator matches when it
/// appears anywhere in the lookup's ISP label (case-insensitive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub region: String,
    pub operator: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_policy_enabled")]
    pub enabled: bool,
    /// Base URL of an ip-api.com compatible lookup service
    #[serde(default = "default_lookup_url")]
    pub lookup_url: String,
    #[serde(default = "default_lookup_timeout", with = "duration_serde::duration")]
    pub lookup_timeout: Duration,
    /// Minimum spacing between two lookups, across all workers
    #[serde(
        default = "default_min_lookup_interval",
        with = "duration_serde::duration"
    )]
    pub min_lookup_interval: Duration,
    #[serde(default = "default_deny_rules")]
    pub deny: Vec<PolicyRule>,
}

// Input defaults
fn default_channel_lists() -> Vec<PathBuf> {
    DEFAULT_CHANNEL_LISTS.iter().map(PathBuf::from).collect()
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

// Blacklist / output defaults
fn default_blacklist_path() -> PathBuf {
    PathBuf::from(DEFAULT_BLACKLIST_PATH)
}

fn default_output_path() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_PATH)
}

// Probe defaults
fn default_sample_count() -> usize {
    DEFAULT_SAMPLE_COUNT
}

fn default_sample_timeout() -> Duration {
    Duration::from_secs(DEFAULT_SAMPLE_TIMEOUT_SECS)
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_min_throughput() -> f64 {
    DEFAULT_MIN_THROUGHPUT
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_ffprobe_command() -> String {
    DEFAULT_FFPROBE_COMMAND.to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_connect_precheck() -> bool {
    DEFAULT_CONNECT_PRECHECK
}

fn default_connect_timeout() -> Duration {
    Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS)
}

// Policy defaults
fn default_policy_enabled() -> bool {
    DEFAULT_POLICY_ENABLED
}

fn default_lookup_url() -> String {
    DEFAULT_LOOKUP_URL.to_string()
}

fn default_lookup_timeout() -> Duration {
    Duration::from_secs(DEFAULT_LOOKUP_TIMEOUT_SECS)
}

fn default_min_lookup_interval() -> Duration {
    Duration::from_millis(DEFAULT_MIN_LOOKUP_INTERVAL_MS)
}

fn default_deny_rules() -> Vec<PolicyRule> {
    DEFAULT_BLOCKED_REGIONS
        .iter()
        .flat_map(|region| {
            DEFAULT_BLOCKED_OPERATORS.iter().map(move |operator| PolicyRule {
                region: region.to_string(),
                operator: operator.to_string(),
            })
        })
        .collect()
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            channel_lists: default_channel_lists(),
            default_category: default_category(),
        }
    }
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            path: default_blacklist_path(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            report_path: None,
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            sample_count: default_sample_count(),
            sample_timeout: default_sample_timeout(),
            chunk_size: default_chunk_size(),
            min_throughput: default_min_throughput(),
            workers: default_workers(),
            method: ProbeMethod::default(),
            ffprobe_command: default_ffprobe_command(),
            user_agent: default_user_agent(),
            connect_precheck: default_connect_precheck(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            enabled: default_policy_enabled(),
            lookup_url: default_lookup_url(),
            lookup_timeout: default_lookup_timeout(),
            min_lookup_interval: default_min_lookup_interval(),
            deny: default_deny_rules(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inputs: InputConfig::default(),
            blacklist: BlacklistConfig::default(),
            output: OutputConfig::default(),
            probe: ProbeConfig::default(),
            policy: PolicyConfig::default(),
        }
    }
}

impl Config {
    /// Load defaults, then the TOML file, then `IPTV_SIEVE_*` environment overrides
    ///
    /// A missing file is created with the defaults so operators have
    /// something to edit.
    pub fn load_from_file(config_file: &str) -> AppResult<Self> {
        let path = Path::new(config_file);
        if !path.exists() {
            match toml::to_string_pretty(&Self::default()) {
                Ok(contents) => match std::fs::write(path, contents) {
                    Ok(()) => info!("Created default config file: {}", config_file),
                    Err(e) => warn!("Could not write default config file {}: {}", config_file, e),
                },
                Err(e) => warn!("Could not render default config: {}", e),
            }
        }

        let config: Self = Self::figment(path)
            .extract()
            .map_err(|e| AppError::configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn validate(&self) -> AppResult<()> {
        let probe = &self.probe;
        if probe.sample_count == 0 {
            return Err(AppError::configuration("probe.sample_count must be at least 1"));
        }
        if probe.workers == 0 {
            return Err(AppError::configuration("probe.workers must be at least 1"));
        }
        if probe.chunk_size == 0 {
            return Err(AppError::configuration("probe.chunk_size must be at least 1 byte"));
        }
        if probe.sample_timeout.is_zero() {
            return Err(AppError::configuration("probe.sample_timeout must be non-zero"));
        }
        if probe.connect_precheck && probe.connect_timeout.is_zero() {
            return Err(AppError::configuration("probe.connect_timeout must be non-zero"));
        }
        if !probe.min_throughput.is_finite() || probe.min_throughput < 0.0 {
            return Err(AppError::configuration(format!(
                "probe.min_throughput must be a non-negative number, got {}",
                probe.min_throughput
            )));
        }
        if self.policy.enabled && self.policy.lookup_timeout.is_zero() {
            return Err(AppError::configuration("policy.lookup_timeout must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.probe.sample_count, 3);
        assert_eq!(config.probe.chunk_size, 1024 * 1024);
        assert_eq!(config.policy.deny.len(), 8);
        assert!(config.policy.deny.contains(&PolicyRule {
            region: "Shanghai".into(),
            operator: "Telecom".into(),
        }));
    }

    #[test]
    fn test_file_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "sieve.toml",
                r#"
                [probe]
                sample_count = 5
                min_throughput = 1.15
                sample_timeout = "7s"
                method = "ffprobe"

                [[policy.deny]]
                region = "Beijing"
                operator = "Unicom"
                "#,
            )?;
            jail.set_env("IPTV_SIEVE_PROBE__WORKERS", "12");

            let config = Config::load_from_file("sieve.toml").expect("config loads");
            assert_eq!(config.probe.sample_count, 5);
            assert_eq!(config.probe.min_throughput, 1.15);
            assert_eq!(config.probe.sample_timeout, Duration::from_secs(7));
            assert_eq!(config.probe.method, ProbeMethod::Ffprobe);
            assert_eq!(config.probe.workers, 12);
            assert_eq!(config.policy.deny.len(), 1);
            // untouched sections keep their defaults
            assert_eq!(config.blacklist.path, PathBuf::from(DEFAULT_BLACKLIST_PATH));
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        Jail::expect_with(|jail| {
            let config = Config::load_from_file("fresh.toml").expect("defaults load");
            assert_eq!(config.probe.workers, DEFAULT_WORKERS);
            assert!(jail.directory().join("fresh.toml").exists());
            Ok(())
        });
    }

    #[test]
    fn test_validation_rejects_zero_workers() {
        let mut config = Config::default();
        config.probe.workers = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.probe.min_throughput = f64::NAN;
        assert!(config.validate().is_err());
    }
}
