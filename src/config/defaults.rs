/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// Input defaults
pub const DEFAULT_CHANNEL_LISTS: &[&str] = &["py/live.txt", "py/IPTV2.txt"];
pub const DEFAULT_CATEGORY: &str = "未分类";

// Blacklist / output defaults
pub const DEFAULT_BLACKLIST_PATH: &str = "py/blacklist.txt";
pub const DEFAULT_OUTPUT_PATH: &str = "py/livezubo.txt";

// Probe defaults
pub const DEFAULT_SAMPLE_COUNT: usize = 3;
pub const DEFAULT_SAMPLE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024; // 1MiB
pub const DEFAULT_MIN_THROUGHPUT: f64 = 0.50; // MiB/s
pub const DEFAULT_WORKERS: usize = 3;
pub const DEFAULT_FFPROBE_COMMAND: &str = "ffprobe";
pub const DEFAULT_USER_AGENT: &str = "vlc/3.0.8";
pub const DEFAULT_CONNECT_PRECHECK: bool = false;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1000;

// Policy defaults
pub const DEFAULT_POLICY_ENABLED: bool = true;
pub const DEFAULT_LOOKUP_URL: &str = "http://ip-api.com/";
pub const DEFAULT_LOOKUP_TIMEOUT_SECS: u64 = 5;
// ip-api.com allows 45 requests per minute on the free tier
pub const DEFAULT_MIN_LOOKUP_INTERVAL_MS: u64 = 1200;
pub const DEFAULT_BLOCKED_REGIONS: &[&str] = &["Shanghai", "Jiangsu", "Zhejiang", "Guangdong"];
pub const DEFAULT_BLOCKED_OPERATORS: &[&str] = &["Telecom", "电信"];
