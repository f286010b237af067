//! Stream Probing Service
//!
//! Measures a server by fetching a handful of its stream URLs and keeping the
//! best throughput. One sample is one fetch with its own timeout; a server
//! with no successful sample is dead, otherwise its peak throughput decides
//! whether it qualifies.

use async_trait::async_trait;
use futures::StreamExt;
use rand::seq::IndexedRandom;
use serde::Deserialize;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, trace};

use crate::config::{ProbeConfig, ProbeMethod};
use crate::errors::{AppResult, SampleFailure};
use crate::models::{ProbeOutcome, ProbeResult, ServerId};
use crate::utils::{format_bytes, format_elapsed, format_throughput};

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Data obtained by one successful sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl Sample {
    /// Throughput in MiB/s
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64().max(1e-6);
        self.bytes as f64 / BYTES_PER_MIB / secs
    }
}

/// Takes one sample from a stream URL
#[async_trait]
pub trait SampleFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Sample, SampleFailure>;
}

/// Reads up to `chunk_size` bytes of the response body
pub struct HttpSampleFetcher {
    client: reqwest::Client,
    chunk_size: u64,
    timeout: Duration,
}

impl HttpSampleFetcher {
    pub fn new(user_agent: &str, chunk_size: u64, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            chunk_size,
            timeout,
        })
    }

    async fn read_chunk(&self, url: &str) -> Result<u64, SampleFailure> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SampleFailure::Status(status.as_u16()));
        }

        let mut body = response.bytes_stream();
        let mut read: u64 = 0;
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    read += bytes.len() as u64;
                    if read >= self.chunk_size {
                        break;
                    }
                }
                // a live stream that drops mid-chunk still produced data
                Err(e) if read > 0 => {
                    trace!("Body of {} broke after {} bytes: {}", url, read, e);
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if read == 0 {
            return Err(SampleFailure::EmptyBody);
        }
        Ok(read.min(self.chunk_size))
    }
}

#[async_trait]
impl SampleFetcher for HttpSampleFetcher {
    async fn fetch(&self, url: &str) -> Result<Sample, SampleFailure> {
        let start = Instant::now();
        let bytes = tokio::time::timeout(self.timeout, self.read_chunk(url))
            .await
            .map_err(|_| SampleFailure::Timeout)??;
        Ok(Sample {
            bytes,
            elapsed: start.elapsed(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    error: Option<FfprobeError>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeError {
    #[serde(default)]
    code: Option<i32>,
    #[serde(default)]
    string: Option<String>,
}

/// Codec types ffprobe found, or why it found none
pub fn parse_ffprobe_output(stdout: &str) -> Result<Vec<String>, SampleFailure> {
    if stdout.trim().is_empty() {
        return Err(SampleFailure::Ffprobe("no output".to_string()));
    }

    let output: FfprobeOutput = serde_json::from_str(stdout)
        .map_err(|e| SampleFailure::Ffprobe(format!("unparseable output: {e}")))?;

    if let Some(error) = output.error {
        return Err(SampleFailure::Ffprobe(format!(
            "{} (code: {:?})",
            error.string.as_deref().unwrap_or("unknown error"),
            error.code
        )));
    }

    let kinds: Vec<String> = output
        .streams
        .into_iter()
        .filter_map(|s| s.codec_type)
        .filter(|kind| kind == "video" || kind == "audio")
        .collect();

    if kinds.is_empty() {
        return Err(SampleFailure::Ffprobe("no audio or video stream".to_string()));
    }
    Ok(kinds)
}

/// Asks ffprobe whether the URL carries audio or video
///
/// Throughput is estimated as `nominal_bytes` over the probe's wall time.
pub struct FfprobeSampleFetcher {
    command: String,
    timeout: Duration,
    nominal_bytes: u64,
    user_agent: String,
}

impl FfprobeSampleFetcher {
    pub fn new(
        command: impl Into<String>,
        user_agent: impl Into<String>,
        nominal_bytes: u64,
        timeout: Duration,
    ) -> Self {
        Self {
            command: command.into(),
            timeout,
            nominal_bytes,
            user_agent: user_agent.into(),
        }
    }
}

#[async_trait]
impl SampleFetcher for FfprobeSampleFetcher {
    async fn fetch(&self, url: &str) -> Result<Sample, SampleFailure> {
        let start = Instant::now();

        let mut cmd = Command::new(&self.command);
        cmd.args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_error",
            "-show_entries",
            "stream=codec_type",
            "-user_agent",
            self.user_agent.as_str(),
            url,
        ]);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());
        cmd.kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| SampleFailure::Timeout)?
            .map_err(|e| SampleFailure::Ffprobe(format!("failed to execute: {e}")))?;

        let kinds = parse_ffprobe_output(&String::from_utf8_lossy(&output.stdout))?;
        trace!("ffprobe found {:?} in {}", kinds, url);

        Ok(Sample {
            bytes: self.nominal_bytes,
            elapsed: start.elapsed(),
        })
    }
}

/// Pick up to `count` URLs at random; all of them when there are few enough
pub fn select_samples(urls: &[String], count: usize) -> Vec<String> {
    if urls.len() <= count {
        return urls.to_vec();
    }
    urls.choose_multiple(&mut rand::rng(), count)
        .cloned()
        .collect()
}

/// Service for probing servers
pub struct StreamProber {
    fetcher: Arc<dyn SampleFetcher>,
    sample_count: usize,
    min_throughput: f64,
    connect_precheck: Option<Duration>,
}

impl StreamProber {
    pub fn new(fetcher: Arc<dyn SampleFetcher>, sample_count: usize, min_throughput: f64) -> Self {
        Self {
            fetcher,
            sample_count: sample_count.max(1),
            min_throughput,
            connect_precheck: None,
        }
    }

    /// Require a TCP connect within `timeout` before sampling
    pub fn with_connect_precheck(mut self, timeout: Duration) -> Self {
        self.connect_precheck = Some(timeout);
        self
    }

    pub fn from_config(config: &ProbeConfig) -> AppResult<Self> {
        let fetcher: Arc<dyn SampleFetcher> = match config.method {
            ProbeMethod::Http => Arc::new(HttpSampleFetcher::new(
                &config.user_agent,
                config.chunk_size,
                config.sample_timeout,
            )?),
            ProbeMethod::Ffprobe => Arc::new(FfprobeSampleFetcher::new(
                config.ffprobe_command.clone(),
                config.user_agent.clone(),
                config.chunk_size,
                config.sample_timeout,
            )),
        };

        let prober = Self::new(fetcher, config.sample_count, config.min_throughput);
        Ok(if config.connect_precheck {
            prober.with_connect_precheck(config.connect_timeout)
        } else {
            prober
        })
    }

    async fn precheck(&self, server: &ServerId, timeout: Duration) -> Result<(), String> {
        let connect = tokio::net::TcpStream::connect((server.host(), server.port()));
        match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(format!("connect precheck failed: {e}")),
            Err(_) => Err(format!(
                "connect precheck timed out after {}",
                format_elapsed(timeout)
            )),
        }
    }

    /// Sample a server's URLs and classify it
    ///
    /// Samples run one after another, each bounded by the fetcher's own
    /// timeout. An empty URL list is dead without any network call.
    pub async fn probe(&self, server: &ServerId, urls: &[String]) -> ProbeResult {
        if urls.is_empty() {
            return ProbeResult::dead(server.clone(), "no stream URLs");
        }

        if let Some(timeout) = self.connect_precheck {
            if let Err(reason) = self.precheck(server, timeout).await {
                debug!("{}: {}", server, reason);
                return ProbeResult::dead(server.clone(), reason);
            }
        }

        let selected = select_samples(urls, self.sample_count);
        let mut peak: f64 = 0.0;
        let mut succeeded = 0;
        let mut last_failure: Option<SampleFailure> = None;

        for url in &selected {
            match self.fetcher.fetch(url).await {
                Ok(sample) => {
                    let throughput = sample.throughput();
                    debug!(
                        "{}: {} in {} ({}) from {}",
                        server,
                        format_bytes(sample.bytes),
                        format_elapsed(sample.elapsed),
                        format_throughput(throughput),
                        url
                    );
                    succeeded += 1;
                    peak = peak.max(throughput);
                }
                Err(e) => {
                    debug!("{}: sample {} failed ({}): {}", server, url, e.kind(), e);
                    last_failure = Some(e);
                }
            }
        }

        let outcome = ProbeOutcome::from_samples(succeeded, peak, self.min_throughput);
        let reason = match outcome {
            ProbeOutcome::Dead => last_failure.map(|e| e.to_string()),
            _ => None,
        };

        ProbeResult {
            server: server.clone(),
            outcome,
            peak_throughput: peak,
            samples_attempted: selected.len(),
            samples_succeeded: succeeded,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Answers per URL; unknown URLs time out
    struct ScriptedFetcher {
        answers: HashMap<String, Result<Sample, SampleFailure>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        fn new(answers: Vec<(&str, Result<Sample, SampleFailure>)>) -> Self {
            Self {
                answers: answers
                    .into_iter()
                    .map(|(u, a)| (u.to_string(), a))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SampleFetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str) -> Result<Sample, SampleFailure> {
            self.calls.lock().unwrap().push(url.to_string());
            self.answers
                .get(url)
                .cloned()
                .unwrap_or(Err(SampleFailure::Timeout))
        }
    }

    fn mib_in(secs: f64) -> Result<Sample, SampleFailure> {
        Ok(Sample {
            bytes: 1024 * 1024,
            elapsed: Duration::from_secs_f64(secs),
        })
    }

    fn server() -> ServerId {
        ServerId::new("10.0.0.1", 80)
    }

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_sample_throughput() {
        let sample = Sample {
            bytes: 1024 * 1024,
            elapsed: Duration::from_secs(2),
        };
        assert!((sample.throughput() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_select_samples_bounds() {
        let all = urls(&["a", "b"]);
        assert_eq!(select_samples(&all, 3), all);

        let many = urls(&["a", "b", "c", "d", "e"]);
        let picked = select_samples(&many, 3);
        assert_eq!(picked.len(), 3);
        assert!(picked.iter().all(|u| many.contains(u)));
        let mut dedup = picked.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), 3);
    }

    #[tokio::test]
    async fn test_peak_of_successful_samples_decides() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            ("http://10.0.0.1:80/a", mib_in(4.0)),
            ("http://10.0.0.1:80/b", mib_in(1.0)),
            ("http://10.0.0.1:80/c", Err(SampleFailure::Status(404))),
        ]));
        let prober = StreamProber::new(fetcher, 3, 0.5);

        let result = prober
            .probe(
                &server(),
                &urls(&[
                    "http://10.0.0.1:80/a",
                    "http://10.0.0.1:80/b",
                    "http://10.0.0.1:80/c",
                ]),
            )
            .await;

        assert_eq!(result.outcome, ProbeOutcome::Qualified);
        assert_eq!(result.samples_attempted, 3);
        assert_eq!(result.samples_succeeded, 2);
        assert!((result.peak_throughput - 1.0).abs() < 1e-6);
        assert!(result.reason.is_none());
    }

    #[tokio::test]
    async fn test_slow_server_is_below_threshold() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![(
            "http://10.0.0.1:80/a",
            mib_in(4.0),
        )]));
        let prober = StreamProber::new(fetcher, 3, 0.5);
        let result = prober.probe(&server(), &urls(&["http://10.0.0.1:80/a"])).await;
        assert_eq!(result.outcome, ProbeOutcome::BelowThreshold);
        assert!((result.peak_throughput - 0.25).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_all_failures_is_dead_with_reason() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![]));
        let prober = StreamProber::new(fetcher.clone(), 3, 0.5);
        let result = prober
            .probe(&server(), &urls(&["http://10.0.0.1:80/a", "http://10.0.0.1:80/b"]))
            .await;
        assert_eq!(result.outcome, ProbeOutcome::Dead);
        assert_eq!(result.reason.as_deref(), Some("timed out"));
        assert_eq!(fetcher.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_no_urls_is_dead_without_fetching() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![]));
        let prober = StreamProber::new(fetcher.clone(), 3, 0.5);
        let result = prober.probe(&server(), &[]).await;
        assert_eq!(result.outcome, ProbeOutcome::Dead);
        assert_eq!(result.samples_attempted, 0);
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_never_more_than_sample_count_fetches() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![]));
        let prober = StreamProber::new(fetcher.clone(), 2, 0.5);
        let many = urls(&["u1", "u2", "u3", "u4", "u5", "u6"]);
        prober.probe(&server(), &many).await;
        assert_eq!(fetcher.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_zero_sample_count_still_takes_one_sample() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![(
            "http://10.0.0.1:80/a",
            mib_in(1.0),
        )]));
        let prober = StreamProber::new(fetcher.clone(), 0, 0.5);
        let result = prober.probe(&server(), &urls(&["http://10.0.0.1:80/a"])).await;
        assert_eq!(result.outcome, ProbeOutcome::Qualified);
        assert_eq!(fetcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_precheck_skips_sampling() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![]));
        // TEST-NET-1 is never reachable
        let prober = StreamProber::new(fetcher.clone(), 3, 0.5)
            .with_connect_precheck(Duration::from_millis(50));
        let result = prober
            .probe(&ServerId::new("192.0.2.1", 9), &urls(&["http://192.0.2.1:9/a"]))
            .await;
        assert_eq!(result.outcome, ProbeOutcome::Dead);
        assert!(fetcher.calls().is_empty());
    }

    #[test]
    fn test_parse_ffprobe_output() {
        let ok = r#"{"streams":[{"codec_type":"video"},{"codec_type":"audio"},{"codec_type":"data"}]}"#;
        assert_eq!(parse_ffprobe_output(ok).unwrap(), vec!["video", "audio"]);

        let err = r#"{"error":{"code":-5,"string":"Input/output error"}}"#;
        assert!(matches!(
            parse_ffprobe_output(err),
            Err(SampleFailure::Ffprobe(msg)) if msg.contains("Input/output error")
        ));

        assert!(parse_ffprobe_output("").is_err());
        assert!(parse_ffprobe_output(r#"{"streams":[]}"#).is_err());
        assert!(parse_ffprobe_output("not json").is_err());
    }
}
