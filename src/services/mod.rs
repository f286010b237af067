//! Service layer for the survey pipeline
//!
//! Each service owns one stage of a run. They are wired together by
//! [`survey::SurveyPipeline`]:
//!
//! - [`registry`] parses channel lines into category and server groups
//! - [`blacklist`] remembers servers that are never probed again
//! - [`policy`] excludes servers by region and operator before any sampling
//! - [`stream_prober`] samples a server's streams and measures throughput
//! - [`aggregator`] collects verdicts and appends negative ones to the blacklist
//! - [`emitter`] folds qualified servers back into a channel list
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use iptv_sieve::services::{BlacklistStore, EndpointRegistry, StreamProber, SurveyPipeline};
//! use iptv_sieve::config::ProbeConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> iptv_sieve::errors::AppResult<()> {
//! let registry = EndpointRegistry::build(["央视频道,#genre#", "CCTV1,http://10.0.0.1:8080/rtp/239.3.1.1:8000"]);
//! let prober = Arc::new(StreamProber::from_config(&ProbeConfig::default())?);
//! let store = Arc::new(BlacklistStore::file("blacklist.txt"));
//!
//! let outcome = SurveyPipeline::new(prober, store, 3)
//!     .run(&registry, CancellationToken::new())
//!     .await;
//! println!("{} channel(s) survived", outcome.records.len());
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod blacklist;
pub mod emitter;
pub mod policy;
pub mod registry;
pub mod stream_prober;
pub mod survey;

pub use aggregator::{AggregateOutcome, ClassificationAggregator, SurveySummary};
pub use blacklist::{
    BlacklistBackend, BlacklistStore, FileBlacklistBackend, MemoryBlacklistBackend,
    OverlayBlacklistBackend,
};
pub use emitter::{emit, render_channel_list, write_channel_list};
pub use policy::{GeoInfo, GeoLookup, IpApiLookup, PolicyDecision, PolicyFilter};
pub use registry::{EndpointRegistry, ServerCandidate};
pub use stream_prober::{Sample, SampleFetcher, StreamProber};
pub use survey::{SurveyOutcome, SurveyPipeline, SurveyReport};
