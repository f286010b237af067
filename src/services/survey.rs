//! Survey pipeline
//!
//! One run: load the blacklist, derive probe candidates from the registry,
//! evaluate them on a bounded worker pool, aggregate the verdicts and fold
//! the qualified servers back into output records.

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use serde::Serialize;
use std::path::Path;
use std::pin::pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::AppResult;
use crate::models::{OutputRecord, ProbeResult, QualifiedSet};
use crate::services::aggregator::{ClassificationAggregator, SurveySummary};
use crate::services::blacklist::BlacklistStore;
use crate::services::emitter::{emit, write_atomically};
use crate::services::policy::{PolicyDecision, PolicyFilter};
use crate::services::registry::{CandidateSet, EndpointRegistry, ServerCandidate};
use crate::services::stream_prober::StreamProber;
use crate::utils::format_elapsed;

/// Machine-readable account of one run
#[derive(Debug, Clone, Serialize)]
pub struct SurveyReport {
    pub generated_at: DateTime<Utc>,
    pub cancelled: bool,
    pub input_channels: usize,
    pub input_servers: usize,
    #[serde(flatten)]
    pub summary: SurveySummary,
    pub emitted_records: usize,
    pub results: Vec<ProbeResult>,
}

impl SurveyReport {
    pub async fn write_json(&self, path: &Path) -> AppResult<()> {
        let mut json = serde_json::to_vec_pretty(self)?;
        json.push(b'\n');
        write_atomically(path, json).await
    }
}

#[derive(Debug, Clone)]
pub struct SurveyOutcome {
    pub records: Vec<OutputRecord>,
    pub qualified: QualifiedSet,
    pub report: SurveyReport,
}

impl SurveyOutcome {
    pub fn cancelled(&self) -> bool {
        self.report.cancelled
    }
}

pub struct SurveyPipeline {
    prober: Arc<StreamProber>,
    policy: Option<Arc<PolicyFilter>>,
    store: Arc<BlacklistStore>,
    workers: usize,
}

/// Gate a candidate through the policy filter, then probe it
async fn evaluate(
    prober: &StreamProber,
    policy: Option<&PolicyFilter>,
    candidate: ServerCandidate,
) -> ProbeResult {
    if let Some(policy) = policy {
        if let PolicyDecision::Blocked(reason) = policy.classify(&candidate.server).await {
            return ProbeResult::policy_blocked(candidate.server, reason);
        }
    }
    prober.probe(&candidate.server, &candidate.urls).await
}

impl SurveyPipeline {
    pub fn new(prober: Arc<StreamProber>, store: Arc<BlacklistStore>, workers: usize) -> Self {
        Self {
            prober,
            policy: None,
            store,
            workers: workers.max(1),
        }
    }

    pub fn with_policy(mut self, policy: Arc<PolicyFilter>) -> Self {
        self.policy = Some(policy);
        self
    }

    fn empty_outcome(&self, registry: &EndpointRegistry, cancelled: bool) -> SurveyOutcome {
        SurveyOutcome {
            records: Vec::new(),
            qualified: QualifiedSet::new(),
            report: SurveyReport {
                generated_at: Utc::now(),
                cancelled,
                input_channels: registry.channel_count(),
                input_servers: registry.server_count(),
                summary: SurveySummary::default(),
                emitted_records: 0,
                results: Vec::new(),
            },
        }
    }

    /// Run one survey over `registry`
    ///
    /// Cancelling `cancel` stops new evaluations from starting; results that
    /// already arrived are still aggregated. A blacklist that exists but
    /// cannot be read yields an empty run rather than re-probing everything.
    pub async fn run(&self, registry: &EndpointRegistry, cancel: CancellationToken) -> SurveyOutcome {
        let started = Instant::now();

        if registry.is_empty() {
            warn!("No usable channel lines in the input, nothing to probe");
        }

        let blacklisted = match self.store.load().await {
            Ok(servers) => servers,
            Err(e) => {
                error!(error = %e, "Blacklist unreadable, producing an empty result");
                return self.empty_outcome(registry, cancel.is_cancelled());
            }
        };

        let CandidateSet {
            candidates,
            skipped,
        } = registry.probe_candidates(&blacklisted);
        info!(
            "Probing {} server(s) with {} worker(s); {} already blacklisted",
            candidates.len(),
            self.workers,
            skipped
        );

        let aggregator = ClassificationAggregator::new(self.store.clone(), candidates.len());
        let (tx, rx) = mpsc::channel::<ProbeResult>(self.workers * 2);

        let producer = tokio::spawn({
            let prober = self.prober.clone();
            let policy = self.policy.clone();
            let workers = self.workers;
            let cancel = cancel.clone();
            async move {
                let results = stream::iter(candidates)
                    .map(move |candidate| {
                        let prober = prober.clone();
                        let policy = policy.clone();
                        async move { evaluate(&prober, policy.as_deref(), candidate).await }
                    })
                    .buffer_unordered(workers)
                    .take_until(cancel.cancelled_owned());
                let mut results = pin!(results);

                while let Some(result) = results.next().await {
                    if tx.send(result).await.is_err() {
                        break;
                    }
                }
            }
        });

        let mut aggregate = aggregator.consume(rx).await;
        if let Err(e) = producer.await {
            error!(error = %e, "Probe worker pool terminated abnormally");
        }
        aggregate.summary.skipped_blacklisted = skipped;

        let cancelled = cancel.is_cancelled();
        if cancelled {
            warn!(
                "Run cancelled after {}/{} server(s)",
                aggregate.summary.completed(),
                aggregate.summary.scheduled
            );
        }

        let records = emit(registry, &aggregate.qualified);
        let summary = &aggregate.summary;
        info!(
            "Survey finished in {}: {} qualified, {} below threshold, {} dead, {} policy-blocked, {} record(s)",
            format_elapsed(started.elapsed()),
            summary.qualified,
            summary.below_threshold,
            summary.dead,
            summary.policy_blocked,
            records.len()
        );
        if summary.blacklist_append_failures > 0 {
            warn!(
                "{} blacklist append(s) failed; those servers will be probed again next run",
                summary.blacklist_append_failures
            );
        }

        SurveyOutcome {
            report: SurveyReport {
                generated_at: Utc::now(),
                cancelled,
                input_channels: registry.channel_count(),
                input_servers: registry.server_count(),
                summary: aggregate.summary,
                emitted_records: records.len(),
                results: aggregate.results,
            },
            qualified: aggregate.qualified,
            records,
        }
    }
}
