//! Classification aggregator
//!
//! Single consumer of probe results. Negative verdicts are appended to the
//! blacklist as they arrive; qualified servers are collected into the set
//! that Merge & Emit reads once every worker has finished.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::models::{BlacklistEntry, BlacklistReason, ProbeOutcome, ProbeResult, QualifiedSet};
use crate::services::blacklist::BlacklistStore;
use crate::utils::format_throughput;

/// Per-outcome counters for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SurveySummary {
    /// Servers handed to the worker pool
    pub scheduled: usize,
    /// Servers left out because they were already blacklisted
    pub skipped_blacklisted: usize,
    pub policy_blocked: usize,
    pub dead: usize,
    pub qualified: usize,
    pub below_threshold: usize,
    pub blacklist_appended: usize,
    pub blacklist_append_failures: usize,
}

impl SurveySummary {
    /// Servers whose result reached the aggregator
    pub fn completed(&self) -> usize {
        self.policy_blocked + self.dead + self.qualified + self.below_threshold
    }
}

/// Everything the aggregator learned in one run
#[derive(Debug, Clone, Default)]
pub struct AggregateOutcome {
    pub qualified: QualifiedSet,
    pub summary: SurveySummary,
    /// Results in arrival order
    pub results: Vec<ProbeResult>,
}

pub struct ClassificationAggregator {
    store: Arc<BlacklistStore>,
    outcome: AggregateOutcome,
}

impl ClassificationAggregator {
    pub fn new(store: Arc<BlacklistStore>, scheduled: usize) -> Self {
        let mut outcome = AggregateOutcome::default();
        outcome.summary.scheduled = scheduled;
        Self { store, outcome }
    }

    /// Fold one result in, appending to the blacklist when it is negative
    pub async fn record(&mut self, result: ProbeResult) {
        let summary = &mut self.outcome.summary;
        let reason = match result.outcome {
            ProbeOutcome::PolicyBlocked => {
                summary.policy_blocked += 1;
                Some(BlacklistReason::PolicyBlocked(
                    result.reason.clone().unwrap_or_default(),
                ))
            }
            ProbeOutcome::Dead => {
                summary.dead += 1;
                Some(BlacklistReason::Dead)
            }
            ProbeOutcome::Qualified => {
                summary.qualified += 1;
                self.outcome.qualified.insert(result.server.clone());
                None
            }
            ProbeOutcome::BelowThreshold => {
                summary.below_threshold += 1;
                None
            }
        };

        info!(
            "[{}/{}] {} {} (peak {}, {}/{} samples){}",
            summary.completed(),
            summary.scheduled,
            result.server,
            result.outcome,
            format_throughput(result.peak_throughput),
            result.samples_succeeded,
            result.samples_attempted,
            result
                .reason
                .as_deref()
                .map(|r| format!(": {r}"))
                .unwrap_or_default()
        );

        if let Some(reason) = reason {
            let entry = BlacklistEntry::new(result.server.clone(), reason);
            match self.store.append(&entry).await {
                Ok(()) => self.outcome.summary.blacklist_appended += 1,
                Err(e) => {
                    warn!(server = %result.server, error = %e, "Failed to append blacklist entry");
                    self.outcome.summary.blacklist_append_failures += 1;
                }
            }
        }

        self.outcome.results.push(result);
    }

    /// Drain the channel until every sender is gone
    pub async fn consume(mut self, mut rx: mpsc::Receiver<ProbeResult>) -> AggregateOutcome {
        while let Some(result) = rx.recv().await {
            self.record(result).await;
        }
        self.outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServerId;
    use crate::services::blacklist::MemoryBlacklistBackend;

    fn result(port: u16, outcome: ProbeOutcome, peak: f64) -> ProbeResult {
        ProbeResult {
            server: ServerId::new("10.0.0.1", port),
            outcome,
            peak_throughput: peak,
            samples_attempted: 3,
            samples_succeeded: if outcome == ProbeOutcome::Dead { 0 } else { 1 },
            reason: None,
        }
    }

    #[tokio::test]
    async fn test_only_negative_outcomes_are_blacklisted() {
        let backend = Arc::new(MemoryBlacklistBackend::new());
        let store = Arc::new(BlacklistStore::new(backend.clone()));
        let (tx, rx) = mpsc::channel(8);

        tx.send(result(1, ProbeOutcome::Qualified, 2.0)).await.unwrap();
        tx.send(result(2, ProbeOutcome::BelowThreshold, 0.1)).await.unwrap();
        tx.send(result(3, ProbeOutcome::Dead, 0.0)).await.unwrap();
        tx.send(ProbeResult::policy_blocked(
            ServerId::new("10.0.0.1", 4),
            "Shanghai China Telecom",
        ))
        .await
        .unwrap();
        drop(tx);

        let outcome = ClassificationAggregator::new(store, 4).consume(rx).await;

        assert_eq!(outcome.qualified.len(), 1);
        assert!(outcome.qualified.contains(&ServerId::new("10.0.0.1", 1)));
        assert_eq!(outcome.summary.completed(), 4);
        assert_eq!(outcome.summary.blacklist_appended, 2);
        assert_eq!(outcome.results.len(), 4);
        assert_eq!(
            backend.snapshot(),
            "10.0.0.1:3 # dead\n10.0.0.1:4 # policy-blocked: Shanghai China Telecom\n"
        );
    }
}
