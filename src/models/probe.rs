use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

use super::ServerId;

/// Servers that met the throughput threshold in this run
pub type QualifiedSet = HashSet<ServerId>;

/// Verdict for one server in one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeOutcome {
    PolicyBlocked,
    Dead,
    Qualified,
    BelowThreshold,
}

impl ProbeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeOutcome::PolicyBlocked => "policy-blocked",
            ProbeOutcome::Dead => "dead",
            ProbeOutcome::Qualified => "qualified",
            ProbeOutcome::BelowThreshold => "below-threshold",
        }
    }

    /// Map sample results to an outcome
    ///
    /// No successful sample means dead. Otherwise the peak decides, and a
    /// peak exactly at the minimum qualifies.
    pub fn from_samples(successes: usize, peak_throughput: f64, min_throughput: f64) -> Self {
        if successes == 0 {
            ProbeOutcome::Dead
        } else if peak_throughput >= min_throughput {
            ProbeOutcome::Qualified
        } else {
            ProbeOutcome::BelowThreshold
        }
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of evaluating one server
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub server: ServerId,
    pub outcome: ProbeOutcome,
    /// Peak throughput over successful samples, MiB/s
    pub peak_throughput: f64,
    pub samples_attempted: usize,
    pub samples_succeeded: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ProbeResult {
    /// Result for a server excluded before any network call
    pub fn policy_blocked(server: ServerId, reason: impl Into<String>) -> Self {
        Self {
            server,
            outcome: ProbeOutcome::PolicyBlocked,
            peak_throughput: 0.0,
            samples_attempted: 0,
            samples_succeeded: 0,
            reason: Some(reason.into()),
        }
    }

    /// Result for a server declared dead without sampling
    pub fn dead(server: ServerId, reason: impl Into<String>) -> Self {
        Self {
            server,
            outcome: ProbeOutcome::Dead,
            peak_throughput: 0.0,
            samples_attempted: 0,
            samples_succeeded: 0,
            reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_boundary() {
        assert_eq!(ProbeOutcome::from_samples(1, 0.5, 0.5), ProbeOutcome::Qualified);
        assert_eq!(
            ProbeOutcome::from_samples(1, 0.499_999, 0.5),
            ProbeOutcome::BelowThreshold
        );
        assert_eq!(ProbeOutcome::from_samples(0, 9.0, 0.5), ProbeOutcome::Dead);
    }

    #[test]
    fn test_outcome_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&ProbeOutcome::BelowThreshold).unwrap(),
            "\"below-threshold\""
        );
    }
}
