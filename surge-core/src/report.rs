//! Final run statistics

use crate::aggregator::AggregateSnapshot;
use crate::registry::TestId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Statistics for a finished run. Times are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub test_id: TestId,
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    /// Trials never started or aborted because the run was cancelled
    pub cancelled_requests: usize,
    pub average_response_time: f64,
    pub min_response_time: f64,
    pub max_response_time: f64,
    pub status_code_distribution: BTreeMap<String, usize>,
    pub error_messages: Vec<String>,
    pub proxy_performance: BTreeMap<String, f64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl TestReport {
    /// Calculate success rate as percentage
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.successful_requests as f64 / self.total_requests as f64) * 100.0
        }
    }

    /// Settled trials per second of wall-clock run time
    pub fn requests_per_second(&self) -> f64 {
        let secs = (self.completed_at - self.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        if secs <= 0.0 {
            0.0
        } else {
            (self.successful_requests + self.failed_requests) as f64 / secs
        }
    }

    /// Get the most common status code
    pub fn most_common_status_code(&self) -> Option<&str> {
        self.status_code_distribution
            .iter()
            .max_by_key(|(_, count)| *count)
            .map(|(code, _)| code.as_str())
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled_requests > 0
    }
}

/// Reduces an aggregate snapshot into a [`TestReport`]
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    test_id: TestId,
    total_requests: usize,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
}

impl ReportBuilder {
    pub fn new(test_id: TestId, total_requests: usize) -> Self {
        let now = Utc::now();
        Self {
            test_id,
            total_requests,
            started_at: now,
            completed_at: now,
        }
    }

    pub fn with_timing(mut self, started_at: DateTime<Utc>, completed_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self.completed_at = completed_at;
        self
    }

    pub fn build(&self, snapshot: &AggregateSnapshot) -> TestReport {
        let times: Vec<f64> = snapshot.response_times.iter().map(Duration::as_secs_f64).collect();

        let mut status_code_distribution = BTreeMap::new();
        for code in &snapshot.status_codes {
            *status_code_distribution.entry(code.to_string()).or_insert(0) += 1;
        }

        let proxy_performance = snapshot
            .proxy_samples
            .iter()
            .filter_map(|(proxy, samples)| {
                let ok: Vec<f64> = samples.iter().flatten().map(Duration::as_secs_f64).collect();
                mean(&ok).map(|m| (proxy.clone(), m))
            })
            .collect();

        TestReport {
            test_id: self.test_id,
            total_requests: self.total_requests,
            successful_requests: snapshot.response_times.len(),
            failed_requests: snapshot.error_messages.len(),
            cancelled_requests: self.total_requests.saturating_sub(snapshot.recorded()),
            average_response_time: mean(&times).unwrap_or(0.0),
            min_response_time: times.iter().copied().reduce(f64::min).unwrap_or(0.0),
            max_response_time: times.iter().copied().reduce(f64::max).unwrap_or(0.0),
            status_code_distribution,
            error_messages: snapshot.error_messages.clone(),
            proxy_performance,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Arithmetic mean, clamped to the sample range so rounding never puts it
/// outside `[min, max]`
fn mean(values: &[f64]) -> Option<f64> {
    let min = values.iter().copied().reduce(f64::min)?;
    let max = values.iter().copied().reduce(f64::max)?;
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    Some(avg.clamp(min, max))
}
