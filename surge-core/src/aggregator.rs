//! Concurrency-safe collection of trial outcomes

use crate::types::TrialOutcome;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Raw per-run samples, in arrival order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateSnapshot {
    /// Elapsed time of every trial that got a response
    pub response_times: Vec<Duration>,
    pub status_codes: Vec<u16>,
    pub error_messages: Vec<String>,
    /// Per proxy, `None` marks a failed attempt
    pub proxy_samples: HashMap<String, Vec<Option<Duration>>>,
}

impl AggregateSnapshot {
    /// Number of outcomes recorded
    pub fn recorded(&self) -> usize {
        self.response_times.len() + self.error_messages.len()
    }
}

/// Shared accumulator appended to by every trial
#[derive(Debug, Default)]
pub struct ResultAggregator {
    inner: Mutex<AggregateSnapshot>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one outcome. A single lock covers all sequences so a snapshot
    /// never sees a half-applied outcome.
    pub fn record(&self, outcome: TrialOutcome) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());

        let proxy_sample = match (outcome.status_code, outcome.error) {
            (Some(status), None) => {
                inner.response_times.push(outcome.elapsed);
                inner.status_codes.push(status);
                Some(outcome.elapsed)
            }
            (_, Some(error)) => {
                inner.error_messages.push(error);
                None
            }
            (None, None) => {
                inner.error_messages.push("trial finished without a status code".to_string());
                None
            }
        };

        if let Some(proxy) = outcome.proxy {
            inner.proxy_samples.entry(proxy).or_default().push(proxy_sample);
        }
    }

    /// Copy of everything recorded so far
    pub fn snapshot(&self) -> AggregateSnapshot {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn recorded(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).recorded()
    }
}
