//! Test identifiers and the bounded result store

use crate::error::{LoadError, LoadResult};
use crate::report::TestReport;
use crate::traits::ReportSink;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Opaque identifier issued when a test is created
pub type TestId = Uuid;

/// Where a test is in its lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum TestStatus {
    Pending { created_at: DateTime<Utc> },
    Completed(Box<TestReport>),
}

impl TestStatus {
    pub fn report(&self) -> Option<&TestReport> {
        match self {
            TestStatus::Completed(report) => Some(report),
            TestStatus::Pending { .. } => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TestStatus::Completed(_))
    }
}

/// Result store with a create/set/get lifecycle. Creating beyond `capacity`
/// evicts the oldest completed tests. Pending tests are never evicted, so
/// the store grows past `capacity` while every entry is still running.
pub struct TestRegistry {
    entries: DashMap<TestId, TestStatus>,
    order: Mutex<VecDeque<TestId>>,
    capacity: usize,
}

impl Default for TestRegistry {
    fn default() -> Self {
        Self::with_capacity(1000)
    }
}

impl TestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Issue a new id in the pending state
    pub fn create(&self) -> TestId {
        let id = Uuid::new_v4();
        let mut order = self.order.lock().unwrap_or_else(|p| p.into_inner());

        while order.len() >= self.capacity {
            let victim = order
                .iter()
                .position(|id| self.entries.get(id).map_or(true, |s| s.is_completed()));
            let Some(victim) = victim else {
                debug!(
                    "Registry over capacity ({} of {}), all tests still pending",
                    order.len() + 1,
                    self.capacity
                );
                break;
            };
            if let Some(evicted) = order.remove(victim) {
                self.entries.remove(&evicted);
                debug!("Evicted test {} from registry", evicted);
            }
        }

        self.entries.insert(id, TestStatus::Pending { created_at: Utc::now() });
        order.push_back(id);
        id
    }

    /// Store the final report. Unknown (or evicted) ids are rejected.
    pub fn set_result(&self, id: TestId, report: TestReport) -> LoadResult<()> {
        match self.entries.get_mut(&id) {
            Some(mut status) => {
                *status = TestStatus::Completed(Box::new(report));
                Ok(())
            }
            None => Err(LoadError::TestNotFound {
                test_id: id.to_string(),
            }),
        }
    }

    pub fn get(&self, id: &TestId) -> Option<TestStatus> {
        self.entries.get(id).map(|s| s.clone())
    }

    /// The report, once the test has completed
    pub fn get_result(&self, id: &TestId) -> Option<TestReport> {
        self.entries.get(id).and_then(|s| s.report().cloned())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ReportSink for TestRegistry {
    async fn publish(&self, report: &TestReport) -> LoadResult<()> {
        self.set_result(report.test_id, report.clone())
    }
}
