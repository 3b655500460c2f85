//! Test lifecycle: create, run in the background, stop, fetch results

use crate::config::{DispatchSettings, TestConfig};
use crate::dispatcher::RequestDispatcher;
use crate::error::{LoadError, LoadResult};
use crate::proxy_pool::ProxyPool;
use crate::registry::{TestId, TestRegistry, TestStatus};
use crate::report::TestReport;
use crate::traits::{HttpTransport, ReportSink};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Owns the shared proxy pool and result registry and runs tests against
/// them. Cloning is cheap and clones share all state.
#[derive(Clone)]
pub struct LoadEngine {
    transport: Arc<dyn HttpTransport>,
    pool: Arc<ProxyPool>,
    registry: Arc<TestRegistry>,
    active_tests: Arc<RwLock<HashMap<TestId, CancellationToken>>>,
    sinks: Vec<Arc<dyn ReportSink>>,
    settings: DispatchSettings,
    seed: Option<u64>,
}

impl LoadEngine {
    /// Create an engine whose proxy pool probes through the same transport
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        let pool = Arc::new(ProxyPool::new(transport.clone()));
        Self::with_pool(transport, pool)
    }

    pub fn with_pool(transport: Arc<dyn HttpTransport>, pool: Arc<ProxyPool>) -> Self {
        Self {
            transport,
            pool,
            registry: Arc::new(TestRegistry::new()),
            active_tests: Arc::new(RwLock::new(HashMap::new())),
            sinks: Vec::new(),
            settings: DispatchSettings::default(),
            seed: None,
        }
    }

    pub fn with_registry(mut self, registry: Arc<TestRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Additional destination for every finished report
    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Seed payload generation so runs are reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    pub fn registry(&self) -> &Arc<TestRegistry> {
        &self.registry
    }

    /// Validate `config` and register a pending test for it. Nothing is
    /// registered when validation fails. The caller must hand the dispatcher
    /// to `execute`, which clears the active entry.
    async fn create_test(&self, config: TestConfig) -> LoadResult<(TestId, RequestDispatcher)> {
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let dispatcher =
            RequestDispatcher::with_rng(config, self.transport.clone(), self.pool.clone(), rng)?
                .with_settings(self.settings.clone());

        let test_id = self.registry.create();
        self.active_tests
            .write()
            .await
            .insert(test_id, CancellationToken::new());

        info!(
            "Created test {} against {} ({} requests, concurrency {})",
            test_id,
            dispatcher.config().url,
            dispatcher.config().num_requests,
            dispatcher.config().concurrency
        );
        Ok((test_id, dispatcher))
    }

    /// Run a test to completion and return its report
    pub async fn run_test(&self, config: TestConfig) -> LoadResult<TestReport> {
        let (test_id, dispatcher) = self.create_test(config).await?;
        Ok(self.execute(test_id, dispatcher).await)
    }

    /// Run a test in the background. The report lands in the registry and
    /// the configured sinks; the handle resolves to it as well.
    pub async fn start_test(
        &self,
        config: TestConfig,
    ) -> LoadResult<(TestId, JoinHandle<TestReport>)> {
        let (test_id, dispatcher) = self.create_test(config).await?;
        let engine = self.clone();
        let handle = tokio::spawn(async move { engine.execute(test_id, dispatcher).await });
        Ok((test_id, handle))
    }

    /// Signal a running test to stop
    pub async fn stop_test(&self, test_id: TestId) -> LoadResult<()> {
        info!("Stopping test {}", test_id);

        let active_tests = self.active_tests.read().await;
        match active_tests.get(&test_id) {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(LoadError::TestNotFound {
                test_id: test_id.to_string(),
            }),
        }
    }

    /// Stop every running test
    pub async fn stop_all(&self) {
        for token in self.active_tests.read().await.values() {
            token.cancel();
        }
    }

    pub async fn get_result(&self, test_id: TestId) -> LoadResult<TestStatus> {
        self.registry.get(&test_id).ok_or_else(|| LoadError::TestNotFound {
            test_id: test_id.to_string(),
        })
    }

    /// Ids of tests that are still running
    pub async fn active_tests(&self) -> Vec<TestId> {
        self.active_tests.read().await.keys().copied().collect()
    }

    async fn execute(&self, test_id: TestId, dispatcher: RequestDispatcher) -> TestReport {
        let token = self
            .active_tests
            .read()
            .await
            .get(&test_id)
            .cloned()
            .unwrap_or_else(CancellationToken::new);

        let report = dispatcher.run(test_id, token).await;

        self.active_tests.write().await.remove(&test_id);

        if let Err(e) = self.registry.set_result(test_id, report.clone()) {
            error!("Failed to store result for test {}: {}", test_id, e);
        }
        for sink in &self.sinks {
            if let Err(e) = sink.publish(&report).await {
                error!("Failed to publish report for test {}: {}", test_id, e);
            }
        }

        info!("Test {} completed", test_id);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct CollectingSink {
        reports: Mutex<Vec<TestReport>>,
    }

    #[async_trait::async_trait]
    impl ReportSink for CollectingSink {
        async fn publish(&self, report: &TestReport) -> LoadResult<()> {
            self.reports.lock().unwrap().push(report.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_run_test_stores_result() {
        let sink = Arc::new(CollectingSink::default());
        let engine = LoadEngine::new(Arc::new(MockTransport::status(200))).with_sink(sink.clone());

        let report = engine
            .run_test(TestConfig::new("http://target.local/", 5, 2))
            .await
            .unwrap();

        assert_eq!(report.successful_requests, 5);
        let stored = engine.get_result(report.test_id).await.unwrap();
        assert_eq!(stored.report(), Some(&report));
        assert_eq!(sink.reports.lock().unwrap().len(), 1);
        assert!(engine.active_tests().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_registers_nothing() {
        let engine = LoadEngine::new(Arc::new(MockTransport::status(200)));
        let result = engine
            .run_test(TestConfig::new("http://target.local/", 1, 0))
            .await;

        assert!(matches!(result, Err(LoadError::InvalidConfig { .. })));
        assert!(engine.registry().is_empty());
    }

    #[tokio::test]
    async fn test_start_and_stop_background_test() {
        let transport = Arc::new(MockTransport::status(200).with_delay(Duration::from_millis(20)));
        let engine = LoadEngine::new(transport).with_settings(DispatchSettings {
            cancellation_grace_period: Duration::from_millis(200),
            ..Default::default()
        });

        let (test_id, handle) = engine
            .start_test(TestConfig::new("http://target.local/", 10_000, 2))
            .await
            .unwrap();
        assert_eq!(engine.active_tests().await, vec![test_id]);
        assert!(matches!(
            engine.get_result(test_id).await.unwrap(),
            TestStatus::Pending { .. }
        ));

        tokio::time::sleep(Duration::from_millis(60)).await;
        engine.stop_test(test_id).await.unwrap();
        let report = handle.await.unwrap();

        assert!(report.was_cancelled());
        assert_eq!(
            report.successful_requests + report.failed_requests + report.cancelled_requests,
            10_000
        );
        assert!(engine.get_result(test_id).await.unwrap().is_completed());
        assert!(engine.stop_test(test_id).await.is_err());
    }

    #[tokio::test]
    async fn test_background_test_leaves_no_active_entry() {
        let engine = LoadEngine::new(Arc::new(MockTransport::status(200)));

        let (test_id, handle) = engine
            .start_test(TestConfig::new("http://target.local/", 3, 3))
            .await
            .unwrap();
        handle.await.unwrap();
        engine
            .run_test(TestConfig::new("http://target.local/", 2, 1))
            .await
            .unwrap();

        assert!(engine.active_tests().await.is_empty());
        assert!(engine.get_result(test_id).await.unwrap().is_completed());
        assert!(engine.stop_test(test_id).await.is_err());
    }

    #[tokio::test]
    async fn test_full_registry_keeps_running_tests() {
        let transport = Arc::new(MockTransport::status(200).with_delay(Duration::from_millis(10)));
        let engine = LoadEngine::new(transport)
            .with_registry(Arc::new(TestRegistry::with_capacity(2)));

        let (first, first_handle) = engine
            .start_test(TestConfig::new("http://target.local/", 20, 1))
            .await
            .unwrap();
        let (second, second_handle) = engine
            .start_test(TestConfig::new("http://target.local/", 20, 1))
            .await
            .unwrap();
        for _ in 0..3 {
            engine
                .run_test(TestConfig::new("http://target.local/", 1, 1))
                .await
                .unwrap();
        }

        let first_report = first_handle.await.unwrap();
        let second_report = second_handle.await.unwrap();
        assert_eq!(first_report.successful_requests, 20);
        assert_eq!(second_report.successful_requests, 20);
        assert_eq!(engine.get_result(first).await.unwrap().report(), Some(&first_report));
        assert_eq!(engine.get_result(second).await.unwrap().report(), Some(&second_report));
    }

    #[tokio::test]
    async fn test_seeded_engines_generate_same_payloads() {
        use crate::types::{FieldKind, FieldSpec};
        use serde_json::Map;
        use std::collections::BTreeMap;

        let mut fields = BTreeMap::new();
        fields.insert("n".to_string(), FieldSpec::new(FieldKind::Integer));
        let config = TestConfig::new("http://target.local/", 5, 1)
            .with_method("POST")
            .with_payload(Map::new(), fields);

        let mut bodies = Vec::new();
        for _ in 0..2 {
            let transport = Arc::new(MockTransport::status(200));
            let engine = LoadEngine::new(transport.clone()).with_seed(99);
            engine.run_test(config.clone()).await.unwrap();
            bodies.push(transport.bodies_seen());
        }
        assert_eq!(bodies[0], bodies[1]);
    }

    #[tokio::test]
    async fn test_unknown_test_id() {
        let engine = LoadEngine::new(Arc::new(MockTransport::status(200)));
        let id = uuid::Uuid::new_v4();
        assert!(matches!(engine.get_result(id).await, Err(LoadError::TestNotFound { .. })));
        assert!(matches!(engine.stop_test(id).await, Err(LoadError::TestNotFound { .. })));
    }
}
