//! Bounded-concurrency execution of a run's trials

use crate::aggregator::{AggregateSnapshot, ResultAggregator};
use crate::config::{DispatchSettings, TestConfig};
use crate::error::{LoadError, LoadResult};
use crate::payload::DynamicPayloadGenerator;
use crate::proxy_pool::ProxyPool;
use crate::registry::TestId;
use crate::report::{ReportBuilder, TestReport};
use crate::traits::HttpTransport;
use crate::types::{OutboundRequest, TrialOutcome};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything a worker needs to run one trial
struct TrialContext {
    config: TestConfig,
    generator: DynamicPayloadGenerator,
    transport: Arc<dyn HttpTransport>,
    pool: Arc<ProxyPool>,
    settings: DispatchSettings,
    rng: Mutex<StdRng>,
}

/// Runs exactly `num_requests` trials with at most `concurrency` in flight.
///
/// A fixed set of workers pulls trial indices from a bounded channel, so the
/// concurrency limit is the worker count and the producer blocks once every
/// worker is busy and the queue is full.
pub struct RequestDispatcher {
    ctx: Arc<TrialContext>,
}

impl RequestDispatcher {
    /// Validate `config` and prepare a dispatcher. Invalid configurations are
    /// rejected here, before any trial is scheduled.
    pub fn new(
        config: TestConfig,
        transport: Arc<dyn HttpTransport>,
        pool: Arc<ProxyPool>,
    ) -> LoadResult<Self> {
        Self::with_rng(config, transport, pool, StdRng::from_entropy())
    }

    /// Same as [`RequestDispatcher::new`] with an injected random source
    pub fn with_rng(
        config: TestConfig,
        transport: Arc<dyn HttpTransport>,
        pool: Arc<ProxyPool>,
        rng: StdRng,
    ) -> LoadResult<Self> {
        config.validate()?;
        let generator = config.payload_generator()?;

        Ok(Self {
            ctx: Arc::new(TrialContext {
                config,
                generator,
                transport,
                pool,
                settings: DispatchSettings::default(),
                rng: Mutex::new(rng),
            }),
        })
    }

    pub fn with_settings(mut self, settings: DispatchSettings) -> Self {
        match Arc::get_mut(&mut self.ctx) {
            Some(ctx) => ctx.settings = settings,
            None => warn!("Dispatcher already running, settings unchanged"),
        }
        self
    }

    pub fn config(&self) -> &TestConfig {
        &self.ctx.config
    }

    /// Run every trial and reduce the outcomes into a report
    pub async fn run(&self, test_id: TestId, cancel: CancellationToken) -> TestReport {
        let started_at = Utc::now();
        let snapshot = self.dispatch(cancel).await;
        let completed_at = Utc::now();

        let report = ReportBuilder::new(test_id, self.ctx.config.num_requests)
            .with_timing(started_at, completed_at)
            .build(&snapshot);

        info!(
            "Test {} finished: {} ok, {} failed, {} cancelled",
            test_id, report.successful_requests, report.failed_requests, report.cancelled_requests
        );
        report
    }

    /// Run every trial and return the raw samples.
    ///
    /// Cancelling `cancel` stops scheduling new trials. Trials already in
    /// flight get the grace period to finish and are aborted after that, so
    /// this always returns.
    pub async fn dispatch(&self, cancel: CancellationToken) -> AggregateSnapshot {
        let num_requests = self.ctx.config.num_requests;
        let worker_count = self.ctx.config.concurrency.min(num_requests);
        let aggregator = Arc::new(ResultAggregator::new());

        debug!(
            "Dispatching {} trials across {} workers",
            num_requests, worker_count
        );

        let (tx, rx) = mpsc::channel::<usize>(worker_count.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let mut workers = JoinSet::new();

        for worker_id in 0..worker_count {
            let rx = rx.clone();
            let ctx = self.ctx.clone();
            let aggregator = aggregator.clone();
            let cancel = cancel.clone();

            workers.spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(index) = next else { break };
                    if cancel.is_cancelled() {
                        break;
                    }
                    let outcome = ctx.clone().execute_isolated(index, cancel.clone()).await;
                    aggregator.record(outcome);
                }
                debug!("Worker {} exiting", worker_id);
            });
        }

        for index in 0..num_requests {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Cancelled after scheduling {} of {} trials", index, num_requests);
                    break;
                }
                sent = tx.send(index) => {
                    if sent.is_err() {
                        error!("All workers exited before trial {} was scheduled", index);
                        break;
                    }
                }
            }
        }
        drop(tx);

        let drained = tokio::select! {
            _ = drain(&mut workers) => true,
            _ = cancel.cancelled() => false,
        };

        if !drained {
            let grace = self.ctx.settings.cancellation_grace_period;
            if tokio::time::timeout(grace, drain(&mut workers)).await.is_err() {
                warn!(
                    "{} workers still running after {:?} grace period, aborting",
                    workers.len(),
                    grace
                );
                workers.abort_all();
                drain(&mut workers).await;
            }
        }

        aggregator.snapshot()
    }
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn drain(workers: &mut JoinSet<()>) {
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            if e.is_panic() {
                error!("Dispatcher worker panicked: {}", e);
            }
        }
    }
}

impl TrialContext {
    /// Run one trial on its own task. A panic inside the trial is recorded
    /// as a failed trial and the calling worker keeps going.
    async fn execute_isolated(self: Arc<Self>, index: usize, cancel: CancellationToken) -> TrialOutcome {
        let trial = tokio::spawn(async move { self.execute_trial(index, &cancel).await });
        // aborting the worker must also abort the trial it is waiting on
        let _guard = AbortOnDrop(trial.abort_handle());

        match trial.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Trial {} panicked: {}", index, e);
                TrialOutcome::failure(format!("trial panicked: {}", e), Duration::ZERO, None)
            }
        }
    }

    async fn execute_trial(&self, index: usize, cancel: &CancellationToken) -> TrialOutcome {
        let proxy = if self.config.use_proxies {
            match self.pool.select_next(self.config.rotation_strategy).await {
                Ok(url) => Some(url),
                Err(e) => {
                    debug!("Trial {} could not get a proxy: {}", index, e);
                    return TrialOutcome::failure(e.to_string(), Duration::ZERO, None);
                }
            }
        } else {
            None
        };

        let request = self.build_request();
        let start = Instant::now();
        let sent = self.transport.send(&request, proxy.as_deref()).await;
        let elapsed = start.elapsed();

        match sent {
            Err(e) => {
                debug!("Trial {} failed after {:?}: {}", index, elapsed, e);
                if let Some(url) = proxy.as_deref() {
                    self.report_to_pool(url, self.pool.record_failure(url).await);
                }
                TrialOutcome::failure(e.to_string(), elapsed, proxy)
            }
            Ok(response) => {
                let status = response.status_code;
                debug!("Trial {} returned {} in {:?}", index, status, elapsed);

                match proxy.as_deref() {
                    Some(url) => {
                        self.report_to_pool(url, self.pool.update_status(url, status, elapsed).await);
                    }
                    None if status == self.pool.settings().rate_limit_status => {
                        debug!(
                            "Trial {} rate limited without proxy, backing off {:?}",
                            index, self.settings.rate_limit_backoff
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(self.settings.rate_limit_backoff) => {}
                            _ = cancel.cancelled() => {}
                        }
                    }
                    None => {}
                }

                TrialOutcome::response(status, elapsed, proxy)
            }
        }
    }

    fn build_request(&self) -> OutboundRequest {
        let mut request = OutboundRequest::new(&self.config.method, &self.config.url);
        for (key, value) in &self.config.headers {
            request.set_header(key.clone(), value.clone());
        }

        let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
        request.body = self.generator.generate(&mut *rng);
        request
    }

    /// A proxy removed mid-run is not a trial failure
    fn report_to_pool(&self, url: &str, result: LoadResult<()>) {
        match result {
            Ok(()) => {}
            Err(LoadError::ProxyNotFound { .. }) => {
                warn!("Proxy {} left the pool during the run", url);
            }
            Err(e) => warn!("Failed to update proxy {}: {}", url, e),
        }
    }
}
