//! Surge CLI
//!
//! Loads a test configuration from JSON, registers upstream proxies, runs
//! the load test and writes the report as JSON.

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use surge_core::{
    DispatchSettings, LoadEngine, LoadError, LoadResult, ReportSink, ReqwestTransport, TestConfig,
    TestReport,
};

pub mod logging;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the test configuration (JSON)
    #[arg(long, short)]
    pub config: PathBuf,

    /// Upstream proxy URL; repeat for several
    #[arg(long = "proxy")]
    pub proxies: Vec<String>,

    /// Seed for payload generation
    #[arg(long)]
    pub seed: Option<u64>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// How long in-flight requests may run after Ctrl-C
    #[arg(long, default_value_t = 10)]
    pub grace_period_secs: u64,

    /// Backoff after a rate-limited request sent without a proxy
    #[arg(long, default_value_t = 5000)]
    pub backoff_ms: u64,

    /// Write the report here instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Args {
    pub fn logging_config(&self) -> logging::LoggingConfig {
        logging::LoggingConfig {
            level: self.log_level.clone(),
            json_format: self.json_logs,
            log_file: self.log_file.as_ref().map(|p| p.to_string_lossy().to_string()),
            ..Default::default()
        }
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            rate_limit_backoff: Duration::from_millis(self.backoff_ms),
            cancellation_grace_period: Duration::from_secs(self.grace_period_secs),
        }
    }
}

/// Read and validate a test configuration file
pub fn load_config(path: &Path) -> anyhow::Result<TestConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config = TestConfig::from_json(&text)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config in {}", path.display()))?;
    Ok(config)
}

/// Writes each report as pretty-printed JSON to a file
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ReportSink for JsonFileSink {
    async fn publish(&self, report: &TestReport) -> LoadResult<()> {
        let json = serde_json::to_string_pretty(report)?;
        tokio::fs::write(&self.path, json).await.map_err(LoadError::from)?;
        tracing::info!("Report written to {}", self.path.display());
        Ok(())
    }
}

/// Run until the test finishes or Ctrl-C is received
pub async fn run(args: Args) -> anyhow::Result<TestReport> {
    run_until(args, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// Run the configured test. When `shutdown` resolves first the test is
/// stopped and the partial report is still produced.
pub async fn run_until<F>(args: Args, shutdown: F) -> anyhow::Result<TestReport>
where
    F: Future<Output = ()>,
{
    let mut config = load_config(&args.config)?;
    if !args.proxies.is_empty() && !config.use_proxies {
        tracing::info!("Proxies given on the command line, enabling proxy rotation");
        config.use_proxies = true;
    }

    tracing::info!("Starting load test...");
    tracing::info!("  Target:      {} {}", config.method, config.url);
    tracing::info!("  Requests:    {}", config.num_requests);
    tracing::info!("  Concurrency: {}", config.concurrency);
    if config.use_proxies {
        tracing::info!("  Rotation:    {}", config.rotation_strategy);
    }

    let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(args.timeout_secs)));
    let mut engine = LoadEngine::new(transport).with_settings(args.dispatch_settings());
    if let Some(seed) = args.seed {
        engine = engine.with_seed(seed);
    }
    if let Some(path) = &args.output {
        engine = engine.with_sink(Arc::new(JsonFileSink::new(path.clone())));
    }

    for proxy in &args.proxies {
        engine
            .pool()
            .add(proxy)
            .await
            .with_context(|| format!("Failed to register proxy {}", proxy))?;
    }

    let (test_id, mut handle) = engine.start_test(config).await?;
    tracing::info!("Test ID: {}", test_id);

    tokio::pin!(shutdown);
    let report = tokio::select! {
        joined = &mut handle => joined.context("Load test task failed")?,
        _ = &mut shutdown => {
            tracing::info!("Shutdown signal received, stopping load test...");
            if let Err(e) = engine.stop_test(test_id).await {
                // finished in the meantime
                tracing::debug!("Stop request ignored: {}", e);
            }
            handle.await.context("Load test task failed")?
        }
    };

    if args.output.is_none() {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    tracing::info!(
        "Completed {} requests: {:.1}% success, avg {:.3}s, {:.1} req/s",
        report.total_requests,
        report.success_rate(),
        report.average_response_time,
        report.requests_per_second()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_file(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    fn args_for(path: &Path) -> Args {
        Args::parse_from(["surge", "--config", path.to_str().unwrap()])
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["surge", "--config", "test.json"]);
        assert_eq!(args.timeout_secs, 30);
        assert_eq!(args.grace_period_secs, 10);
        assert!(args.proxies.is_empty());
        assert!(args.output.is_none());

        let settings = args.dispatch_settings();
        assert_eq!(settings.rate_limit_backoff, Duration::from_secs(5));
        assert_eq!(settings.cancellation_grace_period, Duration::from_secs(10));
    }

    #[test]
    fn test_repeated_proxy_flag() {
        let args = Args::parse_from([
            "surge", "-c", "t.json", "--proxy", "http://a:1", "--proxy", "http://b:2",
        ]);
        assert_eq!(args.proxies, vec!["http://a:1", "http://b:2"]);
    }

    #[test]
    fn test_missing_config_flag_rejected() {
        assert!(Args::try_parse_from(["surge"]).is_err());
    }

    #[test]
    fn test_load_config() {
        let file = config_file(
            r#"{
                "url": "http://127.0.0.1:8080/api",
                "method": "post",
                "payload_template": {"kind": "signup"},
                "dynamic_fields": {"email": {"type": "email"}},
                "num_requests": 10,
                "concurrency": 2,
                "proxy_rotation_strategy": "least_used"
            }"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.num_requests, 10);
        assert_eq!(config.rotation_strategy, surge_core::RotationStrategy::LeastUsed);
    }

    #[test]
    fn test_load_config_rejections() {
        let unknown_type = config_file(
            r#"{"url": "http://x/", "num_requests": 1, "concurrency": 1,
                "payload_template": {}, "dynamic_fields": {"f": {"type": "blob"}}}"#,
        );
        assert!(load_config(unknown_type.path()).is_err());

        let bad_strategy = config_file(
            r#"{"url": "http://x/", "num_requests": 1, "concurrency": 1,
                "rotation_strategy": "random"}"#,
        );
        assert!(load_config(bad_strategy.path()).is_err());

        assert!(load_config(Path::new("/nonexistent/surge.json")).is_err());
    }

    #[tokio::test]
    async fn test_json_file_sink_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let report = surge_core::ReportBuilder::new(uuid_for_test(), 3)
            .build(&surge_core::AggregateSnapshot::default());

        JsonFileSink::new(&path).publish(&report).await.unwrap();

        let written: TestReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, report);
    }

    #[tokio::test]
    async fn test_run_against_closed_port_records_failures() {
        let file = config_file(
            r#"{"url": "http://127.0.0.1:1/", "num_requests": 4, "concurrency": 2}"#,
        );
        let dir = tempfile::tempdir().unwrap();
        let mut args = args_for(file.path());
        args.output = Some(dir.path().join("report.json"));
        args.timeout_secs = 2;

        let report = run_until(args, std::future::pending()).await.unwrap();

        assert_eq!(report.failed_requests, 4);
        assert_eq!(report.error_messages.len(), 4);
        assert!(dir.path().join("report.json").exists());
    }

    fn uuid_for_test() -> surge_core::TestId {
        surge_core::TestId::from_u128(0x1234)
    }
}
