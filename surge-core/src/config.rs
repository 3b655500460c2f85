//! Run configuration and validation

use crate::error::{LoadError, LoadResult};
use crate::payload::DynamicPayloadGenerator;
use crate::types::{FieldSpec, RotationStrategy};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

const VALID_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// Immutable description of a load test run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub payload_template: Option<Map<String, Value>>,
    #[serde(default)]
    pub dynamic_fields: Option<BTreeMap<String, FieldSpec>>,
    pub num_requests: usize,
    pub concurrency: usize,
    #[serde(default)]
    pub use_proxies: bool,
    #[serde(default, alias = "proxy_rotation_strategy")]
    pub rotation_strategy: RotationStrategy,
}

fn default_method() -> String {
    "GET".to_string()
}

impl TestConfig {
    /// Create a config with defaults for everything but the essentials
    pub fn new(url: &str, num_requests: usize, concurrency: usize) -> Self {
        Self {
            url: url.to_string(),
            method: default_method(),
            headers: HashMap::new(),
            payload_template: None,
            dynamic_fields: None,
            num_requests,
            concurrency,
            use_proxies: false,
            rotation_strategy: RotationStrategy::default(),
        }
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = method.to_string();
        self
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_payload(
        mut self,
        template: Map<String, Value>,
        fields: BTreeMap<String, FieldSpec>,
    ) -> Self {
        self.payload_template = Some(template);
        self.dynamic_fields = Some(fields);
        self
    }

    pub fn with_proxies(mut self, strategy: RotationStrategy) -> Self {
        self.use_proxies = true;
        self.rotation_strategy = strategy;
        self
    }

    /// Parse a config from JSON text
    pub fn from_json(text: &str) -> LoadResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reject configurations that cannot run. Called before any trial is
    /// scheduled.
    pub fn validate(&self) -> LoadResult<()> {
        if self.num_requests == 0 {
            return Err(LoadError::invalid_config("num_requests", "must be greater than zero"));
        }
        if self.concurrency == 0 {
            return Err(LoadError::invalid_config("concurrency", "must be greater than zero"));
        }

        let parsed = url::Url::parse(&self.url)
            .map_err(|e| LoadError::invalid_config("url", &e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(LoadError::invalid_config(
                "url",
                &format!("unsupported scheme '{}'", parsed.scheme()),
            ));
        }

        let method = self.method.to_uppercase();
        if !VALID_METHODS.contains(&method.as_str()) {
            return Err(LoadError::invalid_config(
                "method",
                &format!("unsupported HTTP method '{}'", self.method),
            ));
        }

        self.payload_generator().map(|_| ())
    }

    /// Compile the payload template and dynamic fields
    pub fn payload_generator(&self) -> LoadResult<DynamicPayloadGenerator> {
        DynamicPayloadGenerator::new(self.payload_template.clone(), self.dynamic_fields.as_ref())
    }
}

/// Dispatcher tuning that is not part of a test's identity. The status code
/// treated as rate limiting comes from the proxy pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Sleep applied to a rate-limited trial that went out without a proxy
    pub rate_limit_backoff: Duration,
    /// How long in-flight trials may keep running after cancellation
    pub cancellation_grace_period: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            rate_limit_backoff: Duration::from_secs(5),
            cancellation_grace_period: Duration::from_secs(10),
        }
    }
}
