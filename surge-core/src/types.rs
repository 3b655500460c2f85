//! Core data types for the load engine

use crate::error::LoadError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Status code servers use to signal rate limiting
pub const RATE_LIMIT_STATUS: u16 = 429;

/// Declared type of a dynamic payload field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    Email,
    /// Any tag not known to the generator. Only usable with an explicit value set.
    Other(std::string::String),
}

impl From<std::string::String> for FieldKind {
    fn from(tag: std::string::String) -> Self {
        match tag.as_str() {
            "string" => FieldKind::String,
            "integer" => FieldKind::Integer,
            "float" => FieldKind::Float,
            "boolean" => FieldKind::Boolean,
            "date" => FieldKind::Date,
            "email" => FieldKind::Email,
            _ => FieldKind::Other(tag),
        }
    }
}

impl From<FieldKind> for std::string::String {
    fn from(kind: FieldKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::String => write!(f, "string"),
            FieldKind::Integer => write!(f, "integer"),
            FieldKind::Float => write!(f, "float"),
            FieldKind::Boolean => write!(f, "boolean"),
            FieldKind::Date => write!(f, "date"),
            FieldKind::Email => write!(f, "email"),
            FieldKind::Other(tag) => write!(f, "{}", tag),
        }
    }
}

/// Declarative description of how to synthesize one payload field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub kind: FieldKind,
    /// Explicit value set; takes precedence over the type tag when non-empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
    #[serde(default, alias = "min_value", skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, alias = "max_value", skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Format hint such as `uuid`, `name` or `iso`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl FieldSpec {
    /// Create a spec for the given type tag with no constraints
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            values: None,
            min: None,
            max: None,
            format: None,
        }
    }

    /// Restrict generation to an explicit value set
    pub fn with_values(mut self, values: Vec<Value>) -> Self {
        self.values = Some(values);
        self
    }

    /// Set numeric bounds
    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Set the format hint
    pub fn with_format(mut self, format: &str) -> Self {
        self.format = Some(format.to_string());
        self
    }
}

/// Proxy rotation policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RotationStrategy {
    #[default]
    RoundRobin,
    LeastUsed,
}

impl FromStr for RotationStrategy {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(RotationStrategy::RoundRobin),
            "least_used" => Ok(RotationStrategy::LeastUsed),
            other => Err(LoadError::UnknownStrategy {
                strategy: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for RotationStrategy {
    type Error = LoadError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RotationStrategy> for String {
    fn from(strategy: RotationStrategy) -> Self {
        strategy.to_string()
    }
}

impl fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RotationStrategy::RoundRobin => write!(f, "round_robin"),
            RotationStrategy::LeastUsed => write!(f, "least_used"),
        }
    }
}

/// A fully materialized request handed to the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    /// JSON body; `None` sends no body
    pub body: Option<Value>,
}

impl OutboundRequest {
    /// Create a new request without headers or body
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_string(),
            url: url.to_string(),
            headers: HashMap::new(),
            body: None,
        }
    }

    /// Add or update a header
    pub fn set_header(&mut self, key: String, value: String) {
        self.headers.insert(key, value);
    }

    /// Get a header value
    pub fn get_header(&self, key: &str) -> Option<&String> {
        self.headers.get(key)
    }
}

/// What the transport observed for a request that got a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportResponse {
    pub status_code: u16,
    pub body_length: usize,
}

impl TransportResponse {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            body_length: 0,
        }
    }

    /// Check if response indicates success (2xx status code)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status_code == RATE_LIMIT_STATUS
    }
}

/// Outcome of one trial, consumed immediately by the aggregator
#[derive(Debug, Clone, PartialEq)]
pub struct TrialOutcome {
    pub elapsed: Duration,
    /// Absent on transport or pool failure
    pub status_code: Option<u16>,
    /// Absent when a response was received
    pub error: Option<String>,
    /// Absent when proxies are disabled or none could be selected
    pub proxy: Option<String>,
}

impl TrialOutcome {
    /// A trial that received a response, whatever its status
    pub fn response(status_code: u16, elapsed: Duration, proxy: Option<String>) -> Self {
        Self {
            elapsed,
            status_code: Some(status_code),
            error: None,
            proxy,
        }
    }

    /// A trial that failed before or during the request
    pub fn failure(error: impl Into<String>, elapsed: Duration, proxy: Option<String>) -> Self {
        Self {
            elapsed,
            status_code: None,
            error: Some(error.into()),
            proxy,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
