//! Surge Core - HTTP load generation engine
//!
//! Fires a fixed number of requests at a target with bounded concurrency,
//! optionally rotating through upstream proxies, and reduces the outcomes
//! into a report.

pub mod types;
pub mod error;
pub mod traits;
pub mod config;
pub mod payload;
pub mod proxy_pool;
pub mod aggregator;
pub mod report;
pub mod registry;
pub mod dispatcher;
pub mod engine;
pub mod transport;

#[cfg(test)]
mod mock;


pub use types::{
    FieldKind, FieldSpec, OutboundRequest, RotationStrategy, TransportResponse, TrialOutcome,
    RATE_LIMIT_STATUS,
};

pub use error::{ErrorCategory, LoadError, LoadResult};

pub use traits::{HttpTransport, ReportSink};

pub use config::{DispatchSettings, TestConfig};

pub use payload::{generate_dynamic_value, generate_payload, DynamicPayloadGenerator, ValueGenerator};

pub use proxy_pool::{ProxyEntry, ProxyPool, ProxyPoolSettings};

pub use aggregator::{AggregateSnapshot, ResultAggregator};

pub use report::{ReportBuilder, TestReport};

pub use registry::{TestId, TestRegistry, TestStatus};

pub use dispatcher::RequestDispatcher;

pub use engine::LoadEngine;

pub use transport::ReqwestTransport;

// Re-exported so callers can drive cancellation without a direct dependency
pub use tokio_util::sync::CancellationToken;
