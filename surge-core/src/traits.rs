//! Core traits for the load engine

use crate::error::LoadResult;
use crate::report::TestReport;
use crate::types::{OutboundRequest, TransportResponse};
use async_trait::async_trait;

/// Capability for issuing HTTP requests, optionally through an upstream proxy
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a request and return what came back. Network-level failures are
    /// reported as `LoadError::Transport`; any HTTP status is a response.
    async fn send(
        &self,
        request: &OutboundRequest,
        proxy: Option<&str>,
    ) -> LoadResult<TransportResponse>;
}

/// Destination for finished reports
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn publish(&self, report: &TestReport) -> LoadResult<()>;
}
