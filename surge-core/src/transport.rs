//! HTTP transport backed by reqwest

use crate::error::{LoadError, LoadResult};
use crate::traits::HttpTransport;
use crate::types::{OutboundRequest, TransportResponse};
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tracing::debug;

const DIRECT: &str = "";

/// Sends requests with reqwest. One client is built per egress path (direct
/// or a given proxy) and reused for the rest of the process.
pub struct ReqwestTransport {
    clients: DashMap<String, reqwest::Client>,
    timeout: Duration,
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of cached clients
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn client_for(&self, proxy: Option<&str>) -> LoadResult<reqwest::Client> {
        let key = proxy.unwrap_or(DIRECT);
        if let Some(client) = self.clients.get(key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder().timeout(self.timeout);
        if let Some(url) = proxy {
            let upstream = reqwest::Proxy::all(url)
                .map_err(|e| LoadError::transport(format!("invalid proxy {}: {}", url, e)))?;
            builder = builder.proxy(upstream);
        }
        let client = builder
            .build()
            .map_err(|e| LoadError::transport(format!("failed to build HTTP client: {}", e)))?;

        debug!("Built HTTP client for {}", proxy.unwrap_or("direct connections"));
        // another task may have raced us here; either client is equivalent
        Ok(self.clients.entry(key.to_string()).or_insert(client).clone())
    }
}

pub(crate) fn parse_method(method: &str) -> LoadResult<reqwest::Method> {
    reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|_| LoadError::invalid_config("method", &format!("unsupported HTTP method '{}'", method)))
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        request: &OutboundRequest,
        proxy: Option<&str>,
    ) -> LoadResult<TransportResponse> {
        let client = self.client_for(proxy)?;
        let mut builder = client.request(parse_method(&request.method)?, &request.url);

        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LoadError::transport(e.to_string()))?;
        let status_code = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| LoadError::transport(e.to_string()))?;

        Ok(TransportResponse {
            status_code,
            body_length: body.len(),
        })
    }
}
