//! Scriptable transport for unit tests

use crate::error::LoadResult;
use crate::traits::HttpTransport;
use crate::types::{OutboundRequest, TransportResponse};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type Responder = dyn Fn(&OutboundRequest, Option<&str>) -> LoadResult<TransportResponse> + Send + Sync;

pub(crate) struct MockTransport {
    responder: Box<Responder>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    proxies_seen: Mutex<Vec<Option<String>>>,
    bodies_seen: Mutex<Vec<Option<serde_json::Value>>>,
}

impl MockTransport {
    pub(crate) fn new<F>(responder: F) -> Self
    where
        F: Fn(&OutboundRequest, Option<&str>) -> LoadResult<TransportResponse> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            proxies_seen: Mutex::new(Vec::new()),
            bodies_seen: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with `status`
    pub(crate) fn status(status: u16) -> Self {
        Self::new(move |_, _| Ok(TransportResponse::new(status)))
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn proxies_seen(&self) -> Vec<Option<String>> {
        self.proxies_seen.lock().unwrap().clone()
    }

    pub(crate) fn bodies_seen(&self) -> Vec<Option<serde_json::Value>> {
        self.bodies_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(
        &self,
        request: &OutboundRequest,
        proxy: Option<&str>,
    ) -> LoadResult<TransportResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.proxies_seen.lock().unwrap().push(proxy.map(str::to_string));
        self.bodies_seen.lock().unwrap().push(request.body.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = (self.responder)(request, proxy);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
