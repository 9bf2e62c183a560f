use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Synchronous response to a posted exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// `202 Accepted` with an empty body, the usual synchronous hand-off.
    pub fn accepted() -> Self {
        Self::new(202, "")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }
}

/// Coarse per-transport health counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportHealthSnapshot {
    pub outbound_send_ok: u64,
    pub outbound_send_err: u64,
    pub last_error: Option<String>,
}

/// Counters shared by transport implementations.
#[derive(Debug, Default)]
pub(crate) struct HealthCounters {
    send_ok: AtomicU64,
    send_err: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl HealthCounters {
    pub(crate) fn record<T>(&self, result: &Result<T, TransportError>) {
        match result {
            Ok(_) => {
                self.send_ok.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.send_err.fetch_add(1, Ordering::Relaxed);
                *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(err.to_string());
            }
        }
    }

    pub(crate) fn snapshot(&self) -> TransportHealthSnapshot {
        TransportHealthSnapshot {
            outbound_send_ok: self.send_ok.load(Ordering::Relaxed),
            outbound_send_err: self.send_err.load(Ordering::Relaxed),
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }
}

/// Byte-oriented transport contract used by the delivery state machine.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Posts a serialized exchange to `endpoint` and returns the synchronous
    /// response.
    async fn post(
        &self,
        endpoint: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<TransportResponse, TransportError>;

    /// Best-effort health counters for operations.
    fn health_snapshot(&self) -> TransportHealthSnapshot {
        TransportHealthSnapshot::default()
    }
}

/// Exchange captured by [`InMemoryTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub endpoint: String,
    pub content_type: String,
    pub body: Bytes,
}

/// In-memory transport for tests and simulations.
///
/// Responses are taken from a script in order; once the script is empty the
/// default response (`202 Accepted`) is returned. Every request is recorded
/// and, when a listener is attached, forwarded to it.
#[derive(Debug)]
pub struct InMemoryTransport {
    script: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    sent: Mutex<Vec<OutboundRequest>>,
    default_response: TransportResponse,
    listener: Option<mpsc::UnboundedSender<OutboundRequest>>,
    health: HealthCounters,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            default_response: TransportResponse::accepted(),
            listener: None,
            health: HealthCounters::default(),
        }
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport that forwards each captured request to the returned receiver.
    pub fn with_listener() -> (Self, mpsc::UnboundedReceiver<OutboundRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            listener: Some(tx),
            ..Self::default()
        };
        (transport, rx)
    }

    pub fn set_default_response(&mut self, response: TransportResponse) {
        self.default_response = response;
    }

    /// Queues the response for the next unscripted request.
    pub fn push_response(&self, response: TransportResponse) {
        self.lock_script().push_back(Ok(response));
    }

    /// Queues a failure for the next unscripted request.
    pub fn push_error(&self, error: TransportError) {
        self.lock_script().push_back(Err(error));
    }

    /// Drains and returns all requests captured so far.
    pub fn take_sent(&self) -> Vec<OutboundRequest> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn lock_script(
        &self,
    ) -> std::sync::MutexGuard<'_, VecDeque<Result<TransportResponse, TransportError>>> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn post(
        &self,
        endpoint: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<TransportResponse, TransportError> {
        let request = OutboundRequest {
            endpoint: endpoint.to_string(),
            content_type: content_type.to_string(),
            body,
        };
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        if let Some(listener) = &self.listener {
            let _ = listener.send(request);
        }

        let scripted = self.lock_script().pop_front();
        let result = scripted.unwrap_or_else(|| Ok(self.default_response.clone()));
        self.health.record(&result);
        result
    }

    fn health_snapshot(&self) -> TransportHealthSnapshot {
        self.health.snapshot()
    }
}
