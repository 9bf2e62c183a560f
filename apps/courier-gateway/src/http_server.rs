use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use courier_codec::{ContentId, EbxmlEnvelope, Part};
use courier_core::IdGenerator;
use courier_node::receiver::FAULT_STATUS;
use courier_node::{
    Acceptance, DeliveredPayload, DeliveryError, EndpointAddress, EndpointAddressRepository,
    InMemoryLedger, OutboundMessage, ReceiverState, ReliableReceiver, ReliableSender,
};
use courier_transport::Transport;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::logger::LogBuffer;
use crate::MetricsState;

#[derive(Clone)]
pub struct GatewayState {
    pub metrics: Arc<MetricsState>,
    pub receiver: Arc<ReliableReceiver>,
    pub sender: Arc<ReliableSender>,
    pub transport: Arc<dyn Transport>,
    pub ledger: Arc<InMemoryLedger>,
    pub addresses: Arc<dyn EndpointAddressRepository>,
    pub ids: Arc<dyn IdGenerator>,
    pub party_id: String,
    pub deliveries: Arc<DeliveryHistory>,
    pub log_buffer: Arc<LogBuffer>,
}

/// Bounded record of recent application deliveries.
pub struct DeliveryHistory {
    entries: Mutex<VecDeque<serde_json::Value>>,
    capacity: usize,
}

impl DeliveryHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, payload: &DeliveredPayload) {
        let entry = json!({
            "message_id": payload.message_id,
            "conversation_id": payload.conversation_id,
            "from_party": payload.from_party,
            "service": payload.service,
            "action": payload.action,
            "parts": payload
                .parts
                .iter()
                .map(|part| json!({
                    "content_id": part.content_id.as_ref().map(|id| id.logical().to_string()),
                    "content_type": part.content_type,
                    "bytes": part.body.len(),
                }))
                .collect::<Vec<_>>(),
        });
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn recent(&self, limit: usize) -> Vec<serde_json::Value> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }
}

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/ebxml", post(inbound_ebxml))
        .route("/send", post(send))
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .route("/deliveries", get(deliveries))
        .route("/logs", get(logs))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn inbound_ebxml(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.metrics.inbound_total.fetch_add(1, Ordering::Relaxed);
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match state.receiver.accept(content_type, &body) {
        Acceptance::Accepted(exchange) => {
            let receiver = Arc::clone(&state.receiver);
            let metrics = Arc::clone(&state.metrics);
            tokio::spawn(async move {
                match receiver.complete(exchange).await {
                    ReceiverState::AckSent => {
                        metrics.acks_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    ReceiverState::FailureNotified => {
                        metrics.failures_notified.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {}
                }
            });
            StatusCode::OK.into_response()
        }
        Acceptance::Fault(fault) => {
            state.metrics.inbound_faults.fetch_add(1, Ordering::Relaxed);
            let status =
                StatusCode::from_u16(FAULT_STATUS).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, [(CONTENT_TYPE, "text/xml; charset=UTF-8")], fault.render()).into_response()
        }
        Acceptance::Reply { correlated } => {
            let counter = if correlated {
                &state.metrics.replies_correlated
            } else {
                &state.metrics.replies_uncorrelated
            };
            counter.fetch_add(1, Ordering::Relaxed);
            StatusCode::OK.into_response()
        }
        Acceptance::Malformed(err) => {
            state.metrics.inbound_malformed.fetch_add(1, Ordering::Relaxed);
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    service: String,
    action: String,
    #[serde(default)]
    asid: Option<String>,
    #[serde(default)]
    ods_code: Option<String>,
    payload: String,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    is_hl7: bool,
}

fn error_json(status: StatusCode, error: impl ToString) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(json!({"ok": false, "error": error.to_string()})))
}

async fn send(
    State(state): State<GatewayState>,
    Json(request): Json<SendRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let lookup = match (&request.asid, &request.ods_code) {
        (Some(asid), _) => {
            state
                .addresses
                .find_by_asid(&request.service, &request.action, asid)
                .await
        }
        (None, Some(ods_code)) => {
            state
                .addresses
                .find_by_ods_code(&request.service, &request.action, ods_code)
                .await
        }
        (None, None) => {
            return error_json(StatusCode::BAD_REQUEST, "asid or ods_code required");
        }
    };
    let address = match lookup {
        Ok(Some(address)) => address,
        Ok(None) => {
            return error_json(StatusCode::NOT_FOUND, "no endpoint address for workflow");
        }
        Err(err) => return error_json(StatusCode::BAD_GATEWAY, err),
    };

    let message = match outbound_message(&state, &request, address).await {
        Ok(message) => message,
        Err(err) => return error_json(StatusCode::BAD_REQUEST, err),
    };
    let message_id = message.envelope.message_data.message_id.clone();

    match state.sender.send(&message).await {
        Ok(report) => {
            state.metrics.sends_ok.fetch_add(1, Ordering::Relaxed);
            (
                StatusCode::OK,
                Json(json!({
                    "ok": true,
                    "message_id": report.message_id,
                    "conversation_id": message.envelope.conversation_id,
                    "attempts": report.attempts,
                    "transitions": report
                        .transitions
                        .iter()
                        .map(|s| format!("{s:?}"))
                        .collect::<Vec<_>>(),
                })),
            )
        }
        Err(err) => {
            state.metrics.sends_failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(%message_id, error = %err, "outbound exchange failed");
            let status = match err {
                DeliveryError::Codec(_) => StatusCode::BAD_REQUEST,
                DeliveryError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_GATEWAY,
            };
            (
                status,
                Json(json!({"ok": false, "message_id": message_id, "error": err.to_string()})),
            )
        }
    }
}

async fn outbound_message(
    state: &GatewayState,
    request: &SendRequest,
    address: EndpointAddress,
) -> Result<OutboundMessage, DeliveryError> {
    let message_id = state.ids.generate_id().await?;
    let conversation_id = state.ids.generate_id().await?;
    let payload_id = ContentId::from_logical(format!("{message_id}@{}", state.party_id));

    let mut envelope = EbxmlEnvelope::builder()
        .from_party(&state.party_id)
        .to_party(&address.party_key)
        .cpa_id(&address.cpa_id)
        .conversation_id(conversation_id)
        .service(&request.service)
        .action(&request.action)
        .message_id(message_id)
        .duplicate_elimination(true)
        .ack_requested(true)
        .build()?;
    envelope.add_manifest_reference(payload_id.to_cid_href(), request.is_hl7, None)?;

    let content_type = request
        .content_type
        .clone()
        .unwrap_or_else(|| "application/xml".to_string());
    Ok(OutboundMessage {
        endpoint: address.endpoint_url,
        envelope,
        payloads: vec![Part::new(content_type, request.payload.clone()).with_content_id(payload_id)],
    })
}

async fn metrics(State(state): State<GatewayState>) -> impl IntoResponse {
    metrics_body(&state)
}

fn metrics_body(state: &GatewayState) -> String {
    let metrics = &state.metrics;
    let transport = state.transport.health_snapshot();
    format!(
        "courier_inbound_total {}\ncourier_inbound_faults_total {}\ncourier_inbound_malformed_total {}\ncourier_replies_correlated_total {}\ncourier_replies_uncorrelated_total {}\ncourier_acks_sent_total {}\ncourier_failures_notified_total {}\ncourier_published_total {}\ncourier_sends_ok_total {}\ncourier_sends_failed_total {}\ncourier_outbound_send_ok {}\ncourier_outbound_send_err {}\ncourier_ledger_delivered {}\ncourier_ledger_in_progress {}\n",
        metrics.inbound_total.load(Ordering::Relaxed),
        metrics.inbound_faults.load(Ordering::Relaxed),
        metrics.inbound_malformed.load(Ordering::Relaxed),
        metrics.replies_correlated.load(Ordering::Relaxed),
        metrics.replies_uncorrelated.load(Ordering::Relaxed),
        metrics.acks_sent.load(Ordering::Relaxed),
        metrics.failures_notified.load(Ordering::Relaxed),
        metrics.published.load(Ordering::Relaxed),
        metrics.sends_ok.load(Ordering::Relaxed),
        metrics.sends_failed.load(Ordering::Relaxed),
        transport.outbound_send_ok,
        transport.outbound_send_err,
        state.ledger.delivered_count(),
        state.ledger.in_progress_count(),
    )
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn deliveries(
    State(state): State<GatewayState>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<serde_json::Value>> {
    let limit = query.limit.unwrap_or(50).min(1000);
    Json(state.deliveries.recent(limit))
}

async fn logs(
    State(state): State<GatewayState>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(200).min(1000);
    Json(json!({"ok": true, "logs": state.log_buffer.recent(limit)}))
}
