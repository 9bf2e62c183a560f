use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::adapter::{HealthCounters, Transport, TransportHealthSnapshot, TransportResponse};
use crate::error::TransportError;

const SOAP_ACTION_HEADER: &str = "SOAPAction";
const SOAP_ACTION_EBXML: &str = "\"ebXML\"";

/// HTTP POST transport backed by a shared `reqwest` client.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    health: HealthCounters,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| TransportError::Http {
                endpoint: String::new(),
                reason: format!("client setup failed: {e}"),
            })?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            health: HealthCounters::default(),
        }
    }

    async fn exchange(
        &self,
        endpoint: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .post(endpoint)
            .header(CONTENT_TYPE, content_type)
            .header(SOAP_ACTION_HEADER, SOAP_ACTION_EBXML)
            .body(body)
            .send()
            .await
            .map_err(|e| classify(endpoint, e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| TransportError::Http {
            endpoint: endpoint.to_string(),
            reason: format!("reading response body: {e}"),
        })?;
        debug!(endpoint, status, "http exchange completed");
        Ok(TransportResponse { status, body })
    }
}

fn classify(endpoint: &str, err: reqwest::Error) -> TransportError {
    if err.is_connect() || err.is_timeout() {
        TransportError::Connection {
            endpoint: endpoint.to_string(),
            reason: err.to_string(),
        }
    } else {
        TransportError::Http {
            endpoint: endpoint.to_string(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(
        &self,
        endpoint: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<TransportResponse, TransportError> {
        let result = self.exchange(endpoint, content_type, body).await;
        self.health.record(&result);
        result
    }

    fn health_snapshot(&self) -> TransportHealthSnapshot {
        self.health.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::HttpTransport;
    use crate::adapter::Transport;
    use crate::error::TransportError;

    #[tokio::test]
    async fn unreachable_endpoint_is_a_connection_error() {
        let transport = HttpTransport::new(Duration::from_secs(2)).expect("client builds");
        let err = transport
            .post("http://127.0.0.1:9/ebxml", "text/xml", Bytes::from_static(b"<x/>"))
            .await
            .expect_err("nothing listens on the discard port");

        assert!(matches!(err, TransportError::Connection { .. }));
        assert_eq!(transport.health_snapshot().outbound_send_err, 1);
    }
}
