use std::time::Duration;

use async_trait::async_trait;
use log::trace;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use serde::Serialize;

use super::{DeliveryError, SetupError, Transport};
use crate::metrics::{Batch, MetricKind};

pub const UPDATES_PATH: &str = "/v0.1/updates";
pub const JSON_UTF8: &str = "application/json; charset=utf-8";

#[derive(Serialize)]
struct JsonMetric<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: MetricKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    delta: Option<i64>,
}

/// Serializes a batch as the JSON array the collector's update endpoint takes.
pub fn encode_json(batch: &Batch) -> Result<Vec<u8>, DeliveryError> {
    let mut metrics = Vec::with_capacity(batch.len());
    for record in batch {
        if let Some(value) = record.value() {
            if !value.is_finite() {
                return Err(DeliveryError::Encode(format!(
                    "gauge {} has non-finite value {}",
                    record.name(),
                    value
                )));
            }
        }
        metrics.push(JsonMetric {
            id: record.name(),
            kind: record.kind(),
            value: record.value(),
            delta: record.delta(),
        });
    }
    serde_json::to_vec(&metrics).map_err(|err| DeliveryError::Encode(err.to_string()))
}

/// JSON over HTTP: one `POST {address}/v0.1/updates` per batch.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    user_agent: String,
}

impl HttpTransport {
    pub fn new(address: &str, user_agent: String, timeout: Duration) -> Result<Self, SetupError> {
        let address = address.trim_end_matches('/');
        if address.is_empty() {
            return Err(SetupError::Endpoint("empty address".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SetupError::Client(e.to_string()))?;

        Ok(HttpTransport {
            client,
            endpoint: format!("{}{}", address, UPDATES_PATH),
            user_agent,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
        let body = encode_json(batch)?;
        let length = body.len();

        let response = self
            .client
            .post(&self.endpoint)
            .header(USER_AGENT, &self.user_agent)
            .header(CONTENT_TYPE, JSON_UTF8)
            .header(ACCEPT, JSON_UTF8)
            .header(CONTENT_LENGTH, length)
            .body(body)
            .send()
            .await
            .map_err(|e| DeliveryError::Request(e.to_string()))?;

        let status = response.status();
        trace!("POST {} ({} bytes) -> {}", self.endpoint, length, status);
        if status != StatusCode::OK {
            return Err(DeliveryError::Status(status.as_u16()));
        }
        Ok(())
    }
}
