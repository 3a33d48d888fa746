use std::time::Duration;

use async_trait::async_trait;
use log::trace;
use tonic::transport::Endpoint;

use super::proto::metric_client::MetricClient;
use super::proto::{BatchCollectMetricRequest, CollectMetricRequest};
use super::{DeliveryError, SetupError, Transport};
use crate::metrics::Batch;

/// Maps a batch onto the wire request, keeping absent payloads absent.
pub fn to_request(batch: &Batch) -> BatchCollectMetricRequest {
    BatchCollectMetricRequest {
        metrics: batch
            .records()
            .iter()
            .map(|record| CollectMetricRequest {
                name: record.name().to_string(),
                r#type: record.kind().as_str().to_string(),
                delta: record.delta(),
                value: record.value(),
            })
            .collect(),
    }
}

/// Protobuf over gRPC: one `BatchCollect` call per batch.
pub struct GrpcTransport {
    client: MetricClient,
}

impl GrpcTransport {
    /// Builds a lazily connecting channel; must be called inside a tokio
    /// runtime.
    pub fn new(address: &str, timeout: Duration) -> Result<Self, SetupError> {
        let endpoint = Endpoint::from_shared(address.to_string())
            .map_err(|e| SetupError::Endpoint(e.to_string()))?
            .timeout(timeout)
            .connect_timeout(timeout);

        Ok(GrpcTransport {
            client: MetricClient::new(endpoint.connect_lazy()),
        })
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    fn name(&self) -> &'static str {
        "grpc"
    }

    async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
        let request = to_request(batch);
        // channel clones are cheap and share the connection
        let mut client = self.client.clone();
        client
            .batch_collect(request)
            .await
            .map_err(|status| DeliveryError::Rpc(status.to_string()))?;
        trace!("BatchCollect accepted poll {}", batch.poll());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricRecord;
    use chrono::Utc;
    use prost::Message;

    #[test]
    fn counter_maps_to_wrapped_delta() {
        let batch = Batch::new(5, Utc::now(), vec![MetricRecord::counter("PollCount", 5)]);
        let request = to_request(&batch);

        assert_eq!(request.metrics.len(), 1);
        let wire = &request.metrics[0];
        assert_eq!(wire.name, "PollCount");
        assert_eq!(wire.r#type, "counter");
        assert_eq!(wire.delta, Some(5));
        assert_eq!(wire.value, None);
    }

    #[test]
    fn explicit_zero_survives_encoding() {
        let batch = Batch::new(
            1,
            Utc::now(),
            vec![
                MetricRecord::gauge("Frees", 0.0),
                MetricRecord::counter("PollCount", 1),
            ],
        );
        let bytes = to_request(&batch).encode_to_vec();
        let decoded = BatchCollectMetricRequest::decode(bytes.as_slice()).unwrap();

        assert_eq!(decoded.metrics[0].value, Some(0.0));
        assert_eq!(decoded.metrics[0].delta, None);
        assert_eq!(decoded.metrics[1].delta, Some(1));
        assert_eq!(decoded.metrics[1].value, None);
    }

    #[test]
    fn malformed_address_is_rejected() {
        let result = GrpcTransport::new("not a uri", Duration::from_secs(1));
        assert!(matches!(result, Err(SetupError::Endpoint(_))));
    }

    #[tokio::test]
    async fn unreachable_collector_is_an_rpc_error() {
        let transport = GrpcTransport::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let batch = Batch::new(1, Utc::now(), vec![MetricRecord::counter("PollCount", 1)]);
        let result = transport.deliver(&batch).await;
        assert!(matches!(result, Err(DeliveryError::Rpc(_))));
    }
}
