// src/transport/proto.rs
//
// Messages and client stub for the collector's `metric.Metric` service.
//
// ```proto
// syntax = "proto3";
// package metric;
//
// import "google/protobuf/wrappers.proto";
//
// message CollectMetricRequest {
//   string name = 1;
//   string type = 2;
//   google.protobuf.Int64Value delta = 3;
//   google.protobuf.DoubleValue value = 4;
// }
// message BatchCollectMetricRequest { repeated CollectMetricRequest metrics = 1; }
// message BatchCollectMetricResponse {}
//
// service Metric {
//   rpc BatchCollect(BatchCollectMetricRequest) returns (BatchCollectMetricResponse);
// }
// ```

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CollectMetricRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub r#type: ::prost::alloc::string::String,
    /// Wrapped so an explicit zero differs from "unset".
    #[prost(message, optional, tag = "3")]
    pub delta: ::core::option::Option<i64>,
    #[prost(message, optional, tag = "4")]
    pub value: ::core::option::Option<f64>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BatchCollectMetricRequest {
    #[prost(message, repeated, tag = "1")]
    pub metrics: ::prost::alloc::vec::Vec<CollectMetricRequest>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BatchCollectMetricResponse {}

/// Client for the `metric.Metric` service.
pub mod metric_client {
    #![allow(unused_variables, dead_code, missing_docs)]
    use tonic::codegen::*;
    use tonic::transport::Channel;

    #[derive(Debug, Clone)]
    pub struct MetricClient {
        inner: tonic::client::Grpc<Channel>,
    }
    impl MetricClient {
        pub fn new(channel: Channel) -> Self {
            let inner = tonic::client::Grpc::new(channel);
            Self { inner }
        }
        pub async fn batch_collect(
            &mut self,
            request: impl tonic::IntoRequest<super::BatchCollectMetricRequest>,
        ) -> std::result::Result<tonic::Response<super::BatchCollectMetricResponse>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/metric.Metric/BatchCollect");
            self.inner.unary(request.into_request(), path, codec).await
        }
    }
}
