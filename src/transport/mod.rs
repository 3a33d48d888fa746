// src/transport/mod.rs
//
// Delivery of one `Batch` to the remote collector.
//
// Two implementations exist, JSON over HTTP and protobuf over gRPC. The
// agent binds exactly one of them at start-up.

use std::fmt;

use async_trait::async_trait;

use crate::metrics::Batch;

#[cfg(feature = "grpc")]
mod grpc;
mod http;
#[cfg(feature = "grpc")]
pub mod proto;

#[cfg(feature = "grpc")]
pub use grpc::{to_request, GrpcTransport};
pub use http::{encode_json, HttpTransport, JSON_UTF8, UPDATES_PATH};

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryError {
    /// The batch could not be serialized for the wire.
    Encode(String),
    /// Network or transport level failure, including timeouts.
    Request(String),
    /// The collector answered with something other than 200.
    Status(u16),
    /// The remote call failed.
    Rpc(String),
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Encode(reason) => write!(f, "failed to encode batch: {}", reason),
            DeliveryError::Request(reason) => write!(f, "request failed: {}", reason),
            DeliveryError::Status(code) => write!(f, "collector responded with status {}", code),
            DeliveryError::Rpc(reason) => write!(f, "remote call failed: {}", reason),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Failure to construct a transport from its settings.
#[derive(Debug)]
pub enum SetupError {
    Client(String),
    Endpoint(String),
    Unsupported(&'static str),
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::Client(reason) => write!(f, "unable to build client: {}", reason),
            SetupError::Endpoint(reason) => write!(f, "invalid collector address: {}", reason),
            SetupError::Unsupported(kind) => {
                write!(f, "{} transport is not compiled into this build", kind)
            }
        }
    }
}

impl std::error::Error for SetupError {}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Short label used in log lines.
    fn name(&self) -> &'static str;

    /// Performs one delivery. Implementations never retry.
    async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError>;
}
