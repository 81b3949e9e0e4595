//! Sensorline API - wire definitions shared by the watcher and the collector
//!
//! This crate provides:
//! - Generated gRPC types for the `sensorline.collector.v1.Collector` service
//! - The JSON payload codec for batches
//! - Bearer token metadata helpers
//! - The on-disk schema document cache

pub mod auth;
pub mod payload;
pub mod schema;

/// Generated protobuf messages, server trait and client
pub mod collector {
    tonic::include_proto!("sensorline.collector.v1");
}

pub use auth::{AUTHORIZATION_HEADER, BEARER_PREFIX, BearerInterceptor, bearer_token};
pub use collector::collector_client::CollectorClient;
pub use collector::collector_server::{Collector, CollectorServer};
pub use collector::{IngestAck, IngestRequest, SchemaDocument, SchemaRequest};
pub use payload::{PayloadError, decode_batch, encode_batch};
pub use schema::{SchemaCache, SchemaCacheError, SchemaSnapshot};
