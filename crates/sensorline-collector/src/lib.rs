//! Sensorline Collector - receives batches over gRPC and persists readings
//!
//! This crate provides:
//! - The `Collector` gRPC service (ingest and schema document)
//! - Constant-time bearer token authentication
//! - Server TLS and startup with graceful shutdown

pub mod auth;
pub mod error;
pub mod service;
pub mod startup;
pub mod tls;

pub use auth::{AuthInterceptor, TokenVerifier};
pub use error::CollectorError;
pub use service::{CollectorService, reading_schema};
pub use startup::CollectorApp;
