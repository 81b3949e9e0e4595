//! Transport relay to the collector
//!
//! The watcher hands every batch to a [`Relay`]. [`CollectorRelay`] is the
//! gRPC implementation: one lazily opened channel reused for every call, a
//! bearer token attached by a client interceptor and optional TLS.

use async_trait::async_trait;
use sensorline_api::{
    BearerInterceptor, CollectorClient, IngestAck, IngestRequest, SchemaCache, SchemaDocument,
    SchemaRequest, SchemaSnapshot, encode_batch,
};
use sensorline_common::{Batch, RelaySettings};
use tokio::sync::OnceCell;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tracing::{debug, info};

use crate::error::RelayError;

/// Delivery of batches to the collector
#[async_trait]
pub trait Relay: Send + Sync {
    /// Send one batch; an `Ok` is a positive acknowledgment
    async fn deliver(&self, batch: &Batch) -> Result<IngestAck, RelayError>;

    /// Expected record shape, served from the local cache while fresh
    async fn fetch_schema(&self) -> Result<SchemaDocument, RelayError>;
}

type AuthedClient = CollectorClient<InterceptedService<Channel, BearerInterceptor>>;

pub struct CollectorRelay {
    settings: RelaySettings,
    interceptor: BearerInterceptor,
    channel: OnceCell<Channel>,
    schema_cache: SchemaCache,
}

impl CollectorRelay {
    pub fn new(settings: RelaySettings) -> Result<Self, RelayError> {
        let interceptor = BearerInterceptor::new(&settings.token)
            .map_err(|status| RelayError::Config(status.message().to_string()))?;
        let schema_cache =
            SchemaCache::new(settings.schema_cache_path.clone(), settings.schema_max_age);

        Ok(Self {
            settings,
            interceptor,
            channel: OnceCell::new(),
            schema_cache,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.settings.endpoint
    }

    async fn endpoint_config(&self) -> Result<Endpoint, RelayError> {
        let mut endpoint = Endpoint::from_shared(self.settings.endpoint.clone())
            .map_err(|e| RelayError::Config(format!("invalid collector endpoint: {}", e)))?
            .connect_timeout(self.settings.connect_timeout)
            .timeout(self.settings.request_timeout);

        if let Some(ca_path) = &self.settings.ca_cert_path {
            let pem = tokio::fs::read(ca_path).await.map_err(|e| {
                RelayError::Config(format!("cannot read CA certificate {}: {}", ca_path.display(), e))
            })?;
            let mut tls = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(pem));
            if let Some(domain) = &self.settings.domain_name {
                tls = tls.domain_name(domain.clone());
            }
            endpoint = endpoint
                .tls_config(tls)
                .map_err(|e| RelayError::Config(format!("invalid TLS configuration: {}", e)))?;
        }

        Ok(endpoint)
    }

    async fn client(&self) -> Result<AuthedClient, RelayError> {
        let channel = self
            .channel
            .get_or_try_init(|| async {
                let endpoint = self.endpoint_config().await?;
                let channel = endpoint.connect().await?;
                info!(endpoint = %self.settings.endpoint, "Connected to collector");
                Ok::<_, RelayError>(channel)
            })
            .await?;

        Ok(CollectorClient::with_interceptor(
            channel.clone(),
            self.interceptor.clone(),
        ))
    }
}

#[async_trait]
impl Relay for CollectorRelay {
    async fn deliver(&self, batch: &Batch) -> Result<IngestAck, RelayError> {
        let payload = encode_batch(batch)?;
        let mut client = self.client().await?;

        let ack = client
            .ingest(IngestRequest { payload })
            .await?
            .into_inner();
        debug!(
            readings = batch.len(),
            accepted = ack.accepted,
            rejected = ack.rejected,
            "Batch acknowledged"
        );
        Ok(ack)
    }

    async fn fetch_schema(&self) -> Result<SchemaDocument, RelayError> {
        let snapshot = self
            .schema_cache
            .get_or_refresh(|| async {
                let mut client = self.client().await?;
                let document = client.get_schema(SchemaRequest {}).await?.into_inner();
                Ok::<_, RelayError>(SchemaSnapshot::from(document))
            })
            .await?;
        Ok(snapshot.into())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use sensorline_common::Reading;

    use super::*;

    fn settings(endpoint: String, cache: PathBuf) -> RelaySettings {
        RelaySettings {
            endpoint,
            token: "secret".to_string(),
            connect_timeout: Duration::from_millis(500),
            request_timeout: Duration::from_secs(1),
            schema_cache_path: cache,
            schema_max_age: Duration::from_secs(60),
            ca_cert_path: None,
            domain_name: None,
        }
    }

    #[tokio::test]
    async fn test_unreachable_collector_is_transport_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let dir = tempfile::tempdir().unwrap();
        let relay = CollectorRelay::new(settings(
            format!("http://127.0.0.1:{}", port),
            dir.path().join("schema.json"),
        ))
        .unwrap();

        let batch: Batch = [Reading::default()].into_iter().collect();
        let err = relay.deliver(&batch).await.unwrap_err();
        assert!(err.is_retryable(), "{err}");
    }

    #[tokio::test]
    async fn test_invalid_endpoint_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let relay =
            CollectorRelay::new(settings("not a uri".to_string(), dir.path().join("s.json")))
                .unwrap();
        let err = relay.deliver(&Batch::new()).await.unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_fresh_local_schema_needs_no_collector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        let cache = SchemaCache::new(&path, Duration::from_secs(60));
        let snapshot = SchemaSnapshot::new(
            [("temperature".to_string(), "decimal".to_string())].into(),
        );
        cache.store(&snapshot).await.unwrap();

        let relay = CollectorRelay::new(settings("http://127.0.0.1:1".to_string(), path)).unwrap();
        let document = relay.fetch_schema().await.unwrap();
        assert_eq!(document.generated_at, snapshot.generated_at);
        assert_eq!(document.fields.get("temperature").map(String::as_str), Some("decimal"));
    }
}
