//! Collector server setup
//!
//! The gRPC server is wrapped in two layers: bearer authentication first, then
//! a server-wide concurrency limit. On shutdown in-flight calls are drained
//! before the database is closed.

use std::sync::Arc;

use sensorline_api::{CollectorServer, SchemaCache};
use sensorline_common::{CollectorSettings, ShutdownSignal};
use sensorline_persistence::{DatabaseDriver, PersistenceEngine};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::service::InterceptorLayer;
use tonic::transport::Server;
use tower::ServiceBuilder;
use tower::limit::GlobalConcurrencyLimitLayer;
use tracing::{info, warn};

use crate::auth::{AuthInterceptor, TokenVerifier};
use crate::error::CollectorError;
use crate::service::CollectorService;
use crate::tls::server_tls_config;

pub struct CollectorApp {
    settings: CollectorSettings,
    engine: Arc<PersistenceEngine>,
    schema_cache: Arc<SchemaCache>,
    interceptor: AuthInterceptor,
}

impl CollectorApp {
    pub fn new(
        settings: CollectorSettings,
        driver: Arc<dyn DatabaseDriver>,
    ) -> Result<Self, CollectorError> {
        let interceptor = AuthInterceptor::new(TokenVerifier::new(&settings.token)?);
        let schema_cache = Arc::new(SchemaCache::new(
            settings.schema_cache_path.clone(),
            settings.schema_max_age,
        ));

        Ok(Self {
            engine: Arc::new(PersistenceEngine::new(driver)),
            schema_cache,
            interceptor,
            settings,
        })
    }

    pub fn engine(&self) -> &Arc<PersistenceEngine> {
        &self.engine
    }

    /// Bind the configured address and serve until `shutdown`
    pub async fn serve(self, shutdown: ShutdownSignal) -> Result<(), CollectorError> {
        let address = self.settings.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| CollectorError::Address {
                address: address.clone(),
                reason: e.to_string(),
            })?;
        self.serve_with_listener(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown`
    pub async fn serve_with_listener(
        self,
        listener: TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<(), CollectorError> {
        let tls = server_tls_config(&self.settings.tls).await?;
        let local_addr = listener.local_addr()?;
        info!(
            address = %local_addr,
            tls = tls.is_some(),
            max_concurrent_calls = self.settings.max_concurrent_calls,
            backend = %self.engine.backend(),
            "Starting collector gRPC server"
        );

        let layer = ServiceBuilder::new()
            .layer(InterceptorLayer::new(self.interceptor.clone()))
            .layer(GlobalConcurrencyLimitLayer::new(
                self.settings.max_concurrent_calls,
            ))
            .into_inner();

        let service = CollectorService::new(self.engine.clone(), self.schema_cache.clone());

        let mut builder = Server::builder();
        if let Some(tls) = tls {
            builder = builder.tls_config(tls)?;
        }

        let result = builder
            .layer(layer)
            .add_service(CollectorServer::new(service))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                shutdown.wait().await;
                info!("Collector shutting down, draining in-flight calls");
            })
            .await;

        if let Err(e) = self.engine.close().await {
            warn!(error = %e, "Failed to close database");
        }
        info!("Collector stopped");

        result.map_err(CollectorError::from)
    }
}
