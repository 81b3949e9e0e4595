//! TLS identity of the collector server

use std::path::Path;

use sensorline_common::ServerTlsSettings;
use tonic::transport::{Certificate, Identity, ServerTlsConfig};

use crate::error::CollectorError;

async fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>, CollectorError> {
    tokio::fs::read(path).await.map_err(|e| {
        CollectorError::Tls(format!("cannot read {} {}: {}", what, path.display(), e))
    })
}

/// Server TLS configuration, or `None` when TLS is disabled.
///
/// A configured CA certificate turns on client certificate verification.
pub async fn server_tls_config(
    settings: &ServerTlsSettings,
) -> Result<Option<ServerTlsConfig>, CollectorError> {
    if !settings.enabled {
        return Ok(None);
    }

    let (Some(cert_path), Some(key_path)) = (&settings.cert_path, &settings.key_path) else {
        return Err(CollectorError::Tls(
            "TLS is enabled but cert_path or key_path is not configured".to_string(),
        ));
    };

    let cert = read_pem(cert_path, "certificate").await?;
    let key = read_pem(key_path, "private key").await?;
    let mut tls_config = ServerTlsConfig::new().identity(Identity::from_pem(cert, key));

    if let Some(ca_path) = &settings.ca_cert_path {
        let ca = read_pem(ca_path, "CA certificate").await?;
        tls_config = tls_config.client_ca_root(Certificate::from_pem(ca));
    }

    Ok(Some(tls_config))
}
