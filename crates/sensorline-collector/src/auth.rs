//! Bearer token authentication
//!
//! The presented token is never compared directly: both sides are reduced to
//! fixed-length HMAC-SHA256 tags and compared in constant time. The token is
//! never logged.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use sensorline_api::bearer_token;
use sha2::Sha256;
use tonic::service::Interceptor;
use tonic::{Request, Status};
use tracing::warn;

use crate::error::CollectorError;

type HmacSha256 = Hmac<Sha256>;

const TAG_KEY: &[u8] = b"sensorline.collector.bearer";

fn tag(token: &[u8]) -> Result<HmacSha256, CollectorError> {
    let mut mac = HmacSha256::new_from_slice(TAG_KEY)
        .map_err(|_| CollectorError::Config("failed to initialize HMAC".to_string()))?;
    mac.update(token);
    Ok(mac)
}

/// Verifies presented bearer tokens against the configured one
pub struct TokenVerifier {
    expected: Vec<u8>,
}

impl TokenVerifier {
    pub fn new(token: &str) -> Result<Self, CollectorError> {
        if token.trim().is_empty() {
            return Err(CollectorError::Config(
                "collector.token must not be empty".to_string(),
            ));
        }
        let expected = tag(token.as_bytes())?.finalize().into_bytes().to_vec();
        Ok(Self { expected })
    }

    pub fn verify(&self, presented: &str) -> bool {
        match tag(presented.as_bytes()) {
            Ok(mac) => mac.verify_slice(&self.expected).is_ok(),
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenVerifier(<redacted>)")
    }
}

/// Server interceptor rejecting calls without a valid bearer token before
/// the request body is decoded
#[derive(Clone, Debug)]
pub struct AuthInterceptor {
    verifier: Arc<TokenVerifier>,
}

impl AuthInterceptor {
    pub fn new(verifier: TokenVerifier) -> Self {
        Self {
            verifier: Arc::new(verifier),
        }
    }
}

impl Interceptor for AuthInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        let authorized = bearer_token(request.metadata())
            .is_some_and(|token| self.verifier.verify(token));
        if authorized {
            return Ok(request);
        }

        warn!(
            remote = ?request.remote_addr(),
            "Rejected call without valid bearer token"
        );
        Err(Status::unauthenticated("missing or invalid bearer token"))
    }
}

#[cfg(test)]
mod tests {
    use sensorline_api::{AUTHORIZATION_HEADER, BearerInterceptor};

    use super::*;

    #[test]
    fn test_verify() {
        let verifier = TokenVerifier::new("s3cret").unwrap();
        assert!(verifier.verify("s3cret"));
        assert!(!verifier.verify("s3cre"));
        assert!(!verifier.verify("s3cret "));
        assert!(!verifier.verify(""));
    }

    #[test]
    fn test_empty_token_refused() {
        assert!(TokenVerifier::new("  ").is_err());
    }

    #[test]
    fn test_debug_redacts() {
        let interceptor = AuthInterceptor::new(TokenVerifier::new("s3cret").unwrap());
        assert!(!format!("{:?}", interceptor).contains("s3cret"));
    }

    #[test]
    fn test_interceptor_accepts_client_header() {
        let mut client = BearerInterceptor::new("s3cret").unwrap();
        let request = client.call(Request::new(())).unwrap();

        let mut server = AuthInterceptor::new(TokenVerifier::new("s3cret").unwrap());
        assert!(server.call(request).is_ok());
    }

    #[test]
    fn test_interceptor_rejects() {
        let mut server = AuthInterceptor::new(TokenVerifier::new("s3cret").unwrap());

        let status = server.call(Request::new(())).unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);

        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert(AUTHORIZATION_HEADER, "Bearer wrong".parse().unwrap());
        let status = server.call(request).unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
        assert!(!status.message().contains("wrong"));
    }
}
