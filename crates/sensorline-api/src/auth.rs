//! Bearer token metadata shared by client and server

use tonic::metadata::{Ascii, MetadataMap, MetadataValue};
use tonic::service::Interceptor;
use tonic::{Request, Status};

pub const AUTHORIZATION_HEADER: &str = "authorization";
pub const BEARER_PREFIX: &str = "Bearer ";

/// Extract the bearer token from request metadata
pub fn bearer_token(metadata: &MetadataMap) -> Option<&str> {
    metadata
        .get(AUTHORIZATION_HEADER)?
        .to_str()
        .ok()?
        .strip_prefix(BEARER_PREFIX)
}

/// Client interceptor attaching `authorization: Bearer <token>` to every call
#[derive(Clone)]
pub struct BearerInterceptor {
    value: MetadataValue<Ascii>,
}

impl BearerInterceptor {
    pub fn new(token: &str) -> Result<Self, Status> {
        let value = format!("{}{}", BEARER_PREFIX, token)
            .parse::<MetadataValue<Ascii>>()
            .map_err(|_| Status::invalid_argument("bearer token is not valid metadata"))?;
        Ok(Self { value })
    }
}

impl std::fmt::Debug for BearerInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerInterceptor(<redacted>)")
    }
}

impl Interceptor for BearerInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        request
            .metadata_mut()
            .insert(AUTHORIZATION_HEADER, self.value.clone());
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interceptor_sets_header() {
        let mut interceptor = BearerInterceptor::new("abc123").unwrap();
        let request = interceptor.call(Request::new(())).unwrap();
        assert_eq!(bearer_token(request.metadata()), Some("abc123"));
    }

    #[test]
    fn test_bearer_token_requires_prefix() {
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert(AUTHORIZATION_HEADER, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(request.metadata()), None);
        assert_eq!(bearer_token(&MetadataMap::new()), None);
    }

    #[test]
    fn test_invalid_token_rejected() {
        assert!(BearerInterceptor::new("line\nbreak").is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let interceptor = BearerInterceptor::new("topsecret").unwrap();
        assert!(!format!("{:?}", interceptor).contains("topsecret"));
    }
}
