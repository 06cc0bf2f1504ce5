use std::sync::Arc;

use async_trait::async_trait;
use auth_core::{AuthClaims, TransportInfo};
use parking_lot::RwLock;
use tracing::warn;

use crate::authenticator::Authenticator;
use crate::error::AuthnResult;
use crate::options::AuthenticatorOptions;

/// Accepts every call with an empty claims bag. Disables authentication.
#[derive(Default)]
pub struct NoopAuthenticator {
    options: RwLock<Option<Arc<AuthenticatorOptions>>>,
}

impl NoopAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Authenticator for NoopAuthenticator {
    async fn init(&self, options: AuthenticatorOptions) -> AuthnResult<()> {
        warn!(provider = "noop", "Authentication is disabled");
        *self.options.write() = Some(Arc::new(options));
        Ok(())
    }

    async fn authenticate(&self, _info: &TransportInfo) -> AuthnResult<AuthClaims> {
        Ok(AuthClaims::new())
    }

    async fn validate_token(&self, _token: &str) -> AuthnResult<AuthClaims> {
        Ok(AuthClaims::new())
    }

    async fn create_token(&self, _claims: &AuthClaims) -> AuthnResult<String> {
        Ok(String::new())
    }

    async fn refresh_token(&self, _token: &str) -> AuthnResult<String> {
        Ok(String::new())
    }

    async fn revoke_token(&self, _token: &str) -> AuthnResult<bool> {
        Ok(true)
    }

    async fn close(&self) -> AuthnResult<()> {
        self.options.write().take();
        Ok(())
    }

    fn options(&self) -> Option<Arc<AuthenticatorOptions>> {
        self.options.read().clone()
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;

    #[tokio::test]
    async fn everything_succeeds() {
        let authn = NoopAuthenticator::new();
        let claims = authn
            .authenticate(&TransportInfo::http("GET", "/", HeaderMap::new()))
            .await
            .unwrap();
        assert_eq!(claims, AuthClaims::new());
        assert_eq!(authn.create_token(&claims).await.unwrap(), "");
        assert!(authn.revoke_token("anything").await.unwrap());
        assert!(authn.options().is_none());

        authn.init(AuthenticatorOptions::default()).await.unwrap();
        assert!(authn.options().is_some());
        authn.close().await.unwrap();
        assert!(authn.validate_token("x").await.is_ok());
    }
}
