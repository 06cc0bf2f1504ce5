use std::sync::Arc;

use async_trait::async_trait;
use auth_core::{AuthClaims, TransportInfo};

use crate::error::AuthnResult;
use crate::options::AuthenticatorOptions;

/// A credential verifier/issuer.
///
/// Implementations start uninitialized; every token operation before
/// [`Authenticator::init`] or after [`Authenticator::close`] fails with
/// `NotInitialized` or `Closed`.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Validates the options and loads key material. Calling it again on an
    /// initialized provider replaces its configuration.
    async fn init(&self, options: AuthenticatorOptions) -> AuthnResult<()>;

    /// Extracts the credential from the call and validates it.
    async fn authenticate(&self, info: &TransportInfo) -> AuthnResult<AuthClaims>;

    async fn validate_token(&self, token: &str) -> AuthnResult<AuthClaims>;

    /// Mints a token for `claims`. Fields the caller already set are kept;
    /// providers fill in the rest from their options.
    async fn create_token(&self, claims: &AuthClaims) -> AuthnResult<String>;

    async fn refresh_token(&self, token: &str) -> AuthnResult<String>;

    async fn revoke_token(&self, token: &str) -> AuthnResult<bool>;

    async fn close(&self) -> AuthnResult<()>;

    fn options(&self) -> Option<Arc<AuthenticatorOptions>>;

    fn name(&self) -> &'static str;
}
