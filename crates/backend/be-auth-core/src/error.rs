use std::fmt;

use auth_core::LifecycleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthnErrorCode {
    MissingToken,
    InvalidToken,
    ExpiredToken,
    NotBeforeTime,
    InvalidSignature,
    InvalidClaims,
    RevokedToken,
    UnsupportedSigningMethod,
    SignTokenFailed,
    InvalidOptions,
    NotInitialized,
    Closed,
    UnsupportedOperation,
    ProviderUnavailable,
    Timeout,
    Internal,
}

impl AuthnErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::InvalidToken => "invalid_token",
            Self::ExpiredToken => "expired_token",
            Self::NotBeforeTime => "not_before_time",
            Self::InvalidSignature => "invalid_signature",
            Self::InvalidClaims => "invalid_claims",
            Self::RevokedToken => "revoked_token",
            Self::UnsupportedSigningMethod => "unsupported_signing_method",
            Self::SignTokenFailed => "sign_token_failed",
            Self::InvalidOptions => "invalid_options",
            Self::NotInitialized => "not_initialized",
            Self::Closed => "closed",
            Self::UnsupportedOperation => "unsupported_operation",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        }
    }

    /// Codes that mean "the presented credential is bad" rather than "we failed".
    pub fn is_credential_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidToken
                | Self::InvalidSignature
                | Self::InvalidClaims
                | Self::RevokedToken
                | Self::NotBeforeTime
        )
    }
}

impl fmt::Display for AuthnErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct AuthnError {
    pub code: AuthnErrorCode,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AuthnError {
    pub fn new(code: AuthnErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> AuthnErrorCode {
        self.code
    }

    pub fn is(&self, code: AuthnErrorCode) -> bool {
        self.code == code
    }

    pub fn missing_token() -> Self {
        Self::new(AuthnErrorCode::MissingToken, "missing token")
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::new(AuthnErrorCode::InvalidToken, message)
    }

    pub fn expired_token() -> Self {
        Self::new(AuthnErrorCode::ExpiredToken, "token has expired")
    }

    pub fn not_before() -> Self {
        Self::new(AuthnErrorCode::NotBeforeTime, "token is not valid yet")
    }

    pub fn invalid_signature() -> Self {
        Self::new(AuthnErrorCode::InvalidSignature, "token signature is invalid")
    }

    pub fn invalid_claims(message: impl Into<String>) -> Self {
        Self::new(AuthnErrorCode::InvalidClaims, message)
    }

    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self::new(AuthnErrorCode::InvalidOptions, message)
    }

    pub fn unsupported(provider: &str, operation: &str) -> Self {
        Self::new(
            AuthnErrorCode::UnsupportedOperation,
            format!("{operation} is not supported by the {provider} authenticator"),
        )
    }

    pub fn provider_unavailable(message: impl Into<String>) -> Self {
        Self::new(AuthnErrorCode::ProviderUnavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AuthnErrorCode::Internal, message)
    }

    pub(crate) fn lifecycle(provider: &str, err: LifecycleError) -> Self {
        let code = match err {
            LifecycleError::NotInitialized => AuthnErrorCode::NotInitialized,
            LifecycleError::Closed => AuthnErrorCode::Closed,
        };
        Self::new(code, format!("{provider} authenticator: {err}"))
    }

    pub(crate) fn from_http(err: reqwest::Error) -> Self {
        let code = if err.is_timeout() {
            AuthnErrorCode::Timeout
        } else {
            AuthnErrorCode::ProviderUnavailable
        };
        Self::new(code, format!("identity provider request failed: {err}")).with_source(err)
    }
}

pub type AuthnResult<T> = std::result::Result<T, AuthnError>;
