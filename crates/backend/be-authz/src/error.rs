use std::fmt;

use auth_core::{AuthzTuple, LifecycleError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthzErrorCode {
    PermissionDenied,
    InvalidRequest,
    InvalidPolicy,
    UnsupportedOperation,
    InvalidOptions,
    NotInitialized,
    Closed,
    Engine,
    RemoteCall,
    Timeout,
    Internal,
}

impl AuthzErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::InvalidRequest => "invalid_request",
            Self::InvalidPolicy => "invalid_policy",
            Self::UnsupportedOperation => "unsupported_operation",
            Self::InvalidOptions => "invalid_options",
            Self::NotInitialized => "not_initialized",
            Self::Closed => "closed",
            Self::Engine => "engine",
            Self::RemoteCall => "remote_call",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for AuthzErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct AuthzError {
    pub code: AuthzErrorCode,
    pub message: String,
    /// The request that was denied, for `PermissionDenied`.
    pub tuple: Option<AuthzTuple>,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AuthzError {
    pub fn new(code: AuthzErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            tuple: None,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> AuthzErrorCode {
        self.code
    }

    pub fn is(&self, code: AuthzErrorCode) -> bool {
        self.code == code
    }

    pub fn permission_denied(tuple: AuthzTuple) -> Self {
        Self {
            message: format!("permission denied for {tuple}"),
            tuple: Some(tuple),
            ..Self::new(AuthzErrorCode::PermissionDenied, "")
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(AuthzErrorCode::InvalidRequest, message)
    }

    pub fn invalid_policy(message: impl Into<String>) -> Self {
        Self::new(AuthzErrorCode::InvalidPolicy, message)
    }

    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self::new(AuthzErrorCode::InvalidOptions, message)
    }

    pub fn unsupported(provider: &str, operation: &str) -> Self {
        Self::new(
            AuthzErrorCode::UnsupportedOperation,
            format!("{operation} is not supported by the {provider} authorizer"),
        )
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self::new(AuthzErrorCode::Engine, message)
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::new(AuthzErrorCode::RemoteCall, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AuthzErrorCode::Internal, message)
    }

    pub(crate) fn lifecycle(provider: &str, err: LifecycleError) -> Self {
        let code = match err {
            LifecycleError::NotInitialized => AuthzErrorCode::NotInitialized,
            LifecycleError::Closed => AuthzErrorCode::Closed,
        };
        Self::new(code, format!("{provider} authorizer: {err}"))
    }

    pub(crate) fn from_casbin(err: casbin::Error) -> Self {
        Self::engine(format!("casbin: {err}")).with_source(err)
    }

    pub(crate) fn from_http(err: reqwest::Error) -> Self {
        let code = if err.is_timeout() {
            AuthzErrorCode::Timeout
        } else {
            AuthzErrorCode::RemoteCall
        };
        Self::new(code, format!("policy service request failed: {err}")).with_source(err)
    }
}

pub type AuthzResult<T> = std::result::Result<T, AuthzError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_carries_the_tuple() {
        let err = AuthzError::permission_denied(AuthzTuple::new("alice", "/docs", "GET", "t1"));
        assert!(err.is(AuthzErrorCode::PermissionDenied));
        assert_eq!(err.tuple.as_ref().map(|t| t.subject.as_str()), Some("alice"));
        assert_eq!(
            err.to_string(),
            "permission_denied: permission denied for (alice, /docs, GET, t1)"
        );
    }

    #[test]
    fn lifecycle_mapping() {
        assert_eq!(
            AuthzError::lifecycle("casbin", LifecycleError::Closed).code(),
            AuthzErrorCode::Closed
        );
    }
}
