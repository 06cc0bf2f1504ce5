use axum::Json;
use axum::response::{IntoResponse, Response};
use be_auth_core::{AuthnError, AuthnErrorCode};
use be_authz::{AuthzError, AuthzErrorCode};
use http::StatusCode;
use serde_json::json;
use tonic::Status;

use crate::pipeline::PipelineMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Unauthenticated,
    Forbidden,
}

/// Why a request was turned away. The message is the only detail that
/// reaches the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AuthFailure {
    pub kind: FailureKind,
    pub message: &'static str,
}

impl AuthFailure {
    pub const fn unauthenticated(message: &'static str) -> Self {
        Self {
            kind: FailureKind::Unauthenticated,
            message,
        }
    }

    pub const fn forbidden(message: &'static str) -> Self {
        Self {
            kind: FailureKind::Forbidden,
            message,
        }
    }

    pub fn from_authn(err: &AuthnError) -> Self {
        match err.code() {
            AuthnErrorCode::MissingToken => Self::unauthenticated("missing token"),
            AuthnErrorCode::ExpiredToken => Self::unauthenticated("token has expired"),
            AuthnErrorCode::InvalidToken
            | AuthnErrorCode::InvalidSignature
            | AuthnErrorCode::InvalidClaims => Self::unauthenticated("invalid token"),
            _ => Self::unauthenticated("unauthorized"),
        }
    }

    pub fn from_authz(err: &AuthzError) -> Self {
        match err.code() {
            AuthzErrorCode::PermissionDenied => Self::forbidden("permission denied"),
            _ => Self::forbidden("forbidden"),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind {
            FailureKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            FailureKind::Forbidden => StatusCode::FORBIDDEN,
        }
    }
}

impl From<AuthFailure> for Status {
    fn from(failure: AuthFailure) -> Self {
        match failure.kind {
            FailureKind::Unauthenticated => Status::unauthenticated(failure.message),
            FailureKind::Forbidden => Status::permission_denied(failure.message),
        }
    }
}

impl IntoResponse for AuthFailure {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.message }))).into_response()
    }
}

/// Rejected pipeline configuration.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{0:?} mode needs an authenticator")]
    MissingAuthenticator(PipelineMode),

    #[error("{0:?} mode needs an authorizer")]
    MissingAuthorizer(PipelineMode),

    #[error("invalid token lookup: {0}")]
    TokenLookup(#[from] AuthnError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_authn_codes() {
        let cases = [
            (AuthnError::missing_token(), "missing token"),
            (AuthnError::expired_token(), "token has expired"),
            (AuthnError::invalid_token("bad"), "invalid token"),
            (AuthnError::invalid_signature(), "invalid token"),
            (AuthnError::invalid_claims("aud"), "invalid token"),
            (AuthnError::not_before(), "unauthorized"),
            (AuthnError::internal("boom"), "unauthorized"),
        ];
        for (err, message) in cases {
            let failure = AuthFailure::from_authn(&err);
            assert_eq!(failure.message, message);
            assert_eq!(failure.status_code(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn maps_authz_codes() {
        let denied = AuthzError::permission_denied(auth_core::AuthzTuple::new("a", "b", "c", "d"));
        assert_eq!(AuthFailure::from_authz(&denied).message, "permission denied");
        let failure = AuthFailure::from_authz(&AuthzError::engine("broken"));
        assert_eq!(failure.message, "forbidden");
        assert_eq!(failure.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn converts_to_grpc_status() {
        let status: Status = AuthFailure::unauthenticated("missing token").into();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
        assert_eq!(status.message(), "missing token");
        let status: Status = AuthFailure::forbidden("permission denied").into();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);
    }
}
