//! Request-level authentication and authorization.
//!
//! An [`AuthPipeline`] extracts the credential, validates it, builds the
//! [`auth_core::SecurityUser`] and enforces the derived tuple. [`GrpcAuthLayer`]
//! runs it in front of tonic services and [`auth_middleware`] in front of axum
//! routes; both attach an [`auth_core::AuthContext`] to the request on success.

mod axum_layer;
mod error;
mod grpc_layer;
mod pipeline;
mod skip;

pub use axum_layer::{Authenticated, auth_middleware};
pub use error::{AuthFailure, FailureKind, PipelineError};
pub use grpc_layer::{
    GrpcAuthLayer, GrpcAuthService, auth_context, claims_from_request, parse_grpc_timeout,
};
pub use pipeline::{AuthPipeline, PipelineMode, TOKEN_PARAM, TokenExtractor, TupleExtractor};
pub use skip::{SkipRules, normalize_path, parse_grpc_path};
