//! Shared authentication/authorization model.
//!
//! Everything here is transport- and provider-agnostic: the claims bag produced
//! by an authenticator, the [`SecurityUser`] view an authorizer consumes, and the
//! typed request-scoped values the middleware threads through `http::Extensions`.

mod claims;
mod context;
mod lifecycle;
mod transport;
mod user;

pub use claims::{AuthClaims, StandardClaims};
pub use context::{
    AuthContext, AuthzTuple, authz_result_from, authz_tuple_from, claims_from, inject_authz_result,
    inject_authz_tuple, inject_claims, inject_security_user, security_user_from,
};
pub use lifecycle::{Lifecycle, LifecycleError};
pub use transport::{TransportInfo, TransportKind};
pub use user::{DefaultSecurityUser, SecurityUser, SecurityUserCreator, SecurityUserError};

/// Claim key carrying the multi-tenancy domain.
pub const CLAIM_DOMAIN: &str = "dom";
/// Claim key carrying the end of the refresh window (unix seconds).
pub const CLAIM_REFRESH_EXP: &str = "refresh_exp";
/// Claim key carrying space-delimited OAuth scopes.
pub const CLAIM_SCOPE: &str = "scope";
