//! Authentication providers.
//!
//! Every provider implements [`Authenticator`] and is shared as
//! `Arc<dyn Authenticator>`; [`new_authenticator`] builds and initializes one
//! from an [`AuthenticatorKind`].

mod authenticator;
mod error;
mod options;
pub mod providers;
mod store;
mod token;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use authenticator::Authenticator;
pub use error::{AuthnError, AuthnErrorCode, AuthnResult};
pub use options::{
    AuthenticatorOptions, ClaimsFactory, DEFAULT_TOKEN_HEAD, DEFAULT_TOKEN_LOOKUP, OidcOptions,
    PskFormat, PskHash, PskOptions,
};
pub use providers::{JwtAuthenticator, NoopAuthenticator, OidcAuthenticator, PskAuthenticator};
pub use store::{MemoryTokenStore, TokenStore, revocation_key};
pub use token::{TokenLookup, strip_scheme};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticatorKind {
    Jwt,
    Oidc,
    Psk,
    Noop,
}

impl FromStr for AuthenticatorKind {
    type Err = AuthnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jwt" => Ok(Self::Jwt),
            "oidc" => Ok(Self::Oidc),
            "psk" => Ok(Self::Psk),
            "noop" | "none" => Ok(Self::Noop),
            other => Err(AuthnError::invalid_options(format!(
                "unknown authenticator {other:?}"
            ))),
        }
    }
}

impl fmt::Display for AuthenticatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Jwt => "jwt",
            Self::Oidc => "oidc",
            Self::Psk => "psk",
            Self::Noop => "noop",
        })
    }
}

pub async fn new_authenticator(
    kind: AuthenticatorKind,
    options: AuthenticatorOptions,
) -> AuthnResult<Arc<dyn Authenticator>> {
    let authenticator: Arc<dyn Authenticator> = match kind {
        AuthenticatorKind::Jwt => Arc::new(JwtAuthenticator::new()),
        AuthenticatorKind::Oidc => Arc::new(OidcAuthenticator::new()),
        AuthenticatorKind::Psk => Arc::new(PskAuthenticator::new()),
        AuthenticatorKind::Noop => Arc::new(NoopAuthenticator::new()),
    };
    authenticator.init(options).await?;
    Ok(authenticator)
}
