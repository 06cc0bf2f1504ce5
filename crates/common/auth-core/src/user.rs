use std::fmt;
use std::sync::Arc;

use crate::{AuthClaims, TransportInfo};

#[derive(Debug, thiserror::Error)]
pub enum SecurityUserError {
    #[error("missing subject")]
    MissingSubject,

    #[error("missing request attribute: {0}")]
    MissingAttribute(String),

    #[error("{0}")]
    Invalid(String),
}

/// Subject/object/action/domain view of an authenticated caller.
///
/// Built once per request from the validated claims, then completed from the
/// transport with [`SecurityUser::parse_from_request`]. The middleware freezes it
/// behind an `Arc` afterwards.
pub trait SecurityUser: Send + Sync + fmt::Debug {
    fn parse_from_request(&mut self, info: &TransportInfo) -> Result<(), SecurityUserError>;

    fn subject(&self) -> &str;

    fn object(&self) -> &str;

    fn action(&self) -> &str;

    fn domain(&self) -> &str;

    fn claims(&self) -> &AuthClaims;
}

pub type SecurityUserCreator = Arc<dyn Fn(&AuthClaims) -> Box<dyn SecurityUser> + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct DefaultSecurityUser {
    claims: AuthClaims,
    subject: String,
    object: String,
    action: String,
    domain: String,
}

impl DefaultSecurityUser {
    /// Domain resolves from `dom`, then `iss`.
    pub fn new(claims: &AuthClaims) -> Self {
        Self {
            subject: claims.subject().unwrap_or_default().to_string(),
            domain: claims
                .domain()
                .or(claims.issuer())
                .unwrap_or_default()
                .to_string(),
            claims: claims.clone(),
            object: String::new(),
            action: String::new(),
        }
    }

    pub fn creator() -> SecurityUserCreator {
        Arc::new(|claims| Box::new(Self::new(claims)))
    }
}

impl SecurityUser for DefaultSecurityUser {
    fn parse_from_request(&mut self, info: &TransportInfo) -> Result<(), SecurityUserError> {
        self.object.clone_from(&info.operation);
        self.action.clone_from(&info.method);
        Ok(())
    }

    fn subject(&self) -> &str {
        &self.subject
    }

    fn object(&self) -> &str {
        &self.object
    }

    fn action(&self) -> &str {
        &self.action
    }

    fn domain(&self) -> &str {
        &self.domain
    }

    fn claims(&self) -> &AuthClaims {
        &self.claims
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;

    #[test]
    fn default_user_takes_object_and_action_from_transport() {
        let claims = AuthClaims::new()
            .with_subject("alice")
            .with_issuer("https://issuer");
        let creator = DefaultSecurityUser::creator();
        let mut user = creator(&claims);
        user.parse_from_request(&TransportInfo::http("DELETE", "/v1/users/7", HeaderMap::new()))
            .unwrap();

        assert_eq!(user.subject(), "alice");
        assert_eq!(user.domain(), "https://issuer");
        assert_eq!(user.object(), "/v1/users/7");
        assert_eq!(user.action(), "DELETE");
    }

    #[test]
    fn domain_claim_wins_over_issuer() {
        let claims = AuthClaims::new().with_issuer("iss").with_domain("tenant-1");
        assert_eq!(DefaultSecurityUser::new(&claims).domain(), "tenant-1");
    }
}
