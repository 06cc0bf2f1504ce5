//! Request-scoped auth state carried in `http::Extensions`.
//!
//! Each value has its own injector/extractor pair so layers can populate them
//! independently. A missing value is `None`, never an error.

use std::fmt;
use std::sync::Arc;

use http::Extensions;

use crate::{AuthClaims, SecurityUser};

/// Subject/object/action/domain tuple handed to an authorizer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AuthzTuple {
    pub subject: String,
    pub object: String,
    pub action: String,
    pub domain: String,
}

impl AuthzTuple {
    pub fn new(
        subject: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            object: object.into(),
            action: action.into(),
            domain: domain.into(),
        }
    }
}

impl fmt::Display for AuthzTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.subject, self.object, self.action, self.domain
        )
    }
}

#[derive(Clone)]
struct ClaimsSlot(Arc<AuthClaims>);

#[derive(Clone)]
struct SecurityUserSlot(Arc<dyn SecurityUser>);

#[derive(Clone)]
struct AuthzTupleSlot(AuthzTuple);

#[derive(Clone, Copy)]
struct AuthzResultSlot(bool);

pub fn inject_claims(extensions: &mut Extensions, claims: Arc<AuthClaims>) {
    extensions.insert(ClaimsSlot(claims));
}

pub fn claims_from(extensions: &Extensions) -> Option<Arc<AuthClaims>> {
    extensions
        .get::<ClaimsSlot>()
        .map(|slot| Arc::clone(&slot.0))
}

pub fn inject_security_user(extensions: &mut Extensions, user: Arc<dyn SecurityUser>) {
    extensions.insert(SecurityUserSlot(user));
}

pub fn security_user_from(extensions: &Extensions) -> Option<Arc<dyn SecurityUser>> {
    extensions
        .get::<SecurityUserSlot>()
        .map(|slot| Arc::clone(&slot.0))
}

pub fn inject_authz_tuple(extensions: &mut Extensions, tuple: AuthzTuple) {
    extensions.insert(AuthzTupleSlot(tuple));
}

pub fn authz_tuple_from(extensions: &Extensions) -> Option<AuthzTuple> {
    extensions
        .get::<AuthzTupleSlot>()
        .map(|slot| slot.0.clone())
}

pub fn inject_authz_result(extensions: &mut Extensions, allowed: bool) {
    extensions.insert(AuthzResultSlot(allowed));
}

pub fn authz_result_from(extensions: &Extensions) -> Option<bool> {
    extensions.get::<AuthzResultSlot>().map(|slot| slot.0)
}

/// Snapshot of everything the auth layers attached to a request.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub claims: Option<Arc<AuthClaims>>,
    pub user: Option<Arc<dyn SecurityUser>>,
    pub tuple: Option<AuthzTuple>,
    pub authorized: Option<bool>,
}

impl AuthContext {
    pub fn from_extensions(extensions: &Extensions) -> Self {
        Self {
            claims: claims_from(extensions),
            user: security_user_from(extensions),
            tuple: authz_tuple_from(extensions),
            authorized: authz_result_from(extensions),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.claims.is_some()
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized == Some(true)
    }

    pub fn subject(&self) -> Option<&str> {
        self.claims.as_deref().and_then(AuthClaims::subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DefaultSecurityUser;

    #[test]
    fn values_are_independent() {
        let mut ext = Extensions::new();
        assert!(claims_from(&ext).is_none());
        assert!(authz_result_from(&ext).is_none());

        inject_claims(&mut ext, Arc::new(AuthClaims::new().with_subject("bob")));
        inject_authz_result(&mut ext, true);

        let ctx = AuthContext::from_extensions(&ext);
        assert_eq!(ctx.subject(), Some("bob"));
        assert!(ctx.is_authorized());
        assert!(ctx.user.is_none());
        assert!(ctx.tuple.is_none());
    }

    #[test]
    fn stores_user_and_tuple() {
        let mut ext = Extensions::new();
        let claims = AuthClaims::new().with_subject("carol");
        inject_security_user(&mut ext, Arc::new(DefaultSecurityUser::new(&claims)));
        inject_authz_tuple(&mut ext, AuthzTuple::new("carol", "/docs", "GET", "d1"));

        assert_eq!(security_user_from(&ext).unwrap().subject(), "carol");
        assert_eq!(authz_tuple_from(&ext).unwrap().domain, "d1");
        assert!(!AuthContext::from_extensions(&ext).is_authenticated());
    }
}
