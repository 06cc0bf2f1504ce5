//! Authorization providers.
//!
//! Every engine implements [`Authorizer`]. [`new_authorizer`] picks one from
//! [`AuthorizerOptions::engine`] and initializes it.

mod authorizer;
mod error;
mod options;
mod policy;
pub mod providers;

use std::sync::Arc;

pub use authorizer::Authorizer;
pub use error::{AuthzError, AuthzErrorCode, AuthzResult};
pub use options::{
    AdapterKind, AuthorizerKind, AuthorizerOptions, DEFAULT_OPA_QUERY, OpaMode, OpaOptions,
    RelationHierarchy,
};
pub use policy::{Effect, Policy, RoleBinding};
pub use providers::{
    CasbinAuthorizer, DEFAULT_MODEL, NoopAuthorizer, OpaAuthorizer, ZanzibarAuthorizer,
};

pub async fn new_authorizer(options: AuthorizerOptions) -> AuthzResult<Arc<dyn Authorizer>> {
    let authorizer: Arc<dyn Authorizer> = match options.engine {
        AuthorizerKind::Casbin => Arc::new(CasbinAuthorizer::new()),
        AuthorizerKind::Opa => Arc::new(OpaAuthorizer::new()),
        AuthorizerKind::Zanzibar => Arc::new(ZanzibarAuthorizer::new()),
        AuthorizerKind::Noop => Arc::new(NoopAuthorizer::new()),
    };
    authorizer.init(options).await?;
    Ok(authorizer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn factory_picks_engine() {
        let authz = new_authorizer(
            AuthorizerOptions::builder()
                .policies(vec![Policy::allow("alice", "/docs/*", "GET", "acme")])
                .build(),
        )
        .await
        .unwrap();
        assert_eq!(authz.name(), "casbin");
        authz.enforce("alice", "/docs/1", "GET", "acme").await.unwrap();

        let authz = new_authorizer(
            AuthorizerOptions::builder()
                .engine(AuthorizerKind::Zanzibar)
                .build(),
        )
        .await
        .unwrap();
        assert_eq!(authz.name(), "zanzibar");

        let err = new_authorizer(AuthorizerOptions::builder().engine(AuthorizerKind::Opa).build())
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), AuthzErrorCode::InvalidOptions);
    }

    #[tokio::test]
    async fn factory_refuses_disabled_families() {
        let err = new_authorizer(
            AuthorizerOptions::builder()
                .engine(AuthorizerKind::Zanzibar)
                .enable_rebac(false)
                .build(),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.code(), AuthzErrorCode::InvalidOptions);

        let authz = new_authorizer(
            AuthorizerOptions::builder()
                .engine(AuthorizerKind::Noop)
                .enable_rbac(false)
                .enable_abac(false)
                .enable_rebac(false)
                .build(),
        )
        .await
        .unwrap();
        assert_eq!(authz.name(), "noop");
    }
}
