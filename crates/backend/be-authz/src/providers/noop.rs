use async_trait::async_trait;
use tracing::warn;

use crate::authorizer::Authorizer;
use crate::error::AuthzResult;
use crate::options::AuthorizerOptions;
use crate::policy::Policy;

/// Allows every request. Management calls succeed without storing anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuthorizer;

impl NoopAuthorizer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Authorizer for NoopAuthorizer {
    async fn init(&self, _options: AuthorizerOptions) -> AuthzResult<()> {
        warn!("Authorization is disabled, every request will be allowed");
        Ok(())
    }

    async fn check(&self, _: &str, _: &str, _: &str, _: &str) -> AuthzResult<bool> {
        Ok(true)
    }

    async fn add_policy(&self, _policy: &Policy) -> AuthzResult<bool> {
        Ok(true)
    }

    async fn remove_policy(&self, _policy: &Policy) -> AuthzResult<bool> {
        Ok(true)
    }

    async fn add_policies(&self, _policies: &[Policy]) -> AuthzResult<bool> {
        Ok(true)
    }

    async fn remove_policies(&self, _policies: &[Policy]) -> AuthzResult<bool> {
        Ok(true)
    }

    async fn get_all_subjects(&self) -> AuthzResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn get_all_objects(&self) -> AuthzResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn get_all_actions(&self) -> AuthzResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn get_all_domains(&self) -> AuthzResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn get_all_roles(&self) -> AuthzResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn get_roles_for_user(&self, _: &str, _: &str) -> AuthzResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn get_users_for_role(&self, _: &str, _: &str) -> AuthzResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn has_role_for_user(&self, _: &str, _: &str, _: &str) -> AuthzResult<bool> {
        Ok(true)
    }

    async fn add_role_for_user(&self, _: &str, _: &str, _: &str) -> AuthzResult<bool> {
        Ok(true)
    }

    async fn delete_role_for_user(&self, _: &str, _: &str, _: &str) -> AuthzResult<bool> {
        Ok(true)
    }

    async fn close(&self) -> AuthzResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_everything() {
        let authz = NoopAuthorizer::new();
        authz.init(AuthorizerOptions::default()).await.unwrap();
        authz.enforce("anyone", "/anything", "DELETE", "").await.unwrap();
        assert!(authz.add_policy(&Policy::deny("a", "b", "c", "")).await.unwrap());
        let s = vec!["x".to_string()];
        assert_eq!(authz.batch_enforce(&s, &s, &s, &s).await.unwrap(), vec![true]);
    }
}
