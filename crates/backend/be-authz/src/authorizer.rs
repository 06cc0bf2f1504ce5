use async_trait::async_trait;
use auth_core::AuthzTuple;
use tracing::debug;

use crate::error::{AuthzError, AuthzResult};
use crate::options::AuthorizerOptions;
use crate::policy::Policy;

/// A policy decision point.
///
/// `check` returns the raw decision; `enforce` turns a denial into a
/// `PermissionDenied` error so callers can `?` it.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn init(&self, options: AuthorizerOptions) -> AuthzResult<()>;

    async fn check(&self, subject: &str, object: &str, action: &str, domain: &str)
    -> AuthzResult<bool>;

    async fn enforce(
        &self,
        subject: &str,
        object: &str,
        action: &str,
        domain: &str,
    ) -> AuthzResult<()> {
        if self.check(subject, object, action, domain).await? {
            return Ok(());
        }
        debug!(authorizer = self.name(), subject, object, action, domain, "denied");
        Err(AuthzError::permission_denied(AuthzTuple::new(
            subject, object, action, domain,
        )))
    }

    /// Decisions in input order. Slices of unequal length are rejected before
    /// any decision is made.
    async fn batch_enforce(
        &self,
        subjects: &[String],
        objects: &[String],
        actions: &[String],
        domains: &[String],
    ) -> AuthzResult<Vec<bool>> {
        check_batch_lengths(subjects, objects, actions, domains)?;
        let mut results = Vec::with_capacity(subjects.len());
        let rows = subjects.iter().zip(objects).zip(actions).zip(domains);
        for (((subject, object), action), domain) in rows {
            results.push(self.check(subject, object, action, domain).await?);
        }
        Ok(results)
    }

    async fn add_policy(&self, policy: &Policy) -> AuthzResult<bool>;

    async fn remove_policy(&self, policy: &Policy) -> AuthzResult<bool>;

    async fn add_policies(&self, policies: &[Policy]) -> AuthzResult<bool>;

    async fn remove_policies(&self, policies: &[Policy]) -> AuthzResult<bool>;

    async fn get_all_subjects(&self) -> AuthzResult<Vec<String>>;

    async fn get_all_objects(&self) -> AuthzResult<Vec<String>>;

    async fn get_all_actions(&self) -> AuthzResult<Vec<String>>;

    async fn get_all_domains(&self) -> AuthzResult<Vec<String>>;

    async fn get_all_roles(&self) -> AuthzResult<Vec<String>>;

    async fn get_roles_for_user(&self, user: &str, domain: &str) -> AuthzResult<Vec<String>>;

    async fn get_users_for_role(&self, role: &str, domain: &str) -> AuthzResult<Vec<String>>;

    async fn has_role_for_user(&self, user: &str, role: &str, domain: &str) -> AuthzResult<bool>;

    async fn add_role_for_user(&self, user: &str, role: &str, domain: &str) -> AuthzResult<bool>;

    async fn delete_role_for_user(&self, user: &str, role: &str, domain: &str)
    -> AuthzResult<bool>;

    async fn close(&self) -> AuthzResult<()>;

    fn name(&self) -> &'static str;
}

pub(crate) fn check_batch_lengths(
    subjects: &[String],
    objects: &[String],
    actions: &[String],
    domains: &[String],
) -> AuthzResult<()> {
    let n = subjects.len();
    if objects.len() != n || actions.len() != n || domains.len() != n {
        return Err(AuthzError::invalid_request(format!(
            "batch slices differ in length: subjects={n}, objects={}, actions={}, domains={}",
            objects.len(),
            actions.len(),
            domains.len()
        )));
    }
    Ok(())
}
