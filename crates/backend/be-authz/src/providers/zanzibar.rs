use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use auth_core::Lifecycle;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::authorizer::Authorizer;
use crate::error::{AuthzError, AuthzResult};
use crate::options::{AuthorizerKind, AuthorizerOptions, RelationHierarchy};
use crate::policy::{Effect, Policy};

const PROVIDER: &str = "zanzibar";

/// `object#relation -> subject -> granted`.
type TupleMap = HashMap<String, HashMap<String, bool>>;

fn tuple_key(object: &str, relation: &str) -> String {
    format!("{object}#{relation}")
}

/// `document:readme` has type `document`; untyped objects are their own type.
fn object_type(object: &str) -> &str {
    object.split_once(':').map_or(object, |(kind, _)| kind)
}

struct ZanzibarState {
    tuples: RwLock<TupleMap>,
    hierarchy: RelationHierarchy,
}

impl ZanzibarState {
    fn lookup(tuples: &TupleMap, object: &str, relation: &str, subject: &str) -> Option<bool> {
        tuples
            .get(&tuple_key(object, relation))
            .and_then(|subjects| subjects.get(subject))
            .copied()
    }

    /// Direct tuple first, then each configured parent relation one level up.
    fn check(&self, subject: &str, object: &str, relation: &str) -> bool {
        let tuples = self.tuples.read();
        if let Some(granted) = Self::lookup(&tuples, object, relation, subject) {
            return granted;
        }
        self.hierarchy
            .get(object_type(object))
            .and_then(|relations| relations.get(relation))
            .is_some_and(|parents| {
                parents.iter().any(|parent| {
                    Self::lookup(&tuples, object, parent, subject).unwrap_or(false)
                })
            })
    }

    fn write(&self, policy: &Policy) -> bool {
        let granted = policy.effect == Effect::Allow;
        let previous = self
            .tuples
            .write()
            .entry(tuple_key(&policy.object, &policy.action))
            .or_default()
            .insert(policy.subject.clone(), granted);
        previous != Some(granted)
    }

    fn delete(&self, policy: &Policy) -> bool {
        let mut tuples = self.tuples.write();
        let key = tuple_key(&policy.object, &policy.action);
        let Some(subjects) = tuples.get_mut(&key) else {
            return false;
        };
        let removed = subjects.remove(&policy.subject).is_some();
        if subjects.is_empty() {
            tuples.remove(&key);
        }
        removed
    }

    /// Distinct values of one tuple column, sorted.
    fn collect(&self, column: impl Fn(&str, &str, &str) -> String) -> Vec<String> {
        let tuples = self.tuples.read();
        let values: BTreeSet<String> = tuples
            .iter()
            .flat_map(|(key, subjects)| {
                let (object, relation) = key.rsplit_once('#').unwrap_or((key.as_str(), ""));
                subjects
                    .keys()
                    .map(|subject| column(subject, object, relation))
                    .collect::<Vec<_>>()
            })
            .collect();
        values.into_iter().collect()
    }
}

/// Relationship-based authorizer over in-memory `object#relation@subject`
/// tuples. The action is the relation name and the domain is ignored.
#[derive(Default)]
pub struct ZanzibarAuthorizer {
    state: Lifecycle<ZanzibarState>,
}

impl ZanzibarAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> AuthzResult<Arc<ZanzibarState>> {
        self.state
            .get()
            .map_err(|e| AuthzError::lifecycle(PROVIDER, e))
    }
}

#[async_trait]
impl Authorizer for ZanzibarAuthorizer {
    async fn init(&self, options: AuthorizerOptions) -> AuthzResult<()> {
        options.ensure_enabled(AuthorizerKind::Zanzibar)?;
        options.policies.iter().try_for_each(Policy::validate)?;
        let state = ZanzibarState {
            tuples: RwLock::new(TupleMap::new()),
            hierarchy: options.relation_hierarchy,
        };
        for policy in &options.policies {
            state.write(policy);
        }
        info!(
            provider = PROVIDER,
            tuples = options.policies.len(),
            object_types = state.hierarchy.len(),
            "Initialized authorizer"
        );
        self.state
            .initialize(state)
            .map_err(|e| AuthzError::lifecycle(PROVIDER, e))
    }

    async fn check(
        &self,
        subject: &str,
        object: &str,
        action: &str,
        domain: &str,
    ) -> AuthzResult<bool> {
        let allowed = self.state()?.check(subject, object, action);
        debug!(provider = PROVIDER, subject, object, relation = action, domain, allowed, "decision");
        Ok(allowed)
    }

    async fn add_policy(&self, policy: &Policy) -> AuthzResult<bool> {
        policy.validate()?;
        Ok(self.state()?.write(policy))
    }

    async fn remove_policy(&self, policy: &Policy) -> AuthzResult<bool> {
        Ok(self.state()?.delete(policy))
    }

    async fn add_policies(&self, policies: &[Policy]) -> AuthzResult<bool> {
        policies.iter().try_for_each(Policy::validate)?;
        let state = self.state()?;
        let mut changed = false;
        for policy in policies {
            changed |= state.write(policy);
        }
        Ok(changed)
    }

    async fn remove_policies(&self, policies: &[Policy]) -> AuthzResult<bool> {
        let state = self.state()?;
        let mut changed = false;
        for policy in policies {
            changed |= state.delete(policy);
        }
        Ok(changed)
    }

    async fn get_all_subjects(&self) -> AuthzResult<Vec<String>> {
        Ok(self.state()?.collect(|subject, _, _| subject.to_string()))
    }

    async fn get_all_objects(&self) -> AuthzResult<Vec<String>> {
        Ok(self.state()?.collect(|_, object, _| object.to_string()))
    }

    async fn get_all_actions(&self) -> AuthzResult<Vec<String>> {
        Ok(self.state()?.collect(|_, _, relation| relation.to_string()))
    }

    async fn get_all_domains(&self) -> AuthzResult<Vec<String>> {
        Err(AuthzError::unsupported(PROVIDER, "get_all_domains"))
    }

    async fn get_all_roles(&self) -> AuthzResult<Vec<String>> {
        Err(AuthzError::unsupported(PROVIDER, "get_all_roles"))
    }

    async fn get_roles_for_user(&self, _user: &str, _domain: &str) -> AuthzResult<Vec<String>> {
        Err(AuthzError::unsupported(PROVIDER, "get_roles_for_user"))
    }

    async fn get_users_for_role(&self, _role: &str, _domain: &str) -> AuthzResult<Vec<String>> {
        Err(AuthzError::unsupported(PROVIDER, "get_users_for_role"))
    }

    async fn has_role_for_user(&self, _user: &str, _role: &str, _domain: &str) -> AuthzResult<bool> {
        Err(AuthzError::unsupported(PROVIDER, "has_role_for_user"))
    }

    async fn add_role_for_user(&self, _user: &str, _role: &str, _domain: &str) -> AuthzResult<bool> {
        Err(AuthzError::unsupported(PROVIDER, "add_role_for_user"))
    }

    async fn delete_role_for_user(
        &self,
        _user: &str,
        _role: &str,
        _domain: &str,
    ) -> AuthzResult<bool> {
        Err(AuthzError::unsupported(PROVIDER, "delete_role_for_user"))
    }

    async fn close(&self) -> AuthzResult<()> {
        if self.state.close().is_some() {
            info!(provider = PROVIDER, "Closed authorizer");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthzErrorCode;

    async fn authorizer() -> ZanzibarAuthorizer {
        let hierarchy: RelationHierarchy = serde_json::from_str(
            r#"{"document": {"viewer": ["editor", "owner"], "editor": ["owner"]}}"#,
        )
        .unwrap();
        let authz = ZanzibarAuthorizer::new();
        authz
            .init(AuthorizerOptions::builder().relation_hierarchy(hierarchy).build())
            .await
            .unwrap();
        authz
    }

    #[tokio::test]
    async fn hierarchy_grant_and_revoke() {
        let authz = authorizer().await;
        let editor = Policy::allow("alice", "document:readme", "editor", "");

        assert!(!authz.check("alice", "document:readme", "viewer", "").await.unwrap());
        assert!(authz.add_policy(&editor).await.unwrap());
        assert!(authz.check("alice", "document:readme", "editor", "").await.unwrap());
        assert!(authz.check("alice", "document:readme", "viewer", "").await.unwrap());
        assert!(!authz.check("alice", "document:other", "viewer", "").await.unwrap());
        assert!(!authz.check("bob", "document:readme", "viewer", "").await.unwrap());

        assert!(authz.remove_policy(&editor).await.unwrap());
        assert!(!authz.remove_policy(&editor).await.unwrap());
        assert!(!authz.check("alice", "document:readme", "viewer", "").await.unwrap());
        let err = authz
            .enforce("alice", "document:readme", "viewer", "")
            .await
            .unwrap_err();
        assert_eq!(err.code(), AuthzErrorCode::PermissionDenied);
    }

    #[tokio::test]
    async fn walks_one_level_only() {
        let hierarchy: RelationHierarchy =
            serde_json::from_str(r#"{"folder": {"viewer": ["editor"], "editor": ["owner"]}}"#)
                .unwrap();
        let authz = ZanzibarAuthorizer::new();
        authz
            .init(
                AuthorizerOptions::builder()
                    .relation_hierarchy(hierarchy)
                    .policies(vec![Policy::allow("carol", "folder:x", "owner", "")])
                    .build(),
            )
            .await
            .unwrap();
        assert!(authz.check("carol", "folder:x", "editor", "").await.unwrap());
        assert!(!authz.check("carol", "folder:x", "viewer", "").await.unwrap());
    }

    #[tokio::test]
    async fn direct_deny_tuple_wins_over_parent() {
        let authz = authorizer().await;
        authz
            .add_policies(&[
                Policy::allow("dave", "document:plan", "owner", ""),
                Policy::deny("dave", "document:plan", "viewer", ""),
            ])
            .await
            .unwrap();
        assert!(authz.check("dave", "document:plan", "editor", "").await.unwrap());
        assert!(!authz.check("dave", "document:plan", "viewer", "").await.unwrap());
    }

    #[tokio::test]
    async fn introspection_and_unsupported_roles() {
        let authz = authorizer().await;
        authz
            .add_policies(&[
                Policy::allow("alice", "document:a", "viewer", ""),
                Policy::allow("bob", "document:b", "editor", ""),
            ])
            .await
            .unwrap();
        assert_eq!(authz.get_all_subjects().await.unwrap(), vec!["alice", "bob"]);
        assert_eq!(
            authz.get_all_objects().await.unwrap(),
            vec!["document:a", "document:b"]
        );
        assert_eq!(authz.get_all_actions().await.unwrap(), vec!["editor", "viewer"]);

        for err in [
            authz.get_roles_for_user("alice", "").await.unwrap_err(),
            authz.get_all_roles().await.unwrap_err(),
            authz.get_all_domains().await.unwrap_err(),
        ] {
            assert_eq!(err.code(), AuthzErrorCode::UnsupportedOperation);
        }
        let err = authz.add_role_for_user("alice", "admin", "").await.unwrap_err();
        assert_eq!(err.code(), AuthzErrorCode::UnsupportedOperation);
    }

    #[tokio::test]
    async fn rejects_incomplete_tuples() {
        let authz = authorizer().await;
        let err = authz
            .add_policy(&Policy::allow("", "document:a", "viewer", ""))
            .await
            .unwrap_err();
        assert_eq!(err.code(), AuthzErrorCode::InvalidPolicy);
    }
}
