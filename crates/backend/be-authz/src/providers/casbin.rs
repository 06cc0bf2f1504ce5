use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use auth_core::Lifecycle;
use casbin::{
    Adapter, CoreApi, DefaultModel, Enforcer, MgmtApi, RbacApi,
    prelude::{FileAdapter, MemoryAdapter},
};
use sqlx_adapter::SqlxAdapter;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::authorizer::Authorizer;
use crate::error::{AuthzError, AuthzErrorCode, AuthzResult};
use crate::options::{AdapterKind, AuthorizerKind, AuthorizerOptions};
use crate::policy::{Policy, RoleBinding};

const PROVIDER: &str = "casbin";
const SQL_POOL_SIZE: u32 = 8;

/// RBAC with domains; an explicit deny overrides any allow.
pub const DEFAULT_MODEL: &str = r#"
[request_definition]
r = sub, obj, act, dom

[policy_definition]
p = sub, obj, act, dom, eft

[role_definition]
g = _, _, _

[policy_effect]
e = some(where (p.eft == allow)) && !some(where (p.eft == deny))

[matchers]
m = g(r.sub, p.sub, r.dom) && r.dom == p.dom && (keyMatch(r.obj, p.obj) || r.obj == p.obj) && (r.act == p.act || p.act == "*")
"#;

/// Which optional columns the loaded model declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ModelShape {
    request_has_domain: bool,
    policy_has_effect: bool,
}

impl ModelShape {
    fn parse(model: &str) -> Self {
        let definition = |key: &str| {
            model
                .lines()
                .map(str::trim)
                .find_map(|line| {
                    let (lhs, rhs) = line.split_once('=')?;
                    (lhs.trim() == key).then(|| {
                        rhs.split(',')
                            .map(|token| token.trim().to_string())
                            .collect::<Vec<_>>()
                    })
                })
                .unwrap_or_default()
        };
        Self {
            request_has_domain: definition("r").iter().any(|t| t == "dom"),
            policy_has_effect: definition("p").iter().any(|t| t == "eft"),
        }
    }

    fn policy_row(&self, policy: &Policy) -> Vec<String> {
        let mut row = vec![
            policy.subject.clone(),
            policy.object.clone(),
            policy.action.clone(),
        ];
        if self.request_has_domain {
            row.push(policy.domain.clone());
        }
        if self.policy_has_effect {
            row.push(policy.effect.to_string());
        }
        row
    }

    fn grouping_row(&self, binding: &RoleBinding) -> Vec<String> {
        let mut row = vec![binding.user.clone(), binding.role.clone()];
        if self.request_has_domain {
            row.push(binding.domain.clone());
        }
        row
    }

    fn domain<'a>(&self, domain: &'a str) -> Option<&'a str> {
        (self.request_has_domain && !domain.is_empty()).then_some(domain)
    }
}

struct CasbinState {
    enforcer: RwLock<Enforcer>,
    shape: ModelShape,
    rbac: bool,
    /// Bounds every adapter round trip.
    timeout: Duration,
}

impl CasbinState {
    fn roles(&self, operation: &str) -> AuthzResult<()> {
        if self.rbac {
            Ok(())
        } else {
            Err(AuthzError::new(
                AuthzErrorCode::UnsupportedOperation,
                format!("{operation} needs rbac to be enabled"),
            ))
        }
    }

    async fn persist<T>(&self, fut: impl Future<Output = casbin::Result<T>>) -> AuthzResult<T> {
        bounded(self.timeout, fut).await
    }
}

async fn bounded<T>(
    limit: Duration,
    fut: impl Future<Output = casbin::Result<T>>,
) -> AuthzResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(AuthzError::from_casbin),
        Err(_) => Err(AuthzError::new(
            AuthzErrorCode::Timeout,
            format!("casbin adapter did not answer within {limit:?}"),
        )),
    }
}

/// Casbin-backed [`Authorizer`].
#[derive(Default)]
pub struct CasbinAuthorizer {
    state: Lifecycle<CasbinState>,
}

async fn load_model(options: &AuthorizerOptions) -> AuthzResult<String> {
    if let Some(model) = &options.model {
        return Ok(model.clone());
    }
    match &options.model_path {
        Some(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
            AuthzError::invalid_options(format!("failed to read model {path}")).with_source(e)
        }),
        None => Ok(DEFAULT_MODEL.to_string()),
    }
}

fn validate_all(policies: &[Policy]) -> AuthzResult<()> {
    policies.iter().try_for_each(Policy::validate)
}

impl CasbinAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an initialized authorizer on a caller-supplied adapter.
    pub async fn with_adapter<A: Adapter + 'static>(
        options: AuthorizerOptions,
        adapter: A,
    ) -> AuthzResult<Self> {
        let authorizer = Self::new();
        authorizer.install(&options, adapter).await?;
        Ok(authorizer)
    }

    async fn install<A: Adapter + 'static>(
        &self,
        options: &AuthorizerOptions,
        adapter: A,
    ) -> AuthzResult<()> {
        options.ensure_enabled(AuthorizerKind::Casbin)?;
        if !options.enable_rbac && !options.roles.is_empty() {
            return Err(AuthzError::invalid_options(
                "role bindings were supplied but rbac is disabled",
            ));
        }
        let model_text = load_model(options).await?;
        let shape = ModelShape::parse(&model_text);
        let model = DefaultModel::from_str(&model_text)
            .await
            .map_err(|e| AuthzError::invalid_options(format!("invalid casbin model: {e}")).with_source(e))?;
        let timeout = options.request_timeout;
        let mut enforcer = bounded(timeout, Enforcer::new(model, adapter)).await?;

        validate_all(&options.policies)?;
        if !options.policies.is_empty() {
            let rows = options.policies.iter().map(|p| shape.policy_row(p)).collect();
            bounded(timeout, enforcer.add_policies(rows)).await?;
        }
        if !options.roles.is_empty() {
            let rows = options.roles.iter().map(|r| shape.grouping_row(r)).collect();
            bounded(timeout, enforcer.add_grouping_policies(rows)).await?;
        }

        info!(
            provider = PROVIDER,
            policies = enforcer.get_policy().len(),
            roles = enforcer.get_grouping_policy().len(),
            "Casbin enforcer initialized"
        );
        self.state
            .initialize(CasbinState {
                enforcer: RwLock::new(enforcer),
                shape,
                rbac: options.enable_rbac,
                timeout,
            })
            .map_err(|e| AuthzError::lifecycle(PROVIDER, e))
    }

    fn state(&self) -> AuthzResult<Arc<CasbinState>> {
        self.state
            .get()
            .map_err(|e| AuthzError::lifecycle(PROVIDER, e))
    }
}

#[async_trait]
impl Authorizer for CasbinAuthorizer {
    async fn init(&self, options: AuthorizerOptions) -> AuthzResult<()> {
        match &options.adapter {
            AdapterKind::Memory => self.install(&options, MemoryAdapter::default()).await,
            AdapterKind::File(path) => {
                self.install(&options, FileAdapter::new(path.clone()))
                    .await
            }
            AdapterKind::Sql(dsn) => {
                let adapter = bounded(
                    options.request_timeout,
                    SqlxAdapter::new(dsn.as_str(), SQL_POOL_SIZE),
                )
                .await?;
                self.install(&options, adapter).await
            }
        }
    }

    async fn check(
        &self,
        subject: &str,
        object: &str,
        action: &str,
        domain: &str,
    ) -> AuthzResult<bool> {
        let state = self.state()?;
        let enforcer = state.enforcer.read().await;
        let decision = if state.shape.request_has_domain {
            enforcer.enforce((subject, object, action, domain))
        } else {
            enforcer.enforce((subject, object, action))
        };
        let allowed = decision.map_err(AuthzError::from_casbin)?;
        debug!(provider = PROVIDER, subject, object, action, domain, allowed, "decision");
        Ok(allowed)
    }

    async fn add_policy(&self, policy: &Policy) -> AuthzResult<bool> {
        policy.validate()?;
        let state = self.state()?;
        let row = state.shape.policy_row(policy);
        let mut enforcer = state.enforcer.write().await;
        state.persist(enforcer.add_policy(row)).await
    }

    async fn remove_policy(&self, policy: &Policy) -> AuthzResult<bool> {
        let state = self.state()?;
        let row = state.shape.policy_row(policy);
        let mut enforcer = state.enforcer.write().await;
        state.persist(enforcer.remove_policy(row)).await
    }

    async fn add_policies(&self, policies: &[Policy]) -> AuthzResult<bool> {
        validate_all(policies)?;
        let state = self.state()?;
        let rows = policies.iter().map(|p| state.shape.policy_row(p)).collect();
        let mut enforcer = state.enforcer.write().await;
        state.persist(enforcer.add_policies(rows)).await
    }

    async fn remove_policies(&self, policies: &[Policy]) -> AuthzResult<bool> {
        let state = self.state()?;
        let rows = policies.iter().map(|p| state.shape.policy_row(p)).collect();
        let mut enforcer = state.enforcer.write().await;
        state.persist(enforcer.remove_policies(rows)).await
    }

    async fn get_all_subjects(&self) -> AuthzResult<Vec<String>> {
        Ok(self.state()?.enforcer.read().await.get_all_subjects())
    }

    async fn get_all_objects(&self) -> AuthzResult<Vec<String>> {
        Ok(self.state()?.enforcer.read().await.get_all_objects())
    }

    async fn get_all_actions(&self) -> AuthzResult<Vec<String>> {
        Ok(self.state()?.enforcer.read().await.get_all_actions())
    }

    async fn get_all_domains(&self) -> AuthzResult<Vec<String>> {
        let state = self.state()?;
        if !state.shape.request_has_domain {
            return Ok(Vec::new());
        }
        let enforcer = state.enforcer.read().await;
        let from_policies = enforcer.get_policy().into_iter().filter_map(|row| row.get(3).cloned());
        let from_roles = enforcer
            .get_grouping_policy()
            .into_iter()
            .filter_map(|row| row.get(2).cloned());
        let domains: BTreeSet<String> = from_policies
            .chain(from_roles)
            .filter(|d| !d.is_empty())
            .collect();
        Ok(domains.into_iter().collect())
    }

    async fn get_all_roles(&self) -> AuthzResult<Vec<String>> {
        let state = self.state()?;
        state.roles("get_all_roles")?;
        Ok(state.enforcer.read().await.get_all_roles())
    }

    async fn get_roles_for_user(&self, user: &str, domain: &str) -> AuthzResult<Vec<String>> {
        let state = self.state()?;
        state.roles("get_roles_for_user")?;
        let domain = state.shape.domain(domain);
        Ok(state.enforcer.write().await.get_roles_for_user(user, domain))
    }

    async fn get_users_for_role(&self, role: &str, domain: &str) -> AuthzResult<Vec<String>> {
        let state = self.state()?;
        state.roles("get_users_for_role")?;
        let domain = state.shape.domain(domain);
        Ok(state.enforcer.read().await.get_users_for_role(role, domain))
    }

    async fn has_role_for_user(&self, user: &str, role: &str, domain: &str) -> AuthzResult<bool> {
        let state = self.state()?;
        state.roles("has_role_for_user")?;
        let domain = state.shape.domain(domain);
        Ok(state
            .enforcer
            .write()
            .await
            .has_role_for_user(user, role, domain))
    }

    async fn add_role_for_user(&self, user: &str, role: &str, domain: &str) -> AuthzResult<bool> {
        let state = self.state()?;
        state.roles("add_role_for_user")?;
        let domain = state.shape.domain(domain);
        let mut enforcer = state.enforcer.write().await;
        state
            .persist(enforcer.add_role_for_user(user, role, domain))
            .await
    }

    async fn delete_role_for_user(
        &self,
        user: &str,
        role: &str,
        domain: &str,
    ) -> AuthzResult<bool> {
        let state = self.state()?;
        state.roles("delete_role_for_user")?;
        let domain = state.shape.domain(domain);
        let mut enforcer = state.enforcer.write().await;
        state
            .persist(enforcer.delete_role_for_user(user, role, domain))
            .await
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
