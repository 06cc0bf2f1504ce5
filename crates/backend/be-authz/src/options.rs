use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use bon::Builder;

use crate::error::{AuthzError, AuthzResult};
use crate::policy::{Policy, RoleBinding};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthorizerKind {
    #[default]
    Casbin,
    Opa,
    Zanzibar,
    Noop,
}

impl FromStr for AuthorizerKind {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "casbin" => Ok(Self::Casbin),
            "opa" => Ok(Self::Opa),
            "zanzibar" => Ok(Self::Zanzibar),
            "noop" | "none" => Ok(Self::Noop),
            other => Err(AuthzError::invalid_options(format!(
                "unknown authorization engine {other:?}"
            ))),
        }
    }
}

/// Where Casbin loads and persists policy rows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AdapterKind {
    #[default]
    Memory,
    File(String),
    /// MySQL connection string for the sqlx adapter.
    Sql(String),
}

impl FromStr for AdapterKind {
    type Err = AuthzError;

    /// `memory`, `file:<path>` or `sql:<dsn>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("memory") {
            return Ok(Self::Memory);
        }
        match s.split_once(':') {
            Some(("file", path)) if !path.is_empty() => Ok(Self::File(path.to_string())),
            Some(("sql", dsn)) if !dsn.is_empty() => Ok(Self::Sql(dsn.to_string())),
            _ => Err(AuthzError::invalid_options(format!(
                "adapter {s:?} is not memory, file:<path> or sql:<dsn>"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpaMode {
    #[default]
    Local,
    Remote,
}

impl FromStr for OpaMode {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(AuthzError::invalid_options(format!("unknown opa mode {other:?}"))),
        }
    }
}

pub const DEFAULT_OPA_QUERY: &str = "data.authz.allow";

#[derive(Debug, Clone, Builder)]
pub struct OpaOptions {
    #[builder(default)]
    pub mode: OpaMode,
    /// Base URL of the policy service in remote mode.
    #[builder(into)]
    pub url: Option<String>,
    #[builder(into)]
    pub policy: Option<String>,
    #[builder(into)]
    pub policy_path: Option<String>,
    #[builder(into, default = DEFAULT_OPA_QUERY.to_string())]
    pub query: String,
}

impl Default for OpaOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// `object type -> relation -> relations that imply it`.
pub type RelationHierarchy = HashMap<String, HashMap<String, Vec<String>>>;

#[derive(Debug, Clone, Builder)]
pub struct AuthorizerOptions {
    #[builder(default)]
    pub engine: AuthorizerKind,
    /// Casbin model text. Takes precedence over `model_path`.
    #[builder(into)]
    pub model: Option<String>,
    #[builder(into)]
    pub model_path: Option<String>,
    #[builder(default)]
    pub adapter: AdapterKind,
    /// Rows loaded into the engine at init.
    #[builder(default)]
    pub policies: Vec<Policy>,
    #[builder(default)]
    pub roles: Vec<RoleBinding>,
    /// Role bindings and role APIs. Casbin runs with either this or ABAC on.
    #[builder(default = true)]
    pub enable_rbac: bool,
    /// Attribute policies: Casbin matchers and OPA.
    #[builder(default = true)]
    pub enable_abac: bool,
    /// Relationship tuples (Zanzibar).
    #[builder(default = true)]
    pub enable_rebac: bool,
    #[builder(default)]
    pub opa: OpaOptions,
    #[builder(default)]
    pub relation_hierarchy: RelationHierarchy,
    #[builder(default = Duration::from_secs(5))]
    pub request_timeout: Duration,
}

impl Default for AuthorizerOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

fn env_flag(name: &'static str) -> AuthzResult<Option<bool>> {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(AuthzError::invalid_options(format!("{name} must be a boolean"))),
        },
        Err(_) => Ok(None),
    }
}

impl AuthorizerOptions {
    /// Fails when the model family `engine` evaluates is switched off.
    pub fn ensure_enabled(&self, engine: AuthorizerKind) -> AuthzResult<()> {
        let enabled = match engine {
            AuthorizerKind::Casbin => self.enable_rbac || self.enable_abac,
            AuthorizerKind::Opa => self.enable_abac,
            AuthorizerKind::Zanzibar => self.enable_rebac,
            AuthorizerKind::Noop => true,
        };
        if enabled {
            Ok(())
        } else {
            Err(AuthzError::invalid_options(format!(
                "{engine:?} engine is disabled by the rbac/abac/rebac flags"
            )))
        }
    }

    /// Reads `AUTHZ_*` and `OPA_*` variables. Unset variables keep their defaults.
    pub fn from_env() -> AuthzResult<Self> {
        let mut options = Self::default();
        if let Ok(engine) = env::var("AUTHZ_ENGINE") {
            options.engine = engine.parse()?;
        }
        options.model = env::var("AUTHZ_MODEL").ok();
        options.model_path = env::var("AUTHZ_MODEL_PATH").ok();
        if let Ok(adapter) = env::var("AUTHZ_ADAPTER") {
            options.adapter = adapter.parse()?;
        } else if let Ok(path) = env::var("AUTHZ_POLICY_PATH") {
            options.adapter = AdapterKind::File(path);
        }
        if let Ok(raw) = env::var("AUTHZ_TIMEOUT_MS") {
            let millis = raw
                .parse::<u64>()
                .map_err(|_| AuthzError::invalid_options("AUTHZ_TIMEOUT_MS must be milliseconds"))?;
            options.request_timeout = Duration::from_millis(millis);
        }
        if let Some(flag) = env_flag("AUTHZ_ENABLE_RBAC")? {
            options.enable_rbac = flag;
        }
        if let Some(flag) = env_flag("AUTHZ_ENABLE_ABAC")? {
            options.enable_abac = flag;
        }
        if let Some(flag) = env_flag("AUTHZ_ENABLE_REBAC")? {
            options.enable_rebac = flag;
        }
        if let Ok(raw) = env::var("AUTHZ_RELATION_HIERARCHY") {
            options.relation_hierarchy = serde_json::from_str(&raw).map_err(|e| {
                AuthzError::invalid_options("AUTHZ_RELATION_HIERARCHY is not valid json")
                    .with_source(e)
            })?;
        }

        if let Ok(mode) = env::var("OPA_MODE") {
            options.opa.mode = mode.parse()?;
        }
        options.opa.url = env::var("OPA_URL").ok();
        options.opa.policy_path = env::var("OPA_POLICY_PATH").ok();
        if let Ok(query) = env::var("OPA_QUERY") {
            options.opa.query = query;
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_adapters() {
        assert_eq!("memory".parse::<AdapterKind>().unwrap(), AdapterKind::Memory);
        assert_eq!(
            "file:/etc/policy.csv".parse::<AdapterKind>().unwrap(),
            AdapterKind::File("/etc/policy.csv".to_string())
        );
        assert_eq!(
            "sql:mysql://root@localhost/casbin".parse::<AdapterKind>().unwrap(),
            AdapterKind::Sql("mysql://root@localhost/casbin".to_string())
        );
        assert!("file:".parse::<AdapterKind>().is_err());
        assert!("redis".parse::<AdapterKind>().is_err());
    }

    #[test]
    fn builder_defaults() {
        let options = AuthorizerOptions::builder()
            .engine(AuthorizerKind::Opa)
            .opa(OpaOptions::builder().mode(OpaMode::Remote).url("http://opa:8181").build())
            .build();
        assert_eq!(options.opa.query, DEFAULT_OPA_QUERY);
        assert_eq!(options.request_timeout, Duration::from_secs(5));
        assert!(options.enable_rbac && options.enable_abac && options.enable_rebac);
        assert_eq!("zanzibar".parse::<AuthorizerKind>().unwrap(), AuthorizerKind::Zanzibar);
    }

    #[test]
    fn family_flags_gate_engines() {
        let options = AuthorizerOptions::builder()
            .enable_abac(false)
            .enable_rebac(false)
            .build();
        assert!(options.ensure_enabled(AuthorizerKind::Casbin).is_ok());
        assert!(options.ensure_enabled(AuthorizerKind::Noop).is_ok());
        for engine in [AuthorizerKind::Opa, AuthorizerKind::Zanzibar] {
            let err = options.ensure_enabled(engine).unwrap_err();
            assert_eq!(err.code(), crate::AuthzErrorCode::InvalidOptions);
        }

        let options = AuthorizerOptions::builder().enable_rbac(false).build();
        assert!(options.ensure_enabled(AuthorizerKind::Casbin).is_ok());
    }
}
