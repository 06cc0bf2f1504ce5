use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use be_auth_core::{AuthenticatorKind, AuthenticatorOptions, AuthnError};
use be_auth_middleware::{PipelineMode, SkipRules};
use be_authz::{AuthorizerOptions, AuthzError};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error(transparent)]
    Authn(#[from] AuthnError),

    #[error(transparent)]
    Authz(#[from] AuthzError),
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: reason.into(),
    }
}

fn list(name: &str) -> Vec<String> {
    env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn addr(name: &'static str, default: &str) -> Result<SocketAddr, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse::<SocketAddr>()
        .map_err(|e| invalid(name, e.to_string()))
}

pub fn parse_mode(value: &str) -> Result<PipelineMode, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "authn" => Ok(PipelineMode::Authn),
        "authz" => Ok(PipelineMode::Authz),
        "combined" => Ok(PipelineMode::Combined),
        other => Err(invalid("AUTH_MODE", format!("unknown mode {other:?}"))),
    }
}

/// Everything the gateway reads from the environment.
#[derive(Debug)]
pub struct GatewayConfig {
    pub grpc_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub authenticator: AuthenticatorKind,
    pub authn: AuthenticatorOptions,
    pub authz: AuthorizerOptions,
    pub mode: PipelineMode,
    pub skip: SkipRules,
    pub skip_roles: Vec<String>,
    pub default_domain: String,
    pub call_timeout: Option<Duration>,
    pub cors_origins: Vec<String>,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let authenticator = match env::var("AUTHN_PROVIDER") {
            Ok(kind) => AuthenticatorKind::from_str(&kind)?,
            Err(_) => AuthenticatorKind::Jwt,
        };
        let mode = match env::var("AUTH_MODE") {
            Ok(mode) => parse_mode(&mode)?,
            Err(_) => PipelineMode::Combined,
        };

        let mut skip = SkipRules::new().grpc_service("grpc.health.v1.Health");
        for path in list("AUTH_SKIP_PATHS") {
            skip = skip.path(path);
        }
        for prefix in list("AUTH_SKIP_PREFIXES") {
            skip = skip.prefix(prefix);
        }
        for service in list("AUTH_SKIP_GRPC_SERVICES") {
            skip = skip.grpc_service(service);
        }
        for method in list("AUTH_SKIP_GRPC_METHODS") {
            skip = skip.grpc_method(method);
        }

        let call_timeout = match env::var("AUTH_CALL_TIMEOUT_MS") {
            Ok(raw) => Some(Duration::from_millis(
                raw.parse::<u64>()
                    .map_err(|e| invalid("AUTH_CALL_TIMEOUT_MS", e.to_string()))?,
            )),
            Err(_) => None,
        };

        let mut cors_origins = list("CORS_ALLOWED_ORIGINS");
        if cors_origins.is_empty() {
            cors_origins.push("http://localhost:5173".to_string());
        }

        Ok(Self {
            grpc_addr: addr("GATEWAY_GRPC_ADDR", "0.0.0.0:50051")?,
            http_addr: addr("GATEWAY_HTTP_ADDR", "0.0.0.0:3000")?,
            authenticator,
            authn: AuthenticatorOptions::from_env()?,
            authz: AuthorizerOptions::from_env()?,
            mode,
            skip: skip.path("/health"),
            skip_roles: list("AUTH_SKIP_ROLES"),
            default_domain: env::var("AUTH_DEFAULT_DOMAIN").unwrap_or_default(),
            call_timeout,
            cors_origins,
        })
    }
}
