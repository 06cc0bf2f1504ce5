use std::collections::HashMap;
use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use auth_core::{AuthClaims, SecurityUserCreator};
use bon::Builder;

use crate::error::{AuthnError, AuthnResult};
use crate::store::TokenStore;

/// Template claims merged under the caller's claims when a token is created.
pub type ClaimsFactory = Arc<dyn Fn() -> AuthClaims + Send + Sync>;

pub const DEFAULT_TOKEN_LOOKUP: &str = "header:Authorization";
pub const DEFAULT_TOKEN_HEAD: &str = "Bearer";

#[derive(Clone, Builder)]
pub struct AuthenticatorOptions {
    #[builder(into)]
    pub issuer: Option<String>,
    #[builder(default)]
    pub audience: Vec<String>,
    #[builder(default = Duration::from_secs(60 * 60))]
    pub access_ttl: Duration,
    #[builder(default = Duration::from_secs(7 * 24 * 60 * 60))]
    pub refresh_ttl: Duration,
    #[builder(into, default = "HS256".to_string())]
    pub signing_method: String,
    #[builder(into)]
    pub signing_key: Option<String>,
    #[builder(into)]
    pub verification_key: Option<String>,
    #[builder(into, default = DEFAULT_TOKEN_LOOKUP.to_string())]
    pub token_lookup: String,
    #[builder(into, default = DEFAULT_TOKEN_HEAD.to_string())]
    pub token_head_name: String,
    #[builder(default)]
    pub enable_refresh: bool,
    #[builder(default)]
    pub enable_revocation: bool,
    pub claims_factory: Option<ClaimsFactory>,
    pub user_factory: Option<SecurityUserCreator>,
    pub token_store: Option<Arc<dyn TokenStore>>,
    pub oidc: Option<OidcOptions>,
    pub psk: Option<PskOptions>,
}

impl Default for AuthenticatorOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for AuthenticatorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatorOptions")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("signing_method", &self.signing_method)
            .field("signing_key", &self.signing_key.as_ref().map(|_| "<redacted>"))
            .field(
                "verification_key",
                &self.verification_key.as_ref().map(|_| "<redacted>"),
            )
            .field("token_lookup", &self.token_lookup)
            .field("token_head_name", &self.token_head_name)
            .field("enable_refresh", &self.enable_refresh)
            .field("enable_revocation", &self.enable_revocation)
            .field("claims_factory", &self.claims_factory.is_some())
            .field("user_factory", &self.user_factory.is_some())
            .field("token_store", &self.token_store.is_some())
            .field("oidc", &self.oidc)
            .field("psk", &self.psk)
            .finish()
    }
}

impl AuthenticatorOptions {
    /// Reads `AUTHN_*` variables. Unset variables keep their defaults.
    pub fn from_env() -> AuthnResult<Self> {
        let mut options = Self::default();

        options.issuer = env::var("AUTHN_ISSUER").ok();
        options.audience = env_list("AUTHN_AUDIENCE");
        if let Some(secs) = env_secs("AUTHN_ACCESS_TTL_SECS")? {
            options.access_ttl = secs;
        }
        if let Some(secs) = env_secs("AUTHN_REFRESH_TTL_SECS")? {
            options.refresh_ttl = secs;
        }
        if let Ok(method) = env::var("AUTHN_SIGNING_METHOD") {
            options.signing_method = method;
        }
        options.signing_key = env::var("AUTHN_SIGNING_KEY").ok();
        options.verification_key = env::var("AUTHN_VERIFICATION_KEY").ok();
        if let Ok(lookup) = env::var("AUTHN_TOKEN_LOOKUP") {
            options.token_lookup = lookup;
        }
        if let Ok(head) = env::var("AUTHN_TOKEN_HEAD") {
            options.token_head_name = head;
        }
        options.enable_refresh = env_flag("AUTHN_ENABLE_REFRESH");
        options.enable_revocation = env_flag("AUTHN_ENABLE_REVOCATION");

        if let Ok(issuer_url) = env::var("OIDC_ISSUER_URL") {
            let client_id = env::var("OIDC_CLIENT_ID")
                .map_err(|_| AuthnError::invalid_options("OIDC_CLIENT_ID must be set"))?;
            let mut oidc = OidcOptions::new(issuer_url, client_id);
            oidc.client_secret = env::var("OIDC_CLIENT_SECRET").ok();
            oidc.redirect_url = env::var("OIDC_REDIRECT_URL").ok();
            options.oidc = Some(oidc);
        }

        if let Ok(keys) = env::var("PSK_KEYS") {
            let mut psk = PskOptions::default();
            for pair in keys.split(',').filter(|p| !p.trim().is_empty()) {
                let (id, key) = pair.trim().split_once('=').ok_or_else(|| {
                    AuthnError::invalid_options(format!("PSK_KEYS entry {pair:?} is not id=key"))
                })?;
                psk.keys.insert(id.to_string(), key.to_string());
            }
            psk.default_key_id = env::var("PSK_DEFAULT_KEY_ID").ok();
            if let Ok(format) = env::var("PSK_FORMAT") {
                psk.format = format.parse()?;
            }
            if let Ok(hash) = env::var("PSK_HASH") {
                psk.hash = hash.parse()?;
            }
            if let Some(ttl) = env_secs("PSK_TOKEN_TTL_SECS")? {
                psk.token_expiration = ttl;
            }
            psk.allow_default_key_fallback = env_flag("PSK_ALLOW_DEFAULT_KEY_FALLBACK");
            options.psk = Some(psk);
        }

        Ok(options)
    }

    /// Falls back to the signing key for symmetric setups.
    pub fn verification_key(&self) -> Option<&str> {
        self.verification_key
            .as_deref()
            .or(self.signing_key.as_deref())
    }
}

fn env_list(name: &str) -> Vec<String> {
    env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn env_secs(name: &str) -> AuthnResult<Option<Duration>> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| AuthnError::invalid_options(format!("{name} must be whole seconds"))),
        Err(_) => Ok(None),
    }
}

#[derive(Debug, Clone)]
pub struct OidcOptions {
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_url: Option<String>,
    /// Audiences accepted besides the client id.
    pub extra_audiences: Vec<String>,
    pub http_timeout: Duration,
}

impl OidcOptions {
    pub fn new(issuer_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            issuer_url: issuer_url.into(),
            client_id: client_id.into(),
            client_secret: None,
            redirect_url: None,
            extra_audiences: Vec::new(),
            http_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PskFormat {
    /// `keyID:key`, or a bare key checked against the default key id.
    #[default]
    Basic,
    /// `keyID.unixTs.hexHMAC`.
    Hmac,
}

impl std::str::FromStr for PskFormat {
    type Err = AuthnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "hmac" => Ok(Self::Hmac),
            other => Err(AuthnError::invalid_options(format!(
                "unknown psk format {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PskHash {
    #[default]
    Sha256,
    Sha512,
}

impl std::str::FromStr for PskHash {
    type Err = AuthnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(AuthnError::invalid_options(format!(
                "unknown psk hash {other:?}"
            ))),
        }
    }
}

#[derive(Clone)]
pub struct PskOptions {
    pub keys: HashMap<String, String>,
    pub default_key_id: Option<String>,
    pub format: PskFormat,
    pub hash: PskHash,
    pub token_expiration: Duration,
    /// Verify unknown key ids against the default key instead of rejecting them.
    pub allow_default_key_fallback: bool,
}

impl Default for PskOptions {
    fn default() -> Self {
        Self {
            keys: HashMap::new(),
            default_key_id: None,
            format: PskFormat::Basic,
            hash: PskHash::Sha256,
            token_expiration: Duration::from_secs(60 * 60),
            allow_default_key_fallback: false,
        }
    }
}

impl fmt::Debug for PskOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&String> = self.keys.keys().collect();
        ids.sort();
        f.debug_struct("PskOptions")
            .field("key_ids", &ids)
            .field("default_key_id", &self.default_key_id)
            .field("format", &self.format)
            .field("hash", &self.hash)
            .field("token_expiration", &self.token_expiration)
            .field("allow_default_key_fallback", &self.allow_default_key_fallback)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let options = AuthenticatorOptions::builder().signing_key("secret").build();
        assert_eq!(options.signing_method, "HS256");
        assert_eq!(options.token_lookup, DEFAULT_TOKEN_LOOKUP);
        assert_eq!(options.token_head_name, "Bearer");
        assert_eq!(options.access_ttl, Duration::from_secs(3600));
        assert_eq!(options.verification_key(), Some("secret"));
        assert!(!options.enable_refresh);
    }

    #[test]
    fn debug_redacts_keys() {
        let options = AuthenticatorOptions::builder()
            .signing_key("super-secret")
            .psk(PskOptions {
                keys: HashMap::from([("svc".to_string(), "hunter2".to_string())]),
                ..PskOptions::default()
            })
            .build();
        let rendered = format!("{options:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("svc"));
    }

    #[test]
    fn parses_psk_enums() {
        assert_eq!("HMAC".parse::<PskFormat>().unwrap(), PskFormat::Hmac);
        assert_eq!("sha512".parse::<PskHash>().unwrap(), PskHash::Sha512);
        assert!("md5".parse::<PskHash>().is_err());
    }
}
