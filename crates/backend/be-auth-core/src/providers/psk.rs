use std::sync::Arc;

use async_trait::async_trait;
use auth_core::{AuthClaims, Lifecycle, TransportInfo};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};
use tracing::{debug, info};

use crate::authenticator::Authenticator;
use crate::error::{AuthnError, AuthnErrorCode, AuthnResult};
use crate::options::{AuthenticatorOptions, PskFormat, PskHash, PskOptions};
use crate::token::TokenLookup;

const PROVIDER: &str = "psk";
/// HMAC timestamps further than this in the future are not valid yet.
const FUTURE_SKEW_SECS: i64 = 60;
const BASIC_TAG_LABEL: &str = "psk-basic";

struct PskState {
    options: Arc<AuthenticatorOptions>,
    psk: PskOptions,
    ttl_secs: i64,
    lookup: TokenLookup,
}

impl PskState {
    /// Resolves `(matched key id, key)`. Unknown ids only resolve to the
    /// default key when fallback is enabled.
    fn key_for(&self, key_id: &str) -> AuthnResult<(&str, &str)> {
        if let Some((id, key)) = self.psk.keys.get_key_value(key_id) {
            return Ok((id, key));
        }
        if self.psk.allow_default_key_fallback
            && let Some((id, key)) = self
                .psk
                .default_key_id
                .as_ref()
                .and_then(|id| self.psk.keys.get_key_value(id))
        {
            return Ok((id, key));
        }
        Err(AuthnError::invalid_token(format!("unknown key id {key_id:?}")))
    }

    fn default_key_id(&self) -> AuthnResult<&str> {
        self.psk
            .default_key_id
            .as_deref()
            .ok_or_else(|| AuthnError::invalid_token("no key id in token and no default key"))
    }

    fn claims(&self, key_id: &str, issued_at: i64, expires_at: Option<i64>) -> AuthClaims {
        let mut claims = AuthClaims::new()
            .with_subject(key_id)
            .with_audience(self.options.audience.iter().cloned())
            .with_claim("auth_method", "psk")
            .with_claim("key_id", key_id);
        claims.iss.clone_from(&self.options.issuer);
        claims.iat = Some(issued_at);
        claims.exp = expires_at;
        claims
    }

    fn validate_basic(&self, token: &str, now: i64) -> AuthnResult<AuthClaims> {
        let decoded = if token.contains(':') {
            None
        } else {
            STANDARD
                .decode(token)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .filter(|s| s.contains(':'))
        };
        let credential = decoded.as_deref().unwrap_or(token);

        let (key_id, presented) = match credential.split_once(':') {
            Some((id, key)) => (id, key),
            None => (self.default_key_id()?, credential),
        };
        let (matched, expected) = self.key_for(key_id)?;
        // Constant-time: compare MACs keyed by each secret.
        let tag = sign_mac(PskHash::Sha256, expected, BASIC_TAG_LABEL)?;
        if !verify_mac(PskHash::Sha256, presented, BASIC_TAG_LABEL, &tag)? {
            return Err(AuthnError::invalid_token("invalid pre-shared key"));
        }
        Ok(self.claims(matched, now, None))
    }

    fn validate_hmac(&self, token: &str, now: i64) -> AuthnResult<AuthClaims> {
        let mut parts = token.rsplitn(3, '.');
        let (Some(signature), Some(timestamp), Some(key_id)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthnError::invalid_token("expected keyID.timestamp.signature"));
        };
        if key_id.is_empty() {
            return Err(AuthnError::invalid_token("empty key id"));
        }
        let issued_at: i64 = timestamp
            .parse()
            .map_err(|_| AuthnError::invalid_token("timestamp is not a unix time"))?;
        let signature = hex::decode(signature)
            .map_err(|e| AuthnError::invalid_token("signature is not hex").with_source(e))?;

        let (matched, key) = self.key_for(key_id)?;
        if !verify_mac(self.psk.hash, key, &signed_payload(key_id, issued_at), &signature)? {
            return Err(AuthnError::invalid_signature());
        }

        let expires_at = issued_at.saturating_add(self.ttl_secs);
        if now > expires_at {
            return Err(AuthnError::expired_token());
        }
        if issued_at > now.saturating_add(FUTURE_SKEW_SECS) {
            return Err(AuthnError::not_before());
        }
        Ok(self.claims(matched, issued_at, Some(expires_at)))
    }

    fn validate_at(&self, token: &str, now: i64) -> AuthnResult<AuthClaims> {
        if token.is_empty() {
            return Err(AuthnError::missing_token());
        }
        match self.psk.format {
            PskFormat::Basic => self.validate_basic(token, now),
            PskFormat::Hmac => self.validate_hmac(token, now),
        }
    }

    fn issue_hmac(&self, key_id: &str, now: i64) -> AuthnResult<String> {
        let key = self.psk.keys.get(key_id).ok_or_else(|| {
            AuthnError::invalid_claims(format!("no pre-shared key for {key_id:?}"))
        })?;
        let signature = sign_mac(self.psk.hash, key, &signed_payload(key_id, now))?;
        Ok(format!("{key_id}.{now}.{}", hex::encode(signature)))
    }
}

fn signed_payload(key_id: &str, timestamp: i64) -> String {
    format!("{key_id}.{timestamp}")
}

fn mac_error(e: hmac::digest::InvalidLength) -> AuthnError {
    AuthnError::internal(format!("hmac key rejected: {e}"))
}

fn sign_mac(hash: PskHash, key: &str, payload: &str) -> AuthnResult<Vec<u8>> {
    Ok(match hash {
        PskHash::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes()).map_err(mac_error)?;
            mac.update(payload.as_bytes());
            mac.finalize().into_bytes().to_vec()
        }
        PskHash::Sha512 => {
            let mut mac = Hmac::<Sha512>::new_from_slice(key.as_bytes()).map_err(mac_error)?;
            mac.update(payload.as_bytes());
            mac.finalize().into_bytes().to_vec()
        }
    })
}

fn verify_mac(hash: PskHash, key: &str, payload: &str, signature: &[u8]) -> AuthnResult<bool> {
    Ok(match hash {
        PskHash::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes()).map_err(mac_error)?;
            mac.update(payload.as_bytes());
            mac.verify_slice(signature).is_ok()
        }
        PskHash::Sha512 => {
            let mut mac = Hmac::<Sha512>::new_from_slice(key.as_bytes()).map_err(mac_error)?;
            mac.update(payload.as_bytes());
            mac.verify_slice(signature).is_ok()
        }
    })
}

/// Pre-shared key authentication for service-to-service calls.
#[derive(Default)]
pub struct PskAuthenticator {
    state: Lifecycle<PskState>,
}

impl PskAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> AuthnResult<Arc<PskState>> {
        self.state
            .get()
            .map_err(|e| AuthnError::lifecycle(PROVIDER, e))
    }

    /// Validates against an explicit clock (unix seconds).
    pub fn validate_at(&self, token: &str, now: i64) -> AuthnResult<AuthClaims> {
        self.state()?.validate_at(token, now)
    }
}

#[async_trait]
impl Authenticator for PskAuthenticator {
    async fn init(&self, options: AuthenticatorOptions) -> AuthnResult<()> {
        let psk = options
            .psk
            .clone()
            .ok_or_else(|| AuthnError::invalid_options("psk section is required"))?;
        if psk.keys.is_empty() {
            return Err(AuthnError::invalid_options("at least one pre-shared key is required"));
        }
        if psk.keys.values().any(String::is_empty) {
            return Err(AuthnError::invalid_options("pre-shared keys must not be empty"));
        }
        if let Some(default) = &psk.default_key_id {
            if !psk.keys.contains_key(default) {
                return Err(AuthnError::invalid_options(format!(
                    "default key id {default:?} has no key"
                )));
            }
        }
        let ttl_secs = i64::try_from(psk.token_expiration.as_secs())
            .map_err(|_| AuthnError::invalid_options("psk token expiration is too large"))?;
        let lookup = TokenLookup::parse(&options.token_lookup, &options.token_head_name)?;

        info!(
            provider = PROVIDER,
            keys = psk.keys.len(),
            format = ?psk.format,
            fallback = psk.allow_default_key_fallback,
            "Initialized authenticator"
        );
        self.state
            .initialize(PskState {
                options: Arc::new(options),
                psk,
                ttl_secs,
                lookup,
            })
            .map_err(|e| AuthnError::lifecycle(PROVIDER, e))
    }

    async fn authenticate(&self, info: &TransportInfo) -> AuthnResult<AuthClaims> {
        let state = self.state()?;
        let token = state.lookup.extract(info)?;
        state.validate_at(&token, Utc::now().timestamp())
    }

    async fn validate_token(&self, token: &str) -> AuthnResult<AuthClaims> {
        self.validate_at(token, Utc::now().timestamp())
            .inspect_err(|e| debug!(provider = PROVIDER, code = %e.code, "psk validation failed"))
    }

    async fn create_token(&self, claims: &AuthClaims) -> AuthnResult<String> {
        let state = self.state()?;
        let key_id = match claims.subject() {
            Some(sub) => sub,
            None => state
                .psk
                .default_key_id
                .as_deref()
                .ok_or_else(|| AuthnError::invalid_claims("subject must name a key id"))?,
        };
        match state.psk.format {
            PskFormat::Basic => {
                let key = state.psk.keys.get(key_id).ok_or_else(|| {
                    AuthnError::invalid_claims(format!("no pre-shared key for {key_id:?}"))
                })?;
                Ok(format!("{key_id}:{key}"))
            }
            PskFormat::Hmac => state.issue_hmac(key_id, Utc::now().timestamp()),
        }
    }

    async fn refresh_token(&self, token: &str) -> AuthnResult<String> {
        let state = self.state()?;
        if state.psk.format != PskFormat::Hmac {
            return Err(AuthnError::unsupported(PROVIDER, "refresh_token"));
        }
        let now = Utc::now().timestamp();
        let claims = state.validate_at(token, now)?;
        let key_id = claims
            .subject()
            .ok_or_else(|| AuthnError::internal("validated psk claims carry no subject"))?;
        state.issue_hmac(key_id, now)
    }

    async fn revoke_token(&self, _token: &str) -> AuthnResult<bool> {
        self.state()?;
        Err(AuthnError::unsupported(PROVIDER, "revoke_token"))
    }

    async fn close(&self) -> AuthnResult<()> {
        if self.state.close().is_some() {
            info!(provider = PROVIDER, "Closed authenticator");
        }
        Ok(())
    }

    fn options(&self) -> Option<Arc<AuthenticatorOptions>> {
        self.state.get().ok().map(|s| Arc::clone(&s.options))
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn psk_options(format: PskFormat, fallback: bool) -> AuthenticatorOptions {
        AuthenticatorOptions::builder()
            .issuer("psk-issuer")
            .psk(PskOptions {
                keys: HashMap::from([
                    ("billing".to_string(), "billing-key".to_string()),
                    ("default".to_string(), "default-key".to_string()),
                ]),
                default_key_id: Some("default".to_string()),
                format,
                hash: PskHash::Sha256,
                token_expiration: Duration::from_secs(300),
                allow_default_key_fallback: fallback,
            })
            .build()
    }

    async fn authenticator(format: PskFormat, fallback: bool) -> PskAuthenticator {
        let authn = PskAuthenticator::new();
        authn.init(psk_options(format, fallback)).await.unwrap();
        authn
    }

    fn hmac_token(key_id: &str, key: &str, ts: i64) -> String {
        let sig = sign_mac(PskHash::Sha256, key, &signed_payload(key_id, ts)).unwrap();
        format!("{key_id}.{ts}.{}", hex::encode(sig))
    }

    #[tokio::test]
    async fn basic_tokens() {
        let authn = authenticator(PskFormat::Basic, false).await;

        let claims = authn.validate_token("billing:billing-key").await.unwrap();
        assert_eq!(claims.subject(), Some("billing"));
        assert_eq!(claims.issuer(), Some("psk-issuer"));
        assert_eq!(claims.get_str("auth_method"), Some("psk"));

        let bare = authn.validate_token("default-key").await.unwrap();
        assert_eq!(bare.subject(), Some("default"));

        let encoded = STANDARD.encode("billing:billing-key");
        assert!(authn.validate_token(&encoded).await.is_ok());

        let err = authn.validate_token("billing:wrong").await.unwrap_err();
        assert_eq!(err.code(), AuthnErrorCode::InvalidToken);
        let err = authn.validate_token("billing:billing-ke").await.unwrap_err();
        assert_eq!(err.code(), AuthnErrorCode::InvalidToken);
        let err = authn.validate_token("billing:billing-keyy").await.unwrap_err();
        assert_eq!(err.code(), AuthnErrorCode::InvalidToken);
    }

    #[tokio::test]
    async fn unknown_key_id_falls_back_only_when_enabled() {
        let strict = authenticator(PskFormat::Basic, false).await;
        assert_eq!(
            strict
                .validate_token("stranger:default-key")
                .await
                .unwrap_err()
                .code(),
            AuthnErrorCode::InvalidToken
        );

        let lenient = authenticator(PskFormat::Basic, true).await;
        let claims = lenient.validate_token("stranger:default-key").await.unwrap();
        assert_eq!(claims.subject(), Some("default"));
        assert_eq!(claims.get_str("key_id"), Some("default"));

        let err = lenient
            .validate_token("stranger:billing-key")
            .await
            .unwrap_err();
        assert_eq!(err.code(), AuthnErrorCode::InvalidToken);

        let lenient = authenticator(PskFormat::Hmac, true).await;
        let ts = 1_700_000_000;
        let claims = lenient
            .validate_at(&hmac_token("stranger", "default-key", ts), ts)
            .unwrap();
        assert_eq!(claims.subject(), Some("default"));
    }

    #[tokio::test]
    async fn hmac_ttl_boundary() {
        let authn = authenticator(PskFormat::Hmac, false).await;
        let ts = 1_700_000_000;
        let token = hmac_token("billing", "billing-key", ts);

        let claims = authn.validate_at(&token, ts + 300).unwrap();
        assert_eq!(claims.exp, Some(ts + 300));
        assert_eq!(claims.iat, Some(ts));

        let err = authn.validate_at(&token, ts + 301).unwrap_err();
        assert_eq!(err.code(), AuthnErrorCode::ExpiredToken);

        let err = authn.validate_at(&token, ts - 120).unwrap_err();
        assert_eq!(err.code(), AuthnErrorCode::NotBeforeTime);
    }

    #[tokio::test]
    async fn hmac_rejects_tampering() {
        let authn = authenticator(PskFormat::Hmac, false).await;
        let ts = 1_700_000_000;

        let wrong_key = hmac_token("billing", "not-the-key", ts);
        assert_eq!(
            authn.validate_at(&wrong_key, ts).unwrap_err().code(),
            AuthnErrorCode::InvalidSignature
        );

        let token = hmac_token("billing", "billing-key", ts);
        let shifted = token.replacen(&ts.to_string(), &(ts + 1).to_string(), 1);
        assert_eq!(
            authn.validate_at(&shifted, ts).unwrap_err().code(),
            AuthnErrorCode::InvalidSignature
        );

        for malformed in ["billing", "billing.abc.00", "billing.1.zz"] {
            assert_eq!(
                authn.validate_at(malformed, ts).unwrap_err().code(),
                AuthnErrorCode::InvalidToken
            );
        }
    }

    #[tokio::test]
    async fn create_and_refresh_hmac() {
        let authn = authenticator(PskFormat::Hmac, false).await;
        let token = authn
            .create_token(&AuthClaims::new().with_subject("billing"))
            .await
            .unwrap();
        assert!(token.starts_with("billing."));
        assert_eq!(
            authn.validate_token(&token).await.unwrap().subject(),
            Some("billing")
        );

        let refreshed = authn.refresh_token(&token).await.unwrap();
        assert!(authn.validate_token(&refreshed).await.is_ok());

        assert_eq!(
            authn.revoke_token(&token).await.unwrap_err().code(),
            AuthnErrorCode::UnsupportedOperation
        );
    }

    #[tokio::test]
    async fn basic_create_and_unsupported_refresh() {
        let authn = authenticator(PskFormat::Basic, false).await;
        let token = authn.create_token(&AuthClaims::new()).await.unwrap();
        assert_eq!(token, "default:default-key");
        assert_eq!(
            authn.refresh_token(&token).await.unwrap_err().code(),
            AuthnErrorCode::UnsupportedOperation
        );
    }

    #[tokio::test]
    async fn init_validates_keys() {
        let authn = PskAuthenticator::new();
        let err = authn
            .init(
                AuthenticatorOptions::builder()
                    .psk(PskOptions::default())
                    .build(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), AuthnErrorCode::InvalidOptions);

        let err = authn
            .init(
                AuthenticatorOptions::builder()
                    .psk(PskOptions {
                        keys: HashMap::from([("a".to_string(), "k".to_string())]),
                        default_key_id: Some("missing".to_string()),
                        ..PskOptions::default()
                    })
                    .build(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), AuthnErrorCode::InvalidOptions);
    }
}
