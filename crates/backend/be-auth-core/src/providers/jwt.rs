use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use auth_core::{AuthClaims, CLAIM_REFRESH_EXP, Lifecycle, TransportInfo};
use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
    errors::{Error as JwtError, ErrorKind},
};
use tracing::{debug, info, warn};

use crate::authenticator::Authenticator;
use crate::error::{AuthnError, AuthnErrorCode, AuthnResult};
use crate::options::AuthenticatorOptions;
use crate::store::revocation_key;
use crate::token::TokenLookup;

const PROVIDER: &str = "jwt";

struct JwtState {
    options: Arc<AuthenticatorOptions>,
    algorithm: Algorithm,
    /// `None` for verify-only setups holding just a public key.
    encoding_key: Option<EncodingKey>,
    decoding_key: DecodingKey,
    validation: Validation,
    lookup: TokenLookup,
}

/// Signs and verifies compact JWS tokens with a key resolved at init.
#[derive(Default)]
pub struct JwtAuthenticator {
    state: Lifecycle<JwtState>,
}

impl JwtAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> AuthnResult<Arc<JwtState>> {
        self.state
            .get()
            .map_err(|e| AuthnError::lifecycle(PROVIDER, e))
    }

    /// Verifies signature and registered claims, then the revocation list.
    async fn verify(&self, state: &JwtState, token: &str, check_exp: bool) -> AuthnResult<AuthClaims> {
        let claims = decode_claims(state, token, check_exp)?;

        if state.options.enable_revocation {
            if let Some(store) = &state.options.token_store {
                let key = revocation_key(claims.id(), token);
                if store.get(&key).await?.is_some() {
                    return Err(AuthnError::new(
                        AuthnErrorCode::RevokedToken,
                        "token has been revoked",
                    ));
                }
            }
        }
        Ok(claims)
    }

    fn sign(&self, state: &JwtState, claims: &AuthClaims) -> AuthnResult<String> {
        let key = state.encoding_key.as_ref().ok_or_else(|| {
            AuthnError::new(
                AuthnErrorCode::SignTokenFailed,
                "no signing key configured for token creation",
            )
        })?;
        encode(&Header::new(state.algorithm), claims, key).map_err(|e| {
            AuthnError::new(AuthnErrorCode::SignTokenFailed, "failed to sign token").with_source(e)
        })
    }
}

fn decode_claims(state: &JwtState, token: &str, check_exp: bool) -> AuthnResult<AuthClaims> {
    let mut validation = state.validation.clone();
    validation.validate_exp = check_exp;
    decode::<AuthClaims>(token, &state.decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(map_jwt_error)
}

fn parse_algorithm(name: &str) -> AuthnResult<Algorithm> {
    let algorithm = match name {
        "HS256" => Algorithm::HS256,
        "HS384" => Algorithm::HS384,
        "HS512" => Algorithm::HS512,
        "RS256" => Algorithm::RS256,
        "RS384" => Algorithm::RS384,
        "RS512" => Algorithm::RS512,
        "PS256" => Algorithm::PS256,
        "PS384" => Algorithm::PS384,
        "PS512" => Algorithm::PS512,
        "ES256" => Algorithm::ES256,
        "ES384" => Algorithm::ES384,
        "EdDSA" => Algorithm::EdDSA,
        other => {
            return Err(AuthnError::new(
                AuthnErrorCode::UnsupportedSigningMethod,
                format!("unsupported signing method {other:?}"),
            ));
        }
    };
    Ok(algorithm)
}

fn key_error(which: &str, err: JwtError) -> AuthnError {
    AuthnError::invalid_options(format!("{which} key is not valid for the signing method"))
        .with_source(err)
}

fn load_keys(
    algorithm: Algorithm,
    options: &AuthenticatorOptions,
) -> AuthnResult<(Option<EncodingKey>, DecodingKey)> {
    match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            let secret = options
                .signing_key
                .as_deref()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| AuthnError::invalid_options("HMAC signing requires a signing key"))?;
            let verify = options.verification_key().unwrap_or(secret);
            Ok((
                Some(EncodingKey::from_secret(secret.as_bytes())),
                DecodingKey::from_secret(verify.as_bytes()),
            ))
        }
        _ => {
            let public = options
                .verification_key
                .as_deref()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| {
                    AuthnError::invalid_options(
                        "asymmetric signing methods require a verification (public) key",
                    )
                })?;
            let private = options.signing_key.as_deref().filter(|k| !k.is_empty());

            let (encoding, decoding) = match algorithm {
                Algorithm::ES256 | Algorithm::ES384 => (
                    private
                        .map(|pem| EncodingKey::from_ec_pem(pem.as_bytes()))
                        .transpose()
                        .map_err(|e| key_error("signing", e))?,
                    DecodingKey::from_ec_pem(public.as_bytes())
                        .map_err(|e| key_error("verification", e))?,
                ),
                Algorithm::EdDSA => (
                    private
                        .map(|pem| EncodingKey::from_ed_pem(pem.as_bytes()))
                        .transpose()
                        .map_err(|e| key_error("signing", e))?,
                    DecodingKey::from_ed_pem(public.as_bytes())
                        .map_err(|e| key_error("verification", e))?,
                ),
                _ => (
                    private
                        .map(|pem| EncodingKey::from_rsa_pem(pem.as_bytes()))
                        .transpose()
                        .map_err(|e| key_error("signing", e))?,
                    DecodingKey::from_rsa_pem(public.as_bytes())
                        .map_err(|e| key_error("verification", e))?,
                ),
            };
            Ok((encoding, decoding))
        }
    }
}

fn build_validation(algorithm: Algorithm, options: &AuthenticatorOptions) -> Validation {
    let mut validation = Validation::new(algorithm);
    validation.leeway = 0;
    validation.validate_nbf = true;
    if let Some(issuer) = options.issuer.as_deref() {
        validation.set_issuer(&[issuer]);
    }
    if options.audience.is_empty() {
        validation.validate_aud = false;
    } else {
        validation.set_audience(options.audience.as_slice());
    }
    validation
}

pub(crate) fn map_jwt_error(err: JwtError) -> AuthnError {
    let code = match err.kind() {
        ErrorKind::ExpiredSignature => AuthnErrorCode::ExpiredToken,
        ErrorKind::ImmatureSignature => AuthnErrorCode::NotBeforeTime,
        ErrorKind::InvalidSignature => AuthnErrorCode::InvalidSignature,
        ErrorKind::InvalidIssuer
        | ErrorKind::InvalidAudience
        | ErrorKind::InvalidSubject
        | ErrorKind::MissingRequiredClaim(_) => AuthnErrorCode::InvalidClaims,
        _ => AuthnErrorCode::InvalidToken,
    };
    let message = match code {
        AuthnErrorCode::ExpiredToken => "token has expired".to_string(),
        AuthnErrorCode::NotBeforeTime => "token is not valid yet".to_string(),
        AuthnErrorCode::InvalidSignature => "token signature is invalid".to_string(),
        _ => format!("token rejected: {err}"),
    };
    AuthnError::new(code, message).with_source(err)
}

fn secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn init(&self, options: AuthenticatorOptions) -> AuthnResult<()> {
        let algorithm = parse_algorithm(&options.signing_method)?;
        let (encoding_key, decoding_key) = load_keys(algorithm, &options)?;
        let validation = build_validation(algorithm, &options);
        let lookup = TokenLookup::parse(&options.token_lookup, &options.token_head_name)?;
        if (options.enable_revocation || options.enable_refresh) && options.token_store.is_none() {
            debug!(provider = PROVIDER, "no token store configured, revocation checks are skipped");
        }

        info!(
            provider = PROVIDER,
            algorithm = ?algorithm,
            issuer = options.issuer.as_deref().unwrap_or(""),
            refresh = options.enable_refresh,
            revocation = options.enable_revocation,
            "Initialized authenticator"
        );
        self.state
            .initialize(JwtState {
                options: Arc::new(options),
                algorithm,
                encoding_key,
                decoding_key,
                validation,
                lookup,
            })
            .map_err(|e| AuthnError::lifecycle(PROVIDER, e))
    }

    async fn authenticate(&self, info: &TransportInfo) -> AuthnResult<AuthClaims> {
        let state = self.state()?;
        let token = state.lookup.extract(info)?;
        self.verify(&state, &token, true).await
    }

    async fn validate_token(&self, token: &str) -> AuthnResult<AuthClaims> {
        let state = self.state()?;
        if token.is_empty() {
            return Err(AuthnError::missing_token());
        }
        self.verify(&state, token, true).await.inspect_err(|e| {
            debug!(provider = PROVIDER, code = %e.code, "token validation failed");
        })
    }

    /// `iat` is always stamped. A caller-supplied `exp` overrides the access
    /// TTL, so callers can mint short-lived or already-expired tokens.
    async fn create_token(&self, claims: &AuthClaims) -> AuthnResult<String> {
        let state = self.state()?;
        let options = &state.options;

        let mut claims = claims.clone();
        if let Some(factory) = &options.claims_factory {
            claims.merge_missing(&factory());
        }
        if claims.iss.is_none() {
            claims.iss.clone_from(&options.issuer);
        }
        if claims.aud.is_empty() {
            claims.aud.clone_from(&options.audience);
        }

        let now = Utc::now().timestamp();
        claims.iat = Some(now);
        if claims.exp.is_none() {
            claims.exp = Some(now.saturating_add(secs(options.access_ttl)));
        }
        if options.enable_refresh && claims.get_i64(CLAIM_REFRESH_EXP).is_none() {
            claims.set(
                CLAIM_REFRESH_EXP,
                now.saturating_add(secs(options.refresh_ttl)).into(),
            );
        }
        if options.enable_revocation && claims.jti.is_none() {
            claims.jti = Some(uuid::Uuid::new_v4().to_string());
        }

        self.sign(&state, &claims)
    }

    async fn refresh_token(&self, token: &str) -> AuthnResult<String> {
        let state = self.state()?;
        let options = &state.options;
        if !options.enable_refresh {
            return Err(AuthnError::unsupported(PROVIDER, "refresh_token"));
        }

        let mut claims = self.verify(&state, token, false).await?;
        let now = Utc::now().timestamp();
        match claims.get_i64(CLAIM_REFRESH_EXP) {
            Some(refresh_exp) if now <= refresh_exp => {}
            Some(_) => {
                return Err(AuthnError::new(
                    AuthnErrorCode::ExpiredToken,
                    "refresh window has expired",
                ));
            }
            None => {
                return Err(AuthnError::invalid_claims("token carries no refresh window"));
            }
        }

        claims.iat = Some(now);
        claims.exp = Some(now.saturating_add(secs(options.access_ttl)));
        if options.enable_revocation {
            claims.jti = Some(uuid::Uuid::new_v4().to_string());
        }
        debug!(provider = PROVIDER, subject = claims.subject().unwrap_or(""), "refreshed token");
        self.sign(&state, &claims)
    }

    async fn revoke_token(&self, token: &str) -> AuthnResult<bool> {
        let state = self.state()?;
        let options = &state.options;
        if !options.enable_revocation {
            return Err(AuthnError::unsupported(PROVIDER, "revoke_token"));
        }
        let store = options.token_store.as_ref().ok_or_else(|| {
            AuthnError::invalid_options("revocation is enabled but no token store is configured")
        })?;

        let claims = decode_claims(&state, token, false)?;

        let now = Utc::now().timestamp();
        let remaining = claims.exp.map_or(0, |exp| exp - now);
        if claims.exp.is_some() && remaining <= 0 {
            return Ok(true);
        }
        let ttl = (remaining > 0).then(|| Duration::from_secs(remaining.unsigned_abs()));
        store
            .set(&revocation_key(claims.id(), token), "1", ttl)
            .await?;
        info!(provider = PROVIDER, jti = claims.id().unwrap_or(""), "Revoked token");
        Ok(true)
    }

    async fn close(&self) -> AuthnResult<()> {
        if self.state.close().is_some() {
            info!(provider = PROVIDER, "Closed authenticator");
        } else {
            warn!(provider = PROVIDER, "close called on an authenticator that was not running");
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
