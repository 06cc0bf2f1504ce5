use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use auth_core::{AuthClaims, Lifecycle, TransportInfo};
use openidconnect::{
    AdditionalProviderMetadata, ClaimsVerificationError, ClientId, ClientSecret,
    EndpointMaybeSet, EndpointNotSet, EndpointSet, IssuerUrl, Nonce, OAuth2TokenResponse,
    ProviderMetadata, RedirectUrl, RefreshToken, RequestTokenError,
    core::{
        CoreAuthDisplay, CoreClaimName, CoreClaimType, CoreClient, CoreClientAuthMethod,
        CoreGrantType, CoreIdToken, CoreIdTokenClaims, CoreJsonWebKey,
        CoreJweContentEncryptionAlgorithm, CoreJweKeyManagementAlgorithm, CoreResponseMode,
        CoreResponseType, CoreSubjectIdentifierType,
    },
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::authenticator::Authenticator;
use crate::error::{AuthnError, AuthnErrorCode, AuthnResult};
use crate::options::{AuthenticatorOptions, OidcOptions};
use crate::token::TokenLookup;

const PROVIDER: &str = "oidc";

/// The concrete client type returned by `from_provider_metadata`
type DiscoveredClient = CoreClient<
    EndpointSet,      // HasAuthUrl
    EndpointNotSet,   // HasDeviceAuthUrl
    EndpointNotSet,   // HasIntrospectionUrl
    EndpointNotSet,   // HasRevocationUrl
    EndpointMaybeSet, // HasTokenUrl
    EndpointMaybeSet, // HasUserInfoUrl
>;

/// RFC 7009 `revocation_endpoint`, absent from the core discovery fields.
#[derive(Clone, Debug, Deserialize, Serialize)]
struct RevocationMetadata {
    revocation_endpoint: Option<String>,
}

impl AdditionalProviderMetadata for RevocationMetadata {}

type DiscoveredMetadata = ProviderMetadata<
    RevocationMetadata,
    CoreAuthDisplay,
    CoreClientAuthMethod,
    CoreClaimName,
    CoreClaimType,
    CoreGrantType,
    CoreJweContentEncryptionAlgorithm,
    CoreJweKeyManagementAlgorithm,
    CoreJsonWebKey,
    CoreResponseMode,
    CoreResponseType,
    CoreSubjectIdentifierType,
>;

struct OidcState {
    options: Arc<AuthenticatorOptions>,
    oidc: OidcOptions,
    client: DiscoveredClient,
    http: reqwest::Client,
    revocation_endpoint: Option<String>,
    lookup: TokenLookup,
}

/// Verifies ID tokens issued by an OpenID Connect provider found via discovery.
///
/// Tokens are never minted locally; `refresh_token` and `revoke_token` go to
/// the provider's token and revocation endpoints.
#[derive(Default)]
pub struct OidcAuthenticator {
    state: Lifecycle<OidcState>,
}

fn build_http_client(oidc: &OidcOptions) -> AuthnResult<reqwest::Client> {
    reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(oidc.http_timeout)
        .build()
        .map_err(|e| AuthnError::internal(format!("failed to build http client: {e}")))
}

fn map_claims_error(err: ClaimsVerificationError) -> AuthnError {
    match err {
        ClaimsVerificationError::Expired(_) => AuthnError::expired_token(),
        ClaimsVerificationError::SignatureVerification(e) => {
            AuthnError::invalid_signature().with_source(e)
        }
        ClaimsVerificationError::InvalidAudience(msg)
        | ClaimsVerificationError::InvalidIssuer(msg)
        | ClaimsVerificationError::InvalidSubject(msg) => AuthnError::invalid_claims(msg),
        other => AuthnError::invalid_token(format!("id token rejected: {other}")),
    }
}

fn flatten_claims(claims: &CoreIdTokenClaims) -> AuthClaims {
    let mut out = AuthClaims::new()
        .with_subject(claims.subject().as_str())
        .with_issuer(claims.issuer().as_str())
        .with_audience(claims.audiences().iter().map(|aud| aud.as_str()))
        .with_expiration(claims.expiration().timestamp());
    out.iat = Some(claims.issue_time().timestamp());

    if let Some(email) = claims.email() {
        out.set("email", Value::from(email.as_str()));
    }
    if let Some(verified) = claims.email_verified() {
        out.set("email_verified", Value::from(verified));
    }
    if let Some(username) = claims.preferred_username() {
        out.set("preferred_username", Value::from(username.as_str()));
    }
    if let Some(name) = claims.name().and_then(|localized| localized.get(None)) {
        out.set("name", Value::from(name.as_str()));
    }
    out
}

impl OidcAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> AuthnResult<Arc<OidcState>> {
        self.state
            .get()
            .map_err(|e| AuthnError::lifecycle(PROVIDER, e))
    }

    fn verify(&self, state: &OidcState, token: &str) -> AuthnResult<AuthClaims> {
        if token.is_empty() {
            return Err(AuthnError::missing_token());
        }
        let id_token = CoreIdToken::from_str(token)
            .map_err(|e| AuthnError::invalid_token("malformed id token").with_source(e))?;

        let accepted: Vec<String> = state
            .oidc
            .extra_audiences
            .iter()
            .chain(state.options.audience.iter())
            .cloned()
            .collect();
        let verifier = state
            .client
            .id_token_verifier()
            .set_other_audience_verifier_fn(move |aud| accepted.iter().any(|a| a == aud.as_str()));

        let claims = id_token
            .claims(&verifier, |_: Option<&Nonce>| Ok(()))
            .map_err(map_claims_error)?;
        Ok(flatten_claims(claims))
    }
}

#[async_trait]
impl Authenticator for OidcAuthenticator {
    async fn init(&self, options: AuthenticatorOptions) -> AuthnResult<()> {
        let oidc = options
            .oidc
            .clone()
            .ok_or_else(|| AuthnError::invalid_options("oidc section is required"))?;
        if oidc.client_id.is_empty() {
            return Err(AuthnError::invalid_options("oidc client id is required"));
        }
        let issuer_url = IssuerUrl::new(oidc.issuer_url.clone())
            .map_err(|e| AuthnError::invalid_options(format!("invalid issuer url: {e}")))?;
        let lookup = TokenLookup::parse(&options.token_lookup, &options.token_head_name)?;
        let http = build_http_client(&oidc)?;

        info!(provider = PROVIDER, issuer = %oidc.issuer_url, "Discovering OpenID Connect provider metadata");
        let metadata = DiscoveredMetadata::discover_async(issuer_url, &http)
            .await
            .map_err(|e| AuthnError::provider_unavailable(format!("oidc discovery failed: {e}")))?;
        let revocation_endpoint = metadata.additional_metadata().revocation_endpoint.clone();

        let mut client = CoreClient::from_provider_metadata(
            metadata,
            ClientId::new(oidc.client_id.clone()),
            oidc.client_secret.clone().map(ClientSecret::new),
        );
        if let Some(redirect) = &oidc.redirect_url {
            let redirect = RedirectUrl::new(redirect.clone())
                .map_err(|e| AuthnError::invalid_options(format!("invalid redirect url: {e}")))?;
            client = client.set_redirect_uri(redirect);
        }

        info!(
            provider = PROVIDER,
            revocation = revocation_endpoint.is_some(),
            "Initialized authenticator"
        );
        self.state
            .initialize(OidcState {
                options: Arc::new(options),
                oidc,
                client,
                http,
                revocation_endpoint,
                lookup,
            })
            .map_err(|e| AuthnError::lifecycle(PROVIDER, e))
    }

    async fn authenticate(&self, info: &TransportInfo) -> AuthnResult<AuthClaims> {
        let state = self.state()?;
        let token = state.lookup.extract(info)?;
        self.verify(&state, &token)
    }

    async fn validate_token(&self, token: &str) -> AuthnResult<AuthClaims> {
        let state = self.state()?;
        self.verify(&state, token).inspect_err(|e| {
            debug!(provider = PROVIDER, code = %e.code, "id token validation failed");
        })
    }

    async fn create_token(&self, _claims: &AuthClaims) -> AuthnResult<String> {
        self.state()?;
        Err(AuthnError::new(
            AuthnErrorCode::UnsupportedOperation,
            "oidc tokens are issued by the provider, use the authorization-code flow",
        ))
    }

    async fn refresh_token(&self, token: &str) -> AuthnResult<String> {
        let state = self.state()?;
        if token.is_empty() {
            return Err(AuthnError::missing_token());
        }
        let response = state
            .client
            .exchange_refresh_token(&RefreshToken::new(token.to_string()))
            .map_err(|e| AuthnError::unsupported(PROVIDER, "refresh_token").with_source(e))?
            .request_async(&state.http)
            .await
            .map_err(|e| match e {
                RequestTokenError::ServerResponse(response) => {
                    AuthnError::invalid_token(format!("refresh token rejected: {response}"))
                }
                other => {
                    AuthnError::provider_unavailable(format!("refresh token exchange failed: {other}"))
                }
            })?;
        Ok(response.access_token().secret().to_string())
    }

    async fn revoke_token(&self, token: &str) -> AuthnResult<bool> {
        let state = self.state()?;
        let endpoint = state
            .revocation_endpoint
            .as_deref()
            .ok_or_else(|| AuthnError::unsupported(PROVIDER, "revoke_token"))?;

        let mut form = vec![("token", token), ("token_type_hint", "refresh_token")];
        let mut request = state.http.post(endpoint);
        match &state.oidc.client_secret {
            Some(secret) => request = request.basic_auth(&state.oidc.client_id, Some(secret)),
            None => form.push(("client_id", state.oidc.client_id.as_str())),
        }
        let request = request.form(&form);
        let response = request.send().await.map_err(AuthnError::from_http)?;
        if !response.status().is_success() {
            return Err(AuthnError::provider_unavailable(format!(
                "revocation endpoint returned {}",
                response.status()
            )));
        }
        Ok(true)
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
