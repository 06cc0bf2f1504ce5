use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use auth_core::{
    AuthClaims, AuthContext, AuthzTuple, DefaultSecurityUser, SecurityUserCreator, TransportInfo,
    TransportKind, authz_tuple_from, claims_from, inject_authz_result, inject_authz_tuple,
    inject_claims, inject_security_user,
};
use be_auth_core::{AuthnError, AuthnErrorCode, AuthnResult, Authenticator, TokenLookup};
use be_authz::{Authorizer, AuthzError, AuthzErrorCode};
use bon::bon;
use http::Extensions;
use tracing::{debug, warn};

use crate::error::{AuthFailure, PipelineError};
use crate::skip::SkipRules;

/// Pulls the raw credential off an inbound call.
pub type TokenExtractor = Arc<dyn Fn(&TransportInfo) -> AuthnResult<String> + Send + Sync>;

/// Builds the authorization tuple for an authenticated call.
pub type TupleExtractor = Arc<dyn Fn(&AuthClaims, &TransportInfo) -> AuthzTuple + Send + Sync>;

/// Cookie and query parameter HTTP callers may carry the token in.
pub const TOKEN_PARAM: &str = "token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineMode {
    /// Validate the token and attach claims and user.
    Authn,
    /// Enforce on claims an earlier layer attached.
    Authz,
    #[default]
    Combined,
}

/// Token extraction, authentication, user construction and enforcement,
/// shared by the gRPC layer and the axum middleware.
pub struct AuthPipeline {
    mode: PipelineMode,
    authenticator: Option<Arc<dyn Authenticator>>,
    authorizer: Option<Arc<dyn Authorizer>>,
    token_extractor: TokenExtractor,
    tuple_extractor: Option<TupleExtractor>,
    user_creator: SecurityUserCreator,
    skip: SkipRules,
    skip_roles: HashSet<String>,
    default_domain: String,
    call_timeout: Option<Duration>,
}

#[bon]
impl AuthPipeline {
    #[builder]
    pub fn new(
        #[builder(default)] mode: PipelineMode,
        authenticator: Option<Arc<dyn Authenticator>>,
        authorizer: Option<Arc<dyn Authorizer>>,
        token_extractor: Option<TokenExtractor>,
        tuple_extractor: Option<TupleExtractor>,
        user_creator: Option<SecurityUserCreator>,
        #[builder(default)] skip: SkipRules,
        #[builder(default)] skip_roles: Vec<String>,
        #[builder(into, default)] default_domain: String,
        call_timeout: Option<Duration>,
    ) -> Result<Self, PipelineError> {
        if mode != PipelineMode::Authz && authenticator.is_none() {
            return Err(PipelineError::MissingAuthenticator(mode));
        }
        if mode != PipelineMode::Authn && authorizer.is_none() {
            return Err(PipelineError::MissingAuthorizer(mode));
        }
        let token_extractor = match token_extractor {
            Some(extractor) => extractor,
            None => default_token_extractor(authenticator.as_deref())?,
        };
        Ok(Self {
            mode,
            authenticator,
            authorizer,
            token_extractor,
            tuple_extractor,
            user_creator: user_creator.unwrap_or_else(DefaultSecurityUser::creator),
            skip,
            skip_roles: skip_roles.into_iter().collect(),
            default_domain,
            call_timeout,
        })
    }
}

/// The authenticator's configured lookup, then the `token` cookie and query
/// parameter for HTTP callers.
fn default_token_extractor(
    authenticator: Option<&dyn Authenticator>,
) -> Result<TokenExtractor, PipelineError> {
    let lookup = match authenticator.and_then(|a| a.options()) {
        Some(options) => TokenLookup::parse(&options.token_lookup, &options.token_head_name)?,
        None => TokenLookup::default(),
    };
    Ok(Arc::new(move |info: &TransportInfo| {
        lookup.extract(info).or_else(|err| {
            if info.kind != TransportKind::Http {
                return Err(err);
            }
            info.cookie(TOKEN_PARAM)
                .or_else(|| info.query_param(TOKEN_PARAM))
                .map(str::to_owned)
                .ok_or(err)
        })
    }))
}

async fn within<T, E>(
    limit: Option<Duration>,
    call: impl Future<Output = Result<T, E>>,
    on_timeout: impl FnOnce() -> E,
) -> Result<T, E> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .unwrap_or_else(|_| Err(on_timeout())),
        None => call.await,
    }
}

impl AuthPipeline {
    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    pub fn skip_rules(&self) -> &SkipRules {
        &self.skip
    }

    /// Runs the stages enabled by the mode and records their results in
    /// `extensions`. `deadline` is the caller's remaining budget, if it sent one.
    pub async fn process(
        &self,
        info: &TransportInfo,
        extensions: &mut Extensions,
        deadline: Option<Duration>,
    ) -> Result<(), AuthFailure> {
        if self.skip.skips(info) {
            debug!(operation = %info.operation, "Skipping auth for public route");
            return Ok(());
        }

        let limit = match (self.call_timeout, deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        if self.mode != PipelineMode::Authz {
            self.authenticate(info, extensions, limit).await?;
        }
        if self.mode != PipelineMode::Authn {
            self.authorize(info, extensions, limit).await?;
        }

        let context = AuthContext::from_extensions(extensions);
        extensions.insert(context);
        Ok(())
    }

    async fn authenticate(
        &self,
        info: &TransportInfo,
        extensions: &mut Extensions,
        limit: Option<Duration>,
    ) -> Result<(), AuthFailure> {
        let authenticator = self
            .authenticator
            .as_ref()
            .ok_or(AuthFailure::unauthenticated("unauthorized"))?;

        let token = (self.token_extractor)(info).map_err(|e| {
            debug!(operation = %info.operation, error = %e, "No credential on request");
            AuthFailure::from_authn(&e)
        })?;

        let claims = within(limit, authenticator.validate_token(&token), || {
            AuthnError::new(AuthnErrorCode::Timeout, "token validation timed out")
        })
        .await
        .map_err(|e| {
            warn!(
                provider = authenticator.name(),
                operation = %info.operation,
                code = %e.code(),
                error = %e,
                "Authentication failed"
            );
            AuthFailure::from_authn(&e)
        })?;

        let claims = Arc::new(claims);
        inject_claims(extensions, Arc::clone(&claims));

        let mut user = (self.user_creator)(&claims);
        user.parse_from_request(info).map_err(|e| {
            warn!(operation = %info.operation, error = %e, "Failed to build security user");
            AuthFailure::unauthenticated("unauthorized")
        })?;
        debug!(subject = %user.subject(), operation = %info.operation, "Authenticated");
        inject_security_user(extensions, Arc::from(user));
        Ok(())
    }

    async fn authorize(
        &self,
        info: &TransportInfo,
        extensions: &mut Extensions,
        limit: Option<Duration>,
    ) -> Result<(), AuthFailure> {
        let authorizer = self
            .authorizer
            .as_ref()
            .ok_or(AuthFailure::forbidden("forbidden"))?;
        let claims = claims_from(extensions);

        if let Some(role) = claims.as_deref().and_then(|c| self.bypass_role(c)) {
            debug!(role = %role, operation = %info.operation, "Skipping authorization for role");
            inject_authz_result(extensions, true);
            return Ok(());
        }

        let tuple = match authz_tuple_from(extensions) {
            Some(tuple) => tuple,
            None => {
                let claims = claims.ok_or_else(|| {
                    warn!(operation = %info.operation, "No claims to authorize");
                    AuthFailure::unauthenticated("unauthorized")
                })?;
                let tuple = self.tuple(&claims, info);
                inject_authz_tuple(extensions, tuple.clone());
                tuple
            }
        };

        let decision = within(
            limit,
            authorizer.enforce(&tuple.subject, &tuple.object, &tuple.action, &tuple.domain),
            || AuthzError::new(AuthzErrorCode::Timeout, "authorization timed out"),
        )
        .await;

        match decision {
            Ok(()) => {
                debug!(%tuple, "Authorized");
                inject_authz_result(extensions, true);
                Ok(())
            }
            Err(e) => {
                warn!(
                    authorizer = authorizer.name(),
                    %tuple,
                    code = %e.code(),
                    error = %e,
                    "Authorization denied"
                );
                Err(AuthFailure::from_authz(&e))
            }
        }
    }

    fn bypass_role(&self, claims: &AuthClaims) -> Option<String> {
        if self.skip_roles.is_empty() {
            return None;
        }
        claims
            .roles()
            .into_iter()
            .find(|role| self.skip_roles.contains(role))
    }

    fn tuple(&self, claims: &AuthClaims, info: &TransportInfo) -> AuthzTuple {
        if let Some(extract) = &self.tuple_extractor {
            return extract(claims, info);
        }
        AuthzTuple::new(
            claims.subject().unwrap_or_default(),
            info.operation.as_str(),
            info.method.as_str(),
            claims.issuer().unwrap_or(self.default_domain.as_str()),
        )
    }
}
