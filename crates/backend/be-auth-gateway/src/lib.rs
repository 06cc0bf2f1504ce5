mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use be_auth_core::{
    Authenticator, AuthnErrorCode, DEFAULT_TOKEN_HEAD, new_authenticator, strip_scheme,
};
use be_auth_middleware::{
    AuthPipeline, Authenticated, GrpcAuthLayer, PipelineMode, auth_middleware,
};
use be_authz::{Authorizer, new_authorizer};
use serde_json::json;
use tonic::transport::Server;
use tonic_web::GrpcWebLayer;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

pub use config::{ConfigError, GatewayConfig, parse_mode};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Providers and the pipeline built from them.
#[derive(Clone)]
pub struct Gateway {
    pub authenticator: Arc<dyn Authenticator>,
    /// Absent in authentication-only mode.
    pub authorizer: Option<Arc<dyn Authorizer>>,
    pub pipeline: Arc<AuthPipeline>,
}

impl Gateway {
    pub async fn from_config(config: &GatewayConfig) -> Result<Self, BoxError> {
        let authenticator = new_authenticator(config.authenticator, config.authn.clone()).await?;
        let authorizer = match config.mode {
            PipelineMode::Authn => None,
            _ => Some(new_authorizer(config.authz.clone()).await?),
        };
        let pipeline = AuthPipeline::builder()
            .mode(config.mode)
            .authenticator(Arc::clone(&authenticator))
            .maybe_authorizer(authorizer.clone())
            .skip(config.skip.clone())
            .skip_roles(config.skip_roles.clone())
            .default_domain(config.default_domain.clone())
            .maybe_call_timeout(config.call_timeout)
            .build()?;

        tracing::info!(
            authenticator = authenticator.name(),
            authorizer = authorizer.as_ref().map_or("none", |a| a.name()),
            mode = ?config.mode,
            "Auth pipeline ready"
        );
        Ok(Self {
            authenticator,
            authorizer,
            pipeline: Arc::new(pipeline),
        })
    }

    /// HTTP routes guarded by the pipeline. `/health` is always public.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(|| async { StatusCode::OK }))
            .route("/v1/me", get(me))
            .route("/v1/logout", post(logout))
            .with_state(Arc::clone(&self.authenticator))
            .layer(axum::middleware::from_fn_with_state(
                Arc::clone(&self.pipeline),
                auth_middleware,
            ))
    }

    /// Best effort: failures are logged.
    pub async fn close(&self) {
        if let Err(e) = self.authenticator.close().await {
            tracing::warn!(error = %e, "Failed to close authenticator");
        }
        if let Some(authorizer) = &self.authorizer
            && let Err(e) = authorizer.close().await
        {
            tracing::warn!(error = %e, "Failed to close authorizer");
        }
    }
}

async fn me(Authenticated(ctx): Authenticated) -> Json<serde_json::Value> {
    let claims = ctx.claims.as_deref();
    Json(json!({
        "subject": ctx.subject(),
        "issuer": claims.and_then(|c| c.issuer()),
        "domain": ctx.user.as_ref().map(|u| u.domain().to_string()),
        "roles": claims.map(|c| c.roles()).unwrap_or_default(),
        "authorized": ctx.authorized,
    }))
}

async fn logout(
    State(authenticator): State<Arc<dyn Authenticator>>,
    _caller: Authenticated,
    headers: HeaderMap,
) -> Response {
    let head = authenticator
        .options()
        .map(|o| o.token_head_name.clone())
        .unwrap_or_else(|| DEFAULT_TOKEN_HEAD.to_string());
    let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| strip_scheme(v, &head))
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "logout needs an Authorization header"})),
        )
            .into_response();
    };

    match authenticator.revoke_token(&token).await {
        Ok(revoked) => Json(json!({ "revoked": revoked })).into_response(),
        Err(e) if e.is(AuthnErrorCode::UnsupportedOperation) => (
            StatusCode::NOT_IMPLEMENTED,
            Json(json!({"error": e.message})),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Token revocation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "revocation failed"})),
            )
                .into_response()
        }
    }
}

fn build_cors(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|s| s.parse::<HeaderValue>().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub async fn run_server(
    config: GatewayConfig,
    shutdown: tokio::sync::watch::Receiver<()>,
) -> Result<(), BoxError> {
    let gateway = Gateway::from_config(&config).await?;

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_service_status("", tonic_health::ServingStatus::Serving)
        .await;

    tracing::info!("Starting gRPC server at {}", config.grpc_addr);
    tracing::info!("Starting HTTP server at {}", config.http_addr);

    let grpc_server = Server::builder()
        .accept_http1(true)
        .layer(build_cors(&config.cors_origins))
        .layer(GrpcWebLayer::new())
        .layer(GrpcAuthLayer::new(Arc::clone(&gateway.pipeline)))
        .add_service(health_service);

    let http_router = gateway.router().layer(build_cors(&config.cors_origins));

    let mut grpc_shutdown = shutdown.clone();
    let grpc_future = grpc_server.serve_with_shutdown(config.grpc_addr, async move {
        let _ = grpc_shutdown.changed().await;
        tracing::info!("Shutting down gRPC server...");
    });

    let mut http_shutdown = shutdown.clone();
    let http_listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    let http_future = axum::serve(
        http_listener,
        http_router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = http_shutdown.changed().await;
        tracing::info!("Shutting down HTTP server...");
    });

    let result: Result<(), BoxError> = tokio::select! {
        result = grpc_future => result.map_err(|e| {
            tracing::error!("gRPC server error: {}", e);
            e.into()
        }),
        result = http_future => result.map_err(|e| {
            tracing::error!("HTTP server error: {}", e);
            e.into()
        }),
    };

    gateway.close().await;
    result
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use auth_core::AuthClaims;
    use axum::body::Body;
    use axum::http::Request;
    use be_auth_core::{AuthenticatorKind, AuthenticatorOptions, MemoryTokenStore};
    use be_auth_middleware::SkipRules;
    use be_authz::{AuthorizerOptions, Policy};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    fn config() -> GatewayConfig {
        GatewayConfig {
            grpc_addr: "127.0.0.1:0".parse().unwrap(),
            http_addr: "127.0.0.1:0".parse().unwrap(),
            authenticator: AuthenticatorKind::Jwt,
            authn: AuthenticatorOptions::builder()
                .issuer("gateway")
                .signing_key("gateway-secret")
                .enable_revocation(true)
                .token_store(Arc::new(MemoryTokenStore::new()))
                .build(),
            authz: AuthorizerOptions::builder()
                .policies(vec![
                    Policy::allow("alice", "/v1/me", "GET", "gateway"),
                    Policy::allow("alice", "/v1/logout", "POST", "gateway"),
                ])
                .build(),
            mode: PipelineMode::Combined,
            skip: SkipRules::new().path("/health"),
            skip_roles: Vec::new(),
            default_domain: String::new(),
            call_timeout: Some(Duration::from_secs(1)),
            cors_origins: Vec::new(),
        }
    }

    fn request(method: &str, uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn me_then_logout_revokes() {
        let gateway = Gateway::from_config(&config()).await.unwrap();
        let token = gateway
            .authenticator
            .create_token(&AuthClaims::new().with_subject("alice"))
            .await
            .unwrap();
        let app = gateway.router();

        let response = app.clone().oneshot(request("GET", "/v1/me", &token)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["subject"], "alice");
        assert_eq!(body["domain"], "gateway");
        assert_eq!(body["authorized"], true);

        let response = app
            .clone()
            .oneshot(request("POST", "/v1/logout", &token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(request("GET", "/v1/me", &token)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        gateway.close().await;
    }

    #[tokio::test]
    async fn authn_mode_skips_authorizer() {
        let mut config = config();
        config.mode = PipelineMode::Authn;
        let gateway = Gateway::from_config(&config).await.unwrap();
        assert!(gateway.authorizer.is_none());

        let token = gateway
            .authenticator
            .create_token(&AuthClaims::new().with_subject("bob"))
            .await
            .unwrap();
        let response = gateway
            .router()
            .oneshot(request("GET", "/v1/me", &token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_caller_is_forbidden() {
        let gateway = Gateway::from_config(&config()).await.unwrap();
        let token = gateway
            .authenticator
            .create_token(&AuthClaims::new().with_subject("mallory"))
            .await
            .unwrap();
        let response = gateway
            .router()
            .oneshot(request("GET", "/v1/me", &token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn health_is_public() {
        let gateway = Gateway::from_config(&config()).await.unwrap();
        let response = gateway
            .router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
