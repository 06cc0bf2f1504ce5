use std::sync::Arc;

use auth_core::{AuthContext, TransportInfo};
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::AuthFailure;
use crate::pipeline::AuthPipeline;

/// Axum middleware running an [`AuthPipeline`]. Install with
/// `axum::middleware::from_fn_with_state(pipeline, auth_middleware)`.
///
/// Rejections are JSON bodies of the form `{"error": "<message>"}`.
pub async fn auth_middleware(
    State(pipeline): State<Arc<AuthPipeline>>,
    mut req: Request,
    next: Next,
) -> Response {
    let info = TransportInfo::http(
        req.method().as_str(),
        req.uri().path(),
        req.headers().clone(),
    )
    .with_query(req.uri().query());

    match pipeline.process(&info, req.extensions_mut(), None).await {
        Ok(()) => next.run(req).await,
        Err(failure) => failure.into_response(),
    }
}

/// Extractor for handlers behind [`auth_middleware`]. Rejects with 401 when the
/// request carries no authenticated context.
pub struct Authenticated(pub AuthContext);

impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = AuthFailure;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .filter(|ctx| ctx.is_authenticated())
            .cloned()
            .map(Authenticated)
            .ok_or(AuthFailure::unauthenticated("unauthorized"))
    }
}

#[cfg(test)]
mod tests {
    use auth_core::AuthClaims;
    use axum::Router;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::routing::get;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::pipeline::PipelineMode;
    use crate::pipeline::tests::{authenticator, authorizer};
    use crate::skip::SkipRules;

    async fn whoami(Authenticated(ctx): Authenticated) -> String {
        ctx.subject().unwrap_or_default().to_string()
    }

    async fn app(mode: PipelineMode) -> (Router, String) {
        let authn = authenticator().await;
        let token = authn
            .create_token(&AuthClaims::new().with_subject("alice"))
            .await
            .unwrap();
        let pipeline = AuthPipeline::builder()
            .mode(mode)
            .authenticator(authn)
            .authorizer(authorizer().await)
            .skip(SkipRules::new().path("/health").prefix("/public/"))
            .build()
            .unwrap();
        let router = Router::new()
            .route("/docs/{id}", get(whoami).delete(whoami))
            .route("/health", get(|| async { StatusCode::OK }))
            .route("/public/{file}", get(whoami))
            .layer(axum::middleware::from_fn_with_state(
                Arc::new(pipeline),
                auth_middleware,
            ));
        (router, token)
    }

    fn request(method: &str, uri: &str, token: Option<&str>) -> Request {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn error_of(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        body["error"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn authorized_request_reaches_handler() {
        let (app, token) = app(PipelineMode::Combined).await;
        let response = app
            .oneshot(request("GET", "/docs/7", Some(&token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"alice");
    }

    #[tokio::test]
    async fn rejections_are_json() {
        let (app, token) = app(PipelineMode::Combined).await;

        let response = app
            .clone()
            .oneshot(request("GET", "/docs/7", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_of(response).await, "missing token");

        let response = app
            .clone()
            .oneshot(request("GET", "/docs/7", Some("garbage")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_of(response).await, "invalid token");

        let response = app
            .oneshot(request("DELETE", "/docs/7", Some(&token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(error_of(response).await, "permission denied");
    }

    #[tokio::test]
    async fn skipped_paths_reach_handler_without_claims() {
        let (app, _) = app(PipelineMode::Combined).await;
        let response = app
            .clone()
            .oneshot(request("GET", "/health", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // The handler itself still demands a caller.
        let response = app
            .oneshot(request("GET", "/public/logo.png", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_of(response).await, "unauthorized");
    }

    #[tokio::test]
    async fn authn_mode_skips_enforcement() {
        let (app, token) = app(PipelineMode::Authn).await;
        let response = app
            .oneshot(request("DELETE", "/docs/7", Some(&token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
