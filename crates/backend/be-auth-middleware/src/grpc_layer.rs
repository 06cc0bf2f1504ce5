use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use auth_core::{AuthClaims, AuthContext, TransportInfo};
use http::{HeaderValue, Request};
use tonic::Status;
use tower::{Layer, Service};

use crate::pipeline::AuthPipeline;
use crate::skip::parse_grpc_path;

const GRPC_TIMEOUT: &str = "grpc-timeout";

/// Tower layer that runs an [`AuthPipeline`] in front of tonic services.
#[derive(Clone)]
pub struct GrpcAuthLayer {
    pipeline: Arc<AuthPipeline>,
}

impl GrpcAuthLayer {
    pub fn new(pipeline: Arc<AuthPipeline>) -> Self {
        Self { pipeline }
    }
}

impl<S> Layer<S> for GrpcAuthLayer {
    type Service = GrpcAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GrpcAuthService {
            inner,
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}

#[derive(Clone)]
pub struct GrpcAuthService<S> {
    inner: S,
    pipeline: Arc<AuthPipeline>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for GrpcAuthService<S>
where
    S: Service<Request<ReqBody>, Response = http::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let pipeline = Arc::clone(&self.pipeline);
        let inner = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, inner);

        Box::pin(async move {
            if req.method() == http::Method::OPTIONS {
                return inner.call(req).await;
            }

            let path = req.uri().path().to_string();
            if parse_grpc_path(&path).is_none() {
                tracing::warn!(path = %path, "Rejecting request with unparseable gRPC path");
                return Ok(Status::invalid_argument("Invalid gRPC path").into_http());
            }

            let deadline = req.headers().get(GRPC_TIMEOUT).and_then(parse_grpc_timeout);
            let info = TransportInfo::grpc(path, req.headers().clone());

            match pipeline.process(&info, req.extensions_mut(), deadline).await {
                Ok(()) => inner.call(req).await,
                Err(failure) => Ok(Status::from(failure).into_http()),
            }
        })
    }
}

/// Parses the `grpc-timeout` header: up to eight digits followed by a unit
/// (`H`, `M`, `S`, `m`, `u`, `n`).
pub fn parse_grpc_timeout(value: &HeaderValue) -> Option<Duration> {
    let value = value.to_str().ok()?;
    if value.len() < 2 || value.len() > 9 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    let amount: u64 = digits.parse().ok()?;
    match unit {
        "H" => Some(Duration::from_secs(amount * 60 * 60)),
        "M" => Some(Duration::from_secs(amount * 60)),
        "S" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_millis(amount)),
        "u" => Some(Duration::from_micros(amount)),
        "n" => Some(Duration::from_nanos(amount)),
        _ => None,
    }
}

/// Everything the auth layer attached to a tonic request.
pub fn auth_context<T>(request: &tonic::Request<T>) -> Option<&AuthContext> {
    request.extensions().get::<AuthContext>()
}

/// Claims of the authenticated caller, for handlers behind [`GrpcAuthLayer`].
pub fn claims_from_request<T>(request: &tonic::Request<T>) -> Result<Arc<AuthClaims>, Status> {
    auth_context(request)
        .and_then(|ctx| ctx.claims.clone())
        .ok_or_else(|| Status::unauthenticated("unauthorized"))
}
