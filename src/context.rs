use std::{
    convert::Infallible, fmt, future::Future, net::SocketAddr, panic::AssertUnwindSafe,
    sync::Arc, time::Instant,
};

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header::USER_AGENT, request::Parts, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use futures_util::FutureExt;
use tracing::{debug, error};
use uuid::Uuid;

use crate::{config::AppConfig, logging::HTTP_TARGET, response};

pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Per-request correlator threaded through log lines and the response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

tokio::task_local! {
    static CURRENT_REQUEST_ID: RequestId;
}

/// Id of the request whose future is being polled on this task, if any.
pub fn current_request_id() -> Option<RequestId> {
    CURRENT_REQUEST_ID.try_with(RequestId::clone).ok()
}

/// Runs `fut` with `id` as the current request id. Spawned tasks do not
/// inherit it and must be wrapped again.
pub async fn in_request_scope<F: Future>(id: RequestId, fut: F) -> F::Output {
    CURRENT_REQUEST_ID.scope(id, fut).await
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub id: RequestId,
    pub method: Method,
    pub path: String,
}

impl RequestContext {
    pub fn new(method: &Method, path: &str) -> Self {
        Self {
            id: RequestId::generate(),
            method: method.clone(),
            path: path.to_owned(),
        }
    }
}

/// Handlers get the context installed by [`track_request`], or a fresh one
/// when the middleware is not in the stack.
#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_else(|| RequestContext::new(&parts.method, parts.uri.path())))
    }
}

/// Assigns the request id, logs the incoming request and its completion, and
/// converts any panic escaping the handler into a 500 envelope. The handler
/// runs inside [`in_request_scope`].
pub async fn track_request(
    State(config): State<Arc<AppConfig>>,
    mut req: Request,
    next: Next,
) -> Response {
    let ctx = RequestContext::new(req.method(), req.uri().path());
    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_owned();

    debug!(
        target: HTTP_TARGET,
        request_id = %ctx.id,
        ip = ip.as_deref().unwrap_or("unknown"),
        user_agent = %user_agent,
        "{} {}",
        ctx.method,
        ctx.path
    );

    let url = req.uri().to_string();
    req.extensions_mut().insert(ctx.clone());

    let started = Instant::now();
    let handled = in_request_scope(ctx.id.clone(), next.run(req));
    let mut res = match AssertUnwindSafe(handled).catch_unwind().await {
        Ok(res) => res,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(
                request_id = %ctx.id,
                error = %message,
                method = %ctx.method,
                url = %url,
                "Unhandled error"
            );
            let detail = config.mode.exposes_error_detail().then_some(message);
            response::error(
                Some(&ctx),
                "Internal server error",
                detail,
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        }
    };

    if let Ok(value) = HeaderValue::from_str(ctx.id.as_str()) {
        res.headers_mut().insert(X_REQUEST_ID.clone(), value);
    }

    let status = res.status().as_u16();
    let latency_ms = started.elapsed().as_millis() as u64;
    if res.status().is_server_error() {
        error!(request_id = %ctx.id, status, latency_ms, "response");
    } else {
        debug!(request_id = %ctx.id, status, latency_ms, "response");
    }
    res
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
