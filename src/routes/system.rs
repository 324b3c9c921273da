use axum::{extract::State, http::Uri, response::Response};
use serde::Serialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{info, warn};

use crate::{context::RequestContext, response, state::AppState};

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub timestamp: Option<String>,
    pub uptime: f64,
    pub environment: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub message: &'static str,
    pub version: &'static str,
    pub endpoints: Endpoints,
}

#[derive(Debug, Serialize)]
pub struct Endpoints {
    pub health: &'static str,
    pub auth: &'static str,
}

pub async fn root(ctx: RequestContext) -> Response {
    info!(request_id = %ctx.id, "Root endpoint accessed");
    response::success(
        Some(&ctx),
        "Task Manager Backend API",
        ServiceInfo {
            message: "Welcome to Task Manager Backend!",
            version: env!("CARGO_PKG_VERSION"),
            endpoints: Endpoints {
                health: "/health",
                auth: "/auth",
            },
        },
    )
}

pub async fn health(State(state): State<AppState>, ctx: RequestContext) -> Response {
    info!(request_id = %ctx.id, "Health check requested");
    response::success(
        Some(&ctx),
        "Server is healthy",
        HealthStatus {
            status: "OK",
            timestamp: OffsetDateTime::now_utc().format(&Rfc3339).ok(),
            uptime: state.started_at.elapsed().as_secs_f64(),
            environment: state.config.mode.as_str(),
        },
    )
}

pub async fn not_found(ctx: RequestContext, uri: Uri) -> Response {
    warn!(request_id = %ctx.id, "Route not found: {} {}", ctx.method, uri);
    response::not_found(Some(&ctx), &format!("Route {} not found", uri))
}
