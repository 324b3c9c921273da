use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{EndpointInfo, LoginRequest, SignupRequest, SignupResponse},
        services::{self, SignupError},
    },
    config::AppConfig,
    context::{self, RequestContext},
    response,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth", get(index))
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
}

#[instrument(skip_all, fields(request_id = %ctx.id))]
pub async fn index(ctx: RequestContext) -> Response {
    info!(request_id = %ctx.id, "Authentication endpoint accessed");
    // Paths are relative to the `/auth` mount point.
    let endpoints = [
        EndpointInfo {
            method: "POST",
            path: "/signup",
            description: "User registration",
        },
        EndpointInfo {
            method: "POST",
            path: "/login",
            description: "User login",
        },
    ];
    response::success(
        Some(&ctx),
        "Authentication endpoint is active",
        json!({ "endpoints": endpoints }),
    )
}

#[instrument(skip_all, fields(request_id = %ctx.id))]
pub async fn signup(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(p) => p,
        Err(rejection) => {
            warn!(request_id = %ctx.id, error = %rejection.body_text(), "malformed signup body");
            return response::error(
                Some(&ctx),
                "Invalid request body",
                Some(rejection.body_text()),
                rejection.status(),
            );
        }
    };

    // Owned task: a dropped connection must not abort a half-finished insert.
    let store = state.users.clone();
    let cost = state.config.password_cost;
    let task_ctx = ctx.clone();
    let outcome = tokio::spawn(context::in_request_scope(ctx.id.clone(), async move {
        services::register(store.as_ref(), cost, &task_ctx, payload).await
    }))
    .await
    .unwrap_or_else(|e| Err(anyhow::Error::new(e).context("signup task failed").into()));

    match outcome {
        Ok(user) => response::success_with_status(
            Some(&ctx),
            "User registered successfully",
            SignupResponse { user },
            StatusCode::CREATED,
        ),
        Err(err) => signup_failure(&state.config, &ctx, err),
    }
}

fn signup_failure(config: &AppConfig, ctx: &RequestContext, err: SignupError) -> Response {
    match err {
        SignupError::MissingFields(fields) => response::validation_error(
            Some(ctx),
            "All fields are required",
            Some(fields),
        ),
        SignupError::InvalidEmail | SignupError::PasswordTooShort => {
            response::validation_error(Some(ctx), &err.to_string(), None)
        }
        SignupError::EmailTaken => {
            response::error(Some(ctx), &err.to_string(), None, StatusCode::CONFLICT)
        }
        SignupError::Internal(e) => {
            error!(request_id = %ctx.id, error = %e, detail = ?e, "Signup error");
            let detail = config.mode.exposes_error_detail().then(|| format!("{:#}", e));
            response::error(
                Some(ctx),
                "Failed to create user",
                detail,
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        }
    }
}

/// Placeholder: credentials are not checked and no session is issued.
#[instrument(skip_all, fields(request_id = %ctx.id))]
pub async fn login(ctx: RequestContext, payload: Option<Json<LoginRequest>>) -> Response {
    let email = payload.and_then(|Json(body)| body.email);
    info!(request_id = %ctx.id, email = email.as_deref().unwrap_or("-"), "Login attempt");
    response::success(
        Some(&ctx),
        "Login endpoint - Coming soon",
        json!({ "message": "Login functionality will be implemented here" }),
    )
}
