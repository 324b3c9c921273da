//! Uniform JSON envelope returned by every endpoint:
//! `{success, message, data | error, timestamp, requestId}`.
//!
//! Builders never panic. A payload that fails to serialize is dropped from
//! the body instead of failing the request.

use std::collections::BTreeMap;

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde::Serialize;
use serde_json::Value;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{error, info, warn};

use crate::context::RequestContext;

/// Field name -> human readable reason; only offending fields are present.
pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl Envelope {
    fn new(ctx: Option<&RequestContext>, success: bool, message: &str) -> Self {
        Self {
            success,
            message: message.to_owned(),
            data: None,
            error: None,
            timestamp: OffsetDateTime::now_utc().format(&Rfc3339).ok(),
            request_id: ctx.map(|c| c.id.to_string()),
        }
    }

    fn into_response_with(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

fn to_value<T: Serialize>(ctx: Option<&RequestContext>, payload: T) -> Option<Value> {
    match serde_json::to_value(payload) {
        Ok(Value::Null) => None,
        Ok(v) => Some(v),
        Err(e) => {
            warn!(
                request_id = request_id(ctx),
                error = %e,
                "dropping unserializable response payload"
            );
            None
        }
    }
}

fn request_id(ctx: Option<&RequestContext>) -> &str {
    ctx.map(|c| c.id.as_str()).unwrap_or("-")
}

fn method(ctx: Option<&RequestContext>) -> &str {
    ctx.map(|c| c.method.as_str()).unwrap_or("-")
}

fn path(ctx: Option<&RequestContext>) -> &str {
    ctx.map(|c| c.path.as_str()).unwrap_or("-")
}

pub fn success<T: Serialize>(ctx: Option<&RequestContext>, message: &str, data: T) -> Response {
    success_with_status(ctx, message, data, StatusCode::OK)
}

pub fn success_with_status<T: Serialize>(
    ctx: Option<&RequestContext>,
    message: &str,
    data: T,
    status: StatusCode,
) -> Response {
    let mut body = Envelope::new(ctx, true, message);
    body.data = to_value(ctx, data);
    info!(
        status = status.as_u16(),
        method = method(ctx),
        url = path(ctx),
        request_id = request_id(ctx),
        "SUCCESS: {}",
        message
    );
    body.into_response_with(status)
}

pub fn error(
    ctx: Option<&RequestContext>,
    message: &str,
    detail: Option<String>,
    status: StatusCode,
) -> Response {
    let mut body = Envelope::new(ctx, false, message);
    body.error = detail.map(Value::String);
    error!(
        status = status.as_u16(),
        method = method(ctx),
        url = path(ctx),
        request_id = request_id(ctx),
        error = body.error.as_ref().and_then(serde_json::Value::as_str).unwrap_or("-"),
        "ERROR: {}",
        message
    );
    body.into_response_with(status)
}

pub fn validation_error(
    ctx: Option<&RequestContext>,
    message: &str,
    fields: Option<FieldErrors>,
) -> Response {
    let mut body = Envelope::new(ctx, false, message);
    body.error = fields.and_then(|f| to_value(ctx, f));
    warn!(
        status = 400_u16,
        method = method(ctx),
        url = path(ctx),
        request_id = request_id(ctx),
        errors = %body.error.as_ref().map(serde_json::Value::to_string).unwrap_or_default(),
        "VALIDATION ERROR: {}",
        message
    );
    body.into_response_with(StatusCode::BAD_REQUEST)
}

pub fn not_found(ctx: Option<&RequestContext>, message: &str) -> Response {
    warn!(
        status = 404_u16,
        method = method(ctx),
        url = path(ctx),
        request_id = request_id(ctx),
        "NOT FOUND: {}",
        message
    );
    Envelope::new(ctx, false, message).into_response_with(StatusCode::NOT_FOUND)
}

#[allow(dead_code)]
pub fn unauthorized(ctx: Option<&RequestContext>, message: &str) -> Response {
    warn!(
        status = 401_u16,
        method = method(ctx),
        url = path(ctx),
        request_id = request_id(ctx),
        "UNAUTHORIZED: {}",
        message
    );
    Envelope::new(ctx, false, message).into_response_with(StatusCode::UNAUTHORIZED)
}
