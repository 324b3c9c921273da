use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{middleware, routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    auth,
    config::AppConfig,
    context::{self, RequestContext},
    routes::system,
    state::AppState,
};

pub fn build_app(state: AppState) -> Router {
    let config = state.config.clone();
    let router = Router::new()
        .route("/", get(system::root))
        .route("/health", get(system::health))
        .merge(auth::router())
        .fallback(system::not_found)
        .with_state(state);
    with_middleware(router, config)
}

/// Request context (outermost), tracing spans, CORS.
pub fn with_middleware(router: Router, config: Arc<AppConfig>) -> Router {
    router
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    let request_id = req
                        .extensions()
                        .get::<RequestContext>()
                        .map(|c| c.id.to_string())
                        .unwrap_or_default();
                    tracing::info_span!("http_request", %method, uri = %uri, %request_id)
                })
                // `track_request` logs request and response lines.
                .on_request(())
                .on_response(())
                .on_eos(())
                .on_failure(()),
        )
        .layer(middleware::from_fn_with_state(config, context::track_request))
}

pub async fn serve(app: Router, config: &AppConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("parse listen address")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {}", addr))?;
    tracing::info!("Server ready at http://{}", addr);
    tracing::info!("Health check: http://{}/health", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::repo::memory::UnavailableUserStore,
        config::RuntimeMode,
        context::X_REQUEST_ID,
        logging::capture::{dispatch, Buffer},
    };
    use axum::{
        body::Body,
        http::{HeaderMap, Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, HeaderMap, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                builder = builder.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let res = app.oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, headers, serde_json::from_slice(&bytes).unwrap())
    }

    fn app(mode: RuntimeMode) -> (Router, Arc<crate::auth::repo::memory::MemoryUserStore>) {
        let (state, store) = AppState::fake(mode);
        (build_app(state), store)
    }

    fn ana() -> Value {
        json!({ "name": "Ana", "email": "ana@example.com", "password": "secret1" })
    }

    #[tokio::test]
    async fn health_reports_ok_and_echoes_request_id() {
        let (app, _) = app(RuntimeMode::Test);
        let (status, headers, body) = send(app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "OK");
        assert_eq!(body["data"]["environment"], "test");
        assert!(body["data"]["uptime"].is_number());
        let rid = headers.get(&X_REQUEST_ID).unwrap().to_str().unwrap();
        assert_eq!(body["requestId"], rid);
    }

    #[tokio::test]
    async fn root_and_auth_index_describe_endpoints() {
        let (app, _) = app(RuntimeMode::Test);
        let (status, _, body) = send(app.clone(), Method::GET, "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["endpoints"], json!({ "health": "/health", "auth": "/auth" }));
        assert_eq!(body["data"]["version"], env!("CARGO_PKG_VERSION"));

        let (status, _, body) = send(app, Method::GET, "/auth", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["endpoints"].as_array().unwrap().len(), 2);
        assert_eq!(body["data"]["endpoints"][0]["path"], "/signup");
        assert_eq!(body["data"]["endpoints"][1]["path"], "/login");
    }

    #[tokio::test]
    async fn signup_creates_user_without_exposing_password() {
        let (app, store) = app(RuntimeMode::Test);
        let (status, _, body) = send(app, Method::POST, "/auth/signup", Some(ana())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "User registered successfully");

        let user = &body["data"]["user"];
        assert_eq!(user["email"], "ana@example.com");
        assert_eq!(user["name"], "Ana");
        assert!(!user["id"].as_str().unwrap().is_empty());
        assert!(user["createdAt"].is_string());
        assert!(user.get("password").is_none());
        assert!(user.get("passwordHash").is_none());

        let raw = body.to_string();
        assert!(!raw.contains("secret1"));
        assert!(!raw.contains("$2b$"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn repeated_signup_conflicts() {
        let (app, store) = app(RuntimeMode::Test);
        let (first, _, _) = send(app.clone(), Method::POST, "/auth/signup", Some(ana())).await;
        assert_eq!(first, StatusCode::CREATED);

        let (status, _, body) = send(app, Method::POST, "/auth/signup", Some(ana())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "User with this email already exists");
        assert!(body.get("error").is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn signup_rejects_invalid_email() {
        let (app, _) = app(RuntimeMode::Test);
        let payload = json!({ "name": "Bo", "email": "not-an-email", "password": "secret1" });
        let (status, _, body) = send(app, Method::POST, "/auth/signup", Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid email format");
    }

    #[tokio::test]
    async fn signup_rejects_short_password() {
        let (app, store) = app(RuntimeMode::Test);
        let payload = json!({ "name": "Bo", "email": "bo@example.com", "password": "12345" });
        let (status, _, body) = send(app, Method::POST, "/auth/signup", Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Password must be at least 6 characters long");
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn signup_names_exactly_the_missing_fields() {
        let (app, _) = app(RuntimeMode::Test);
        let payload = json!({ "name": "Bo", "email": "" });
        let (status, _, body) = send(app, Method::POST, "/auth/signup", Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "All fields are required");
        assert_eq!(
            body["error"],
            json!({ "email": "Email is required", "password": "Password is required" })
        );
    }

    #[tokio::test]
    async fn signup_with_malformed_body_is_client_error() {
        let (app, _) = app(RuntimeMode::Test);
        let req = Request::builder()
            .method(Method::POST)
            .uri("/auth/signup")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Invalid request body");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_signups_with_same_email_yield_one_created() {
        let (app, store) = app(RuntimeMode::Test);
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let app = app.clone();
                tokio::spawn(async move {
                    send(app, Method::POST, "/auth/signup", Some(ana())).await.0
                })
            })
            .collect();

        let mut created = 0;
        let mut conflicts = 0;
        for task in tasks {
            match task.await.unwrap() {
                StatusCode::CREATED => created += 1,
                StatusCode::CONFLICT => conflicts += 1,
                other => panic!("unexpected status {other}"),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(conflicts, 7);
        assert_eq!(store.len().await, 1);
    }

    fn unavailable_store_app(mode: RuntimeMode) -> Router {
        let state = AppState::from_parts(
            Arc::new(UnavailableUserStore),
            Arc::new(AppConfig::for_tests(mode)),
        );
        build_app(state)
    }

    #[tokio::test]
    async fn store_failure_exposes_detail_outside_production() {
        let app = unavailable_store_app(RuntimeMode::Development);
        let (status, _, body) = send(app, Method::POST, "/auth/signup", Some(ana())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Failed to create user");
        assert!(body["error"].as_str().unwrap().contains("look up user by email"));
    }

    #[tokio::test]
    async fn store_failure_hides_detail_in_production() {
        let app = unavailable_store_app(RuntimeMode::Production);
        let (status, _, body) = send(app, Method::POST, "/auth/signup", Some(ana())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Failed to create user");
        assert!(body.get("error").is_none());
    }

    /// Sends one request under a line-format subscriber; returns the status,
    /// the echoed request id and every rendered log line.
    async fn send_logged(app: Router, uri: &str, body: Value) -> (StatusCode, String, String) {
        let buffer = Buffer::default();
        let _guard = tracing::dispatcher::set_default(&dispatch(&buffer, tracing::Level::DEBUG));
        let (status, headers, _) = send(app, Method::POST, uri, Some(body)).await;
        let rid = headers.get(&X_REQUEST_ID).unwrap().to_str().unwrap().to_owned();
        (status, rid, buffer.contents())
    }

    fn assert_every_line_tagged(logs: &str, rid: &str) {
        let tag = format!(r#""request_id":"{rid}""#);
        assert!(logs.lines().count() >= 4, "{logs}");
        for line in logs.lines() {
            assert!(line.contains(&tag), "untagged log line: {line}");
        }
    }

    #[tokio::test]
    async fn signup_log_lines_carry_request_id_and_no_secrets() {
        let (app, _) = app(RuntimeMode::Test);
        let (status, rid, logs) = send_logged(app, "/auth/signup", ana()).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_every_line_tagged(&logs, &rid);
        assert!(logs.contains("User created successfully"));
        assert!(!logs.contains("secret1"), "{logs}");
        assert!(!logs.contains("$2b$"), "{logs}");
    }

    #[tokio::test]
    async fn failed_signup_log_lines_carry_request_id() {
        let app = unavailable_store_app(RuntimeMode::Development);
        let (status, rid, logs) = send_logged(app, "/auth/signup", ana()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_every_line_tagged(&logs, &rid);
        assert!(logs.contains("[ERROR]: response"));
        assert!(!logs.contains("secret1"), "{logs}");
    }

    #[tokio::test]
    async fn login_is_a_placeholder() {
        let (app, _) = app(RuntimeMode::Test);
        let payload = json!({ "email": "nobody@example.com", "password": "wrong" });
        let (status, _, body) = send(app, Method::POST, "/auth/login", Some(payload)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Login endpoint - Coming soon");
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let (app, _) = app(RuntimeMode::Test);
        let (status, _, body) = send(app, Method::GET, "/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Route /nope not found");
        assert!(body["requestId"].is_string());
    }

    async fn boom() -> &'static str {
        panic!("boom")
    }

    fn panicking_app(mode: RuntimeMode) -> Router {
        let router = Router::new().route("/boom", get(boom));
        with_middleware(router, Arc::new(AppConfig::for_tests(mode)))
    }

    #[tokio::test]
    async fn panics_become_internal_server_errors() {
        let (status, headers, body) =
            send(panicking_app(RuntimeMode::Development), Method::GET, "/boom", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal server error");
        assert_eq!(body["error"], "boom");
        assert!(headers.get(&X_REQUEST_ID).is_some());

        let (status, _, body) =
            send(panicking_app(RuntimeMode::Production), Method::GET, "/boom", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.get("error").is_none());
    }
}
