//! REST API server.
//!
//! Account and preference management plus the AI endpoints live here; task
//! traffic stays on the sync connection. Login hands out the same bearer
//! tokens the sync handshake verifies.
//!
//! Endpoints:
//!   POST /register
//!   POST /login
//!   GET  /user/preferences     (bearer)
//!   PUT  /user/preferences     (bearer)
//!   GET  /users
//!   GET  /health
//!   POST /ai/prioritize
//!   POST /ai/insights

use crate::sync::auth::{self, Identity};
use crate::users::{merge_preferences, User};
use crate::AppContext;
use anyhow::Result;
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

pub async fn start_rest_server(ctx: Arc<AppContext>) -> Result<()> {
    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.rest_port);
    let addr: SocketAddr = bind.parse()?;

    let router = build_router(ctx);

    info!("REST API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    let cors = cors_layer(&ctx.config.cors_origin);

    let protected = Router::new()
        .route(
            "/user/preferences",
            get(get_preferences).put(put_preferences),
        )
        .route_layer(middleware::from_fn_with_state(ctx.clone(), require_bearer));

    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/users", get(list_users))
        .route("/health", get(health))
        .route("/ai/prioritize", post(ai_prioritize))
        .route("/ai/insights", post(ai_insights))
        .merge(protected)
        .layer(cors)
        .with_state(ctx)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
    match origin.parse::<HeaderValue>() {
        Ok(value) => layer.allow_origin(value),
        Err(e) => {
            warn!(origin, err = %e, "invalid CORS origin — allowing none");
            layer
        }
    }
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(json!({ "error": message })))
}

fn internal_error(e: impl std::fmt::Display) -> ApiError {
    warn!(err = %e, "REST request failed");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
}

// ─── Auth ─────────────────────────────────────────────────────────────────────

/// Verify the bearer token and attach the decoded [`Identity`] to the
/// request. An empty signing secret disables authentication entirely, which
/// means every protected route rejects.
async fn require_bearer(
    State(ctx): State<Arc<AppContext>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let secret = ctx.config.jwt_secret.as_deref().unwrap_or("");
    if secret.is_empty() {
        return Err(api_error(StatusCode::UNAUTHORIZED, "Authentication required"));
    }

    let identity = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(auth::bearer_token)
        .and_then(|token| auth::verify_token(token, secret))
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "Authentication required"))?;

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// `salt$hex(sha256(salt + password))`.
fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().to_string().replace('-', "");
    format!("{salt}${}", digest_hex(&salt, password))
}

fn verify_password(password: &str, stored: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, digest)) => digest_hex(salt, password) == digest,
        None => false,
    }
}

fn digest_hex(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

// ─── Accounts ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CredentialsRequest {
    username: Option<String>,
    password: Option<String>,
    preferences: Option<Map<String, Value>>,
}

async fn register(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<CredentialsRequest>,
) -> Result<Json<Value>, ApiError> {
    let (Some(username), Some(password)) = (body.username, body.password) else {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "username and password are required",
        ));
    };
    if username.trim().is_empty() || password.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "username and password are required",
        ));
    }

    let stored = Map::new();
    let user = User {
        username: username.clone(),
        password_hash: hash_password(&password),
        preferences: merge_preferences(&stored, body.preferences.as_ref()),
    };
    // Insert is atomic on the username key, so two racing registrations
    // cannot both succeed and silently replace each other's credentials.
    let created = ctx.users.insert(&user).await.map_err(internal_error)?;
    if !created {
        return Err(api_error(StatusCode::BAD_REQUEST, "User already exists"));
    }

    let token = issue_token(&ctx, &username)?;
    info!(username, "registered user");
    Ok(Json(json!({ "token": token })))
}

async fn login(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<CredentialsRequest>,
) -> Result<Json<Value>, ApiError> {
    let (Some(username), Some(password)) = (body.username, body.password) else {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "username and password are required",
        ));
    };

    let user = ctx
        .users
        .find_by_username(&username)
        .await
        .map_err(internal_error)?;
    let valid = user
        .map(|u| verify_password(&password, &u.password_hash))
        .unwrap_or(false);
    if !valid {
        return Err(api_error(
            StatusCode::UNAUTHORIZED,
            "Invalid username or password",
        ));
    }

    let token = issue_token(&ctx, &username)?;
    Ok(Json(json!({ "token": token })))
}

fn issue_token(ctx: &AppContext, username: &str) -> Result<String, ApiError> {
    let secret = ctx.config.jwt_secret.as_deref().unwrap_or("");
    if secret.is_empty() {
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Authentication is disabled",
        ));
    }
    auth::issue_token(username, secret, ctx.config.token_ttl_secs).map_err(internal_error)
}

async fn list_users(State(ctx): State<Arc<AppContext>>) -> Result<Json<Value>, ApiError> {
    let users = ctx.users.find_all().await.map_err(internal_error)?;
    let list: Vec<Value> = users
        .iter()
        .map(|u| json!({ "username": u.username }))
        .collect();
    Ok(Json(json!({ "users": list })))
}

// ─── Preferences ──────────────────────────────────────────────────────────────

async fn get_preferences(
    State(ctx): State<Arc<AppContext>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Value>, ApiError> {
    let user = ctx
        .users
        .find_by_username(&identity.username)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "User not found"))?;

    Ok(Json(Value::Object(merge_preferences(
        &user.preferences,
        None,
    ))))
}

async fn put_preferences(
    State(ctx): State<Arc<AppContext>>,
    Extension(identity): Extension<Identity>,
    Json(patch): Json<Map<String, Value>>,
) -> Result<Json<Value>, ApiError> {
    let mut user = ctx
        .users
        .find_by_username(&identity.username)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "User not found"))?;

    user.preferences = merge_preferences(&user.preferences, Some(&patch));
    ctx.users.upsert(&user).await.map_err(internal_error)?;

    Ok(Json(Value::Object(user.preferences)))
}

// ─── Health ───────────────────────────────────────────────────────────────────

async fn health(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": ctx.started_at.elapsed().as_secs(),
    }))
}

// ─── AI ───────────────────────────────────────────────────────────────────────

/// Request body for both AI endpoints. `preferences` is required; requests
/// without it are rejected before any tasks are read.
#[derive(Deserialize)]
struct AiRequest {
    preferences: Option<Map<String, Value>>,
}

fn required_preferences(body: AiRequest) -> Result<Map<String, Value>, ApiError> {
    let flags = body
        .preferences
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Preferences are required"))?;
    // Backfill so the prompt always names the full flag set.
    Ok(merge_preferences(&flags, None))
}

async fn ai_prioritize(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<AiRequest>,
) -> Result<Json<Value>, ApiError> {
    let preferences = required_preferences(body)?;
    let tasks = ctx.tasks.find_all().await.map_err(internal_error)?;
    if tasks.is_empty() {
        return Ok(Json(json!({ "tasks": [] })));
    }

    let prompt = prioritize_prompt(&tasks, &preferences);
    let enhanced = ctx.ai.prioritize(&tasks, &prompt).await;
    Ok(Json(json!({ "tasks": enhanced })))
}

async fn ai_insights(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<AiRequest>,
) -> Result<Json<Value>, ApiError> {
    let preferences = required_preferences(body)?;
    let tasks = ctx.tasks.find_all().await.map_err(internal_error)?;
    let prompt = insights_prompt(&tasks, &preferences);
    match ctx.ai.insight(&prompt).await {
        Ok(insight) => Ok(Json(json!({ "insight": insight }))),
        Err(e) => {
            warn!(err = %e, "AI insights unavailable");
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "AI insights unavailable",
            ))
        }
    }
}

fn task_lines(tasks: &[crate::tasks::Task]) -> String {
    tasks
        .iter()
        .map(|t| {
            format!(
                "- id: {} | title: {} | priority: {} | completed: {}",
                t.id,
                t.title,
                t.priority.as_str(),
                t.completed
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn preference_lines(preferences: &Map<String, Value>) -> String {
    preferences
        .iter()
        .map(|(flag, on)| format!("- {}: {}", flag, on.as_bool().unwrap_or(false)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn prioritize_prompt(tasks: &[crate::tasks::Task], preferences: &Map<String, Value>) -> String {
    format!(
        "You are a task prioritization assistant. Rank these tasks by urgency \
         and importance, weighting areas the user cares about (true) higher.\n\n\
         Tasks:\n{}\n\nUser preferences:\n{}\n\nReturn a JSON array where each \
         element has \"id\", \"aiPriority\" (1 = most urgent), and \"aiReason\" \
         (one short sentence).",
        task_lines(tasks),
        preference_lines(preferences)
    )
}

fn insights_prompt(tasks: &[crate::tasks::Task], preferences: &Map<String, Value>) -> String {
    format!(
        "You are a productivity assistant. Analyze these tasks and summarize \
         patterns, risks, and suggestions in 2-3 sentences, considering which \
         areas the user cares about (true).\n\nTasks:\n{}\n\nUser preferences:\n{}\n\n\
         Return a JSON object with a single \"insight\" string field.",
        task_lines(tasks),
        preference_lines(preferences)
    )
}
