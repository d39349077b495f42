pub mod auth;
pub mod event;
pub mod handlers;

use crate::error::SyncError;
use crate::AppContext;
use anyhow::Result;
use auth::Identity;
use event::TaskEvent;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

// ─── JSON-RPC 2.0 types ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RpcRequest {
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

#[derive(Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Serialize)]
struct RpcError {
    code: i32,
    message: String,
    /// Field-level validation details: `{ "errorDetails": [{path, message, type}] }`.
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

// ─── Error codes ─────────────────────────────────────────────────────────────
//
// authenticationRequired = -32004  (no identity bound to the connection)
// entityNotFound         = -32001  (well-formed id, no such row)
// invalidIdentifier      = -32007  (id does not match the identifier format)
// persistenceFailure     = -32008  (storage error; message sanitized)

const PARSE_ERROR: i32 = -32700;
const INVALID_REQUEST: i32 = -32600;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PAYLOAD: i32 = -32602;
const AUTHENTICATION_REQUIRED: i32 = -32004;
const ENTITY_NOT_FOUND: i32 = -32001;
const INVALID_IDENTIFIER: i32 = -32007;
const PERSISTENCE_FAILURE: i32 = -32008;

// ─── Server ──────────────────────────────────────────────────────────────────

pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    let addr = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "sync server listening");

    // Graceful shutdown: resolve on SIGTERM (Unix) or Ctrl-C (all platforms).
    let shutdown = make_shutdown_future();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("shutdown signal received — stopping sync server");
                break;
            }

            conn = listener.accept() => {
                let (stream, peer) = match conn {
                    Ok(c) => c,
                    Err(e) => {
                        error!(err = %e, "accept error");
                        continue;
                    }
                };
                debug!(peer = %peer, "new connection");
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, ctx).await {
                        warn!(peer = %peer, err = %e, "connection error");
                    }
                });
            }
        }
    }

    info!("sync server stopped");
    Ok(())
}

/// Returns a future that resolves when a shutdown signal is received.
///
/// On Unix we listen for SIGTERM *and* Ctrl-C.
/// On other platforms we listen for Ctrl-C only.
async fn make_shutdown_future() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(err = %e, "failed to register SIGTERM — Ctrl-C only");
                tokio::signal::ctrl_c().await.ok();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

async fn handle_connection(stream: tokio::net::TcpStream, ctx: Arc<AppContext>) -> Result<()> {
    // ── Credential check at handshake time ──────────────────────────────────
    // The bearer token arrives out-of-band in the HTTP upgrade request, not
    // as a command. A bad or absent credential rejects the upgrade with 401
    // before any command can be processed. With an empty secret the check is
    // skipped, no identity is bound, and every command fails with
    // "authentication required".
    let secret = ctx.config.jwt_secret.clone().unwrap_or_default();
    let mut identity: Option<Identity> = None;

    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        if secret.is_empty() {
            return Ok(resp);
        }
        let verified = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(auth::bearer_token)
            .and_then(|token| auth::verify_token(token, &secret));
        match verified {
            Some(who) => {
                identity = Some(who);
                Ok(resp)
            }
            None => {
                let mut reject = ErrorResponse::new(Some("authentication required".to_string()));
                *reject.status_mut() = StatusCode::UNAUTHORIZED;
                Err(reject)
            }
        }
    };

    let ws = accept_hdr_async(stream, callback).await?;
    let (mut sink, mut stream) = ws.split();

    if let Some(who) = &identity {
        debug!(user = %who.username, "client authenticated");
    }

    let conn_id = ctx.broadcaster.register_connection();
    let mut broadcast_rx = ctx.broadcaster.subscribe();

    loop {
        tokio::select! {
            // Incoming command. Awaiting dispatch before the next read keeps
            // commands on one connection strictly in the order sent.
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let (response, outcome) = dispatch_text(&text, identity.as_ref(), &ctx).await;
                        // Acknowledge the issuer first, then fan out.
                        if let Err(e) = sink.send(Message::Text(response)).await {
                            warn!(err = %e, "send error");
                            break;
                        }
                        if let Some(event) = outcome {
                            ctx.broadcaster.broadcast(conn_id, &event);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(err = %e, "ws error");
                        break;
                    }
                    _ => {}
                }
            }
            // Outgoing change event from some other connection
            env = broadcast_rx.recv() => {
                match env {
                    Ok(env) => {
                        if env.origin == conn_id {
                            continue;
                        }
                        if let Err(e) = sink.send(Message::Text(env.frame)).await {
                            warn!(err = %e, "broadcast send error");
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "broadcast lagged");
                    }
                }
            }
        }
    }
    Ok(())
}

/// Parse one frame, dispatch it, and serialize the acknowledgement.
/// Returns the response frame plus the change event to broadcast (success
/// only — failed commands never reach other connections).
pub(crate) async fn dispatch_text(
    text: &str,
    identity: Option<&Identity>,
    ctx: &AppContext,
) -> (String, Option<TaskEvent>) {
    let req: RpcRequest = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(_) => {
            return (
                error_response(Value::Null, PARSE_ERROR, "Parse error", None),
                None,
            );
        }
    };

    if req.jsonrpc != "2.0" {
        return (
            error_response(
                req.id.unwrap_or(Value::Null),
                INVALID_REQUEST,
                "Invalid Request",
                None,
            ),
            None,
        );
    }

    let id = req.id.unwrap_or(Value::Null);
    let params = req.params.unwrap_or(Value::Null);

    debug!(method = %req.method, "rpc dispatch");

    let result = match req.method.as_str() {
        "task.create" => handlers::task::create(identity, params, ctx).await,
        "task.read" => handlers::task::read(identity, params, ctx).await,
        "task.update" => handlers::task::update(identity, params, ctx).await,
        "task.delete" => handlers::task::delete(identity, params, ctx).await,
        "task.list" => handlers::task::list(identity, params, ctx).await,
        _ => {
            return (
                error_response(id, METHOD_NOT_FOUND, "Method not found", None),
                None,
            );
        }
    };

    match result {
        Ok((value, event)) => {
            let resp = RpcResponse {
                jsonrpc: "2.0",
                id,
                result: Some(value),
                error: None,
            };
            (serde_json::to_string(&resp).unwrap_or_default(), event)
        }
        Err(e) => {
            let (code, message, data) = classify_error(e);
            (error_response(id, code, &message, data), None)
        }
    }
}

/// Map a domain error to its wire code. Persistence detail stays in the
/// server log; the client only sees the sanitized message.
fn classify_error(err: SyncError) -> (i32, String, Option<Value>) {
    match err {
        SyncError::AuthenticationRequired => {
            (AUTHENTICATION_REQUIRED, "Authentication required".to_string(), None)
        }
        SyncError::InvalidPayload(details) => {
            let data = serde_json::json!({ "errorDetails": details });
            (INVALID_PAYLOAD, "Invalid payload".to_string(), Some(data))
        }
        SyncError::InvalidIdentifier => {
            (INVALID_IDENTIFIER, "Invalid identifier".to_string(), None)
        }
        SyncError::EntityNotFound => (ENTITY_NOT_FOUND, "Entity not found".to_string(), None),
        SyncError::Persistence(inner) => {
            error!(err = %inner, "persistence failure");
            (PERSISTENCE_FAILURE, "Storage error".to_string(), None)
        }
    }
}

fn error_response(id: Value, code: i32, message: &str, data: Option<Value>) -> String {
    let resp = RpcResponse {
        jsonrpc: "2.0",
        id,
        result: None,
        error: Some(RpcError {
            code,
            message: message.to_string(),
            data,
        }),
    };
    serde_json::to_string(&resp).unwrap_or_default()
}
