//! Persistent-connection sync client.
//!
//! Owns one WebSocket connection, correlates JSON-RPC requests with their
//! acknowledgements, and routes `task.*` notifications into the local
//! [`TaskStore`] reconciler. Mutations follow the optimistic pattern: the
//! store applies the edit before the command is sent, and the ack either
//! confirms it or triggers the recorded inverse.

pub mod ordering;
pub mod store;

use crate::error::FieldError;
use crate::tasks::{Priority, Task};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use store::{LocalTask, TaskStore};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;
use tracing::{debug, warn};

/// A structured command failure delivered on the acknowledgement channel.
#[derive(Debug, Clone)]
pub struct RpcFailure {
    pub code: i32,
    pub message: String,
    /// Field-level detail for invalid payloads; empty otherwise.
    pub details: Vec<FieldError>,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection closed")]
    Closed,
    #[error("command failed ({}): {}", .0.code, .0.message)]
    Rpc(RpcFailure),
    #[error("protocol error: {0}")]
    Protocol(String),
}

type PendingAcks = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, RpcFailure>>>>>;

pub struct SyncClient {
    username: String,
    store: Arc<Mutex<TaskStore>>,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: PendingAcks,
    next_id: AtomicU64,
}

impl SyncClient {
    /// Connect with a bearer credential supplied out-of-band in the upgrade
    /// request. A rejected credential fails here — the server never admits
    /// an unauthenticated socket.
    pub async fn connect(url: &str, token: &str, username: &str) -> Result<Self, ClientError> {
        let mut request = url
            .into_client_request()
            .map_err(ClientError::Transport)?;
        let header = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| ClientError::Protocol(format!("invalid token header: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, header);

        let (ws, _) = connect_async(request).await?;
        let (mut sink, mut stream) = ws.split();

        let store = Arc::new(Mutex::new(TaskStore::new()));
        let pending: PendingAcks = Arc::new(Mutex::new(HashMap::new()));
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();

        // Writer: single owner of the sink.
        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        // Reader: resolve acks, route notifications into the store.
        let reader_store = store.clone();
        let reader_pending = pending.clone();
        let reader_outgoing = outgoing.clone();
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        handle_frame(&text, &reader_store, &reader_pending);
                    }
                    Ok(Message::Ping(data)) => {
                        let _ = reader_outgoing.send(Message::Pong(data));
                    }
                    Ok(Message::Close(_)) => break,
                    Err(e) => {
                        warn!(err = %e, "sync connection error");
                        break;
                    }
                    _ => {}
                }
            }
            // Fail any caller still waiting for an ack.
            if let Ok(mut acks) = reader_pending.lock() {
                acks.clear();
            }
        });

        Ok(Self {
            username: username.to_string(),
            store,
            outgoing,
            pending,
            next_id: AtomicU64::new(1),
        })
    }

    /// Snapshot of the local collection in its current visible order.
    pub fn snapshot(&self) -> Vec<LocalTask> {
        self.store
            .lock()
            .map(|s| s.tasks().to_vec())
            .unwrap_or_default()
    }

    /// Fetch the full collection and replace the local one.
    pub async fn refresh(&self) -> Result<(), ClientError> {
        let result = self.call("task.list", Value::Null).await?;
        let tasks: Vec<Task> = serde_json::from_value(result["tasks"].clone())
            .map_err(|e| ClientError::Protocol(format!("malformed task list: {e}")))?;
        self.with_store(|store| store.load(tasks))?;
        Ok(())
    }

    /// Optimistically create a task. Returns the server-assigned id — copied
    /// back from the acknowledgement, never assumed locally.
    pub async fn create(
        &self,
        title: &str,
        priority: Priority,
        completed: bool,
    ) -> Result<String, ClientError> {
        let temp_id = self.with_store(|store| {
            store.begin_create(title.to_string(), priority, completed, &self.username)
        })?;

        let params = json!({
            "title": title,
            "priority": priority,
            "completed": completed,
        });
        match self.call("task.create", params).await {
            Ok(result) => {
                let id = result["id"]
                    .as_str()
                    .ok_or_else(|| ClientError::Protocol("create ack without id".to_string()))?
                    .to_string();
                self.with_store(|store| store.ack_create_ok(&temp_id, id.clone()))?;
                Ok(id)
            }
            Err(e) => {
                self.with_store(|store| store.ack_create_err(&temp_id))?;
                Err(e)
            }
        }
    }

    /// Optimistically apply a full edit and send it.
    pub async fn update(&self, task: Task) -> Result<(), ClientError> {
        self.with_store(|store| store.begin_update(&task))?;

        let params = serde_json::to_value(&task)
            .map_err(|e| ClientError::Protocol(format!("unserializable task: {e}")))?;
        match self.call("task.update", params).await {
            Ok(_) => {
                self.with_store(|store| store.ack_update_ok(&task.id))?;
                Ok(())
            }
            Err(e) => {
                self.with_store(|store| store.ack_update_err(&task.id))?;
                Err(e)
            }
        }
    }

    /// Optimistically remove a task and send the delete.
    pub async fn delete(&self, id: &str) -> Result<(), ClientError> {
        self.with_store(|store| store.begin_delete(id))?;

        match self.call("task.delete", json!({ "id": id })).await {
            Ok(_) => {
                self.with_store(|store| store.ack_delete_ok(id))?;
                Ok(())
            }
            Err(e) => {
                self.with_store(|store| store.ack_delete_err(id))?;
                Err(e)
            }
        }
    }

    /// Read one task directly from the server (no store interaction).
    pub async fn read(&self, id: &str) -> Result<Task, ClientError> {
        let result = self.call("task.read", json!({ "id": id })).await?;
        serde_json::from_value(result["task"].clone())
            .map_err(|e| ClientError::Protocol(format!("malformed task: {e}")))
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let id = self.next_id.fetch_add(1, AtomicOrdering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut acks = self.pending.lock().map_err(|_| ClientError::Closed)?;
            acks.insert(id, tx);
        }

        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        self.outgoing
            .send(Message::Text(frame.to_string()))
            .map_err(|_| ClientError::Closed)?;

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(failure)) => Err(ClientError::Rpc(failure)),
            Err(_) => Err(ClientError::Closed),
        }
    }

    fn with_store<T>(&self, f: impl FnOnce(&mut TaskStore) -> T) -> Result<T, ClientError> {
        let mut store = self.store.lock().map_err(|_| ClientError::Closed)?;
        Ok(f(&mut store))
    }
}

/// Dispatch one incoming frame: an ack resolves its waiting caller, a
/// notification mutates the store.
fn handle_frame(text: &str, store: &Arc<Mutex<TaskStore>>, pending: &PendingAcks) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(err = %e, "dropping malformed frame");
            return;
        }
    };

    if let Some(method) = frame.get("method").and_then(Value::as_str) {
        let params = frame.get("params").cloned().unwrap_or(Value::Null);
        apply_notification(method, params, store);
        return;
    }

    let Some(id) = frame.get("id").and_then(Value::as_u64) else {
        debug!("dropping frame with no method and no numeric id");
        return;
    };
    let Some(tx) = pending.lock().ok().and_then(|mut acks| acks.remove(&id)) else {
        return;
    };

    let outcome = match frame.get("error") {
        Some(error) => {
            let details = error
                .get("data")
                .and_then(|d| d.get("errorDetails"))
                .cloned()
                .map(serde_json::from_value::<Vec<FieldError>>)
                .and_then(Result::ok)
                .unwrap_or_default();
            Err(RpcFailure {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(0) as i32,
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
                details,
            })
        }
        None => Ok(frame.get("result").cloned().unwrap_or(Value::Null)),
    };
    let _ = tx.send(outcome);
}

fn apply_notification(method: &str, params: Value, store: &Arc<Mutex<TaskStore>>) {
    let Ok(mut store) = store.lock() else {
        return;
    };
    match method {
        "task.created" => match serde_json::from_value::<Task>(params) {
            Ok(task) => store.remote_created(task),
            Err(e) => warn!(err = %e, "malformed task.created payload"),
        },
        "task.updated" => match serde_json::from_value::<Task>(params) {
            Ok(task) => store.remote_updated(&task),
            Err(e) => warn!(err = %e, "malformed task.updated payload"),
        },
        "task.deleted" => {
            if let Some(id) = params.get("id").and_then(Value::as_str) {
                store.remote_deleted(id);
            } else {
                warn!("malformed task.deleted payload");
            }
        }
        other => debug!(method = %other, "ignoring unknown notification"),
    }
}
