//! Change-event fan-out to connected clients.
//!
//! Broadcasts are one-way notifications with no acknowledgement. Every
//! envelope is tagged with the issuing connection, which filters its own
//! events out — the issuer already holds the equivalent optimistic state.

use crate::tasks::Task;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

pub type ConnectionId = u64;

/// A state change that must reach every other connection.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// Full entity after a successful create.
    Created(Task),
    /// Full entity after a successful update.
    Updated(Task),
    /// Id only — the entity is gone.
    Deleted(String),
}

impl TaskEvent {
    pub fn method(&self) -> &'static str {
        match self {
            TaskEvent::Created(_) => "task.created",
            TaskEvent::Updated(_) => "task.updated",
            TaskEvent::Deleted(_) => "task.deleted",
        }
    }

    pub fn params(&self) -> Value {
        match self {
            TaskEvent::Created(task) | TaskEvent::Updated(task) => {
                serde_json::to_value(task).unwrap_or_default()
            }
            TaskEvent::Deleted(id) => json!({ "id": id }),
        }
    }
}

/// A serialized notification frame plus the connection that caused it.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub origin: ConnectionId,
    pub frame: String,
}

/// Fans JSON-RPC notification frames out to all connection tasks.
pub struct EventBroadcaster {
    tx: broadcast::Sender<Envelope>,
    next_conn: AtomicU64,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self {
            tx,
            next_conn: AtomicU64::new(1),
        }
    }

    /// Hand out a fresh id for a newly accepted connection.
    pub fn register_connection(&self) -> ConnectionId {
        self.next_conn.fetch_add(1, Ordering::Relaxed)
    }

    /// Publish a change event on behalf of `origin`. Connection tasks drop
    /// envelopes whose origin matches their own id.
    pub fn broadcast(&self, origin: ConnectionId, event: &TaskEvent) {
        let notification = json!({
            "jsonrpc": "2.0",
            "method": event.method(),
            "params": event.params(),
        });
        // Ignore errors — no subscribers is fine
        let _ = self.tx.send(Envelope {
            origin,
            frame: notification.to_string(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::Priority;

    fn task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            title: "t".to_string(),
            priority: Priority::Low,
            completed: false,
            created_by: "alice".to_string(),
            assigned_to: "alice".to_string(),
        }
    }

    #[tokio::test]
    async fn envelopes_carry_origin_and_method() {
        let broadcaster = EventBroadcaster::new();
        let mut rx = broadcaster.subscribe();
        let origin = broadcaster.register_connection();

        broadcaster.broadcast(origin, &TaskEvent::Created(task("a")));
        let env = rx.recv().await.unwrap();
        assert_eq!(env.origin, origin);
        let frame: Value = serde_json::from_str(&env.frame).unwrap();
        assert_eq!(frame["method"], "task.created");
        assert_eq!(frame["params"]["id"], "a");
        assert!(frame.get("id").is_none(), "notifications have no id member");
    }

    #[tokio::test]
    async fn deleted_carries_id_only() {
        let broadcaster = EventBroadcaster::new();
        let mut rx = broadcaster.subscribe();
        broadcaster.broadcast(7, &TaskEvent::Deleted("x".to_string()));
        let env = rx.recv().await.unwrap();
        let frame: Value = serde_json::from_str(&env.frame).unwrap();
        assert_eq!(frame["method"], "task.deleted");
        assert_eq!(frame["params"], json!({ "id": "x" }));
    }

    #[test]
    fn connection_ids_are_unique() {
        let broadcaster = EventBroadcaster::new();
        let a = broadcaster.register_connection();
        let b = broadcaster.register_connection();
        assert_ne!(a, b);
    }
}
