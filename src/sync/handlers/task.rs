//! The five task commands.
//!
//! Every handler checks the bound identity before touching the payload, and
//! returns the change event to publish (if any) alongside the ack value. The
//! caller sends the ack first and broadcasts second, so the fixed order
//! persist → acknowledge → broadcast holds, and a failed command never
//! reaches other connections.

use crate::error::SyncError;
use crate::sync::auth::Identity;
use crate::sync::event::TaskEvent;
use crate::tasks::{is_well_formed_id, validate_payload, Task, ValidationMode};
use crate::AppContext;
use serde_json::{json, Value};
use uuid::Uuid;

/// Ack payload plus the event to fan out after the ack is sent.
pub type HandlerOutcome = (Value, Option<TaskEvent>);

fn require_identity(identity: Option<&Identity>) -> Result<&Identity, SyncError> {
    identity.ok_or(SyncError::AuthenticationRequired)
}

/// Pull a bare id argument out of `{ "id": ... }` params and check its
/// format. Malformed ids are a distinct failure from missing rows.
fn id_argument(params: &Value) -> Result<String, SyncError> {
    let id = params
        .get("id")
        .and_then(Value::as_str)
        .ok_or(SyncError::InvalidIdentifier)?;
    if !is_well_formed_id(id) {
        return Err(SyncError::InvalidIdentifier);
    }
    Ok(id.to_string())
}

pub async fn create(
    identity: Option<&Identity>,
    params: Value,
    ctx: &AppContext,
) -> Result<HandlerOutcome, SyncError> {
    let who = require_identity(identity)?;

    let draft =
        validate_payload(&params, ValidationMode::Create).map_err(SyncError::InvalidPayload)?;

    // Server-assigned, exactly once, never reused after deletion.
    let id = Uuid::new_v4().to_string();
    let task = draft.into_task(id.clone(), &who.username);

    ctx.tasks.save(&task).await.map_err(SyncError::persistence)?;

    Ok((json!({ "id": id }), Some(TaskEvent::Created(task))))
}

pub async fn read(
    identity: Option<&Identity>,
    params: Value,
    ctx: &AppContext,
) -> Result<HandlerOutcome, SyncError> {
    require_identity(identity)?;

    let id = id_argument(&params)?;
    let task = ctx
        .tasks
        .find_by_id(&id)
        .await
        .map_err(SyncError::persistence)?
        .ok_or(SyncError::EntityNotFound)?;

    Ok((json!({ "task": task }), None))
}

pub async fn update(
    identity: Option<&Identity>,
    params: Value,
    ctx: &AppContext,
) -> Result<HandlerOutcome, SyncError> {
    require_identity(identity)?;

    let draft =
        validate_payload(&params, ValidationMode::Update).map_err(SyncError::InvalidPayload)?;
    // Update mode guarantees a well-formed id in the draft.
    let id = draft.id.clone().ok_or(SyncError::InvalidIdentifier)?;

    // Identity defaults apply at creation only: an update that omits the
    // ownership fields keeps whatever the stored entity carries.
    let existing = ctx
        .tasks
        .find_by_id(&id)
        .await
        .map_err(SyncError::persistence)?
        .ok_or(SyncError::EntityNotFound)?;
    let task = Task {
        id,
        title: draft.title,
        priority: draft.priority,
        completed: draft.completed,
        created_by: draft.created_by.unwrap_or(existing.created_by),
        assigned_to: draft.assigned_to.unwrap_or(existing.assigned_to),
    };

    // Full replace; concurrent writers resolve last-write-wins here. The
    // row can vanish between the read above and this write, so the miss
    // check stays.
    let replaced = ctx
        .tasks
        .replace(&task)
        .await
        .map_err(SyncError::persistence)?;
    if !replaced {
        return Err(SyncError::EntityNotFound);
    }

    Ok((json!({}), Some(TaskEvent::Updated(task))))
}

pub async fn delete(
    identity: Option<&Identity>,
    params: Value,
    ctx: &AppContext,
) -> Result<HandlerOutcome, SyncError> {
    require_identity(identity)?;

    let id = id_argument(&params)?;
    let removed = ctx
        .tasks
        .delete_by_id(&id)
        .await
        .map_err(SyncError::persistence)?;
    if !removed {
        return Err(SyncError::EntityNotFound);
    }

    Ok((json!({}), Some(TaskEvent::Deleted(id))))
}

pub async fn list(
    identity: Option<&Identity>,
    _params: Value,
    ctx: &AppContext,
) -> Result<HandlerOutcome, SyncError> {
    require_identity(identity)?;

    let tasks = ctx.tasks.find_all().await.map_err(SyncError::persistence)?;
    Ok((json!({ "tasks": tasks }), None))
}
