//! Client-side reconciler: the local ordered task collection.
//!
//! Local mutations apply immediately (`synced = false`) before the command
//! is sent; the acknowledgement either confirms them (`synced = true`) or
//! triggers the compensating inverse recorded in the pending-operations
//! log. Remote broadcasts apply as-is: they are already server-confirmed.
//!
//! Remote-origin insertions and updates deliberately do not re-sort the
//! collection — only a full load and locally-issued creates re-apply the
//! ordering policy. The visible order can therefore go stale until the
//! next reload; that is existing behavior, kept on purpose.

use crate::client::ordering::sort_tasks;
use crate::tasks::{Priority, Task};
use std::collections::HashMap;
use uuid::Uuid;

/// A task as held locally: the entity plus transient client-only state.
/// `editing` and `synced` are never sent over the wire as authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTask {
    pub task: Task,
    /// Local UI intent flag.
    pub editing: bool,
    /// True once the server acknowledged the last mutation issued for this
    /// task; false while a local optimistic mutation is in flight.
    pub synced: bool,
}

impl LocalTask {
    fn confirmed(task: Task) -> Self {
        Self {
            task,
            editing: false,
            synced: true,
        }
    }
}

/// The compensating inverse of one in-flight optimistic mutation.
#[derive(Debug, Clone)]
enum PendingOp {
    /// Inverse: remove the provisional entry.
    Create,
    /// Inverse: restore the pre-edit entity.
    Update { prior: Task },
    /// Inverse: reinsert the removed entry at its old position.
    Delete { index: usize, prior: LocalTask },
}

#[derive(Default)]
pub struct TaskStore {
    tasks: Vec<LocalTask>,
    /// In-flight optimistic mutations, keyed by task id. At most one per
    /// task: the first inverse wins so a burst of edits rolls back to the
    /// last server-confirmed state.
    pending: HashMap<String, PendingOp>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> &[LocalTask] {
        &self.tasks
    }

    pub fn find(&self, id: &str) -> Option<&LocalTask> {
        self.tasks.iter().find(|t| t.task.id == id)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    // ── Full load ───────────────────────────────────────────────────────────

    /// Replace the entire local collection with the server's `list` result
    /// and re-derive the order. Drops any pending operations: the returned
    /// set is the new baseline.
    pub fn load(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks.into_iter().map(LocalTask::confirmed).collect();
        self.pending.clear();
        sort_tasks(&mut self.tasks);
    }

    // ── Remote broadcasts ───────────────────────────────────────────────────

    /// Append a remotely created entity. No re-sort (see module docs).
    pub fn remote_created(&mut self, task: Task) {
        if self.find(&task.id).is_some() {
            return;
        }
        self.tasks.push(LocalTask::confirmed(task));
    }

    /// Patch `title`, `priority`, `completed` of an existing entry.
    /// `createdBy`/`assignedTo` are left untouched. Unknown ids are ignored.
    pub fn remote_updated(&mut self, task: &Task) {
        if let Some(existing) = self.tasks.iter_mut().find(|t| t.task.id == task.id) {
            existing.task.title = task.title.clone();
            existing.task.priority = task.priority;
            existing.task.completed = task.completed;
        }
    }

    /// Remove by id. Idempotent: a second application is a no-op.
    pub fn remote_deleted(&mut self, id: &str) {
        self.tasks.retain(|t| t.task.id != id);
    }

    // ── Optimistic local mutations ──────────────────────────────────────────

    /// Insert a provisional entry under a temporary id and re-apply the
    /// ordering policy. Returns the temporary id; the server-assigned id
    /// must be copied back via [`TaskStore::ack_create_ok`] — never assumed.
    pub fn begin_create(
        &mut self,
        title: String,
        priority: Priority,
        completed: bool,
        username: &str,
    ) -> String {
        let temp_id = format!("pending-{}", Uuid::new_v4());
        self.tasks.push(LocalTask {
            task: Task {
                id: temp_id.clone(),
                title,
                priority,
                completed,
                created_by: username.to_string(),
                assigned_to: username.to_string(),
            },
            editing: false,
            synced: false,
        });
        self.pending.insert(temp_id.clone(), PendingOp::Create);
        sort_tasks(&mut self.tasks);
        temp_id
    }

    /// Adopt the server-assigned id and mark the entry confirmed.
    pub fn ack_create_ok(&mut self, temp_id: &str, server_id: String) {
        self.pending.remove(temp_id);
        if let Some(entry) = self.tasks.iter_mut().find(|t| t.task.id == temp_id) {
            entry.task.id = server_id;
            entry.synced = true;
        }
    }

    /// The create was rejected — remove the provisional entry.
    pub fn ack_create_err(&mut self, temp_id: &str) {
        self.pending.remove(temp_id);
        self.tasks.retain(|t| t.task.id != temp_id);
    }

    /// Apply an edit locally before sending it. Records the pre-edit entity
    /// as the inverse. Returns false when the id is not held locally.
    pub fn begin_update(&mut self, updated: &Task) -> bool {
        let Some(existing) = self.tasks.iter_mut().find(|t| t.task.id == updated.id) else {
            return false;
        };
        self.pending
            .entry(updated.id.clone())
            .or_insert_with(|| PendingOp::Update {
                prior: existing.task.clone(),
            });
        existing.task = updated.clone();
        existing.synced = false;
        true
    }

    pub fn ack_update_ok(&mut self, id: &str) {
        self.pending.remove(id);
        if let Some(entry) = self.tasks.iter_mut().find(|t| t.task.id == id) {
            entry.synced = true;
        }
    }

    /// The update was rejected — restore the pre-edit entity. The restored
    /// entry is marked synced: it matches the last server-confirmed state.
    pub fn ack_update_err(&mut self, id: &str) {
        let prior = match self.pending.remove(id) {
            Some(PendingOp::Update { prior }) => prior,
            Some(other) => {
                // Not an update — put it back untouched.
                self.pending.insert(id.to_string(), other);
                return;
            }
            None => return,
        };
        if let Some(entry) = self.tasks.iter_mut().find(|t| t.task.id == id) {
            entry.task = prior;
            entry.synced = true;
        }
    }

    /// Remove the entry locally before sending the delete. Returns the
    /// removed entity (to build the command) or None when absent.
    pub fn begin_delete(&mut self, id: &str) -> Option<Task> {
        let index = self.tasks.iter().position(|t| t.task.id == id)?;
        let prior = self.tasks.remove(index);
        let task = prior.task.clone();
        self.pending
            .insert(id.to_string(), PendingOp::Delete { index, prior });
        Some(task)
    }

    pub fn ack_delete_ok(&mut self, id: &str) {
        self.pending.remove(id);
    }

    /// The delete was rejected — reinsert the entry at its old position
    /// (clamped: the collection may have shrunk in the meantime).
    pub fn ack_delete_err(&mut self, id: &str) {
        let (index, prior) = match self.pending.remove(id) {
            Some(PendingOp::Delete { index, prior }) => (index, prior),
            Some(other) => {
                self.pending.insert(id.to_string(), other);
                return;
            }
            None => return,
        };
        let index = index.min(self.tasks.len());
        self.tasks.insert(index, prior);
    }

    // ── Views ───────────────────────────────────────────────────────────────

    pub fn completed(&self) -> impl Iterator<Item = &LocalTask> {
        self.tasks.iter().filter(|t| t.task.completed)
    }

    pub fn remaining(&self) -> impl Iterator<Item = &LocalTask> {
        self.tasks.iter().filter(|t| !t.task.completed)
    }

    pub fn all_completed(&self) -> bool {
        self.tasks.iter().all(|t| t.task.completed)
    }
}
