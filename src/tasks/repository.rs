//! Repository seams for the shared collections.
//!
//! Handlers only see this trait; the SQLite implementation lives in
//! [`crate::tasks::storage`]. The in-memory variant backs unit tests that
//! must run without a live store.

use crate::tasks::Task;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a newly created entity. Ids are assigned exactly once by the
    /// caller and never reused; inserting a duplicate id is an error.
    async fn save(&self, task: &Task) -> Result<()>;

    /// Full replace of the stored fields. Returns `false` when the id is
    /// absent (last write wins between concurrent writers — whichever
    /// replace commits last determines final state).
    async fn replace(&self, task: &Task) -> Result<bool>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Task>>;

    /// Returns `false` when the id was already absent.
    async fn delete_by_id(&self, id: &str) -> Result<bool>;

    async fn find_all(&self) -> Result<Vec<Task>>;
}

// ─── In-memory implementation ────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryTaskRepository {
    tasks: Mutex<HashMap<String, Task>>,
}

impl MemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for MemoryTaskRepository {
    async fn save(&self, task: &Task) -> Result<()> {
        let mut tasks = self.tasks.lock().map_err(|_| anyhow!("lock poisoned"))?;
        if tasks.contains_key(&task.id) {
            return Err(anyhow!("duplicate task id {}", task.id));
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn replace(&self, task: &Task) -> Result<bool> {
        let mut tasks = self.tasks.lock().map_err(|_| anyhow!("lock poisoned"))?;
        match tasks.get_mut(&task.id) {
            Some(existing) => {
                *existing = task.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Task>> {
        let tasks = self.tasks.lock().map_err(|_| anyhow!("lock poisoned"))?;
        Ok(tasks.get(id).cloned())
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool> {
        let mut tasks = self.tasks.lock().map_err(|_| anyhow!("lock poisoned"))?;
        Ok(tasks.remove(id).is_some())
    }

    async fn find_all(&self) -> Result<Vec<Task>> {
        let tasks = self.tasks.lock().map_err(|_| anyhow!("lock poisoned"))?;
        Ok(tasks.values().cloned().collect())
    }
}
