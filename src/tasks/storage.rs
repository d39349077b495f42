//! SQLite persistence for tasks and users (WAL mode, shared pool).

use crate::tasks::repository::TaskRepository;
use crate::tasks::{Priority, Task};
use crate::users::repository::UserRepository;
use crate::users::User;
use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::path::Path;
use std::str::FromStr;

/// Default timeout for individual SQLite queries.
/// Prevents hung queries from blocking the daemon indefinitely.
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Execute a future with the standard query timeout.
async fn with_timeout<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!(
            "database query timed out after {}s",
            QUERY_TIMEOUT.as_secs()
        )),
    }
}

// ─── Row types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow)]
struct TaskRow {
    id: String,
    title: String,
    priority: String,
    completed: bool,
    created_by: String,
    assigned_to: String,
}

impl TaskRow {
    fn into_task(self) -> Result<Task> {
        let priority = Priority::parse(&self.priority)
            .ok_or_else(|| anyhow!("unknown priority level {:?} for task {}", self.priority, self.id))?;
        Ok(Task {
            id: self.id,
            title: self.title,
            priority,
            completed: self.completed,
            created_by: self.created_by,
            assigned_to: self.assigned_to,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct UserRow {
    username: String,
    password_hash: String,
    /// JSON object of stored preference flags.
    preferences: String,
}

impl UserRow {
    fn into_user(self) -> Result<User> {
        let preferences = serde_json::from_str(&self.preferences)
            .with_context(|| format!("corrupt preferences for user {}", self.username))?;
        Ok(User {
            username: self.username,
            password_hash: self.password_hash,
            preferences,
        })
    }
}

// ─── Storage ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("taskhub.db");
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);

        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Return a clone of the connection pool (cheap — Arc-backed).
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tasks (
                id          TEXT PRIMARY KEY,
                title       TEXT NOT NULL,
                priority    TEXT NOT NULL,
                completed   INTEGER NOT NULL,
                created_by  TEXT NOT NULL,
                assigned_to TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await
        .context("failed to create tasks table")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                username      TEXT PRIMARY KEY,
                password_hash TEXT NOT NULL,
                preferences   TEXT NOT NULL DEFAULT '{}',
                created_at    TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await
        .context("failed to create users table")?;

        Ok(())
    }
}

// ─── SqliteTaskRepository ─────────────────────────────────────────────────────

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn save(&self, task: &Task) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        with_timeout(async {
            sqlx::query(
                "INSERT INTO tasks (id, title, priority, completed, created_by, assigned_to, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&task.id)
            .bind(&task.title)
            .bind(task.priority.as_str())
            .bind(task.completed)
            .bind(&task.created_by)
            .bind(&task.assigned_to)
            .bind(&now)
            .bind(&now)
            .execute(&self.pool)
            .await
            .context("failed to insert task")?;
            Ok(())
        })
        .await
    }

    async fn replace(&self, task: &Task) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        with_timeout(async {
            let result = sqlx::query(
                "UPDATE tasks
                 SET title = ?, priority = ?, completed = ?, created_by = ?, assigned_to = ?, updated_at = ?
                 WHERE id = ?",
            )
            .bind(&task.title)
            .bind(task.priority.as_str())
            .bind(task.completed)
            .bind(&task.created_by)
            .bind(&task.assigned_to)
            .bind(&now)
            .bind(&task.id)
            .execute(&self.pool)
            .await
            .context("failed to update task")?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Task>> {
        with_timeout(async {
            let row = sqlx::query_as::<_, TaskRow>(
                "SELECT id, title, priority, completed, created_by, assigned_to
                 FROM tasks WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to read task")?;
            row.map(TaskRow::into_task).transpose()
        })
        .await
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool> {
        with_timeout(async {
            let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await
                .context("failed to delete task")?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn find_all(&self) -> Result<Vec<Task>> {
        with_timeout(async {
            let rows = sqlx::query_as::<_, TaskRow>(
                "SELECT id, title, priority, completed, created_by, assigned_to
                 FROM tasks ORDER BY created_at",
            )
            .fetch_all(&self.pool)
            .await
            .context("failed to list tasks")?;
            rows.into_iter().map(TaskRow::into_task).collect()
        })
        .await
    }
}

// ─── SqliteUserRepository ─────────────────────────────────────────────────────

pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        with_timeout(async {
            let row = sqlx::query_as::<_, UserRow>(
                "SELECT username, password_hash, preferences FROM users WHERE username = ?",
            )
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .context("failed to read user")?;
            row.map(UserRow::into_user).transpose()
        })
        .await
    }

    async fn insert(&self, user: &User) -> Result<bool> {
        let preferences = serde_json::to_string(&user.preferences)?;
        let now = Utc::now().to_rfc3339();
        with_timeout(async {
            // DO NOTHING makes the taken-username check and the write one
            // atomic statement; racing registrations leave exactly one row.
            let result = sqlx::query(
                "INSERT INTO users (username, password_hash, preferences, created_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(username) DO NOTHING",
            )
            .bind(&user.username)
            .bind(&user.password_hash)
            .bind(&preferences)
            .bind(&now)
            .execute(&self.pool)
            .await
            .context("failed to insert user")?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn upsert(&self, user: &User) -> Result<()> {
        let preferences = serde_json::to_string(&user.preferences)?;
        let now = Utc::now().to_rfc3339();
        with_timeout(async {
            sqlx::query(
                "INSERT INTO users (username, password_hash, preferences, created_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(username) DO UPDATE
                 SET password_hash = excluded.password_hash,
                     preferences = excluded.preferences",
            )
            .bind(&user.username)
            .bind(&user.password_hash)
            .bind(&preferences)
            .bind(&now)
            .execute(&self.pool)
            .await
            .context("failed to upsert user")?;
            Ok(())
        })
        .await
    }

    async fn delete_by_username(&self, username: &str) -> Result<bool> {
        with_timeout(async {
            let result = sqlx::query("DELETE FROM users WHERE username = ?")
                .bind(username)
                .execute(&self.pool)
                .await
                .context("failed to delete user")?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn find_all(&self) -> Result<Vec<User>> {
        with_timeout(async {
            let rows = sqlx::query_as::<_, UserRow>(
                "SELECT username, password_hash, preferences FROM users ORDER BY username",
            )
            .fetch_all(&self.pool)
            .await
            .context("failed to list users")?;
            rows.into_iter().map(UserRow::into_user).collect()
        })
        .await
    }
}
