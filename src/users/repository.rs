//! Injected user store seam: find-by-key, insert, upsert, delete-by-key.
//!
//! Replaces the shared mutable identity map of earlier designs so the REST
//! handlers are testable without a live store.

use crate::users::User;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Create a new account. Returns `false` without writing anything when
    /// the username is already taken, so two racing registrations can never
    /// overwrite each other's credentials.
    async fn insert(&self, user: &User) -> Result<bool>;

    /// Write the full record for an existing or new user. Registration must
    /// go through [`UserRepository::insert`] instead.
    async fn upsert(&self, user: &User) -> Result<()>;

    async fn delete_by_username(&self, username: &str) -> Result<bool>;
    async fn find_all(&self) -> Result<Vec<User>>;
}

#[derive(Default)]
pub struct MemoryUserRepository {
    users: Mutex<HashMap<String, User>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let users = self.users.lock().map_err(|_| anyhow!("lock poisoned"))?;
        Ok(users.get(username).cloned())
    }

    async fn insert(&self, user: &User) -> Result<bool> {
        let mut users = self.users.lock().map_err(|_| anyhow!("lock poisoned"))?;
        if users.contains_key(&user.username) {
            return Ok(false);
        }
        users.insert(user.username.clone(), user.clone());
        Ok(true)
    }

    async fn upsert(&self, user: &User) -> Result<()> {
        let mut users = self.users.lock().map_err(|_| anyhow!("lock poisoned"))?;
        users.insert(user.username.clone(), user.clone());
        Ok(())
    }

    async fn delete_by_username(&self, username: &str) -> Result<bool> {
        let mut users = self.users.lock().map_err(|_| anyhow!("lock poisoned"))?;
        Ok(users.remove(username).is_some())
    }

    async fn find_all(&self) -> Result<Vec<User>> {
        let users = self.users.lock().map_err(|_| anyhow!("lock poisoned"))?;
        let mut all: Vec<User> = users.values().cloned().collect();
        all.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn user(username: &str, hash: &str) -> User {
        User {
            username: username.to_string(),
            password_hash: hash.to_string(),
            preferences: Map::new(),
        }
    }

    #[tokio::test]
    async fn insert_refuses_taken_usernames_without_clobbering() {
        let repo = MemoryUserRepository::new();
        assert!(repo.insert(&user("alice", "first")).await.unwrap());
        assert!(!repo.insert(&user("alice", "second")).await.unwrap());

        let stored = repo.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(stored.password_hash, "first");
    }

    #[tokio::test]
    async fn upsert_still_replaces_existing_records() {
        let repo = MemoryUserRepository::new();
        assert!(repo.insert(&user("alice", "first")).await.unwrap());
        repo.upsert(&user("alice", "second")).await.unwrap();

        let stored = repo.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(stored.password_hash, "second");
    }
}
