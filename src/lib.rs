pub mod ai;
pub mod client;
pub mod config;
pub mod error;
pub mod rest;
pub mod retry;
pub mod sync;
pub mod tasks;
pub mod users;

// Re-export auth so main.rs and tests can use taskhub::auth directly.
pub use sync::auth;

use std::sync::Arc;

use ai::AiClient;
use config::DaemonConfig;
use sync::event::EventBroadcaster;
use tasks::repository::TaskRepository;
use users::repository::UserRepository;

/// Shared application state passed to every command handler and REST route.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<DaemonConfig>,
    /// Shared task collection. Injected as a trait object so handlers are
    /// testable against any store.
    pub tasks: Arc<dyn TaskRepository>,
    /// User accounts and preference flags.
    pub users: Arc<dyn UserRepository>,
    /// Fan-out channel for `task.*` change notifications. Every broadcast
    /// is tagged with the issuing connection, which never receives it back.
    pub broadcaster: Arc<EventBroadcaster>,
    /// Upstream AI prioritization client (opaque request/response boundary).
    pub ai: Arc<AiClient>,
    pub started_at: std::time::Instant,
}
