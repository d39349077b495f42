//! Error taxonomy for the sync protocol.
//!
//! Every command failure reaches the issuing client as a structured error on
//! the acknowledgement channel — never as a dropped connection. Malformed id
//! format ([`SyncError::InvalidIdentifier`]) and missing entity
//! ([`SyncError::EntityNotFound`]) are distinct kinds.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One field-level validation failure, reported alongside
/// [`SyncError::InvalidPayload`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Path to the offending field, e.g. `["title"]`.
    pub path: Vec<String>,
    pub message: String,
    /// Constraint that was violated, e.g. `any.required` or `string.max`.
    #[serde(rename = "type")]
    pub constraint: String,
}

impl FieldError {
    pub fn new(field: &str, message: &str, constraint: &str) -> Self {
        Self {
            path: vec![field.to_string()],
            message: message.to_string(),
            constraint: constraint.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// No identity bound to the connection. Checked before any schema
    /// validation and before any repository call.
    #[error("authentication required")]
    AuthenticationRequired,

    /// Schema/constraint violation. Carries field-level detail; the
    /// operation has no side effect and nothing is broadcast.
    #[error("invalid payload")]
    InvalidPayload(Vec<FieldError>),

    /// The supplied id does not match the identifier format.
    #[error("invalid identifier")]
    InvalidIdentifier,

    /// The id is well-formed but absent from the repository.
    #[error("entity not found")]
    EntityNotFound,

    /// Underlying storage error. The wire message is sanitized — the full
    /// chain is only logged server-side.
    #[error("storage error")]
    Persistence(#[source] anyhow::Error),
}

impl SyncError {
    pub fn persistence(err: anyhow::Error) -> Self {
        Self::Persistence(err)
    }
}
