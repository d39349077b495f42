//! User accounts and preference flags.
//!
//! Preferences are a fixed set of named booleans. Any subset omitted on a
//! write is backfilled with the defaults server-side before being stored or
//! returned, so clients always see the full set.

pub mod repository;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Preference flags with their defaults. `organization` is the only flag
/// that defaults to on.
pub const PREFERENCE_DEFAULTS: [(&str, bool); 8] = [
    ("petCare", false),
    ("laundry", false),
    ("cooking", false),
    ("organization", true),
    ("plantCare", false),
    ("houseWork", false),
    ("yardWork", false),
    ("familyCare", false),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    /// `salt$hex-digest` — opaque to everything but the login boundary.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Stored preference flags; may lag behind [`PREFERENCE_DEFAULTS`] when
    /// new flags are introduced, hence the merge on every read.
    pub preferences: Map<String, Value>,
}

/// Merge stored flags (and an optional incoming patch) over the defaults.
/// Every known flag is present in the result; unknown incoming keys are
/// kept, matching the stored-as-given behavior of the preferences store.
pub fn merge_preferences(stored: &Map<String, Value>, patch: Option<&Map<String, Value>>) -> Map<String, Value> {
    let mut merged = Map::new();
    for (key, default) in PREFERENCE_DEFAULTS {
        merged.insert(key.to_string(), Value::Bool(default));
    }
    for (key, value) in stored {
        merged.insert(key.clone(), value.clone());
    }
    if let Some(patch) = patch {
        for (key, value) in patch {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}
