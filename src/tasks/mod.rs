//! Shared task entity: model, priority levels, and payload validation.
//!
//! Validation collects every violation (it never aborts on the first) and
//! reports each one with a field path and the constraint that failed, so
//! clients can attach errors to individual form fields.

pub mod repository;
pub mod storage;

use crate::error::FieldError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum title length in characters.
pub const TITLE_MAX_CHARS: usize = 256;

/// Closed set of priority levels, ranked Hi-Pri first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    #[serde(rename = "Hi-Pri")]
    HiPri,
    Medium,
    Low,
}

impl Priority {
    /// Sort rank: Hi-Pri → 1, Medium → 2, Low → 3.
    pub const fn rank(self) -> u8 {
        match self {
            Priority::HiPri => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Priority::HiPri => "Hi-Pri",
            Priority::Medium => "Medium",
            Priority::Low => "Low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Hi-Pri" => Some(Priority::HiPri),
            "Medium" => Some(Priority::Medium),
            "Low" => Some(Priority::Low),
            _ => None,
        }
    }
}

/// The shared entity. `id` is server-generated on create and immutable
/// thereafter; ids are never reused after deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub priority: Priority,
    pub completed: bool,
    pub created_by: String,
    pub assigned_to: String,
}

/// A validated create/update payload before identity defaults and id
/// assignment are applied by the handler.
#[derive(Debug, Clone)]
pub struct TaskDraft {
    /// Present (and uuid-checked) for update, absent for create.
    pub id: Option<String>,
    pub title: String,
    pub priority: Priority,
    pub completed: bool,
    pub created_by: Option<String>,
    pub assigned_to: Option<String>,
}

impl TaskDraft {
    /// Materialize the draft into an entity, defaulting `createdBy` and
    /// `assignedTo` to the acting identity when omitted.
    pub fn into_task(self, id: String, acting_user: &str) -> Task {
        Task {
            id,
            title: self.title,
            priority: self.priority,
            completed: self.completed,
            created_by: self.created_by.unwrap_or_else(|| acting_user.to_string()),
            assigned_to: self.assigned_to.unwrap_or_else(|| acting_user.to_string()),
        }
    }
}

/// Whether `id` is forbidden (create) or required (update) in the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Create,
    Update,
}

/// Check that a bare id argument (read/delete) matches the identifier
/// format. Format failures are a different error kind than missing rows.
pub fn is_well_formed_id(id: &str) -> bool {
    uuid::Uuid::parse_str(id).is_ok()
}

/// Validate a raw command payload. Unknown fields are ignored; all
/// violations are collected before returning.
pub fn validate_payload(payload: &Value, mode: ValidationMode) -> Result<TaskDraft, Vec<FieldError>> {
    let Some(obj) = payload.as_object() else {
        return Err(vec![FieldError {
            path: vec![],
            message: "payload must be an object".to_string(),
            constraint: "object.base".to_string(),
        }]);
    };

    let mut errors = Vec::new();

    // id — forbidden on create, required uuid on update
    let id = match (mode, obj.get("id")) {
        (ValidationMode::Create, None) => None,
        (ValidationMode::Create, Some(_)) => {
            errors.push(FieldError::new("id", "\"id\" is not allowed", "any.forbidden"));
            None
        }
        (ValidationMode::Update, None) => {
            errors.push(FieldError::new("id", "\"id\" is required", "any.required"));
            None
        }
        (ValidationMode::Update, Some(v)) => match v.as_str() {
            None => {
                errors.push(FieldError::new("id", "\"id\" must be a string", "string.base"));
                None
            }
            Some(s) if !is_well_formed_id(s) => {
                errors.push(FieldError::new("id", "\"id\" must be a valid GUID", "string.guid"));
                None
            }
            Some(s) => Some(s.to_string()),
        },
    };

    let title = match obj.get("title") {
        None => {
            errors.push(FieldError::new("title", "\"title\" is required", "any.required"));
            None
        }
        Some(v) => match v.as_str() {
            None => {
                errors.push(FieldError::new("title", "\"title\" must be a string", "string.base"));
                None
            }
            Some("") => {
                errors.push(FieldError::new(
                    "title",
                    "\"title\" is not allowed to be empty",
                    "string.empty",
                ));
                None
            }
            Some(s) if s.chars().count() > TITLE_MAX_CHARS => {
                errors.push(FieldError::new(
                    "title",
                    "\"title\" length must be less than or equal to 256 characters long",
                    "string.max",
                ));
                None
            }
            Some(s) => Some(s.to_string()),
        },
    };

    let priority = match obj.get("priority") {
        None => {
            errors.push(FieldError::new(
                "priority",
                "\"priority\" is required",
                "any.required",
            ));
            None
        }
        Some(v) => match v.as_str() {
            None => {
                errors.push(FieldError::new(
                    "priority",
                    "\"priority\" must be a string",
                    "string.base",
                ));
                None
            }
            Some(s) => match Priority::parse(s) {
                Some(p) => Some(p),
                None => {
                    errors.push(FieldError::new(
                        "priority",
                        "\"priority\" must be one of [Hi-Pri, Medium, Low]",
                        "any.only",
                    ));
                    None
                }
            },
        },
    };

    let completed = match obj.get("completed") {
        None => {
            errors.push(FieldError::new(
                "completed",
                "\"completed\" is required",
                "any.required",
            ));
            None
        }
        Some(v) => match v.as_bool() {
            None => {
                errors.push(FieldError::new(
                    "completed",
                    "\"completed\" must be a boolean",
                    "boolean.base",
                ));
                None
            }
            Some(b) => Some(b),
        },
    };

    let created_by = optional_string(obj, "createdBy", &mut errors);
    let assigned_to = optional_string(obj, "assignedTo", &mut errors);

    if !errors.is_empty() {
        return Err(errors);
    }

    // All Nones were reported above; unwraps here cannot fire.
    match (title, priority, completed) {
        (Some(title), Some(priority), Some(completed)) => Ok(TaskDraft {
            id,
            title,
            priority,
            completed,
            created_by,
            assigned_to,
        }),
        _ => Err(vec![FieldError {
            path: vec![],
            message: "payload validation failed".to_string(),
            constraint: "object.base".to_string(),
        }]),
    }
}

fn optional_string(
    obj: &serde_json::Map<String, Value>,
    field: &str,
    errors: &mut Vec<FieldError>,
) -> Option<String> {
    match obj.get(field) {
        None | Some(Value::Null) => None,
        Some(v) => match v.as_str() {
            Some(s) => Some(s.to_string()),
            None => {
                errors.push(FieldError::new(
                    field,
                    &format!("\"{field}\" must be a string"),
                    "string.base",
                ));
                None
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn paths(errors: &[FieldError]) -> Vec<String> {
        errors.iter().map(|e| e.path.join(".")).collect()
    }

    #[test]
    fn create_accepts_minimal_payload() {
        let draft = validate_payload(
            &json!({ "title": "walk dog", "priority": "Hi-Pri", "completed": false }),
            ValidationMode::Create,
        )
        .unwrap();
        assert_eq!(draft.title, "walk dog");
        assert_eq!(draft.priority, Priority::HiPri);
        assert!(!draft.completed);
        assert!(draft.id.is_none());
    }

    #[test]
    fn create_forbids_id() {
        let errs = validate_payload(
            &json!({
                "id": "b9c0a5a0-0000-4000-8000-000000000000",
                "title": "x", "priority": "Low", "completed": true
            }),
            ValidationMode::Create,
        )
        .unwrap_err();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].path, vec!["id"]);
        assert_eq!(errs[0].constraint, "any.forbidden");
    }

    #[test]
    fn missing_fields_are_all_reported() {
        let errs = validate_payload(&json!({}), ValidationMode::Create).unwrap_err();
        let paths = paths(&errs);
        assert!(paths.contains(&"title".to_string()));
        assert!(paths.contains(&"priority".to_string()));
        assert!(paths.contains(&"completed".to_string()));
        assert!(errs.iter().all(|e| e.constraint == "any.required"));
    }

    #[test]
    fn update_requires_well_formed_id() {
        let errs = validate_payload(
            &json!({ "id": "nope", "title": "x", "priority": "Low", "completed": false }),
            ValidationMode::Update,
        )
        .unwrap_err();
        assert_eq!(errs[0].constraint, "string.guid");

        let errs = validate_payload(
            &json!({ "title": "x", "priority": "Low", "completed": false }),
            ValidationMode::Update,
        )
        .unwrap_err();
        assert_eq!(errs[0].path, vec!["id"]);
        assert_eq!(errs[0].constraint, "any.required");
    }

    #[test]
    fn title_length_is_bounded() {
        let long = "x".repeat(TITLE_MAX_CHARS + 1);
        let errs = validate_payload(
            &json!({ "title": long, "priority": "Medium", "completed": false }),
            ValidationMode::Create,
        )
        .unwrap_err();
        assert_eq!(errs[0].constraint, "string.max");

        let exact = "x".repeat(TITLE_MAX_CHARS);
        assert!(validate_payload(
            &json!({ "title": exact, "priority": "Medium", "completed": false }),
            ValidationMode::Create,
        )
        .is_ok());
    }

    #[test]
    fn priority_is_a_closed_set() {
        let errs = validate_payload(
            &json!({ "title": "x", "priority": "Urgent", "completed": false }),
            ValidationMode::Create,
        )
        .unwrap_err();
        assert_eq!(errs[0].constraint, "any.only");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let draft = validate_payload(
            &json!({
                "title": "x", "priority": "Low", "completed": true,
                "editing": true, "synced": false
            }),
            ValidationMode::Create,
        )
        .unwrap();
        assert_eq!(draft.title, "x");
    }

    #[test]
    fn identity_defaults_apply_when_omitted() {
        let draft = validate_payload(
            &json!({ "title": "x", "priority": "Low", "completed": false }),
            ValidationMode::Create,
        )
        .unwrap();
        let task = draft.into_task("some-id".to_string(), "alice");
        assert_eq!(task.created_by, "alice");
        assert_eq!(task.assigned_to, "alice");

        let draft = validate_payload(
            &json!({
                "title": "x", "priority": "Low", "completed": false,
                "assignedTo": "bob"
            }),
            ValidationMode::Create,
        )
        .unwrap();
        let task = draft.into_task("some-id".to_string(), "alice");
        assert_eq!(task.created_by, "alice");
        assert_eq!(task.assigned_to, "bob");
    }

    #[test]
    fn priority_serde_uses_wire_names() {
        assert_eq!(serde_json::to_value(Priority::HiPri).unwrap(), json!("Hi-Pri"));
        assert_eq!(
            serde_json::from_value::<Priority>(json!("Medium")).unwrap(),
            Priority::Medium
        );
    }
}
