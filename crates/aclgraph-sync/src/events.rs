//! Role lifecycle events raised by the external identity service.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What happened to the role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleAction {
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for RoleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleAction::Created => write!(f, "created"),
            RoleAction::Updated => write!(f, "updated"),
            RoleAction::Deleted => write!(f, "deleted"),
        }
    }
}

/// A committed change to a role.
///
/// `previous_role_name` is only meaningful for [`RoleAction::Updated`] and
/// names the role before a rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleLifecycleEvent {
    pub action: RoleAction,
    pub role_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_role_name: Option<String>,
}

impl RoleLifecycleEvent {
    pub fn created(role_name: impl Into<String>) -> Self {
        Self {
            action: RoleAction::Created,
            role_name: role_name.into(),
            previous_role_name: None,
        }
    }

    pub fn updated(role_name: impl Into<String>, previous_role_name: Option<String>) -> Self {
        Self {
            action: RoleAction::Updated,
            role_name: role_name.into(),
            previous_role_name,
        }
    }

    pub fn renamed(previous: impl Into<String>, role_name: impl Into<String>) -> Self {
        Self::updated(role_name, Some(previous.into()))
    }

    pub fn deleted(role_name: impl Into<String>) -> Self {
        Self {
            action: RoleAction::Deleted,
            role_name: role_name.into(),
            previous_role_name: None,
        }
    }

    /// The trimmed previous name, if it names a different role.
    pub fn rename_source(&self) -> Option<&str> {
        let previous = self.previous_role_name.as_deref()?.trim();
        if previous.is_empty() || previous == self.role_name.trim() {
            return None;
        }
        Some(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event: RoleLifecycleEvent = serde_json::from_str(
            r#"{"action":"UPDATED","roleName":"EDITOR","previousRoleName":"AUTHOR"}"#,
        )
        .unwrap();
        assert_eq!(event, RoleLifecycleEvent::renamed("AUTHOR", "EDITOR"));

        let json = serde_json::to_string(&RoleLifecycleEvent::created("VIEWER")).unwrap();
        assert_eq!(json, r#"{"action":"CREATED","roleName":"VIEWER"}"#);
    }

    #[test]
    fn test_rename_source() {
        assert_eq!(
            RoleLifecycleEvent::renamed(" AUTHOR ", "EDITOR").rename_source(),
            Some("AUTHOR")
        );
        assert_eq!(
            RoleLifecycleEvent::renamed("EDITOR", " EDITOR").rename_source(),
            None
        );
        assert_eq!(
            RoleLifecycleEvent::updated("EDITOR", Some("  ".into())).rename_source(),
            None
        );
        assert_eq!(RoleLifecycleEvent::updated("EDITOR", None).rename_source(), None);
    }
}
