use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Audience tag scoping which senders' output a viewer receives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Role(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoleError {
    #[error("role must not be empty")]
    Empty,
    #[error("role {0:?} may only contain lowercase letters, digits, '-' and '_'")]
    InvalidCharacters(String),
}

impl Role {
    pub fn parse(raw: &str) -> Result<Self, RoleError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RoleError::Empty);
        }
        let valid = trimmed
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if !valid {
            return Err(RoleError::InvalidCharacters(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Role {
    type Error = RoleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Role::parse(&value)
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.0
    }
}

/// Whether a connection produces payloads or only consumes broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantKind {
    Sender,
    Viewer,
}

impl ParticipantKind {
    /// Anything other than an explicit `sender` is treated as a viewer,
    /// including an absent parameter.
    pub fn from_param(raw: Option<&str>) -> Self {
        match raw {
            Some("sender") => ParticipantKind::Sender,
            _ => ParticipantKind::Viewer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantKind::Sender => "sender",
            ParticipantKind::Viewer => "viewer",
        }
    }
}

impl fmt::Display for ParticipantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn role_parse_trims_and_accepts_tags() {
        assert_eq!(Role::parse(" admin ").unwrap().as_str(), "admin");
        assert_eq!(Role::parse("cam_2-b").unwrap().as_str(), "cam_2-b");
    }

    #[test_timeout::timeout]
    fn role_parse_rejects_empty_and_uppercase() {
        assert_eq!(Role::parse("  "), Err(RoleError::Empty));
        assert!(matches!(
            Role::parse("Admin"),
            Err(RoleError::InvalidCharacters(_))
        ));
    }

    #[test_timeout::timeout]
    fn unknown_kind_defaults_to_viewer() {
        assert_eq!(
            ParticipantKind::from_param(Some("sender")),
            ParticipantKind::Sender
        );
        assert_eq!(ParticipantKind::from_param(None), ParticipantKind::Viewer);
        assert_eq!(
            ParticipantKind::from_param(Some("camera")),
            ParticipantKind::Viewer
        );
    }
}
