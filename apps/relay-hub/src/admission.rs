//! Connection Validator: decides admit/reject from the relay URL's query.
//!
//! Validation is pure. It never touches the registry, so a rejected
//! connection leaves no trace beyond a log line and a metric.

use std::collections::BTreeSet;

use relay_proto::{ConnectParams, ParticipantKind, Role};
use thiserror::Error;

/// Who an admitted connection is, recorded once and reused for unregister.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub role: Role,
    pub kind: ParticipantKind,
    /// Present for senders, absent for viewers.
    pub identifier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("invalid token")]
    InvalidToken,
    #[error("invalid role")]
    InvalidRole,
    #[error("identifier required for senders")]
    MissingIdentifier,
}

impl AdmissionError {
    pub fn metric_label(&self) -> &'static str {
        match self {
            AdmissionError::InvalidToken => "invalid_token",
            AdmissionError::InvalidRole => "invalid_role",
            AdmissionError::MissingIdentifier => "missing_identifier",
        }
    }
}

/// The shared secret plus the set of recognised roles.
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    token: String,
    roles: BTreeSet<Role>,
}

impl AdmissionPolicy {
    pub fn new(token: impl Into<String>, roles: BTreeSet<Role>) -> Self {
        Self {
            token: token.into(),
            roles,
        }
    }

    pub fn roles(&self) -> &BTreeSet<Role> {
        &self.roles
    }

    pub fn recognise(&self, raw: &str) -> Option<&Role> {
        self.roles.iter().find(|role| role.as_str() == raw)
    }

    /// Rules apply in order: token, role, then the sender identifier.
    pub fn validate(&self, params: &ConnectParams) -> Result<Admission, AdmissionError> {
        if !self.token_matches(params.token.as_deref()) {
            return Err(AdmissionError::InvalidToken);
        }

        let role = params
            .role
            .as_deref()
            .and_then(|raw| self.recognise(raw))
            .cloned()
            .ok_or(AdmissionError::InvalidRole)?;

        let kind = params.kind();
        let identifier = match kind {
            ParticipantKind::Sender => Some(
                params
                    .identifier()
                    .ok_or(AdmissionError::MissingIdentifier)?
                    .to_string(),
            ),
            ParticipantKind::Viewer => None,
        };

        Ok(Admission {
            role,
            kind,
            identifier,
        })
    }

    fn token_matches(&self, presented: Option<&str>) -> bool {
        let Some(presented) = presented else {
            return false;
        };
        let expected = self.token.as_bytes();
        let presented = presented.as_bytes();
        if expected.len() != presented.len() {
            return false;
        }
        expected
            .iter()
            .zip(presented)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}
