use url::Url;

use crate::role::ParticipantKind;

/// Connection-establishment parameters carried on the relay URL's query.
///
/// Both the hub's spelling (`kind`, `identifier`) and the camera-oriented
/// aliases (`user_type`, `camera_id`) are understood; unrecognised keys are
/// ignored. Values are kept raw so the validator decides what is acceptable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectParams {
    pub token: Option<String>,
    pub role: Option<String>,
    pub kind: Option<String>,
    pub identifier: Option<String>,
}

impl ConnectParams {
    pub fn sender(
        token: impl Into<String>,
        role: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            token: Some(token.into()),
            role: Some(role.into()),
            kind: Some(ParticipantKind::Sender.as_str().to_string()),
            identifier: Some(identifier.into()),
        }
    }

    pub fn viewer(token: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            role: Some(role.into()),
            kind: Some(ParticipantKind::Viewer.as_str().to_string()),
            identifier: None,
        }
    }

    /// Collects parameters from decoded query pairs. The first occurrence of
    /// each key wins.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut params = ConnectParams::default();
        for (key, value) in pairs {
            let slot = match key.as_ref() {
                "token" => &mut params.token,
                "role" => &mut params.role,
                "kind" | "user_type" => &mut params.kind,
                "identifier" | "camera_id" => &mut params.identifier,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into());
            }
        }
        params
    }

    pub fn kind(&self) -> ParticipantKind {
        ParticipantKind::from_param(self.kind.as_deref())
    }

    /// Identifier with empty strings folded into "missing".
    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref().filter(|id| !id.is_empty())
    }

    /// Writes the parameters onto `url`'s query, replacing any existing one.
    pub fn apply_to(&self, url: &mut Url) {
        let mut query = url.query_pairs_mut();
        query.clear();
        if let Some(token) = &self.token {
            query.append_pair("token", token);
        }
        if let Some(role) = &self.role {
            query.append_pair("role", role);
        }
        if let Some(kind) = &self.kind {
            query.append_pair("kind", kind);
        }
        if let Some(identifier) = &self.identifier {
            query.append_pair("identifier", identifier);
        }
    }
}
