use relay_proto::Role;
use reqwest::Client;
use serde_json::{Map, Value};
use url::Url;

use crate::error::SenderError;

/// Posts sensor snapshots to the hub's HTTP ingestion route.
#[derive(Clone)]
pub struct SensorClient {
    http: Client,
    base_url: Url,
}

impl SensorClient {
    pub fn new(base_url: Url) -> Self {
        Self {
            http: Client::new(),
            base_url,
        }
    }

    /// Sends one snapshot, optionally scoped to a single role, and returns
    /// the hub's acknowledgement.
    pub async fn push(
        &self,
        data: &Map<String, Value>,
        role: Option<&Role>,
    ) -> Result<Value, SenderError> {
        let mut url = self.base_url.join("data")?;
        if let Some(role) = role {
            url.query_pairs_mut().append_pair("role", role.as_str());
        }
        let res = self.http.post(url).json(data).send().await?;

        if res.status().is_success() {
            Ok(res.json::<Value>().await?)
        } else {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            Err(SenderError::UnexpectedStatus { status, body })
        }
    }
}

/// Parses a `--json` argument, which must be an object.
pub fn parse_snapshot(raw: &str) -> Result<Map<String, Value>, SenderError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(SenderError::Config("sensor data must be a JSON object".into())),
        Err(err) => Err(SenderError::Config(format!("sensor data is not JSON: {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn snapshot_must_be_an_object() {
        let map = parse_snapshot(r#"{"temperature": 21.5}"#).unwrap();
        assert_eq!(map["temperature"], 21.5);

        assert!(matches!(parse_snapshot("[1, 2]"), Err(SenderError::Config(_))));
        assert!(matches!(parse_snapshot("{oops"), Err(SenderError::Config(_))));
    }
}
