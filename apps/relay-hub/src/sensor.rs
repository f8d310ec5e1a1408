//! Sensor State Cache: the single last-known telemetry snapshot.

use std::sync::Arc;

use parking_lot::RwLock;
use relay_proto::{now_millis, HubMessage};
use serde::Serialize;
use serde_json::{Map, Value};

/// A snapshot as ingested, with the time it replaced its predecessor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorSnapshot {
    pub data: Map<String, Value>,
    pub updated_at: u64,
}

impl SensorSnapshot {
    pub fn to_message(&self) -> HubMessage {
        HubMessage::Sensor {
            data: Value::Object(self.data.clone()),
            timestamp: self.updated_at,
        }
    }
}

/// `None` until the first ingestion, so an empty object posted on purpose
/// is still distinguishable from "no data yet".
#[derive(Clone, Default)]
pub struct SensorCache {
    current: Arc<RwLock<Option<SensorSnapshot>>>,
}

impl SensorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the snapshot wholesale; fields are never merged.
    pub fn store(&self, data: Map<String, Value>) -> SensorSnapshot {
        let snapshot = SensorSnapshot {
            data,
            updated_at: now_millis(),
        };
        *self.current.write() = Some(snapshot.clone());
        snapshot
    }

    pub fn current(&self) -> Option<SensorSnapshot> {
        self.current.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test_timeout::timeout]
    fn starts_empty() {
        assert!(SensorCache::new().current().is_none());
    }

    #[test_timeout::timeout]
    fn store_overwrites_instead_of_merging() {
        let cache = SensorCache::new();
        cache.store(object(json!({"temperature": 21.5, "humidity": 40})));
        cache.store(object(json!({"temperature": 22.0})));

        let current = cache.current().unwrap();
        assert_eq!(Value::Object(current.data), json!({"temperature": 22.0}));
    }

    #[test_timeout::timeout]
    fn empty_object_is_still_a_snapshot() {
        let cache = SensorCache::new();
        cache.store(Map::new());
        assert!(cache.current().is_some());
    }

    #[test_timeout::timeout]
    fn message_carries_the_stored_timestamp() {
        let cache = SensorCache::new();
        let snapshot = cache.store(object(json!({"sos": false})));
        match snapshot.to_message() {
            HubMessage::Sensor { data, timestamp } => {
                assert_eq!(data, json!({"sos": false}));
                assert_eq!(timestamp, snapshot.updated_at);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
}
