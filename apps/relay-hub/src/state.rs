use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use relay_proto::{now_millis, HubMessage, Role};
use serde_json::{Map, Value};
use tracing::info;

use crate::{
    admission::AdmissionPolicy,
    alerts::SosFlag,
    broadcast::{BroadcastReport, Broadcaster},
    config::{HeartbeatConfig, HubConfig},
    registry::ConnectionRegistry,
    sensor::{SensorCache, SensorSnapshot},
    stats::{HubStats, StatsResponse},
};

pub type SharedState = Arc<AppState>;

/// Everything a session task or HTTP handler needs. The registry, the sensor
/// snapshot and the SOS flag are the only shared mutable pieces.
pub struct AppState {
    pub policy: AdmissionPolicy,
    pub registry: ConnectionRegistry,
    pub broadcaster: Broadcaster,
    pub sensor: SensorCache,
    pub sos: SosFlag,
    pub stats: HubStats,
    pub heartbeat: HeartbeatConfig,
    pub viewer_buffer: usize,
    /// Held across store and broadcast so viewers see snapshots in the
    /// order they were stored. Never taken while the registry lock is held.
    ingest: Mutex<()>,
    metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: &HubConfig, metrics: Option<PrometheusHandle>) -> SharedState {
        let registry = ConnectionRegistry::new();
        let stats = HubStats::new();
        Arc::new(Self {
            policy: AdmissionPolicy::new(config.token.clone(), config.roles.clone()),
            broadcaster: Broadcaster::new(registry.clone(), stats.clone()),
            registry,
            sensor: SensorCache::new(),
            sos: SosFlag::new(),
            stats,
            heartbeat: config.heartbeat,
            viewer_buffer: config.viewer_buffer,
            ingest: Mutex::new(()),
            metrics,
        })
    }

    /// Stores `data` as the snapshot and pushes it to the viewers of `scope`,
    /// or of every recognised role when no scope is given.
    pub fn ingest_sensor(
        &self,
        data: Map<String, Value>,
        scope: Option<&Role>,
    ) -> (SensorSnapshot, BroadcastReport) {
        let (snapshot, report) = {
            let _ordered = self.ingest.lock();
            let snapshot = self.sensor.store(data);
            let message = snapshot.to_message();
            let report = match scope {
                Some(role) => self.broadcaster.broadcast(role, &message),
                None => self.broadcaster.broadcast_to(self.policy.roles(), &message),
            };
            (snapshot, report)
        };
        self.stats.sensor_updated();
        info!(
            fields = snapshot.data.len(),
            delivered = report.delivered,
            "sensor snapshot updated"
        );
        (snapshot, report)
    }

    /// Returns whether the flag changed. Viewers hear about changes only.
    pub fn set_sos(&self, active: bool) -> bool {
        let changed = self.sos.set(active);
        if changed {
            let message = HubMessage::Sos {
                active,
                timestamp: now_millis(),
            };
            let report = self.broadcaster.broadcast_to(self.policy.roles(), &message);
            info!(active, delivered = report.delivered, "sos flag changed");
        }
        changed
    }

    pub fn stats(&self) -> StatsResponse {
        let mut viewers = self.registry.viewer_counts();
        for role in self.policy.roles() {
            viewers.entry(role.to_string()).or_insert(0);
        }
        self.stats.snapshot(self.registry.sender_count(), viewers)
    }

    pub fn render_metrics(&self) -> Option<String> {
        self.metrics.as_ref().map(PrometheusHandle::render)
    }
}
