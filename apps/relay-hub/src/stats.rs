//! Advisory counters. Nothing in the relay path reads them back.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Instant,
};

use metrics::{
    counter, decrement_gauge, describe_counter, describe_gauge, describe_histogram, histogram,
    increment_gauge, Unit,
};
use relay_proto::Role;
use serde::Serialize;

use crate::{
    admission::{Admission, AdmissionError},
    broadcast::BroadcastReport,
};

pub const CONNECTIONS_TOTAL: &str = "relay_hub_connections_total";
pub const CONNECTIONS_ACTIVE: &str = "relay_hub_connections_active";
pub const ADMISSIONS_REJECTED_TOTAL: &str = "relay_hub_admissions_rejected_total";
pub const MESSAGES_RELAYED_TOTAL: &str = "relay_hub_messages_relayed_total";
pub const DELIVERY_DROPPED_TOTAL: &str = "relay_hub_delivery_dropped_total";
pub const VIEWERS_PRUNED_TOTAL: &str = "relay_hub_viewers_pruned_total";
pub const HEARTBEAT_TIMEOUTS_TOTAL: &str = "relay_hub_heartbeat_timeouts_total";
pub const SENSOR_UPDATES_TOTAL: &str = "relay_hub_sensor_updates_total";
pub const FANOUT_SIZE: &str = "relay_hub_fanout_size";

/// Audience sizes worth telling apart: none, one dashboard, a wall of them.
pub const FANOUT_BUCKETS: &[f64] = &[0.0, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0];

/// Registers help text for every hub metric with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(CONNECTIONS_TOTAL, "Admitted connections by role and kind");
    describe_gauge!(CONNECTIONS_ACTIVE, "Currently registered connections by role and kind");
    describe_counter!(
        ADMISSIONS_REJECTED_TOTAL,
        "Connections closed with a policy violation, by reason"
    );
    describe_counter!(
        MESSAGES_RELAYED_TOTAL,
        "Messages queued to viewers, by role and envelope type"
    );
    describe_counter!(
        DELIVERY_DROPPED_TOTAL,
        "Messages skipped because a viewer queue was full"
    );
    describe_counter!(VIEWERS_PRUNED_TOTAL, "Viewers removed after their queue closed");
    describe_counter!(
        HEARTBEAT_TIMEOUTS_TOTAL,
        "Connections dropped after missing heartbeats"
    );
    describe_counter!(SENSOR_UPDATES_TOTAL, "Sensor snapshots ingested");
    describe_histogram!(FANOUT_SIZE, Unit::Count, "Viewers targeted per broadcast");
}

#[derive(Clone)]
pub struct HubStats {
    inner: Arc<StatsInner>,
}

struct StatsInner {
    started: Instant,
    connections: AtomicUsize,
    messages_relayed: AtomicU64,
    frames_received: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uptime_secs: f64,
    pub connections: usize,
    pub senders: usize,
    pub viewers: BTreeMap<String, usize>,
    pub messages_relayed: u64,
    pub frames_received: u64,
    pub fps: f64,
}

impl Default for HubStats {
    fn default() -> Self {
        Self::new()
    }
}

impl HubStats {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StatsInner {
                started: Instant::now(),
                connections: AtomicUsize::new(0),
                messages_relayed: AtomicU64::new(0),
                frames_received: AtomicU64::new(0),
            }),
        }
    }

    pub fn connection_opened(&self, admission: &Admission) {
        self.inner.connections.fetch_add(1, Ordering::Relaxed);
        let role = admission.role.to_string();
        let kind = admission.kind.as_str();
        counter!(
            CONNECTIONS_TOTAL,
            1,
            "role" => role.clone(),
            "kind" => kind
        );
        increment_gauge!(
            CONNECTIONS_ACTIVE,
            1.0,
            "role" => role,
            "kind" => kind
        );
    }

    pub fn connection_closed(&self, admission: &Admission) {
        let _ = self
            .inner
            .connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        decrement_gauge!(
            CONNECTIONS_ACTIVE,
            1.0,
            "role" => admission.role.to_string(),
            "kind" => admission.kind.as_str()
        );
    }

    pub fn admission_rejected(&self, error: &AdmissionError) {
        counter!(
            ADMISSIONS_REJECTED_TOTAL,
            1,
            "reason" => error.metric_label()
        );
    }

    pub fn heartbeat_timeout(&self, admission: &Admission) {
        counter!(
            HEARTBEAT_TIMEOUTS_TOTAL,
            1,
            "role" => admission.role.to_string(),
            "kind" => admission.kind.as_str()
        );
    }

    pub fn frame_received(&self) {
        self.inner.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sensor_updated(&self) {
        counter!(SENSOR_UPDATES_TOTAL, 1);
    }

    pub fn fanout_completed(&self, role: &Role, message_kind: &'static str, report: &BroadcastReport) {
        self.inner
            .messages_relayed
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        let role_label = role.to_string();
        histogram!(FANOUT_SIZE, report.targets as f64);
        if report.delivered > 0 {
            counter!(
                MESSAGES_RELAYED_TOTAL,
                report.delivered as u64,
                "role" => role_label.clone(),
                "type" => message_kind
            );
        }
        if report.dropped > 0 {
            counter!(
                DELIVERY_DROPPED_TOTAL,
                report.dropped as u64,
                "role" => role_label.clone()
            );
        }
        if report.pruned > 0 {
            counter!(
                VIEWERS_PRUNED_TOTAL,
                report.pruned as u64,
                "role" => role_label
            );
        }
    }

    pub fn connections(&self) -> usize {
        self.inner.connections.load(Ordering::Relaxed)
    }

    pub fn messages_relayed(&self) -> u64 {
        self.inner.messages_relayed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, senders: usize, viewers: BTreeMap<String, usize>) -> StatsResponse {
        let uptime_secs = self.inner.started.elapsed().as_secs_f64();
        let frames_received = self.inner.frames_received.load(Ordering::Relaxed);
        let fps = if uptime_secs > 0.0 {
            frames_received as f64 / uptime_secs
        } else {
            0.0
        };
        StatsResponse {
            uptime_secs,
            connections: self.connections(),
            senders,
            viewers,
            messages_relayed: self.messages_relayed(),
            frames_received,
            fps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_proto::ParticipantKind;

    #[test_timeout::timeout]
    fn connection_count_never_underflows() {
        let stats = HubStats::new();
        let admission = Admission {
            role: Role::parse("admin").unwrap(),
            kind: ParticipantKind::Viewer,
            identifier: None,
        };
        stats.connection_opened(&admission);
        stats.connection_closed(&admission);
        stats.connection_closed(&admission);
        assert_eq!(stats.connections(), 0);
    }

    #[test_timeout::timeout]
    fn fanout_accumulates_deliveries() {
        let stats = HubStats::new();
        let role = Role::parse("admin").unwrap();
        let report = BroadcastReport {
            targets: 3,
            delivered: 2,
            dropped: 0,
            pruned: 1,
        };
        stats.fanout_completed(&role, "frame", &report);
        stats.fanout_completed(&role, "frame", &report);
        assert_eq!(stats.messages_relayed(), 4);
    }
}
