//! Broadcast Engine: fan one message out to a role's viewers.
//!
//! Two phases: snapshot the audience, deliver to each member without holding
//! the registry lock, then remove the members whose queues were closed.
//! Delivery is a non-blocking enqueue, so a slow viewer never stalls the
//! sender's receive loop and per-sender order is the order of enqueueing.

use std::{ops::AddAssign, sync::Arc};

use relay_proto::{HubMessage, Role};
use tracing::{debug, warn};

use crate::{
    registry::{ConnectionRegistry, DeliveryOutcome, Outbound},
    stats::HubStats,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub targets: usize,
    pub delivered: usize,
    pub dropped: usize,
    pub pruned: usize,
}

impl AddAssign for BroadcastReport {
    fn add_assign(&mut self, other: Self) {
        self.targets += other.targets;
        self.delivered += other.delivered;
        self.dropped += other.dropped;
        self.pruned += other.pruned;
    }
}

#[derive(Clone)]
pub struct Broadcaster {
    registry: ConnectionRegistry,
    stats: HubStats,
}

impl Broadcaster {
    pub fn new(registry: ConnectionRegistry, stats: HubStats) -> Self {
        Self { registry, stats }
    }

    /// Delivers `message` to every viewer of `role`. Failures are absorbed
    /// here and never reach the caller.
    pub fn broadcast(&self, role: &Role, message: &HubMessage) -> BroadcastReport {
        match encode(message) {
            Some(text) => self.broadcast_text(role, message.kind_label(), text),
            None => BroadcastReport::default(),
        }
    }

    /// Same message to several roles, encoded once.
    pub fn broadcast_to<'a, I>(&self, roles: I, message: &HubMessage) -> BroadcastReport
    where
        I: IntoIterator<Item = &'a Role>,
    {
        let Some(text) = encode(message) else {
            return BroadcastReport::default();
        };
        let mut total = BroadcastReport::default();
        for role in roles {
            total += self.broadcast_text(role, message.kind_label(), Arc::clone(&text));
        }
        total
    }

    fn broadcast_text(&self, role: &Role, kind: &'static str, text: Arc<str>) -> BroadcastReport {
        let targets = self.registry.broadcast_targets(role);
        let mut report = BroadcastReport {
            targets: targets.len(),
            ..BroadcastReport::default()
        };
        if targets.is_empty() {
            return report;
        }

        let mut closed = Vec::new();
        for target in &targets {
            match target.try_deliver(Outbound::Text(Arc::clone(&text))) {
                DeliveryOutcome::Delivered => report.delivered += 1,
                DeliveryOutcome::Dropped => {
                    report.dropped += 1;
                    debug!(%role, connection_id = %target.id(), kind, "viewer queue full; message skipped");
                }
                DeliveryOutcome::Closed => closed.push(target.id()),
            }
        }

        report.pruned = self.registry.remove_viewers(role, &closed);
        if report.pruned > 0 {
            debug!(%role, pruned = report.pruned, "pruned closed viewers");
        }
        self.stats.fanout_completed(role, kind, &report);
        report
    }
}

fn encode(message: &HubMessage) -> Option<Arc<str>> {
    match serde_json::to_string(message) {
        Ok(text) => Some(Arc::from(text)),
        Err(err) => {
            warn!(error = %err, kind = message.kind_label(), "failed to encode broadcast");
            None
        }
    }
}
