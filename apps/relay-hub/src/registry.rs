//! Connection Registry: who is currently reachable.
//!
//! One mutex guards both tables. Every operation is O(1) amortised and never
//! awaits while holding the lock, so a single coarse lock is enough even with
//! one task per connection.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use parking_lot::Mutex;
use relay_proto::{ParticipantKind, Role};
use slab::Slab;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::admission::Admission;

pub type ConnectionId = Uuid;

/// Frames queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(Arc<str>),
    Ping,
    Close { code: u16, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The recipient's queue is full; this message is skipped for it.
    Dropped,
    /// The recipient's writer is gone.
    Closed,
}

/// Routing reference to a live connection. The session owns the socket; the
/// registry only holds this handle.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Outbound>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn try_deliver(&self, message: Outbound) -> DeliveryOutcome {
        match self.tx.try_send(message) {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(TrySendError::Full(_)) => DeliveryOutcome::Dropped,
            Err(TrySendError::Closed(_)) => DeliveryOutcome::Closed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SenderKey {
    pub role: Role,
    pub identifier: String,
}

impl SenderKey {
    pub fn new(role: Role, identifier: impl Into<String>) -> Self {
        Self {
            role,
            identifier: identifier.into(),
        }
    }

    pub fn from_admission(admission: &Admission) -> Option<Self> {
        admission
            .identifier
            .as_ref()
            .map(|identifier| SenderKey::new(admission.role.clone(), identifier.clone()))
    }
}

/// What `register` did, for logging and stats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Sender { displaced: Option<ConnectionId> },
    Viewer { replayed: bool, viewers: usize },
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    senders: HashMap<SenderKey, ConnectionHandle>,
    viewers: HashMap<Role, ViewerSet>,
}

#[derive(Default)]
struct ViewerSet {
    slab: Slab<ConnectionHandle>,
    index: HashMap<ConnectionId, usize>,
}

impl ViewerSet {
    fn insert(&mut self, handle: ConnectionHandle) {
        if self.index.contains_key(&handle.id) {
            return;
        }
        let id = handle.id;
        let key = self.slab.insert(handle);
        self.index.insert(id, key);
    }

    fn remove(&mut self, id: ConnectionId) -> bool {
        match self.index.remove(&id) {
            Some(key) => {
                self.slab.remove(key);
                true
            }
            None => false,
        }
    }

    fn handles(&self) -> Vec<ConnectionHandle> {
        self.slab.iter().map(|(_, handle)| handle.clone()).collect()
    }

    fn len(&self) -> usize {
        self.slab.len()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an admitted connection. For viewers, `replay` is evaluated
    /// and queued while the lock is held, so it reaches the viewer before any
    /// broadcast that lists it as a target.
    pub fn register<F>(&self, admission: &Admission, handle: ConnectionHandle, replay: F) -> Registration
    where
        F: FnOnce() -> Option<Outbound>,
    {
        match SenderKey::from_admission(admission) {
            Some(key) if admission.kind == ParticipantKind::Sender => Registration::Sender {
                displaced: self.replace_sender(key, handle),
            },
            _ => self.register_viewer(admission.role.clone(), handle, replay),
        }
    }

    /// Last writer wins: stores `handle` under `key` and returns the id of the
    /// connection it displaced, if any. The displaced connection stays open
    /// but is no longer reachable through the registry.
    pub fn replace_sender(&self, key: SenderKey, handle: ConnectionHandle) -> Option<ConnectionId> {
        let mut inner = self.inner.lock();
        inner
            .senders
            .insert(key, handle)
            .map(|previous| previous.id)
    }

    pub fn register_viewer<F>(&self, role: Role, handle: ConnectionHandle, replay: F) -> Registration
    where
        F: FnOnce() -> Option<Outbound>,
    {
        let mut inner = self.inner.lock();
        let replayed = match replay() {
            Some(message) => handle.try_deliver(message) == DeliveryOutcome::Delivered,
            None => false,
        };
        let set = inner.viewers.entry(role).or_default();
        set.insert(handle);
        Registration::Viewer {
            replayed,
            viewers: set.len(),
        }
    }

    /// Removes the connection recorded in `admission`. Returns `false` when
    /// there was nothing to remove: a sender already superseded by a newer
    /// registration, or a viewer pruned earlier.
    pub fn unregister(&self, admission: &Admission, id: ConnectionId) -> bool {
        match SenderKey::from_admission(admission) {
            Some(key) if admission.kind == ParticipantKind::Sender => {
                self.remove_sender_if_current(&key, id)
            }
            _ => self.remove_viewers(&admission.role, &[id]) == 1,
        }
    }

    fn remove_sender_if_current(&self, key: &SenderKey, id: ConnectionId) -> bool {
        let mut inner = self.inner.lock();
        match inner.senders.get(key) {
            Some(current) if current.id == id => {
                inner.senders.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Removes every listed viewer present under `role`; absent ids are
    /// ignored. Returns how many were removed.
    pub fn remove_viewers(&self, role: &Role, ids: &[ConnectionId]) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let mut inner = self.inner.lock();
        let Some(set) = inner.viewers.get_mut(role) else {
            return 0;
        };
        let removed = ids.iter().filter(|id| set.remove(**id)).count();
        if set.len() == 0 {
            inner.viewers.remove(role);
        }
        removed
    }

    /// Snapshot of the viewers currently registered under `role`.
    pub fn broadcast_targets(&self, role: &Role) -> Vec<ConnectionHandle> {
        let inner = self.inner.lock();
        inner
            .viewers
            .get(role)
            .map(ViewerSet::handles)
            .unwrap_or_default()
    }

    pub fn is_current_sender(&self, key: &SenderKey, id: ConnectionId) -> bool {
        let inner = self.inner.lock();
        inner
            .senders
            .get(key)
            .map(|current| current.id == id)
            .unwrap_or(false)
    }

    pub fn current_sender(&self, key: &SenderKey) -> Option<ConnectionId> {
        let inner = self.inner.lock();
        inner.senders.get(key).map(ConnectionHandle::id)
    }

    pub fn sender_count(&self) -> usize {
        self.inner.lock().senders.len()
    }

    pub fn viewer_counts(&self) -> BTreeMap<String, usize> {
        let inner = self.inner.lock();
        inner
            .viewers
            .iter()
            .map(|(role, set)| (role.to_string(), set.len()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(raw: &str) -> Role {
        Role::parse(raw).unwrap()
    }

    fn handle() -> (ConnectionHandle, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        (ConnectionHandle::new(Uuid::new_v4(), tx), rx)
    }

    fn sender(role_name: &str, id: &str) -> Admission {
        Admission {
            role: role(role_name),
            kind: ParticipantKind::Sender,
            identifier: Some(id.to_string()),
        }
    }

    fn viewer(role_name: &str) -> Admission {
        Admission {
            role: role(role_name),
            kind: ParticipantKind::Viewer,
            identifier: None,
        }
    }

    #[test_timeout::timeout]
    fn replace_sender_keeps_only_the_newest() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = handle();
        let (second, _rx2) = handle();
        let admission = sender("admin", "cam-1");

        assert_eq!(
            registry.register(&admission, first.clone(), || None),
            Registration::Sender { displaced: None }
        );
        assert_eq!(
            registry.register(&admission, second.clone(), || None),
            Registration::Sender {
                displaced: Some(first.id())
            }
        );
        assert_eq!(registry.sender_count(), 1);

        // The stale session's unregister must not evict the newer sender.
        assert!(!registry.unregister(&admission, first.id()));
        let key = SenderKey::from_admission(&admission).unwrap();
        assert_eq!(registry.current_sender(&key), Some(second.id()));

        assert!(registry.unregister(&admission, second.id()));
        assert_eq!(registry.sender_count(), 0);
    }

    #[test_timeout::timeout]
    fn same_identifier_under_different_roles_is_distinct() {
        let registry = ConnectionRegistry::new();
        let (a, _rx1) = handle();
        let (b, _rx2) = handle();
        registry.register(&sender("admin", "cam-1"), a, || None);
        registry.register(&sender("supervisor", "cam-1"), b, || None);
        assert_eq!(registry.sender_count(), 2);
    }

    #[test_timeout::timeout]
    fn viewers_are_a_set_per_role() {
        let registry = ConnectionRegistry::new();
        let (a, _rx1) = handle();
        let (b, _rx2) = handle();
        registry.register(&viewer("admin"), a.clone(), || None);
        registry.register(&viewer("admin"), a.clone(), || None);
        registry.register(&viewer("supervisor"), b, || None);

        assert_eq!(registry.broadcast_targets(&role("admin")).len(), 1);
        assert_eq!(registry.viewer_counts().get("supervisor"), Some(&1));

        assert!(registry.unregister(&viewer("admin"), a.id()));
        assert!(!registry.unregister(&viewer("admin"), a.id()));
        assert!(registry.broadcast_targets(&role("admin")).is_empty());
    }

    #[test_timeout::timeout]
    fn replay_is_queued_before_registration_completes() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx) = handle();
        let registration = registry.register(&viewer("admin"), a, || {
            Some(Outbound::Text(Arc::from("snapshot")))
        });
        assert_eq!(
            registration,
            Registration::Viewer {
                replayed: true,
                viewers: 1
            }
        );
        assert_eq!(rx.try_recv().unwrap(), Outbound::Text(Arc::from("snapshot")));
    }

    #[test_timeout::timeout]
    fn remove_viewers_ignores_unknown_ids() {
        let registry = ConnectionRegistry::new();
        let (a, _rx) = handle();
        registry.register(&viewer("admin"), a.clone(), || None);
        let removed = registry.remove_viewers(&role("admin"), &[Uuid::new_v4(), a.id()]);
        assert_eq!(removed, 1);
        assert_eq!(registry.remove_viewers(&role("lab"), &[a.id()]), 0);
    }

    #[test_timeout::timeout]
    fn concurrent_joins_and_leaves_stay_consistent() {
        let registry = ConnectionRegistry::new();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let (tx, _rx) = mpsc::channel(1);
                        let handle = ConnectionHandle::new(Uuid::new_v4(), tx);
                        let id = handle.id();
                        registry.register(&viewer("admin"), handle, || None);
                        assert!(registry.unregister(&viewer("admin"), id));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert!(registry.viewer_counts().is_empty());
    }
}
