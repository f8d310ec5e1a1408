//! Session Lifecycle: validate, register, run the message loop, unregister.
//!
//! `CONNECTING → VALIDATED → REGISTERED → {RELAYING | IDLE_LISTENING} → CLOSED`.
//! A rejected connection goes straight to `CLOSED` with a policy-violation
//! close code and never touches the registry. Every session that reached
//! `REGISTERED` calls `unregister` exactly once, on its way to `CLOSED`.

use std::{borrow::Cow, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        ConnectInfo, Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use relay_proto::{ConnectParams, FramePayload, HubMessage, ParticipantKind, ViewerMessage};
use tokio::{
    sync::mpsc,
    time::{interval_at, timeout, Instant},
};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::{
    admission::{Admission, AdmissionError},
    registry::{ConnectionHandle, ConnectionId, DeliveryOutcome, Outbound, Registration, SenderKey},
    state::SharedState,
};

const REJECT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Validated,
    Registered,
    Relaying,
    IdleListening,
    Closed,
}

impl SessionPhase {
    pub fn can_advance_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (self, next),
            (Connecting, Validated)
                | (Connecting, Closed)
                | (Validated, Registered)
                | (Registered, Relaying)
                | (Registered, IdleListening)
                | (Registered, Closed)
                | (Relaying, Closed)
                | (IdleListening, Closed)
        )
    }
}

/// Why a message loop ended. All of them are ordinary disconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    PeerClosed,
    TransportError,
    HeartbeatTimeout,
    WriterGone,
}

pub async fn ws_handler(
    State(state): State<SharedState>,
    Query(query): Query<Vec<(String, String)>>,
    remote: Option<ConnectInfo<SocketAddr>>,
    ws: WebSocketUpgrade,
) -> Response {
    let params = ConnectParams::from_pairs(query);
    let remote_addr = remote.map(|ConnectInfo(addr)| addr);
    ws.on_upgrade(move |socket| run_session(socket, state, params, remote_addr))
}

async fn run_session(
    socket: WebSocket,
    state: SharedState,
    params: ConnectParams,
    remote_addr: Option<SocketAddr>,
) {
    let connection_id = Uuid::new_v4();
    let mut lifecycle = Lifecycle::new(connection_id);

    let admission = match state.policy.validate(&params) {
        Ok(admission) => admission,
        Err(err) => {
            warn!(%connection_id, remote = ?remote_addr, reason = %err, "connection rejected");
            state.stats.admission_rejected(&err);
            reject(socket, &err).await;
            lifecycle.advance(SessionPhase::Closed);
            return;
        }
    };
    lifecycle.advance(SessionPhase::Validated);

    let (ws_tx, ws_rx) = socket.split();
    let (tx, rx) = mpsc::channel(state.viewer_buffer);
    let handle = ConnectionHandle::new(connection_id, tx);
    let mut writer = tokio::spawn(write_loop(ws_tx, rx, connection_id));

    let sensor = state.sensor.clone();
    let registration = state.registry.register(&admission, handle.clone(), || {
        sensor.current().and_then(|snapshot| encode(&snapshot.to_message()))
    });
    state.stats.connection_opened(&admission);
    lifecycle.advance(SessionPhase::Registered);
    log_registration(&admission, connection_id, remote_addr, &registration);

    let end = match admission.kind {
        ParticipantKind::Sender => {
            lifecycle.advance(SessionPhase::Relaying);
            message_loop(&state, &admission, &handle, ws_rx).await
        }
        ParticipantKind::Viewer => {
            lifecycle.advance(SessionPhase::IdleListening);
            message_loop(&state, &admission, &handle, ws_rx).await
        }
    };

    let removed = state.registry.unregister(&admission, connection_id);
    state.stats.connection_closed(&admission);
    if end == SessionEnd::HeartbeatTimeout {
        state.stats.heartbeat_timeout(&admission);
        handle.try_deliver(Outbound::Close {
            code: close_code::AWAY,
            reason: "heartbeat timeout".into(),
        });
    }
    lifecycle.advance(SessionPhase::Closed);
    drop(handle);

    if timeout(WRITER_FLUSH_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }

    info!(
        role = %admission.role,
        kind = %admission.kind,
        identifier = admission.identifier.as_deref().unwrap_or("-"),
        %connection_id,
        reason = ?end,
        removed,
        "connection closed"
    );
}

fn log_registration(
    admission: &Admission,
    connection_id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    registration: &Registration,
) {
    match registration {
        Registration::Sender { displaced } => {
            if let Some(previous) = displaced {
                info!(
                    role = %admission.role,
                    identifier = admission.identifier.as_deref().unwrap_or("-"),
                    %connection_id,
                    displaced = %previous,
                    "sender re-registered; previous connection superseded"
                );
            } else {
                info!(
                    role = %admission.role,
                    identifier = admission.identifier.as_deref().unwrap_or("-"),
                    %connection_id,
                    remote = ?remote_addr,
                    "sender registered"
                );
            }
        }
        Registration::Viewer { replayed, viewers } => info!(
            role = %admission.role,
            %connection_id,
            remote = ?remote_addr,
            viewers,
            replayed,
            "viewer registered"
        ),
    }
}

async fn reject(mut socket: WebSocket, err: &AdmissionError) {
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: Cow::Owned(err.to_string()),
    };
    if socket.send(Message::Close(Some(frame))).await.is_err() {
        return;
    }
    // Give the peer a moment to acknowledge the close before dropping.
    let _ = timeout(REJECT_DRAIN_TIMEOUT, async {
        while let Some(Ok(message)) = socket.recv().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    })
    .await;
}

/// Receiving is the only suspension point besides the heartbeat tick.
async fn message_loop(
    state: &SharedState,
    admission: &Admission,
    handle: &ConnectionHandle,
    mut ws_rx: SplitStream<WebSocket>,
) -> SessionEnd {
    let period = state.heartbeat.interval;
    let mut heartbeat = interval_at(Instant::now() + period, period);
    let mut silent_ticks = 0u32;
    let sender_key = SenderKey::from_admission(admission);

    loop {
        tokio::select! {
            incoming = ws_rx.next() => {
                let message = match incoming {
                    Some(Ok(message)) => message,
                    Some(Err(err)) => {
                        debug!(connection_id = %handle.id(), error = %err, "websocket receive failed");
                        return SessionEnd::TransportError;
                    }
                    None => return SessionEnd::PeerClosed,
                };
                silent_ticks = 0;
                let step = match (admission.kind, &sender_key) {
                    (ParticipantKind::Sender, Some(key)) => on_sender_message(state, admission, key, handle, message),
                    _ => on_viewer_message(handle, message),
                };
                if let Some(end) = step {
                    return end;
                }
            }
            _ = heartbeat.tick() => {
                silent_ticks += 1;
                if silent_ticks >= state.heartbeat.max_missed {
                    warn!(
                        connection_id = %handle.id(),
                        role = %admission.role,
                        silent_ticks,
                        "heartbeat timeout"
                    );
                    return SessionEnd::HeartbeatTimeout;
                }
                if handle.try_deliver(Outbound::Ping) == DeliveryOutcome::Closed {
                    return SessionEnd::WriterGone;
                }
            }
        }
    }
}

fn on_sender_message(
    state: &SharedState,
    admission: &Admission,
    key: &SenderKey,
    handle: &ConnectionHandle,
    message: Message,
) -> Option<SessionEnd> {
    let payload = match message {
        Message::Text(text) => FramePayload::from_text(&text),
        Message::Binary(bytes) => FramePayload::from_binary(&bytes),
        Message::Close(_) => return Some(SessionEnd::PeerClosed),
        Message::Ping(_) | Message::Pong(_) => return None,
    };

    if !state.registry.is_current_sender(key, handle.id()) {
        debug!(
            connection_id = %handle.id(),
            identifier = %key.identifier,
            "dropping frame from superseded sender"
        );
        return None;
    }

    state.stats.frame_received();
    let frame = HubMessage::frame(admission.role.as_str(), &key.identifier, payload);
    let report = state.broadcaster.broadcast(&admission.role, &frame);
    trace!(
        identifier = %key.identifier,
        delivered = report.delivered,
        dropped = report.dropped,
        "frame relayed"
    );
    None
}

/// Viewers may only ping. Anything else is ignored on purpose, including
/// text that is not JSON.
fn on_viewer_message(handle: &ConnectionHandle, message: Message) -> Option<SessionEnd> {
    match message {
        Message::Text(text) => match serde_json::from_str::<ViewerMessage>(&text) {
            Ok(ViewerMessage::Ping) => {
                let pong = encode(&HubMessage::pong())?;
                if handle.try_deliver(pong) == DeliveryOutcome::Closed {
                    return Some(SessionEnd::WriterGone);
                }
            }
            Err(err) => {
                debug!(connection_id = %handle.id(), error = %err, "ignoring viewer message");
            }
        },
        Message::Close(_) => return Some(SessionEnd::PeerClosed),
        Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {}
    }
    None
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    connection_id: ConnectionId,
) {
    while let Some(outbound) = rx.recv().await {
        let (message, closing) = match outbound {
            Outbound::Text(text) => (Message::Text(text.to_string()), false),
            Outbound::Ping => (Message::Ping(Vec::new()), false),
            Outbound::Close { code, reason } => (
                Message::Close(Some(CloseFrame {
                    code,
                    reason: Cow::Owned(reason),
                })),
                true,
            ),
        };
        if sink.send(message).await.is_err() || closing {
            break;
        }
    }
    debug!(%connection_id, "writer task finished");
}

fn encode(message: &HubMessage) -> Option<Outbound> {
    match serde_json::to_string(message) {
        Ok(text) => Some(Outbound::Text(Arc::from(text))),
        Err(err) => {
            warn!(error = %err, kind = message.kind_label(), "failed to encode message");
            None
        }
    }
}

struct Lifecycle {
    connection_id: ConnectionId,
    phase: SessionPhase,
}

impl Lifecycle {
    fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            phase: SessionPhase::Connecting,
        }
    }

    fn advance(&mut self, next: SessionPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "invalid session transition {:?} -> {:?}",
            self.phase,
            next
        );
        trace!(connection_id = %self.connection_id, from = ?self.phase, to = ?next, "session phase");
        self.phase = next;
    }
}

#[cfg(test)]
mod tests {
    use super::SessionPhase::*;
    use super::*;

    #[test_timeout::timeout]
    fn rejection_skips_registration() {
        assert!(Connecting.can_advance_to(Closed));
        assert!(!Connecting.can_advance_to(Registered));
    }

    #[test_timeout::timeout]
    fn closed_is_terminal() {
        for next in [Connecting, Validated, Registered, Relaying, IdleListening, Closed] {
            assert!(!Closed.can_advance_to(next));
        }
    }

    #[test_timeout::timeout]
    fn registered_sessions_pick_a_loop() {
        assert!(Registered.can_advance_to(Relaying));
        assert!(Registered.can_advance_to(IdleListening));
        assert!(!Relaying.can_advance_to(IdleListening));
        assert!(Relaying.can_advance_to(Closed));
    }
}
