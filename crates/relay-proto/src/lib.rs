//! Wire vocabulary shared by `relay-hub` and `relay-sender`.
//!
//! Everything that crosses a connection lives here: the admission query
//! parameters, the role/kind taxonomy and the JSON envelopes exchanged with
//! viewers. Keeping them in one crate lets the sender build exactly the URL
//! the hub's validator parses.

mod message;
mod params;
mod role;

use std::time::{SystemTime, UNIX_EPOCH};

pub use message::{FramePayload, HubMessage, ViewerMessage};
pub use params::ConnectParams;
pub use role::{ParticipantKind, Role, RoleError};

/// Default roles recognised by a hub that was not configured otherwise.
pub const DEFAULT_ROLES: [&str; 2] = ["supervisor", "admin"];

/// Milliseconds since the Unix epoch, the timestamp unit of every envelope.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
