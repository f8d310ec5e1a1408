//! Sender side of the relay: streams frames over a WebSocket uplink with
//! bounded reconnection, and pushes sensor snapshots over HTTP.

pub mod config;
pub mod error;
pub mod push;
pub mod reconnect;
pub mod source;
pub mod stream;
pub mod uplink;

pub use config::{Cli, Command, StreamConfig};
pub use error::SenderError;
pub use push::SensorClient;
pub use reconnect::{ReconnectPolicy, ReconnectTracker};
pub use source::{DirectorySource, FrameSource, TestPatternSource};
pub use stream::{stream_frames, FrameStreamer, StreamSummary};
pub use uplink::{Uplink, WebSocketUplink};
