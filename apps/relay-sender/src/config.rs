use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};
use relay_proto::{ConnectParams, Role};
use url::Url;

use crate::{error::SenderError, reconnect::ReconnectPolicy};

#[derive(Parser, Debug)]
#[command(name = "relay-sender")]
#[command(about = "Streams camera frames into a relay hub")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect as a sender and stream frames
    Stream(StreamArgs),
    /// Post one sensor snapshot to the hub
    PushSensor(PushSensorArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StreamArgs {
    /// Hub WebSocket endpoint (e.g. ws://127.0.0.1:7777/ws)
    #[arg(long, env = "RELAY_SENDER_SERVER", default_value = "ws://127.0.0.1:7777/ws")]
    pub server: String,

    #[arg(long, env = "RELAY_SENDER_TOKEN")]
    pub token: String,

    #[arg(long, env = "RELAY_SENDER_ROLE", default_value = "supervisor")]
    pub role: String,

    /// Identifier the hub keys this sender by
    #[arg(long, env = "RELAY_SENDER_CAMERA_ID")]
    pub camera_id: String,

    #[arg(long, env = "RELAY_SENDER_FPS", default_value_t = 15)]
    pub fps: u32,

    /// Directory of frame files; a test pattern is sent when absent
    #[arg(long, env = "RELAY_SENDER_FRAMES_DIR")]
    pub frames_dir: Option<PathBuf>,

    #[arg(long, env = "RELAY_SENDER_MAX_RECONNECT_ATTEMPTS", default_value_t = 3)]
    pub max_reconnect_attempts: u32,

    #[arg(long, env = "RELAY_SENDER_RECONNECT_DELAY_MS", default_value_t = 2000)]
    pub reconnect_delay_ms: u64,

    #[arg(long, env = "RELAY_SENDER_CONNECT_TIMEOUT_SECS", default_value_t = 5)]
    pub connect_timeout_secs: u64,

    /// Stop after this many frames
    #[arg(long)]
    pub count: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct PushSensorArgs {
    /// Hub HTTP base URL
    #[arg(long, env = "RELAY_SENDER_HTTP_URL", default_value = "http://127.0.0.1:7777")]
    pub url: String,

    /// Snapshot as a JSON object
    #[arg(long)]
    pub json: String,

    /// Only notify viewers of this role
    #[arg(long)]
    pub role: Option<String>,
}

/// Validated settings for `stream`.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Endpoint with the admission query applied.
    pub url: Url,
    pub camera_id: String,
    pub frame_interval: Duration,
    pub frames_dir: Option<PathBuf>,
    pub reconnect: ReconnectPolicy,
    pub connect_timeout: Duration,
    pub count: Option<u64>,
}

impl TryFrom<StreamArgs> for StreamConfig {
    type Error = SenderError;

    fn try_from(args: StreamArgs) -> Result<Self, Self::Error> {
        let mut url = Url::parse(&args.server)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(SenderError::Config(format!(
                "server must be a ws:// or wss:// url, got {}",
                args.server
            )));
        }
        if args.token.is_empty() {
            return Err(SenderError::Config("token must not be empty".into()));
        }
        let role = Role::parse(&args.role)
            .map_err(|err| SenderError::Config(format!("role {:?}: {err}", args.role)))?;
        let camera_id = args.camera_id.trim().to_string();
        if camera_id.is_empty() {
            return Err(SenderError::Config("camera id must not be empty".into()));
        }
        if args.fps == 0 {
            return Err(SenderError::Config("fps must be greater than zero".into()));
        }
        if args.connect_timeout_secs == 0 {
            return Err(SenderError::Config(
                "connect timeout must be greater than zero".into(),
            ));
        }

        ConnectParams::sender(args.token, role.as_str(), camera_id.as_str()).apply_to(&mut url);

        Ok(Self {
            url,
            camera_id,
            frame_interval: Duration::from_secs(1) / args.fps,
            frames_dir: args.frames_dir,
            reconnect: ReconnectPolicy {
                max_attempts: args.max_reconnect_attempts,
                delay: Duration::from_millis(args.reconnect_delay_ms),
            },
            connect_timeout: Duration::from_secs(args.connect_timeout_secs),
            count: args.count,
        })
    }
}
