use anyhow::{Context, Result};
use clap::Parser;
use relay_proto::Role;
use relay_sender::{
    config::{PushSensorArgs, StreamArgs},
    push::parse_snapshot,
    stream_frames, Cli, Command, DirectorySource, SenderError, SensorClient, StreamConfig,
    StreamSummary, TestPatternSource, WebSocketUplink,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Stream(args) => stream(args).await,
        Command::PushSensor(args) => push_sensor(args).await,
    }
}

async fn stream(args: StreamArgs) -> Result<()> {
    let config = StreamConfig::try_from(args).context("invalid stream configuration")?;
    info!(
        camera_id = %config.camera_id,
        interval_ms = config.frame_interval.as_millis() as u64,
        max_reconnect_attempts = config.reconnect.max_attempts,
        "starting frame stream"
    );

    tokio::select! {
        result = run_stream(&config) => {
            let summary = result?;
            info!(frames = summary.frames_sent, reconnects = summary.reconnects, "sender stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; stopping sender");
        }
    }
    Ok(())
}

async fn run_stream(config: &StreamConfig) -> Result<StreamSummary, SenderError> {
    let uplink = WebSocketUplink::new(config.url.clone(), config.connect_timeout);
    match &config.frames_dir {
        Some(dir) => {
            let source = DirectorySource::open(dir).await?;
            info!(frames = source.len(), dir = %dir.display(), "streaming frame directory");
            stream_frames(uplink, source, config.reconnect, config.frame_interval, config.count).await
        }
        None => {
            let source = TestPatternSource::new(config.camera_id.clone());
            stream_frames(uplink, source, config.reconnect, config.frame_interval, config.count).await
        }
    }
}

async fn push_sensor(args: PushSensorArgs) -> Result<()> {
    let base = Url::parse(&args.url).context("invalid hub url")?;
    let data = parse_snapshot(&args.json)?;
    let role = args
        .role
        .as_deref()
        .map(Role::parse)
        .transpose()
        .context("invalid role")?;

    let ack = SensorClient::new(base).push(&data, role.as_ref()).await?;
    println!("{}", serde_json::to_string_pretty(&ack)?);
    Ok(())
}
