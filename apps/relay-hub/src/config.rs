use std::{collections::BTreeSet, net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use clap::Parser;
use relay_proto::{Role, DEFAULT_ROLES};

#[derive(Debug, Parser)]
#[command(
    name = "relay-hub",
    author,
    version,
    about = "Relays camera frames and sensor telemetry to role-scoped viewers"
)]
pub struct Cli {
    /// Address to bind the HTTP/WebSocket listener to.
    #[arg(long, env = "RELAY_HUB_LISTEN_ADDR", default_value = "127.0.0.1:7777")]
    pub listen_addr: String,

    /// Shared secret every connection must present as `token`.
    #[arg(long, env = "RELAY_HUB_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Comma separated list of recognised roles.
    #[arg(
        long,
        env = "RELAY_HUB_ROLES",
        value_delimiter = ',',
        default_values = DEFAULT_ROLES
    )]
    pub roles: Vec<String>,

    /// Seconds between transport-level pings.
    #[arg(long, env = "RELAY_HUB_HEARTBEAT_INTERVAL_SECS", default_value_t = 20)]
    pub heartbeat_interval_secs: u64,

    /// Silent heartbeat intervals tolerated before a connection is dropped.
    #[arg(long, env = "RELAY_HUB_HEARTBEAT_MAX_MISSED", default_value_t = 2)]
    pub heartbeat_max_missed: u32,

    /// Outbound queue depth per connection.
    #[arg(long, env = "RELAY_HUB_VIEWER_BUFFER", default_value_t = 64)]
    pub viewer_buffer: usize,

    /// Directory of static dashboard files served at `/`.
    #[arg(long, env = "RELAY_HUB_STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// Grace period applied during shutdown.
    #[arg(long, env = "RELAY_HUB_SHUTDOWN_GRACE_SECS", default_value_t = 5)]
    pub shutdown_grace_secs: u64,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, env = "RELAY_HUB_LOG", default_value = "info")]
    pub log_filter: String,

    /// Print spans to stdout through OpenTelemetry.
    #[arg(long, env = "RELAY_HUB_OTEL_STDOUT")]
    pub otel_stdout: bool,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub listen_addr: SocketAddr,
    pub token: String,
    pub roles: BTreeSet<Role>,
    pub heartbeat: HeartbeatConfig,
    pub viewer_buffer: usize,
    pub static_dir: Option<PathBuf>,
    pub shutdown_grace: Duration,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_filter: String,
    pub otel_stdout: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            otel_stdout: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub max_missed: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20),
            max_missed: 2,
        }
    }
}

impl HubConfig {
    /// Configuration for embedding the hub in-process (tests, tooling).
    pub fn new(token: impl Into<String>, roles: &[&str]) -> Result<Self> {
        Ok(Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            token: token.into(),
            roles: parse_roles(roles.iter().copied())?,
            heartbeat: HeartbeatConfig::default(),
            viewer_buffer: 64,
            static_dir: None,
            shutdown_grace: Duration::from_secs(0),
            telemetry: TelemetryConfig::default(),
        })
    }
}

impl TryFrom<Cli> for HubConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;
        if cli.token.trim().is_empty() {
            bail!("token must not be empty");
        }
        if cli.heartbeat_interval_secs == 0 {
            bail!("heartbeat interval must be at least one second");
        }
        if cli.heartbeat_max_missed == 0 {
            bail!("heartbeat max missed must be at least one");
        }
        if cli.viewer_buffer == 0 {
            bail!("viewer buffer must be at least one message");
        }
        Ok(HubConfig {
            listen_addr,
            token: cli.token,
            roles: parse_roles(cli.roles.iter().map(String::as_str))?,
            heartbeat: HeartbeatConfig {
                interval: Duration::from_secs(cli.heartbeat_interval_secs),
                max_missed: cli.heartbeat_max_missed,
            },
            viewer_buffer: cli.viewer_buffer,
            static_dir: cli.static_dir,
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
            telemetry: TelemetryConfig {
                log_filter: cli.log_filter,
                otel_stdout: cli.otel_stdout,
            },
        })
    }
}

fn parse_roles<'a>(raw: impl Iterator<Item = &'a str>) -> Result<BTreeSet<Role>> {
    let mut roles = BTreeSet::new();
    for value in raw.filter(|value| !value.trim().is_empty()) {
        roles.insert(Role::parse(value).with_context(|| format!("invalid role {value:?}"))?);
    }
    if roles.is_empty() {
        bail!("at least one role must be configured");
    }
    Ok(roles)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["relay-hub"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test_timeout::timeout]
    fn defaults_recognise_supervisor_and_admin() {
        let config = HubConfig::try_from(cli(&["--token", "s3cret"])).unwrap();
        let roles: Vec<&str> = config.roles.iter().map(Role::as_str).collect();
        assert_eq!(roles, vec!["admin", "supervisor"]);
        assert_eq!(config.listen_addr.port(), 7777);
        assert_eq!(config.heartbeat.interval, Duration::from_secs(20));
    }

    #[test_timeout::timeout]
    fn roles_are_comma_separated() {
        let config =
            HubConfig::try_from(cli(&["--token", "s3cret", "--roles", "cam,lab,cam"])).unwrap();
        assert_eq!(config.roles.len(), 2);
    }

    #[test_timeout::timeout]
    fn invalid_values_are_rejected() {
        assert!(HubConfig::try_from(cli(&["--token", "  "])).is_err());
        assert!(HubConfig::try_from(cli(&["--token", "t", "--roles", "Admin"])).is_err());
        assert!(HubConfig::try_from(cli(&["--token", "t", "--listen-addr", "nope"])).is_err());
        assert!(
            HubConfig::try_from(cli(&["--token", "t", "--heartbeat-max-missed", "0"])).is_err()
        );
    }

    #[test_timeout::timeout]
    fn telemetry_flags_reach_the_config() {
        let config = HubConfig::try_from(cli(&[
            "--token",
            "t",
            "--log-filter",
            "relay_hub=debug",
            "--otel-stdout",
        ]))
        .unwrap();
        assert_eq!(config.telemetry.log_filter, "relay_hub=debug");
        assert!(config.telemetry.otel_stdout);
    }
}
