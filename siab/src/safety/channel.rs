//! Management channel detection.

use crate::collab::{CommandRunner, CommandSpec};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable set by `sshd` for the current session.
pub const SSH_CONNECTION_VAR: &str = "SSH_CONNECTION";

/// How the management channel was identified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ChannelSource {
    /// The current session announced its peer.
    Session {
        /// Operator's address.
        peer: IpAddr,
    },
    /// The interface carrying the default route.
    DefaultRoute {
        /// Interface name.
        interface: String,
    },
    /// Nothing identified the channel.
    Unknown,
}

/// The operator's control session to the host.
///
/// Discovered once per run and kept for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagementChannel {
    /// How the channel was found.
    pub source: ChannelSource,
    /// Port the management service listens on.
    pub port: u16,
}

impl ManagementChannel {
    /// A channel known only by its port.
    #[must_use]
    pub const fn from_port(port: u16) -> Self {
        Self {
            source: ChannelSource::Unknown,
            port,
        }
    }

    /// Parses an `SSH_CONNECTION` value:
    /// `<client ip> <client port> <server ip> <server port>`.
    #[must_use]
    pub fn from_ssh_connection(value: &str) -> Option<Self> {
        let parts: Vec<&str> = value.split_whitespace().collect();
        let [peer, _client_port, _server_ip, server_port] = parts.as_slice() else {
            return None;
        };
        Some(Self {
            source: ChannelSource::Session {
                peer: peer.parse().ok()?,
            },
            port: server_port.parse().ok()?,
        })
    }

    /// Parses `ip -o route show default` output.
    #[must_use]
    pub fn from_default_route(output: &str, port: u16) -> Option<Self> {
        let pattern = Regex::new(r"\bdev\s+(\S+)").ok()?;
        let interface = output
            .lines()
            .find(|line| line.trim_start().starts_with("default"))
            .and_then(|line| pattern.captures(line))
            .map(|caps| caps[1].to_string())?;
        Some(Self {
            source: ChannelSource::DefaultRoute { interface },
            port,
        })
    }

    /// Detects the channel: the session's peer first, then the default
    /// route's interface.
    pub async fn detect(
        runner: &dyn CommandRunner,
        ssh_connection: Option<&str>,
        fallback_port: u16,
    ) -> Self {
        if let Some(channel) = ssh_connection.and_then(Self::from_ssh_connection) {
            info!(channel = %channel, "Management channel from session");
            return channel;
        }

        let spec = CommandSpec::new("ip")
            .args(["-o", "route", "show", "default"])
            .timeout(Duration::from_secs(5));
        match runner.run_command(&spec).await {
            Ok(output) if output.success() => {
                if let Some(channel) = Self::from_default_route(&output.stdout, fallback_port) {
                    info!(channel = %channel, "Management channel from default route");
                    return channel;
                }
                debug!(output = %output.stdout.trim(), "No default route");
            }
            Ok(output) => debug!(code = output.code, "Route lookup failed"),
            Err(e) => debug!(error = %e, "Route lookup failed"),
        }

        warn!(port = fallback_port, "Management channel could not be determined");
        Self::from_port(fallback_port)
    }

    /// Returns true if the channel was identified.
    #[must_use]
    pub const fn is_known(&self) -> bool {
        !matches!(self.source, ChannelSource::Unknown)
    }
}

impl fmt::Display for ManagementChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ChannelSource::Session { peer } => write!(f, "session from {peer} on port {}", self.port),
            ChannelSource::DefaultRoute { interface } => {
                write!(f, "interface {interface} on port {}", self.port)
            }
            ChannelSource::Unknown => write!(f, "unknown channel on port {}", self.port),
        }
    }
}
