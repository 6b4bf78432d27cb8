//! [`PacketFilter`] binding over the `iptables` command line.

use super::{CommandRunner, CommandSpec, PacketFilter};
use crate::errors::CollabError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Comment tag carried by every rule this crate inserts.
pub const RULE_COMMENT: &str = "siab";

/// A packet-filter rule: a chain plus the match/target specification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterRule {
    /// Chain, e.g. `INPUT`.
    pub chain: String,
    /// Rule specification as `iptables` arguments.
    pub spec: Vec<String>,
}

impl FilterRule {
    /// Creates a rule on `chain`.
    #[must_use]
    pub fn new<I, S>(chain: impl Into<String>, spec: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chain: chain.into(),
            spec: spec.into_iter().map(Into::into).collect(),
        }
    }

    /// Accepts inbound TCP on `port` from any source.
    #[must_use]
    pub fn accept_tcp(port: u16, comment: &str) -> Self {
        let port = port.to_string();
        Self::new(
            "INPUT",
            [
                "-p",
                "tcp",
                "--dport",
                port.as_str(),
                "-m",
                "comment",
                "--comment",
                comment,
                "-j",
                "ACCEPT",
            ],
        )
    }

    /// Accepts inbound traffic belonging to established connections.
    #[must_use]
    pub fn accept_established(comment: &str) -> Self {
        Self::new(
            "INPUT",
            [
                "-m",
                "conntrack",
                "--ctstate",
                "ESTABLISHED,RELATED",
                "-m",
                "comment",
                "--comment",
                comment,
                "-j",
                "ACCEPT",
            ],
        )
    }

    /// Returns the destination port, if the rule matches one.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.spec
            .iter()
            .position(|a| a == "--dport")
            .and_then(|i| self.spec.get(i + 1))
            .and_then(|p| p.parse().ok())
    }
}

impl fmt::Display for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.chain, self.spec.join(" "))
    }
}

/// Packet filter driven through `iptables`.
#[derive(Clone)]
pub struct IptablesFilter {
    runner: Arc<dyn CommandRunner>,
    program: String,
    timeout: Duration,
}

impl fmt::Debug for IptablesFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IptablesFilter")
            .field("program", &self.program)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl IptablesFilter {
    /// Creates a filter using `iptables` from `PATH`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            program: "iptables".to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    fn command(&self, op: &str, rule: &FilterRule) -> CommandSpec {
        let spec = CommandSpec::new(&self.program)
            .arg("-w")
            .arg(op)
            .arg(&rule.chain)
            .timeout(self.timeout);
        let spec = if op == "-I" { spec.arg("1") } else { spec };
        spec.args(rule.spec.iter().cloned())
    }
}

#[async_trait]
impl PacketFilter for IptablesFilter {
    async fn contains(&self, rule: &FilterRule) -> Result<bool, CollabError> {
        let spec = self.command("-C", rule);
        let output = self.runner.run_command(&spec).await?;
        // -C exits 1 for a missing rule; anything else is a real failure.
        match output.code {
            0 => Ok(true),
            1 => Ok(false),
            code => Err(CollabError::Exit {
                command: spec.display(),
                code,
                output: output.combined(),
            }),
        }
    }

    async fn insert_first(&self, rule: &FilterRule) -> Result<(), CollabError> {
        let spec = self.command("-I", rule);
        self.runner.run_command(&spec).await?.check(&spec).map(drop)
    }

    async fn remove(&self, rule: &FilterRule) -> Result<(), CollabError> {
        while self.contains(rule).await? {
            let spec = self.command("-D", rule);
            self.runner.run_command(&spec).await?.check(&spec)?;
        }
        Ok(())
    }
}
