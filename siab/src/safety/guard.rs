//! Keep-alive rule set and the guard that re-asserts it.

use super::ManagementChannel;
use crate::collab::{FilterRule, PacketFilter};
use crate::context::ExecutionContext;
use crate::core::RunEvent;
use crate::errors::SafetyViolation;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Comment tag on keep-alive rules.
pub const KEEPALIVE_COMMENT: &str = "siab-keepalive";

/// One rule of the keep-alive set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAliveRule {
    /// Short name for logs.
    pub name: &'static str,
    /// The packet-filter rule.
    pub rule: FilterRule,
}

impl KeepAliveRule {
    /// The minimal set keeping `port` reachable: inbound on the port from
    /// any source, and established/related traffic.
    #[must_use]
    pub fn for_port(port: u16) -> Vec<Self> {
        vec![
            Self {
                name: "management-port",
                rule: FilterRule::accept_tcp(port, KEEPALIVE_COMMENT),
            },
            Self {
                name: "established",
                rule: FilterRule::accept_established(KEEPALIVE_COMMENT),
            },
        ]
    }
}

/// When the guard runs relative to the wrapped apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPhase {
    /// Before the apply.
    Pre,
    /// After the apply.
    Post,
}

impl fmt::Display for GuardPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pre => write!(f, "pre"),
            Self::Post => write!(f, "post"),
        }
    }
}

/// Guarantees the management channel survives mutating steps.
///
/// Asserting is idempotent: a rule already present is left alone, a
/// missing one is inserted at the top of its chain.
pub struct SafetyGuard {
    channel: ManagementChannel,
    rules: Vec<KeepAliveRule>,
    filter: Arc<dyn PacketFilter>,
}

impl fmt::Debug for SafetyGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafetyGuard")
            .field("channel", &self.channel)
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

impl SafetyGuard {
    /// Creates a guard with an explicit rule set.
    #[must_use]
    pub fn new(
        channel: ManagementChannel,
        rules: Vec<KeepAliveRule>,
        filter: Arc<dyn PacketFilter>,
    ) -> Self {
        Self {
            channel,
            rules,
            filter,
        }
    }

    /// Creates a guard with the keep-alive set for the channel's port.
    #[must_use]
    pub fn for_channel(channel: ManagementChannel, filter: Arc<dyn PacketFilter>) -> Self {
        let rules = KeepAliveRule::for_port(channel.port);
        Self::new(channel, rules, filter)
    }

    /// Returns the guarded channel.
    #[must_use]
    pub const fn channel(&self) -> &ManagementChannel {
        &self.channel
    }

    /// Returns the keep-alive rule set.
    #[must_use]
    pub fn rules(&self) -> &[KeepAliveRule] {
        &self.rules
    }

    fn violation(&self, reason: impl Into<String>) -> SafetyViolation {
        SafetyViolation::new(Some(self.channel.to_string()), reason)
    }

    /// Re-asserts the keep-alive rule set and returns how many rules had to
    /// be restored.
    ///
    /// # Errors
    ///
    /// Returns a violation if the channel is unknown, the filter cannot be
    /// inspected, or a rule is still missing after insertion.
    pub async fn assert_channel(&self) -> Result<usize, SafetyViolation> {
        if !self.channel.is_known() {
            return Err(self.violation("management channel could not be determined"));
        }

        let mut restored = 0;
        // Reverse order so the first rule of the set ends up on top.
        for keep in self.rules.iter().rev() {
            let present = self
                .filter
                .contains(&keep.rule)
                .await
                .map_err(|e| self.violation(format!("cannot inspect {}: {e}", keep.name)))?;
            if present {
                continue;
            }

            warn!(rule = keep.name, channel = %self.channel, "Restoring keep-alive rule");
            self.filter
                .insert_first(&keep.rule)
                .await
                .map_err(|e| self.violation(format!("cannot restore {}: {e}", keep.name)))?;

            let confirmed = self
                .filter
                .contains(&keep.rule)
                .await
                .map_err(|e| self.violation(format!("cannot confirm {}: {e}", keep.name)))?;
            if !confirmed {
                return Err(self.violation(format!("{} missing after insertion", keep.name)));
            }
            restored += 1;
        }

        debug!(restored, "Keep-alive rule set asserted");
        Ok(restored)
    }

    /// Asserts the rule set around `step_id` and reports the check as a
    /// run event.
    ///
    /// # Errors
    ///
    /// See [`assert_channel`](Self::assert_channel).
    pub async fn check(
        &self,
        ctx: &ExecutionContext,
        step_id: &str,
        phase: GuardPhase,
    ) -> Result<usize, SafetyViolation> {
        let restored = self.assert_channel().await?;
        ctx.emit(&RunEvent::SafetyCheck {
            step_id: step_id.to_string(),
            phase: phase.to_string(),
            restored,
        });
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiabConfig;
    use crate::core::InstallMode;
    use crate::events::CollectingEventSink;
    use crate::safety::ChannelSource;
    use crate::testing::FakeHost;
    use pretty_assertions::assert_eq;

    fn channel() -> ManagementChannel {
        ManagementChannel {
            source: ChannelSource::Session {
                peer: "10.0.0.5".parse().unwrap(),
            },
            port: 22,
        }
    }

    #[tokio::test]
    async fn test_assert_inserts_missing_rules_on_top() {
        let host = Arc::new(FakeHost::new());
        host.seed_rule(FilterRule::new("INPUT", ["-j", "DROP"]));
        let guard = SafetyGuard::for_channel(channel(), host.clone());

        assert_eq!(guard.assert_channel().await.unwrap(), 2);

        let rules = host.rules();
        assert_eq!(rules[0], guard.rules()[0].rule);
        assert_eq!(rules[1], guard.rules()[1].rule);
        assert_eq!(rules[2], FilterRule::new("INPUT", ["-j", "DROP"]));
    }

    #[tokio::test]
    async fn test_assert_is_idempotent() {
        let host = Arc::new(FakeHost::new());
        let guard = SafetyGuard::for_channel(channel(), host.clone());

        guard.assert_channel().await.unwrap();
        assert_eq!(guard.assert_channel().await.unwrap(), 0);
        assert_eq!(host.rules().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_channel_is_a_violation() {
        let host = Arc::new(FakeHost::new());
        let guard = SafetyGuard::for_channel(ManagementChannel::from_port(22), host.clone());

        let err = guard.assert_channel().await.unwrap_err();
        assert!(err.reason.contains("could not be determined"));
        assert!(host.rules().is_empty());
    }

    #[tokio::test]
    async fn test_broken_filter_is_a_violation() {
        let host = Arc::new(FakeHost::new());
        host.break_filter("iptables: command not found");
        let guard = SafetyGuard::for_channel(channel(), host);

        let err = guard.assert_channel().await.unwrap_err();
        assert!(err.reason.contains("cannot inspect"));
        assert_eq!(err.channel.as_deref(), Some("session from 10.0.0.5 on port 22"));
    }

    #[tokio::test]
    async fn test_check_emits_event() {
        let sink = Arc::new(CollectingEventSink::new());
        let ctx = ExecutionContext::new(InstallMode::Uninstall, SiabConfig::default())
            .with_event_sink(sink.clone());
        let guard = SafetyGuard::for_channel(channel(), Arc::new(FakeHost::new()));

        guard.check(&ctx, "istio", GuardPhase::Pre).await.unwrap();

        let events = sink.events_named("safety.check");
        assert_eq!(
            events,
            vec![RunEvent::SafetyCheck {
                step_id: "istio".to_string(),
                phase: "pre".to_string(),
                restored: 2,
            }]
        );
    }
}
