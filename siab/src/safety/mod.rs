//! Management-channel protection.
//!
//! The guard detects the operator's session once per run and re-asserts a
//! minimal keep-alive rule set around every mutating step.

mod channel;
mod guard;

pub use channel::{ChannelSource, ManagementChannel, SSH_CONNECTION_VAR};
pub use guard::{GuardPhase, KeepAliveRule, SafetyGuard, KEEPALIVE_COMMENT};
