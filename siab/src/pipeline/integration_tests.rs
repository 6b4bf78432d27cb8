//! Property suite for the executor: idempotency, resumability, ordering,
//! continue-on-error teardown, the safety invariant and interrupts.

use super::{Executor, GuardPolicy, RegistryBuilder, RunResult, StepRegistry};
use crate::collab::{ClusterClient, DesiredState, HelmRelease, PacketFilter, Selector};
use crate::context::ExecutionContext;
use crate::core::{FailureKind, InstallMode, Mutation, StepStatus};
use crate::errors::StepError;
use crate::events::CollectingEventSink;
use crate::pipeline::CancellationToken;
use crate::safety::{ManagementChannel, SafetyGuard};
use crate::steps::{FnStep, Step};
use crate::testing::{
    test_context, ConvergingStep, FakeHost, FlakyStep, HangingStep, RecordingStep,
};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn statuses(result: &RunResult) -> Vec<StepStatus> {
    result.records.iter().map(|r| r.status).collect()
}

async fn run(registry: &StepRegistry, root: &std::path::Path) -> RunResult {
    let ctx = test_context(registry.mode(), root);
    Executor::new().execute(registry, &ctx).await
}

#[tokio::test]
async fn test_second_run_applies_nothing() {
    let root = tempfile::tempdir().unwrap();
    let a = Arc::new(ConvergingStep::new("a"));
    let b = Arc::new(ConvergingStep::new("b").with_mutation(Mutation::Workload));
    let registry = RegistryBuilder::new("idempotency", InstallMode::Install)
        .shared(a.clone())
        .shared(b.clone())
        .build()
        .unwrap();

    let first = run(&registry, root.path()).await;
    let second = run(&registry, root.path()).await;

    assert_eq!(statuses(&first), vec![StepStatus::Done, StepStatus::Done]);
    assert_eq!(statuses(&second), vec![StepStatus::Skipped, StepStatus::Skipped]);
    assert_eq!(a.apply_count(), 1);
    assert_eq!(b.apply_count(), 1);
    assert!(second.records.iter().all(|r| !r.applied));
}

#[tokio::test]
async fn test_rerun_resumes_at_failed_step() {
    let root = tempfile::tempdir().unwrap();
    let a = Arc::new(ConvergingStep::new("a"));
    let b = Arc::new(FlakyStep::new("b", 1));
    let c = Arc::new(ConvergingStep::new("c"));
    let registry = RegistryBuilder::new("resume", InstallMode::Install)
        .shared(a.clone())
        .shared(b.clone())
        .shared(c.clone())
        .build()
        .unwrap();

    let first = run(&registry, root.path()).await;
    assert_eq!(
        statuses(&first),
        vec![StepStatus::Done, StepStatus::Failed, StepStatus::Pending]
    );
    assert_eq!(first.halted_at.as_deref(), Some("b"));
    assert_eq!(first.record("b").unwrap().failure, Some(FailureKind::Apply));

    let second = run(&registry, root.path()).await;
    assert_eq!(
        statuses(&second),
        vec![StepStatus::Skipped, StepStatus::Done, StepStatus::Done]
    );
    assert!(second.is_success());

    assert_eq!(a.apply_count(), 1);
    assert_eq!(b.success_count(), 1);
    assert_eq!(c.apply_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_next_step_waits_for_slow_step() {
    let root = tempfile::tempdir().unwrap();
    let journal = RecordingStep::journal();
    let registry = RegistryBuilder::new("ordering", InstallMode::Install)
        .step(RecordingStep::new("a", Duration::from_millis(750), journal.clone()))
        .step(RecordingStep::new("b", Duration::ZERO, journal.clone()))
        .build()
        .unwrap();

    let result = run(&registry, root.path()).await;
    assert!(result.is_success());

    let calls = journal.lock().clone();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].step, "a");
    assert_eq!(calls[1].step, "b");
    assert!(calls[1].started >= calls[0].finished);
    assert!(calls[0].finished - calls[0].started >= Duration::from_millis(750));
}

#[tokio::test]
async fn test_uninstall_attempts_every_step() {
    let root = tempfile::tempdir().unwrap();
    let x = Arc::new(ConvergingStep::new("x"));
    let y = Arc::new(FlakyStep::always("y"));
    let z = Arc::new(ConvergingStep::new("z"));
    let registry = RegistryBuilder::new("teardown", InstallMode::Uninstall)
        .shared(x.clone())
        .shared(y.clone())
        .shared(z.clone())
        .build()
        .unwrap();

    let result = run(&registry, root.path()).await;

    assert_eq!(
        statuses(&result),
        vec![StepStatus::Done, StepStatus::Failed, StepStatus::Done]
    );
    assert_eq!(z.apply_count(), 1);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].step, "y");
    assert!(result.halted_at.is_none());
    assert!(!result.is_success());
}

#[tokio::test]
async fn test_flushing_step_keeps_management_rule() {
    for mutation in [Mutation::Network, Mutation::Firewall, Mutation::ClusterMembership] {
        let root = tempfile::tempdir().unwrap();
        let host = Arc::new(FakeHost::new());
        let channel = ManagementChannel::from_ssh_connection("10.0.0.5 51000 10.0.0.10 2222").unwrap();
        let guard = Arc::new(SafetyGuard::for_channel(channel, host.clone()));

        let flusher = host.clone();
        let registry = RegistryBuilder::new("safety", InstallMode::Install)
            .step(
                FnStep::new("flush-rules", move |_| {
                    flusher.flush();
                    Ok(())
                })
                .with_mutation(mutation),
            )
            .build()
            .unwrap()
            .guarded(&guard, GuardPolicy::for_mode(InstallMode::Install));

        let sink = Arc::new(CollectingEventSink::new());
        let ctx = test_context(InstallMode::Install, root.path()).with_event_sink(sink.clone());
        let result = Executor::new().execute(&registry, &ctx).await;

        assert!(result.is_success(), "{mutation}: {:?}", result.failures);
        for keep_alive in guard.rules() {
            assert!(host.contains(&keep_alive.rule).await.unwrap(), "{mutation}: {} missing", keep_alive.name);
        }
        assert_eq!(sink.events_named("safety.check").len(), 2);
    }
}

#[tokio::test]
async fn test_unknown_channel_fails_every_teardown_step_on_its_own() {
    let root = tempfile::tempdir().unwrap();
    let host = Arc::new(FakeHost::new());
    let guard = Arc::new(SafetyGuard::for_channel(ManagementChannel::from_port(22), host.clone()));
    let firewall = Arc::new(ConvergingStep::new("firewall").with_mutation(Mutation::Firewall));
    let after = Arc::new(ConvergingStep::new("after"));
    let registry = RegistryBuilder::new("teardown", InstallMode::Uninstall)
        .shared(firewall.clone())
        .shared(after.clone())
        .build()
        .unwrap()
        .guarded(&guard, GuardPolicy::for_mode(InstallMode::Uninstall));

    let result = run(&registry, root.path()).await;

    assert_eq!(result.record("firewall").unwrap().failure, Some(FailureKind::Safety));
    assert_eq!(firewall.apply_count(), 0);
    assert_eq!(result.record("after").unwrap().failure, Some(FailureKind::Safety));
    assert_eq!(after.apply_count(), 0);
}

#[tokio::test]
async fn test_unknown_channel_leaves_unguarded_install_steps_alone() {
    let root = tempfile::tempdir().unwrap();
    let host = Arc::new(FakeHost::new());
    let guard = Arc::new(SafetyGuard::for_channel(ManagementChannel::from_port(22), host.clone()));
    let dirs = Arc::new(ConvergingStep::new("dirs"));
    let firewall = Arc::new(ConvergingStep::new("firewall").with_mutation(Mutation::Firewall));
    let registry = RegistryBuilder::new("install", InstallMode::Install)
        .shared(dirs.clone())
        .shared(firewall.clone())
        .build()
        .unwrap()
        .guarded(&guard, GuardPolicy::for_mode(InstallMode::Install));

    let result = run(&registry, root.path()).await;

    assert_eq!(statuses(&result), vec![StepStatus::Done, StepStatus::Failed]);
    assert_eq!(dirs.apply_count(), 1);
    assert_eq!(firewall.apply_count(), 0);
    assert_eq!(result.halted_at.as_deref(), Some("firewall"));
}

/// Converges one desired state on the fake cluster.
#[derive(Debug)]
struct Converge {
    id: &'static str,
    desired: DesiredState,
    host: Arc<FakeHost>,
}

#[async_trait]
impl Step for Converge {
    fn id(&self) -> &str {
        self.id
    }

    async fn probe(&self, _ctx: &ExecutionContext) -> Result<bool, StepError> {
        let state = self
            .host
            .query_readiness(&Selector::Resource(self.desired.target()))
            .await?;
        Ok(match self.desired {
            DesiredState::Namespace { .. } => state.present && state.ready,
            _ => state.matches(&self.desired.fingerprint()),
        })
    }

    async fn apply(&self, _ctx: &ExecutionContext) -> Result<(), StepError> {
        Ok(self.host.apply_desired_state(&self.desired).await?)
    }
}

#[tokio::test]
async fn test_fresh_host_scenario() {
    let root = tempfile::tempdir().unwrap();
    let host = Arc::new(FakeHost::with_cluster());
    let registry = RegistryBuilder::new("scenario", InstallMode::Install)
        .step(Converge {
            id: "create-namespace",
            desired: DesiredState::Namespace {
                name: "demo".to_string(),
            },
            host: host.clone(),
        })
        .step(Converge {
            id: "install-component",
            desired: DesiredState::HelmRelease(HelmRelease {
                name: "web".to_string(),
                namespace: "demo".to_string(),
                repo_name: "bitnami".to_string(),
                repo_url: "https://charts.bitnami.com/bitnami".to_string(),
                chart: "nginx".to_string(),
                version: "18.1.0".to_string(),
                values: json!({ "replicaCount": 1 }),
            }),
            host: host.clone(),
        })
        .step(Converge {
            id: "configure-routing",
            desired: DesiredState::manifest(json!({
                "apiVersion": "networking.istio.io/v1beta1",
                "kind": "VirtualService",
                "metadata": { "name": "web", "namespace": "demo" },
                "spec": { "hosts": ["web.siab.test"], "gateways": ["istio-system/siab-gateway"] }
            })),
            host: host.clone(),
        })
        .build()
        .unwrap();

    let first = run(&registry, root.path()).await;
    assert_eq!(statuses(&first), vec![StepStatus::Done; 3]);
    assert_eq!(first.applied_count(), 3);
    assert_eq!(first.skipped_count(), 0);
    assert_eq!(host.applied().len(), 3);

    let second = run(&registry, root.path()).await;
    assert_eq!(statuses(&second), vec![StepStatus::Skipped; 3]);
    assert_eq!(second.applied_count(), 0);
    assert_eq!(host.applied().len(), 3);
}

#[tokio::test]
async fn test_probe_error_falls_through_to_apply() {
    let root = tempfile::tempdir().unwrap();
    let registry = RegistryBuilder::new("probe", InstallMode::Install)
        .step(FnStep::new("unsure", |_| Ok(())).with_probe(|_| Err(StepError::probe("api unreachable"))))
        .build()
        .unwrap();
    let sink = Arc::new(CollectingEventSink::new());
    let ctx = test_context(InstallMode::Install, root.path()).with_event_sink(sink.clone());

    let result = Executor::new().execute(&registry, &ctx).await;

    let record = result.record("unsure").unwrap();
    assert_eq!(record.status, StepStatus::Done);
    assert!(record.probe_error.as_deref().unwrap().contains("api unreachable"));
    assert_eq!(sink.events_named("step.probe_warning").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_abandons_apply_in_flight() {
    let root = tempfile::tempdir().unwrap();
    let hanging = Arc::new(HangingStep::new("hang"));
    let after = Arc::new(ConvergingStep::new("after"));
    let registry = RegistryBuilder::new("interrupt", InstallMode::Install)
        .step(ConvergingStep::new("before"))
        .shared(hanging.clone())
        .shared(after.clone())
        .build()
        .unwrap();
    let token = Arc::new(CancellationToken::new());
    let ctx = test_context(InstallMode::Install, root.path()).with_cancellation(token.clone());

    let interrupt = async {
        while !hanging.started() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        token.cancel("ctrl-c");
    };
    let executor = Executor::new();
    let (result, ()) = tokio::join!(executor.execute(&registry, &ctx), interrupt);

    assert!(result.interrupted);
    assert!(result.halted_at.is_none());
    assert_eq!(
        statuses(&result),
        vec![StepStatus::Done, StepStatus::Failed, StepStatus::Pending]
    );
    assert_eq!(result.record("hang").unwrap().failure, Some(FailureKind::Interrupted));
    assert_eq!(after.apply_count(), 0);
}
