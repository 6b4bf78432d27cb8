//! Deletion with a forced-removal fallback.
//!
//! Objects that refuse ordinary deletion, usually because a finalizer's
//! controller is already gone, get their finalizers stripped. The forced
//! path only runs after the ordinary wait has expired.

use crate::collab::{ClusterClient, DesiredState, ResourceRef, Selector};
use crate::context::ExecutionContext;
use crate::errors::StepError;
use crate::pipeline::{poll_until, PollConfig};
use tracing::{info, warn};

/// How the targets went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// Ordinary deletion succeeded.
    Deleted,
    /// Finalizers were stripped from these objects.
    Forced(Vec<ResourceRef>),
}

async fn still_present(
    cluster: &dyn ClusterClient,
    targets: &[ResourceRef],
) -> Result<Vec<ResourceRef>, StepError> {
    let mut present = Vec::new();
    for target in targets {
        if cluster
            .query_readiness(&Selector::Resource(target.clone()))
            .await?
            .present
        {
            present.push(target.clone());
        }
    }
    Ok(present)
}

async fn wait_gone(
    cluster: &dyn ClusterClient,
    ctx: &ExecutionContext,
    targets: &[ResourceRef],
    what: &str,
) -> Result<(), StepError> {
    poll_until(
        PollConfig::deletion(&ctx.config().timeouts),
        what,
        ctx.cancellation(),
        || async move { Ok(still_present(cluster, targets).await?.is_empty()) },
    )
    .await
}

/// Deletes `targets` in order and waits for them to disappear, stripping
/// finalizers from whatever is left once the ordinary wait expires.
///
/// # Errors
///
/// Returns the collaborator error of a failed delete, [`StepError::Interrupted`]
/// on cancellation, or an apply error naming what survived forced removal.
pub async fn remove_with_fallback(
    cluster: &dyn ClusterClient,
    ctx: &ExecutionContext,
    targets: &[ResourceRef],
) -> Result<RemovalOutcome, StepError> {
    for target in targets {
        info!(resource = %target, "Deleting");
        cluster
            .apply_desired_state(&DesiredState::Absent(target.clone()))
            .await?;
    }

    match wait_gone(cluster, ctx, targets, "ordinary deletion").await {
        Ok(()) => return Ok(RemovalOutcome::Deleted),
        Err(StepError::Timeout { .. }) => {}
        Err(e) => return Err(e),
    }

    let stuck: Vec<ResourceRef> = still_present(cluster, targets)
        .await?
        .into_iter()
        .filter(|t| !t.is_release())
        .collect();
    warn!(count = stuck.len(), "Deletion stuck; stripping finalizers");

    for target in &stuck {
        cluster
            .apply_desired_state(&DesiredState::strip_finalizers(target.clone()))
            .await?;
        cluster
            .apply_desired_state(&DesiredState::Absent(target.clone()))
            .await?;
    }

    match wait_gone(cluster, ctx, targets, "forced deletion").await {
        Ok(()) => Ok(RemovalOutcome::Forced(stuck)),
        Err(StepError::Timeout { .. }) => {
            let left = still_present(cluster, targets).await?;
            let names: Vec<String> = left.iter().map(ToString::to_string).collect();
            Err(StepError::apply(format!(
                "still present after forced removal: {}",
                names.join(", ")
            )))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::InstallMode;
    use crate::testing::{test_context, FakeHost};
    use pretty_assertions::assert_eq;

    async fn seed(host: &FakeHost, ns: &str) -> Vec<ResourceRef> {
        host.apply_desired_state(&DesiredState::Namespace { name: ns.to_string() })
            .await
            .unwrap();
        vec![ResourceRef::namespace(ns)]
    }

    #[tokio::test(start_paused = true)]
    async fn test_ordinary_deletion() {
        let root = tempfile::tempdir().unwrap();
        let ctx = test_context(InstallMode::Uninstall, root.path());
        let host = FakeHost::with_cluster();
        let targets = seed(&host, "minio").await;

        let outcome = remove_with_fallback(&host, &ctx, &targets).await.unwrap();

        assert_eq!(outcome, RemovalOutcome::Deleted);
        assert_eq!(host.object_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_namespace_is_forced() {
        let root = tempfile::tempdir().unwrap();
        let ctx = test_context(InstallMode::Uninstall, root.path());
        let host = FakeHost::with_cluster();
        let targets = seed(&host, "longhorn-system").await;
        host.make_stuck(targets[0].clone());

        let outcome = remove_with_fallback(&host, &ctx, &targets).await.unwrap();

        assert_eq!(outcome, RemovalOutcome::Forced(targets.clone()));
        assert!(!host.has_object(&targets[0]));
        assert!(host
            .applied()
            .iter()
            .any(|d| matches!(d, DesiredState::Patch { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_failure_propagates() {
        let root = tempfile::tempdir().unwrap();
        let ctx = test_context(InstallMode::Uninstall, root.path());
        let host = FakeHost::with_cluster();
        let targets = seed(&host, "gatekeeper-system").await;
        host.fail_matching("gatekeeper-system", 1);

        let err = remove_with_fallback(&host, &ctx, &targets).await.unwrap_err();
        assert!(matches!(err, StepError::Collab(_)));
    }
}
