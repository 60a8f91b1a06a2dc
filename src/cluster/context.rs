use std::sync::Arc;
use std::time::Duration;

use super::store::{ResourceStore, StoreResult};
use super::types::{next_member_count, DbCluster, DbClusterStatus, Workload};

/// Everything a state, completion check or guard may look at during one
/// tick. Built from the store at the start of the invocation; actions refresh
/// the parts they change so the guards evaluated afterwards see the result.
///
/// Status writes land in `cluster.status` only. Scaling guards read
/// `observed_status`, the status as it was when the tick started.
pub struct ReconcileContext {
    /// Desired spec plus the status as last written
    pub cluster: DbCluster,
    /// Status as read from the store before any action ran
    pub observed_status: DbClusterStatus,
    /// Workload as last observed, `None` before it was ever created
    pub observed_workload: Option<Workload>,
    pub store: Arc<dyn ResourceStore>,
    /// Requeue delay while waiting on something outside our control
    pub pending_requeue: Duration,
}

impl ReconcileContext {
    pub async fn observe(
        cluster: DbCluster,
        store: Arc<dyn ResourceStore>,
        pending_requeue: Duration,
    ) -> StoreResult<Self> {
        let observed_workload = match store.get_workload(&cluster.resource_name()).await {
            Ok(workload) => Some(workload),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        Ok(Self {
            observed_status: cluster.status.clone(),
            cluster,
            observed_workload,
            store,
            pending_requeue,
        })
    }

    pub fn pending_seconds(&self) -> u64 {
        self.pending_requeue.as_secs()
    }
}

// Guards. Pure functions of the snapshot so they can be evaluated in any
// order, any number of times.

pub fn tls_enabled(ctx: &ReconcileContext) -> bool {
    ctx.cluster.spec.security.tls.enabled
}

/// The automation config must reach the agents before the workload changes:
/// on first deployment (agents need a config to start from) and when scaling
/// down (members leave the replica set before their pods go away).
pub fn needs_config_published_first(ctx: &ReconcileContext) -> bool {
    if ctx.observed_workload.is_none() {
        return true;
    }
    ctx.observed_status.current_members > ctx.cluster.desired_members()
}

pub fn deploy_workload_first(ctx: &ReconcileContext) -> bool {
    !needs_config_published_first(ctx)
}

pub fn is_changing_version(ctx: &ReconcileContext) -> bool {
    ctx.cluster.is_changing_version()
}

/// Compares against the member count observed at the start of the tick, so a
/// status write made by the current state does not end the scaling loop early.
pub fn is_still_scaling(ctx: &ReconcileContext) -> bool {
    let desired = ctx.cluster.desired_members();
    next_member_count(ctx.observed_status.current_members, desired) != desired
}
