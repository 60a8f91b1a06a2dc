// Entry point called by the external scheduler once per managed resource.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn, Instrument};

use super::context::ReconcileContext;
use super::store::{ResourceStore, StoreError};
use super::types::ResourceName;
use super::workflow::build_state_machine;
use crate::config::ReconcilerConfig;
use crate::observability::OperationTimer;
use crate::state::{ConfigError, NoPacing, Outcome, Pacer, TickError};
use crate::telemetry::{create_reconcile_span, generate_correlation_id};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("resource store error: {0}")]
    Store(#[from] StoreError),

    #[error("state machine configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tick(#[from] TickError),
}

/// Reconciles database clusters one tick at a time.
///
/// Holds no per-resource state. The scheduler must not call [`reconcile`]
/// concurrently for the same resource.
///
/// [`reconcile`]: ClusterReconciler::reconcile
pub struct ClusterReconciler {
    store: Arc<dyn ResourceStore>,
    pacer: Arc<dyn Pacer>,
    pending_requeue: Duration,
}

impl ClusterReconciler {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            pacer: Arc::new(NoPacing),
            pending_requeue: Duration::from_secs(10),
        }
    }

    pub fn from_config(store: Arc<dyn ResourceStore>, config: &ReconcilerConfig) -> Self {
        Self {
            store,
            pacer: config.pacing.pacer(),
            pending_requeue: config.workflow.pending_requeue(),
        }
    }

    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_pending_requeue(mut self, pending_requeue: Duration) -> Self {
        self.pending_requeue = pending_requeue;
        self
    }

    /// Advances the named cluster by at most one state.
    pub async fn reconcile(&self, name: &ResourceName) -> Result<Outcome, ReconcileError> {
        let correlation_id = generate_correlation_id();
        let span = create_reconcile_span(name, &correlation_id);
        self.reconcile_once(name).instrument(span).await
    }

    async fn reconcile_once(&self, name: &ResourceName) -> Result<Outcome, ReconcileError> {
        let timer = OperationTimer::new("reconcile");

        let cluster = match self.store.get_cluster(name).await {
            Ok(cluster) => cluster,
            Err(e) if e.is_not_found() => {
                debug!(resource = %name, "Resource not found, nothing to reconcile");
                return Ok(Outcome::Done);
            }
            Err(e) => return Err(e.into()),
        };

        let mut machine = build_state_machine(&cluster, self.store.clone(), self.pacer.clone())?;
        let mut ctx =
            ReconcileContext::observe(cluster, self.store.clone(), self.pending_requeue).await?;

        let result = machine.tick(&mut ctx).await;
        timer.finish();

        match result {
            Ok(outcome) => {
                info!(state = %machine.current_state(), outcome = ?outcome, "Reconcile tick finished");
                Ok(outcome)
            }
            Err(e) => {
                warn!(state = %e.state(), error = %e, "Reconcile tick failed");
                Err(e.into())
            }
        }
    }
}
