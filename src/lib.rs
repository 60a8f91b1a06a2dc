// Replica Reconciler - resumable reconciliation for replicated database clusters
// This exposes the generic state machine engine and the cluster workflow built on it

pub mod cluster;
pub mod config;
pub mod observability;
pub mod state;
pub mod telemetry;

// Re-export key types for easy access
pub use cluster::{ClusterReconciler, InMemoryResourceStore, ReconcileError, ResourceStore};
pub use config::{config, PacingPolicy, ReconcilerConfig};
pub use observability::{reconcile_metrics, OperationTimer, ReconcileMetrics, ReconcileStats};
pub use state::{
    Action, CompletionCheck, ConfigError, Machine, Outcome, Pacer, ProgressRecord, ProgressStore,
    State, TickError, TransitionGraph,
};
pub use telemetry::{create_reconcile_span, generate_correlation_id, init_telemetry};
