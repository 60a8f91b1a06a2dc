// Replicated database cluster workflow
//
// Concrete states, guards and persistence that drive a cluster from its
// desired spec to a running replica set, one tick per invocation.

pub mod context;
pub mod controller;
pub mod states;
pub mod status;
pub mod store;
pub mod types;
pub mod validation;
pub mod workflow;

pub use context::ReconcileContext;
pub use controller::{ClusterReconciler, ReconcileError};
pub use status::{fail_with_status, update_status, MessageSeverity, StatusOptions};
pub use store::{InMemoryResourceStore, ResourceStore, StoreError, StoreResult};
pub use types::{
    AutomationConfig, ConfigMap, DbCluster, DbClusterSpec, DbClusterStatus, ObjectMeta, Phase,
    ResourceName, Secret, SecuritySpec, Service, TlsSpec, UpdateStrategy, Workload,
    WorkloadStatus, STATE_MACHINE_ANNOTATION,
};
pub use validation::{validate_spec, ValidationError};
pub use workflow::{
    build_state_machine, progress_record, transition_graph, AnnotationProgressStore,
    INITIAL_STATE,
};
