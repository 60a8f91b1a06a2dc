// Deployment workflow for a replicated database cluster
//
// Wires the concrete states into a transition graph and bootstraps a machine
// from the progress record stored on the resource itself.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::context::{
    deploy_workload_first, is_changing_version, is_still_scaling, needs_config_published_first,
    tls_enabled, ReconcileContext,
};
use super::states::{
    CreateService, CreateTlsResources, DeployAutomationConfig, DeployWorkload,
    ReconciliationEnd, ResetUpdateStrategy, StartFresh, TlsValidation, UpdateStatus,
    ValidateSpec, CREATE_SERVICE, CREATE_TLS_RESOURCES, DEPLOY_AUTOMATION_CONFIG,
    DEPLOY_WORKLOAD, RECONCILIATION_END, RESET_UPDATE_STRATEGY, START_FRESH, TLS_VALIDATION,
    UPDATE_STATUS, VALIDATE_SPEC,
};
use super::store::ResourceStore;
use super::types::{DbCluster, ResourceName, STATE_MACHINE_ANNOTATION};
use crate::state::{
    always, guard, ConfigError, Machine, Pacer, ProgressRecord, ProgressStore, State,
    TransitionGraph,
};

/// Where a reconciliation without a resume point begins
pub const INITIAL_STATE: &str = START_FRESH;

/// Builds the deployment graph. Outgoing edges are listed in priority order;
/// the first one whose guard holds is taken.
pub fn transition_graph() -> Result<TransitionGraph<ReconcileContext>, ConfigError> {
    let start_fresh = State::new(START_FRESH, StartFresh);
    let validate_spec = State::new(VALIDATE_SPEC, ValidateSpec);
    let create_service = State::new(CREATE_SERVICE, CreateService).with_completion(CreateService);
    let tls_validation = State::new(TLS_VALIDATION, TlsValidation).with_completion(TlsValidation);
    let create_tls_resources = State::new(CREATE_TLS_RESOURCES, CreateTlsResources);
    let deploy_automation_config = State::new(DEPLOY_AUTOMATION_CONFIG, DeployAutomationConfig)
        .with_completion(DeployAutomationConfig);
    let deploy_workload =
        State::new(DEPLOY_WORKLOAD, DeployWorkload).with_completion(DeployWorkload);
    let reset_update_strategy = State::new(RESET_UPDATE_STRATEGY, ResetUpdateStrategy)
        .with_completion(ResetUpdateStrategy);
    let update_status = State::new(UPDATE_STATUS, UpdateStatus);
    let reconciliation_end = State::new(RECONCILIATION_END, ReconciliationEnd);

    let mut graph = TransitionGraph::new();

    graph.add_transition(&start_fresh, &validate_spec, always())?;

    graph.add_transition(&validate_spec, &create_service, always())?;
    graph.add_transition(&validate_spec, &tls_validation, guard(tls_enabled))?;
    graph.add_transition(
        &validate_spec,
        &deploy_automation_config,
        guard(needs_config_published_first),
    )?;
    graph.add_transition(&validate_spec, &deploy_workload, guard(deploy_workload_first))?;

    graph.add_transition(&create_service, &tls_validation, guard(tls_enabled))?;
    graph.add_transition(
        &create_service,
        &deploy_automation_config,
        guard(needs_config_published_first),
    )?;
    graph.add_transition(&create_service, &deploy_workload, guard(deploy_workload_first))?;

    graph.add_transition(&tls_validation, &create_tls_resources, always())?;

    graph.add_transition(
        &create_tls_resources,
        &deploy_automation_config,
        guard(needs_config_published_first),
    )?;
    graph.add_transition(&create_tls_resources, &deploy_workload, guard(deploy_workload_first))?;

    graph.add_transition(&deploy_workload, &update_status, guard(is_still_scaling))?;
    graph.add_transition(&deploy_workload, &deploy_automation_config, guard(deploy_workload_first))?;
    graph.add_transition(&deploy_workload, &reset_update_strategy, guard(is_changing_version))?;
    graph.add_transition(&deploy_workload, &update_status, always())?;

    graph.add_transition(
        &deploy_automation_config,
        &deploy_workload,
        guard(needs_config_published_first),
    )?;
    graph.add_transition(
        &deploy_automation_config,
        &reset_update_strategy,
        guard(is_changing_version),
    )?;
    graph.add_transition(&deploy_automation_config, &update_status, always())?;

    graph.add_transition(&reset_update_strategy, &update_status, always())?;

    graph.add_transition(&update_status, &deploy_workload, guard(is_still_scaling))?;
    graph.add_transition(&update_status, &reconciliation_end, always())?;

    graph.register(&reconciliation_end)?;

    Ok(graph)
}

/// Reads the progress record annotation. A missing annotation means the
/// cluster was never reconciled and starts fresh.
pub fn progress_record(cluster: &DbCluster) -> Result<ProgressRecord, ConfigError> {
    match cluster.metadata.annotations.get(STATE_MACHINE_ANNOTATION) {
        Some(raw) if !raw.is_empty() => Ok(ProgressRecord::from_json(raw)?),
        _ => Ok(ProgressRecord::default()),
    }
}

/// Builds a machine for `cluster`, resuming wherever the last invocation
/// left off.
pub fn build_state_machine(
    cluster: &DbCluster,
    store: Arc<dyn ResourceStore>,
    pacer: Arc<dyn Pacer>,
) -> Result<Machine<ReconcileContext>, ConfigError> {
    let record = progress_record(cluster)?;
    let progress = Arc::new(AnnotationProgressStore::new(store, cluster.resource_name()));
    let machine =
        Machine::resume(transition_graph()?, &record, INITIAL_STATE, progress)?.with_pacer(pacer);
    debug!(cluster = %cluster.resource_name(), state = %machine.current_state(), "Built state machine");
    Ok(machine)
}

/// Persists the resume point into the cluster's own annotations.
///
/// Reads the latest copy before writing so concurrent annotation changes and
/// the rest of the record survive.
pub struct AnnotationProgressStore {
    store: Arc<dyn ResourceStore>,
    name: ResourceName,
}

impl AnnotationProgressStore {
    pub fn new(store: Arc<dyn ResourceStore>, name: ResourceName) -> Self {
        Self { store, name }
    }
}

#[async_trait]
impl ProgressStore for AnnotationProgressStore {
    async fn save_next_state(&self, state_name: &str) -> Result<()> {
        let mut cluster = self.store.get_cluster(&self.name).await?;
        let mut record = progress_record(&cluster)?;
        record.next_state = state_name.to_string();
        cluster
            .metadata
            .annotations
            .insert(STATE_MACHINE_ANNOTATION.to_string(), record.to_json()?);
        self.store.update_cluster(&cluster).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::store::InMemoryResourceStore;
    use crate::cluster::types::DbClusterSpec;
    use crate::state::NoPacing;

    fn cluster() -> DbCluster {
        DbCluster::new(
            "db",
            "example",
            DbClusterSpec {
                members: 3,
                version: "6.0.5".to_string(),
                security: Default::default(),
            },
        )
    }

    #[test]
    fn test_graph_edge_priorities() {
        let graph = transition_graph().unwrap();
        let targets = |from: &str| -> Vec<String> {
            graph
                .transitions_from(from)
                .iter()
                .map(|t| t.to().to_string())
                .collect()
        };

        assert_eq!(
            targets(VALIDATE_SPEC),
            vec![CREATE_SERVICE, TLS_VALIDATION, DEPLOY_AUTOMATION_CONFIG, DEPLOY_WORKLOAD]
        );
        assert_eq!(
            targets(DEPLOY_WORKLOAD),
            vec![UPDATE_STATUS, DEPLOY_AUTOMATION_CONFIG, RESET_UPDATE_STRATEGY, UPDATE_STATUS]
        );
        assert!(targets(RECONCILIATION_END).is_empty());
        assert_eq!(graph.state_names().count(), 10);
    }

    #[test]
    fn test_missing_annotation_starts_fresh() {
        let machine = build_state_machine(
            &cluster(),
            Arc::new(InMemoryResourceStore::new()),
            Arc::new(NoPacing),
        )
        .unwrap();
        assert_eq!(machine.current_state(), START_FRESH);
    }

    #[test]
    fn test_resumes_from_annotation() {
        let mut c = cluster();
        c.metadata.annotations.insert(
            STATE_MACHINE_ANNOTATION.to_string(),
            r#"{"nextState":"DeployWorkload","stateCompletion":null}"#.to_string(),
        );
        let machine = build_state_machine(
            &c,
            Arc::new(InMemoryResourceStore::new()),
            Arc::new(NoPacing),
        )
        .unwrap();
        assert_eq!(machine.current_state(), DEPLOY_WORKLOAD);
    }

    #[test]
    fn test_unknown_or_corrupt_annotation_fails() {
        let store: Arc<dyn ResourceStore> = Arc::new(InMemoryResourceStore::new());
        let mut c = cluster();

        c.metadata.annotations.insert(
            STATE_MACHINE_ANNOTATION.to_string(),
            r#"{"nextState":"Bogus"}"#.to_string(),
        );
        assert!(matches!(
            build_state_machine(&c, store.clone(), Arc::new(NoPacing)),
            Err(ConfigError::UnregisteredState { .. })
        ));

        c.metadata
            .annotations
            .insert(STATE_MACHINE_ANNOTATION.to_string(), "{not json".to_string());
        assert!(matches!(
            build_state_machine(&c, store, Arc::new(NoPacing)),
            Err(ConfigError::InvalidProgressRecord(_))
        ));
    }

    #[tokio::test]
    async fn test_annotation_store_preserves_completion_map() {
        let store = Arc::new(InMemoryResourceStore::new());
        let mut c = cluster();
        c.metadata.annotations.insert(
            STATE_MACHINE_ANNOTATION.to_string(),
            r#"{"nextState":"CreateService","stateCompletion":{"CreateService":"done"}}"#
                .to_string(),
        );
        c.metadata
            .annotations
            .insert("unrelated".to_string(), "kept".to_string());
        store.put_cluster(c.clone()).await;

        let progress = AnnotationProgressStore::new(store.clone(), c.resource_name());
        progress.save_next_state(DEPLOY_WORKLOAD).await.unwrap();

        let stored = store.get_cluster(&c.resource_name()).await.unwrap();
        let record = progress_record(&stored).unwrap();
        assert_eq!(record.next_state, DEPLOY_WORKLOAD);
        assert_eq!(record.state_completion["CreateService"], "done");
        assert_eq!(stored.metadata.annotations["unrelated"], "kept");
    }
}
