// Concrete states of the cluster deployment pipeline.
//
// Every action is safe to re-run from scratch: creates fall back to adopting
// what already exists and updates write the full desired object.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, error, info};

use super::context::ReconcileContext;
use super::status::{fail_with_status, update_status, MessageSeverity, StatusOptions};
use super::store::StoreResult;
use super::types::{
    AutomationConfig, Secret, Service, UpdateStrategy, Workload,
    LAST_APPLIED_VERSION_ANNOTATION, LAST_SUCCESSFUL_CONFIGURATION_ANNOTATION,
    STATE_MACHINE_ANNOTATION, DATABASE_PORT,
};
use super::validation::validate_spec;
use crate::state::{Action, CompletionCheck, Outcome, ProgressRecord};

pub const START_FRESH: &str = "StartFresh";
pub const VALIDATE_SPEC: &str = "ValidateSpec";
pub const CREATE_SERVICE: &str = "CreateService";
pub const TLS_VALIDATION: &str = "TlsValidation";
pub const CREATE_TLS_RESOURCES: &str = "CreateTlsResources";
pub const DEPLOY_AUTOMATION_CONFIG: &str = "DeployAutomationConfig";
pub const DEPLOY_WORKLOAD: &str = "DeployWorkload";
pub const RESET_UPDATE_STRATEGY: &str = "ResetUpdateStrategy";
pub const UPDATE_STATUS: &str = "UpdateStatus";
pub const RECONCILIATION_END: &str = "ReconciliationEnd";

const TLS_CERT_KEY: &str = "tls.crt";
const TLS_PRIVATE_KEY: &str = "tls.key";
const CA_CERT_KEY: &str = "ca.crt";
const OPERATOR_PEM_KEY: &str = "server.pem";

/// Re-reads the workload into the snapshot
async fn refresh_workload(ctx: &mut ReconcileContext) -> StoreResult<Option<Workload>> {
    let workload = match ctx.store.get_workload(&ctx.cluster.resource_name()).await {
        Ok(workload) => Some(workload),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e),
    };
    ctx.observed_workload = workload.clone();
    Ok(workload)
}

pub struct StartFresh;

#[async_trait]
impl Action<ReconcileContext> for StartFresh {
    async fn run(&self, ctx: &mut ReconcileContext) -> Result<Outcome> {
        info!(
            cluster = %ctx.cluster.resource_name(),
            spec = ?ctx.cluster.spec,
            status = ?ctx.cluster.status,
            "Reconciling cluster"
        );
        Ok(Outcome::Requeue)
    }
}

pub struct ValidateSpec;

#[async_trait]
impl Action<ReconcileContext> for ValidateSpec {
    async fn run(&self, ctx: &mut ReconcileContext) -> Result<Outcome> {
        debug!(cluster = %ctx.cluster.resource_name(), "Validating spec");
        if let Err(e) = validate_spec(&ctx.cluster) {
            return Err(fail_with_status(ctx, format!("error validating new spec: {e}")).await);
        }
        Ok(Outcome::Requeue)
    }
}

pub struct CreateService;

impl CreateService {
    fn build(ctx: &ReconcileContext) -> Service {
        let mut selector = BTreeMap::new();
        selector.insert("app".to_string(), ctx.cluster.service_name().name);
        Service {
            name: ctx.cluster.service_name(),
            port: DATABASE_PORT,
            selector,
        }
    }
}

#[async_trait]
impl Action<ReconcileContext> for CreateService {
    async fn run(&self, ctx: &mut ReconcileContext) -> Result<Outcome> {
        debug!("Ensuring the service exists");
        let service = Self::build(ctx);
        match ctx.store.create_service(&service).await {
            Ok(()) => info!(service = %service.name, "Created service"),
            Err(e) if e.is_already_exists() => {
                info!(service = %service.name, "The service already exists, moving forward")
            }
            Err(e) => {
                return Err(
                    fail_with_status(ctx, format!("Error ensuring the service exists: {e}")).await,
                )
            }
        }
        Ok(Outcome::Requeue)
    }
}

#[async_trait]
impl CompletionCheck<ReconcileContext> for CreateService {
    async fn is_complete(&self, ctx: &ReconcileContext) -> Result<bool> {
        match ctx.store.get_service(&ctx.cluster.service_name()).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

pub struct TlsValidation;

impl TlsValidation {
    /// Both user supplied TLS objects exist and hold the expected keys
    async fn is_valid(ctx: &ReconcileContext) -> StoreResult<bool> {
        let secret = match ctx.store.get_secret(&ctx.cluster.tls_certificate_secret_name()).await {
            Ok(secret) => secret,
            Err(e) if e.is_not_found() => {
                debug!(secret = %ctx.cluster.tls_certificate_secret_name(), "TLS secret not found");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        if !secret.data.contains_key(TLS_CERT_KEY) || !secret.data.contains_key(TLS_PRIVATE_KEY) {
            debug!(secret = %secret.name, "TLS secret is missing the certificate or key");
            return Ok(false);
        }

        match ctx.store.get_config_map(&ctx.cluster.tls_ca_config_map_name()).await {
            Ok(config_map) => Ok(config_map.data.contains_key(CA_CERT_KEY)),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Action<ReconcileContext> for TlsValidation {
    async fn run(&self, ctx: &mut ReconcileContext) -> Result<Outcome> {
        let valid = match Self::is_valid(ctx).await {
            Ok(valid) => valid,
            Err(e) => {
                return Err(fail_with_status(ctx, format!("Error validating TLS config: {e}")).await)
            }
        };

        if !valid {
            let seconds = ctx.pending_seconds();
            return update_status(
                ctx,
                StatusOptions::new()
                    .with_message(
                        MessageSeverity::Info,
                        format!("TLS config is not yet valid, retrying in {seconds} seconds"),
                    )
                    .with_pending_phase(seconds),
            )
            .await;
        }

        debug!("Successfully validated TLS configuration");
        Ok(Outcome::Requeue)
    }
}

#[async_trait]
impl CompletionCheck<ReconcileContext> for TlsValidation {
    async fn is_complete(&self, ctx: &ReconcileContext) -> Result<bool> {
        Ok(Self::is_valid(ctx).await?)
    }
}

pub struct CreateTlsResources;

impl CreateTlsResources {
    async fn ensure(ctx: &ReconcileContext) -> Result<()> {
        let source = ctx
            .store
            .get_secret(&ctx.cluster.tls_certificate_secret_name())
            .await?;
        let cert = source.data.get(TLS_CERT_KEY).cloned().unwrap_or_default();
        let key = source.data.get(TLS_PRIVATE_KEY).cloned().unwrap_or_default();

        let mut data = BTreeMap::new();
        data.insert(OPERATOR_PEM_KEY.to_string(), format!("{cert}\n{key}"));
        let secret = Secret {
            name: ctx.cluster.tls_operator_secret_name(),
            data,
        };

        match ctx.store.create_secret(&secret).await {
            Ok(()) => {
                info!(secret = %secret.name, "Created operator TLS secret");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                ctx.store.update_secret(&secret).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Action<ReconcileContext> for CreateTlsResources {
    async fn run(&self, ctx: &mut ReconcileContext) -> Result<Outcome> {
        if let Err(e) = Self::ensure(ctx).await {
            return Err(fail_with_status(ctx, format!("Error ensuring TLS resources: {e}")).await);
        }
        Ok(Outcome::Requeue)
    }
}

pub struct DeployAutomationConfig;

impl DeployAutomationConfig {
    fn build(ctx: &ReconcileContext) -> AutomationConfig {
        let cluster = &ctx.cluster;
        let service = cluster.service_name();
        let members = (0..cluster.members_this_reconciliation())
            .map(|i| {
                format!(
                    "{}-{}.{}.{}.svc.cluster.local:{}",
                    cluster.metadata.name, i, service.name, service.namespace, DATABASE_PORT
                )
            })
            .collect();
        AutomationConfig {
            name: cluster.resource_name(),
            version: 1,
            members,
            database_version: cluster.spec.version.clone(),
            tls_enabled: cluster.spec.security.tls.enabled,
        }
    }

    /// Publishes the desired config, bumping the version only when the
    /// content actually changed.
    async fn ensure(ctx: &ReconcileContext) -> StoreResult<AutomationConfig> {
        let mut desired = Self::build(ctx);
        match ctx.store.get_automation_config(&desired.name).await {
            Ok(existing) if existing.same_content(&desired) => Ok(existing),
            Ok(existing) => {
                desired.version = existing.version + 1;
                ctx.store.update_automation_config(&desired).await?;
                info!(version = desired.version, "Updated automation config");
                Ok(desired)
            }
            Err(e) if e.is_not_found() => {
                ctx.store.create_automation_config(&desired).await?;
                info!(version = desired.version, "Created automation config");
                Ok(desired)
            }
            Err(e) => Err(e),
        }
    }

    /// Whether the agents of an existing workload already run the config
    async fn deploy(ctx: &mut ReconcileContext) -> StoreResult<bool> {
        let config = Self::ensure(ctx).await?;
        let workload = refresh_workload(ctx).await?;
        Ok(workload.map_or(true, |w| w.agents_reached(config.version)))
    }
}

#[async_trait]
impl Action<ReconcileContext> for DeployAutomationConfig {
    async fn run(&self, ctx: &mut ReconcileContext) -> Result<Outcome> {
        let deployed = Self::deploy(ctx).await;

        let ready = match deployed {
            Ok(ready) => ready,
            Err(e) => {
                return Err(
                    fail_with_status(ctx, format!("Error deploying automation config: {e}")).await,
                )
            }
        };

        if !ready {
            let seconds = ctx.pending_seconds();
            return update_status(
                ctx,
                StatusOptions::new()
                    .with_message(
                        MessageSeverity::Info,
                        format!("Agents are not yet ready, retrying in {seconds} seconds"),
                    )
                    .with_pending_phase(seconds),
            )
            .await;
        }
        Ok(Outcome::Requeue)
    }
}

#[async_trait]
impl CompletionCheck<ReconcileContext> for DeployAutomationConfig {
    async fn is_complete(&self, ctx: &ReconcileContext) -> Result<bool> {
        let name = ctx.cluster.resource_name();
        let workload = match ctx.store.get_workload(&name).await {
            Ok(workload) => workload,
            // Nothing is running yet, so there is nobody to wait for
            Err(e) if e.is_not_found() => return Ok(true),
            Err(e) => return Err(anyhow::anyhow!("failed to get workload: {e}")),
        };
        let config = ctx
            .store
            .get_automation_config(&name)
            .await
            .map_err(|e| anyhow::anyhow!("failed to get automation config: {e}"))?;
        Ok(workload.agents_reached(config.version))
    }
}

pub struct DeployWorkload;

impl DeployWorkload {
    fn build(ctx: &ReconcileContext) -> Workload {
        let cluster = &ctx.cluster;
        // Members are restarted one by one by hand while the version changes
        let update_strategy = if cluster.is_changing_version() {
            UpdateStrategy::OnDelete
        } else {
            UpdateStrategy::RollingUpdate
        };
        Workload {
            name: cluster.resource_name(),
            replicas: cluster.members_this_reconciliation(),
            version: cluster.spec.version.clone(),
            tls_secret: cluster
                .spec
                .security
                .tls
                .enabled
                .then(|| cluster.tls_operator_secret_name().name),
            update_strategy,
            status: Default::default(),
        }
    }

    async fn ensure(ctx: &mut ReconcileContext) -> StoreResult<Workload> {
        let desired = Self::build(ctx);
        match ctx.store.create_workload(&desired).await {
            Ok(()) => info!(workload = %desired.name, replicas = desired.replicas, "Created workload"),
            Err(e) if e.is_already_exists() => ctx.store.update_workload(&desired).await?,
            Err(e) => return Err(e),
        }
        let current = ctx.store.get_workload(&desired.name).await?;
        ctx.observed_workload = Some(current.clone());
        Ok(current)
    }
}

#[async_trait]
impl Action<ReconcileContext> for DeployWorkload {
    async fn run(&self, ctx: &mut ReconcileContext) -> Result<Outcome> {
        let workload = match Self::ensure(ctx).await {
            Ok(workload) => workload,
            Err(e) => {
                return Err(fail_with_status(ctx, format!("Error deploying workload: {e}")).await)
            }
        };

        if !workload.is_ready() {
            let seconds = ctx.pending_seconds();
            return update_status(
                ctx,
                StatusOptions::new()
                    .with_message(
                        MessageSeverity::Info,
                        format!("Workload is not yet ready, retrying in {seconds} seconds"),
                    )
                    .with_pending_phase(seconds),
            )
            .await;
        }
        Ok(Outcome::Requeue)
    }
}

#[async_trait]
impl CompletionCheck<ReconcileContext> for DeployWorkload {
    async fn is_complete(&self, ctx: &ReconcileContext) -> Result<bool> {
        let workload = ctx
            .store
            .get_workload(&ctx.cluster.resource_name())
            .await
            .map_err(|e| anyhow::anyhow!("error getting workload: {e}"))?;
        Ok(workload.is_ready() || workload.update_strategy == UpdateStrategy::OnDelete)
    }
}

pub struct ResetUpdateStrategy;

impl ResetUpdateStrategy {
    async fn reset(ctx: &mut ReconcileContext) -> StoreResult<()> {
        let mut workload = ctx.store.get_workload(&ctx.cluster.resource_name()).await?;
        if workload.update_strategy != UpdateStrategy::RollingUpdate {
            workload.update_strategy = UpdateStrategy::RollingUpdate;
            ctx.store.update_workload(&workload).await?;
            info!(workload = %workload.name, "Reset workload update strategy");
        }
        ctx.observed_workload = Some(workload);
        Ok(())
    }
}

#[async_trait]
impl Action<ReconcileContext> for ResetUpdateStrategy {
    async fn run(&self, ctx: &mut ReconcileContext) -> Result<Outcome> {
        if let Err(e) = Self::reset(ctx).await {
            return Err(fail_with_status(
                ctx,
                format!("Error resetting workload update strategy: {e}"),
            )
            .await);
        }
        Ok(Outcome::Requeue)
    }
}

#[async_trait]
impl CompletionCheck<ReconcileContext> for ResetUpdateStrategy {
    async fn is_complete(&self, ctx: &ReconcileContext) -> Result<bool> {
        let workload = ctx.store.get_workload(&ctx.cluster.resource_name()).await?;
        Ok(workload.update_strategy == UpdateStrategy::RollingUpdate)
    }
}

pub struct UpdateStatus;

impl UpdateStatus {
    /// Remembers what was applied so later passes can detect version changes.
    /// Failures here are logged only; the status itself is already published.
    async fn record_applied_configuration(ctx: &mut ReconcileContext) {
        let spec_json = match serde_json::to_string(&ctx.cluster.spec) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "Could not serialize current spec");
                return;
            }
        };

        let mut updated = ctx.cluster.clone();
        updated.metadata.annotations.insert(
            LAST_APPLIED_VERSION_ANNOTATION.to_string(),
            updated.spec.version.clone(),
        );
        updated
            .metadata
            .annotations
            .insert(LAST_SUCCESSFUL_CONFIGURATION_ANNOTATION.to_string(), spec_json);

        match ctx.store.update_cluster(&updated).await {
            Ok(()) => ctx.cluster.metadata = updated.metadata,
            Err(e) => error!(error = %e, "Could not save current spec as an annotation"),
        }
    }
}

#[async_trait]
impl Action<ReconcileContext> for UpdateStatus {
    async fn run(&self, ctx: &mut ReconcileContext) -> Result<Outcome> {
        let members = ctx.cluster.members_this_reconciliation();

        if ctx.cluster.is_still_scaling() {
            let message = format!(
                "Performing scaling operation, currentMembers={}, desiredMembers={}",
                ctx.cluster.current_members(),
                ctx.cluster.desired_members()
            );
            let seconds = ctx.pending_seconds();
            return update_status(
                ctx,
                StatusOptions::new()
                    .with_members(members)
                    .with_workload_replicas(members)
                    .with_message(MessageSeverity::Info, message)
                    .with_pending_phase(seconds),
            )
            .await;
        }

        let options = StatusOptions::new()
            .with_uri(ctx.cluster.connection_uri())
            .with_members(members)
            .with_workload_replicas(members)
            .with_version(ctx.cluster.spec.version.clone())
            .with_message(MessageSeverity::None, "")
            .with_running_phase();
        let outcome = update_status(ctx, options).await.map_err(|e| {
            error!(error = %e, "Error updating the status of the cluster");
            e
        })?;

        Self::record_applied_configuration(ctx).await;
        Ok(outcome)
    }
}

pub struct ReconciliationEnd;

#[async_trait]
impl Action<ReconcileContext> for ReconciliationEnd {
    async fn run(&self, ctx: &mut ReconcileContext) -> Result<Outcome> {
        let mut updated = ctx.cluster.clone();
        updated.metadata.annotations.insert(
            STATE_MACHINE_ANNOTATION.to_string(),
            ProgressRecord::default().to_json()?,
        );
        ctx.store.update_cluster(&updated).await.map_err(|e| {
            error!(error = %e, "Error resetting state machine annotation");
            e
        })?;
        ctx.cluster.metadata = updated.metadata;

        info!(
            cluster = %ctx.cluster.resource_name(),
            status = ?ctx.cluster.status,
            "Successfully finished reconciliation"
        );
        Ok(Outcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::store::{InMemoryResourceStore, ResourceStore};
    use crate::cluster::types::{DbCluster, DbClusterSpec, Phase};
    use std::sync::Arc;
    use std::time::Duration;

    async fn context(store: Arc<InMemoryResourceStore>, tls: bool) -> ReconcileContext {
        let mut cluster = DbCluster::new(
            "db",
            "example",
            DbClusterSpec {
                members: 3,
                version: "6.0.5".to_string(),
                security: Default::default(),
            },
        );
        if tls {
            cluster.spec.security.tls.enabled = true;
            cluster.spec.security.tls.certificate_key_secret = "tls-cert".to_string();
            cluster.spec.security.tls.ca_config_map = "tls-ca".to_string();
        }
        store.put_cluster(cluster.clone()).await;
        ReconcileContext::observe(cluster, store, Duration::from_secs(10))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_service_adopts_existing() {
        let store = Arc::new(InMemoryResourceStore::new());
        let mut ctx = context(store.clone(), false).await;
        assert!(!CreateService.is_complete(&ctx).await.unwrap());

        assert_eq!(CreateService.run(&mut ctx).await.unwrap(), Outcome::Requeue);
        assert_eq!(CreateService.run(&mut ctx).await.unwrap(), Outcome::Requeue);
        assert!(CreateService.is_complete(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_tls_validation_waits_for_certificates() {
        let store = Arc::new(InMemoryResourceStore::new());
        let mut ctx = context(store.clone(), true).await;

        let outcome = TlsValidation.run(&mut ctx).await.unwrap();
        assert_eq!(outcome, Outcome::RequeueAfter(Duration::from_secs(10)));
        assert_eq!(ctx.cluster.status.phase, Phase::Pending);
        assert!(!TlsValidation.is_complete(&ctx).await.unwrap());

        let mut data = BTreeMap::new();
        data.insert("tls.crt".to_string(), "CERT".to_string());
        data.insert("tls.key".to_string(), "KEY".to_string());
        store
            .create_secret(&Secret {
                name: ctx.cluster.tls_certificate_secret_name(),
                data,
            })
            .await
            .unwrap();
        let mut ca = BTreeMap::new();
        ca.insert("ca.crt".to_string(), "CA".to_string());
        store
            .put_config_map(crate::cluster::types::ConfigMap {
                name: ctx.cluster.tls_ca_config_map_name(),
                data: ca,
            })
            .await;

        assert_eq!(TlsValidation.run(&mut ctx).await.unwrap(), Outcome::Requeue);
        assert!(TlsValidation.is_complete(&ctx).await.unwrap());

        CreateTlsResources.run(&mut ctx).await.unwrap();
        let pem = store
            .get_secret(&ctx.cluster.tls_operator_secret_name())
            .await
            .unwrap();
        assert_eq!(pem.data["server.pem"], "CERT\nKEY");
    }

    #[tokio::test]
    async fn test_automation_config_version_only_bumps_on_change() {
        let store = Arc::new(InMemoryResourceStore::new());
        let mut ctx = context(store.clone(), false).await;
        let name = ctx.cluster.resource_name();

        DeployAutomationConfig.run(&mut ctx).await.unwrap();
        DeployAutomationConfig.run(&mut ctx).await.unwrap();
        assert_eq!(store.get_automation_config(&name).await.unwrap().version, 1);

        ctx.cluster.spec.version = "6.0.6".to_string();
        DeployAutomationConfig.run(&mut ctx).await.unwrap();
        let config = store.get_automation_config(&name).await.unwrap();
        assert_eq!(config.version, 2);
        assert_eq!(config.members.len(), 3);
    }

    #[tokio::test]
    async fn test_deploy_workload_pending_until_ready() {
        let store = Arc::new(InMemoryResourceStore::new());
        let mut ctx = context(store.clone(), false).await;

        let outcome = DeployWorkload.run(&mut ctx).await.unwrap();
        assert_eq!(outcome, Outcome::RequeueAfter(Duration::from_secs(10)));
        assert!(ctx.observed_workload.is_some());
        assert!(!DeployWorkload.is_complete(&ctx).await.unwrap());

        store.mark_workload_ready(&ctx.cluster.resource_name()).await;
        assert!(DeployWorkload.is_complete(&ctx).await.unwrap());
        assert_eq!(DeployWorkload.run(&mut ctx).await.unwrap(), Outcome::Requeue);
    }

    #[tokio::test]
    async fn test_validate_spec_records_failure() {
        let store = Arc::new(InMemoryResourceStore::new());
        let mut ctx = context(store.clone(), false).await;
        ctx.cluster.spec.members = 0;

        let err = ValidateSpec.run(&mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("error validating new spec"));
        let stored = store.get_cluster(&ctx.cluster.resource_name()).await.unwrap();
        assert_eq!(stored.status.phase, Phase::Failed);
    }

    #[tokio::test]
    async fn test_reconciliation_end_resets_progress() {
        let store = Arc::new(InMemoryResourceStore::new());
        let mut ctx = context(store.clone(), false).await;

        assert_eq!(ReconciliationEnd.run(&mut ctx).await.unwrap(), Outcome::Done);
        let stored = store.get_cluster(&ctx.cluster.resource_name()).await.unwrap();
        let record =
            ProgressRecord::from_json(&stored.metadata.annotations[STATE_MACHINE_ANNOTATION])
                .unwrap();
        assert_eq!(record.resume_point(), None);
    }
}
