// Declarative resource store
// Concrete states talk to the outside world only through ResourceStore. Its
// error type keeps "not found" and "already exists" distinguishable so states
// can implement create-or-adopt semantics.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

use super::types::{
    AutomationConfig, ConfigMap, DbCluster, ResourceName, Secret, Service, Workload,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: ResourceName },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: ResourceName },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Create/get/update access to the managed resource and the objects it owns
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_cluster(&self, name: &ResourceName) -> StoreResult<DbCluster>;
    /// Writes metadata and spec; the stored status is left alone
    async fn update_cluster(&self, cluster: &DbCluster) -> StoreResult<()>;
    /// Writes the status only
    async fn update_cluster_status(&self, cluster: &DbCluster) -> StoreResult<()>;

    async fn get_service(&self, name: &ResourceName) -> StoreResult<Service>;
    async fn create_service(&self, service: &Service) -> StoreResult<()>;

    async fn get_workload(&self, name: &ResourceName) -> StoreResult<Workload>;
    async fn create_workload(&self, workload: &Workload) -> StoreResult<()>;
    /// Writes the workload spec; the stored status is left alone
    async fn update_workload(&self, workload: &Workload) -> StoreResult<()>;

    async fn get_automation_config(&self, name: &ResourceName) -> StoreResult<AutomationConfig>;
    async fn create_automation_config(&self, config: &AutomationConfig) -> StoreResult<()>;
    async fn update_automation_config(&self, config: &AutomationConfig) -> StoreResult<()>;

    async fn get_secret(&self, name: &ResourceName) -> StoreResult<Secret>;
    async fn create_secret(&self, secret: &Secret) -> StoreResult<()>;
    async fn update_secret(&self, secret: &Secret) -> StoreResult<()>;

    async fn get_config_map(&self, name: &ResourceName) -> StoreResult<ConfigMap>;
}

#[derive(Debug, Default)]
struct Objects {
    clusters: HashMap<ResourceName, DbCluster>,
    services: HashMap<ResourceName, Service>,
    workloads: HashMap<ResourceName, Workload>,
    automation_configs: HashMap<ResourceName, AutomationConfig>,
    secrets: HashMap<ResourceName, Secret>,
    config_maps: HashMap<ResourceName, ConfigMap>,
}

impl Objects {
    // With instant rollout every workload immediately reports all replicas
    // ready and every agent at the latest automation config version.
    fn settle_workload(&mut self, name: &ResourceName) {
        let goal = self
            .automation_configs
            .get(name)
            .map(|config| config.version)
            .unwrap_or_default();
        if let Some(workload) = self.workloads.get_mut(name) {
            workload.status.ready_replicas = workload.replicas;
            workload.status.agents_goal_version = goal;
        }
    }
}

/// In-memory store for tests and local experiments.
///
/// Nothing rolls workloads out on its own unless instant rollout is enabled;
/// otherwise tests drive readiness with [`InMemoryResourceStore::mark_workload_ready`].
#[derive(Debug, Default)]
pub struct InMemoryResourceStore {
    objects: RwLock<Objects>,
    instant_rollout: bool,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instant_rollout() -> Self {
        Self {
            objects: RwLock::new(Objects::default()),
            instant_rollout: true,
        }
    }

    /// Inserts or replaces a cluster, status included
    pub async fn put_cluster(&self, cluster: DbCluster) {
        self.objects
            .write()
            .await
            .clusters
            .insert(cluster.resource_name(), cluster);
    }

    pub async fn put_config_map(&self, config_map: ConfigMap) {
        self.objects
            .write()
            .await
            .config_maps
            .insert(config_map.name.clone(), config_map);
    }

    /// Simulates the workload controller and agents catching up
    pub async fn mark_workload_ready(&self, name: &ResourceName) {
        self.objects.write().await.settle_workload(name);
    }
}

fn not_found(kind: &'static str, name: &ResourceName) -> StoreError {
    StoreError::NotFound {
        kind,
        name: name.clone(),
    }
}

fn already_exists(kind: &'static str, name: &ResourceName) -> StoreError {
    StoreError::AlreadyExists {
        kind,
        name: name.clone(),
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn get_cluster(&self, name: &ResourceName) -> StoreResult<DbCluster> {
        self.objects
            .read()
            .await
            .clusters
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("cluster", name))
    }

    async fn update_cluster(&self, cluster: &DbCluster) -> StoreResult<()> {
        let name = cluster.resource_name();
        let mut objects = self.objects.write().await;
        let stored = objects
            .clusters
            .get_mut(&name)
            .ok_or_else(|| not_found("cluster", &name))?;
        stored.metadata = cluster.metadata.clone();
        stored.spec = cluster.spec.clone();
        Ok(())
    }

    async fn update_cluster_status(&self, cluster: &DbCluster) -> StoreResult<()> {
        let name = cluster.resource_name();
        let mut objects = self.objects.write().await;
        let stored = objects
            .clusters
            .get_mut(&name)
            .ok_or_else(|| not_found("cluster", &name))?;
        stored.status = cluster.status.clone();
        Ok(())
    }

    async fn get_service(&self, name: &ResourceName) -> StoreResult<Service> {
        self.objects
            .read()
            .await
            .services
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("service", name))
    }

    async fn create_service(&self, service: &Service) -> StoreResult<()> {
        let mut objects = self.objects.write().await;
        if objects.services.contains_key(&service.name) {
            return Err(already_exists("service", &service.name));
        }
        objects.services.insert(service.name.clone(), service.clone());
        Ok(())
    }

    async fn get_workload(&self, name: &ResourceName) -> StoreResult<Workload> {
        self.objects
            .read()
            .await
            .workloads
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("workload", name))
    }

    async fn create_workload(&self, workload: &Workload) -> StoreResult<()> {
        let mut objects = self.objects.write().await;
        if objects.workloads.contains_key(&workload.name) {
            return Err(already_exists("workload", &workload.name));
        }
        let mut created = workload.clone();
        created.status = Default::default();
        objects.workloads.insert(workload.name.clone(), created);
        if self.instant_rollout {
            objects.settle_workload(&workload.name);
        }
        Ok(())
    }

    async fn update_workload(&self, workload: &Workload) -> StoreResult<()> {
        let mut objects = self.objects.write().await;
        let stored = objects
            .workloads
            .get_mut(&workload.name)
            .ok_or_else(|| not_found("workload", &workload.name))?;
        let status = stored.status.clone();
        *stored = workload.clone();
        stored.status = status;
        if self.instant_rollout {
            objects.settle_workload(&workload.name);
        }
        Ok(())
    }

    async fn get_automation_config(&self, name: &ResourceName) -> StoreResult<AutomationConfig> {
        self.objects
            .read()
            .await
            .automation_configs
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("automation config", name))
    }

    async fn create_automation_config(&self, config: &AutomationConfig) -> StoreResult<()> {
        let mut objects = self.objects.write().await;
        if objects.automation_configs.contains_key(&config.name) {
            return Err(already_exists("automation config", &config.name));
        }
        objects
            .automation_configs
            .insert(config.name.clone(), config.clone());
        if self.instant_rollout {
            objects.settle_workload(&config.name);
        }
        Ok(())
    }

    async fn update_automation_config(&self, config: &AutomationConfig) -> StoreResult<()> {
        let mut objects = self.objects.write().await;
        if !objects.automation_configs.contains_key(&config.name) {
            return Err(not_found("automation config", &config.name));
        }
        objects
            .automation_configs
            .insert(config.name.clone(), config.clone());
        if self.instant_rollout {
            objects.settle_workload(&config.name);
        }
        Ok(())
    }

    async fn get_secret(&self, name: &ResourceName) -> StoreResult<Secret> {
        self.objects
            .read()
            .await
            .secrets
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("secret", name))
    }

    async fn create_secret(&self, secret: &Secret) -> StoreResult<()> {
        let mut objects = self.objects.write().await;
        if objects.secrets.contains_key(&secret.name) {
            return Err(already_exists("secret", &secret.name));
        }
        objects.secrets.insert(secret.name.clone(), secret.clone());
        Ok(())
    }

    async fn update_secret(&self, secret: &Secret) -> StoreResult<()> {
        let mut objects = self.objects.write().await;
        if !objects.secrets.contains_key(&secret.name) {
            return Err(not_found("secret", &secret.name));
        }
        objects.secrets.insert(secret.name.clone(), secret.clone());
        Ok(())
    }

    async fn get_config_map(&self, name: &ResourceName) -> StoreResult<ConfigMap> {
        self.objects
            .read()
            .await
            .config_maps
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("config map", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::types::{DbClusterSpec, UpdateStrategy};

    fn workload(replicas: u32) -> Workload {
        Workload {
            name: ResourceName::new("db", "example"),
            replicas,
            version: "6.0.5".to_string(),
            tls_secret: None,
            update_strategy: UpdateStrategy::RollingUpdate,
            status: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_create_twice_reports_already_exists() {
        let store = InMemoryResourceStore::new();
        store.create_workload(&workload(3)).await.unwrap();

        let err = store.create_workload(&workload(3)).await.unwrap_err();
        assert!(err.is_already_exists());
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn test_missing_objects_report_not_found() {
        let store = InMemoryResourceStore::new();
        let name = ResourceName::new("db", "missing");

        assert!(store.get_service(&name).await.unwrap_err().is_not_found());
        assert!(store.update_workload(&workload(1)).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_workload_update_preserves_status() {
        let store = InMemoryResourceStore::new();
        let name = ResourceName::new("db", "example");
        store.create_workload(&workload(3)).await.unwrap();
        store.mark_workload_ready(&name).await;

        store.update_workload(&workload(4)).await.unwrap();
        let stored = store.get_workload(&name).await.unwrap();
        assert_eq!(stored.replicas, 4);
        assert_eq!(stored.status.ready_replicas, 3);
        assert!(!stored.is_ready());
    }

    #[tokio::test]
    async fn test_cluster_status_and_spec_are_written_separately() {
        let store = InMemoryResourceStore::new();
        let mut cluster = DbCluster::new(
            "db",
            "example",
            DbClusterSpec {
                members: 3,
                version: "6.0.5".to_string(),
                security: Default::default(),
            },
        );
        store.put_cluster(cluster.clone()).await;

        cluster.status.message = "hello".to_string();
        cluster.spec.members = 5;
        store.update_cluster_status(&cluster).await.unwrap();

        let stored = store.get_cluster(&cluster.resource_name()).await.unwrap();
        assert_eq!(stored.status.message, "hello");
        assert_eq!(stored.spec.members, 3);
    }
}
