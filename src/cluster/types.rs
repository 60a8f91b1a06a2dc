use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Annotation holding the serialized progress record
pub const STATE_MACHINE_ANNOTATION: &str = "dbcluster.io/v1.stateMachine";
/// Database version of the last fully reconciled spec
pub const LAST_APPLIED_VERSION_ANNOTATION: &str = "dbcluster.io/v1.lastAppliedVersion";
/// JSON of the last fully reconciled spec
pub const LAST_SUCCESSFUL_CONFIGURATION_ANNOTATION: &str =
    "dbcluster.io/v1.lastSuccessfulConfiguration";

pub const DATABASE_PORT: u16 = 27017;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceName {
    pub namespace: String,
    pub name: String,
}

impl ResourceName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// The managed resource: a replicated database cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbCluster {
    pub metadata: ObjectMeta,
    pub spec: DbClusterSpec,
    #[serde(default)]
    pub status: DbClusterStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbClusterSpec {
    /// Desired number of replica set members
    pub members: u32,
    /// Database version, `X.Y.Z`
    pub version: String,
    #[serde(default)]
    pub security: SecuritySpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuritySpec {
    #[serde(default)]
    pub tls: TlsSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsSpec {
    pub enabled: bool,
    /// Secret holding `tls.crt` and `tls.key`
    #[serde(default)]
    pub certificate_key_secret: String,
    /// Config map holding `ca.crt`
    #[serde(default)]
    pub ca_config_map: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Pending,
    Running,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbClusterStatus {
    pub phase: Phase,
    #[serde(default)]
    pub message: String,
    /// Members currently part of the replica set configuration
    #[serde(default)]
    pub current_members: u32,
    /// Replicas currently requested from the workload
    #[serde(default)]
    pub current_workload_replicas: u32,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl DbCluster {
    pub fn new(namespace: &str, name: &str, spec: DbClusterSpec) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: namespace.to_string(),
                annotations: BTreeMap::new(),
            },
            spec,
            status: DbClusterStatus::default(),
        }
    }

    pub fn resource_name(&self) -> ResourceName {
        ResourceName::new(&self.metadata.namespace, &self.metadata.name)
    }

    pub fn service_name(&self) -> ResourceName {
        ResourceName::new(
            &self.metadata.namespace,
            format!("{}-svc", self.metadata.name),
        )
    }

    /// Secret the operator maintains with the concatenated certificate PEM
    pub fn tls_operator_secret_name(&self) -> ResourceName {
        ResourceName::new(
            &self.metadata.namespace,
            format!("{}-server-certificate-key", self.metadata.name),
        )
    }

    pub fn tls_certificate_secret_name(&self) -> ResourceName {
        ResourceName::new(
            &self.metadata.namespace,
            &self.spec.security.tls.certificate_key_secret,
        )
    }

    pub fn tls_ca_config_map_name(&self) -> ResourceName {
        ResourceName::new(&self.metadata.namespace, &self.spec.security.tls.ca_config_map)
    }

    pub fn desired_members(&self) -> u32 {
        self.spec.members
    }

    pub fn current_members(&self) -> u32 {
        self.status.current_members
    }

    /// Member count to aim for in this pass. Scaling moves one member at a
    /// time; a cluster that has never been deployed goes straight to the
    /// desired count.
    pub fn members_this_reconciliation(&self) -> u32 {
        next_member_count(self.current_members(), self.desired_members())
    }

    pub fn is_still_scaling(&self) -> bool {
        self.members_this_reconciliation() != self.desired_members()
    }

    pub fn is_scaling_down(&self) -> bool {
        self.current_members() > self.desired_members()
    }

    pub fn last_applied_version(&self) -> Option<&str> {
        self.metadata
            .annotations
            .get(LAST_APPLIED_VERSION_ANNOTATION)
            .map(String::as_str)
    }

    /// A version change is in flight when the desired version differs from
    /// the one last applied successfully.
    pub fn is_changing_version(&self) -> bool {
        self.last_applied_version()
            .is_some_and(|last| last != self.spec.version)
    }

    pub fn connection_uri(&self) -> String {
        let service = self.service_name();
        let hosts: Vec<String> = (0..self.spec.members)
            .map(|i| {
                format!(
                    "{}-{}.{}.{}.svc.cluster.local:{}",
                    self.metadata.name, i, service.name, service.namespace, DATABASE_PORT
                )
            })
            .collect();
        format!("dbcluster://{}", hosts.join(","))
    }
}

/// One scaling step from `current` towards `desired`
pub fn next_member_count(current: u32, desired: u32) -> u32 {
    if current == 0 || current == desired {
        desired
    } else if current < desired {
        current + 1
    } else {
        current - 1
    }
}

/// Headless network endpoint in front of the members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: ResourceName,
    pub port: u16,
    pub selector: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateStrategy {
    #[default]
    RollingUpdate,
    OnDelete,
}

/// The replicated workload running the database members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub name: ResourceName,
    pub replicas: u32,
    pub version: String,
    pub tls_secret: Option<String>,
    pub update_strategy: UpdateStrategy,
    #[serde(default)]
    pub status: WorkloadStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadStatus {
    pub ready_replicas: u32,
    /// Automation config version every member agent has reached
    pub agents_goal_version: u64,
}

impl Workload {
    pub fn is_ready(&self) -> bool {
        self.status.ready_replicas == self.replicas
    }

    pub fn agents_reached(&self, config_version: u64) -> bool {
        self.is_ready() && self.status.agents_goal_version >= config_version
    }
}

/// Configuration consumed by the agents running next to each member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationConfig {
    pub name: ResourceName,
    pub version: u64,
    pub members: Vec<String>,
    pub database_version: String,
    pub tls_enabled: bool,
}

impl AutomationConfig {
    /// True when both configs would make the agents do the same thing
    pub fn same_content(&self, other: &AutomationConfig) -> bool {
        self.members == other.members
            && self.database_version == other.database_version
            && self.tls_enabled == other.tls_enabled
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub name: ResourceName,
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMap {
    pub name: ResourceName,
    pub data: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(members: u32, current: u32) -> DbCluster {
        let mut cluster = DbCluster::new(
            "db",
            "example",
            DbClusterSpec {
                members,
                version: "6.0.5".to_string(),
                security: SecuritySpec::default(),
            },
        );
        cluster.status.current_members = current;
        cluster
    }

    #[test]
    fn test_members_this_reconciliation_moves_one_step() {
        assert_eq!(cluster(3, 0).members_this_reconciliation(), 3);
        assert_eq!(cluster(3, 3).members_this_reconciliation(), 3);
        assert_eq!(cluster(5, 3).members_this_reconciliation(), 4);
        assert_eq!(cluster(1, 3).members_this_reconciliation(), 2);
    }

    #[test]
    fn test_scaling_predicates() {
        assert!(!cluster(3, 0).is_still_scaling());
        assert!(!cluster(4, 3).is_still_scaling());
        assert!(cluster(5, 3).is_still_scaling());
        assert!(cluster(1, 3).is_scaling_down());
        assert!(!cluster(5, 3).is_scaling_down());
    }

    #[test]
    fn test_is_changing_version() {
        let mut c = cluster(3, 3);
        assert!(!c.is_changing_version());

        c.metadata
            .annotations
            .insert(LAST_APPLIED_VERSION_ANNOTATION.to_string(), "6.0.5".to_string());
        assert!(!c.is_changing_version());

        c.spec.version = "7.0.2".to_string();
        assert!(c.is_changing_version());
    }

    #[test]
    fn test_connection_uri_lists_every_member() {
        let uri = cluster(2, 2).connection_uri();
        assert_eq!(
            uri,
            "dbcluster://example-0.example-svc.db.svc.cluster.local:27017,example-1.example-svc.db.svc.cluster.local:27017"
        );
    }
}
