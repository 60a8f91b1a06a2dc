use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

use super::types::DbCluster;

/// Replica sets cannot have more voting-capable members than this
pub const MAX_MEMBERS: u32 = 50;

static DNS_1123_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid regex"));

static VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("valid regex"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("name {0:?} is not a valid DNS-1123 label")]
    InvalidName(String),

    #[error("members must be between 1 and 50, got {0}")]
    InvalidMembers(u32),

    #[error("version {0:?} is not of the form X.Y.Z")]
    InvalidVersion(String),

    #[error("TLS is enabled but {0} is not set")]
    MissingTlsReference(&'static str),
}

pub fn validate_spec(cluster: &DbCluster) -> Result<(), ValidationError> {
    let name = &cluster.metadata.name;
    // Member hostnames append "-<index>" to the name
    if name.len() > 60 || !DNS_1123_LABEL.is_match(name) {
        return Err(ValidationError::InvalidName(name.clone()));
    }

    let members = cluster.spec.members;
    if members == 0 || members > MAX_MEMBERS {
        return Err(ValidationError::InvalidMembers(members));
    }

    if !VERSION.is_match(&cluster.spec.version) {
        return Err(ValidationError::InvalidVersion(cluster.spec.version.clone()));
    }

    let tls = &cluster.spec.security.tls;
    if tls.enabled {
        if tls.certificate_key_secret.is_empty() {
            return Err(ValidationError::MissingTlsReference("certificate_key_secret"));
        }
        if tls.ca_config_map.is_empty() {
            return Err(ValidationError::MissingTlsReference("ca_config_map"));
        }
    }

    Ok(())
}
