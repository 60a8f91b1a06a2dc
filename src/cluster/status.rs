use anyhow::anyhow;
use chrono::Utc;
use tracing::{error, info};

use super::context::ReconcileContext;
use super::types::{DbClusterStatus, Phase};
use crate::state::Outcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Error,
    Info,
    /// Clears the message
    None,
}

/// Builder for a status write. Each phase carries the outcome the calling
/// action should hand back to the scheduler.
#[derive(Debug, Clone)]
pub struct StatusOptions {
    phase: Option<Phase>,
    message: Option<(MessageSeverity, String)>,
    members: Option<u32>,
    workload_replicas: Option<u32>,
    uri: Option<String>,
    version: Option<String>,
    outcome: Outcome,
}

impl Default for StatusOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusOptions {
    pub fn new() -> Self {
        Self {
            phase: None,
            message: None,
            members: None,
            workload_replicas: None,
            uri: None,
            version: None,
            outcome: Outcome::Requeue,
        }
    }

    pub fn with_message(mut self, severity: MessageSeverity, message: impl Into<String>) -> Self {
        self.message = Some((severity, message.into()));
        self
    }

    pub fn with_members(mut self, members: u32) -> Self {
        self.members = Some(members);
        self
    }

    pub fn with_workload_replicas(mut self, replicas: u32) -> Self {
        self.workload_replicas = Some(replicas);
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_running_phase(mut self) -> Self {
        self.phase = Some(Phase::Running);
        self.outcome = Outcome::Requeue;
        self
    }

    pub fn with_pending_phase(mut self, retry_after_seconds: u64) -> Self {
        self.phase = Some(Phase::Pending);
        self.outcome = Outcome::retry(retry_after_seconds);
        self
    }

    pub fn with_failed_phase(mut self) -> Self {
        self.phase = Some(Phase::Failed);
        self.outcome = Outcome::Requeue;
        self
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn apply(&self, status: &mut DbClusterStatus) {
        if let Some(phase) = self.phase {
            status.phase = phase;
        }
        if let Some((severity, message)) = &self.message {
            status.message = match severity {
                MessageSeverity::None => String::new(),
                _ => message.clone(),
            };
        }
        if let Some(members) = self.members {
            status.current_members = members;
        }
        if let Some(replicas) = self.workload_replicas {
            status.current_workload_replicas = replicas;
        }
        if let Some(uri) = &self.uri {
            status.uri = uri.clone();
        }
        if let Some(version) = &self.version {
            status.version = version.clone();
        }
        status.last_updated = Some(Utc::now());
    }
}

/// Writes the status to the store and to the context snapshot, returning
/// the outcome that goes with the requested phase.
pub async fn update_status(
    ctx: &mut ReconcileContext,
    options: StatusOptions,
) -> anyhow::Result<Outcome> {
    if let Some((severity, message)) = &options.message {
        let cluster = ctx.cluster.resource_name();
        match severity {
            MessageSeverity::Error => error!(cluster = %cluster, "{}", message),
            MessageSeverity::Info => info!(cluster = %cluster, "{}", message),
            MessageSeverity::None => {}
        }
    }

    let mut updated = ctx.cluster.clone();
    options.apply(&mut updated.status);
    ctx.store.update_cluster_status(&updated).await?;
    ctx.cluster.status = updated.status;
    Ok(options.outcome())
}

/// Records a `Failed` status and returns the error the action should fail
/// with. A failing status write is logged; the action's failure still wins.
pub async fn fail_with_status(ctx: &mut ReconcileContext, message: String) -> anyhow::Error {
    let options = StatusOptions::new()
        .with_message(MessageSeverity::Error, message.clone())
        .with_failed_phase();
    if let Err(e) = update_status(ctx, options).await {
        error!(error = %e, "Could not record failed status");
    }
    anyhow!(message)
}
