use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::state::{FixedPacing, NoPacing, Pacer, RateLimitedPacing};

/// Main configuration structure for the reconciler
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReconcilerConfig {
    /// Delays around progress persistence
    #[serde(default)]
    pub pacing: PacingConfig,
    /// Workflow behaviour
    #[serde(default)]
    pub workflow: WorkflowConfig,
    /// Logging settings
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PacingConfig {
    /// Sleep before writing the resume point
    #[serde(default)]
    pub before_persist_ms: u64,
    /// Sleep after writing the resume point
    #[serde(default)]
    pub after_persist_ms: u64,
    /// Process-wide cap on resume point writes. Takes precedence over the
    /// fixed delays when set.
    #[serde(default)]
    pub max_writes_per_minute: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WorkflowConfig {
    /// Requeue delay while waiting for workloads, agents or TLS objects
    pub pending_requeue_seconds: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            pending_requeue_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Default filter directive when RUST_LOG is unset
    pub log_level: String,
    /// Emit JSON lines instead of human readable output
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
        }
    }
}

/// Pacing strategy selected by a [`PacingConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingPolicy {
    None,
    Fixed { before: Duration, after: Duration },
    RateLimited(NonZeroU32),
}

impl PacingConfig {
    /// A write cap wins over fixed delays. Zero delays mean no pacing.
    pub fn policy(&self) -> PacingPolicy {
        if let Some(writes) = self.max_writes_per_minute.and_then(NonZeroU32::new) {
            return PacingPolicy::RateLimited(writes);
        }
        if self.before_persist_ms == 0 && self.after_persist_ms == 0 {
            return PacingPolicy::None;
        }
        PacingPolicy::Fixed {
            before: Duration::from_millis(self.before_persist_ms),
            after: Duration::from_millis(self.after_persist_ms),
        }
    }

    /// Builds the pacer described by this section
    pub fn pacer(&self) -> Arc<dyn Pacer> {
        match self.policy() {
            PacingPolicy::None => Arc::new(NoPacing),
            PacingPolicy::Fixed { before, after } => Arc::new(FixedPacing::new(before, after)),
            PacingPolicy::RateLimited(writes) => Arc::new(RateLimitedPacing::per_minute(writes)),
        }
    }
}

impl WorkflowConfig {
    pub fn pending_requeue(&self) -> Duration {
        Duration::from_secs(self.pending_requeue_seconds)
    }
}

impl ReconcilerConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (replica-reconciler.toml)
    /// 3. Environment variables (RECONCILER__SECTION__KEY)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("replica-reconciler.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if path.exists() {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("RECONCILER")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<ReconcilerConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        let _ = ReconcilerConfig::load_env_file();
        ReconcilerConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static ReconcilerConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}
