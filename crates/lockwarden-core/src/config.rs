//! Engine configuration
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration. Intervals are stored in seconds and exposed as
//! [`Duration`]s.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Placeholder replaced with the inferred app name
pub const APP_PLACEHOLDER: &str = "{app}";
/// Placeholder replaced with the inferred object name
pub const OBJECT_PLACEHOLDER: &str = "{object}";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Revisit interval after a successful pass
    pub requeue_interval_secs: u64,
    /// Retry delay after a failed pass
    pub error_retry_secs: u64,
    /// Revisit interval for disabled monitors
    pub paused_requeue_secs: u64,
    /// Revisit interval for terminal unlock requests
    pub terminal_revisit_secs: u64,
    /// Maximum processed-job ledger length
    pub ledger_cap: usize,
    /// Admission ceiling when a monitor configures 0
    pub default_max_concurrent_unlocks: u32,
    /// Job name prefix when a monitor's selector names none
    pub default_name_prefix: String,
    /// Prefix of created remediation job names
    pub unlock_job_prefix: String,
    /// Repository tool invoked by the default command
    pub unlock_tool: String,
    /// Volume name reused from the failed job
    pub repository_volume_name: String,
    /// Mount path used when the reused volume has no mount
    pub repository_mount_path: String,
    /// Domain prefix of correlation labels, annotations and the finalizer
    pub label_domain: String,
    /// Image used when a template names none
    pub default_unlock_image: String,
    /// TTL of unlock request jobs without an explicit TTL
    pub unlock_request_ttl_secs: i32,
    /// Backoff limit of remediation jobs
    pub backoff_limit: i32,
    /// Extra pass attempts after a status conflict
    pub max_conflict_retries: u32,
    /// Ordered secret name candidates; `{app}` and `{object}` are substituted
    pub credential_secret_patterns: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            requeue_interval_secs: 30,
            error_retry_secs: 30,
            paused_requeue_secs: 300,
            terminal_revisit_secs: 300,
            ledger_cap: 50,
            default_max_concurrent_unlocks: 3,
            default_name_prefix: "volsync-".to_string(),
            unlock_job_prefix: "volsync-unlock".to_string(),
            unlock_tool: "restic".to_string(),
            repository_volume_name: "repository".to_string(),
            repository_mount_path: "/repository".to_string(),
            label_domain: "lockwarden.dev".to_string(),
            default_unlock_image: "restic/restic:0.17.3".to_string(),
            unlock_request_ttl_secs: 300,
            backoff_limit: 3,
            max_conflict_retries: 3,
            credential_secret_patterns: vec![
                "{app}-backup-nfs".to_string(),
                "{app}-repo-secret".to_string(),
                "{app}-backup".to_string(),
                "{object}-secret".to_string(),
            ],
        }
    }
}

impl EngineConfig {
    /// Parse from a TOML document and validate
    ///
    /// # Errors
    /// - `ConfigError::Parse` on malformed TOML or unknown value types
    /// - `ConfigError::Invalid` if validation fails
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// - `ConfigError::Read` if the file cannot be read
    /// - see [`EngineConfig::from_toml_str`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&source)
    }

    /// Validate configuration
    ///
    /// # Errors
    /// - `ConfigError::Invalid` naming the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger_cap == 0 {
            return Err(ConfigError::Invalid("ledger_cap must be positive".to_string()));
        }
        if self.default_max_concurrent_unlocks == 0 {
            return Err(ConfigError::Invalid(
                "default_max_concurrent_unlocks must be positive".to_string(),
            ));
        }
        if self.label_domain.trim().is_empty() {
            return Err(ConfigError::Invalid("label_domain must not be empty".to_string()));
        }
        if let Some(pattern) = self
            .credential_secret_patterns
            .iter()
            .find(|p| !p.contains(APP_PLACEHOLDER) && !p.contains(OBJECT_PLACEHOLDER))
        {
            return Err(ConfigError::Invalid(format!(
                "credential secret pattern '{pattern}' has no {APP_PLACEHOLDER} or {OBJECT_PLACEHOLDER} placeholder"
            )));
        }
        Ok(())
    }

    /// With requeue interval
    #[inline]
    #[must_use]
    pub fn with_requeue_interval(mut self, secs: u64) -> Self {
        self.requeue_interval_secs = secs;
        self
    }

    /// With error retry delay
    #[inline]
    #[must_use]
    pub fn with_error_retry(mut self, secs: u64) -> Self {
        self.error_retry_secs = secs;
        self
    }

    /// With ledger cap
    #[inline]
    #[must_use]
    pub fn with_ledger_cap(mut self, cap: usize) -> Self {
        self.ledger_cap = cap;
        self
    }

    /// With default admission ceiling
    #[inline]
    #[must_use]
    pub fn with_default_max_concurrent_unlocks(mut self, max: u32) -> Self {
        self.default_max_concurrent_unlocks = max;
        self
    }

    /// With label domain
    #[inline]
    #[must_use]
    pub fn with_label_domain(mut self, domain: impl Into<String>) -> Self {
        self.label_domain = domain.into();
        self
    }

    /// With default unlock image
    #[inline]
    #[must_use]
    pub fn with_default_unlock_image(mut self, image: impl Into<String>) -> Self {
        self.default_unlock_image = image.into();
        self
    }

    /// With conflict retry budget
    #[inline]
    #[must_use]
    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// With credential secret name patterns
    #[inline]
    #[must_use]
    pub fn with_credential_secret_patterns(mut self, patterns: Vec<String>) -> Self {
        self.credential_secret_patterns = patterns;
        self
    }

    #[inline]
    #[must_use]
    pub fn requeue_interval(&self) -> Duration {
        Duration::from_secs(self.requeue_interval_secs)
    }

    #[inline]
    #[must_use]
    pub fn error_retry(&self) -> Duration {
        Duration::from_secs(self.error_retry_secs)
    }

    #[inline]
    #[must_use]
    pub fn paused_requeue(&self) -> Duration {
        Duration::from_secs(self.paused_requeue_secs)
    }

    #[inline]
    #[must_use]
    pub fn terminal_revisit(&self) -> Duration {
        Duration::from_secs(self.terminal_revisit_secs)
    }

    /// `<domain>/<name>` label, annotation or finalizer key
    #[must_use]
    pub fn domain_key(&self, name: &str) -> String {
        format!("{}/{}", self.label_domain, name)
    }

    /// Finalizer placed on monitors and unlock requests
    #[must_use]
    pub fn finalizer(&self) -> String {
        self.domain_key("finalizer")
    }
}
