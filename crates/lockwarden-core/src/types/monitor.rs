//! `Monitor` policy resource
//!
//! The spec holds the remediation policy; the status is the durable ledger
//! the engine read-modify-writes once per pass.

use crate::types::meta::ObjectMeta;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

fn enabled_by_default() -> bool {
    true
}

/// Remediation policy and its observed state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Monitor {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: MonitorSpec,
    #[serde(default)]
    pub status: MonitorStatus,
}

impl Monitor {
    /// Create a monitor with the default policy
    #[inline]
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            ..Self::default()
        }
    }

    /// With spec
    #[inline]
    #[must_use]
    pub fn with_spec(mut self, spec: MonitorSpec) -> Self {
        self.spec = spec;
        self
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    #[inline]
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }
}

/// Remediation policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSpec {
    /// When false the engine neither scans nor remediates
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Ceiling on active remediations; 0 applies the default ceiling
    #[serde(default)]
    pub max_concurrent_unlocks: i32,
    /// Case-insensitive regexes; empty applies the built-in set
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lock_error_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_selector: Option<JobSelector>,
    #[serde(default)]
    pub unlock_job_template: UnlockJobTemplate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<i32>,
    /// Delete the triggering failed job once its remediation job exists
    #[serde(default)]
    pub remove_failed_jobs: bool,
    /// Remove every lock instead of only stale ones
    #[serde(default)]
    pub force_unlock: bool,
}

impl Default for MonitorSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_unlocks: 0,
            lock_error_patterns: Vec::new(),
            job_selector: None,
            unlock_job_template: UnlockJobTemplate::default(),
            ttl_seconds_after_finished: None,
            remove_failed_jobs: false,
            force_unlock: false,
        }
    }
}

/// Which jobs the scanner considers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobSelector {
    /// Explicit namespace scope; empty means every visible namespace
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub namespaces: BTreeSet<String>,
    /// Required job name prefix; empty applies the configured default
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name_prefix: String,
    /// Exact-match label requirements
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label_selector: BTreeMap<String, String>,
}

/// Overridable defaults for the remediation job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnlockJobTemplate {
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContextTemplate>,
}

/// Unvalidated requests and limits as written by the operator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplate {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecurityContextTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_user: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_group: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_group: Option<i64>,
}

/// Lifecycle phase of a monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum MonitorPhase {
    /// Steady state, scanning
    Active,
    /// Disabled; status still observable
    Paused,
    /// Last pass failed; retried on schedule
    Error,
}

impl MonitorPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Paused => "Paused",
            Self::Error => "Error",
        }
    }
}

/// Durable ledger of remediation activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<MonitorPhase>,
    /// In-flight remediations, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub active_unlocks: Vec<ActiveUnlock>,
    /// Bounded remediation history, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processed_jobs: Vec<ProcessedJob>,
    #[serde(default)]
    pub total_unlocks_created: i64,
    #[serde(default)]
    pub total_unlocks_succeeded: i64,
    #[serde(default)]
    pub total_unlocks_failed: i64,
    #[serde(default)]
    pub total_lock_errors_detected: i64,
    #[serde(default)]
    pub total_failed_jobs_removed: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_unlock_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub observed_generation: i64,
}

/// One in-flight remediation job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUnlock {
    pub app_name: String,
    pub namespace: String,
    pub object_name: String,
    pub job_name: String,
    pub start_time: DateTime<Utc>,
    pub alert_fingerprint: String,
}

/// One historical remediation decision, keyed by `(jobName, namespace)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedJob {
    pub job_name: String,
    pub namespace: String,
    pub processed_time: DateTime<Utc>,
    pub unlock_job_name: String,
    /// Whether the failed job itself was deleted
    #[serde(default)]
    pub removed: bool,
    #[serde(default)]
    pub lock_error: String,
}
