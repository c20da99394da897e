//! `UnlockRequest` resource: one operator-requested remediation

use crate::types::meta::ObjectMeta;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Single remediation request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnlockRequest {
    pub metadata: ObjectMeta,
    pub spec: UnlockRequestSpec,
    #[serde(default)]
    pub status: UnlockRequestStatus,
}

impl UnlockRequest {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: UnlockRequestSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: UnlockRequestStatus::default(),
        }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Namespace the remediation job runs in
    #[must_use]
    pub fn target_namespace(&self) -> &str {
        if self.spec.namespace.is_empty() {
            &self.metadata.namespace
        } else {
            &self.spec.namespace
        }
    }

    /// Current phase, `Pending` when never reconciled
    #[inline]
    #[must_use]
    pub fn phase(&self) -> UnlockPhase {
        self.status.phase.unwrap_or(UnlockPhase::Pending)
    }
}

/// What to unlock
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnlockRequestSpec {
    pub app_name: String,
    /// Namespace of the repository credentials and the job
    pub namespace: String,
    pub object_name: String,
    /// Credential secret; discovered from the app name when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_secret: Option<String>,
    #[serde(default)]
    pub force_unlock: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum UnlockPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl UnlockPhase {
    /// `Succeeded` or `Failed`
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnlockRequestStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<UnlockPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
}
