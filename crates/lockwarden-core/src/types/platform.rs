//! Platform objects observed and produced by the engine
//!
//! A deliberately small, serde-compatible subset of the batch/core object
//! model: only the fields the remediation loop reads or writes.

use crate::types::meta::ObjectMeta;
use crate::types::resources::ResourceRequirements;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Batch job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: JobSpec,
    #[serde(default)]
    pub status: JobStatus,
}

impl BatchJob {
    /// Create an empty job
    #[inline]
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            ..Self::default()
        }
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

    /// Whether a condition of `kind` is currently true
    #[must_use]
    pub fn has_condition(&self, kind: JobConditionType) -> bool {
        self.status
            .conditions
            .iter()
            .any(|c| c.kind == kind && c.status == ConditionStatus::True)
    }

    /// Message of the first true condition of `kind`
    #[must_use]
    pub fn condition_message(&self, kind: JobConditionType) -> Option<&str> {
        self.status
            .conditions
            .iter()
            .find(|c| c.kind == kind && c.status == ConditionStatus::True)
            .and_then(|c| c.message.as_deref())
    }

    /// Terminal failure: a `Failed` condition or any failed pod
    ///
    /// Platforms differ in which of the two signals they populate, so either
    /// one is sufficient.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.has_condition(JobConditionType::Failed) || self.status.failed > 0
    }

    /// Completed successfully
    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        self.has_condition(JobConditionType::Complete) || self.status.succeeded > 0
    }

    /// Pods still running
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.active > 0
    }
}

/// Job specification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    #[serde(default)]
    pub template: PodTemplate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_limit: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<i32>,
}

/// Observed job state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(default)]
    pub active: i32,
    #[serde(default)]
    pub succeeded: i32,
    #[serde(default)]
    pub failed: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<JobCondition>,
}

/// Job condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobCondition {
    #[serde(rename = "type")]
    pub kind: JobConditionType,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobCondition {
    /// A true condition of `kind` with a message
    #[must_use]
    pub fn new(kind: JobConditionType, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: ConditionStatus::True,
            reason: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum JobConditionType {
    Complete,
    Failed,
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Pod template inside a job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplate {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub spec: PodSpec,
}

/// Pod specification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<PodSecurityContext>,
}

impl PodSpec {
    /// Find a volume by name
    #[must_use]
    pub fn volume(&self, name: &str) -> Option<&Volume> {
        self.volumes.iter().find(|v| v.name == name)
    }

    /// Find the first mount of the volume `name` across all containers
    #[must_use]
    pub fn mount(&self, name: &str) -> Option<&VolumeMount> {
        self.containers
            .iter()
            .flat_map(|c| c.volume_mounts.iter())
            .find(|m| m.name == name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum RestartPolicy {
    Always,
    OnFailure,
    #[default]
    Never,
}

/// Container inside a pod
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "ResourceRequirements::is_empty")]
    pub resources: ResourceRequirements,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

/// Environment variable: literal value or secret reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<EnvVarSource>,
}

impl EnvVar {
    /// Literal value
    #[must_use]
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            value_from: None,
        }
    }

    /// Key of a secret, named after the variable itself
    #[must_use]
    pub fn from_secret(name: &str, secret: &str, optional: bool) -> Self {
        Self {
            name: name.to_string(),
            value: None,
            value_from: Some(EnvVarSource {
                secret_key_ref: SecretKeySelector {
                    name: secret.to_string(),
                    key: name.to_string(),
                    optional,
                },
            }),
        }
    }

    /// Whether this variable may be absent from its secret
    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.value_from
            .as_ref()
            .is_some_and(|source| source.secret_key_ref.optional)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSource {
    pub secret_key_ref: SecretKeySelector,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeySelector {
    pub name: String,
    pub key: String,
    #[serde(default)]
    pub optional: bool,
}

/// Named volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    #[serde(flatten)]
    pub source: VolumeSource,
}

/// Backing storage of a volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum VolumeSource {
    #[serde(rename_all = "camelCase")]
    Nfs {
        server: String,
        path: String,
        #[serde(default)]
        read_only: bool,
    },
    #[serde(rename_all = "camelCase")]
    PersistentVolumeClaim {
        claim_name: String,
        #[serde(default)]
        read_only: bool,
    },
    #[serde(rename_all = "camelCase")]
    HostPath {
        path: String,
        #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
    },
    EmptyDir {},
    #[serde(rename_all = "camelCase")]
    Secret { secret_name: String },
}

/// Mount of a volume into a container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
    #[serde(default)]
    pub read_only: bool,
}

/// Pod-level security settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodSecurityContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_user: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_group: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_group: Option<i64>,
}

/// Pod created for a job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub phase: PodPhase,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_statuses: Vec<ContainerStatus>,
}

impl Pod {
    /// Messages of every terminated container, in container order
    pub fn terminated_messages(&self) -> impl Iterator<Item = &str> {
        self.container_statuses
            .iter()
            .filter_map(|s| s.terminated_message.as_deref())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated_message: Option<String>,
}

/// Key/value secret; only key names are tracked
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub keys: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_by_counter_or_condition() {
        let mut job = BatchJob::new("media", "volsync-src-radarr");
        assert!(!job.is_failed());

        job.status.failed = 1;
        assert!(job.is_failed());

        let mut by_condition = BatchJob::new("media", "volsync-src-radarr");
        by_condition
            .status
            .conditions
            .push(JobCondition::new(JobConditionType::Failed, "BackoffLimitExceeded"));
        assert!(by_condition.is_failed());
    }

    #[test]
    fn succeeded_job_is_not_failed() {
        let mut job = BatchJob::new("media", "volsync-src-radarr");
        job.status.succeeded = 1;
        assert!(job.is_succeeded());
        assert!(!job.is_failed());
    }

    #[test]
    fn false_condition_is_ignored() {
        let mut job = BatchJob::new("media", "volsync-src-radarr");
        job.status.conditions.push(JobCondition {
            kind: JobConditionType::Failed,
            status: ConditionStatus::False,
            reason: None,
            message: None,
        });
        assert!(!job.is_failed());
    }

    #[test]
    fn volume_serializes_with_flattened_source() {
        let volume = Volume {
            name: "repository".to_string(),
            source: VolumeSource::Nfs {
                server: "nas.local".to_string(),
                path: "/mnt/volsync".to_string(),
                read_only: false,
            },
        };
        let json = serde_json::to_value(&volume).unwrap();
        assert_eq!(json["name"], "repository");
        assert_eq!(json["nfs"]["server"], "nas.local");

        let back: Volume = serde_json::from_value(json).unwrap();
        assert_eq!(back, volume);
    }

    #[test]
    fn mount_lookup_spans_containers() {
        let spec = PodSpec {
            containers: vec![
                Container {
                    name: "init".to_string(),
                    ..Container::default()
                },
                Container {
                    name: "mover".to_string(),
                    volume_mounts: vec![VolumeMount {
                        name: "repository".to_string(),
                        mount_path: "/repository".to_string(),
                        sub_path: None,
                        read_only: false,
                    }],
                    ..Container::default()
                },
            ],
            ..PodSpec::default()
        };
        assert_eq!(spec.mount("repository").map(|m| m.mount_path.as_str()), Some("/repository"));
        assert!(spec.mount("data").is_none());
    }
}
