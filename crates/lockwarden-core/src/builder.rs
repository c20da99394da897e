//! Remediation job construction
//!
//! Pure and deterministic given its inputs: credential discovery and the
//! clock reading happen before a build and are passed in.
//!
//! A remediation job carries:
//! - An `unlock` container running the repository tool
//! - Repository credentials wired from one secret (two required keys, the
//!   provider-specific keys optional)
//! - The failed job's repository volume, when it has one
//! - Correlation labels and annotations linking it to its monitor and the
//!   failure that triggered it

use crate::config::EngineConfig;
use crate::error::BuildError;
use crate::scanner::FailedJobObservation;
use crate::types::resources::convert_resource_list;
use crate::types::{
    BatchJob, Container, EnvVar, JobSpec, Monitor, ObjectMeta, OwnerReference, PodSecurityContext,
    PodSpec, PodTemplate, ResourceRequirements, RestartPolicy, UnlockJobTemplate, UnlockRequest,
    VolumeMount,
};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::warn;

/// Maximum length of object names and label values
pub const MAX_NAME_LEN: usize = 63;

/// Name of the remediation container
pub const CONTAINER_NAME: &str = "unlock";

/// Resource API version used in owner references
pub const API_VERSION: &str = "v1alpha1";

/// Required repository variables
pub const REQUIRED_ENV: &[&str] = &["RESTIC_REPOSITORY", "RESTIC_PASSWORD"];

/// Provider-specific variables, wired as optional keys of the same secret
pub const OPTIONAL_ENV: &[&str] = &[
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
    "AWS_DEFAULT_REGION",
    "AWS_PROFILE",
    "RESTIC_AWS_ASSUME_ROLE_ARN",
    "RESTIC_AWS_ASSUME_ROLE_SESSION_NAME",
    "RESTIC_AWS_ASSUME_ROLE_EXTERNAL_ID",
    "RESTIC_AWS_ASSUME_ROLE_POLICY",
    "RESTIC_AWS_ASSUME_ROLE_REGION",
    "RESTIC_AWS_ASSUME_ROLE_STS_ENDPOINT",
    "ST_AUTH",
    "ST_USER",
    "ST_KEY",
    "OS_AUTH_URL",
    "OS_REGION_NAME",
    "OS_USERNAME",
    "OS_PASSWORD",
    "OS_TENANT_ID",
    "OS_TENANT_NAME",
    "B2_ACCOUNT_ID",
    "B2_ACCOUNT_KEY",
    "AZURE_ACCOUNT_NAME",
    "AZURE_ACCOUNT_KEY",
    "AZURE_ACCOUNT_SAS",
    "AZURE_ENDPOINT_SUFFIX",
    "GOOGLE_PROJECT_ID",
    "GOOGLE_APPLICATION_CREDENTIALS",
    "RESTIC_REST_USERNAME",
    "RESTIC_REST_PASSWORD",
    "RCLONE_BWLIMIT",
    "RESTIC_CACERT",
];

/// Suffixes of the `<domain>/...` correlation keys
pub mod keys {
    pub const MONITOR: &str = "monitor";
    pub const FAILED_JOB: &str = "failed-job";
    pub const APP: &str = "app";
    pub const OBJECT: &str = "object";
    pub const LOCK_ERROR: &str = "lock-error";
    pub const ALERT_FINGERPRINT: &str = "alert-fingerprint";
    pub const UNLOCK_JOB: &str = "unlock-job";
    pub const UNLOCK_REQUEST: &str = "unlock-request";
}

/// Lowercase, replace anything outside `[a-z0-9-]`, cap at 63 characters
#[must_use]
pub fn sanitize_name(raw: &str) -> String {
    let mapped: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '-' })
        .take(MAX_NAME_LEN)
        .collect();
    mapped.trim_matches('-').to_string()
}

/// Make a string usable as a label value
#[must_use]
pub fn label_value(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .take(MAX_NAME_LEN)
        .collect();
    mapped
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

/// Length of the fingerprint tag kept in shortened job names
const NAME_TAG_LEN: usize = 8;

/// `<prefix>-<app>-<object>-<unix seconds>`, sanitised
///
/// When that exceeds 63 characters the `<prefix>-<app>-<object>` head is cut
/// and `-<tag>-<unix seconds>` is kept, `tag` being the start of the failed
/// job's fingerprint, so distinct failures never share a name.
///
/// # Errors
/// - `BuildError::InvalidName` if nothing usable remains
pub fn unlock_job_name(
    prefix: &str,
    app: &str,
    object: &str,
    fingerprint: &str,
    created_at: DateTime<Utc>,
) -> Result<String, BuildError> {
    let stamp = created_at.timestamp();
    let raw = format!("{prefix}-{app}-{object}-{stamp}");
    let head = sanitize_name(&format!("{prefix}-{app}-{object}"));
    let full = sanitize_name(&format!("{head}-{stamp}"));

    let name = if head.len() + stamp.to_string().len() < MAX_NAME_LEN {
        full
    } else {
        let tag: String = fingerprint.chars().take(NAME_TAG_LEN).collect();
        let suffix = sanitize_name(&format!("{tag}-{stamp}"));
        let room = MAX_NAME_LEN.saturating_sub(suffix.len() + 1);
        let cut = head[..room.min(head.len())].trim_end_matches('-');
        sanitize_name(&format!("{cut}-{suffix}"))
    };
    if name.is_empty() {
        return Err(BuildError::InvalidName(raw));
    }
    Ok(name)
}

/// First 16 hex characters of SHA-256 over `namespace/job`
#[must_use]
pub fn alert_fingerprint(namespace: &str, job_name: &str) -> String {
    let digest = Sha256::digest(format!("{namespace}/{job_name}").as_bytes());
    let mut encoded = hex::encode(digest);
    encoded.truncate(16);
    encoded
}

/// Inputs of a monitor-driven remediation
#[derive(Debug, Clone, Copy)]
pub struct RemediationRequest<'a> {
    pub monitor: &'a Monitor,
    pub observation: &'a FailedJobObservation,
    /// Matched lock-error line
    pub lock_error: &'a str,
    pub secret_name: &'a str,
    pub created_at: DateTime<Utc>,
}

/// Builds remediation jobs from a configuration
#[derive(Debug, Clone, Copy)]
pub struct RemediationJobBuilder<'c> {
    config: &'c EngineConfig,
}

impl<'c> RemediationJobBuilder<'c> {
    #[inline]
    #[must_use]
    pub fn new(config: &'c EngineConfig) -> Self {
        Self { config }
    }

    /// Remediation job for a failed job observed by a monitor
    ///
    /// # Errors
    /// - `BuildError::MissingImage` if no image is configured anywhere
    /// - `BuildError::InvalidName` if no valid job name can be derived
    pub fn build(&self, request: &RemediationRequest<'_>) -> Result<BatchJob, BuildError> {
        let monitor = request.monitor;
        let observation = request.observation;
        let template = &monitor.spec.unlock_job_template;
        let image = self.image(template)?;
        let name = unlock_job_name(
            &self.config.unlock_job_prefix,
            &observation.app_name,
            &observation.object_name,
            &alert_fingerprint(observation.namespace(), observation.name()),
            request.created_at,
        )?;

        let mut env = vec![
            EnvVar::literal("FAILED_JOB_NAME", observation.name()),
            EnvVar::literal("LOCK_ERROR", request.lock_error),
        ];
        env.extend(repository_env(request.secret_name));

        let (command, args) = self.command(template, monitor.spec.force_unlock);
        let mut container = Container {
            name: CONTAINER_NAME.to_string(),
            image,
            command,
            args,
            env,
            resources: resources(template),
            volume_mounts: Vec::new(),
        };

        let mut pod_spec = PodSpec {
            restart_policy: RestartPolicy::Never,
            service_account_name: template.service_account.clone().filter(|s| !s.is_empty()),
            security_context: template.security_context.as_ref().map(|sc| PodSecurityContext {
                run_as_user: sc.run_as_user,
                run_as_group: sc.run_as_group,
                fs_group: sc.fs_group,
            }),
            ..PodSpec::default()
        };

        let failed_pod = &observation.job.spec.template.spec;
        if let Some(volume) = failed_pod.volume(&self.config.repository_volume_name) {
            let mount = failed_pod
                .mount(&volume.name)
                .cloned()
                .unwrap_or_else(|| VolumeMount {
                    name: volume.name.clone(),
                    mount_path: self.config.repository_mount_path.clone(),
                    sub_path: None,
                    read_only: false,
                });
            container.volume_mounts.push(mount);
            pod_spec.volumes.push(volume.clone());
        }
        pod_spec.containers.push(container);

        let domain = |suffix: &str| self.config.domain_key(suffix);
        let failed_key = observation.key();
        let mut metadata = ObjectMeta::new(observation.namespace(), &name);
        metadata.labels = self.common_labels();
        metadata.labels.insert(domain(keys::MONITOR), label_value(monitor.name()));
        metadata
            .labels
            .insert(domain(keys::FAILED_JOB), label_value(observation.name()));
        metadata
            .labels
            .insert(domain(keys::APP), label_value(&observation.app_name));
        metadata
            .labels
            .insert(domain(keys::OBJECT), label_value(&observation.object_name));
        metadata
            .annotations
            .insert(domain(keys::FAILED_JOB), failed_key.to_string());
        metadata
            .annotations
            .insert(domain(keys::LOCK_ERROR), request.lock_error.to_string());
        metadata.annotations.insert(
            domain(keys::ALERT_FINGERPRINT),
            alert_fingerprint(&failed_key.namespace, &failed_key.name),
        );
        metadata.owner_references.push(self.owner_reference(
            crate::platform::kind::MONITOR,
            &monitor.metadata,
        ));

        Ok(BatchJob {
            metadata,
            spec: JobSpec {
                template: PodTemplate {
                    labels: self.pod_labels(&name),
                    spec: pod_spec,
                },
                backoff_limit: Some(self.config.backoff_limit),
                ttl_seconds_after_finished: monitor.spec.ttl_seconds_after_finished,
            },
            status: crate::types::JobStatus::default(),
        })
    }

    /// Remediation job for an operator-created unlock request
    ///
    /// # Errors
    /// - `BuildError::MissingImage` if no default image is configured
    /// - `BuildError::InvalidName` if no valid job name can be derived
    pub fn build_for_request(
        &self,
        request: &UnlockRequest,
        secret_name: &str,
    ) -> Result<BatchJob, BuildError> {
        let spec = &request.spec;
        let image = self.image(&UnlockJobTemplate::default())?;
        let raw = format!(
            "{}-{}-{}",
            self.config.unlock_job_prefix,
            spec.app_name,
            request.name()
        );
        let name = sanitize_name(&raw);
        if name.is_empty() {
            return Err(BuildError::InvalidName(raw));
        }

        let (command, args) = self.command(&UnlockJobTemplate::default(), spec.force_unlock);
        let container = Container {
            name: CONTAINER_NAME.to_string(),
            image,
            command,
            args,
            env: repository_env(secret_name),
            ..Container::default()
        };

        let domain = |suffix: &str| self.config.domain_key(suffix);
        let mut metadata = ObjectMeta::new(request.target_namespace(), &name);
        metadata.labels = self.common_labels();
        metadata.labels.insert(domain(keys::APP), label_value(&spec.app_name));
        metadata
            .labels
            .insert(domain(keys::OBJECT), label_value(&spec.object_name));
        metadata
            .labels
            .insert(domain(keys::UNLOCK_REQUEST), label_value(request.name()));
        metadata.owner_references.push(self.owner_reference(
            crate::platform::kind::UNLOCK_REQUEST,
            &request.metadata,
        ));

        Ok(BatchJob {
            metadata,
            spec: JobSpec {
                template: PodTemplate {
                    labels: self.pod_labels(&name),
                    spec: PodSpec {
                        restart_policy: RestartPolicy::Never,
                        containers: vec![container],
                        ..PodSpec::default()
                    },
                },
                backoff_limit: Some(self.config.backoff_limit),
                ttl_seconds_after_finished: Some(
                    spec.ttl_seconds_after_finished
                        .unwrap_or(self.config.unlock_request_ttl_secs),
                ),
            },
            status: crate::types::JobStatus::default(),
        })
    }

    fn image(&self, template: &UnlockJobTemplate) -> Result<String, BuildError> {
        [template.image.as_str(), self.config.default_unlock_image.as_str()]
            .into_iter()
            .map(str::trim)
            .find(|image| !image.is_empty())
            .map(str::to_string)
            .ok_or(BuildError::MissingImage)
    }

    fn command(&self, template: &UnlockJobTemplate, force: bool) -> (Vec<String>, Vec<String>) {
        if !template.command.is_empty() {
            return (template.command.clone(), template.args.clone());
        }
        let args = if template.args.is_empty() {
            let flag = if force { " --remove-all" } else { "" };
            vec![format!("{} unlock{flag}", self.config.unlock_tool)]
        } else {
            template.args.clone()
        };
        (vec!["/bin/sh".to_string(), "-c".to_string()], args)
    }

    fn common_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("app.kubernetes.io/name".to_string(), "lockwarden".to_string()),
            ("app.kubernetes.io/component".to_string(), "volsync-unlock".to_string()),
            ("app.kubernetes.io/managed-by".to_string(), "lockwarden".to_string()),
        ])
    }

    fn pod_labels(&self, job_name: &str) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::from([
            ("app.kubernetes.io/name".to_string(), "lockwarden".to_string()),
            ("app.kubernetes.io/component".to_string(), "volsync-unlock".to_string()),
        ]);
        labels.insert(self.config.domain_key(keys::UNLOCK_JOB), label_value(job_name));
        labels
    }

    fn owner_reference(&self, kind: &str, owner: &ObjectMeta) -> OwnerReference {
        OwnerReference {
            api_version: format!("{}/{API_VERSION}", self.config.label_domain),
            kind: kind.to_string(),
            name: owner.name.clone(),
            uid: owner.uid.clone(),
            controller: true,
        }
    }
}

fn repository_env(secret_name: &str) -> Vec<EnvVar> {
    REQUIRED_ENV
        .iter()
        .map(|name| EnvVar::from_secret(name, secret_name, false))
        .chain(
            OPTIONAL_ENV
                .iter()
                .map(|name| EnvVar::from_secret(name, secret_name, true)),
        )
        .collect()
}

fn resources(template: &UnlockJobTemplate) -> ResourceRequirements {
    let Some(raw) = &template.resources else {
        return ResourceRequirements::default();
    };
    let (limits, bad_limits) = convert_resource_list(&raw.limits);
    let (requests, bad_requests) = convert_resource_list(&raw.requests);
    for (resource, error) in bad_limits.iter().chain(bad_requests.iter()) {
        warn!(resource = %resource, error = %error, "skipping malformed resource quantity");
    }
    ResourceRequirements { limits, requests }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Volume, VolumeSource};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn observation(name: &str, app: &str, object: &str) -> FailedJobObservation {
        FailedJobObservation {
            job: BatchJob::new("media", name),
            pods: Vec::new(),
            app_name: app.to_string(),
            object_name: object.to_string(),
            text: String::new(),
        }
    }

    fn monitor() -> Monitor {
        let mut monitor = Monitor::new("ops", "volsync");
        monitor.metadata.uid = "monitor-uid".to_string();
        monitor
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn build(monitor: &Monitor, observation: &FailedJobObservation) -> BatchJob {
        let config = EngineConfig::default();
        RemediationJobBuilder::new(&config)
            .build(&RemediationRequest {
                monitor,
                observation,
                lock_error: "repository is already locked",
                secret_name: "prowlarr-backup-nfs",
                created_at: at(),
            })
            .unwrap()
    }

    #[test]
    fn default_job_shape() {
        let obs = observation("volsync-src-prowlarr-nfs", "prowlarr", "prowlarr-nfs");
        let job = build(&monitor(), &obs);

        assert_eq!(
            job.metadata.name,
            format!("volsync-unlock-prowlarr-prowlarr-nfs-{}", at().timestamp())
        );
        assert_eq!(job.metadata.namespace, "media");
        let pod = &job.spec.template.spec;
        assert_eq!(pod.restart_policy, RestartPolicy::Never);
        let container = &pod.containers[0];
        assert_eq!(container.name, "unlock");
        assert_eq!(container.image, "restic/restic:0.17.3");
        assert_eq!(container.command, vec!["/bin/sh", "-c"]);
        assert_eq!(container.args, vec!["restic unlock"]);
        assert_eq!(job.spec.backoff_limit, Some(3));
        assert_eq!(job.metadata.owner_references[0].uid, "monitor-uid");
    }

    #[test]
    fn env_wires_required_and_optional_keys() {
        let obs = observation("volsync-src-prowlarr-nfs", "prowlarr", "prowlarr-nfs");
        let job = build(&monitor(), &obs);
        let env = &job.spec.template.spec.containers[0].env;

        assert_eq!(OPTIONAL_ENV.len(), 32);
        assert_eq!(env.len(), 2 + REQUIRED_ENV.len() + OPTIONAL_ENV.len());
        assert_eq!(env[0].value.as_deref(), Some("volsync-src-prowlarr-nfs"));
        assert_eq!(env[1].value.as_deref(), Some("repository is already locked"));

        let repo = env.iter().find(|e| e.name == "RESTIC_REPOSITORY").unwrap();
        assert!(!repo.is_optional());
        assert_eq!(
            repo.value_from.as_ref().unwrap().secret_key_ref.name,
            "prowlarr-backup-nfs"
        );
        assert!(env.iter().find(|e| e.name == "B2_ACCOUNT_KEY").unwrap().is_optional());
    }

    #[test]
    fn correlation_labels_and_annotations() {
        let obs = observation("volsync-src-prowlarr-nfs", "prowlarr", "prowlarr-nfs");
        let job = build(&monitor(), &obs);
        let labels = &job.metadata.labels;
        assert_eq!(labels["lockwarden.dev/monitor"], "volsync");
        assert_eq!(labels["lockwarden.dev/failed-job"], "volsync-src-prowlarr-nfs");
        assert_eq!(labels["lockwarden.dev/app"], "prowlarr");
        assert_eq!(labels["lockwarden.dev/object"], "prowlarr-nfs");
        assert_eq!(labels["app.kubernetes.io/managed-by"], "lockwarden");

        let annotations = &job.metadata.annotations;
        assert_eq!(
            annotations["lockwarden.dev/failed-job"],
            "media/volsync-src-prowlarr-nfs"
        );
        assert_eq!(
            annotations["lockwarden.dev/alert-fingerprint"],
            alert_fingerprint("media", "volsync-src-prowlarr-nfs")
        );
    }

    #[test]
    fn force_unlock_removes_all_locks() {
        let mut forced = monitor();
        forced.spec.force_unlock = true;
        let obs = observation("volsync-src-radarr", "radarr", "radarr");
        let job = build(&forced, &obs);
        assert_eq!(
            job.spec.template.spec.containers[0].args,
            vec!["restic unlock --remove-all"]
        );
    }

    #[test]
    fn template_command_without_args_leaves_args_empty() {
        let mut custom = monitor();
        custom.spec.unlock_job_template.command = vec!["/usr/local/bin/unlock".to_string()];
        let obs = observation("volsync-src-radarr", "radarr", "radarr");
        let container = &build(&custom, &obs).spec.template.spec.containers[0];
        assert_eq!(container.command, vec!["/usr/local/bin/unlock"]);
        assert!(container.args.is_empty());

        let mut args_only = monitor();
        args_only.spec.unlock_job_template.args = vec!["restic unlock --verbose".to_string()];
        let container = &build(&args_only, &obs).spec.template.spec.containers[0];
        assert_eq!(container.command, vec!["/bin/sh", "-c"]);
        assert_eq!(container.args, vec!["restic unlock --verbose"]);
    }

    #[test]
    fn repository_volume_is_reused() {
        let mut obs = observation("volsync-src-radarr", "radarr", "radarr");
        obs.job.spec.template.spec.volumes.push(Volume {
            name: "repository".to_string(),
            source: VolumeSource::Nfs {
                server: "nas.local".to_string(),
                path: "/volsync".to_string(),
                read_only: false,
            },
        });
        obs.job.spec.template.spec.containers.push(Container {
            name: "restic".to_string(),
            volume_mounts: vec![VolumeMount {
                name: "repository".to_string(),
                mount_path: "/mnt/repo".to_string(),
                sub_path: None,
                read_only: false,
            }],
            ..Container::default()
        });

        let job = build(&monitor(), &obs);
        let pod = &job.spec.template.spec;
        assert_eq!(pod.volumes.len(), 1);
        assert_eq!(pod.containers[0].volume_mounts[0].mount_path, "/mnt/repo");
    }

    #[test]
    fn volume_without_mount_gets_default_path() {
        let mut obs = observation("volsync-src-radarr", "radarr", "radarr");
        obs.job.spec.template.spec.volumes.push(Volume {
            name: "repository".to_string(),
            source: VolumeSource::PersistentVolumeClaim {
                claim_name: "restic-repo".to_string(),
                read_only: false,
            },
        });
        let job = build(&monitor(), &obs);
        assert_eq!(
            job.spec.template.spec.containers[0].volume_mounts[0].mount_path,
            "/repository"
        );
    }

    #[test]
    fn no_repository_volume_is_not_an_error() {
        let obs = observation("volsync-src-radarr", "radarr", "radarr");
        let job = build(&monitor(), &obs);
        assert!(job.spec.template.spec.volumes.is_empty());
        assert!(job.spec.template.spec.containers[0].volume_mounts.is_empty());
    }

    #[test]
    fn malformed_quantities_are_skipped() {
        let mut custom = monitor();
        let mut resources = crate::types::ResourceTemplate::default();
        resources.limits.insert("cpu".to_string(), "500m".to_string());
        resources.limits.insert("memory".to_string(), "lots".to_string());
        custom.spec.unlock_job_template.resources = Some(resources);

        let obs = observation("volsync-src-radarr", "radarr", "radarr");
        let container = &build(&custom, &obs).spec.template.spec.containers[0];
        assert!(container.resources.limits.contains_key("cpu"));
        assert!(!container.resources.limits.contains_key("memory"));
    }

    #[test]
    fn missing_image_is_a_configuration_error() {
        let config = EngineConfig::default().with_default_unlock_image("");
        let obs = observation("volsync-src-radarr", "radarr", "radarr");
        let err = RemediationJobBuilder::new(&config)
            .build(&RemediationRequest {
                monitor: &monitor(),
                observation: &obs,
                lock_error: "locked",
                secret_name: "radarr-backup",
                created_at: at(),
            })
            .unwrap_err();
        assert_eq!(err, BuildError::MissingImage);
    }

    #[test]
    fn names_are_sanitised_and_bounded() {
        let name = unlock_job_name(
            "volsync-unlock",
            "My_App",
            "a-very-long-object-name-that-keeps-going-and-going-well-past-the-limit",
            "0123456789abcdef",
            at(),
        )
        .unwrap();
        assert!(name.len() <= MAX_NAME_LEN);
        assert!(name.starts_with("volsync-unlock-my-app-"));
        assert!(name.ends_with(&format!("-01234567-{}", at().timestamp())));
        assert!(unlock_job_name("", "", "", "", at()).is_ok());
        assert_eq!(sanitize_name("--"), "");
    }

    #[test]
    fn short_names_keep_the_plain_form() {
        let name = unlock_job_name("volsync-unlock", "radarr", "radarr", "0123456789abcdef", at()).unwrap();
        assert_eq!(name, format!("volsync-unlock-radarr-radarr-{}", at().timestamp()));
    }

    #[test]
    fn long_objects_sharing_a_prefix_get_distinct_names() {
        let data = observation(
            "volsync-src-nextcloud-postgres-primary-data",
            "nextcloud-postgres-primary",
            "nextcloud-postgres-primary-data",
        );
        let config = observation(
            "volsync-src-nextcloud-postgres-primary-config",
            "nextcloud-postgres-primary",
            "nextcloud-postgres-primary-config",
        );
        let first = build(&monitor(), &data);
        let second = build(&monitor(), &config);

        assert_ne!(first.name(), second.name());
        for job in [&first, &second] {
            assert!(job.name().len() <= MAX_NAME_LEN);
            assert!(job.name().ends_with(&at().timestamp().to_string()));
        }
    }

    #[test]
    fn fingerprint_is_stable_hex() {
        let a = alert_fingerprint("media", "volsync-src-radarr");
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, alert_fingerprint("media", "volsync-src-radarr"));
        assert_ne!(a, alert_fingerprint("media", "volsync-src-sonarr"));
    }

    #[test]
    fn unlock_request_job() {
        let config = EngineConfig::default();
        let mut request = UnlockRequest::new(
            "ops",
            "manual-1",
            crate::types::UnlockRequestSpec {
                app_name: "radarr".to_string(),
                namespace: "media".to_string(),
                object_name: "radarr-nfs".to_string(),
                force_unlock: true,
                ..Default::default()
            },
        );
        request.metadata.uid = "request-uid".to_string();

        let job = RemediationJobBuilder::new(&config)
            .build_for_request(&request, "radarr-backup")
            .unwrap();
        assert_eq!(job.metadata.name, "volsync-unlock-radarr-manual-1");
        assert_eq!(job.metadata.namespace, "media");
        assert_eq!(job.spec.ttl_seconds_after_finished, Some(300));
        assert_eq!(
            job.spec.template.spec.containers[0].args,
            vec!["restic unlock --remove-all"]
        );
        assert_eq!(job.metadata.labels["lockwarden.dev/unlock-request"], "manual-1");
    }
}
