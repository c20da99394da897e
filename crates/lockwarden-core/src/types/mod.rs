//! Core types for Lockwarden
//!
//! Defines the resource shapes the engine reads and writes:
//! - Object metadata shared by every resource
//! - Batch jobs, pods and secrets observed on the platform
//! - Resource quantities for container requests/limits
//! - The `Monitor` policy resource and its status ledger
//! - The `UnlockRequest` single-remediation resource

pub mod meta;
pub mod monitor;
pub mod platform;
pub mod resources;
pub mod unlock;

pub use meta::{JobKey, ObjectMeta, OwnerReference};
pub use monitor::{
    ActiveUnlock, JobSelector, Monitor, MonitorPhase, MonitorSpec, MonitorStatus, ProcessedJob,
    ResourceTemplate, SecurityContextTemplate, UnlockJobTemplate,
};
pub use platform::{
    BatchJob, ConditionStatus, Container, ContainerStatus, EnvVar, EnvVarSource, JobCondition,
    JobConditionType, JobSpec, JobStatus, Pod, PodPhase, PodSecurityContext, PodSpec, PodTemplate,
    RestartPolicy, Secret, SecretKeySelector, Volume, VolumeMount, VolumeSource,
};
pub use resources::{Quantity, QuantityError, ResourceRequirements};
pub use unlock::{UnlockPhase, UnlockRequest, UnlockRequestSpec, UnlockRequestStatus};
