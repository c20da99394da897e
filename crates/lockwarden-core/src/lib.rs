//! Lockwarden Core - stale repository lock remediation
//!
//! The control loop that:
//! - Finds failed backup jobs across namespaces
//! - Classifies their failure text as a repository lock error
//! - Launches bounded, de-duplicated remediation jobs
//! - Tracks remediation outcomes in each monitor's status
//! - Drives operator-created unlock requests to completion
//!
//! # Example
//!
//! ```rust,ignore
//! use lockwarden_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cluster = Arc::new(InMemoryCluster::new());
//! cluster.insert_monitor(Monitor::new("media", "volsync-monitor"));
//!
//! let engine = MonitorEngine::new(cluster.clone(), EngineConfig::default());
//! let action = engine.reconcile("media", "volsync-monitor").await?;
//!
//! println!("next pass in {:?}", action.requeue_after());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

// Detection and remediation
pub mod builder;
pub mod classifier;
pub mod credentials;
pub mod engine;
pub mod gate;
pub mod ledger;
pub mod scanner;
pub mod scheduler;
pub mod unlock;

// Support
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod platform;
pub mod types;

// Re-exports for convenience
pub use builder::{alert_fingerprint, RemediationJobBuilder, RemediationRequest};
pub use classifier::{ClassifierCache, LockMatch, PatternClassifier, DEFAULT_PATTERNS};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use credentials::{discover_credentials, CredentialSource, ResolvedCredential};
pub use engine::{Action, MonitorEngine};
pub use error::{
    BuildError, ConfigError, CredentialError, EngineError, ErrorClass, PatternError, PlatformError,
    ScanError,
};
pub use gate::ConcurrencyGate;
pub use ledger::{RefreshOutcome, RemediationLedger, RemediationState};
pub use metrics::{MetricsFacade, MetricsRecorder, NoopRecorder, ReconcileOutcome, UnlockTags};
pub use platform::{ClusterApi, ClusterSnapshot, InMemoryCluster};
pub use scanner::{FailedJobObservation, FailureScanner};
pub use scheduler::{ObjectKind, ReconcileScheduler, RunReport};
pub use unlock::UnlockRequestReconciler;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Lockwarden Core
    pub use crate::types::{
        BatchJob, JobKey, Monitor, MonitorPhase, MonitorSpec, MonitorStatus, UnlockPhase,
        UnlockRequest, UnlockRequestSpec,
    };
    pub use crate::{
        Action, ClusterApi, EngineConfig, EngineError, InMemoryCluster, MetricsRecorder,
        MonitorEngine, PatternClassifier, ReconcileScheduler, UnlockRequestReconciler,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
