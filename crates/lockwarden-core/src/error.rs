//! Error types for Lockwarden
//!
//! Provides error handling for:
//! - Platform calls (not found, conflicts, API failures)
//! - Lock-error pattern compilation
//! - Failed-job scanning (fail-closed)
//! - Remediation job construction
//! - Credential discovery
//!
//! `EngineError` is the umbrella type returned by a reconcile pass; its
//! [`ErrorClass`] decides how the pass reacts.

/// Platform call errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    /// Object does not exist
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// Object with the same name already exists
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// Write carried a stale resource version
    #[error("conflict writing {kind} {namespace}/{name}: resource version {expected} is stale")]
    Conflict {
        kind: &'static str,
        namespace: String,
        name: String,
        expected: u64,
    },

    /// Any other API failure
    #[error("platform API error: {0}")]
    Api(String),
}

impl PlatformError {
    #[must_use]
    pub fn not_found(kind: &'static str, namespace: &str, name: &str) -> Self {
        Self::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// One lock-error pattern that failed to compile
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid lock error pattern '{pattern}': {message}")]
pub struct PatternError {
    pub pattern: String,
    pub message: String,
}

/// Failed-job enumeration errors; any of these aborts the whole scan
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    /// Namespace enumeration failed
    #[error("failed to list namespaces: {0}")]
    ListNamespaces(#[source] PlatformError),

    /// Job enumeration failed in one namespace
    #[error("failed to list jobs in namespace {namespace}: {source}")]
    ListJobs {
        namespace: String,
        #[source]
        source: PlatformError,
    },
}

/// Remediation job construction errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// Neither the template nor the configuration names an image
    #[error("no unlock image configured")]
    MissingImage,

    /// Derived job name is empty after sanitising
    #[error("cannot derive a valid job name from '{0}'")]
    InvalidName(String),
}

/// Credential discovery errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// No candidate secret exists
    #[error("no repository secret found for app {app} in namespace {namespace} (tried: {})", .tried.join(", "))]
    NotFound {
        app: String,
        namespace: String,
        tried: Vec<String>,
    },

    /// Secret lookup itself failed
    #[error("secret lookup failed: {0}")]
    Lookup(#[source] PlatformError),
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {message}")]
    Read { path: String, message: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How a reconcile pass reacts to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Operator must fix the policy; not retried blindly
    Configuration,
    /// Platform call failed; retried on the next scheduled pass
    TransientPlatform,
    /// Target vanished; treated as already resolved
    NotFound,
    /// No credential secret; candidate skipped and retried next pass
    CredentialDiscovery,
    /// Optimistic concurrency lost; pass recomputed from a fresh read
    Conflict,
}

/// Main engine error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Status write kept conflicting after every retry
    #[error("status update conflicted {attempts} times")]
    ConflictRetriesExhausted { attempts: u32 },
}

impl EngineError {
    /// Classify for retry and status reporting
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Platform(e) => platform_class(e),
            Self::Scan(ScanError::ListNamespaces(e) | ScanError::ListJobs { source: e, .. }) => {
                platform_class(e)
            }
            Self::Credential(CredentialError::NotFound { .. }) => ErrorClass::CredentialDiscovery,
            Self::Credential(CredentialError::Lookup(e)) => platform_class(e),
            Self::Pattern(_) | Self::Build(_) | Self::Config(_) => ErrorClass::Configuration,
            Self::ConflictRetriesExhausted { .. } => ErrorClass::Conflict,
        }
    }

    /// Check if error is retryable on the regular schedule
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::TransientPlatform | ErrorClass::CredentialDiscovery | ErrorClass::Conflict
        )
    }

    /// Check if the target already went away
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }

    /// Check if a status write lost an optimistic-concurrency race
    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Platform(e) if e.is_conflict())
    }
}

fn platform_class(error: &PlatformError) -> ErrorClass {
    match error {
        PlatformError::NotFound { .. } => ErrorClass::NotFound,
        PlatformError::Conflict { .. } => ErrorClass::Conflict,
        PlatformError::AlreadyExists { .. } | PlatformError::Api(_) => ErrorClass::TransientPlatform,
    }
}
