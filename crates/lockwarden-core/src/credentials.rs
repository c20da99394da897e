//! Repository credential discovery
//!
//! Best-effort only: secrets are found by naming convention and then by app
//! label. Nothing guarantees the secret found actually holds the
//! repository's credentials; callers that know the secret should name it.

use crate::config::{APP_PLACEHOLDER, OBJECT_PLACEHOLDER};
use crate::error::CredentialError;
use crate::platform::ClusterApi;
use std::collections::BTreeMap;
use tracing::debug;

/// Label used for the last-resort lookup
pub const APP_NAME_LABEL: &str = "app.kubernetes.io/name";

/// Secret chosen for a remediation job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCredential {
    pub secret_name: String,
    pub source: CredentialSource,
}

/// How the secret was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Explicit,
    NamePattern,
    AppLabel,
}

/// Expand the name patterns for an app/object, dropping duplicates
#[must_use]
pub fn candidate_secret_names(patterns: &[String], app: &str, object: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        let name = pattern
            .replace(APP_PLACEHOLDER, app)
            .replace(OBJECT_PLACEHOLDER, object);
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Find the credential secret for a remediation
///
/// Order: explicit secret (not verified), the name patterns in order, then
/// the first secret labelled with the app name.
///
/// # Errors
/// - `CredentialError::NotFound` listing every name tried
/// - `CredentialError::Lookup` if a lookup fails for a reason other than absence
pub async fn discover_credentials(
    api: &dyn ClusterApi,
    patterns: &[String],
    namespace: &str,
    app: &str,
    object: &str,
    explicit: Option<&str>,
) -> Result<ResolvedCredential, CredentialError> {
    if let Some(secret_name) = explicit.filter(|s| !s.is_empty()) {
        return Ok(ResolvedCredential {
            secret_name: secret_name.to_string(),
            source: CredentialSource::Explicit,
        });
    }

    let tried = candidate_secret_names(patterns, app, object);
    for name in &tried {
        match api.get_secret(namespace, name).await {
            Ok(_) => {
                debug!(namespace, secret = %name, "found repository secret by name");
                return Ok(ResolvedCredential {
                    secret_name: name.clone(),
                    source: CredentialSource::NamePattern,
                });
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(CredentialError::Lookup(e)),
        }
    }

    let labels = BTreeMap::from([(APP_NAME_LABEL.to_string(), app.to_string())]);
    let labelled = api
        .list_secrets_by_labels(namespace, &labels)
        .await
        .map_err(CredentialError::Lookup)?;
    if let Some(secret) = labelled.into_iter().min_by(|a, b| a.metadata.name.cmp(&b.metadata.name)) {
        debug!(namespace, secret = %secret.metadata.name, "found repository secret by app label");
        return Ok(ResolvedCredential {
            secret_name: secret.metadata.name,
            source: CredentialSource::AppLabel,
        });
    }

    Err(CredentialError::NotFound {
        app: app.to_string(),
        namespace: namespace.to_string(),
        tried,
    })
}
