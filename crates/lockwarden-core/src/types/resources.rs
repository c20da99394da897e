//! Resource quantities for container requests and limits

use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Platform quantity grammar: signed decimal with an optional binary-SI,
/// decimal-SI or exponent suffix (`500m`, `512Mi`, `1.5`, `2e3`)
static QUANTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+)(?:Ki|Mi|Gi|Ti|Pi|Ei|[numkMGTPE]|[eE][+-]?[0-9]+)?$")
        .expect("quantity grammar is a valid regex")
});

/// Quantity rejected by [`Quantity::parse`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid quantity '{value}'")]
pub struct QuantityError {
    pub value: String,
}

/// Validated resource quantity, kept in its canonical string form
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Quantity(String);

impl Quantity {
    /// Parse and validate a quantity string
    ///
    /// # Errors
    /// - `QuantityError` if `value` does not follow the quantity grammar
    pub fn parse(value: &str) -> Result<Self, QuantityError> {
        let trimmed = value.trim();
        if QUANTITY_RE.is_match(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(QuantityError {
                value: value.to_string(),
            })
        }
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute resource requests and limits for a container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, Quantity>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, Quantity>,
}

impl ResourceRequirements {
    /// Whether neither requests nor limits are set
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.limits.is_empty() && self.requests.is_empty()
    }
}

/// Convert a raw `name -> quantity` map, dropping malformed entries
///
/// Returns the accepted list and the rejected entries so callers can report
/// them; a malformed entry never fails the whole conversion.
#[must_use]
pub fn convert_resource_list(
    raw: &BTreeMap<String, String>,
) -> (BTreeMap<String, Quantity>, Vec<(String, QuantityError)>) {
    let mut accepted = BTreeMap::new();
    let mut rejected = Vec::new();
    for (name, value) in raw {
        match Quantity::parse(value) {
            Ok(quantity) => {
                accepted.insert(name.clone(), quantity);
            }
            Err(e) => rejected.push((name.clone(), e)),
        }
    }
    (accepted, rejected)
}
