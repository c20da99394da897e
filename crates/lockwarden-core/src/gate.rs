//! Admission ceiling for remediation jobs
//!
//! There is no queue: a denied candidate stays unledgered and is offered
//! again on the next pass once capacity frees.

/// Ceiling applied when a monitor configures 0
pub const DEFAULT_MAX_CONCURRENT_UNLOCKS: u32 = 3;

/// Concurrency gate over a monitor's active remediations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyGate {
    default_max: u32,
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_UNLOCKS)
    }
}

impl ConcurrencyGate {
    /// Gate with a custom default ceiling
    #[inline]
    #[must_use]
    pub fn new(default_max: u32) -> Self {
        Self {
            default_max: default_max.max(1),
        }
    }

    /// Ceiling in force for a configured value; non-positive means default
    #[inline]
    #[must_use]
    pub fn effective_max(&self, configured_max: i32) -> usize {
        match u32::try_from(configured_max) {
            Ok(max) if max > 0 => max as usize,
            _ => self.default_max as usize,
        }
    }

    /// Whether one more remediation may start
    #[inline]
    #[must_use]
    pub fn admit(&self, active_count: usize, configured_max: i32) -> bool {
        active_count < self.effective_max(configured_max)
    }
}
