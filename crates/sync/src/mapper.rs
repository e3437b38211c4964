//! Pure mapping between domain concepts and tracker configuration.
//!
//! No I/O happens here; every function is deterministic over its inputs.

use crate::config::TrackerConfiguration;
use crate::error::SyncError;
use crate::models::Severity;

/// Effect an inbound resolution name has on the finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionEffect {
    /// Mark the finding Accepted
    Accept,
    /// Mark the finding False Positive
    MarkFalsePositive,
    /// Leave the finding status untouched
    None,
}

/// Desired issue transition expressed in domain terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredTransition {
    /// Reopen a closed issue
    Reopen,
    /// Close an open issue
    Close,
}

/// Tracker priority name for a severity.
///
/// Total for complete configurations; an unmapped severity is a
/// configuration error, never a silent default.
///
/// # Errors
/// Returns `SyncError::Configuration` when the severity has no mapping.
pub fn priority_for(severity: Severity, config: &TrackerConfiguration) -> Result<&str, SyncError> {
    config
        .severity_priority_map
        .get(&severity)
        .map(String::as_str)
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| {
            SyncError::Configuration(format!(
                "configuration '{}' maps no priority for severity {severity}",
                config.name
            ))
        })
}

/// Effect of a tracker resolution name under the configuration.
///
/// A name present in both sets is a configuration error resolved
/// deterministically: `MarkFalsePositive` takes precedence.
#[must_use]
pub fn resolution_effect(name: &str, config: &TrackerConfiguration) -> ResolutionEffect {
    if config.false_positive_resolutions.contains(name) {
        ResolutionEffect::MarkFalsePositive
    } else if config.accepted_resolutions.contains(name) {
        ResolutionEffect::Accept
    } else {
        ResolutionEffect::None
    }
}

/// Transition ID for a desired state change, if configured or discovered.
#[must_use]
pub fn transition_for(desired: DesiredTransition, config: &TrackerConfiguration) -> Option<&str> {
    match desired {
        DesiredTransition::Reopen => config.reopen_transition_id.as_deref(),
        DesiredTransition::Close => config.close_transition_id.as_deref(),
    }
}
