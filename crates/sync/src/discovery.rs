//! Configuration validation and express-mode auto-discovery.
//!
//! Express validation queries the tracker for issue types, fields and
//! transitions and fills the optional transition/field IDs heuristically.
//! Every discovery failure is non-fatal: the field stays unset and manual
//! configuration takes over.

use tracing::{debug, instrument};

use crate::client::{FieldRef, TrackerClient, Transition};
use crate::config::{ConfigError, TrackerConfiguration};
use crate::error::SyncError;

/// Target status keywords that identify a reopen transition.
pub const REOPEN_KEYWORDS: &[&str] = &["reopen", "open", "to do", "backlog"];

/// Target status keywords that identify a close transition.
pub const CLOSE_KEYWORDS: &[&str] = &["close", "done", "resolve"];

/// Field names recognized as the epic name field.
const EPIC_NAME_FIELD: &str = "epic name";

/// Discovered optional mappings, each independently fallible.
#[derive(Debug, Clone, Default)]
pub struct DiscoveredMappings {
    /// Transition whose target status matched the reopen keywords
    pub reopen_transition_id: Option<String>,
    /// Transition whose target status matched the close keywords
    pub close_transition_id: Option<String>,
    /// Field whose name matched the epic name field
    pub epic_name_field_id: Option<String>,
    /// Issue type names available on the tracker
    pub issue_types: Vec<String>,
}

/// Full validation of a configuration: structural completeness plus
/// tracker reachability and credential acceptance.
#[instrument(skip(client, config), fields(config = %config.name))]
pub async fn validate_configuration(
    client: &TrackerClient,
    config: &TrackerConfiguration,
) -> Vec<ConfigError> {
    let mut errors = config.completeness_errors();

    match client.current_user().await {
        Ok(()) => {}
        Err(SyncError::Authentication(detail)) => {
            errors.push(ConfigError::CredentialRejected(detail));
        }
        Err(e) => errors.push(ConfigError::Unreachable(e.to_string())),
    }

    errors
}

/// Express-mode discovery of optional mappings.
///
/// Transitions are exposed per issue by the tracker, so discovery needs a
/// probe issue key; without one, transition discovery is skipped.
#[instrument(skip(client), fields(probe = probe_issue_key.unwrap_or("-")))]
pub async fn discover_mappings(
    client: &TrackerClient,
    probe_issue_key: Option<&str>,
) -> DiscoveredMappings {
    let mut discovered = DiscoveredMappings::default();

    match client.list_issue_types().await {
        Ok(types) => discovered.issue_types = types.into_iter().map(|t| t.name).collect(),
        Err(e) => debug!(error = %e, "Issue type discovery failed"),
    }

    match client.list_fields().await {
        Ok(fields) => discovered.epic_name_field_id = match_epic_field(&fields),
        Err(e) => debug!(error = %e, "Field discovery failed"),
    }

    if let Some(issue_key) = probe_issue_key {
        match client.list_transitions(issue_key).await {
            Ok(transitions) => {
                discovered.reopen_transition_id =
                    match_transition(&transitions, REOPEN_KEYWORDS).map(|t| t.id.clone());
                discovered.close_transition_id =
                    match_transition(&transitions, CLOSE_KEYWORDS).map(|t| t.id.clone());
            }
            Err(e) => debug!(error = %e, "Transition discovery failed"),
        }
    }

    discovered
}

/// First transition whose target status name contains one of the keywords.
#[must_use]
pub fn match_transition<'a>(
    transitions: &'a [Transition],
    keywords: &[&str],
) -> Option<&'a Transition> {
    transitions.iter().find(|t| {
        let target = t.to.name.to_lowercase();
        keywords.iter().any(|k| target.contains(k))
    })
}

fn match_epic_field(fields: &[FieldRef]) -> Option<String> {
    fields
        .iter()
        .find(|f| f.name.eq_ignore_ascii_case(EPIC_NAME_FIELD))
        .map(|f| f.id.clone())
}
