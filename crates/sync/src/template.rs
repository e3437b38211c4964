//! Issue body rendering and content hashing.
//!
//! The content hash covers exactly the fields that affect the rendered
//! issue; an unchanged hash lets the push engine short-circuit without a
//! network call.

use sha2::{Digest, Sha256};

use crate::config::{IssueTemplate, TrackerConfiguration};
use crate::error::SyncError;
use crate::mapper::priority_for;
use crate::models::Finding;

/// Maximum summary length in the limited template.
const LIMITED_SUMMARY_CHARS: usize = 280;

/// An issue payload ready for the tracker, priority already mapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedIssue {
    /// Issue summary line
    pub summary: String,
    /// Issue body
    pub description: String,
    /// Tracker priority name
    pub priority: String,
}

/// Render a finding into an issue payload under the configuration.
///
/// # Errors
/// Returns `SyncError::Configuration` if the finding's severity has no
/// priority mapping.
pub fn render_issue(
    finding: &Finding,
    config: &TrackerConfiguration,
) -> Result<RenderedIssue, SyncError> {
    let priority = priority_for(finding.severity, config)?.to_string();

    let mut description = match config.issue_template {
        IssueTemplate::Full => format!(
            "Severity: {}\nStatus: {:?}\nLast updated: {}\n\n{}",
            finding.severity,
            finding.status,
            finding.updated_at.to_rfc3339(),
            finding.description,
        ),
        IssueTemplate::Limited => {
            let summary: String = finding.description.chars().take(LIMITED_SUMMARY_CHARS).collect();
            format!("Severity: {}\n\n{}", finding.severity, summary)
        }
    };

    if let Some(text) = &config.standard_text {
        description.push_str("\n\n");
        description.push_str(text);
    }

    Ok(RenderedIssue {
        summary: finding.title.clone(),
        description,
        priority,
    })
}

/// Hash of the push-relevant content of a finding.
///
/// Covers title, description, severity, template mode and standard text.
/// Fields are separated by an unprintable delimiter so concatenation
/// boundaries cannot collide.
#[must_use]
pub fn content_hash(finding: &Finding, config: &TrackerConfiguration) -> String {
    let mut hasher = Sha256::new();
    for part in [
        finding.title.as_str(),
        finding.description.as_str(),
        finding.severity.as_str(),
        match config.issue_template {
            IssueTemplate::Full => "full",
            IssueTemplate::Limited => "limited",
        },
        config.standard_text.as_deref().unwrap_or(""),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())
}
