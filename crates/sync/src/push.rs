//! Push engine: converts a finding into a create/update against the
//! tracker while maintaining the durable link record.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::client::TrackerClient;
use crate::config::{ConfigError, TrackerConfiguration};
use crate::error::SyncError;
use crate::mapper::{transition_for, DesiredTransition};
use crate::models::{Finding, FindingLink, FindingStatus, ProjectLink, SyncState};
use crate::store::LinkStore;
use crate::template::{content_hash, render_issue};

/// What a push actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushAction {
    /// A new issue was created and linked
    Created,
    /// The linked issue was updated
    Updated,
    /// Content hash matched; no network call was made
    Unchanged,
}

/// Result of a successful push.
#[derive(Debug, Clone)]
pub struct PushOutcome {
    /// The link record after the push
    pub link: FindingLink,
    /// What happened
    pub action: PushAction,
}

/// Pushes findings to the tracker.
pub struct PushEngine {
    links: Arc<dyn LinkStore>,
}

impl PushEngine {
    /// Create a push engine over a link store.
    #[must_use]
    pub fn new(links: Arc<dyn LinkStore>) -> Self {
        Self { links }
    }

    /// Push a finding, creating or updating its tracker issue.
    ///
    /// The configuration completeness gate runs before any network call;
    /// an incomplete configuration is a `Configuration` error, never a
    /// silent default. An unchanged content hash short-circuits without
    /// touching the network.
    ///
    /// After a successful create/update the issue state is aligned with
    /// the finding when the matching transition is configured: an
    /// Accepted/FalsePositive finding closes the issue, an Active finding
    /// reopens a resolved one. Without configured transition IDs the
    /// issue state is left alone.
    ///
    /// # Errors
    /// Returns the taxonomy error observed; on `NotFound` the link is
    /// additionally flipped to `Error` (the issue was deleted on the
    /// tracker side and requires a manual re-link).
    #[instrument(skip(self, client, finding, config, project), fields(finding_id = %finding.id))]
    pub async fn push(
        &self,
        client: &TrackerClient,
        finding: &Finding,
        config: &TrackerConfiguration,
        project: &ProjectLink,
    ) -> Result<PushOutcome, SyncError> {
        let blocking: Vec<ConfigError> = config
            .completeness_errors()
            .into_iter()
            .filter(ConfigError::blocks_activation)
            .collect();
        if !blocking.is_empty() {
            let detail: Vec<String> = blocking.iter().map(ToString::to_string).collect();
            return Err(SyncError::Configuration(format!(
                "configuration '{}' is incomplete: {}",
                config.name,
                detail.join("; ")
            )));
        }

        let rendered = render_issue(finding, config)?;
        let hash = content_hash(finding, config);

        if let Some(link) = self.links.link_for_finding(finding.id).await {
            if link.content_hash == hash && link.sync_state == SyncState::Linked {
                debug!(issue_key = %link.issue_key, "Content hash unchanged, skipping push");
                return Ok(PushOutcome {
                    link,
                    action: PushAction::Unchanged,
                });
            }

            match client.update_issue(&link.issue_key, &rendered).await {
                Ok(()) => {}
                Err(SyncError::NotFound(detail)) => {
                    warn!(issue_key = %link.issue_key, "Linked issue missing on tracker");
                    self.links
                        .mark_error(&link.issue_key, &format!("issue missing: {detail}"))
                        .await?;
                    return Err(SyncError::NotFound(detail));
                }
                Err(e) => return Err(e),
            }

            Self::align_issue_state(client, finding, config, &link.issue_key).await?;

            let updated = FindingLink {
                content_hash: hash,
                last_pushed_at: Some(Utc::now()),
                sync_state: SyncState::Linked,
                error: None,
                ..link
            };
            self.links.record_push(updated.clone()).await?;
            info!(issue_key = %updated.issue_key, "Updated tracker issue");
            return Ok(PushOutcome {
                link: updated,
                action: PushAction::Updated,
            });
        }

        let created = client
            .create_issue(&project.issue_key_prefix, &config.default_issue_type, &rendered)
            .await?;

        // A freshly created issue is open; a non-Active finding closes it
        // right away when the transition is configured.
        if finding.status != FindingStatus::Active {
            if let Some(transition_id) = transition_for(DesiredTransition::Close, config) {
                client.transition_issue(&created.key, transition_id).await?;
                info!(issue_key = %created.key, "Closed issue for resolved finding");
            }
        }

        let link = FindingLink {
            finding_id: finding.id,
            project_scope: finding.project_scope.clone(),
            issue_key: created.key,
            content_hash: hash,
            last_pushed_at: Some(Utc::now()),
            last_pulled_at: None,
            sync_state: SyncState::Linked,
            superseded: false,
            error: None,
        };
        self.links.record_push(link.clone()).await?;
        info!(issue_key = %link.issue_key, "Created and linked tracker issue");
        Ok(PushOutcome {
            link,
            action: PushAction::Created,
        })
    }

    /// Reopen or close the issue so its state tracks the finding's.
    ///
    /// Only runs when the matching transition ID is configured, and only
    /// transitions when the remote state actually disagrees (a resolution
    /// on the issue is what marks it closed).
    async fn align_issue_state(
        client: &TrackerClient,
        finding: &Finding,
        config: &TrackerConfiguration,
        issue_key: &str,
    ) -> Result<(), SyncError> {
        let (desired, want_resolved) = match finding.status {
            FindingStatus::Active => (DesiredTransition::Reopen, false),
            FindingStatus::Accepted | FindingStatus::FalsePositive => {
                (DesiredTransition::Close, true)
            }
        };
        let Some(transition_id) = transition_for(desired, config) else {
            return Ok(());
        };

        let remote = client.get_issue(issue_key).await?;
        if remote.fields.resolution.is_some() != want_resolved {
            client.transition_issue(issue_key, transition_id).await?;
            info!(issue_key = %issue_key, transition = ?desired, "Transitioned issue to match finding");
        } else {
            debug!(issue_key = %issue_key, "Issue state already matches finding");
        }
        Ok(())
    }
}
