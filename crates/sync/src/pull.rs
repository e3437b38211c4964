//! Pull engine: applies tracker-originated change notifications to
//! findings.
//!
//! Tracker notification delivery is at-least-once and may reorder, so
//! events for one issue key are applied in non-decreasing timestamp order
//! and anything older than the link's `last_pulled_at` is dropped.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::config::TrackerConfiguration;
use crate::error::SyncError;
use crate::mapper::{resolution_effect, ResolutionEffect};
use crate::models::{FindingStatus, TrackerEvent, TrackerEventKind};
use crate::store::{FindingStore, LinkStore};

/// What applying an event did to the finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Key not linked here; the issue belongs to an unrelated tracker use
    Ignored,
    /// Event older than the last applied one for this key; dropped
    Stale,
    /// Event older than the last local push; dropped under last-writer-wins
    ConflictDropped,
    /// Event applied, status unchanged
    Unchanged,
    /// Event applied, finding status changed
    StatusChanged(FindingStatus),
}

/// Applies inbound tracker events.
pub struct PullEngine {
    findings: Arc<dyn FindingStore>,
    links: Arc<dyn LinkStore>,
}

impl PullEngine {
    /// Create a pull engine over the finding and link stores.
    #[must_use]
    pub fn new(findings: Arc<dyn FindingStore>, links: Arc<dyn LinkStore>) -> Self {
        Self { findings, links }
    }

    /// Apply one tracker event to the linked finding.
    ///
    /// # Errors
    /// Returns store errors; unknown keys and suppressed events are not
    /// errors.
    #[instrument(skip(self, event, config), fields(issue_key = %event.issue_key))]
    pub async fn apply_event(
        &self,
        event: &TrackerEvent,
        config: &TrackerConfiguration,
    ) -> Result<ApplyOutcome, SyncError> {
        let Some(link) = self.links.link_for_issue(&event.issue_key).await else {
            debug!("No link for issue key, ignoring event");
            return Ok(ApplyOutcome::Ignored);
        };

        if let Some(last_pulled) = link.last_pulled_at {
            if event.timestamp < last_pulled {
                debug!(
                    event_ts = %event.timestamp,
                    last_pulled = %last_pulled,
                    "Dropping stale event"
                );
                return Ok(ApplyOutcome::Stale);
            }
        }

        // Last-writer-wins: a local push newer than the event means the
        // remote change lost. Logged, never silently discarded.
        if let Some(last_pushed) = link.last_pushed_at {
            if event.timestamp < last_pushed {
                warn!(
                    event_ts = %event.timestamp,
                    last_pushed = %last_pushed,
                    new_value = %event.new_value,
                    "Remote change lost to newer local push (last-writer-wins)"
                );
                return Ok(ApplyOutcome::ConflictDropped);
            }
        }

        let outcome = match event.kind {
            TrackerEventKind::StatusChanged | TrackerEventKind::ResolutionSet => {
                match resolution_effect(&event.new_value, config) {
                    ResolutionEffect::Accept => {
                        self.findings
                            .write_finding_status(link.finding_id, FindingStatus::Accepted)
                            .await?;
                        info!(finding_id = %link.finding_id, "Finding accepted via tracker resolution");
                        ApplyOutcome::StatusChanged(FindingStatus::Accepted)
                    }
                    ResolutionEffect::MarkFalsePositive => {
                        self.findings
                            .write_finding_status(link.finding_id, FindingStatus::FalsePositive)
                            .await?;
                        info!(finding_id = %link.finding_id, "Finding marked false positive via tracker resolution");
                        ApplyOutcome::StatusChanged(FindingStatus::FalsePositive)
                    }
                    ResolutionEffect::None => ApplyOutcome::Unchanged,
                }
            }
            // Comment events are routed to the note synchronizer by the
            // executor; seeing one here only advances the pull cursor.
            TrackerEventKind::CommentAdded => ApplyOutcome::Unchanged,
        };

        self.links
            .record_pull(&event.issue_key, event.timestamp)
            .await?;
        Ok(outcome)
    }
}
