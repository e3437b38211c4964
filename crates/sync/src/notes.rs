//! Bidirectional note/comment mirroring with loop suppression.
//!
//! Loop prevention rests entirely on the origin tag assigned when a note
//! is persisted: a `Remote` note (born from an inbound comment) is never
//! pushed outward, and a `Local` note is pushed at most once. The tag is
//! written before any network call so retries and crash recovery cannot
//! lose it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::client::TrackerClient;
use crate::error::SyncError;
use crate::models::{Finding, Note, NoteOrigin, NoteSyncState};
use crate::store::NoteStore;

/// Mirrors notes between findings and tracker comments.
pub struct NoteSynchronizer {
    notes: Arc<dyn NoteStore>,
}

impl NoteSynchronizer {
    /// Create a synchronizer over a note store.
    #[must_use]
    pub fn new(notes: Arc<dyn NoteStore>) -> Self {
        Self { notes }
    }

    /// Deliver a local note to the tracker as a comment.
    ///
    /// Returns `true` if a comment was sent, `false` if the note was
    /// already pushed or is remote-origin (both are no-ops, not errors,
    /// so retried jobs converge).
    ///
    /// # Errors
    /// Returns the tracker error; the note stays `Pending` and the job is
    /// retried by the scheduler.
    #[instrument(skip(self, client), fields(note_id = %note_id, issue_key = %issue_key))]
    pub async fn push_note(
        &self,
        client: &TrackerClient,
        note_id: Uuid,
        issue_key: &str,
    ) -> Result<bool, SyncError> {
        let note = self
            .notes
            .note(note_id)
            .await
            .ok_or_else(|| SyncError::NotFound(format!("note {note_id}")))?;

        if note.origin == NoteOrigin::Remote {
            debug!("Remote-origin note, never pushed outward");
            return Ok(false);
        }
        if note.state == NoteSyncState::Pushed {
            debug!("Note already delivered, skipping");
            return Ok(false);
        }

        client.add_comment(issue_key, &note.body).await?;
        self.notes.mark_pushed(note_id).await?;
        info!("Note delivered as tracker comment");
        Ok(true)
    }

    /// Persist an inbound tracker comment as a remote-origin note.
    ///
    /// The note is stored tagged `Remote` before anything else happens,
    /// which is what keeps it out of every outbound path.
    ///
    /// # Errors
    /// Returns store errors.
    pub async fn ingest_comment(
        &self,
        finding_id: Uuid,
        body: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Note, SyncError> {
        let note = Note::remote(finding_id, body, created_at);
        self.notes.add_note(note.clone()).await?;
        debug!(note_id = %note.id, finding_id = %finding_id, "Ingested tracker comment");
        Ok(note)
    }

    /// Create and persist a local SLA breach note, pending delivery.
    ///
    /// # Errors
    /// Returns store errors.
    pub async fn record_sla_breach(&self, finding: &Finding) -> Result<Note, SyncError> {
        let note = Note::local(finding.id, sla_breach_body(finding));
        self.notes.add_note(note.clone()).await?;
        Ok(note)
    }
}

/// Comment body for an SLA breach notification.
#[must_use]
pub fn sla_breach_body(finding: &Finding) -> String {
    format!(
        "SLA breached for finding '{}' (severity {}). Remediation is overdue.",
        finding.title, finding.severity
    )
}
