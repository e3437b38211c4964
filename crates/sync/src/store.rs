//! Storage seams for findings, links and notes.
//!
//! The engine consumes persistence through these narrow traits; only
//! in-memory implementations live here. The link store is the single
//! point of serialization for link records: every mutation replaces the
//! whole record under one lock acquisition so hash, timestamps and state
//! are recorded atomically with the observed network outcome.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::SyncError;
use crate::models::{Finding, FindingLink, FindingStatus, Note, NoteSyncState, SyncState};

/// Read/write access to findings owned by the persistence layer.
#[async_trait]
pub trait FindingStore: Send + Sync {
    /// Read a finding by ID.
    async fn read_finding(&self, id: Uuid) -> Result<Finding, SyncError>;

    /// Write a finding's status.
    async fn write_finding_status(&self, id: Uuid, status: FindingStatus)
        -> Result<(), SyncError>;

    /// Project scope owning a finding.
    async fn read_project_scope(&self, finding_id: Uuid) -> Result<String, SyncError>;
}

/// Durable finding/issue link records.
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Non-superseded link for a finding, if any.
    async fn link_for_finding(&self, finding_id: Uuid) -> Option<FindingLink>;

    /// Non-superseded link for an issue key, if any.
    async fn link_for_issue(&self, issue_key: &str) -> Option<FindingLink>;

    /// Record a push outcome, replacing the link record atomically.
    async fn record_push(&self, link: FindingLink) -> Result<(), SyncError>;

    /// Advance `last_pulled_at` for a link.
    async fn record_pull(
        &self,
        issue_key: &str,
        pulled_at: DateTime<Utc>,
    ) -> Result<(), SyncError>;

    /// Flip a link to the `Error` state with an operator-visible message.
    async fn mark_error(&self, issue_key: &str, message: &str) -> Result<(), SyncError>;

    /// Soft-delete the link for a finding (explicit unlink or deletion).
    async fn unlink(&self, finding_id: Uuid) -> Result<(), SyncError>;

    /// Links in the `Error` state for a project scope.
    async fn errors_for_scope(&self, project_scope: &str) -> Vec<FindingLink>;
}

/// Notes attached to findings.
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Read a note by ID.
    async fn note(&self, id: Uuid) -> Option<Note>;

    /// Persist a note. Must complete before any outbound delivery starts.
    async fn add_note(&self, note: Note) -> Result<(), SyncError>;

    /// Mark a note delivered so retries never re-send it.
    async fn mark_pushed(&self, note_id: Uuid) -> Result<(), SyncError>;

    /// Local notes not yet delivered, for a finding.
    async fn pending_local_notes(&self, finding_id: Uuid) -> Vec<Note>;
}

/// In-memory finding store for tests and the default service wiring.
#[derive(Default)]
pub struct InMemoryFindingStore {
    findings: RwLock<HashMap<Uuid, Finding>>,
}

impl InMemoryFindingStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a finding.
    pub fn insert(&self, finding: Finding) {
        self.findings
            .write()
            .expect("finding lock")
            .insert(finding.id, finding);
    }
}

#[async_trait]
impl FindingStore for InMemoryFindingStore {
    async fn read_finding(&self, id: Uuid) -> Result<Finding, SyncError> {
        self.findings
            .read()
            .expect("finding lock")
            .get(&id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("finding {id}")))
    }

    async fn write_finding_status(
        &self,
        id: Uuid,
        status: FindingStatus,
    ) -> Result<(), SyncError> {
        let mut findings = self.findings.write().expect("finding lock");
        let finding = findings
            .get_mut(&id)
            .ok_or_else(|| SyncError::NotFound(format!("finding {id}")))?;
        finding.status = status;
        finding.updated_at = Utc::now();
        Ok(())
    }

    async fn read_project_scope(&self, finding_id: Uuid) -> Result<String, SyncError> {
        self.findings
            .read()
            .expect("finding lock")
            .get(&finding_id)
            .map(|f| f.project_scope.clone())
            .ok_or_else(|| SyncError::NotFound(format!("finding {finding_id}")))
    }
}

/// In-memory link store.
#[derive(Default)]
pub struct InMemoryLinkStore {
    // Keyed by finding; the issue-key index is derived on lookup since the
    // store stays small in-process.
    links: RwLock<HashMap<Uuid, FindingLink>>,
}

impl InMemoryLinkStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LinkStore for InMemoryLinkStore {
    async fn link_for_finding(&self, finding_id: Uuid) -> Option<FindingLink> {
        self.links
            .read()
            .expect("link lock")
            .get(&finding_id)
            .filter(|l| !l.superseded)
            .cloned()
    }

    async fn link_for_issue(&self, issue_key: &str) -> Option<FindingLink> {
        self.links
            .read()
            .expect("link lock")
            .values()
            .find(|l| l.issue_key == issue_key && !l.superseded)
            .cloned()
    }

    async fn record_push(&self, link: FindingLink) -> Result<(), SyncError> {
        let mut links = self.links.write().expect("link lock");

        // An issue key may be linked to at most one finding at a time.
        if let Some(existing) = links
            .values()
            .find(|l| l.issue_key == link.issue_key && !l.superseded)
        {
            if existing.finding_id != link.finding_id {
                return Err(SyncError::Conflict {
                    issue_key: link.issue_key.clone(),
                    detail: format!("already linked to finding {}", existing.finding_id),
                });
            }
        }

        links.insert(link.finding_id, link);
        Ok(())
    }

    async fn record_pull(
        &self,
        issue_key: &str,
        pulled_at: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let mut links = self.links.write().expect("link lock");
        let link = links
            .values_mut()
            .find(|l| l.issue_key == issue_key && !l.superseded)
            .ok_or_else(|| SyncError::NotFound(format!("link for issue {issue_key}")))?;

        if link.last_pulled_at.is_none_or(|t| pulled_at > t) {
            link.last_pulled_at = Some(pulled_at);
        }
        Ok(())
    }

    async fn mark_error(&self, issue_key: &str, message: &str) -> Result<(), SyncError> {
        let mut links = self.links.write().expect("link lock");
        let link = links
            .values_mut()
            .find(|l| l.issue_key == issue_key && !l.superseded)
            .ok_or_else(|| SyncError::NotFound(format!("link for issue {issue_key}")))?;
        link.sync_state = SyncState::Error;
        link.error = Some(message.to_string());
        Ok(())
    }

    async fn unlink(&self, finding_id: Uuid) -> Result<(), SyncError> {
        let mut links = self.links.write().expect("link lock");
        let link = links
            .get_mut(&finding_id)
            .ok_or_else(|| SyncError::NotFound(format!("link for finding {finding_id}")))?;
        link.superseded = true;
        Ok(())
    }

    async fn errors_for_scope(&self, project_scope: &str) -> Vec<FindingLink> {
        self.links
            .read()
            .expect("link lock")
            .values()
            .filter(|l| {
                !l.superseded
                    && l.project_scope == project_scope
                    && l.sync_state == SyncState::Error
            })
            .cloned()
            .collect()
    }
}

/// In-memory note store.
#[derive(Default)]
pub struct InMemoryNoteStore {
    notes: RwLock<HashMap<Uuid, Note>>,
}

impl InMemoryNoteStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NoteStore for InMemoryNoteStore {
    async fn note(&self, id: Uuid) -> Option<Note> {
        self.notes.read().expect("note lock").get(&id).cloned()
    }

    async fn add_note(&self, note: Note) -> Result<(), SyncError> {
        self.notes.write().expect("note lock").insert(note.id, note);
        Ok(())
    }

    async fn mark_pushed(&self, note_id: Uuid) -> Result<(), SyncError> {
        let mut notes = self.notes.write().expect("note lock");
        let note = notes
            .get_mut(&note_id)
            .ok_or_else(|| SyncError::NotFound(format!("note {note_id}")))?;
        note.state = NoteSyncState::Pushed;
        Ok(())
    }

    async fn pending_local_notes(&self, finding_id: Uuid) -> Vec<Note> {
        self.notes
            .read()
            .expect("note lock")
            .values()
            .filter(|n| {
                n.finding_id == finding_id
                    && n.origin == crate::models::NoteOrigin::Local
                    && n.state == NoteSyncState::Pending
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NoteOrigin;

    fn link(finding_id: Uuid, issue_key: &str) -> FindingLink {
        FindingLink {
            finding_id,
            project_scope: "acme-webapp".to_string(),
            issue_key: issue_key.to_string(),
            content_hash: "abc".to_string(),
            last_pushed_at: Some(Utc::now()),
            last_pulled_at: None,
            sync_state: SyncState::Linked,
            superseded: false,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_one_finding_one_link() {
        let store = InMemoryLinkStore::new();
        let finding_id = Uuid::new_v4();
        store.record_push(link(finding_id, "SEC-1")).await.unwrap();

        let mut updated = link(finding_id, "SEC-1");
        updated.content_hash = "def".to_string();
        store.record_push(updated).await.unwrap();

        let got = store.link_for_finding(finding_id).await.unwrap();
        assert_eq!(got.content_hash, "def");
    }

    #[tokio::test]
    async fn test_issue_key_linked_to_one_finding() {
        let store = InMemoryLinkStore::new();
        store
            .record_push(link(Uuid::new_v4(), "SEC-1"))
            .await
            .unwrap();

        let result = store.record_push(link(Uuid::new_v4(), "SEC-1")).await;
        assert!(matches!(result, Err(SyncError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_unlink_is_soft() {
        let store = InMemoryLinkStore::new();
        let finding_id = Uuid::new_v4();
        store.record_push(link(finding_id, "SEC-1")).await.unwrap();
        store.unlink(finding_id).await.unwrap();

        assert!(store.link_for_finding(finding_id).await.is_none());
        assert!(store.link_for_issue("SEC-1").await.is_none());
    }

    #[tokio::test]
    async fn test_record_pull_never_regresses() {
        let store = InMemoryLinkStore::new();
        let finding_id = Uuid::new_v4();
        store.record_push(link(finding_id, "SEC-1")).await.unwrap();

        let newer = Utc::now();
        let older = newer - chrono::Duration::seconds(60);
        store.record_pull("SEC-1", newer).await.unwrap();
        store.record_pull("SEC-1", older).await.unwrap();

        let got = store.link_for_issue("SEC-1").await.unwrap();
        assert_eq!(got.last_pulled_at, Some(newer));
    }

    #[tokio::test]
    async fn test_error_listing_scoped() {
        let store = InMemoryLinkStore::new();
        let finding_id = Uuid::new_v4();
        store.record_push(link(finding_id, "SEC-1")).await.unwrap();
        let mut other = link(Uuid::new_v4(), "OPS-9");
        other.project_scope = "ops-infra".to_string();
        store.record_push(other).await.unwrap();

        store.mark_error("SEC-1", "issue deleted remotely").await.unwrap();
        store.mark_error("OPS-9", "issue deleted remotely").await.unwrap();

        let errors = store.errors_for_scope("acme-webapp").await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].issue_key, "SEC-1");
        assert_eq!(errors[0].sync_state, SyncState::Error);
    }

    #[tokio::test]
    async fn test_pending_local_notes_excludes_remote_and_pushed() {
        let store = InMemoryNoteStore::new();
        let finding_id = Uuid::new_v4();

        let local = Note::local(finding_id, "pending");
        let local_id = local.id;
        store.add_note(local).await.unwrap();
        store
            .add_note(Note::remote(finding_id, "mirrored", Utc::now()))
            .await
            .unwrap();

        let pending = store.pending_local_notes(finding_id).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].origin, NoteOrigin::Local);

        store.mark_pushed(local_id).await.unwrap();
        assert!(store.pending_local_notes(finding_id).await.is_empty());
    }
}
