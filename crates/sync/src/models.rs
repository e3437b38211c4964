//! Domain records owned by the synchronization engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Informational finding
    Info,
    /// Low severity
    Low,
    /// Medium severity
    Medium,
    /// High severity
    High,
    /// Critical severity
    Critical,
}

impl Severity {
    /// All severities, used to check severity/priority mapping totality.
    pub const ALL: [Self; 5] = [
        Self::Info,
        Self::Low,
        Self::Medium,
        Self::High,
        Self::Critical,
    ];

    /// Stable display name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "Info",
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Critical => "Critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a finding as owned by the vulnerability-management side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FindingStatus {
    /// Open and unresolved
    Active,
    /// Risk accepted via the tracker resolution
    Accepted,
    /// Marked false positive via the tracker resolution
    FalsePositive,
}

/// A security finding, read from the persistence layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Finding ID
    pub id: Uuid,
    /// Owning project scope (the finding-owning grouping)
    pub project_scope: String,
    /// Short title
    pub title: String,
    /// Full description
    pub description: String,
    /// Severity
    pub severity: Severity,
    /// Current status
    pub status: FindingStatus,
    /// Last local modification time
    pub updated_at: DateTime<Utc>,
}

/// Synchronization state of a finding/issue link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// No issue exists for the finding
    Unlinked,
    /// Linked and in sync as of the recorded hash
    Linked,
    /// A push is queued or in flight
    PendingPush,
    /// A pull apply is queued or in flight
    PendingPull,
    /// Terminal error, sync suspended until operator action
    Error,
}

/// Durable association between one finding and one tracker issue key.
///
/// A finding has at most one non-superseded link; an issue key is linked to
/// at most one finding at a time. Created on first successful push, soft
/// deleted only on finding deletion or explicit unlink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingLink {
    /// Linked finding
    pub finding_id: Uuid,
    /// Owning project scope, kept for the operator error list
    pub project_scope: String,
    /// Tracker issue key (e.g. "SEC-42")
    pub issue_key: String,
    /// Hash of the last successfully pushed payload
    pub content_hash: String,
    /// Time of the last successful outbound push
    pub last_pushed_at: Option<DateTime<Utc>>,
    /// Timestamp of the newest applied inbound event
    pub last_pulled_at: Option<DateTime<Utc>>,
    /// Current sync state
    pub sync_state: SyncState,
    /// Soft-delete marker
    #[serde(default)]
    pub superseded: bool,
    /// Terminal error message, if `sync_state` is `Error`
    #[serde(default)]
    pub error: Option<String>,
}

/// Binds a tracker configuration to a project scope.
///
/// A project has at most one active link; re-linking supersedes the prior
/// link, never merges with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectLink {
    /// Project scope this link covers
    pub project_scope: String,
    /// Name of the tracker configuration to use
    pub config_name: String,
    /// Prefix used to validate inbound issue keys (e.g. "SEC")
    pub issue_key_prefix: String,
    /// Whether the link is active
    pub active: bool,
}

/// Kind of queued synchronization work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    /// Outbound create/update of a tracker issue
    Push,
    /// Apply an inbound tracker event to a finding
    PullApply,
    /// Mirror a note to or from the tracker
    CommentSync,
}

/// A queued unit of synchronization work.
///
/// Jobs for the same `target_issue_key` execute strictly sequentially;
/// jobs for different keys may run concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    /// Job ID
    pub id: Uuid,
    /// Kind of work
    pub kind: JobKind,
    /// Issue key this job serializes on
    pub target_issue_key: String,
    /// Tracker configuration the job executes against
    pub config_name: String,
    /// Kind-specific payload envelope
    pub payload: serde_json::Value,
    /// Attempts made so far
    pub attempt_count: u32,
    /// Enqueue time, used for coalescing
    pub enqueued_at: DateTime<Utc>,
    /// Earliest time the next attempt may run
    pub next_attempt_at: DateTime<Utc>,
    /// Set once the job fails terminally
    pub terminal_error: Option<String>,
}

impl SyncJob {
    /// Create a new job ready for immediate execution.
    #[must_use]
    pub fn new(
        kind: JobKind,
        target_issue_key: impl Into<String>,
        config_name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            target_issue_key: target_issue_key.into(),
            config_name: config_name.into(),
            payload,
            attempt_count: 0,
            enqueued_at: now,
            next_attempt_at: now,
            terminal_error: None,
        }
    }
}

/// Origin of a note, assigned at creation and never changed.
///
/// This tag is the sole loop-prevention mechanism for comment mirroring:
/// a `Remote` note is never pushed back to the tracker it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteOrigin {
    /// Created locally on the finding
    Local,
    /// Created from an inbound tracker comment
    Remote,
}

/// Delivery state of a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteSyncState {
    /// Not yet delivered to the tracker
    Pending,
    /// Delivered exactly once; retries must not re-deliver
    Pushed,
}

/// A text note attached to a finding, mirrored as a tracker comment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    /// Note ID
    pub id: Uuid,
    /// Finding the note belongs to
    pub finding_id: Uuid,
    /// Note body
    pub body: String,
    /// Origin tag
    pub origin: NoteOrigin,
    /// Delivery state
    pub state: NoteSyncState,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Note {
    /// Create a local note pending delivery to the tracker.
    #[must_use]
    pub fn local(finding_id: Uuid, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            finding_id,
            body: body.into(),
            origin: NoteOrigin::Local,
            state: NoteSyncState::Pending,
            created_at: Utc::now(),
        }
    }

    /// Create a note mirroring an inbound tracker comment.
    ///
    /// Remote notes are created already `Pushed` so no delivery path ever
    /// sends them back out.
    #[must_use]
    pub fn remote(finding_id: Uuid, body: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            finding_id,
            body: body.into(),
            origin: NoteOrigin::Remote,
            state: NoteSyncState::Pushed,
            created_at,
        }
    }
}

/// Kind of inbound tracker change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerEventKind {
    /// Issue status changed
    StatusChanged,
    /// Resolution applied to the issue
    ResolutionSet,
    /// Comment added to the issue
    CommentAdded,
}

/// A tracker-originated change notification, from webhook or poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerEvent {
    /// Issue the event belongs to
    pub issue_key: String,
    /// Kind of change
    pub kind: TrackerEventKind,
    /// New status or resolution name, or comment body
    pub new_value: String,
    /// Tracker-side event time
    pub timestamp: DateTime<Utc>,
}
