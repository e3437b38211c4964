//! Job executor wiring the scheduler to the engines.
//!
//! Each queued job resolves its tracker configuration by name at execution
//! time, so a configuration replaced between enqueue and execution is
//! picked up and one flagged invalid fails fast without a network call.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use tracker_sync::config::TrackerConfiguration;
use tracker_sync::models::{JobKind, SyncJob, TrackerEvent, TrackerEventKind};
use tracker_sync::pull::ApplyOutcome;
use tracker_sync::store::{FindingStore, LinkStore};
use tracker_sync::{
    ConfigStore, JobExecutor, NoteSynchronizer, PullEngine, PushEngine, SyncError, TrackerClient,
};

/// Payload envelope for a push job.
#[derive(Debug, Serialize, Deserialize)]
pub struct PushPayload {
    /// Finding to push.
    pub finding_id: Uuid,
}

/// Payload envelope for a comment sync job.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommentPayload {
    /// Note to deliver.
    pub note_id: Uuid,
}

/// Executes queued jobs against the push/pull/note engines.
pub struct EngineExecutor {
    configs: Arc<dyn ConfigStore>,
    findings: Arc<dyn FindingStore>,
    links: Arc<dyn LinkStore>,
    push: PushEngine,
    pull: PullEngine,
    notes: NoteSynchronizer,
}

impl EngineExecutor {
    /// Wire an executor over the stores and engines.
    #[must_use]
    pub fn new(
        configs: Arc<dyn ConfigStore>,
        findings: Arc<dyn FindingStore>,
        links: Arc<dyn LinkStore>,
        push: PushEngine,
        pull: PullEngine,
        notes: NoteSynchronizer,
    ) -> Self {
        Self {
            configs,
            findings,
            links,
            push,
            pull,
            notes,
        }
    }

    async fn run_push(
        &self,
        client: &TrackerClient,
        config: &TrackerConfiguration,
        job: &SyncJob,
    ) -> Result<(), SyncError> {
        let payload: PushPayload = serde_json::from_value(job.payload.clone())?;
        let finding = self.findings.read_finding(payload.finding_id).await?;

        let project = self
            .configs
            .project_link(&finding.project_scope)
            .ok_or_else(|| {
                SyncError::Configuration(format!(
                    "no project link for scope '{}'",
                    finding.project_scope
                ))
            })?;
        if !project.active {
            return Err(SyncError::Configuration(format!(
                "project link for scope '{}' is inactive",
                finding.project_scope
            )));
        }

        self.push
            .push(client, &finding, config, &project)
            .await
            .map(|_| ())
    }

    async fn run_pull_apply(
        &self,
        config: &TrackerConfiguration,
        job: &SyncJob,
    ) -> Result<(), SyncError> {
        let event: TrackerEvent = serde_json::from_value(job.payload.clone())?;
        let outcome = self.pull.apply_event(&event, config).await?;

        // Comment bodies become remote-origin notes; the origin tag keeps
        // them out of every outbound path.
        if event.kind == TrackerEventKind::CommentAdded
            && config.note_sync_enabled
            && matches!(
                outcome,
                ApplyOutcome::Unchanged | ApplyOutcome::StatusChanged(_)
            )
        {
            if let Some(link) = self.links.link_for_issue(&event.issue_key).await {
                self.notes
                    .ingest_comment(link.finding_id, &event.new_value, event.timestamp)
                    .await?;
            }
        }
        Ok(())
    }

    async fn run_comment_sync(
        &self,
        client: &TrackerClient,
        config: &TrackerConfiguration,
        job: &SyncJob,
    ) -> Result<(), SyncError> {
        if !config.note_sync_enabled {
            debug!(config = %config.name, "Note sync disabled, dropping comment job");
            return Ok(());
        }
        let payload: CommentPayload = serde_json::from_value(job.payload.clone())?;
        self.notes
            .push_note(client, payload.note_id, &job.target_issue_key)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl JobExecutor for EngineExecutor {
    #[instrument(skip(self, job), fields(job_id = %job.id, kind = ?job.kind, issue_key = %job.target_issue_key))]
    async fn execute(&self, job: &SyncJob) -> Result<(), SyncError> {
        if self.configs.is_invalid(&job.config_name) {
            return Err(SyncError::Configuration(format!(
                "configuration '{}' is flagged invalid",
                job.config_name
            )));
        }
        let config = self.configs.get_by_name(&job.config_name).ok_or_else(|| {
            SyncError::Configuration(format!("unknown configuration '{}'", job.config_name))
        })?;
        let client = TrackerClient::new(&config)?;

        let result = match job.kind {
            JobKind::Push => self.run_push(&client, &config, job).await,
            JobKind::PullApply => self.run_pull_apply(&config, job).await,
            JobKind::CommentSync => self.run_comment_sync(&client, &config, job).await,
        };

        if let Err(SyncError::Authentication(detail)) = &result {
            warn!(config = %config.name, detail = %detail, "Credential rejected, flagging configuration invalid");
            self.configs.flag_invalid(&config.name);
        }
        result
    }
}
