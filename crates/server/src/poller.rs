//! Poll-mode pull fallback for trackers without webhook delivery.
//!
//! Each sweep queries every linked project for issues updated since the
//! scope's cursor and synthesizes tracker events into pull-apply jobs, so
//! polled changes serialize on the same issue keys as webhook traffic.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use tracker_sync::client::RemoteIssue;
use tracker_sync::models::{JobKind, SyncJob, TrackerEvent, TrackerEventKind};
use tracker_sync::webhooks::key_matches_prefix;
use tracker_sync::TrackerClient;

use crate::server::AppState;

/// Max consecutive-failure multiplier applied to the poll interval.
const MAX_BACKOFF_FACTOR: u32 = 5;

/// Tracks polling state across sweeps.
#[derive(Debug, Default)]
pub struct PollState {
    /// Per-scope cursor: tracker-side time of the newest issue seen.
    cursors: HashMap<String, DateTime<Utc>>,
    /// Consecutive failure count across all scopes.
    failures: u32,
}

impl PollState {
    /// Cursor for a scope, defaulting to the given start time.
    fn cursor(&self, scope: &str, start: DateTime<Utc>) -> DateTime<Utc> {
        self.cursors.get(scope).copied().unwrap_or(start)
    }

    /// Advance a scope's cursor, never moving it backwards.
    fn advance(&mut self, scope: &str, seen: DateTime<Utc>) {
        let entry = self.cursors.entry(scope.to_string()).or_insert(seen);
        if seen > *entry {
            *entry = seen;
        }
    }

    /// Record a sweep outcome.
    fn record(&mut self, failed: bool) {
        if failed {
            self.failures += 1;
        } else {
            self.failures = 0;
        }
    }

    /// Sleep duration before the next sweep.
    #[must_use]
    pub fn next_delay(&self, interval: Duration) -> Duration {
        interval * (self.failures + 1).min(MAX_BACKOFF_FACTOR)
    }
}

/// Synthesize a tracker event from a polled issue snapshot.
///
/// A set resolution is the interesting signal; otherwise the status name
/// is carried and the mapper decides whether it means anything.
fn event_for_issue(issue: &RemoteIssue) -> TrackerEvent {
    match &issue.fields.resolution {
        Some(resolution) => TrackerEvent {
            issue_key: issue.key.clone(),
            kind: TrackerEventKind::ResolutionSet,
            new_value: resolution.name.clone(),
            timestamp: issue.fields.updated,
        },
        None => TrackerEvent {
            issue_key: issue.key.clone(),
            kind: TrackerEventKind::StatusChanged,
            new_value: issue.fields.status.name.clone(),
            timestamp: issue.fields.updated,
        },
    }
}

/// One polling sweep across all linked projects.
///
/// Failures are recorded per scope and never abort the sweep; the next
/// sweep retries from the unadvanced cursor.
pub async fn poll_once(state: &AppState, poll: &mut PollState, started: DateTime<Utc>) {
    let mut any_failed = false;

    for project in state.configs.project_links() {
        if !project.active {
            continue;
        }
        let Some(config) = state.configs.get_by_name(&project.config_name) else {
            warn!(config = %project.config_name, "Project link names an unknown configuration");
            continue;
        };
        if state.configs.is_invalid(&config.name) {
            debug!(config = %config.name, "Skipping invalid configuration");
            continue;
        }
        let client = match TrackerClient::new(&config) {
            Ok(client) => client,
            Err(e) => {
                warn!(config = %config.name, error = %e, "Cannot build tracker client");
                any_failed = true;
                continue;
            }
        };

        let since = poll.cursor(&project.project_scope, started);
        let issues = match client
            .search_updated_since(&project.issue_key_prefix, since)
            .await
        {
            Ok(issues) => issues,
            Err(e) => {
                warn!(scope = %project.project_scope, error = %e, "Poll query failed");
                any_failed = true;
                continue;
            }
        };

        let mut enqueued = 0usize;
        for issue in &issues {
            if !key_matches_prefix(&issue.key, &project.issue_key_prefix) {
                continue;
            }
            let event = event_for_issue(issue);
            poll.advance(&project.project_scope, event.timestamp);

            let payload = match serde_json::to_value(&event) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(issue_key = %event.issue_key, error = %e, "Cannot serialize event");
                    continue;
                }
            };
            state
                .scheduler
                .enqueue(SyncJob::new(
                    JobKind::PullApply,
                    event.issue_key,
                    project.config_name.clone(),
                    payload,
                ))
                .await;
            enqueued += 1;
        }

        if enqueued > 0 {
            info!(
                scope = %project.project_scope,
                enqueued = enqueued,
                "Enqueued polled tracker events"
            );
        }
    }

    poll.record(any_failed);
}

/// Run the poll loop forever.
pub async fn run_poller(state: AppState, interval_secs: u64) {
    let interval = Duration::from_secs(interval_secs.max(1));
    let mut poll = PollState::default();
    let started = Utc::now();

    info!(interval_secs = interval.as_secs(), "Starting tracker poll loop");
    loop {
        poll_once(&state, &mut poll, started).await;
        tokio::time::sleep(poll.next_delay(interval)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracker_sync::client::{RemoteIssueFields, StatusRef};

    fn issue(key: &str, resolution: Option<&str>, updated: DateTime<Utc>) -> RemoteIssue {
        RemoteIssue {
            key: key.to_string(),
            fields: RemoteIssueFields {
                status: StatusRef {
                    name: "In Progress".to_string(),
                },
                resolution: resolution.map(|r| StatusRef {
                    name: r.to_string(),
                }),
                updated,
            },
        }
    }

    #[test]
    fn test_resolution_wins_over_status() {
        let event = event_for_issue(&issue("SEC-1", Some("Won't Fix"), Utc::now()));
        assert_eq!(event.kind, TrackerEventKind::ResolutionSet);
        assert_eq!(event.new_value, "Won't Fix");
    }

    #[test]
    fn test_unresolved_issue_yields_status_event() {
        let event = event_for_issue(&issue("SEC-1", None, Utc::now()));
        assert_eq!(event.kind, TrackerEventKind::StatusChanged);
        assert_eq!(event.new_value, "In Progress");
    }

    #[test]
    fn test_cursor_never_regresses() {
        let mut state = PollState::default();
        let t1 = Utc::now();
        let t0 = t1 - chrono::Duration::minutes(5);

        state.advance("acme", t1);
        state.advance("acme", t0);
        assert_eq!(state.cursor("acme", t0), t1);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut state = PollState::default();
        let interval = Duration::from_secs(60);
        assert_eq!(state.next_delay(interval), interval);

        state.record(true);
        assert_eq!(state.next_delay(interval), interval * 2);

        for _ in 0..10 {
            state.record(true);
        }
        assert_eq!(state.next_delay(interval), interval * MAX_BACKOFF_FACTOR);

        state.record(false);
        assert_eq!(state.next_delay(interval), interval);
    }
}
