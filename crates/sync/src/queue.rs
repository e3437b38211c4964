//! Sync scheduler and retry queue.
//!
//! Work is queued, never executed inline with the triggering mutation.
//! The scheduler guarantees strict serialization per `target_issue_key`
//! (one driver task per key), runs distinct keys in parallel bounded by a
//! per-configuration semaphore, coalesces superseded pushes, and retries
//! transient failures with capped exponential backoff plus jitter.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::models::{JobKind, SyncJob};
use crate::store::LinkStore;

/// Tunables for retry and parallelism.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Attempts before a transient failure becomes terminal
    pub max_attempts: u32,
    /// First retry delay
    pub base_backoff: Duration,
    /// Backoff cap, before jitter
    pub max_backoff: Duration,
    /// Concurrent jobs per tracker configuration
    pub max_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            max_concurrency: 4,
        }
    }
}

/// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)`, capped,
/// plus up to 50% jitter.
#[must_use]
pub fn backoff_with_jitter(attempt: u32, config: &SchedulerConfig) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let scaled = config
        .base_backoff
        .saturating_mul(2_u32.saturating_pow(exponent));
    let capped = scaled.min(config.max_backoff);

    let half_ms = u64::try_from(capped.as_millis() / 2).unwrap_or(u64::MAX);
    let jitter = rand::rng().random_range(0..=half_ms);
    capped + Duration::from_millis(jitter)
}

/// Executes one job against the engines.
///
/// Implemented by the service wiring; tests install counting executors.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Run the job to completion or failure.
    async fn execute(&self, job: &SyncJob) -> Result<(), SyncError>;
}

struct KeyQueue {
    pending: VecDeque<SyncJob>,
    running: bool,
}

struct Inner {
    queues: Mutex<HashMap<String, KeyQueue>>,
    limiters: Mutex<HashMap<String, Arc<Semaphore>>>,
    // Jobs that failed terminally or exhausted retries. Kept here because
    // a first push for a never-linked finding has no link record to carry
    // the error.
    failed: Mutex<Vec<SyncJob>>,
    executor: Arc<dyn JobExecutor>,
    links: Arc<dyn LinkStore>,
    config: SchedulerConfig,
}

impl Inner {
    async fn limiter_for(&self, config_name: &str) -> Arc<Semaphore> {
        let mut limiters = self.limiters.lock().await;
        limiters
            .entry(config_name.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_concurrency)))
            .clone()
    }
}

/// The work queue shared between the service layer and worker tasks.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<Inner>,
}

impl SyncScheduler {
    /// Create a scheduler over an executor and the link store.
    #[must_use]
    pub fn new(
        executor: Arc<dyn JobExecutor>,
        links: Arc<dyn LinkStore>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(HashMap::new()),
                limiters: Mutex::new(HashMap::new()),
                failed: Mutex::new(Vec::new()),
                executor,
                links,
                config,
            }),
        }
    }

    /// Enqueue a job. Returns immediately; never blocks on network I/O.
    ///
    /// A pending (not yet running) push for the same key is superseded by
    /// a newer one: only the latest payload is sent. Pull applies are
    /// never coalesced since each event carries distinct ordering state.
    pub async fn enqueue(&self, job: SyncJob) {
        let key = job.target_issue_key.clone();
        let mut queues = self.inner.queues.lock().await;
        let entry = queues.entry(key.clone()).or_insert_with(|| KeyQueue {
            pending: VecDeque::new(),
            running: false,
        });

        if job.kind == JobKind::Push {
            if let Some(existing) = entry.pending.iter_mut().find(|j| j.kind == JobKind::Push) {
                if job.enqueued_at >= existing.enqueued_at {
                    debug!(
                        issue_key = %key,
                        superseded = %existing.id,
                        "Coalescing pending push with newer payload"
                    );
                    *existing = job;
                }
                return;
            }
        }
        entry.pending.push_back(job);

        if !entry.running {
            entry.running = true;
            let inner = self.inner.clone();
            tokio::spawn(drive_key(inner, key));
        }
    }

    /// Whether all queues have drained.
    pub async fn idle(&self) -> bool {
        self.inner.queues.lock().await.is_empty()
    }

    /// Jobs that ended in a terminal error, for the operator surface.
    pub async fn failed_jobs(&self) -> Vec<SyncJob> {
        self.inner.failed.lock().await.clone()
    }
}

/// Drain one key's queue sequentially. Exactly one driver runs per key at
/// a time, which is what serializes pushes and pull applies on an issue.
async fn drive_key(inner: Arc<Inner>, key: String) {
    loop {
        let mut job = {
            let mut queues = inner.queues.lock().await;
            let Some(entry) = queues.get_mut(&key) else {
                break;
            };
            match entry.pending.pop_front() {
                Some(job) => job,
                None => {
                    queues.remove(&key);
                    break;
                }
            }
        };

        let now = Utc::now();
        if job.next_attempt_at > now {
            let wait = (job.next_attempt_at - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
        }

        let limiter = inner.limiter_for(&job.config_name).await;
        let Ok(_permit) = limiter.acquire_owned().await else {
            break;
        };

        job.attempt_count += 1;
        match inner.executor.execute(&job).await {
            Ok(()) => {
                debug!(issue_key = %key, kind = ?job.kind, "Job completed");
            }
            Err(e) if e.is_terminal() => {
                warn!(issue_key = %key, kind = ?job.kind, error = %e, "Job failed terminally");
                job.terminal_error = Some(e.to_string());
                surface_error(&inner, &key, &e).await;
                inner.failed.lock().await.push(job);
            }
            Err(e) => {
                if job.attempt_count >= inner.config.max_attempts {
                    warn!(
                        issue_key = %key,
                        attempts = job.attempt_count,
                        error = %e,
                        "Retry bound exhausted, surfacing to operator"
                    );
                    job.terminal_error = Some(format!(
                        "retries exhausted after {} attempts: {e}",
                        job.attempt_count
                    ));
                    surface_error(&inner, &key, &e).await;
                    inner.failed.lock().await.push(job);
                } else {
                    let delay = backoff_with_jitter(job.attempt_count, &inner.config);
                    debug!(
                        issue_key = %key,
                        attempt = job.attempt_count,
                        delay_ms = delay.as_millis() as u64,
                        "Transient failure, retrying with backoff"
                    );
                    job.next_attempt_at =
                        Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
                    let mut queues = inner.queues.lock().await;
                    if let Some(entry) = queues.get_mut(&key) {
                        // Front of the queue, so per-key ordering holds.
                        entry.pending.push_front(job);
                    }
                }
            }
        }
    }
}

async fn surface_error(inner: &Inner, issue_key: &str, error: &SyncError) {
    // The link may not exist yet (e.g. first push failed terminally);
    // in that case the error is only visible in the log.
    if let Err(store_err) = inner.links.mark_error(issue_key, &error.to_string()).await {
        debug!(issue_key = %issue_key, error = %store_err, "No link to surface error on");
    }
}
