//! Finding/issue synchronization engine.
//!
//! Keeps security findings consistent with corresponding issues in an
//! external tracker: deterministic severity/resolution mapping, idempotent
//! push with at-most-one-issue-per-finding links, ordered pull of tracker
//! events, origin-tagged note mirroring, and a retry queue that serializes
//! all work per issue key.
//!
//! # Architecture
//!
//! - [`config`] - tracker connection records and their validated store
//! - [`mapper`] - pure severity/resolution/transition mapping
//! - [`template`] - issue rendering and content hashing
//! - [`client`] - REST client for the tracker boundary
//! - [`discovery`] - validation and express-mode auto-discovery
//! - [`push`] / [`pull`] - the two synchronization engines
//! - [`notes`] - comment mirroring with loop suppression
//! - [`queue`] - per-issue-key serialized scheduler with backoff
//! - [`store`] - narrow persistence seams with in-memory implementations
//! - [`webhooks`] - inbound payload parsing and signature verification

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod mapper;
pub mod models;
pub mod notes;
pub mod pull;
pub mod push;
pub mod queue;
pub mod store;
pub mod template;
pub mod webhooks;

pub use client::TrackerClient;
pub use config::{ConfigError, ConfigStore, InMemoryConfigStore, TrackerConfiguration};
pub use error::SyncError;
pub use models::{
    Finding, FindingLink, FindingStatus, JobKind, Note, NoteOrigin, ProjectLink, Severity,
    SyncJob, SyncState, TrackerEvent, TrackerEventKind,
};
pub use notes::NoteSynchronizer;
pub use pull::{ApplyOutcome, PullEngine};
pub use push::{PushAction, PushEngine, PushOutcome};
pub use queue::{JobExecutor, SchedulerConfig, SyncScheduler};
pub use store::{
    FindingStore, InMemoryFindingStore, InMemoryLinkStore, InMemoryNoteStore, LinkStore,
    NoteStore,
};
