//! Tracker connection configuration and its validated store.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{ProjectLink, Severity};

/// Credential used to authenticate against the tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Credential {
    /// Username + secret (HTTP Basic)
    Basic {
        /// Account name or email
        username: String,
        /// Password or API secret
        secret: String,
    },
    /// Bearer token
    Token(String),
}

/// How much finding detail is rendered into the issue body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueTemplate {
    /// All finding metadata
    Full,
    /// Title, severity and a short summary only
    Limited,
}

/// Connection record for one tracker instance.
///
/// Immutable to workers; mutated only through the store's validated write
/// path. A configuration with an incomplete severity mapping is unusable
/// for push and must be rejected with a configuration error, never
/// silently defaulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfiguration {
    /// Identity of the configuration
    pub name: String,
    /// Tracker base URL (e.g. `https://tracker.example.com`)
    pub base_url: String,
    /// Authentication credential
    pub credential: Credential,
    /// Issue type used for created issues (e.g. "Bug")
    pub default_issue_type: String,
    /// Body rendering mode
    pub issue_template: IssueTemplate,
    /// Resolution names that mark the finding Accepted
    #[serde(default)]
    pub accepted_resolutions: BTreeSet<String>,
    /// Resolution names that mark the finding False Positive
    #[serde(default)]
    pub false_positive_resolutions: BTreeSet<String>,
    /// Severity to tracker priority name; must cover all five severities
    #[serde(default)]
    pub severity_priority_map: BTreeMap<Severity, String>,
    /// Transition ID used to reopen an issue, if known
    #[serde(default)]
    pub reopen_transition_id: Option<String>,
    /// Transition ID used to close an issue, if known
    #[serde(default)]
    pub close_transition_id: Option<String>,
    /// Custom field ID holding the epic name, if the tracker uses one
    #[serde(default)]
    pub epic_name_field_id: Option<String>,
    /// Whether SLA breaches are mirrored as tracker comments
    #[serde(default)]
    pub sla_comment_enabled: bool,
    /// Whether finding mutations enqueue pushes automatically
    #[serde(default)]
    pub auto_sync_enabled: bool,
    /// Whether notes/comments are mirrored bidirectionally
    #[serde(default)]
    pub note_sync_enabled: bool,
    /// Text appended to every rendered issue body
    #[serde(default)]
    pub standard_text: Option<String>,
}

/// Problems found while validating a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ConfigError {
    /// A severity has no priority mapping
    #[error("no priority mapped for severity {0}")]
    MissingPriority(Severity),

    /// Base URL is empty or not parseable
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// Configuration name is empty
    #[error("configuration name is empty")]
    EmptyName,

    /// Default issue type is empty
    #[error("default issue type is empty")]
    MissingIssueType,

    /// Resolution name appears in both accepted and false-positive sets
    #[error("resolution '{0}' is in both accepted and false-positive sets")]
    AmbiguousResolution(String),

    /// Tracker could not be reached
    #[error("tracker unreachable: {0}")]
    Unreachable(String),

    /// Tracker rejected the credential
    #[error("credential rejected: {0}")]
    CredentialRejected(String),
}

impl ConfigError {
    /// Whether this error blocks activation and push.
    ///
    /// Ambiguous resolution sets are reported but non-blocking: the mapper
    /// resolves them deterministically in favor of false positive.
    #[must_use]
    pub const fn blocks_activation(&self) -> bool {
        !matches!(self, Self::AmbiguousResolution(_))
    }
}

impl TrackerConfiguration {
    /// Structural completeness checks that require no network access.
    #[must_use]
    pub fn completeness_errors(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push(ConfigError::EmptyName);
        }

        if reqwest::Url::parse(&self.base_url).is_err() {
            errors.push(ConfigError::InvalidBaseUrl(self.base_url.clone()));
        }

        if self.default_issue_type.trim().is_empty() {
            errors.push(ConfigError::MissingIssueType);
        }

        for severity in Severity::ALL {
            match self.severity_priority_map.get(&severity) {
                Some(priority) if !priority.trim().is_empty() => {}
                _ => errors.push(ConfigError::MissingPriority(severity)),
            }
        }

        for name in self
            .accepted_resolutions
            .intersection(&self.false_positive_resolutions)
        {
            errors.push(ConfigError::AmbiguousResolution(name.clone()));
        }

        errors
    }

    /// Whether the configuration is usable for push.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self
            .completeness_errors()
            .iter()
            .any(ConfigError::blocks_activation)
    }
}

/// Read/write access to tracker configurations and project links.
///
/// Workers treat configurations as read-only; all mutation flows through
/// the validated write path.
pub trait ConfigStore: Send + Sync {
    /// Configuration for a project scope, resolved through its active link.
    fn get(&self, project_scope: &str) -> Option<TrackerConfiguration>;

    /// Configuration by name.
    fn get_by_name(&self, name: &str) -> Option<TrackerConfiguration>;

    /// Active project link for a scope.
    fn project_link(&self, project_scope: &str) -> Option<ProjectLink>;

    /// All project links, used by the poll loop to enumerate scopes.
    fn project_links(&self) -> Vec<ProjectLink>;

    /// Insert or replace a configuration.
    ///
    /// # Errors
    /// Returns the blocking completeness errors if the configuration is
    /// incomplete; incomplete configurations are never activated.
    fn upsert(&self, config: TrackerConfiguration) -> Result<(), Vec<ConfigError>>;

    /// Insert or replace the project link for its scope.
    ///
    /// Re-linking supersedes the prior link; there is never more than one
    /// active link per scope.
    fn upsert_project_link(&self, link: ProjectLink);

    /// Flag a configuration invalid after a terminal authentication error.
    fn flag_invalid(&self, name: &str);

    /// Whether a configuration has been flagged invalid.
    fn is_invalid(&self, name: &str) -> bool;
}

/// In-memory configuration store backing tests and the default service
/// wiring. Durable persistence lives behind the same trait, outside this
/// crate.
#[derive(Default)]
pub struct InMemoryConfigStore {
    configs: RwLock<HashMap<String, TrackerConfiguration>>,
    links: RwLock<HashMap<String, ProjectLink>>,
    invalid: RwLock<HashSet<String>>,
}

impl InMemoryConfigStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn get(&self, project_scope: &str) -> Option<TrackerConfiguration> {
        let link = self.project_link(project_scope)?;
        if !link.active {
            return None;
        }
        self.get_by_name(&link.config_name)
    }

    fn get_by_name(&self, name: &str) -> Option<TrackerConfiguration> {
        self.configs.read().expect("config lock").get(name).cloned()
    }

    fn project_link(&self, project_scope: &str) -> Option<ProjectLink> {
        self.links
            .read()
            .expect("link lock")
            .get(project_scope)
            .cloned()
    }

    fn project_links(&self) -> Vec<ProjectLink> {
        self.links.read().expect("link lock").values().cloned().collect()
    }

    fn upsert(&self, config: TrackerConfiguration) -> Result<(), Vec<ConfigError>> {
        let blocking: Vec<ConfigError> = config
            .completeness_errors()
            .into_iter()
            .filter(ConfigError::blocks_activation)
            .collect();
        if !blocking.is_empty() {
            return Err(blocking);
        }

        self.invalid.write().expect("invalid lock").remove(&config.name);
        self.configs
            .write()
            .expect("config lock")
            .insert(config.name.clone(), config);
        Ok(())
    }

    fn upsert_project_link(&self, link: ProjectLink) {
        self.links
            .write()
            .expect("link lock")
            .insert(link.project_scope.clone(), link);
    }

    fn flag_invalid(&self, name: &str) {
        self.invalid
            .write()
            .expect("invalid lock")
            .insert(name.to_string());
    }

    fn is_invalid(&self, name: &str) -> bool {
        self.invalid.read().expect("invalid lock").contains(name)
    }
}
