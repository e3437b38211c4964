//! REST client for the external issue tracker.
//!
//! The engine core treats priority names and transition IDs as opaque
//! configuration; this client speaks the concrete JSON surface (Jira v2
//! style paths) and classifies HTTP outcomes into the sync taxonomy.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

use crate::config::{Credential, TrackerConfiguration};
use crate::error::SyncError;
use crate::template::RenderedIssue;

/// HTTP client bound to one tracker configuration.
#[derive(Debug, Clone)]
pub struct TrackerClient {
    client: reqwest::Client,
    base_url: String,
}

/// Issue key returned by a create call.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedIssue {
    /// Assigned issue key (e.g. "SEC-42")
    pub key: String,
}

/// A transition available on an issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    /// Transition ID
    pub id: String,
    /// Transition name
    pub name: String,
    /// Target status
    pub to: StatusRef,
}

/// Reference to a tracker status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRef {
    /// Status name
    pub name: String,
}

/// Reference to an issue type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueTypeRef {
    /// Issue type ID
    pub id: String,
    /// Issue type name
    pub name: String,
}

/// Reference to a tracker field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRef {
    /// Field ID (e.g. "customfield_10011")
    pub id: String,
    /// Field display name
    pub name: String,
}

/// Issue state as reported by the tracker.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteIssue {
    /// Issue key
    pub key: String,
    /// Status/resolution fields
    pub fields: RemoteIssueFields,
}

/// Fields of a remote issue relevant to synchronization.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteIssueFields {
    /// Current status
    pub status: StatusRef,
    /// Applied resolution, if any
    #[serde(default)]
    pub resolution: Option<StatusRef>,
    /// Tracker-side modification time
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct SearchResults {
    issues: Vec<RemoteIssue>,
}

#[derive(Debug, Deserialize)]
struct TransitionsResponse {
    transitions: Vec<Transition>,
}

impl TrackerClient {
    /// Build a client from a tracker configuration.
    ///
    /// # Errors
    /// Returns `SyncError::Configuration` if the credential cannot be
    /// encoded into a header or the HTTP client cannot be constructed.
    pub fn new(config: &TrackerConfiguration) -> Result<Self, SyncError> {
        let auth_value = match &config.credential {
            Credential::Basic { username, secret } => {
                format!("Basic {}", BASE64.encode(format!("{username}:{secret}")))
            }
            Credential::Token(token) => format!("Bearer {token}"),
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value)
                .map_err(|e| SyncError::Configuration(format!("invalid credential: {e}")))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| SyncError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/rest/api/2/{path}", self.base_url)
    }

    async fn check<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, SyncError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::from_status(status, &body));
        }
        response
            .json()
            .await
            .map_err(|e| SyncError::Transient(format!("failed to parse tracker response: {e}")))
    }

    async fn check_empty(response: reqwest::Response) -> Result<(), SyncError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::from_status(status, &body));
        }
        Ok(())
    }

    /// Create an issue, returning its assigned key.
    #[instrument(skip(self, rendered), fields(summary = %rendered.summary))]
    pub async fn create_issue(
        &self,
        project_key: &str,
        issue_type: &str,
        rendered: &RenderedIssue,
    ) -> Result<CreatedIssue, SyncError> {
        let body = json!({
            "fields": {
                "project": { "key": project_key },
                "issuetype": { "name": issue_type },
                "summary": rendered.summary,
                "description": rendered.description,
                "priority": { "name": rendered.priority },
            }
        });

        let response = self
            .client
            .post(self.url("issue"))
            .json(&body)
            .send()
            .await?;
        let created: CreatedIssue = Self::check(response).await?;
        debug!(issue_key = %created.key, "Created tracker issue");
        Ok(created)
    }

    /// Update summary, description and priority of an existing issue.
    #[instrument(skip(self, rendered), fields(issue_key = %issue_key))]
    pub async fn update_issue(
        &self,
        issue_key: &str,
        rendered: &RenderedIssue,
    ) -> Result<(), SyncError> {
        let body = json!({
            "fields": {
                "summary": rendered.summary,
                "description": rendered.description,
                "priority": { "name": rendered.priority },
            }
        });

        let response = self
            .client
            .put(self.url(&format!("issue/{issue_key}")))
            .json(&body)
            .send()
            .await?;
        Self::check_empty(response).await
    }

    /// Apply a transition to an issue.
    #[instrument(skip(self), fields(issue_key = %issue_key, transition_id = %transition_id))]
    pub async fn transition_issue(
        &self,
        issue_key: &str,
        transition_id: &str,
    ) -> Result<(), SyncError> {
        let body = json!({ "transition": { "id": transition_id } });
        let response = self
            .client
            .post(self.url(&format!("issue/{issue_key}/transitions")))
            .json(&body)
            .send()
            .await?;
        Self::check_empty(response).await
    }

    /// Add a comment to an issue.
    #[instrument(skip(self, body), fields(issue_key = %issue_key))]
    pub async fn add_comment(&self, issue_key: &str, body: &str) -> Result<(), SyncError> {
        let response = self
            .client
            .post(self.url(&format!("issue/{issue_key}/comment")))
            .json(&json!({ "body": body }))
            .send()
            .await?;
        Self::check_empty(response).await
    }

    /// Fetch current status and resolution of an issue.
    #[instrument(skip(self), fields(issue_key = %issue_key))]
    pub async fn get_issue(&self, issue_key: &str) -> Result<RemoteIssue, SyncError> {
        let response = self
            .client
            .get(self.url(&format!("issue/{issue_key}")))
            .query(&[("fields", "status,resolution,updated")])
            .send()
            .await?;
        Self::check(response).await
    }

    /// List transitions currently available on an issue.
    #[instrument(skip(self), fields(issue_key = %issue_key))]
    pub async fn list_transitions(&self, issue_key: &str) -> Result<Vec<Transition>, SyncError> {
        let response = self
            .client
            .get(self.url(&format!("issue/{issue_key}/transitions")))
            .send()
            .await?;
        let parsed: TransitionsResponse = Self::check(response).await?;
        Ok(parsed.transitions)
    }

    /// List issue types available on the tracker.
    #[instrument(skip(self))]
    pub async fn list_issue_types(&self) -> Result<Vec<IssueTypeRef>, SyncError> {
        let response = self.client.get(self.url("issuetype")).send().await?;
        Self::check(response).await
    }

    /// List fields defined on the tracker.
    #[instrument(skip(self))]
    pub async fn list_fields(&self) -> Result<Vec<FieldRef>, SyncError> {
        let response = self.client.get(self.url("field")).send().await?;
        Self::check(response).await
    }

    /// Probe credential acceptance.
    #[instrument(skip(self))]
    pub async fn current_user(&self) -> Result<(), SyncError> {
        let response = self.client.get(self.url("myself")).send().await?;
        Self::check_empty(response).await
    }

    /// Issues in a project modified since the given instant.
    ///
    /// Used by the poll-mode pull path when no webhook is configured.
    #[instrument(skip(self), fields(project_key = %project_key))]
    pub async fn search_updated_since(
        &self,
        project_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RemoteIssue>, SyncError> {
        let jql = format!(
            "project = {project_key} AND updated >= \"{}\"",
            since.format("%Y-%m-%d %H:%M")
        );
        let response = self
            .client
            .get(self.url("search"))
            .query(&[
                ("jql", jql.as_str()),
                ("fields", "status,resolution,updated"),
            ])
            .send()
            .await?;
        let results: SearchResults = Self::check(response).await?;
        Ok(results.issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::complete_config;

    #[test]
    fn test_client_creation() {
        assert!(TrackerClient::new(&complete_config("jira")).is_ok());
    }

    #[test]
    fn test_base_url_trailing_slash_normalized() {
        let mut config = complete_config("jira");
        config.base_url = "https://tracker.example.com/".to_string();
        let client = TrackerClient::new(&config).unwrap();
        assert_eq!(
            client.url("issue"),
            "https://tracker.example.com/rest/api/2/issue"
        );
    }

    #[test]
    fn test_invalid_credential_rejected() {
        let mut config = complete_config("jira");
        config.credential = Credential::Token("bad\ntoken".to_string());
        assert!(matches!(
            TrackerClient::new(&config),
            Err(SyncError::Configuration(_))
        ));
    }
}
