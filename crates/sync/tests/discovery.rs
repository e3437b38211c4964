//! Validation and express-mode discovery against a mock tracker.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tracker_sync::config::{ConfigError, Credential, IssueTemplate};
use tracker_sync::discovery::{discover_mappings, validate_configuration};
use tracker_sync::{Severity, TrackerClient, TrackerConfiguration};

fn config(base_url: &str) -> TrackerConfiguration {
    let mut map = BTreeMap::new();
    for severity in Severity::ALL {
        map.insert(severity, severity.to_string());
    }
    TrackerConfiguration {
        name: "jira".to_string(),
        base_url: base_url.to_string(),
        credential: Credential::Token("token".to_string()),
        default_issue_type: "Bug".to_string(),
        issue_template: IssueTemplate::Full,
        accepted_resolutions: BTreeSet::new(),
        false_positive_resolutions: BTreeSet::new(),
        severity_priority_map: map,
        reopen_transition_id: None,
        close_transition_id: None,
        epic_name_field_id: None,
        sla_comment_enabled: false,
        auto_sync_enabled: true,
        note_sync_enabled: true,
        standard_text: None,
    }
}

#[tokio::test]
async fn valid_config_and_accepted_credential_pass() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/myself"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "sync-bot" })))
        .mount(&server)
        .await;

    let config = config(&server.uri());
    let client = TrackerClient::new(&config).unwrap();
    let errors = validate_configuration(&client, &config).await;
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
}

#[tokio::test]
async fn rejected_credential_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/myself"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let config = config(&server.uri());
    let client = TrackerClient::new(&config).unwrap();
    let errors = validate_configuration(&client, &config).await;
    assert!(errors
        .iter()
        .any(|e| matches!(e, ConfigError::CredentialRejected(_))));
}

#[tokio::test]
async fn express_discovery_fills_optional_mappings() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/issuetype"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "1", "name": "Bug" },
            { "id": "2", "name": "Task" },
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/field"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "customfield_10001", "name": "Sprint" },
            { "id": "customfield_10011", "name": "Epic Name" },
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/issue/SEC-1/transitions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transitions": [
                { "id": "11", "name": "Start", "to": { "name": "In Progress" } },
                { "id": "21", "name": "Reopen", "to": { "name": "Reopened" } },
                { "id": "31", "name": "Finish", "to": { "name": "Done" } },
            ]
        })))
        .mount(&server)
        .await;

    let config = config(&server.uri());
    let client = TrackerClient::new(&config).unwrap();
    let discovered = discover_mappings(&client, Some("SEC-1")).await;

    assert_eq!(discovered.issue_types, vec!["Bug", "Task"]);
    assert_eq!(
        discovered.epic_name_field_id,
        Some("customfield_10011".to_string())
    );
    assert_eq!(discovered.reopen_transition_id, Some("21".to_string()));
    assert_eq!(discovered.close_transition_id, Some("31".to_string()));
}

#[tokio::test]
async fn discovery_failures_are_non_fatal() {
    let server = MockServer::start().await;
    // No endpoints mounted: every discovery call fails.
    let config = config(&server.uri());
    let client = TrackerClient::new(&config).unwrap();
    let discovered = discover_mappings(&client, Some("SEC-1")).await;

    assert!(discovered.issue_types.is_empty());
    assert!(discovered.epic_name_field_id.is_none());
    assert!(discovered.reopen_transition_id.is_none());
    assert!(discovered.close_transition_id.is_none());
}
