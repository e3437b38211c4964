//! Push engine integration tests against a mock tracker.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tracker_sync::config::{Credential, IssueTemplate};
use tracker_sync::store::InMemoryLinkStore;
use tracker_sync::{
    Finding, FindingStatus, ProjectLink, PushAction, PushEngine, Severity, SyncError, SyncState,
    TrackerClient, TrackerConfiguration,
};

fn config(base_url: &str) -> TrackerConfiguration {
    let mut map = BTreeMap::new();
    map.insert(Severity::Info, "Lowest".to_string());
    map.insert(Severity::Low, "Low".to_string());
    map.insert(Severity::Medium, "Medium".to_string());
    map.insert(Severity::High, "High".to_string());
    map.insert(Severity::Critical, "Highest".to_string());

    TrackerConfiguration {
        name: "jira".to_string(),
        base_url: base_url.to_string(),
        credential: Credential::Basic {
            username: "sync-bot".to_string(),
            secret: "api-token".to_string(),
        },
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

fn project() -> ProjectLink {
    ProjectLink {
        project_scope: "acme-webapp".to_string(),
        config_name: "jira".to_string(),
        issue_key_prefix: "SEC".to_string(),
        active: true,
    }
}

fn finding(severity: Severity) -> Finding {
    Finding {
        id: Uuid::new_v4(),
        project_scope: "acme-webapp".to_string(),
        title: "Outdated OpenSSL".to_string(),
        description: "Server links a vulnerable OpenSSL build.".to_string(),
        severity,
        status: FindingStatus::Active,
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn first_push_creates_and_links() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/api/2/issue"))
        .and(body_partial_json(json!({
            "fields": {
                "project": { "key": "SEC" },
                "issuetype": { "name": "Bug" },
                "priority": { "name": "Highest" },
            }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "key": "SEC-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let links = Arc::new(InMemoryLinkStore::new());
    let engine = PushEngine::new(links.clone());
    let config = config(&server.uri());
    let client = TrackerClient::new(&config).unwrap();

    let outcome = engine
        .push(&client, &finding(Severity::Critical), &config, &project())
        .await
        .unwrap();

    assert_eq!(outcome.action, PushAction::Created);
    assert_eq!(outcome.link.issue_key, "SEC-1");
    assert_eq!(outcome.link.sync_state, SyncState::Linked);
    assert!(outcome.link.last_pushed_at.is_some());
}

#[tokio::test]
async fn unchanged_repush_makes_no_network_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/api/2/issue"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "key": "SEC-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let links = Arc::new(InMemoryLinkStore::new());
    let engine = PushEngine::new(links.clone());
    let config = config(&server.uri());
    let client = TrackerClient::new(&config).unwrap();
    let f = finding(Severity::High);

    let first = engine.push(&client, &f, &config, &project()).await.unwrap();
    assert_eq!(first.action, PushAction::Created);

    let second = engine.push(&client, &f, &config, &project()).await.unwrap();
    assert_eq!(second.action, PushAction::Unchanged);
    assert_eq!(second.link.content_hash, first.link.content_hash);

    // Exactly one request ever reached the tracker.
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn severity_change_updates_same_issue() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/api/2/issue"))
        .and(body_partial_json(json!({
            "fields": { "priority": { "name": "Highest" } }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "key": "SEC-3" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/rest/api/2/issue/SEC-3"))
        .and(body_partial_json(json!({
            "fields": { "priority": { "name": "Low" } }
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let links = Arc::new(InMemoryLinkStore::new());
    let engine = PushEngine::new(links.clone());
    let config = config(&server.uri());
    let client = TrackerClient::new(&config).unwrap();

    let mut f = finding(Severity::Critical);
    let first = engine.push(&client, &f, &config, &project()).await.unwrap();
    assert_eq!(first.action, PushAction::Created);

    f.severity = Severity::Low;
    let second = engine.push(&client, &f, &config, &project()).await.unwrap();
    assert_eq!(second.action, PushAction::Updated);
    assert_eq!(second.link.issue_key, "SEC-3");
    assert_ne!(second.link.content_hash, first.link.content_hash);
}

#[tokio::test]
async fn incomplete_config_fails_before_any_network_call() {
    let server = MockServer::start().await;

    let engine = PushEngine::new(Arc::new(InMemoryLinkStore::new()));
    let mut config = config(&server.uri());
    config.severity_priority_map.remove(&Severity::Critical);
    let client = TrackerClient::new(&config).unwrap();

    let result = engine
        .push(&client, &finding(Severity::Critical), &config, &project())
        .await;
    assert!(matches!(result, Err(SyncError::Configuration(_))));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn rejected_credentials_are_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/api/2/issue"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let engine = PushEngine::new(Arc::new(InMemoryLinkStore::new()));
    let config = config(&server.uri());
    let client = TrackerClient::new(&config).unwrap();

    let result = engine
        .push(&client, &finding(Severity::High), &config, &project())
        .await;
    match result {
        Err(e @ SyncError::Authentication(_)) => assert!(e.is_terminal()),
        other => panic!("expected authentication error, got {other:?}"),
    }
}

#[tokio::test]
async fn deleted_remote_issue_marks_link_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/api/2/issue"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "key": "SEC-8" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/rest/api/2/issue/SEC-8"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let links = Arc::new(InMemoryLinkStore::new());
    let engine = PushEngine::new(links.clone());
    let config = config(&server.uri());
    let client = TrackerClient::new(&config).unwrap();

    let mut f = finding(Severity::Medium);
    engine.push(&client, &f, &config, &project()).await.unwrap();

    f.title = "Outdated OpenSSL (edited)".to_string();
    let result = engine.push(&client, &f, &config, &project()).await;
    assert!(matches!(result, Err(SyncError::NotFound(_))));

    use tracker_sync::LinkStore as _;
    let link = links.link_for_issue("SEC-8").await.unwrap();
    assert_eq!(link.sync_state, SyncState::Error);
    assert!(link.error.unwrap().contains("issue missing"));
}

#[tokio::test]
async fn accepted_finding_closes_created_issue() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/api/2/issue"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "key": "SEC-12" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/api/2/issue/SEC-12/transitions"))
        .and(body_partial_json(json!({ "transition": { "id": "31" } })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let engine = PushEngine::new(Arc::new(InMemoryLinkStore::new()));
    let mut config = config(&server.uri());
    config.close_transition_id = Some("31".to_string());
    let client = TrackerClient::new(&config).unwrap();

    let mut f = finding(Severity::High);
    f.status = FindingStatus::Accepted;
    let outcome = engine.push(&client, &f, &config, &project()).await.unwrap();
    assert_eq!(outcome.action, PushAction::Created);
}

#[tokio::test]
async fn active_finding_reopens_resolved_issue_on_update() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/api/2/issue"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "key": "SEC-13" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/rest/api/2/issue/SEC-13"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    // The tracker reports the issue as resolved behind our back.
    Mock::given(method("GET"))
        .and(path("/rest/api/2/issue/SEC-13"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "key": "SEC-13",
            "fields": {
                "status": { "name": "Done" },
                "resolution": { "name": "Won't Fix" },
                "updated": "2026-08-20T12:00:00Z"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/api/2/issue/SEC-13/transitions"))
        .and(body_partial_json(json!({ "transition": { "id": "21" } })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let links = Arc::new(InMemoryLinkStore::new());
    let engine = PushEngine::new(links.clone());
    let mut config = config(&server.uri());
    config.reopen_transition_id = Some("21".to_string());
    let client = TrackerClient::new(&config).unwrap();

    let mut f = finding(Severity::High);
    engine.push(&client, &f, &config, &project()).await.unwrap();

    f.title = "Outdated OpenSSL (still active)".to_string();
    let outcome = engine.push(&client, &f, &config, &project()).await.unwrap();
    assert_eq!(outcome.action, PushAction::Updated);
}

#[tokio::test]
async fn no_configured_transition_leaves_issue_state_alone() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/api/2/issue"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "key": "SEC-14" })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = PushEngine::new(Arc::new(InMemoryLinkStore::new()));
    let config = config(&server.uri());
    let client = TrackerClient::new(&config).unwrap();

    let mut f = finding(Severity::High);
    f.status = FindingStatus::FalsePositive;
    engine.push(&client, &f, &config, &project()).await.unwrap();

    // Only the create reached the tracker; no probe, no transition.
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn tracker_5xx_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/api/2/issue"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let engine = PushEngine::new(Arc::new(InMemoryLinkStore::new()));
    let config = config(&server.uri());
    let client = TrackerClient::new(&config).unwrap();

    let result = engine
        .push(&client, &finding(Severity::High), &config, &project())
        .await;
    match result {
        Err(e @ SyncError::Transient(_)) => assert!(!e.is_terminal()),
        other => panic!("expected transient error, got {other:?}"),
    }
}
