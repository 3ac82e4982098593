//! HTTP-level tests against a mock management API
//!
//! Exercises the full read-diff-write cycle per resource manager:
//! create-vs-modify branching on 404, idempotent no-ops, check mode,
//! pagination and error normalization.

use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use nas_config_manager::resources::{
    QuotaManager, QuotaParams, QuotaType, ResourceManager, SmbShareManager, SmbShareParams,
    SyncIqSettingsManager, SyncIqSettingsParams,
};
use nas_config_manager::types::ResourceState;
use nas_config_manager::{CheckMode, ClusterConfig, Credentials, Error, RestClient, ServiceMode};

fn client_for(server: &MockServer) -> RestClient {
    let addr = server.address();
    let config = ClusterConfig {
        host: format!("http://{}", addr.ip()),
        port: addr.port(),
        credentials: Credentials::Basic {
            username: "root".to_string(),
            password: "secret".to_string(),
        },
        verify_ssl: false,
        timeout: Duration::from_secs(5),
    };
    RestClient::connect(&config).unwrap()
}

fn settings_body(service: &str) -> serde_json::Value {
    json!({
        "settings": {
            "service": service,
            "encryption_required": false,
            "report_max_age": 31536000,
            "report_max_count": 2000
        }
    })
}

#[tokio::test]
async fn synciq_service_turn_on_issues_one_minimal_update() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/platform/12/sync/settings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(settings_body("off")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/platform/12/sync/settings"))
        .and(body_json(json!({ "service": "on" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/platform/12/sync/settings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(settings_body("on")))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let params = SyncIqSettingsParams {
        service: Some(ServiceMode::On),
        encryption_required: Some(false),
        ..Default::default()
    };

    let outcome = SyncIqSettingsManager::new(&client)
        .apply(&params, CheckMode::Apply)
        .await
        .unwrap();

    assert!(outcome.changed);
    assert_eq!(outcome.state.unwrap().service, "on");
}

#[tokio::test]
async fn synciq_settings_matching_state_is_a_no_op() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/platform/12/sync/settings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(settings_body("on")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/platform/12/sync/settings"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let params = SyncIqSettingsParams {
        service: Some(ServiceMode::On),
        encryption_required: Some(false),
        ..Default::default()
    };

    let outcome = SyncIqSettingsManager::new(&client)
        .apply(&params, CheckMode::Apply)
        .await
        .unwrap();

    assert!(!outcome.changed);
}

#[tokio::test]
async fn synciq_update_failure_carries_operation_prefix_and_cause() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/platform/12/sync/settings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(settings_body("off")))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/platform/12/sync/settings"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "errors": [{ "message": "service unavailable during upgrade" }]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let params = SyncIqSettingsParams {
        service: Some(ServiceMode::On),
        ..Default::default()
    };

    let err = SyncIqSettingsManager::new(&client)
        .apply(&params, CheckMode::Apply)
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.starts_with("Updating replication settings failed"));
    assert!(message.contains("service unavailable during upgrade"));
    assert!(message.contains("503"));
}

fn share_body(browsable: bool) -> serde_json::Value {
    json!({
        "shares": [{
            "name": "projects",
            "path": "/ifs/data/projects",
            "description": "",
            "browsable": browsable,
            "access_based_enumeration": false,
            "directory_create_mask": "448",
            "file_create_mask": "448"
        }]
    })
}

fn share_params(name: &str) -> SmbShareParams {
    SmbShareParams {
        name: name.to_string(),
        state: ResourceState::Present,
        access_zone: None,
        path: Some("/ifs/data/projects".to_string()),
        description: None,
        browsable: None,
        access_based_enumeration: None,
        directory_create_mask: None,
        file_create_mask: None,
    }
}

#[tokio::test]
async fn absent_share_with_present_state_is_created_not_failed() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/platform/12/protocols/smb/shares/projects"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "errors": [{ "message": "share not found" }]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/platform/12/protocols/smb/shares"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "projects" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/platform/12/protocols/smb/shares/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(share_body(true)))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let outcome = SmbShareManager::new(&client)
        .apply(&share_params("projects"), CheckMode::Apply)
        .await
        .unwrap();

    assert!(outcome.changed);
    assert_eq!(outcome.state.unwrap().name, "projects");
}

#[tokio::test]
async fn check_mode_predicts_change_without_mutating() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/platform/12/protocols/smb/shares/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(share_body(true)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/platform/12/protocols/smb/shares/projects"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut params = share_params("projects");
    params.browsable = Some(false);

    let outcome = SmbShareManager::new(&client)
        .apply(&params, CheckMode::Check)
        .await
        .unwrap();

    assert!(outcome.changed);
}

#[tokio::test]
async fn share_delete_tolerates_mid_flight_disappearance() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/platform/12/protocols/smb/shares/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(share_body(true)))
        .mount(&server)
        .await;
    // Another client deleted it between our read and our delete.
    Mock::given(method("DELETE"))
        .and(path("/platform/12/protocols/smb/shares/projects"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut params = share_params("projects");
    params.state = ResourceState::Absent;

    let outcome = SmbShareManager::new(&client)
        .apply(&params, CheckMode::Apply)
        .await
        .unwrap();

    assert!(outcome.changed);
    assert!(outcome.state.is_none());
}

#[tokio::test]
async fn quota_lookup_follows_resume_tokens_in_order() {
    let server = MockServer::start().await;

    let quota = json!({
        "id": "AABpAQ",
        "type": "directory",
        "path": "/ifs/data/projects",
        "include_snapshots": false,
        "container": true,
        "thresholds": { "hard": 107374182400u64 }
    });

    Mock::given(method("GET"))
        .and(path("/platform/12/quota/quotas"))
        .and(query_param("type", "directory"))
        .and(query_param_is_missing("resume"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "quotas": [],
            "resume": "page-2"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/platform/12/quota/quotas"))
        .and(query_param("resume", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "quotas": [quota],
            "resume": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let params = QuotaParams {
        path: "/ifs/data/projects".to_string(),
        quota_type: QuotaType::Directory,
        state: ResourceState::Present,
        user: None,
        group: None,
        advisory: None,
        soft: None,
        hard: Some(107374182400),
        soft_grace: None,
        include_snapshots: None,
        container: Some(true),
    };

    let outcome = QuotaManager::new(&client)
        .apply(&params, CheckMode::Apply)
        .await
        .unwrap();

    // The matching quota sits on the second page; once found, nothing
    // differs, so no mutating call is issued.
    assert!(!outcome.changed);
    assert_eq!(outcome.state.unwrap().path, "/ifs/data/projects");
}

#[tokio::test]
async fn listing_failure_aborts_quota_reconcile() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/platform/12/quota/quotas"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "errors": [{ "message": "quota database busy" }]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let params = QuotaParams {
        path: "/ifs/data/projects".to_string(),
        quota_type: QuotaType::Directory,
        state: ResourceState::Present,
        user: None,
        group: None,
        advisory: None,
        soft: None,
        hard: Some(1024),
        soft_grace: None,
        include_snapshots: None,
        container: None,
    };

    // A failed lookup must never read as "quota absent".
    let err = QuotaManager::new(&client)
        .apply(&params, CheckMode::Apply)
        .await
        .unwrap_err();
    assert_matches!(err, Error::Api { status: 500, .. });
    assert!(err.to_string().contains("quota database busy"));
}

#[tokio::test]
async fn bearer_token_reaches_the_wire() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/platform/12/sync/settings"))
        .and(header("authorization", "Bearer session-xyz"))
        .respond_with(ResponseTemplate::new(200).set_body_json(settings_body("on")))
        .expect(1)
        .mount(&server)
        .await;

    let addr = server.address();
    let config = ClusterConfig {
        host: format!("http://{}", addr.ip()),
        port: addr.port(),
        credentials: Credentials::Bearer("session-xyz".to_string()),
        verify_ssl: false,
        timeout: Duration::from_secs(5),
    };
    let client = RestClient::connect(&config).unwrap();

    let outcome = SyncIqSettingsManager::new(&client)
        .apply(&SyncIqSettingsParams::default(), CheckMode::Apply)
        .await
        .unwrap();
    assert!(!outcome.changed);
}
