use std::time::Duration;

use crate::error::GateError;
use crate::gate::GateState;
use crate::notify::Notice;
use crate::test_helpers::*;

async fn authorized() -> Harness {
    let mut h = harness();
    h.gate.sign_in(USER_EMAIL, PASSWORD).await.unwrap();
    h.pump().await;
    assert_eq!(h.gate.state(), GateState::Authorized);
    h
}

#[tokio::test]
async fn created_project_is_listed_first_with_session_owner() {
    let h = authorized().await;
    h.store.seed_project("Older", "u-someone");

    h.gate.create_project("Launch Plan").await.unwrap();

    let projects = h.gate.view().projects;
    assert_eq!(projects.len(), 2);
    assert_eq!(projects[0].name, "Launch Plan");
    assert_eq!(projects[0].owner_uid, "u-user");
    assert!(projects[0].updated_at > projects[1].updated_at);
}

#[tokio::test]
async fn owner_is_stamped_from_session_not_input() {
    let h = authorized().await;

    h.gate.create_project("  u-stranger  ").await.unwrap();

    let rows = h.store.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["owner_uid"], "u-user");
    assert_eq!(rows[0]["name"], "u-stranger");
}

#[tokio::test]
async fn loading_twice_does_not_duplicate() {
    let h = authorized().await;
    h.store.seed_project("Roadmap", "u-user");
    h.store.seed_project("Budget", "u-user");

    let first = h.gate.load_projects().await.unwrap();
    let second = h.gate.load_projects().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.gate.view().projects, second);
    assert_eq!(second.len(), 2);
    assert_eq!(second[0].name, "Budget");
}

#[tokio::test]
async fn failed_load_keeps_previous_list() {
    let h = authorized().await;
    h.store.seed_project("Roadmap", "u-user");
    let before = h.gate.load_projects().await.unwrap();

    h.store.fail_project_queries(true);
    let err = h.gate.load_projects().await.unwrap_err();

    assert!(matches!(err, GateError::Record(_)));
    assert_eq!(h.gate.view().projects, before);
    assert_eq!(h.notifier.notices().len(), 1);
    assert!(matches!(&h.notifier.notices()[0], Notice::RecordFailed(m) if m.contains("503")));
    assert_eq!(h.gate.state(), GateState::Authorized);
}

#[tokio::test]
async fn failed_insert_leaves_list_untouched() {
    let h = authorized().await;
    h.store.fail_inserts(true);

    let err = h.gate.create_project("Launch Plan").await.unwrap_err();

    assert!(matches!(err, GateError::Record(_)));
    assert!(h.gate.view().projects.is_empty());
    assert!(h.store.rows().is_empty());
    assert_eq!(h.notifier.notices().len(), 1);
}

#[tokio::test]
async fn blank_project_name_is_rejected_without_request() {
    let h = authorized().await;

    let err = h.gate.create_project("   ").await.unwrap_err();

    assert!(matches!(err, GateError::InvalidInput(_)));
    assert!(h.store.rows().is_empty());
    assert!(h.notifier.notices().is_empty());
}

#[tokio::test]
async fn project_operations_require_authorization() {
    let h = harness();
    assert_eq!(h.gate.load_projects().await, Err(GateError::NotAuthorized));
    assert_eq!(h.gate.create_project("Launch Plan").await, Err(GateError::NotAuthorized));

    h.store.fail_next_lookups(1);
    let _ = h.gate.sign_in(USER_EMAIL, PASSWORD).await;
    assert_eq!(h.gate.state(), GateState::Denied);
    assert_eq!(h.gate.load_projects().await, Err(GateError::NotAuthorized));
    assert!(h.store.rows().is_empty());
}

#[tokio::test]
async fn undecodable_rows_fail_the_whole_load() {
    let h = authorized().await;
    h.store.seed_project("Roadmap", "u-user");
    h.gate.load_projects().await.unwrap();
    h.gate.create_project("Valid").await.unwrap();
    let before = h.gate.view().projects;

    // A row missing `owner_uid` cannot be decoded.
    h.store.insert_raw(serde_json::json!({ "name": "Broken" }));
    let err = h.gate.load_projects().await.unwrap_err();

    assert!(matches!(err, GateError::Record(crate::error::StoreError::Parse(_))));
    assert_eq!(h.gate.view().projects, before);
}

#[tokio::test(start_paused = true)]
async fn load_in_flight_at_sign_out_is_dropped_silently() {
    let h = authorized().await;
    h.store.seed_project("Roadmap", "u-user");
    h.store.delay_projects(Duration::from_millis(50));

    let (result, ()) = futures::join!(h.gate.load_projects(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.gate.sign_out().await;
    });

    assert_eq!(result, Err(GateError::Superseded));
    assert_eq!(h.gate.state(), GateState::Anonymous);
    assert!(h.gate.view().projects.is_empty());
    assert!(h.notifier.notices().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_insert_after_sign_out_raises_no_notice() {
    let h = authorized().await;
    h.store.fail_inserts(true);
    h.store.delay_projects(Duration::from_millis(50));

    let (result, ()) = futures::join!(h.gate.create_project("Launch Plan"), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.gate.sign_out().await;
    });

    assert_eq!(result, Err(GateError::Superseded));
    assert!(h.notifier.notices().is_empty());
}
