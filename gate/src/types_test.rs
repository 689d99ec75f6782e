use super::*;

fn session(expires_at: Option<i64>) -> Session {
    Session {
        access_token: "access-secret".into(),
        refresh_token: "refresh-secret".into(),
        expires_at,
        user: User { id: "u1".into(), email: "user@example.com".into() },
    }
}

// =============================================================================
// Session
// =============================================================================

#[test]
fn session_debug_redacts_tokens() {
    let debug = format!("{:?}", session(Some(100)));
    assert!(!debug.contains("access-secret"));
    assert!(!debug.contains("refresh-secret"));
    assert!(debug.contains("user@example.com"));
}

#[test]
fn expires_within_respects_margin() {
    let s = session(Some(1_000));
    assert!(s.expires_within(950, 60));
    assert!(!s.expires_within(900, 60));
    assert!(s.expires_within(2_000, 0));
}

#[test]
fn session_without_expiry_never_expires() {
    assert!(!session(None).expires_within(i64::MAX - 1, 60));
}

#[test]
fn same_user_compares_ids_not_tokens() {
    let a = session(Some(1));
    let mut b = session(Some(2));
    b.access_token = "other".into();
    assert!(a.same_user(&b));
    b.user.id = "u2".into();
    assert!(!a.same_user(&b));
}

// =============================================================================
// RedirectTokens
// =============================================================================

#[test]
fn resolve_expiry_prefers_absolute_value() {
    let tokens = RedirectTokens {
        access_token: "a".into(),
        refresh_token: "r".into(),
        expires_at: Some(5_000),
        expires_in: Some(3_600),
    };
    assert_eq!(tokens.resolve_expiry(100), Some(5_000));
}

#[test]
fn resolve_expiry_falls_back_to_relative_value() {
    let tokens = RedirectTokens {
        access_token: "a".into(),
        refresh_token: "r".into(),
        expires_at: None,
        expires_in: Some(3_600),
    };
    assert_eq!(tokens.resolve_expiry(100), Some(3_700));
}

#[test]
fn redirect_tokens_debug_hides_tokens() {
    let tokens = RedirectTokens {
        access_token: "leaky".into(),
        refresh_token: "leakier".into(),
        expires_at: None,
        expires_in: None,
    };
    assert!(!format!("{tokens:?}").contains("leak"));
}

// =============================================================================
// AuthEventKind
// =============================================================================

#[test]
fn event_kind_uses_provider_names() {
    assert_eq!(AuthEventKind::SignedIn.to_string(), "SIGNED_IN");
    assert_eq!(
        serde_json::to_string(&AuthEventKind::TokenRefreshed).unwrap(),
        "\"TOKEN_REFRESHED\""
    );
    let parsed: AuthEventKind = serde_json::from_str("\"SIGNED_OUT\"").unwrap();
    assert_eq!(parsed, AuthEventKind::SignedOut);
}

// =============================================================================
// Project
// =============================================================================

#[test]
fn project_accepts_numeric_id() {
    let json = serde_json::json!({
        "id": 42,
        "name": "Launch Plan",
        "status": null,
        "owner_uid": "u1",
        "updated_at": "2024-05-01T12:34:56.789+00:00"
    });
    let project: Project = serde_json::from_value(json).unwrap();
    assert_eq!(project.id, "42");
    assert_eq!(project.status, None);
    assert_eq!(project.updated_at.year(), 2024);
}

#[test]
fn project_accepts_uuid_id_and_missing_status() {
    let json = serde_json::json!({
        "id": "8f14e45f-ceea-467f-a0e6-1b7c1b3f0a2d",
        "name": "Roadmap",
        "owner_uid": "u1",
        "updated_at": "2024-05-01T00:00:00Z"
    });
    let project: Project = serde_json::from_value(json).unwrap();
    assert_eq!(project.id, "8f14e45f-ceea-467f-a0e6-1b7c1b3f0a2d");
    assert_eq!(project.status, None);
}

#[test]
fn project_rejects_object_id() {
    let json = serde_json::json!({
        "id": { "nested": true },
        "name": "Bad",
        "owner_uid": "u1",
        "updated_at": "2024-05-01T00:00:00Z"
    });
    assert!(serde_json::from_value::<Project>(json).is_err());
}

#[test]
fn new_project_serializes_owner() {
    let payload = NewProject { name: "Launch Plan".into(), owner_uid: "u1".into() };
    let json = serde_json::to_value(&payload).unwrap();
    assert_eq!(json, serde_json::json!({ "name": "Launch Plan", "owner_uid": "u1" }));
}

#[test]
fn user_with_null_email_decodes_as_empty() {
    let json = serde_json::json!({ "id": "u-phone", "email": null, "phone": "+15550100" });
    let user: User = serde_json::from_value(json).unwrap();
    assert_eq!(user.email, "");
}
