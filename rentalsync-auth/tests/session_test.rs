mod common;

use common::{TestApp, ADMIN_EMAIL, ADMIN_PASSWORD, TENANT_EMAIL, TENANT_PASSWORD};
use rentalsync_auth::{
    config::AuthConfig,
    models::{AuthState, Profile, SessionEvent, UserRole},
    services::{FallbackPolicy, ResolutionOutcome},
    stores::{CredentialStore, ProfileStore, StoreError},
    AuthError,
};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test]
async fn test_initialize_without_session_settles_signed_out() {
    let app = TestApp::new();
    assert_eq!(app.sessions.snapshot(), AuthState::initializing());

    app.sessions.initialize().await.unwrap();

    assert_eq!(app.sessions.snapshot(), AuthState::signed_out());
}

#[tokio::test]
async fn test_initialize_restores_existing_session() {
    let app = TestApp::new();
    let admin = app.seed_admin();
    app.credentials
        .verify_password(ADMIN_EMAIL, ADMIN_PASSWORD)
        .await
        .unwrap();

    app.sessions.initialize().await.unwrap();

    let state = app.sessions.snapshot();
    assert!(!state.loading);
    assert_eq!(state.profile, Some(admin));
}

#[tokio::test]
async fn test_initialize_twice_is_harmless() {
    let app = TestApp::started().await;
    app.sessions.initialize().await.unwrap();
    assert_eq!(app.sessions.snapshot(), AuthState::signed_out());
}

#[tokio::test(start_paused = true)]
async fn test_lagging_profile_is_found_on_retry() {
    let app = TestApp::started().await;
    let identity = app
        .credentials
        .add_identity(ADMIN_EMAIL, ADMIN_PASSWORD)
        .unwrap();
    let admin = Profile::new_admin(
        identity.id,
        identity.email,
        "Olive".into(),
        "Owner".into(),
        "555-0100".into(),
    );
    app.profiles.seed_lagged(&admin, 2);

    let started = Instant::now();
    let outcome = app
        .auth
        .login(ADMIN_EMAIL, ADMIN_PASSWORD, None)
        .await
        .expect("Login failed");

    assert_eq!(outcome.profile, admin);
    assert_eq!(app.profiles.read_calls(), 3);
    assert!(started.elapsed() >= Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_fallback_created_after_five_misses() {
    let app = TestApp::new();
    app.credentials
        .add_identity(ADMIN_EMAIL, ADMIN_PASSWORD)
        .unwrap();
    let session = app
        .credentials
        .verify_password(ADMIN_EMAIL, ADMIN_PASSWORD)
        .await
        .unwrap();

    let started = Instant::now();
    let outcome = app
        .sessions
        .resolve_profile(session.clone(), FallbackPolicy::Create)
        .await;

    assert!(outcome.is_synthesized());
    let profile = outcome.profile().unwrap();
    assert_eq!(profile.id, session.user_id);
    assert_eq!(profile.role, UserRole::Admin);
    assert_eq!(profile.has_completed_setup, None);
    assert_eq!(profile.first_name, "User");

    assert_eq!(app.profiles.read_calls(), 6);
    assert_eq!(app.profiles.insert_calls(), 1);
    assert!(started.elapsed() >= Duration::from_secs(8));

    let state = app.sessions.snapshot();
    assert!(!state.loading);
    assert_eq!(state.profile.as_ref(), Some(profile));
}

#[tokio::test(start_paused = true)]
async fn test_fallback_insert_failure_leaves_profile_empty() {
    let app = TestApp::new();
    let session = common::foreign_session("user-9");
    app.profiles.set_reject_inserts(true);

    let outcome = app
        .sessions
        .resolve_profile(session, FallbackPolicy::Create)
        .await;

    assert!(matches!(
        outcome,
        ResolutionOutcome::Failed(StoreError::Unavailable(_))
    ));
    let state = app.sessions.snapshot();
    assert!(!state.loading);
    assert!(state.session.is_some());
    assert!(state.profile.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_store_outage_never_creates_fallback() {
    let app = TestApp::new();
    app.profiles.fail_next_reads(5);

    let outcome = app
        .sessions
        .resolve_profile(common::foreign_session("user-9"), FallbackPolicy::Create)
        .await;

    assert!(matches!(outcome, ResolutionOutcome::Failed(_)));
    assert_eq!(app.profiles.insert_calls(), 0);
    assert!(!app.sessions.snapshot().loading);
}

#[tokio::test(start_paused = true)]
async fn test_logout_during_retry_discards_result() {
    let app = TestApp::started().await;
    let identity = app
        .credentials
        .add_identity(ADMIN_EMAIL, ADMIN_PASSWORD)
        .unwrap();

    let auth = app.auth.clone();
    let login =
        tokio::spawn(async move { auth.login(ADMIN_EMAIL, ADMIN_PASSWORD, None).await });

    // First read has missed; the loop is waiting for its next attempt.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(app.profiles.read_calls(), 1);

    app.auth.logout().await.expect("Logout failed");
    app.profiles.seed(&Profile::new_admin(
        identity.id,
        identity.email,
        "Late".into(),
        "Row".into(),
        "555".into(),
    ));

    let result = login.await.unwrap();
    assert_eq!(result.unwrap_err(), AuthError::NotAuthenticated);

    let state = app.settled_state().await;
    assert!(state.session.is_none());
    assert!(state.profile.is_none());
    assert_eq!(app.profiles.read_calls(), 1);
}

#[tokio::test]
async fn test_signed_out_event_wins_over_earlier_signed_in() {
    let app = TestApp::started().await;
    let admin = app.seed_admin();
    let mut session = common::foreign_session("ignored");
    session.user_id = admin.id.clone();

    app.credentials.emit(SessionEvent::SignedIn(session));
    app.credentials.emit(SessionEvent::SignedOut);
    common::settle_tasks().await;

    let state = app.settled_state().await;
    assert_eq!(state, AuthState::signed_out());
}

#[tokio::test]
async fn test_stale_signed_in_after_logout_is_ignored() {
    let app = TestApp::started().await;
    app.seed_admin();

    app.auth
        .login(ADMIN_EMAIL, ADMIN_PASSWORD, None)
        .await
        .expect("Login failed");
    let old_session = app.sessions.current_session().unwrap();
    app.auth.logout().await.expect("Logout failed");
    let reads = app.profiles.read_calls();

    app.credentials.emit(SessionEvent::SignedIn(old_session));
    common::settle_tasks().await;

    assert_eq!(app.sessions.snapshot(), AuthState::signed_out());
    assert_eq!(app.profiles.read_calls(), reads);
}

#[tokio::test]
async fn test_signed_in_event_resolves_profile() {
    let app = TestApp::started().await;
    let admin = app.seed_admin();
    let mut session = common::foreign_session("event");
    session.user_id = admin.id.clone();

    app.credentials.emit(SessionEvent::SignedIn(session.clone()));
    common::settle_tasks().await;

    let state = app.settled_state().await;
    assert_eq!(state.session, Some(session));
    assert_eq!(state.profile, Some(admin));
}

#[tokio::test]
async fn test_expired_signed_in_event_is_ignored() {
    let app = TestApp::started().await;
    let mut session = common::foreign_session("expired");
    session.expires_at = chrono::Utc::now() - chrono::Duration::minutes(1);

    app.credentials.emit(SessionEvent::SignedIn(session));
    common::settle_tasks().await;

    assert_eq!(app.sessions.snapshot(), AuthState::signed_out());
    assert_eq!(app.profiles.read_calls(), 0);
}

#[tokio::test]
async fn test_dispose_stops_event_handling() {
    let app = TestApp::started().await;
    let admin = app.seed_admin();
    app.sessions.dispose();

    let mut session = common::foreign_session("after-dispose");
    session.user_id = admin.id;
    app.credentials.emit(SessionEvent::SignedIn(session));
    common::settle_tasks().await;

    assert_eq!(app.sessions.snapshot(), AuthState::signed_out());
}

#[tokio::test]
async fn test_commit_profile_only_for_current_identity() {
    let app = TestApp::started().await;
    let admin = app.seed_admin();
    app.auth
        .login(ADMIN_EMAIL, ADMIN_PASSWORD, None)
        .await
        .expect("Login failed");

    let stranger = Profile::new_admin(
        "someone-else".into(),
        "x@example.com".into(),
        "X".into(),
        "Y".into(),
        "1".into(),
    );
    assert!(!app.sessions.commit_profile(&stranger));

    let mut renamed = admin.clone();
    renamed.first_name = "Renamed".into();
    assert!(app.sessions.commit_profile(&renamed));
    assert_eq!(app.sessions.snapshot().profile, Some(renamed));
}

#[tokio::test(start_paused = true)]
async fn test_fresh_registration_tolerates_lagging_row() {
    let app = TestApp::started().await;
    app.profiles.set_insert_lag(5);

    let outcome = app
        .auth
        .register(common::admin_registration())
        .await
        .expect("Registration failed");

    // All five reads missed; the fallback insert found the real row.
    assert_eq!(outcome.profile.first_name, "Olive");
    assert_eq!(app.profiles.insert_calls(), 2);
    assert_eq!(app.profiles.read_calls(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_permission_ends_after_first_resolution() {
    let app = TestApp::started().await;
    let outcome = app
        .auth
        .register(common::admin_registration())
        .await
        .expect("Registration failed");
    let user_id = outcome.profile.id.clone();

    app.auth.logout().await.expect("Logout failed");
    app.profiles.delete(&user_id).await.unwrap();

    let err = app
        .auth
        .login(ADMIN_EMAIL, ADMIN_PASSWORD, None)
        .await
        .unwrap_err();

    assert_eq!(err, AuthError::ProfileNotFound);
    assert_eq!(app.profiles.insert_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_fallback_widens_event_resolution() {
    let app = TestApp::started().await;
    app.credentials
        .add_identity(ADMIN_EMAIL, ADMIN_PASSWORD)
        .unwrap();
    let session = app
        .credentials
        .verify_password(ADMIN_EMAIL, ADMIN_PASSWORD)
        .await
        .unwrap();

    // The SignedIn subscriber is already resolving without fallback.
    common::settle_tasks().await;
    assert!(app.sessions.snapshot().loading);
    assert_eq!(app.profiles.read_calls(), 1);

    let outcome = app
        .sessions
        .resolve_profile(session, FallbackPolicy::Create)
        .await;

    assert!(outcome.is_synthesized());
    assert_eq!(app.profiles.read_calls(), 6);
    assert_eq!(app.profiles.insert_calls(), 1);

    let state = app.settled_state().await;
    assert_eq!(state.profile.as_ref(), outcome.profile());
}

#[tokio::test(start_paused = true)]
async fn test_explicit_fallback_after_not_found_resolves_again() {
    let app = TestApp::started().await;
    app.credentials
        .add_identity(ADMIN_EMAIL, ADMIN_PASSWORD)
        .unwrap();
    let session = app
        .credentials
        .verify_password(ADMIN_EMAIL, ADMIN_PASSWORD)
        .await
        .unwrap();

    common::settle_tasks().await;
    let state = app.settled_state().await;
    assert!(state.session.is_some());
    assert!(state.profile.is_none());
    assert_eq!(app.profiles.read_calls(), 5);

    let outcome = app
        .sessions
        .resolve_profile(session, FallbackPolicy::Create)
        .await;

    assert!(outcome.is_synthesized());
    assert_eq!(app.profiles.insert_calls(), 1);
    assert_eq!(app.sessions.snapshot().profile.as_ref(), outcome.profile());
}

#[tokio::test(start_paused = true)]
async fn test_logout_during_last_read_skips_fallback_insert() {
    let mut config = AuthConfig::default();
    config.profile.retry_attempts = 1;
    let app = TestApp::with_config(config);
    app.profiles.set_read_delay(Duration::from_secs(1));

    let sessions = app.sessions.clone();
    let resolution = tokio::spawn(async move {
        sessions
            .resolve_profile(common::foreign_session("user-9"), FallbackPolicy::Create)
            .await
    });

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(app.profiles.read_calls(), 1);
    app.auth.logout().await.expect("Logout failed");

    assert_eq!(resolution.await.unwrap(), ResolutionOutcome::Superseded);
    assert_eq!(app.profiles.insert_calls(), 0);
    assert!(app.profiles.get("user-9").is_none());
    assert_eq!(app.sessions.snapshot(), AuthState::signed_out());
}

#[tokio::test(start_paused = true)]
async fn test_profile_write_during_resolution_keeps_loading() {
    let app = TestApp::started().await;
    let tenant = app.seed_tenant();
    app.profiles.seed_lagged(&tenant, 2);
    app.credentials
        .verify_password(TENANT_EMAIL, TENANT_PASSWORD)
        .await
        .unwrap();
    common::settle_tasks().await;
    assert_eq!(app.profiles.read_calls(), 1);

    let updated = app
        .auth
        .update_password("Fresh-Passw0rd!")
        .await
        .expect("Password update failed");

    let state = app.sessions.snapshot();
    assert!(state.loading);
    assert_eq!(state.profile.as_ref(), Some(&updated));

    let state = app.settled_state().await;
    assert_eq!(state.profile, Some(updated));
}
