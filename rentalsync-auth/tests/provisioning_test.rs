mod common;

use common::{TestApp, ADMIN_EMAIL, ADMIN_PASSWORD, TENANT_EMAIL, TENANT_PASSWORD};
use rentalsync_auth::{
    dtos::ProvisionTenantRequest,
    models::{InvitationState, Route, UserRole},
    utils::credentials::SPECIAL_CHARACTERS,
    AuthError,
};
use secrecy::ExposeSecret;

fn tenant_request() -> ProvisionTenantRequest {
    ProvisionTenantRequest {
        email: "new.tenant@example.com".into(),
        first_name: "Nia".into(),
        last_name: "Renter".into(),
        phone_number: "555-0123".into(),
        property_id: "prop-9".into(),
        unit_id: "unit-9B".into(),
    }
}

async fn signed_in_admin() -> TestApp {
    let app = TestApp::started().await;
    app.seed_admin();
    app.auth
        .login(ADMIN_EMAIL, ADMIN_PASSWORD, None)
        .await
        .expect("Admin login failed");
    app
}

#[tokio::test]
async fn test_provisioning_requires_sign_in() {
    let app = TestApp::started().await;

    let err = app.auth.provision_tenant(tenant_request()).await.unwrap_err();

    assert_eq!(err, AuthError::NotAuthenticated);
}

#[tokio::test]
async fn test_provisioning_requires_admin() {
    let app = TestApp::started().await;
    app.seed_tenant();
    app.auth
        .login(TENANT_EMAIL, TENANT_PASSWORD, None)
        .await
        .unwrap();

    let err = app.auth.provision_tenant(tenant_request()).await.unwrap_err();

    assert_eq!(err, AuthError::AdminRequired);
    assert!(!app.credentials.has_identity("new.tenant@example.com"));
}

#[tokio::test]
async fn test_provisioned_tenant_can_accept_invitation() {
    let app = signed_in_admin().await;

    let provisioned = app
        .auth
        .provision_tenant(tenant_request())
        .await
        .expect("Provisioning failed");

    let code = provisioned.invitation.invitation_code.clone();
    let password = provisioned.temporary_password.expose_secret().clone();

    assert_eq!(code.len(), 6);
    assert!(code
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    assert_eq!(password.len(), 8);
    assert!(password.chars().any(|c| c.is_ascii_lowercase()));
    assert!(password.chars().any(|c| c.is_ascii_uppercase()));
    assert!(password.chars().any(|c| c.is_ascii_digit()));
    assert!(password.bytes().any(|b| SPECIAL_CHARACTERS.contains(&b)));

    let profile = &provisioned.profile;
    assert_eq!(profile.role, UserRole::Tenant);
    assert_eq!(profile.unit_id.as_deref(), Some("unit-9B"));
    assert_eq!(profile.property_id.as_deref(), Some("prop-9"));
    assert_eq!(profile.has_completed_setup, Some(false));
    assert_eq!(profile.invitation_code.as_deref(), Some(code.as_str()));
    assert_eq!(provisioned.invitation.status, InvitationState::Pending);

    // The admin stays signed in.
    assert_eq!(
        app.sessions.snapshot().role(),
        Some(UserRole::Admin)
    );

    app.auth.logout().await.unwrap();
    let outcome = app
        .auth
        .login("new.tenant@example.com", &password, Some(&code))
        .await
        .expect("Tenant first login failed");

    assert_eq!(outcome.home, Route::TenantDashboard);
    assert_eq!(outcome.profile.has_completed_setup, Some(true));
    assert_eq!(
        app.invitations
            .get(&provisioned.invitation.id)
            .unwrap()
            .status,
        InvitationState::Accepted
    );
}

#[tokio::test]
async fn test_provisioning_rejects_existing_email() {
    let app = signed_in_admin().await;
    let mut req = tenant_request();
    req.email = ADMIN_EMAIL.into();

    let err = app.auth.provision_tenant(req).await.unwrap_err();

    assert_eq!(err, AuthError::EmailAlreadyInUse);
}

#[tokio::test]
async fn test_invitation_failure_rolls_back_tenant() {
    let app = signed_in_admin().await;
    app.invitations.set_unavailable(true);

    let err = app.auth.provision_tenant(tenant_request()).await.unwrap_err();

    assert!(matches!(err, AuthError::RemoteUnavailable(_)));
    assert!(!app.credentials.has_identity("new.tenant@example.com"));
    assert!(app.invitations.all().is_empty());
}

#[tokio::test]
async fn test_deactivated_tenant_cannot_log_in() {
    let app = signed_in_admin().await;
    let provisioned = app
        .auth
        .provision_tenant(tenant_request())
        .await
        .unwrap();
    let password = provisioned.temporary_password.expose_secret().clone();

    let deactivated = app
        .auth
        .deactivate_tenant(&provisioned.profile.id)
        .await
        .expect("Deactivation failed");
    assert!(!deactivated.is_active);

    app.auth.logout().await.unwrap();
    let err = app
        .auth
        .login("new.tenant@example.com", &password, None)
        .await
        .unwrap_err();

    assert_eq!(err, AuthError::AccountDeactivated);
}

#[tokio::test]
async fn test_admins_cannot_be_deactivated() {
    let app = signed_in_admin().await;
    let admin_id = app.sessions.snapshot().user_id().unwrap().to_string();

    let err = app.auth.deactivate_tenant(&admin_id).await.unwrap_err();

    assert!(matches!(err, AuthError::Validation(_)));
}
