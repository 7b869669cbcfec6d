//! Test helper module for rentalsync-auth integration tests.
//!
//! Wires the services to in-memory stores and provides seeding helpers.

#![allow(dead_code)]

use chrono::{Duration, Utc};
use rentalsync_auth::{
    config::AuthConfig,
    dtos::RegisterRequest,
    models::{AuthState, Invitation, Profile, Route, Session, UserRole},
    services::Router,
    stores::{InMemoryCredentialStore, InMemoryInvitationRegistry, InMemoryProfileStore},
    AuthService, SessionManager,
};
use std::sync::Arc;
use tokio::sync::mpsc;

pub const ADMIN_EMAIL: &str = "owner@example.com";
pub const ADMIN_PASSWORD: &str = "Owner-Pass1!";
pub const TENANT_EMAIL: &str = "tenant@example.com";
pub const TENANT_PASSWORD: &str = "Tenant-Pass1!";

pub struct TestApp {
    pub config: AuthConfig,
    pub credentials: Arc<InMemoryCredentialStore>,
    pub profiles: Arc<InMemoryProfileStore>,
    pub invitations: Arc<InMemoryInvitationRegistry>,
    pub sessions: SessionManager,
    pub auth: AuthService,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(AuthConfig::default())
    }

    pub fn with_config(config: AuthConfig) -> Self {
        let credentials = Arc::new(InMemoryCredentialStore::new());
        let profiles = Arc::new(InMemoryProfileStore::new());
        let invitations = Arc::new(InMemoryInvitationRegistry::new());

        let sessions = SessionManager::new(credentials.clone(), profiles.clone(), &config);
        let auth = AuthService::new(
            credentials.clone(),
            profiles.clone(),
            invitations.clone(),
            sessions.clone(),
            config.clone(),
        );

        Self {
            config,
            credentials,
            profiles,
            invitations,
            sessions,
            auth,
        }
    }

    /// App with the session manager initialized and listening for events.
    pub async fn started() -> Self {
        let app = Self::new();
        app.sessions
            .initialize()
            .await
            .expect("Failed to initialize session manager");
        app
    }

    pub fn spawn_router(&self) -> (Router, mpsc::UnboundedReceiver<Route>) {
        Router::spawn(&self.sessions)
    }

    /// Identity plus profile row for a self-registered administrator.
    pub fn seed_admin(&self) -> Profile {
        let identity = self
            .credentials
            .add_identity(ADMIN_EMAIL, ADMIN_PASSWORD)
            .expect("Failed to add admin identity");
        let profile = Profile::new_admin(
            identity.id,
            identity.email,
            "Olive".into(),
            "Owner".into(),
            "555-0100".into(),
        );
        self.profiles.seed(&profile);
        profile
    }

    /// Identity plus profile row for a tenant provisioned with one-time
    /// credentials and no unit yet.
    pub fn seed_tenant(&self) -> Profile {
        let identity = self
            .credentials
            .add_identity(TENANT_EMAIL, TENANT_PASSWORD)
            .expect("Failed to add tenant identity");
        let profile = Profile {
            role: UserRole::Tenant,
            property_id: Some("prop-1".into()),
            has_completed_setup: Some(false),
            invitation_code: Some("AB12CD".into()),
            temporary_password: Some(TENANT_PASSWORD.into()),
            ..Profile::new_admin(
                identity.id,
                identity.email,
                "Tia".into(),
                "Tenant".into(),
                "555-0101".into(),
            )
        };
        self.profiles.seed(&profile);
        profile
    }

    pub fn seed_invitation(&self, email: &str, unit_id: &str, code: &str) -> Invitation {
        self.seed_invitation_with_ttl(email, unit_id, code, Duration::days(7))
    }

    pub fn seed_invitation_with_ttl(
        &self,
        email: &str,
        unit_id: &str,
        code: &str,
        ttl: Duration,
    ) -> Invitation {
        let invitation = Invitation::new(email.into(), unit_id.into(), code.into(), ttl);
        self.invitations.seed(invitation.clone());
        invitation
    }

    /// Wait until no transition is in progress.
    pub async fn settled_state(&self) -> AuthState {
        let mut state = self.sessions.state();
        loop {
            let current = state.borrow_and_update().clone();
            if !current.loading {
                return current;
            }
            state
                .changed()
                .await
                .expect("Session manager dropped while waiting");
        }
    }
}

pub fn admin_registration() -> RegisterRequest {
    RegisterRequest {
        email: ADMIN_EMAIL.into(),
        password: ADMIN_PASSWORD.into(),
        role: UserRole::Admin,
        first_name: "Olive".into(),
        last_name: "Owner".into(),
        phone_number: "555-0100".into(),
    }
}

/// A session the credential store never issued.
pub fn foreign_session(user_id: &str) -> Session {
    Session {
        access_token: format!("token-{}", user_id),
        user_id: user_id.into(),
        email: format!("{}@example.com", user_id),
        expires_at: Utc::now() + Duration::hours(1),
    }
}

/// Give spawned tasks a chance to run.
pub async fn settle_tasks() {
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
}

/// Routes emitted so far.
pub fn drain_routes(routes: &mut mpsc::UnboundedReceiver<Route>) -> Vec<Route> {
    let mut seen = Vec::new();
    while let Ok(route) = routes.try_recv() {
        seen.push(route);
    }
    seen
}
