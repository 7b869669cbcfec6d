use chrono::Utc;
use secrecy::Secret;
use service_core::retry::{call_with_timeout, retry_call, RetryConfig};
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

use super::error::AuthError;
use super::resolution::ResolutionOutcome;
use super::session::SessionManager;
use crate::config::AuthConfig;
use crate::dtos::{ProvisionTenantRequest, RegisterRequest, UpdateProfileRequest};
use crate::models::{
    AuthState, Invitation, Profile, ProfileChanges, ProfileRecord, Route, UserRole,
};
use crate::stores::{CredentialStore, InvitationRegistry, ProfileStore, StoreError};
use crate::utils::{generate_invitation_code, generate_temporary_password};

/// A successful sign-in. `home` is where the router will send the user;
/// `login` itself never navigates.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthOutcome {
    pub profile: Profile,
    pub home: Route,
}

impl AuthOutcome {
    fn new(profile: Profile) -> Self {
        let home = Route::home_for(profile.role);
        Self { profile, home }
    }
}

/// A tenant account created by an administrator, with the one-time
/// credentials to hand over.
#[derive(Debug)]
pub struct ProvisionedTenant {
    pub profile: Profile,
    pub invitation: Invitation,
    pub temporary_password: Secret<String>,
}

#[derive(Clone)]
pub struct AuthService {
    credentials: Arc<dyn CredentialStore>,
    profiles: Arc<dyn ProfileStore>,
    invitations: Arc<dyn InvitationRegistry>,
    sessions: SessionManager,
    config: AuthConfig,
    retry: RetryConfig,
}

impl AuthService {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        profiles: Arc<dyn ProfileStore>,
        invitations: Arc<dyn InvitationRegistry>,
        sessions: SessionManager,
        config: AuthConfig,
    ) -> Self {
        let retry = config.retry_config();
        Self {
            credentials,
            profiles,
            invitations,
            sessions,
            config,
            retry,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn state(&self) -> AuthState {
        self.sessions.snapshot()
    }

    fn call_timeout(&self) -> Duration {
        self.config.profile.call_timeout
    }

    /// Sign in, optionally through an invitation code.
    ///
    /// With a code, the invitation is checked before the password is, and a
    /// bad code never reaches the credential store.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        invitation_code: Option<&str>,
    ) -> Result<AuthOutcome, AuthError> {
        let email = email.trim();
        let invitation_code = invitation_code.map(str::trim).filter(|c| !c.is_empty());

        // Invitation gate
        let invitation = match invitation_code {
            Some(code) => Some(self.verify_invitation(email, code).await?),
            None => None,
        };

        // Credentials
        let session = call_with_timeout(
            self.call_timeout(),
            self.credentials.verify_password(email, password),
        )
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Login rejected");
            AuthError::from(e)
        })?;

        tracing::info!(user_id = %session.user_id, "Credentials verified");

        // Profile, joined with any resolution the session event started
        let outcome = self.sessions.adopt(session).await;
        let profile = profile_from(outcome)?;

        let profile = match invitation {
            Some(invitation) => self.accept_invitation(profile, &invitation).await,
            None => profile,
        };

        Ok(AuthOutcome::new(profile))
    }

    async fn verify_invitation(&self, email: &str, code: &str) -> Result<Invitation, AuthError> {
        let found = call_with_timeout(
            self.call_timeout(),
            self.invitations.find_pending(email, code),
        )
        .await?;

        let invitation = found.ok_or_else(|| {
            tracing::warn!("Invitation code did not match a pending invitation");
            AuthError::InvalidInvitation
        })?;

        if invitation.is_expired_at(Utc::now()) {
            tracing::warn!(invitation_id = %invitation.id, "Invitation expired");
            if let Err(e) = call_with_timeout(
                self.call_timeout(),
                self.invitations.mark_expired(&invitation.id),
            )
            .await
            {
                tracing::warn!(invitation_id = %invitation.id, error = %e, "Failed to mark invitation expired");
            }
            return Err(AuthError::InvalidInvitation);
        }

        Ok(invitation)
    }

    /// First login through an invitation: consume the invitation and assign
    /// its unit to a tenant. The user is already signed in, so failures here are logged
    /// and the profile is returned as it was.
    async fn accept_invitation(&self, profile: Profile, invitation: &Invitation) -> Profile {
        if let Err(e) = retry_call(&self.retry, "mark_invitation_accepted", || {
            self.invitations.mark_accepted(&invitation.id)
        })
        .await
        {
            tracing::error!(invitation_id = %invitation.id, error = %e, "Failed to accept invitation");
            return profile;
        }

        if profile.role != UserRole::Tenant {
            tracing::warn!(user_id = %profile.id, role = %profile.role, "Invitation matched a non-tenant, unit not assigned");
        }
        let changes = ProfileChanges::invitation_accepted(profile.role, &invitation.unit_id);
        match self.write_profile(&profile.id, changes).await {
            Ok(updated) => {
                tracing::info!(user_id = %updated.id, unit_id = %invitation.unit_id, "Invitation accepted");
                updated
            }
            Err(e) => {
                tracing::error!(user_id = %profile.id, error = %e, "Failed to record accepted invitation on profile");
                profile
            }
        }
    }

    /// Self-registration. Only administrators may register themselves.
    pub async fn register(&self, req: RegisterRequest) -> Result<AuthOutcome, AuthError> {
        if req.role == UserRole::Tenant {
            return Err(AuthError::TenantSelfRegistrationDenied);
        }

        req.validate()?;
        self.check_password_length(&req.password)?;

        let email = req.email.trim();

        let identity = call_with_timeout(
            self.call_timeout(),
            self.credentials.create_identity(email, &req.password),
        )
        .await
        .map_err(|e| match e {
            StoreError::Conflict(_) => AuthError::EmailAlreadyInUse,
            other => other.into(),
        })?;

        let profile = Profile::new_admin(
            identity.id.clone(),
            identity.email.clone(),
            req.first_name.trim().to_string(),
            req.last_name.trim().to_string(),
            req.phone_number.trim().to_string(),
        );

        if let Err(cause) = call_with_timeout(
            self.call_timeout(),
            self.profiles.insert(ProfileRecord::from(&profile)),
        )
        .await
        {
            tracing::error!(user_id = %identity.id, error = %cause, "Profile insert failed, removing identity");
            return Err(self.rollback_identity(&identity.id, cause).await);
        }

        tracing::info!(user_id = %identity.id, "Administrator registered");

        // Sign the new account in. Its profile row may lag, so resolution
        // is allowed to fall back for this identity.
        self.sessions.mark_fresh_registration(&identity.id);
        let session = call_with_timeout(
            self.call_timeout(),
            self.credentials.verify_password(email, &req.password),
        )
        .await?;

        let outcome = self.sessions.adopt(session).await;
        Ok(AuthOutcome::new(profile_from(outcome)?))
    }

    async fn rollback_identity(&self, identity_id: &str, cause: StoreError) -> AuthError {
        match call_with_timeout(
            self.call_timeout(),
            self.credentials.delete_identity(identity_id),
        )
        .await
        {
            Ok(()) => cause.into(),
            Err(rollback) => {
                tracing::error!(user_id = %identity_id, error = %rollback, "Rollback failed, identity orphaned");
                AuthError::RollbackFailed { cause, rollback }
            }
        }
    }

    /// Local state is cleared before the remote call, so the user is signed
    /// out here even when the credential store cannot be reached.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let user_id = self.sessions.snapshot().user_id().map(str::to_string);
        self.sessions.clear();

        match call_with_timeout(self.call_timeout(), self.credentials.sign_out()).await {
            Ok(()) | Err(StoreError::NoSession) => {
                tracing::info!(user_id = ?user_id, "Logged out");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(user_id = ?user_id, error = %e, "Remote sign-out failed");
                Err(AuthError::RemoteUnavailable(e.to_string()))
            }
        }
    }

    pub async fn update_password(&self, new_password: &str) -> Result<Profile, AuthError> {
        let session = self
            .sessions
            .current_session()
            .ok_or(AuthError::NotAuthenticated)?;
        self.check_password_length(new_password)?;

        call_with_timeout(self.call_timeout(), self.credentials.set_password(new_password))
            .await?;

        let profile = self
            .write_profile(&session.user_id, ProfileChanges::credentials_settled())
            .await?;

        tracing::info!(user_id = %session.user_id, "Password updated");
        Ok(profile)
    }

    /// True iff a pending, unexpired invitation matches. Never mutates.
    pub async fn check_invitation_code(&self, email: &str, code: &str) -> Result<bool, AuthError> {
        let found = call_with_timeout(
            self.call_timeout(),
            self.invitations.find_pending(email.trim(), code.trim()),
        )
        .await?;

        Ok(found.map_or(false, |inv| inv.is_valid_at(Utc::now())))
    }

    pub async fn update_profile(&self, req: UpdateProfileRequest) -> Result<Profile, AuthError> {
        let session = self
            .sessions
            .current_session()
            .ok_or(AuthError::NotAuthenticated)?;
        req.validate()?;

        let changes = ProfileChanges::personal(
            req.first_name.trim().to_string(),
            req.last_name.trim().to_string(),
            req.phone_number.trim().to_string(),
        );
        self.write_profile(&session.user_id, changes).await
    }

    /// Create a tenant account with an invitation code and a temporary
    /// password. Administrators only.
    pub async fn provision_tenant(
        &self,
        req: ProvisionTenantRequest,
    ) -> Result<ProvisionedTenant, AuthError> {
        let admin = self.require_admin()?;
        req.validate()?;

        let email = req.email.trim();

        let existing = call_with_timeout(self.call_timeout(), self.profiles.find_by_email(email))
            .await?;
        if existing.is_some() {
            return Err(AuthError::EmailAlreadyInUse);
        }

        let invitation_code = generate_invitation_code(self.config.invitation.code_length);
        let temporary_password =
            generate_temporary_password(self.config.invitation.temporary_password_length);

        let identity = call_with_timeout(
            self.call_timeout(),
            self.credentials.create_identity(email, &temporary_password),
        )
        .await
        .map_err(|e| match e {
            StoreError::Conflict(_) => AuthError::EmailAlreadyInUse,
            other => other.into(),
        })?;

        let profile = Profile {
            role: UserRole::Tenant,
            property_id: Some(req.property_id.clone()),
            unit_id: Some(req.unit_id.clone()),
            has_completed_setup: Some(false),
            invitation_code: Some(invitation_code.clone()),
            temporary_password: Some(temporary_password.clone()),
            ..Profile::new_admin(
                identity.id.clone(),
                identity.email.clone(),
                req.first_name.trim().to_string(),
                req.last_name.trim().to_string(),
                req.phone_number.trim().to_string(),
            )
        };

        if let Err(cause) = call_with_timeout(
            self.call_timeout(),
            self.profiles.insert(ProfileRecord::from(&profile)),
        )
        .await
        {
            tracing::error!(user_id = %identity.id, error = %cause, "Tenant profile insert failed, removing identity");
            return Err(self.rollback_identity(&identity.id, cause).await);
        }

        let invitation = Invitation::new(
            identity.email.clone(),
            req.unit_id.clone(),
            invitation_code,
            self.config.invitation_ttl(),
        );

        if let Err(cause) = call_with_timeout(
            self.call_timeout(),
            self.invitations.create(invitation.clone()),
        )
        .await
        {
            tracing::error!(user_id = %identity.id, error = %cause, "Invitation insert failed, removing tenant");
            if let Err(rollback) =
                call_with_timeout(self.call_timeout(), self.profiles.delete(&identity.id)).await
            {
                tracing::error!(user_id = %identity.id, error = %rollback, "Rollback failed, profile orphaned");
                return Err(AuthError::RollbackFailed { cause, rollback });
            }
            return Err(self.rollback_identity(&identity.id, cause).await);
        }

        tracing::info!(
            admin_id = %admin.id,
            user_id = %profile.id,
            unit_id = %req.unit_id,
            "Tenant provisioned"
        );

        Ok(ProvisionedTenant {
            profile,
            invitation,
            temporary_password: Secret::new(temporary_password),
        })
    }

    /// Switch a tenant account off. Their next login fails.
    pub async fn deactivate_tenant(&self, tenant_id: &str) -> Result<Profile, AuthError> {
        let admin = self.require_admin()?;

        let record = call_with_timeout(self.call_timeout(), self.profiles.get_by_identity(tenant_id))
            .await?
            .ok_or(AuthError::ProfileNotFound)?;
        let tenant = Profile::try_from(record)?;

        if tenant.role != UserRole::Tenant {
            return Err(AuthError::Validation(
                "Only tenant accounts can be deactivated".to_string(),
            ));
        }

        let record = retry_call(&self.retry, "deactivate_tenant", || {
            self.profiles.update(tenant_id, ProfileChanges::deactivated())
        })
        .await?;

        tracing::info!(admin_id = %admin.id, user_id = %tenant_id, "Tenant deactivated");
        Ok(Profile::try_from(record)?)
    }

    fn require_admin(&self) -> Result<Profile, AuthError> {
        let state = self.sessions.snapshot();
        if self.sessions.current_session().is_none() {
            return Err(AuthError::NotAuthenticated);
        }
        match state.profile {
            Some(profile) if profile.role == UserRole::Admin && profile.is_active => Ok(profile),
            _ => Err(AuthError::AdminRequired),
        }
    }

    fn check_password_length(&self, password: &str) -> Result<(), AuthError> {
        if (password.chars().count() as u64) < self.config.min_password_length {
            return Err(AuthError::Validation(format!(
                "Password must be at least {} characters",
                self.config.min_password_length
            )));
        }
        Ok(())
    }

    /// Update the caller's own profile row and publish the result.
    async fn write_profile(
        &self,
        user_id: &str,
        changes: ProfileChanges,
    ) -> Result<Profile, AuthError> {
        let record = retry_call(&self.retry, "update_profile", || {
            self.profiles.update(user_id, changes.clone())
        })
        .await?;

        let profile = Profile::try_from(record)?;
        self.sessions.commit_profile(&profile);
        Ok(profile)
    }
}

fn profile_from(outcome: ResolutionOutcome) -> Result<Profile, AuthError> {
    match outcome {
        ResolutionOutcome::Found(profile) | ResolutionOutcome::Synthesized(profile) => Ok(profile),
        ResolutionOutcome::Deactivated(_) => Err(AuthError::AccountDeactivated),
        ResolutionOutcome::RevokeFailed(e) => Err(AuthError::RevocationFailed(e)),
        ResolutionOutcome::NotFound => Err(AuthError::ProfileNotFound),
        ResolutionOutcome::Failed(e) => Err(e.into()),
        ResolutionOutcome::Superseded => Err(AuthError::NotAuthenticated),
    }
}
