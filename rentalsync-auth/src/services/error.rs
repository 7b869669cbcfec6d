use thiserror::Error;

use crate::models::RecordError;
use crate::stores::StoreError;

/// Failures surfaced by the auth core. None of them carry UI behavior;
/// callers decide how to present them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("Invalid or expired invitation code")]
    InvalidInvitation,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is deactivated")]
    AccountDeactivated,

    /// Deactivated, but the credential store still holds a live session.
    #[error("Account is deactivated and its session could not be revoked: {0}")]
    RevocationFailed(StoreError),

    #[error("No profile exists for this account")]
    ProfileNotFound,

    #[error("Tenants cannot self-register; ask your property manager for an invitation")]
    TenantSelfRegistrationDenied,

    #[error("Email already in use")]
    EmailAlreadyInUse,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Administrator role required")]
    AdminRequired,

    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// A partially created account could not be removed again.
    #[error("Rollback failed after '{cause}': {rollback}")]
    RollbackFailed { cause: StoreError, rollback: StoreError },

    #[error("Invalid profile record: {0}")]
    InvalidProfile(#[from] RecordError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::RemoteUnavailable(_))
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::CredentialsRejected => AuthError::InvalidCredentials,
            StoreError::NoSession => AuthError::NotAuthenticated,
            StoreError::Unavailable(_) | StoreError::Timeout(_) => {
                AuthError::RemoteUnavailable(err.to_string())
            }
            StoreError::Conflict(_) | StoreError::NotFound(_) | StoreError::InvalidRecord(_) => {
                AuthError::Internal(err.to_string())
            }
        }
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(err: validator::ValidationErrors) -> Self {
        AuthError::Validation(err.to_string())
    }
}
