//! Remote collaborators: the credential store, the profile table and the
//! invitation table. The core only ever talks to them through these traits.

pub mod memory;

use async_trait::async_trait;
use service_core::retry::Retryable;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::models::{Invitation, ProfileChanges, ProfileRecord, Session, SessionEvent};

pub use memory::{InMemoryCredentialStore, InMemoryInvitationRegistry, InMemoryProfileStore};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Credentials rejected")]
    CredentialsRejected,

    #[error("No active session")]
    NoSession,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }

    fn timed_out(after: Duration) -> Self {
        StoreError::Timeout(after)
    }
}

/// A credential identity, before any session exists for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub email: String,
}

/// Verifies passwords and owns the client's current session.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Sign in. Emits `SessionEvent::SignedIn` on success.
    async fn verify_password(&self, email: &str, password: &str) -> Result<Session, StoreError>;

    async fn current_session(&self) -> Result<Option<Session>, StoreError>;

    /// Session-change feed. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;

    /// Revoke the current session. Emits `SessionEvent::SignedOut`.
    async fn sign_out(&self) -> Result<(), StoreError>;

    /// Change the password of the signed-in identity.
    async fn set_password(&self, new_password: &str) -> Result<(), StoreError>;

    /// `StoreError::Conflict` when the email is taken.
    async fn create_identity(&self, email: &str, password: &str) -> Result<Identity, StoreError>;

    async fn delete_identity(&self, id: &str) -> Result<(), StoreError>;
}

/// Profile table, keyed by identity id. Reads may lag behind writes.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_by_identity(&self, id: &str) -> Result<Option<ProfileRecord>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<ProfileRecord>, StoreError>;

    /// `StoreError::Conflict` when a row with the same id exists.
    async fn insert(&self, record: ProfileRecord) -> Result<(), StoreError>;

    async fn update(&self, id: &str, changes: ProfileChanges)
        -> Result<ProfileRecord, StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// Invitation table.
#[async_trait]
pub trait InvitationRegistry: Send + Sync {
    /// Pending invitation for exactly this email and code, expired or not.
    async fn find_pending(&self, email: &str, code: &str)
        -> Result<Option<Invitation>, StoreError>;

    async fn mark_accepted(&self, id: &str) -> Result<(), StoreError>;

    async fn mark_expired(&self, id: &str) -> Result<(), StoreError>;

    /// Record a new pending invitation, superseding any pending one for the
    /// same email and unit.
    async fn create(&self, invitation: Invitation) -> Result<(), StoreError>;
}
