//! In-process store implementations.
//!
//! Used by the test-suite and for local development. Each one counts calls
//! and can be told to fail, and the profile store can simulate replication
//! lag between an insert and the row becoming readable.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use subtle::ConstantTimeEq;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{CredentialStore, Identity, InvitationRegistry, ProfileStore, StoreError};
use crate::models::{
    Invitation, InvitationState, Profile, ProfileChanges, ProfileRecord, Session, SessionEvent,
};
use crate::utils::{hash_password, verify_password, Password, PasswordHashString};

const EVENT_BUFFER: usize = 64;

fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Clone)]
struct StoredIdentity {
    id: String,
    email: String,
    password_hash: PasswordHashString,
}

pub struct InMemoryCredentialStore {
    identities: DashMap<String, StoredIdentity>,
    current: Mutex<Option<Session>>,
    events: broadcast::Sender<SessionEvent>,
    session_ttl: Duration,
    verify_calls: AtomicU32,
    sign_out_calls: AtomicU32,
    fail_sign_out: AtomicBool,
    fail_delete_identity: AtomicBool,
}

impl Default for InMemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::with_session_ttl(Duration::hours(1))
    }

    pub fn with_session_ttl(session_ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            identities: DashMap::new(),
            current: Mutex::new(None),
            events,
            session_ttl,
            verify_calls: AtomicU32::new(0),
            sign_out_calls: AtomicU32::new(0),
            fail_sign_out: AtomicBool::new(false),
            fail_delete_identity: AtomicBool::new(false),
        }
    }

    fn lock_current(&self) -> Result<MutexGuard<'_, Option<Session>>, StoreError> {
        self.current
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("Session mutex poisoned: {}", e)))
    }

    /// Register an identity directly, without going through `create_identity`.
    pub fn add_identity(&self, email: &str, password: &str) -> Result<Identity, StoreError> {
        let password_hash = hash_password(&Password::new(password))
            .map_err(|e| StoreError::InvalidRecord(e.to_string()))?;

        match self.identities.entry(email_key(email)) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "Identity already exists for {}",
                email
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let identity = Identity {
                    id: Uuid::new_v4().to_string(),
                    email: email.trim().to_string(),
                };
                slot.insert(StoredIdentity {
                    id: identity.id.clone(),
                    email: identity.email.clone(),
                    password_hash,
                });
                Ok(identity)
            }
        }
    }

    /// Pretend a session survived from an earlier run, without emitting an event.
    pub fn restore_session(&self, session: Session) -> Result<(), StoreError> {
        *self.lock_current()? = Some(session);
        Ok(())
    }

    /// Push an event as if another client had changed the session.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub fn has_identity(&self, email: &str) -> bool {
        self.identities.contains_key(&email_key(email))
    }

    pub fn verify_calls(&self) -> u32 {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn sign_out_calls(&self) -> u32 {
        self.sign_out_calls.load(Ordering::SeqCst)
    }

    pub fn set_sign_out_failure(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::SeqCst);
    }

    pub fn set_delete_identity_failure(&self, fail: bool) {
        self.fail_delete_identity.store(fail, Ordering::SeqCst);
    }

    /// Current session as the remote sees it, expired or not.
    pub fn peek_session(&self) -> Option<Session> {
        self.current.lock().ok().and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn verify_password(&self, email: &str, password: &str) -> Result<Session, StoreError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);

        let stored = self
            .identities
            .get(&email_key(email))
            .map(|entry| entry.clone())
            .ok_or(StoreError::CredentialsRejected)?;

        let valid = verify_password(&Password::new(password), &stored.password_hash)
            .map_err(|e| StoreError::InvalidRecord(e.to_string()))?;
        if !valid {
            return Err(StoreError::CredentialsRejected);
        }

        let session = Session {
            access_token: Uuid::new_v4().to_string(),
            user_id: stored.id,
            email: stored.email,
            expires_at: Utc::now() + self.session_ttl,
        };

        *self.lock_current()? = Some(session.clone());
        let _ = self.events.send(SessionEvent::SignedIn(session.clone()));

        Ok(session)
    }

    async fn current_session(&self) -> Result<Option<Session>, StoreError> {
        let current = self.lock_current()?;
        Ok(current.clone().filter(|s| !s.is_expired()))
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn sign_out(&self) -> Result<(), StoreError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("sign-out request failed".to_string()));
        }

        *self.lock_current()? = None;
        let _ = self.events.send(SessionEvent::SignedOut);
        Ok(())
    }

    async fn set_password(&self, new_password: &str) -> Result<(), StoreError> {
        let user_id = self
            .lock_current()?
            .as_ref()
            .filter(|s| !s.is_expired())
            .map(|s| s.user_id.clone())
            .ok_or(StoreError::NoSession)?;

        let password_hash = hash_password(&Password::new(new_password))
            .map_err(|e| StoreError::InvalidRecord(e.to_string()))?;

        let mut entry = self
            .identities
            .iter_mut()
            .find(|entry| entry.id == user_id)
            .ok_or_else(|| StoreError::NotFound(format!("identity {}", user_id)))?;
        entry.password_hash = password_hash;

        Ok(())
    }

    async fn create_identity(&self, email: &str, password: &str) -> Result<Identity, StoreError> {
        self.add_identity(email, password)
    }

    async fn delete_identity(&self, id: &str) -> Result<(), StoreError> {
        if self.fail_delete_identity.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "identity deletion failed".to_string(),
            ));
        }

        let before = self.identities.len();
        self.identities.retain(|_, identity| identity.id != id);
        if self.identities.len() == before {
            return Err(StoreError::NotFound(format!("identity {}", id)));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryProfileStore {
    rows: DashMap<String, ProfileRecord>,
    hidden_reads: DashMap<String, u32>,
    read_calls: AtomicU32,
    insert_calls: AtomicU32,
    unavailable_reads: AtomicU32,
    insert_lag: AtomicU32,
    read_delay_ms: AtomicU64,
    reject_inserts: AtomicBool,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, profile: &Profile) {
        self.rows
            .insert(profile.id.clone(), ProfileRecord::from(profile));
    }

    /// Seed a row that stays invisible to the next `hidden_reads` lookups.
    pub fn seed_lagged(&self, profile: &Profile, hidden_reads: u32) {
        self.hidden_reads.insert(profile.id.clone(), hidden_reads);
        self.seed(profile);
    }

    /// Make the next `count` reads fail as unavailable.
    pub fn fail_next_reads(&self, count: u32) {
        self.unavailable_reads.store(count, Ordering::SeqCst);
    }

    /// Every read takes `delay` before answering.
    pub fn set_read_delay(&self, delay: std::time::Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Rows inserted from now on stay invisible to their first `hidden_reads`
    /// lookups.
    pub fn set_insert_lag(&self, hidden_reads: u32) {
        self.insert_lag.store(hidden_reads, Ordering::SeqCst);
    }

    pub fn set_reject_inserts(&self, reject: bool) {
        self.reject_inserts.store(reject, Ordering::SeqCst);
    }

    /// Row as stored, ignoring lag.
    pub fn get(&self, id: &str) -> Option<ProfileRecord> {
        self.rows.get(id).map(|row| row.clone())
    }

    pub fn read_calls(&self) -> u32 {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn insert_calls(&self) -> u32 {
        self.insert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn get_by_identity(&self, id: &str) -> Result<Option<ProfileRecord>, StoreError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);

        let delay_ms = self.read_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }

        if self
            .unavailable_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Unavailable("profile read failed".to_string()));
        }

        if let Some(mut remaining) = self.hidden_reads.get_mut(id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(None);
            }
        }

        Ok(self.rows.get(id).map(|row| row.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<ProfileRecord>, StoreError> {
        let key = email_key(email);
        Ok(self
            .rows
            .iter()
            .find(|row| email_key(&row.email) == key)
            .map(|row| row.clone()))
    }

    async fn insert(&self, record: ProfileRecord) -> Result<(), StoreError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);

        if self.reject_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("profile insert failed".to_string()));
        }

        match self.rows.entry(record.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "profile {} already exists",
                record.id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let lag = self.insert_lag.load(Ordering::SeqCst);
                if lag > 0 {
                    self.hidden_reads.insert(record.id.clone(), lag);
                }
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn update(
        &self,
        id: &str,
        changes: ProfileChanges,
    ) -> Result<ProfileRecord, StoreError> {
        let mut row = self
            .rows
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("profile {}", id)))?;
        changes.apply_to(&mut row);
        Ok(row.clone())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.hidden_reads.remove(id);
        self.rows
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("profile {}", id)))
    }
}

#[derive(Default)]
pub struct InMemoryInvitationRegistry {
    rows: DashMap<String, Invitation>,
    find_calls: AtomicU32,
    unavailable: AtomicBool,
}

impl InMemoryInvitationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, invitation: Invitation) {
        self.rows.insert(invitation.id.clone(), invitation);
    }

    pub fn get(&self, id: &str) -> Option<Invitation> {
        self.rows.get(id).map(|row| row.clone())
    }

    pub fn all(&self) -> Vec<Invitation> {
        self.rows.iter().map(|row| row.clone()).collect()
    }

    pub fn find_calls(&self) -> u32 {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "invitation registry unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl InvitationRegistry for InMemoryInvitationRegistry {
    async fn find_pending(
        &self,
        email: &str,
        code: &str,
    ) -> Result<Option<Invitation>, StoreError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let key = email_key(email);
        Ok(self
            .rows
            .iter()
            .filter(|inv| inv.status == InvitationState::Pending)
            .filter(|inv| email_key(&inv.email) == key)
            .filter(|inv| bool::from(inv.invitation_code.as_bytes().ct_eq(code.as_bytes())))
            .max_by_key(|inv| inv.created_at)
            .map(|inv| inv.clone()))
    }

    async fn mark_accepted(&self, id: &str) -> Result<(), StoreError> {
        self.check_available()?;

        let mut row = self
            .rows
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("invitation {}", id)))?;
        if row.status != InvitationState::Pending {
            return Err(StoreError::Conflict(format!(
                "invitation {} is {}",
                id,
                row.status.as_str()
            )));
        }
        row.status = InvitationState::Accepted;
        Ok(())
    }

    async fn mark_expired(&self, id: &str) -> Result<(), StoreError> {
        self.check_available()?;

        let mut row = self
            .rows
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("invitation {}", id)))?;
        if row.status == InvitationState::Pending {
            row.status = InvitationState::Expired;
        }
        Ok(())
    }

    async fn create(&self, invitation: Invitation) -> Result<(), StoreError> {
        self.check_available()?;

        if self.rows.contains_key(&invitation.id) {
            return Err(StoreError::Conflict(format!(
                "invitation {} already exists",
                invitation.id
            )));
        }

        let key = email_key(&invitation.email);
        let superseded: Vec<String> = self
            .rows
            .iter()
            .filter(|inv| inv.status == InvitationState::Pending)
            .filter(|inv| email_key(&inv.email) == key && inv.unit_id == invitation.unit_id)
            .map(|inv| inv.id.clone())
            .collect();

        for id in superseded {
            if let Some(mut row) = self.rows.get_mut(&id) {
                row.status = InvitationState::Expired;
            }
        }

        self.rows.insert(invitation.id.clone(), invitation);
        Ok(())
    }
}
