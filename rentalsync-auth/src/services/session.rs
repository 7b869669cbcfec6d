//! Session manager - sole writer of [`AuthState`].
//!
//! Every identity transition (a sign-in being adopted, or a clear) bumps an
//! epoch. A profile resolution remembers the epoch it started under and
//! only commits while that epoch is still current, so a sign-out in the
//! middle of a retry loop wins over whatever the loop finds afterwards.
//!
//! Resolutions for the same sign-in are shared: the login path and the
//! `SignedIn` subscriber end up awaiting one in-flight future. A caller
//! that joins with a more permissive fallback policy widens the policy of
//! the shared resolution.

use dashmap::DashSet;
use futures::future::{BoxFuture, FutureExt, Shared};
use service_core::retry::{call_with_timeout, retry_call, RetryConfig};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::error::AuthError;
use super::resolution::{FallbackPolicy, Input, Resolution, ResolutionOutcome, Step};
use crate::config::{AuthConfig, FallbackMode};
use crate::models::{AuthState, Profile, ProfileRecord, Session, SessionEvent};
use crate::stores::{CredentialStore, ProfileStore, StoreError};

/// A resolution that several callers can await.
pub type SharedResolution = Shared<BoxFuture<'static, ResolutionOutcome>>;

const RETIRED_SIGN_INS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Caller holds a session it just obtained.
    Direct,
    /// Session came from the event feed or a store lookup and may be stale.
    Observed,
}

struct Current {
    session: Session,
    resolution: SharedResolution,
    /// Set once any caller of this resolution permits the fallback insert.
    fallback: Arc<AtomicBool>,
}

enum Commit {
    Published(ResolutionOutcome),
    /// Fallback was permitted after reads ran out; keep going.
    Reopen,
}

#[derive(Default)]
struct Control {
    epoch: u64,
    current: Option<Current>,
    /// Access tokens of sign-ins that were cleared. A late `SignedIn` for
    /// one of them is dropped.
    retired: VecDeque<String>,
}

impl Control {
    fn retire_current(&mut self) {
        if let Some(prev) = self.current.take() {
            if self.retired.len() == RETIRED_SIGN_INS {
                self.retired.pop_front();
            }
            self.retired.push_back(prev.session.access_token);
        }
    }

    fn is_retired(&self, session: &Session) -> bool {
        self.retired.iter().any(|t| *t == session.access_token)
    }
}

struct Inner {
    credentials: Arc<dyn CredentialStore>,
    profiles: Arc<dyn ProfileStore>,
    max_attempts: u32,
    retry_delay: Duration,
    call_timeout: Duration,
    fallback: FallbackMode,
    retry: RetryConfig,
    state: watch::Sender<AuthState>,
    control: Mutex<Control>,
    fresh_registrations: DashSet<String>,
    subscription: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        profiles: Arc<dyn ProfileStore>,
        config: &AuthConfig,
    ) -> Self {
        let (state, _) = watch::channel(AuthState::initializing());
        Self {
            inner: Arc::new(Inner {
                credentials,
                profiles,
                max_attempts: config.profile.retry_attempts,
                retry_delay: config.profile.retry_delay,
                call_timeout: config.profile.call_timeout,
                fallback: config.profile.fallback,
                retry: config.retry_config(),
                state,
                control: Mutex::new(Control::default()),
                fresh_registrations: DashSet::new(),
                subscription: Mutex::new(None),
            }),
        }
    }

    /// Look up any surviving session and start listening for session events.
    ///
    /// Settles `loading` to `false` whatever happens. A second call is a no-op.
    pub async fn initialize(&self) -> Result<(), AuthError> {
        {
            let mut subscription = lock(&self.inner.subscription);
            if subscription.is_some() {
                warn!("Session manager already initialized");
                return Ok(());
            }
            let events = self.inner.credentials.subscribe();
            *subscription = Some(tokio::spawn(run_subscription(
                Arc::clone(&self.inner),
                events,
            )));
        }

        let found = call_with_timeout(
            self.inner.call_timeout,
            self.inner.credentials.current_session(),
        )
        .await;

        match found {
            Ok(Some(session)) if !session.is_expired() => {
                info!(user_id = %session.user_id, "Restoring existing session");
                let policy = self.inner.policy_for(&session.user_id);
                match self.inner.register(session, policy, Origin::Observed) {
                    Some(resolution) => {
                        resolution.await;
                    }
                    None => self.inner.settle_if_initializing(),
                }
                Ok(())
            }
            Ok(_) => {
                debug!("No existing session");
                self.inner.settle_if_initializing();
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Could not look up existing session");
                self.inner.settle_if_initializing();
                Err(e.into())
            }
        }
    }

    /// Stop listening for session events.
    pub fn dispose(&self) {
        if let Some(handle) = lock(&self.inner.subscription).take() {
            handle.abort();
            debug!("Session event subscription disposed");
        }
    }

    pub fn state(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    /// Session currently held in [`AuthState`], unless it has expired.
    pub fn current_session(&self) -> Option<Session> {
        self.inner
            .state
            .borrow()
            .session
            .clone()
            .filter(|s| !s.is_expired())
    }

    /// Make `session` the current identity and resolve its profile with the
    /// configured fallback policy. Joins the in-flight resolution when the
    /// same sign-in is already being resolved.
    ///
    /// Must be called from within a tokio runtime.
    pub fn adopt(&self, session: Session) -> SharedResolution {
        let policy = self.inner.policy_for(&session.user_id);
        self.resolve_with(session, policy)
    }

    /// Like [`adopt`](Self::adopt) with an explicit fallback policy.
    pub async fn resolve_profile(
        &self,
        session: Session,
        policy: FallbackPolicy,
    ) -> ResolutionOutcome {
        self.resolve_with(session, policy).await
    }

    fn resolve_with(&self, session: Session, policy: FallbackPolicy) -> SharedResolution {
        self.inner
            .register(session, policy, Origin::Direct)
            .unwrap_or_else(|| superseded())
    }

    /// Drop the current identity. Any resolution in flight is discarded.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Replace the profile of the signed-in identity after a write.
    /// Returns `false` when `profile` does not belong to the current session.
    /// A resolution still in flight keeps `loading` set.
    pub fn commit_profile(&self, profile: &Profile) -> bool {
        let _control = lock(&self.inner.control);
        self.inner.state.send_if_modified(|state| {
            let owns = state
                .session
                .as_ref()
                .map_or(false, |s| s.user_id == profile.id);
            if owns {
                state.profile = Some(profile.clone());
            }
            owns
        })
    }

    /// Identity was just created by self-registration; its profile row may
    /// not be readable yet and a fallback is acceptable.
    pub fn mark_fresh_registration(&self, user_id: &str) {
        self.inner.fresh_registrations.insert(user_id.to_string());
    }
}

fn superseded() -> SharedResolution {
    futures::future::ready(ResolutionOutcome::Superseded)
        .boxed()
        .shared()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn policy_for(&self, user_id: &str) -> FallbackPolicy {
        match self.fallback {
            FallbackMode::Never => FallbackPolicy::Forbid,
            FallbackMode::Always => FallbackPolicy::Create,
            FallbackMode::AfterRegistration if self.fresh_registrations.contains(user_id) => {
                FallbackPolicy::Create
            }
            FallbackMode::AfterRegistration => FallbackPolicy::Forbid,
        }
    }

    /// Start (or join) resolution for `session`. `None` when an observed
    /// session is expired or was already cleared.
    fn register(
        self: &Arc<Self>,
        session: Session,
        policy: FallbackPolicy,
        origin: Origin,
    ) -> Option<SharedResolution> {
        let mut control = lock(&self.control);

        if origin == Origin::Observed && (session.is_expired() || control.is_retired(&session)) {
            debug!(user_id = %session.user_id, "Ignoring stale or expired sign-in");
            return None;
        }

        let mut restart = false;
        if let Some(current) = &control.current {
            if current.session.same_sign_in(&session) {
                if policy == FallbackPolicy::Create {
                    current.fallback.store(true, Ordering::SeqCst);
                    restart = matches!(
                        current.resolution.peek(),
                        Some(ResolutionOutcome::NotFound)
                    );
                }
                if !restart {
                    debug!(user_id = %session.user_id, "Joining in-flight resolution");
                    return Some(current.resolution.clone());
                }
                debug!(user_id = %session.user_id, "Resolving again with fallback permitted");
            }
        }

        if restart {
            control.current = None;
        } else {
            control.retire_current();
        }
        control.epoch += 1;
        let epoch = control.epoch;

        info!(user_id = %session.user_id, epoch, ?policy, "Adopting session");

        let fallback = Arc::new(AtomicBool::new(policy == FallbackPolicy::Create));
        let resolution = resolve(
            Arc::clone(self),
            session.clone(),
            epoch,
            Arc::clone(&fallback),
        )
        .boxed()
        .shared();
        self.state
            .send_replace(AuthState::resolving(session.clone()));
        control.current = Some(Current {
            session,
            resolution: resolution.clone(),
            fallback,
        });
        drop(control);

        tokio::spawn(resolution.clone());
        Some(resolution)
    }

    fn clear(&self) {
        let mut control = lock(&self.control);
        control.retire_current();
        control.epoch += 1;
        let epoch = control.epoch;
        let changed = self
            .state
            .send_if_modified(|state| replace_if_different(state, AuthState::signed_out()));
        if changed {
            info!(epoch, "Session cleared");
        }
    }

    fn settle_if_initializing(&self) {
        let _control = lock(&self.control);
        self.state.send_if_modified(|state| {
            if state.loading && state.session.is_none() {
                *state = AuthState::signed_out();
                true
            } else {
                false
            }
        });
    }

    fn is_current(&self, epoch: u64) -> bool {
        lock(&self.control).epoch == epoch
    }

    /// Publish the outcome if `epoch` is still current.
    fn commit(
        &self,
        session: &Session,
        epoch: u64,
        fallback: &AtomicBool,
        outcome: ResolutionOutcome,
    ) -> Commit {
        let mut control = lock(&self.control);
        if control.epoch != epoch {
            debug!(user_id = %session.user_id, epoch, "Discarding superseded resolution");
            return Commit::Published(ResolutionOutcome::Superseded);
        }
        if outcome == ResolutionOutcome::NotFound && fallback.load(Ordering::SeqCst) {
            return Commit::Reopen;
        }
        self.fresh_registrations.remove(&session.user_id);

        match &outcome {
            ResolutionOutcome::Deactivated(_) => {
                control.retire_current();
                control.epoch += 1;
                self.state.send_replace(AuthState::signed_out());
            }
            other => {
                self.state.send_replace(AuthState::settled(
                    session.clone(),
                    other.profile().cloned(),
                ));
            }
        }

        Commit::Published(outcome)
    }

    async fn fetch(&self, user_id: &str) -> Input {
        match call_with_timeout(self.call_timeout, self.profiles.get_by_identity(user_id)).await {
            Ok(Some(record)) => match Profile::try_from(record) {
                Ok(profile) => Input::Fetched(profile),
                Err(e) => Input::ReadFailed(StoreError::InvalidRecord(e.to_string())),
            },
            Ok(None) => Input::Missing,
            Err(e) => Input::ReadFailed(e),
        }
    }

    async fn insert_fallback(&self, session: &Session) -> Input {
        let profile = Profile::fallback(session.user_id.clone(), session.email.clone());
        let record = ProfileRecord::from(&profile);
        match call_with_timeout(self.call_timeout, self.profiles.insert(record)).await {
            Ok(()) => Input::Inserted,
            Err(e) => Input::InsertRejected(e),
        }
    }
}

fn replace_if_different(state: &mut AuthState, next: AuthState) -> bool {
    if *state == next {
        false
    } else {
        *state = next;
        true
    }
}

async fn resolve(
    inner: Arc<Inner>,
    session: Session,
    epoch: u64,
    fallback: Arc<AtomicBool>,
) -> ResolutionOutcome {
    let policy = policy_of(&fallback);
    let mut machine = Resolution::new(inner.max_attempts, inner.retry_delay, policy);
    let mut step = machine.start();

    loop {
        let input = match step {
            Step::Fetch { delay } => {
                if !delay.is_zero() {
                    warn!(
                        user_id = %session.user_id,
                        attempt = machine.attempt(),
                        backoff_ms = delay.as_millis() as u64,
                        "Profile not available yet, retrying"
                    );
                    sleep(delay).await;
                }
                if !inner.is_current(epoch) {
                    debug!(user_id = %session.user_id, epoch, "Resolution abandoned");
                    return ResolutionOutcome::Superseded;
                }
                inner.fetch(&session.user_id).await
            }
            Step::InsertFallback => {
                if !inner.is_current(epoch) {
                    debug!(user_id = %session.user_id, epoch, "Resolution abandoned before fallback insert");
                    return ResolutionOutcome::Superseded;
                }
                warn!(user_id = %session.user_id, "Profile missing, creating fallback profile");
                inner.insert_fallback(&session).await
            }
            Step::Settle(outcome) => match inner.commit(&session, epoch, &fallback, outcome) {
                Commit::Published(outcome) => {
                    log_outcome(&session, &outcome);
                    if let ResolutionOutcome::Deactivated(_) = outcome {
                        if let Err(e) = revoke(&inner).await {
                            warn!(user_id = %session.user_id, error = %e, "Session of deactivated account is still live");
                            return ResolutionOutcome::RevokeFailed(e);
                        }
                    }
                    return outcome;
                }
                Commit::Reopen => {
                    step = machine.reopen_with_fallback();
                    continue;
                }
            },
        };
        if policy_of(&fallback) == FallbackPolicy::Create {
            machine.permit_fallback();
        }
        step = machine.advance(input);
    }
}

fn policy_of(fallback: &AtomicBool) -> FallbackPolicy {
    if fallback.load(Ordering::SeqCst) {
        FallbackPolicy::Create
    } else {
        FallbackPolicy::Forbid
    }
}

async fn revoke(inner: &Inner) -> Result<(), StoreError> {
    match retry_call(&inner.retry, "revoke_deactivated", || inner.credentials.sign_out()).await {
        Ok(()) | Err(StoreError::NoSession) => Ok(()),
        Err(e) => Err(e),
    }
}

fn log_outcome(session: &Session, outcome: &ResolutionOutcome) {
    let user_id = session.user_id.as_str();
    match outcome {
        ResolutionOutcome::Found(p) => info!(user_id, role = %p.role, "Profile resolved"),
        ResolutionOutcome::Synthesized(_) => warn!(user_id, "Using fallback profile"),
        ResolutionOutcome::Deactivated(_) => warn!(user_id, "Profile is deactivated"),
        ResolutionOutcome::RevokeFailed(e) => warn!(user_id, error = %e, "Could not revoke deactivated session"),
        ResolutionOutcome::NotFound => warn!(user_id, "No profile after all attempts"),
        ResolutionOutcome::Failed(e) => warn!(user_id, error = %e, "Profile resolution failed"),
        ResolutionOutcome::Superseded => debug!(user_id, "Resolution superseded"),
    }
}

async fn run_subscription(inner: Arc<Inner>, mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::SignedIn(session)) => {
                let policy = inner.policy_for(&session.user_id);
                inner.register(session, policy, Origin::Observed);
            }
            Ok(SessionEvent::SignedOut) => inner.clear(),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Session events lagged, re-reading current session");
                resync(&inner).await;
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Session event feed closed");
                break;
            }
        }
    }
}

async fn resync(inner: &Arc<Inner>) {
    match call_with_timeout(inner.call_timeout, inner.credentials.current_session()).await {
        Ok(Some(session)) => {
            let policy = inner.policy_for(&session.user_id);
            inner.register(session, policy, Origin::Observed);
        }
        Ok(None) => inner.clear(),
        Err(e) => warn!(error = %e, "Could not re-read session after lag"),
    }
}
