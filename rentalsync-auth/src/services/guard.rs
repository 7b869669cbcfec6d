//! Route guard for protected views.

use tokio::sync::watch;

use super::session::SessionManager;
use crate::models::{AuthState, Route, UserRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// A transition is in progress; show a placeholder.
    Loading,
    /// Signed in, but the profile has not been provisioned yet.
    AwaitingProfile,
    Redirect(Route),
    Render,
}

/// Decide what a view requiring `required_role` should do for `state`.
pub fn evaluate(state: &AuthState, required_role: Option<UserRole>) -> GuardDecision {
    if state.loading {
        return GuardDecision::Loading;
    }
    if state.session.is_none() {
        return GuardDecision::Redirect(Route::Login);
    }
    match (&state.profile, required_role) {
        (None, _) => GuardDecision::AwaitingProfile,
        (Some(profile), Some(role)) if profile.role != role => {
            GuardDecision::Redirect(Route::Login)
        }
        (Some(_), _) => GuardDecision::Render,
    }
}

/// Guard bound to the live [`AuthState`].
pub struct RouteGuard {
    required_role: Option<UserRole>,
    state: watch::Receiver<AuthState>,
}

impl RouteGuard {
    pub fn new(sessions: &SessionManager, required_role: Option<UserRole>) -> Self {
        Self {
            required_role,
            state: sessions.state(),
        }
    }

    pub fn decision(&self) -> GuardDecision {
        evaluate(&self.state.borrow(), self.required_role)
    }

    /// Wait for the next state change and re-evaluate. `None` once the
    /// session manager is gone.
    pub async fn changed(&mut self) -> Option<GuardDecision> {
        self.state.changed().await.ok()?;
        let state = self.state.borrow_and_update();
        Some(evaluate(&state, self.required_role))
    }

    /// Wait until the decision is no longer [`GuardDecision::Loading`].
    pub async fn settled(&mut self) -> GuardDecision {
        loop {
            let decision = {
                let state = self.state.borrow_and_update();
                evaluate(&state, self.required_role)
            };
            if decision != GuardDecision::Loading {
                return decision;
            }
            if self.state.changed().await.is_err() {
                return decision;
            }
        }
    }
}
