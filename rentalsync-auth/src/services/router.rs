//! The one place that decides navigation.
//!
//! Routes are derived from [`AuthState`] transitions only: a sign-in that
//! settles with a profile goes to that role's home, and losing the session
//! goes to the login page. Nothing else in the crate navigates.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::session::SessionManager;
use crate::models::{AuthState, Route};

/// Route to take when the state moves from `prev` to `next`, if any.
pub fn next_route(prev: &AuthState, next: &AuthState) -> Option<Route> {
    if next.loading {
        return None;
    }

    match (&next.session, &next.profile) {
        (None, _) => {
            let had_session = prev.session.is_some();
            let was_initializing = prev.loading && prev.session.is_none();
            (had_session || was_initializing).then_some(Route::Login)
        }
        (Some(session), Some(profile)) => {
            let already_home = prev.profile.is_some()
                && prev
                    .session
                    .as_ref()
                    .map_or(false, |p| p.same_sign_in(session));
            (!already_home).then(|| Route::home_for(profile.role))
        }
        (Some(_), None) => None,
    }
}

/// Background task turning state changes into navigation requests.
pub struct Router {
    handle: JoinHandle<()>,
}

impl Router {
    /// Start routing. Each emitted [`Route`] is one navigation.
    pub fn spawn(sessions: &SessionManager) -> (Self, mpsc::UnboundedReceiver<Route>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = sessions.state();
        let prev = state.borrow_and_update().clone();
        let handle = tokio::spawn(run(state, prev, tx));
        (Self { handle }, rx)
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

async fn run(
    mut state: watch::Receiver<AuthState>,
    mut prev: AuthState,
    routes: mpsc::UnboundedSender<Route>,
) {
    while state.changed().await.is_ok() {
        let next = state.borrow_and_update().clone();
        if let Some(route) = next_route(&prev, &next) {
            info!(route = %route, user_id = ?next.user_id(), "Navigating");
            if routes.send(route).is_err() {
                debug!("Navigation receiver dropped, stopping router");
                return;
            }
        }
        prev = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Profile, Session, UserRole};
    use chrono::{Duration, Utc};

    fn session(token: &str) -> Session {
        Session {
            access_token: token.into(),
            user_id: "user-1".into(),
            email: "a@example.com".into(),
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    fn admin() -> Profile {
        Profile::new_admin(
            "user-1".into(),
            "a@example.com".into(),
            "A".into(),
            "B".into(),
            "555".into(),
        )
    }

    #[test]
    fn test_settled_sign_in_goes_home() {
        let prev = AuthState::resolving(session("t1"));
        let next = AuthState::settled(session("t1"), Some(admin()));
        assert_eq!(next_route(&prev, &next), Some(Route::AdminDashboard));
    }

    #[test]
    fn test_profile_refresh_does_not_navigate() {
        let prev = AuthState::settled(session("t1"), Some(admin()));
        let mut refreshed = admin();
        refreshed.first_name = "Changed".into();
        let next = AuthState::settled(session("t1"), Some(refreshed));
        assert_eq!(next_route(&prev, &next), None);
    }

    #[test]
    fn test_new_sign_in_navigates_again() {
        let prev = AuthState::settled(session("t1"), Some(admin()));
        let next = AuthState::settled(session("t2"), Some(admin()));
        assert_eq!(next_route(&prev, &next), Some(Route::AdminDashboard));
    }

    #[test]
    fn test_sign_out_goes_to_login_once() {
        let prev = AuthState::settled(session("t1"), Some(admin()));
        let out = AuthState::signed_out();
        assert_eq!(next_route(&prev, &out), Some(Route::Login));
        assert_eq!(next_route(&out, &out), None);
    }

    #[test]
    fn test_startup_without_session_goes_to_login() {
        assert_eq!(
            next_route(&AuthState::initializing(), &AuthState::signed_out()),
            Some(Route::Login)
        );
    }

    #[test]
    fn test_loading_and_missing_profile_stay_put() {
        let prev = AuthState::signed_out();
        assert_eq!(next_route(&prev, &AuthState::resolving(session("t1"))), None);
        assert_eq!(
            next_route(&prev, &AuthState::settled(session("t1"), None)),
            None
        );
    }

    #[test]
    fn test_tenant_home() {
        let mut tenant = admin();
        tenant.role = UserRole::Tenant;
        let next = AuthState::settled(session("t1"), Some(tenant));
        assert_eq!(
            next_route(&AuthState::signed_out(), &next),
            Some(Route::TenantDashboard)
        );
    }
}
