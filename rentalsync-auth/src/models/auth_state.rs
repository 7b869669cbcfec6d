//! The read model consumers observe: who is signed in, and as what.

use super::profile::{Profile, UserRole};
use super::session::Session;

/// `profile` is `None` whenever `session` is `None`. A session with no
/// profile and `loading == false` means provisioning has not caught up;
/// it does not mean signed out.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthState {
    pub session: Option<Session>,
    pub profile: Option<Profile>,
    pub loading: bool,
}

impl Default for AuthState {
    fn default() -> Self {
        Self::initializing()
    }
}

impl AuthState {
    /// Before `initialize()` has looked for a session.
    pub fn initializing() -> Self {
        Self {
            session: None,
            profile: None,
            loading: true,
        }
    }

    pub fn signed_out() -> Self {
        Self {
            session: None,
            profile: None,
            loading: false,
        }
    }

    pub fn resolving(session: Session) -> Self {
        Self {
            session: Some(session),
            profile: None,
            loading: true,
        }
    }

    pub fn settled(session: Session, profile: Option<Profile>) -> Self {
        Self {
            session: Some(session),
            profile,
            loading: false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    pub fn role(&self) -> Option<UserRole> {
        self.profile.as_ref().map(|p| p.role)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.user_id.as_str())
    }
}
