//! Services layer for the auth core.
//!
//! The session manager owns [`AuthState`](crate::models::AuthState); the
//! auth service drives the user-facing operations through it; the guard
//! and router only ever read it.

mod auth;
pub mod error;
pub mod guard;
pub mod resolution;
pub mod router;
mod session;

pub use auth::{AuthOutcome, AuthService, ProvisionedTenant};
pub use error::AuthError;
pub use guard::{evaluate, GuardDecision, RouteGuard};
pub use resolution::{FallbackPolicy, ResolutionOutcome};
pub use router::{next_route, Router};
pub use session::{SessionManager, SharedResolution};
