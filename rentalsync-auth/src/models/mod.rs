pub mod auth_state;
pub mod invitation;
pub mod profile;
pub mod route;
pub mod session;

pub use auth_state::AuthState;
pub use invitation::{Invitation, InvitationState};
pub use profile::{Profile, ProfileChanges, ProfileRecord, RecordError, UserRole};
pub use route::Route;
pub use session::{Session, SessionEvent};
