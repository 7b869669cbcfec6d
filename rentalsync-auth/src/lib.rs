//! RentalSync authentication core.
//!
//! Session handling, profile provisioning with retry and fallback,
//! invitation-gated first login and role-based routing, written against
//! abstract credential, profile and invitation stores.

pub mod config;
pub mod dtos;
pub mod models;
pub mod services;
pub mod stores;
pub mod utils;

use service_core::error::AppError;

use crate::config::AuthConfig;

pub use services::{AuthError, AuthOutcome, AuthService, SessionManager};

/// Install the tracing subscriber described by `config`.
pub fn init_tracing(config: &AuthConfig) -> Result<(), AppError> {
    service_core::observability::init_tracing(
        &config.service_name,
        &config.log_level,
        config.common.log_format,
    )
}
