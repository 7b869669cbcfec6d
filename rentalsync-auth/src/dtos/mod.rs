pub mod auth;

pub use auth::{ProvisionTenantRequest, RegisterRequest, UpdateProfileRequest};
