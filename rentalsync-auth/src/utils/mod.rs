pub mod credentials;
pub mod password;

pub use credentials::{generate_invitation_code, generate_temporary_password};
pub use password::{hash_password, verify_password, Password, PasswordHashString};
