//! Navigation targets the auth core can ask for.

use super::profile::UserRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Login,
    AdminDashboard,
    TenantDashboard,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Login => "/login",
            Route::AdminDashboard => "/admin",
            Route::TenantDashboard => "/tenant",
        }
    }

    /// Landing page after authentication. Depends on the role only.
    pub fn home_for(role: UserRole) -> Self {
        match role {
            UserRole::Admin => Route::AdminDashboard,
            UserRole::Tenant => Route::TenantDashboard,
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}
