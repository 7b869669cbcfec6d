//! Invitation model - one-time codes that gate a tenant's first login.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Invitation state codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationState {
    Pending,
    Accepted,
    Expired,
}

impl InvitationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationState::Pending => "pending",
            InvitationState::Accepted => "accepted",
            InvitationState::Expired => "expired",
        }
    }
}

/// Invitation entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub id: String,
    pub email: String,
    pub unit_id: String,
    pub invitation_code: String,
    pub status: InvitationState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Invitation {
    /// Create a new pending invitation valid for `ttl`.
    pub fn new(email: String, unit_id: String, invitation_code: String, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            email,
            unit_id,
            invitation_code,
            status: InvitationState::Pending,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Check if invitation is pending and not expired.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.status == InvitationState::Pending && !self.is_expired_at(now)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_invitation_is_pending_and_valid() {
        let inv = Invitation::new(
            "t@example.com".into(),
            "unit-1".into(),
            "ABC123".into(),
            Duration::days(7),
        );
        assert_eq!(inv.status, InvitationState::Pending);
        assert!(inv.is_valid_at(Utc::now()));
        assert!(!inv.is_valid_at(inv.expires_at));
    }

    #[test]
    fn test_accepted_invitation_is_not_valid() {
        let mut inv = Invitation::new(
            "t@example.com".into(),
            "unit-1".into(),
            "ABC123".into(),
            Duration::days(7),
        );
        inv.status = InvitationState::Accepted;
        assert!(!inv.is_valid_at(Utc::now()));
    }
}
