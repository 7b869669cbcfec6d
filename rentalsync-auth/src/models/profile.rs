//! Profile model - the role and personal fields attached to an identity.
//!
//! `ProfileRecord` is the row as the profile table stores it (camelCase,
//! loosely typed). `Profile` is the in-memory shape. The `TryFrom`/`From`
//! pair below is the only place the two are converted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Role codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Tenant,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Tenant => "tenant",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserRole::Admin),
            "tenant" => Ok(UserRole::Tenant),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// Profile entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    /// Same value as the credential identity id.
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub role: UserRole,
    pub property_id: Option<String>,
    pub unit_id: Option<String>,
    pub is_active: bool,
    /// `None` until something decides; fallback profiles leave it unset.
    pub has_completed_setup: Option<bool>,
    pub invitation_code: Option<String>,
    pub temporary_password: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Self-registered administrator.
    pub fn new_admin(
        id: String,
        email: String,
        first_name: String,
        last_name: String,
        phone_number: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            email,
            first_name,
            last_name,
            phone_number,
            role: UserRole::Admin,
            property_id: None,
            unit_id: None,
            is_active: true,
            has_completed_setup: Some(true),
            invitation_code: None,
            temporary_password: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Minimal profile synthesized when none can be found for a session.
    pub fn fallback(id: String, email: String) -> Self {
        let now = Utc::now();
        let short_id: String = id.chars().take(8).collect();
        Self {
            first_name: "User".to_string(),
            last_name: short_id,
            phone_number: String::new(),
            has_completed_setup: None,
            created_at: now,
            updated_at: now,
            ..Self::new_admin(id, email, String::new(), String::new(), String::new())
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn has_temporary_credentials(&self) -> bool {
        self.temporary_password.is_some() || self.invitation_code.is_some()
    }
}

/// Profile row as stored by the profile table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    pub id: String,
    pub email: String,
    pub role: String,
    pub phone_number: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub property_id: Option<String>,
    #[serde(default)]
    pub unit_id: Option<String>,
    #[serde(default)]
    pub invitation_code: Option<String>,
    #[serde(default)]
    pub temporary_password: Option<String>,
    #[serde(default)]
    pub has_completed_setup: Option<bool>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RecordError {
    #[error("Unknown role '{0}'")]
    UnknownRole(String),

    #[error("Invalid timestamp in {field}: {value}")]
    InvalidTimestamp { field: &'static str, value: String },
}

fn parse_timestamp(field: &'static str, value: &str) -> Result<DateTime<Utc>, RecordError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RecordError::InvalidTimestamp {
            field,
            value: value.to_string(),
        })
}

impl TryFrom<ProfileRecord> for Profile {
    type Error = RecordError;

    fn try_from(r: ProfileRecord) -> Result<Self, Self::Error> {
        let role = r
            .role
            .parse::<UserRole>()
            .map_err(|_| RecordError::UnknownRole(r.role.clone()))?;

        Ok(Self {
            created_at: parse_timestamp("createdAt", &r.created_at)?,
            updated_at: parse_timestamp("updatedAt", &r.updated_at)?,
            id: r.id,
            email: r.email,
            first_name: r.first_name.unwrap_or_default(),
            last_name: r.last_name.unwrap_or_default(),
            phone_number: r.phone_number,
            role,
            property_id: r.property_id,
            unit_id: r.unit_id,
            // Column defaults to active when absent.
            is_active: r.is_active.unwrap_or(true),
            has_completed_setup: r.has_completed_setup,
            invitation_code: r.invitation_code,
            temporary_password: r.temporary_password,
        })
    }
}

impl From<&Profile> for ProfileRecord {
    fn from(p: &Profile) -> Self {
        Self {
            id: p.id.clone(),
            email: p.email.clone(),
            role: p.role.as_str().to_string(),
            phone_number: p.phone_number.clone(),
            created_at: p.created_at.to_rfc3339(),
            updated_at: p.updated_at.to_rfc3339(),
            first_name: Some(p.first_name.clone()),
            last_name: Some(p.last_name.clone()),
            is_active: Some(p.is_active),
            property_id: p.property_id.clone(),
            unit_id: p.unit_id.clone(),
            invitation_code: p.invitation_code.clone(),
            temporary_password: p.temporary_password.clone(),
            has_completed_setup: p.has_completed_setup,
        }
    }
}

/// Partial update of a profile row.
///
/// `None` leaves a column alone. For nullable columns `Some(None)` writes
/// `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_id: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_completed_setup: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invitation_code: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporary_password: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl ProfileChanges {
    fn stamped() -> Self {
        Self {
            updated_at: Some(Utc::now().to_rfc3339()),
            ..Default::default()
        }
    }

    /// Password replaced: drop the one-time credentials.
    pub fn credentials_settled() -> Self {
        Self {
            invitation_code: Some(None),
            temporary_password: Some(None),
            has_completed_setup: Some(true),
            ..Self::stamped()
        }
    }

    /// First login through an invitation for the given unit. Only tenants
    /// are assigned the unit.
    pub fn invitation_accepted(role: UserRole, unit_id: &str) -> Self {
        Self {
            unit_id: (role == UserRole::Tenant).then(|| Some(unit_id.to_string())),
            has_completed_setup: Some(true),
            ..Self::stamped()
        }
    }

    pub fn deactivated() -> Self {
        Self {
            is_active: Some(false),
            ..Self::stamped()
        }
    }

    pub fn personal(first_name: String, last_name: String, phone_number: String) -> Self {
        Self {
            first_name: Some(first_name),
            last_name: Some(last_name),
            phone_number: Some(phone_number),
            ..Self::stamped()
        }
    }

    /// Apply the changes to a stored row.
    pub fn apply_to(&self, record: &mut ProfileRecord) {
        if let Some(v) = &self.first_name {
            record.first_name = Some(v.clone());
        }
        if let Some(v) = &self.last_name {
            record.last_name = Some(v.clone());
        }
        if let Some(v) = &self.phone_number {
            record.phone_number = v.clone();
        }
        if let Some(v) = &self.property_id {
            record.property_id = v.clone();
        }
        if let Some(v) = &self.unit_id {
            record.unit_id = v.clone();
        }
        if let Some(v) = self.is_active {
            record.is_active = Some(v);
        }
        if let Some(v) = self.has_completed_setup {
            record.has_completed_setup = Some(v);
        }
        if let Some(v) = &self.invitation_code {
            record.invitation_code = v.clone();
        }
        if let Some(v) = &self.temporary_password {
            record.temporary_password = v.clone();
        }
        if let Some(v) = &self.updated_at {
            record.updated_at = v.clone();
        }
    }
}
