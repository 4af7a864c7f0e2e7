//! Organization membership and the three-tier role model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use utoipa::ToSchema;
use uuid::Uuid;

/// Role within an organization. Ordering is `Admin > Editor > Viewer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Editor,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Role::Admin => 3,
            Role::Editor => 2,
            Role::Viewer => 1,
        }
    }

    /// Whether this role grants at least the privileges of `minimum`.
    pub fn satisfies(&self, minimum: Role) -> bool {
        self.rank() >= minimum.rank()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "editor" => Ok(Role::Editor),
            "viewer" => Ok(Role::Viewer),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// Role codes are constrained by the schema; anything unexpected is treated
/// as the least privileged role.
fn role_from_code(code: &str) -> Role {
    code.parse().unwrap_or(Role::Viewer)
}

/// Membership entity, unique per (organization, user).
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct Membership {
    pub org_id: Uuid,
    pub user_id: Uuid,
    #[schema(example = "editor")]
    pub role_code: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Membership {
    pub fn new(org_id: Uuid, user_id: Uuid, role: Role) -> Self {
        let now = Utc::now();
        Self {
            org_id,
            user_id,
            role_code: role.as_str().to_string(),
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn role(&self) -> Role {
        role_from_code(&self.role_code)
    }
}

/// A member row joined with the user's profile.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct MemberSummary {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub role_code: String,
    pub created_utc: DateTime<Utc>,
}

/// An organization as seen by one of its members.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct OrganizationWithRole {
    pub org_id: Uuid,
    pub org_name: String,
    pub org_slug: String,
    pub role_code: String,
    pub created_utc: DateTime<Utc>,
}

/// Outcome of a guarded membership change.
#[derive(Debug, Clone)]
pub enum MembershipChange {
    Updated(Membership),
    Removed,
    NotMember,
    /// Refused: the organization would be left without an administrator.
    LastAdmin,
}

/// True when moving a member from `current` to `next` (`None` = removal)
/// drops the organization's admin count to zero.
pub fn leaves_organization_without_admin(
    current: Role,
    next: Option<Role>,
    admin_count: i64,
) -> bool {
    current == Role::Admin && next != Some(Role::Admin) && admin_count <= 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ordering() {
        assert!(Role::Admin.satisfies(Role::Admin));
        assert!(Role::Admin.satisfies(Role::Editor));
        assert!(Role::Admin.satisfies(Role::Viewer));
        assert!(Role::Editor.satisfies(Role::Viewer));
        assert!(!Role::Editor.satisfies(Role::Admin));
        assert!(!Role::Viewer.satisfies(Role::Editor));
    }

    #[test]
    fn role_parsing() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("viewer".parse::<Role>().unwrap(), Role::Viewer);
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn unknown_role_code_is_least_privileged() {
        let mut membership = Membership::new(Uuid::new_v4(), Uuid::new_v4(), Role::Admin);
        membership.role_code = "superuser".to_string();
        assert_eq!(membership.role(), Role::Viewer);
    }

    #[test]
    fn last_admin_guard() {
        assert!(leaves_organization_without_admin(Role::Admin, Some(Role::Editor), 1));
        assert!(leaves_organization_without_admin(Role::Admin, None, 1));
        assert!(!leaves_organization_without_admin(Role::Admin, None, 2));
        assert!(!leaves_organization_without_admin(Role::Admin, Some(Role::Admin), 1));
        assert!(!leaves_organization_without_admin(Role::Editor, None, 1));
    }
}
