use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;

use crate::{auth::AuthUser, error::ApiError};

/// Role
///
/// The RBAC field stored on every profile row. Persisted as the Postgres enum
/// `user_role` using the variant names verbatim ('Admin', 'Librarian', 'Member').
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS, ToSchema, sqlx::Type,
)]
#[sqlx(type_name = "user_role")]
#[ts(export)]
pub enum Role {
    Admin,
    Librarian,
    #[default]
    Member,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Librarian, Role::Member];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Librarian => "Librarian",
            Role::Member => "Member",
        }
    }

    /// Name of the permission group a role maps onto.
    pub fn group_name(&self) -> &'static str {
        match self {
            Role::Admin => "Admins",
            Role::Librarian => "Librarians",
            Role::Member => "Members",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability
///
/// The unit of permission granted or denied on the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Capability {
    View,
    Add,
    Change,
    Delete,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::View,
        Capability::Add,
        Capability::Change,
        Capability::Delete,
    ];

    /// Permission codename, e.g. `can_delete_book`.
    pub fn codename(&self) -> &'static str {
        match self {
            Capability::View => "can_view_book",
            Capability::Add => "can_add_book",
            Capability::Change => "can_change_book",
            Capability::Delete => "can_delete_book",
        }
    }
}

/// The capability table. Each row is an explicit grant list; there is no
/// ordering between roles.
const GRANTS: [(Role, &[Capability]); 3] = [
    (
        Role::Admin,
        &[
            Capability::View,
            Capability::Add,
            Capability::Change,
            Capability::Delete,
        ],
    ),
    (
        Role::Librarian,
        &[Capability::View, Capability::Add, Capability::Change],
    ),
    (Role::Member, &[Capability::View]),
];

/// Capabilities granted to a role.
pub fn granted(role: Role) -> &'static [Capability] {
    GRANTS
        .iter()
        .find(|(r, _)| *r == role)
        .map(|(_, caps)| *caps)
        .unwrap_or(&[])
}

/// allows
///
/// The single authorization decision. An identity without a profile row
/// (`None`) is denied everything.
pub fn allows(role: Option<Role>, capability: Capability) -> bool {
    match role {
        Some(role) => granted(role).contains(&capability),
        None => false,
    }
}

/// authorize
///
/// Handler-facing gate. Callers reaching this point are already authenticated
/// (anonymous callers are rejected with 401 by the `AuthUser` extractor), so a
/// denial here is always 403.
pub fn authorize(user: &AuthUser, capability: Capability) -> Result<(), ApiError> {
    if allows(user.role, capability) {
        Ok(())
    } else {
        tracing::debug!(
            user_id = %user.id,
            role = ?user.role,
            capability = capability.codename(),
            "capability denied"
        );
        Err(ApiError::Forbidden)
    }
}

/// Exact-role gate used by the role dashboards and the admin routes.
pub fn require_role(user: &AuthUser, role: Role) -> Result<(), ApiError> {
    if user.role == Some(role) {
        Ok(())
    } else {
        tracing::debug!(user_id = %user.id, role = ?user.role, required = %role, "role denied");
        Err(ApiError::Forbidden)
    }
}

/// RolePermissions
///
/// One row of the permission table exposed to administrators.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RolePermissions {
    pub role: Role,
    pub group: String,
    pub permissions: Vec<String>,
}

pub fn permission_table() -> Vec<RolePermissions> {
    Role::ALL
        .iter()
        .map(|role| RolePermissions {
            role: *role,
            group: role.group_name().to_string(),
            permissions: granted(*role)
                .iter()
                .map(|c| c.codename().to_string())
                .collect(),
        })
        .collect()
}
