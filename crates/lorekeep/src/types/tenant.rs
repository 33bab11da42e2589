//! Tenant identity as supplied by the external authentication layer

use serde::{Deserialize, Serialize};

/// Tenant role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// An authenticated principal. The core never parses tokens; the HTTP layer
/// receives `(tenant_id, role)` from the auth layer and hands it down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: i64,
    pub role: Role,
}

impl Tenant {
    pub fn user(id: i64) -> Self {
        Self { id, role: Role::User }
    }

    pub fn admin(id: i64) -> Self {
        Self { id, role: Role::Admin }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Whether this tenant may act on data owned by `owner_id`.
    pub fn can_access(&self, owner_id: i64) -> bool {
        self.is_admin() || self.id == owner_id
    }
}
