//! Authentication Models
//! Mission: Define the sysop account and JWT claim shapes.
//!
//! The only gated surface in this crate is the sysop dashboard's
//! cross-tenant reads (spec.md §4.AMBIENT-AUTH); there is no multi-role
//! RBAC, so `UserRole` collapses to a single variant rather than the base
//! crate's admin/trader/viewer split.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sysop account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserRole {
    #[serde(rename = "sysop")]
    Sysop,
}

impl UserRole {
    pub fn as_str(&self) -> &str {
        match self {
            UserRole::Sysop => "sysop",
        }
    }
}

/// JWT claims payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub role: UserRole,
    pub exp: usize,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: usize,
    pub role: UserRole,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub role: UserRole,
    pub created_at: String,
}

impl UserResponse {
    pub fn from_user(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            username: user.username.clone(),
            role: user.role.clone(),
            created_at: user.created_at.clone(),
        }
    }
}
