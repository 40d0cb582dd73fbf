//! Dashboard users and bearer-token authentication.
//!
//! Tokens are random, shown once at creation, and stored only as a SHA-256
//! hex digest.

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::{is_unique_violation, new_id, Store, StoreError, StoreResult};

/// Prefix of every issued token, so leaked tokens are easy to grep for.
pub const TOKEN_PREFIX: &str = "cg_";

/// Dashboard role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminRole {
    /// Full access, including resolving unclaimed handoffs.
    Admin,
    /// Support agent.
    Agent,
}

impl AdminRole {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Agent => "agent",
        }
    }

    /// Parse from text.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised role.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "admin" => Ok(Self::Admin),
            "agent" => Ok(Self::Agent),
            other => Err(StoreError::invalid_enum("admin role", other)),
        }
    }
}

/// A dashboard user. The token hash is never exposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminUser {
    /// Record id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Login email.
    pub email: String,
    /// Role.
    pub role: AdminRole,
    /// Whether the account may authenticate.
    pub active: bool,
    /// Creation timestamp.
    pub created_at: String,
}

impl AdminUser {
    /// Whether the user has the admin role.
    pub fn is_admin(&self) -> bool {
        self.role == AdminRole::Admin
    }
}

type AdminRow = (String, String, String, String, bool, String);

const ADMIN_COLUMNS: &str = "id, name, email, role, active, created_at";

fn from_row(row: AdminRow) -> StoreResult<AdminUser> {
    let (id, name, email, role, active, created_at) = row;
    Ok(AdminUser {
        id,
        name,
        email,
        role: AdminRole::parse(&role)?,
        active,
        created_at,
    })
}

/// SHA-256 hex digest of a bearer token.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn generate_token() -> String {
    format!("{TOKEN_PREFIX}{}", uuid::Uuid::new_v4().simple())
}

impl Store {
    /// Create a dashboard user. Returns the user and the plaintext token,
    /// which is not recoverable afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for blank fields or a duplicate
    /// email.
    pub async fn create_admin(
        &self,
        name: &str,
        email: &str,
        role: AdminRole,
    ) -> StoreResult<(AdminUser, String)> {
        let name = name.trim();
        let email = email.trim().to_lowercase();
        if name.is_empty() || !email.contains('@') {
            return Err(StoreError::Validation(
                "admin user needs a name and a valid email".into(),
            ));
        }

        let token = generate_token();
        let row: AdminRow = sqlx::query_as(&format!(
            "INSERT INTO admin_users (id, name, email, role, token_hash) \
             VALUES (?1, ?2, ?3, ?4, ?5) RETURNING {ADMIN_COLUMNS}"
        ))
        .bind(new_id())
        .bind(name)
        .bind(&email)
        .bind(role.as_str())
        .bind(hash_token(&token))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Validation(format!("an admin user with email {email} already exists"))
            } else {
                StoreError::Database(e)
            }
        })?;

        Ok((from_row(row)?, token))
    }

    /// Resolve a bearer token to an active user.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn authenticate_admin(&self, token: &str) -> StoreResult<Option<AdminUser>> {
        if !token.starts_with(TOKEN_PREFIX) {
            return Ok(None);
        }
        let row: Option<AdminRow> = sqlx::query_as(&format!(
            "SELECT {ADMIN_COLUMNS} FROM admin_users WHERE token_hash = ?1 AND active = 1"
        ))
        .bind(hash_token(token))
        .fetch_optional(&self.pool)
        .await?;
        row.map(from_row).transpose()
    }

    /// Look up a dashboard user by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such user exists.
    pub async fn admin(&self, id: &str) -> StoreResult<AdminUser> {
        let row: Option<AdminRow> = sqlx::query_as(&format!(
            "SELECT {ADMIN_COLUMNS} FROM admin_users WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(from_row)
            .transpose()?
            .ok_or_else(|| StoreError::not_found("admin user", id))
    }

    /// All dashboard users, by name.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn list_admins(&self) -> StoreResult<Vec<AdminUser>> {
        let rows: Vec<AdminRow> = sqlx::query_as(&format!(
            "SELECT {ADMIN_COLUMNS} FROM admin_users ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(from_row).collect()
    }
}
