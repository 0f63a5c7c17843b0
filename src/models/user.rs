//! User model
//!
//! This module defines the User entity and the identity factory inputs.
//! Accounts are keyed by a normalized (trimmed, lower-cased) email address.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of a normalized email address.
pub const EMAIL_MAX_LEN: usize = 40;

/// Maximum length of a display name.
pub const NAME_MAX_LEN: usize = 255;

/// User entity representing a registered account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier
    pub id: i64,
    /// Email address (unique, lower-cased)
    pub email: String,
    /// Password hash (argon2)
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Display name, may be empty
    pub name: String,
    /// Inactive users cannot log in
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a new active, unprivileged User.
    ///
    /// The email should already be normalized and the password hashed.
    /// Use `normalize_email()` and `services::password::hash_password()`.
    pub fn new(email: String, password_hash: String, name: String) -> Self {
        Self {
            id: 0, // Will be set by the database
            email,
            password_hash,
            name,
            is_active: true,
            is_staff: false,
            is_superuser: false,
            created_at: Utc::now(),
        }
    }

    /// Grant staff and superuser flags
    pub fn into_superuser(mut self) -> Self {
        self.is_staff = true;
        self.is_superuser = true;
        self
    }
}

/// Normalize an email address for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Input for creating a new user
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserInput {
    /// Email address, normalized before persisting
    pub email: String,
    /// Plaintext password (will be hashed)
    pub password: String,
    /// Display name (optional, defaults to empty)
    #[serde(default)]
    pub name: Option<String>,
}

/// Credentials submitted at login
#[derive(Debug, Clone, Deserialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}
