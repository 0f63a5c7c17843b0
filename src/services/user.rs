//! User service
//!
//! Implements business logic for accounts:
//! - Identity factory (`create_user`, `create_superuser`) keyed by a
//!   normalized email
//! - Credential verification
//! - Session tokens for the HTTP surface (login, validation, logout)

use crate::db::repositories::{SessionRepository, UserRepository};
use crate::models::{normalize_email, CreateUserInput, Session, User, EMAIL_MAX_LEN, NAME_MAX_LEN};
use crate::services::password::{hash_password, verify_password};
use crate::services::FieldErrors;
use anyhow::Context;
use std::sync::Arc;

/// Default session expiration time in days
const DEFAULT_SESSION_EXPIRATION_DAYS: i64 = 7;

const INVALID_CREDENTIALS: &str = "Unable to log in with provided credentials.";

/// Error types for user service operations
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    /// Authentication failed (invalid credentials)
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    /// Validation error (invalid input)
    #[error("Validation error: {0}")]
    ValidationError(FieldErrors),

    /// User already exists
    #[error("User already exists: {0}")]
    UserExists(String),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// User service for managing accounts and sessions
pub struct UserService {
    user_repo: Arc<dyn UserRepository>,
    session_repo: Arc<dyn SessionRepository>,
    session_expiration_days: i64,
}

impl UserService {
    /// Create a new user service with the given repositories
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        session_repo: Arc<dyn SessionRepository>,
    ) -> Self {
        Self::with_session_expiration(user_repo, session_repo, DEFAULT_SESSION_EXPIRATION_DAYS)
    }

    /// Create a new user service with custom session expiration
    pub fn with_session_expiration(
        user_repo: Arc<dyn UserRepository>,
        session_repo: Arc<dyn SessionRepository>,
        session_expiration_days: i64,
    ) -> Self {
        Self {
            user_repo,
            session_repo,
            session_expiration_days,
        }
    }

    /// Create an ordinary account.
    ///
    /// The email is trimmed and lower-cased before the uniqueness check and
    /// before it is stored.
    ///
    /// # Errors
    ///
    /// - `ValidationError` if the email is blank or too long, the password
    ///   is empty, or the name is too long
    /// - `UserExists` if the normalized email is already registered
    /// - `InternalError` for database errors
    pub async fn create_user(&self, input: CreateUserInput) -> Result<User, UserServiceError> {
        let user = self.build_user(input).await?;
        self.persist(user).await
    }

    /// Create an account with staff and superuser flags set.
    pub async fn create_superuser(
        &self,
        email: &str,
        password: &str,
    ) -> Result<User, UserServiceError> {
        let input = CreateUserInput {
            email: email.to_string(),
            password: password.to_string(),
            name: None,
        };
        let user = self.build_user(input).await?.into_superuser();
        self.persist(user).await
    }

    /// Check an email/password pair.
    ///
    /// Unknown email, wrong password and inactive account all fail with the
    /// same `AuthenticationError`.
    pub async fn verify_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<User, UserServiceError> {
        let email = normalize_email(email);
        let Some(user) = self
            .user_repo
            .get_by_email(&email)
            .await
            .context("Failed to get user by email")?
        else {
            return Err(UserServiceError::AuthenticationError(
                INVALID_CREDENTIALS.to_string(),
            ));
        };

        let password_valid = verify_password(password, &user.password_hash)
            .context("Failed to verify password")?;

        if !password_valid || !user.is_active {
            tracing::debug!("Rejected login for user {}", user.id);
            return Err(UserServiceError::AuthenticationError(
                INVALID_CREDENTIALS.to_string(),
            ));
        }

        Ok(user)
    }

    /// Verify credentials and open a new session.
    pub async fn login(&self, email: &str, password: &str) -> Result<(Session, User), UserServiceError> {
        let user = self.verify_credentials(email, password).await?;

        let session = Session::new(user.id, self.session_expiration_days);
        let session = self
            .session_repo
            .create(&session)
            .await
            .context("Failed to create session")?;

        tracing::info!("User {} logged in", user.id);
        Ok((session, user))
    }

    /// Invalidate a session. Unknown tokens are not an error.
    pub async fn logout(&self, token: &str) -> Result<(), UserServiceError> {
        self.session_repo
            .delete(token)
            .await
            .context("Failed to delete session")?;
        Ok(())
    }

    /// Resolve a session token to its user.
    ///
    /// Returns `None` for unknown or expired tokens; expired sessions are
    /// removed on the way.
    pub async fn validate_session(&self, token: &str) -> Result<Option<User>, UserServiceError> {
        let session = match self
            .session_repo
            .get_by_id(token)
            .await
            .context("Failed to get session")?
        {
            Some(s) => s,
            None => return Ok(None),
        };

        if session.is_expired() {
            self.session_repo
                .delete(token)
                .await
                .context("Failed to delete expired session")?;
            return Ok(None);
        }

        let user = self
            .user_repo
            .get_by_id(session.user_id)
            .await
            .context("Failed to get user")?;

        Ok(user.filter(|u| u.is_active))
    }

    /// Delete all expired sessions, returning how many were removed
    pub async fn cleanup_expired_sessions(&self) -> Result<u64, UserServiceError> {
        let count = self
            .session_repo
            .delete_expired()
            .await
            .context("Failed to delete expired sessions")?;

        if count > 0 {
            tracing::info!("Removed {} expired sessions", count);
        }
        Ok(count)
    }

    /// Validate input and produce an unsaved user with a hashed password.
    async fn build_user(&self, input: CreateUserInput) -> Result<User, UserServiceError> {
        let mut errors = FieldErrors::new();

        let email = normalize_email(&input.email);
        if email.is_empty() {
            errors.add("email", "Users must have an email address.");
        } else if email.chars().count() > EMAIL_MAX_LEN {
            errors.add(
                "email",
                format!("Ensure this field has no more than {} characters.", EMAIL_MAX_LEN),
            );
        }

        if input.password.is_empty() {
            errors.add("password", "This field may not be blank.");
        }

        let name = input.name.unwrap_or_default();
        if name.chars().count() > NAME_MAX_LEN {
            errors.add(
                "name",
                format!("Ensure this field has no more than {} characters.", NAME_MAX_LEN),
            );
        }

        errors.into_result().map_err(UserServiceError::ValidationError)?;

        if self
            .user_repo
            .exists_by_email(&email)
            .await
            .context("Failed to check email")?
        {
            return Err(already_registered(&email));
        }

        let password_hash = hash_password(&input.password).context("Failed to hash password")?;

        Ok(User::new(email, password_hash, name))
    }

    /// Insert the user; losing a signup race on the email is `UserExists`.
    async fn persist(&self, user: User) -> Result<User, UserServiceError> {
        let created = match self.user_repo.create(&user).await {
            Ok(created) => created,
            Err(e) if is_unique_violation(&e) => {
                return Err(already_registered(&user.email));
            }
            Err(e) => return Err(e.context("Failed to create user").into()),
        };

        tracing::info!("Created user {} <{}>", created.id, created.email);
        Ok(created)
    }
}

fn already_registered(email: &str) -> UserServiceError {
    UserServiceError::UserExists(format!("Email '{}' is already registered", email))
}

/// Whether a database error in the chain is a UNIQUE constraint failure
fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<sqlx::Error>(),
            Some(sqlx::Error::Database(db)) if db.is_unique_violation()
        )
    })
}
