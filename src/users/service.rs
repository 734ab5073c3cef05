use axum::extract::FromRef;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::auth::jwt::{JwtKeys, TokenKind};
use crate::auth::{password, tokens};
use crate::config::AppConfig;
use crate::email::{self, Mailer};
use crate::state::AppState;
use crate::users::repo::{NewUser, User};
use crate::users::validate;

#[derive(Debug, Error)]
pub enum UserError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Incorrect username or password.")]
    InvalidCredentials,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for UserError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            UserError::Validation(message) => (StatusCode::BAD_REQUEST, message),
            UserError::Conflict(message) => (StatusCode::CONFLICT, message),
            UserError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "Incorrect username or password.".to_string(),
            ),
            UserError::Internal(err) => {
                error!(error = %err, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}

/// Account-lifecycle controller. Holds its collaborators explicitly so
/// handlers receive a fully wired instance instead of reaching for
/// globals.
#[derive(Clone)]
pub struct UserService {
    db: PgPool,
    mailer: Arc<dyn Mailer>,
    keys: JwtKeys,
    config: Arc<AppConfig>,
}

impl FromRef<AppState> for UserService {
    fn from_ref(state: &AppState) -> Self {
        Self::new(state.db.clone(), state.mailer.clone(), state.config.clone())
    }
}

impl UserService {
    pub fn new(db: PgPool, mailer: Arc<dyn Mailer>, config: Arc<AppConfig>) -> Self {
        let keys = JwtKeys::new(&config.jwt);
        Self {
            db,
            mailer,
            keys,
            config,
        }
    }

    /// Register a new, unconfirmed account and dispatch the confirmation
    /// email.
    pub async fn create_user(
        &self,
        email: &str,
        user_name: &str,
        password_plain: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<User, UserError> {
        // Normalization is an explicit step here, not a store hook.
        let email = email.trim().to_lowercase();

        if !validate::is_valid_email(&email) {
            return Err(UserError::Validation("Invalid email".into()));
        }
        if !validate::is_valid_user_name(user_name) {
            return Err(UserError::Validation("Invalid username".into()));
        }
        if !validate::is_valid_password(password_plain) {
            return Err(UserError::Validation("Password too short".into()));
        }
        if !validate::is_valid_name(first_name) {
            return Err(UserError::Validation("Invalid first name".into()));
        }
        if !validate::is_valid_name(last_name) {
            return Err(UserError::Validation("Invalid last name".into()));
        }

        if User::find_by_user_name(&self.db, user_name).await?.is_some() {
            return Err(UserError::Conflict("Username already taken".into()));
        }
        if User::find_by_email(&self.db, &email).await?.is_some() {
            return Err(UserError::Conflict("Email already registered".into()));
        }

        let hash = password::hash_password(password_plain)?;

        let user = match User::create(
            &self.db,
            NewUser {
                email: &email,
                user_name,
                password_hash: &hash,
                first_name,
                last_name,
            },
        )
        .await
        {
            Ok(user) => user,
            // A concurrent sign-up can slip past the pre-checks; the
            // unique constraints are the source of truth.
            Err(e) => {
                if let sqlx::Error::Database(db_err) = &e {
                    if db_err.code().as_deref() == Some("23505") {
                        return Err(UserError::Conflict(
                            "Username or email already taken".into(),
                        ));
                    }
                }
                return Err(UserError::Internal(e.into()));
            }
        };

        if let Err(e) = self.send_confirmation(&user).await {
            // The account exists either way; the user can ask for a new
            // link rather than re-registering.
            error!(error = %e, user_id = %user.id, "failed to send confirmation email");
        }

        info!(user_id = %user.id, user_name = %user.user_name, "user registered");
        Ok(user)
    }

    /// Verify credentials, stamping `last_login` on success. Failures are
    /// indistinguishable between unknown username and wrong password.
    pub async fn sign_in(&self, user_name: &str, password_plain: &str) -> Result<User, UserError> {
        let Some(user) = User::find_by_user_name(&self.db, user_name).await? else {
            debug!("sign-in for unknown username");
            return Err(UserError::InvalidCredentials);
        };

        if !password::verify_password(password_plain, &user.password_hash)? {
            debug!(user_id = %user.id, "sign-in with wrong password");
            return Err(UserError::InvalidCredentials);
        }

        let user = User::touch_last_login(&self.db, user.id).await?;
        info!(user_id = %user.id, "user signed in");
        Ok(user)
    }

    /// Consume a confirmation token. False on any failure: bad signature,
    /// expiry, wrong kind, or a token already used.
    pub async fn confirm_email(&self, token: &str) -> bool {
        let claims = match self.keys.verify_kind(token, TokenKind::Confirm) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(error = %e, "confirm token rejected");
                return false;
            }
        };
        let Some(jti) = claims.jti else {
            return false;
        };

        let user_id = match tokens::consume(&self.db, jti, TokenKind::Confirm).await {
            Ok(Some(user_id)) => user_id,
            Ok(None) => {
                debug!(jti = %jti, "confirm token already used or expired");
                return false;
            }
            Err(e) => {
                error!(error = %e, "failed to consume confirm token");
                return false;
            }
        };
        if user_id != claims.sub {
            return false;
        }

        match User::mark_confirmed(&self.db, user_id).await {
            Ok(updated) => {
                if updated {
                    info!(user_id = %user_id, "email confirmed");
                }
                updated
            }
            Err(e) => {
                error!(error = %e, "failed to mark user confirmed");
                false
            }
        }
    }

    /// Consume a reset token and replace the password. False on mismatch,
    /// format failure, or any token failure.
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
        confirmation: &str,
    ) -> bool {
        if new_password != confirmation || !validate::is_valid_password(new_password) {
            return false;
        }

        let claims = match self.keys.verify_kind(token, TokenKind::Reset) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(error = %e, "reset token rejected");
                return false;
            }
        };
        let Some(jti) = claims.jti else {
            return false;
        };

        let user_id = match tokens::consume(&self.db, jti, TokenKind::Reset).await {
            Ok(Some(user_id)) => user_id,
            Ok(None) => {
                debug!(jti = %jti, "reset token already used or expired");
                return false;
            }
            Err(e) => {
                error!(error = %e, "failed to consume reset token");
                return false;
            }
        };
        if user_id != claims.sub {
            return false;
        }

        let hash = match password::hash_password(new_password) {
            Ok(hash) => hash,
            Err(e) => {
                error!(error = %e, "failed to hash new password");
                return false;
            }
        };

        match User::set_password(&self.db, user_id, &hash).await {
            Ok(updated) => {
                if updated {
                    info!(user_id = %user_id, "password reset");
                }
                updated
            }
            Err(e) => {
                error!(error = %e, "failed to persist new password");
                false
            }
        }
    }

    /// Issue a reset token if the address maps to an account. Reports
    /// nothing about account existence to the caller.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), UserError> {
        let email = email.trim().to_lowercase();
        if !validate::is_valid_email(&email) {
            return Err(UserError::Validation("Invalid email".into()));
        }

        match User::find_by_email(&self.db, &email).await? {
            Some(user) => {
                if let Err(e) = self.send_reset(&user).await {
                    error!(error = %e, user_id = %user.id, "failed to send reset email");
                }
            }
            None => debug!("password reset requested for unknown email"),
        }
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<User>, UserError> {
        Ok(User::find_by_id(&self.db, id).await?)
    }

    async fn send_confirmation(&self, user: &User) -> anyhow::Result<()> {
        let jti = Uuid::new_v4();
        tokens::issue(
            &self.db,
            user.id,
            TokenKind::Confirm,
            jti,
            self.keys.confirm_ttl,
        )
        .await?;
        let token = self.keys.sign_account(user.id, TokenKind::Confirm, jti)?;
        let mail = email::confirmation_email(&self.config.public_url, &user.email, &token);
        self.mailer.send(&mail).await
    }

    async fn send_reset(&self, user: &User) -> anyhow::Result<()> {
        let jti = Uuid::new_v4();
        tokens::issue(&self.db, user.id, TokenKind::Reset, jti, self.keys.reset_ttl).await?;
        let token = self.keys.sign_account(user.id, TokenKind::Reset, jti)?;
        let mail = email::password_reset_email(&self.config.public_url, &user.email, &token);
        self.mailer.send(&mail).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Validation runs before any query, so these tests never touch the
    // lazily connected pool in the fake state.
    fn make_service() -> UserService {
        let state = AppState::fake();
        UserService::from_ref(&state)
    }

    #[tokio::test]
    async fn create_user_rejects_foreign_email() {
        let svc = make_service();
        let err = svc
            .create_user("a@gmail.com", "abc123", "longenough", "A", "B")
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::Validation(ref m) if m == "Invalid email"));
    }

    #[tokio::test]
    async fn create_user_rejects_bad_username() {
        let svc = make_service();
        let err = svc
            .create_user("a@mail.utoronto.ca", "not valid!", "longenough", "A", "B")
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::Validation(ref m) if m == "Invalid username"));
    }

    #[tokio::test]
    async fn create_user_rejects_short_password() {
        let svc = make_service();
        let err = svc
            .create_user("a@mail.utoronto.ca", "abc123", "short", "A", "B")
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::Validation(ref m) if m == "Password too short"));
    }

    #[tokio::test]
    async fn create_user_rejects_nonalphabetic_names() {
        let svc = make_service();
        let err = svc
            .create_user("a@mail.utoronto.ca", "abc123", "longenough", "A1", "B")
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::Validation(ref m) if m == "Invalid first name"));
    }

    #[tokio::test]
    async fn confirm_rejects_garbage_token() {
        let svc = make_service();
        assert!(!svc.confirm_email("not-a-jwt").await);
    }

    #[tokio::test]
    async fn confirm_rejects_session_token() {
        let state = AppState::fake();
        let svc = UserService::from_ref(&state);
        let keys = JwtKeys::new(&state.config.jwt);
        let token = keys
            .sign_session(Uuid::new_v4(), "abc123")
            .expect("sign session");
        assert!(!svc.confirm_email(&token).await);
    }

    #[tokio::test]
    async fn reset_rejects_mismatched_passwords() {
        let svc = make_service();
        assert!(!svc.reset_password("whatever", "longenough", "different").await);
    }

    #[tokio::test]
    async fn reset_rejects_short_password() {
        let svc = make_service();
        assert!(!svc.reset_password("whatever", "short", "short").await);
    }

    #[tokio::test]
    async fn reset_rejects_garbage_token() {
        let svc = make_service();
        assert!(!svc.reset_password("not-a-jwt", "longenough", "longenough").await);
    }

    #[tokio::test]
    async fn forgot_rejects_invalid_email() {
        let svc = make_service();
        let err = svc.request_password_reset("nope").await.unwrap_err();
        assert!(matches!(err, UserError::Validation(_)));
    }
}
