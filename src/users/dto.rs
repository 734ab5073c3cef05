use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::users::repo::User;

/// Request body for sign-in. Fields are optional so the handler can
/// report exactly which ones are missing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInRequest {
    pub user_name: Option<String>,
    pub password: Option<String>,
}

/// Request body for sign-up.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpRequest {
    pub email: Option<String>,
    pub user_name: Option<String>,
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Request body for completing a password reset.
#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub password: Option<String>,
    pub password_confirmation: Option<String>,
}

/// Request body for asking for a password-reset email.
#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: Option<String>,
}

/// Query string of `GET /users/confirm`.
#[derive(Debug, Deserialize)]
pub struct ConfirmParams {
    pub c: Option<String>,
}

/// Query string of `GET /users/reset`.
#[derive(Debug, Deserialize)]
pub struct ResetParams {
    pub r: Option<String>,
}

/// Error body used by the token endpoints (confirm/reset).
#[derive(Debug, Serialize)]
pub struct TokenFailure {
    pub code: u16,
    pub message: &'static str,
}

/// The part of a user that may leave the server. Everything else
/// (password hash, karma) stays behind this allow-list.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub user_name: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub confirmed: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login: Option<OffsetDateTime>,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            user_name: user.user_name,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            confirmed: user.confirmed,
            last_login: user.last_login,
        }
    }
}
