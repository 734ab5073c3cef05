use std::time::Duration;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{auth::cookie, config::JwtConfig, state::AppState};

/// What a signed token authorizes: a browser session, an email
/// confirmation, or a password reset.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Session,
    Confirm,
    Reset,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Session => "session",
            TokenKind::Confirm => "confirm",
            TokenKind::Reset => "reset",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,
    /// Display username, present on session tokens only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Single-use token id, present on confirm/reset tokens only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<Uuid>,
    pub exp: usize,
    pub iat: usize,
    pub iss: String,
    pub aud: String,
    pub kind: TokenKind,
}

#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub session_ttl: Duration,
    pub confirm_ttl: Duration,
    pub reset_ttl: Duration,
}

impl JwtKeys {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            session_ttl: Duration::from_secs((config.session_ttl_minutes as u64) * 60),
            confirm_ttl: Duration::from_secs((config.confirm_ttl_minutes as u64) * 60),
            reset_ttl: Duration::from_secs((config.reset_ttl_minutes as u64) * 60),
        }
    }

    fn ttl_for(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Session => self.session_ttl,
            TokenKind::Confirm => self.confirm_ttl,
            TokenKind::Reset => self.reset_ttl,
        }
    }

    fn sign_with_kind(
        &self,
        user_id: Uuid,
        username: Option<String>,
        jti: Option<Uuid>,
        kind: TokenKind,
    ) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(self.ttl_for(kind).as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            username,
            jti,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, kind = ?kind, "jwt signed");
        Ok(token)
    }

    /// Sign the JWT carried in the session cookie.
    pub fn sign_session(&self, user_id: Uuid, username: &str) -> anyhow::Result<String> {
        self.sign_with_kind(user_id, Some(username.to_string()), None, TokenKind::Session)
    }

    /// Sign a single-use confirm/reset token; `jti` must be recorded in the
    /// account-token ledger for the token to be consumable.
    pub fn sign_account(
        &self,
        user_id: Uuid,
        kind: TokenKind,
        jti: Uuid,
    ) -> anyhow::Result<String> {
        self.sign_with_kind(user_id, None, Some(jti), kind)
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        debug!(user_id = %data.claims.sub, kind = ?data.claims.kind, "jwt verified");
        Ok(data.claims)
    }

    pub fn verify_kind(&self, token: &str, kind: TokenKind) -> anyhow::Result<Claims> {
        let claims = self.verify(token)?;
        if claims.kind != kind {
            anyhow::bail!("not a {} token", kind.as_str());
        }
        Ok(claims)
    }
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        Self::new(&state.config.jwt)
    }
}

/// Extracts the signed-in user's id from the session cookie.
pub struct AuthUser(pub Uuid);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        let token = cookie::extract_session_token(&parts.headers).ok_or((
            StatusCode::UNAUTHORIZED,
            "Missing session cookie".to_string(),
        ))?;

        let claims = match keys.verify(&token) {
            Ok(c) => c,
            Err(_) => {
                warn!("invalid or expired session token");
                return Err((
                    StatusCode::UNAUTHORIZED,
                    "Invalid or expired token".to_string(),
                ));
            }
        };

        if claims.kind != TokenKind::Session {
            return Err((
                StatusCode::UNAUTHORIZED,
                "Session token required".to_string(),
            ));
        }

        Ok(AuthUser(claims.sub))
    }
}
