//! Ledger backing single-use confirm/reset tokens. A token's `jti` claim
//! must still have a row here to be consumable; consumption deletes the
//! row, so replaying a token fails even while its JWT is unexpired.

use sqlx::PgPool;
use std::time::Duration;
use time::{Duration as TimeDuration, OffsetDateTime};
use uuid::Uuid;

use crate::auth::jwt::TokenKind;

pub async fn issue(
    db: &PgPool,
    user_id: Uuid,
    kind: TokenKind,
    jti: Uuid,
    ttl: Duration,
) -> anyhow::Result<()> {
    let expires_at = OffsetDateTime::now_utc() + TimeDuration::seconds(ttl.as_secs() as i64);
    sqlx::query(
        r#"
        INSERT INTO account_tokens (jti, user_id, kind, expires_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(jti)
    .bind(user_id)
    .bind(kind.as_str())
    .bind(expires_at)
    .execute(db)
    .await?;
    Ok(())
}

/// Atomically consume a token, returning its user id. `None` means the
/// token was never issued, already used, or past its expiry.
pub async fn consume(db: &PgPool, jti: Uuid, kind: TokenKind) -> anyhow::Result<Option<Uuid>> {
    // TODO: sweep rows whose expires_at is long past; they are unusable but
    // linger until their user is deleted.
    let user_id = sqlx::query_scalar::<_, Uuid>(
        r#"
        DELETE FROM account_tokens
        WHERE jti = $1 AND kind = $2 AND expires_at > now()
        RETURNING user_id
        "#,
    )
    .bind(jti)
    .bind(kind.as_str())
    .fetch_optional(db)
    .await?;
    Ok(user_id)
}
