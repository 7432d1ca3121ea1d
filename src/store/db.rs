//! PostgreSQL-backed user store.
//!
//! One table, `twitch_users`, holds the account profile and the encrypted
//! token pair. Tokens are AES-256-GCM encrypted at rest and decrypted on the
//! way out, so nothing above this layer ever sees ciphertext.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::{UserRecord, UserStore, UserUpsert};
use crate::crypto::CryptoEngine;
use crate::error::BotError;

/// User store backed by PostgreSQL.
pub struct PgUserStore {
    pool: PgPool,
    crypto: Arc<CryptoEngine>,
}

impl PgUserStore {
    pub async fn new(db_url: &str, crypto: Arc<CryptoEngine>) -> Result<Self, BotError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(db_url)
            .await
            .map_err(|e| BotError::Database(format!("Failed to connect to PostgreSQL: {e}")))?;

        Ok(Self { pool, crypto })
    }

    /// Run schema migrations.
    pub async fn migrate(&self) -> Result<(), BotError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS twitch_users (
                id              UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                twitch_id       TEXT NOT NULL UNIQUE,
                username        TEXT NOT NULL,
                display_name    TEXT NOT NULL DEFAULT '',
                access_token    TEXT NOT NULL,
                refresh_token   TEXT NOT NULL,
                scopes          TEXT NOT NULL DEFAULT '',
                last_login      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_twitch_users_created ON twitch_users(created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_record(&self, row: &PgRow) -> Result<UserRecord, BotError> {
        let enc_access: String = row.get(3);
        let enc_refresh: String = row.get(4);
        let scopes: String = row.get(5);
        let last_login: DateTime<Utc> = row.get(6);

        Ok(UserRecord {
            twitch_id: row.get(0),
            username: row.get(1),
            display_name: row.get(2),
            access_token: self.crypto.decrypt(&enc_access)?,
            refresh_token: self.crypto.decrypt(&enc_refresh)?,
            scopes: split_scopes(&scopes),
            last_login,
        })
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn upsert(&self, user: &UserUpsert) -> Result<UserRecord, BotError> {
        let enc_access = self.crypto.encrypt(&user.access_token)?;
        let enc_refresh = self.crypto.encrypt(&user.refresh_token)?;

        let row = sqlx::query(
            r#"
            INSERT INTO twitch_users
                (twitch_id, username, display_name, access_token, refresh_token, scopes, last_login)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (twitch_id)
            DO UPDATE SET
                username = EXCLUDED.username,
                display_name = EXCLUDED.display_name,
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                scopes = EXCLUDED.scopes,
                last_login = NOW(),
                updated_at = NOW()
            RETURNING twitch_id, username, display_name, access_token, refresh_token, scopes, last_login
            "#,
        )
        .bind(&user.twitch_id)
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(&enc_access)
        .bind(&enc_refresh)
        .bind(user.scopes.join(" "))
        .fetch_one(&self.pool)
        .await?;

        self.row_to_record(&row)
    }

    async fn find_by_twitch_id(&self, twitch_id: &str) -> Result<Option<UserRecord>, BotError> {
        let row = sqlx::query(
            r#"
            SELECT twitch_id, username, display_name, access_token, refresh_token, scopes, last_login
            FROM twitch_users
            WHERE twitch_id = $1
            "#,
        )
        .bind(twitch_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_all(&self) -> Result<Vec<UserRecord>, BotError> {
        let rows = sqlx::query(
            r#"
            SELECT twitch_id, username, display_name, access_token, refresh_token, scopes, last_login
            FROM twitch_users
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| self.row_to_record(row)).collect()
    }

    async fn update_tokens(
        &self,
        twitch_id: &str,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<UserRecord, BotError> {
        let enc_access = self.crypto.encrypt(access_token)?;
        let enc_refresh = self.crypto.encrypt(refresh_token)?;

        let row = sqlx::query(
            r#"
            UPDATE twitch_users
            SET access_token = $1,
                refresh_token = $2,
                updated_at = NOW()
            WHERE twitch_id = $3
            RETURNING twitch_id, username, display_name, access_token, refresh_token, scopes, last_login
            "#,
        )
        .bind(&enc_access)
        .bind(&enc_refresh)
        .bind(twitch_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => self.row_to_record(&row),
            None => Err(BotError::UserNotFound(twitch_id.to_string())),
        }
    }

    async fn count(&self) -> Result<i64, BotError> {
        let row = sqlx::query("SELECT COUNT(*) FROM twitch_users")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get(0))
    }

    async fn delete(&self, twitch_id: &str) -> Result<bool, BotError> {
        let affected = sqlx::query("DELETE FROM twitch_users WHERE twitch_id = $1")
            .bind(twitch_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(affected > 0)
    }
}

fn split_scopes(stored: &str) -> Vec<String> {
    stored
        .split(' ')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_scopes_drops_empty_segments() {
        assert_eq!(
            split_scopes("chat:read chat:edit"),
            vec!["chat:read".to_string(), "chat:edit".to_string()]
        );
        assert!(split_scopes("").is_empty());
    }
}
